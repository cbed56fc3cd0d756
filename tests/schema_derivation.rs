use quartdb::{Column, LogicalType, QuartError, Schema, Value};

fn fields(pairs: Vec<(&str, Column)>) -> Vec<(String, Column)> {
    pairs.into_iter().map(|(n, c)| (n.to_owned(), c)).collect()
}

#[test]
fn field_order_matches_declaration_order() {
    let schema = Schema::derive(
        "Person",
        fields(vec![
            ("name", Column::new("STRING").unwrap()),
            ("age", Column::new("INTEGER").unwrap()),
            ("height", Column::new("REAL").unwrap()),
        ]),
    )
    .unwrap();
    let names: Vec<&str> = schema.fields().map(|(n, _)| n).collect();
    assert_eq!(names, vec!["name", "age", "height"]);
}

#[test]
fn surrogate_key_is_implicit_when_none_declared() {
    let schema = Schema::derive(
        "Person",
        fields(vec![("name", Column::new("TEXT").unwrap())]),
    )
    .unwrap();
    assert!(schema.has_surrogate_key());
    assert_eq!(schema.primary_key(), "id");
    assert_eq!(schema.lookup_type("id"), Some(LogicalType::Integer));
}

#[test]
fn declared_primary_key_wins() {
    let schema = Schema::derive(
        "Account",
        fields(vec![
            ("handle", Column::new("TEXT").unwrap().primary_key()),
            ("balance", Column::new("REAL").unwrap()),
        ]),
    )
    .unwrap();
    assert!(!schema.has_surrogate_key());
    assert_eq!(schema.primary_key(), "handle");
}

#[test]
fn empty_field_set_is_rejected() {
    let err = Schema::derive("Empty", vec![]).unwrap_err();
    assert!(matches!(err, QuartError::Schema(_)));
}

#[test]
fn duplicate_field_names_are_rejected() {
    let err = Schema::derive(
        "Person",
        fields(vec![
            ("name", Column::new("TEXT").unwrap()),
            ("name", Column::new("INTEGER").unwrap()),
        ]),
    )
    .unwrap_err();
    assert!(matches!(err, QuartError::Schema(_)));
    assert!(err.to_string().contains("name"));
}

#[test]
fn multiple_primary_keys_are_rejected() {
    let err = Schema::derive(
        "Person",
        fields(vec![
            ("a", Column::new("INTEGER").unwrap().primary_key()),
            ("b", Column::new("INTEGER").unwrap().primary_key()),
        ]),
    )
    .unwrap_err();
    assert!(matches!(err, QuartError::Schema(_)));
}

#[test]
fn field_colliding_with_surrogate_key_is_rejected() {
    let err = Schema::derive(
        "Person",
        fields(vec![("id", Column::new("INTEGER").unwrap())]),
    )
    .unwrap_err();
    assert!(matches!(err, QuartError::Schema(_)));
}

#[test]
fn unknown_type_name_is_rejected_at_construction() {
    let err = Column::new("VARCHAR").unwrap_err();
    assert!(matches!(err, QuartError::Schema(_)));
    assert!(err.to_string().contains("VARCHAR"));
}

#[test]
fn type_aliases_resolve() {
    assert_eq!(
        Column::new("string").unwrap().logical_type(),
        LogicalType::Text
    );
    assert_eq!(
        Column::new("Bool").unwrap().logical_type(),
        LogicalType::Boolean
    );
    assert_eq!(
        Column::new("DATETIME").unwrap().logical_type(),
        LogicalType::Timestamp
    );
}

#[test]
fn table_name_is_normalized() {
    let schema = Schema::derive(
        "My Model-2",
        fields(vec![("x", Column::new("INTEGER").unwrap())]),
    )
    .unwrap();
    assert_eq!(schema.table(), "my_model_2");
}

#[test]
fn default_value_must_match_column_type() {
    let err = Column::new("INTEGER")
        .unwrap()
        .default_value(Value::from("not a number"))
        .unwrap_err();
    assert!(matches!(err, QuartError::Schema(_)));
    assert!(
        Column::new("INTEGER")
            .unwrap()
            .default_value(Value::from(7))
            .is_ok()
    );
}

#[test]
fn derivation_is_idempotent() {
    let declare = || {
        Schema::derive(
            "Person",
            fields(vec![
                ("name", Column::new("TEXT").unwrap().indexed()),
                ("age", Column::new("INTEGER").unwrap()),
            ]),
        )
        .unwrap()
    };
    assert_eq!(declare(), declare());
}
