use quartdb::{
    create_basemodel, Column, DatabaseOptions, Filter, LookupPlan, Model, Op, QuartError, Schema,
    Value,
};

async fn seeded_model(dir: &tempfile::TempDir) -> Model {
    let base = create_basemodel(dir.path().join("t.db"), DatabaseOptions::default()).unwrap();
    let user = base
        .model(
            "User",
            vec![
                ("name", Column::new("STRING").unwrap().indexed()),
                ("age", Column::new("INTEGER").unwrap()),
                ("score", Column::new("REAL").unwrap()),
            ],
        )
        .unwrap();
    for (name, age, score) in [
        ("alice", 30, 1.5),
        ("bob", 41, 2.5),
        ("carol", 30, 3.5),
        ("dave", 17, 4.5),
    ] {
        user.create(vec![
            ("name", Value::from(name)),
            ("age", Value::from(age)),
            ("score", Value::from(score)),
        ])
        .await
        .unwrap();
    }
    user
}

#[tokio::test]
async fn comparison_operators() {
    let dir = tempfile::tempdir().unwrap();
    let user = seeded_model(&dir).await;

    let adults = user
        .fetch(&Filter::new().compare("age", Op::Gte, 18))
        .await
        .unwrap();
    assert_eq!(adults.len(), 3);

    let not_thirty = user
        .fetch(&Filter::new().compare("age", Op::Ne, 30))
        .await
        .unwrap();
    assert_eq!(not_thirty.len(), 2);

    let low_score = user
        .fetch(&Filter::new().compare("score", Op::Lt, 2.0))
        .await
        .unwrap();
    assert_eq!(low_score.len(), 1);
    assert_eq!(low_score[0].text("name"), Some("alice"));
}

#[tokio::test]
async fn conjunction_combines_conditions() {
    let dir = tempfile::tempdir().unwrap();
    let user = seeded_model(&dir).await;
    let rows = user
        .fetch(
            &Filter::new()
                .field("age", 30)
                .compare("score", Op::Gt, 2.0),
        )
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].text("name"), Some("carol"));
}

#[tokio::test]
async fn membership_and_like() {
    let dir = tempfile::tempdir().unwrap();
    let user = seeded_model(&dir).await;

    let picked = user
        .fetch(&Filter::new().one_of(
            "name",
            vec![Value::from("alice"), Value::from("dave")],
        ))
        .await
        .unwrap();
    assert_eq!(picked.len(), 2);

    let a_names = user.fetch(&Filter::new().like("name", "a%")).await.unwrap();
    assert_eq!(a_names.len(), 1);
    assert_eq!(a_names[0].text("name"), Some("alice"));

    let empty_set = user.fetch(&Filter::new().one_of("name", vec![])).await.unwrap();
    assert!(empty_set.is_empty());
}

#[tokio::test]
async fn empty_filter_matches_all_with_limit_and_offset() {
    let dir = tempfile::tempdir().unwrap();
    let user = seeded_model(&dir).await;

    let all = user.fetch(&Filter::new()).await.unwrap();
    assert_eq!(all.len(), 4);

    let page = user
        .fetch_with(&Filter::new(), Some(2), Some(1))
        .await
        .unwrap();
    assert_eq!(page.len(), 2);

    let tail = user
        .fetch_with(&Filter::new(), None, Some(3))
        .await
        .unwrap();
    assert_eq!(tail.len(), 1);
}

#[tokio::test]
async fn out_of_range_limit_and_offset_saturate() {
    let dir = tempfile::tempdir().unwrap();
    let user = seeded_model(&dir).await;

    let none = user
        .fetch_with(&Filter::new(), None, Some(u64::MAX))
        .await
        .unwrap();
    assert!(none.is_empty());

    let all = user
        .fetch_with(&Filter::new(), Some(u64::MAX), None)
        .await
        .unwrap();
    assert_eq!(all.len(), 4);
}

#[tokio::test]
async fn operand_type_mismatch_is_rejected_before_io() {
    let dir = tempfile::tempdir().unwrap();
    let user = seeded_model(&dir).await;
    let err = user
        .fetch(&Filter::new().field("age", "thirty"))
        .await
        .unwrap_err();
    assert!(matches!(err, QuartError::Schema(_)));

    let err = user
        .fetch(&Filter::new().like("age", "3%"))
        .await
        .unwrap_err();
    assert!(matches!(err, QuartError::Schema(_)));
}

#[tokio::test]
async fn count_matches_fetch() {
    let dir = tempfile::tempdir().unwrap();
    let user = seeded_model(&dir).await;
    assert_eq!(user.count(&Filter::new()).await.unwrap(), 4);
    assert_eq!(
        user.count(&Filter::new().field("age", 30)).await.unwrap(),
        2
    );
}

#[test]
fn index_eligibility_is_a_hint_on_the_plan() {
    let schema = Schema::derive(
        "User",
        vec![
            ("name".to_owned(), Column::new("STRING").unwrap().indexed()),
            ("age".to_owned(), Column::new("INTEGER").unwrap()),
        ],
    )
    .unwrap();

    let indexed = LookupPlan::translate(&schema, &Filter::new().field("name", "alice")).unwrap();
    assert!(indexed.is_index_eligible());

    let unindexed = LookupPlan::translate(&schema, &Filter::new().field("age", 30)).unwrap();
    assert!(!unindexed.is_index_eligible());

    // the primary key always counts as indexed
    let by_pk = LookupPlan::translate(&schema, &Filter::new().field("id", 1)).unwrap();
    assert!(by_pk.is_index_eligible());

    let match_all = LookupPlan::translate(&schema, &Filter::new()).unwrap();
    assert!(!match_all.is_index_eligible());
}

#[tokio::test]
async fn null_equality_uses_is_null() {
    let dir = tempfile::tempdir().unwrap();
    let base = create_basemodel(dir.path().join("n.db"), DatabaseOptions::default()).unwrap();
    let note = base
        .model(
            "Note",
            vec![
                ("title", Column::new("TEXT").unwrap()),
                ("body", Column::new("TEXT").unwrap()),
            ],
        )
        .unwrap();
    note.create(vec![("title", Value::from("a")), ("body", Value::from("text"))])
        .await
        .unwrap();
    note.create(vec![("title", Value::from("b"))]).await.unwrap();

    let blank = note
        .fetch(&Filter::new().field("body", Value::Null))
        .await
        .unwrap();
    assert_eq!(blank.len(), 1);
    assert_eq!(blank[0].text("title"), Some("b"));

    let filled = note
        .fetch(&Filter::new().compare("body", Op::Ne, Value::Null))
        .await
        .unwrap();
    assert_eq!(filled.len(), 1);
    assert_eq!(filled[0].text("title"), Some("a"));
}
