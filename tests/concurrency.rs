use std::sync::Arc;

use quartdb::{create_basemodel, Column, DatabaseOptions, Filter, QuartError, Value};

fn user_fields() -> Vec<(&'static str, Column)> {
    vec![
        ("name", Column::new("STRING").unwrap().indexed()),
        ("n", Column::new("INTEGER").unwrap()),
    ]
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_creates_lose_no_updates() {
    const WRITERS: usize = 16;
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("t.db");

    {
        let base = create_basemodel(&path, DatabaseOptions::default()).unwrap();
        let user = Arc::new(base.model("User", user_fields()).unwrap());

        let mut tasks = Vec::with_capacity(WRITERS);
        for i in 0..WRITERS {
            let user = Arc::clone(&user);
            tasks.push(tokio::spawn(async move {
                user.create(vec![
                    ("name", Value::from(format!("writer-{i}"))),
                    ("n", Value::from(i as i64)),
                ])
                .await
                .unwrap();
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
    }

    // reopen the file through a fresh base and verify the final row count
    let base = create_basemodel(&path, DatabaseOptions::default()).unwrap();
    let user = base.model("User", user_fields()).unwrap();
    assert_eq!(user.count(&Filter::new()).await.unwrap(), WRITERS as u64);
}

#[tokio::test]
async fn save_writes_dirty_fields_only() {
    let dir = tempfile::tempdir().unwrap();
    let base = create_basemodel(dir.path().join("t.db"), DatabaseOptions::default()).unwrap();
    let user = base.model("User", user_fields()).unwrap();

    let mut record = user
        .create(vec![("name", Value::from("before")), ("n", Value::from(1))])
        .await
        .unwrap();
    assert!(!record.is_dirty());

    record.set("name", "after");
    assert!(record.is_dirty());
    user.save(&mut record).await.unwrap();
    assert!(!record.is_dirty());

    let fetched = user.fetch(&Filter::new()).await.unwrap();
    assert_eq!(fetched.len(), 1);
    assert_eq!(fetched[0].text("name"), Some("after"));
    assert_eq!(fetched[0].integer("n"), Some(1));

    // a clean record saves as a no-op
    user.save(&mut record).await.unwrap();
}

#[tokio::test]
async fn save_inserts_a_new_record() {
    let dir = tempfile::tempdir().unwrap();
    let base = create_basemodel(dir.path().join("t.db"), DatabaseOptions::default()).unwrap();
    let user = base.model("User", user_fields()).unwrap();

    let mut record = user.new_record();
    record.set("name", "fresh");
    record.set("n", 7);
    assert!(record.id().is_none());
    user.save(&mut record).await.unwrap();
    assert!(record.id().is_some());

    let fetched = user
        .fetch(&Filter::new().field("name", "fresh"))
        .await
        .unwrap();
    assert_eq!(fetched.len(), 1);
    assert_eq!(fetched[0].integer("n"), Some(7));
}

#[tokio::test]
async fn delete_invalidates_the_record() {
    let dir = tempfile::tempdir().unwrap();
    let base = create_basemodel(dir.path().join("t.db"), DatabaseOptions::default()).unwrap();
    let user = base.model("User", user_fields()).unwrap();

    let mut record = user
        .create(vec![("name", Value::from("gone")), ("n", Value::from(0))])
        .await
        .unwrap();
    user.delete(&mut record).await.unwrap();
    assert!(!record.is_alive());
    assert_eq!(user.count(&Filter::new()).await.unwrap(), 0);

    record.set("name", "zombie");
    let err = user.save(&mut record).await.unwrap_err();
    assert!(matches!(err, QuartError::Constraint { .. }));
    let err = user.delete(&mut record).await.unwrap_err();
    assert!(matches!(err, QuartError::Constraint { .. }));
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_reads_and_writes_interleave_safely() {
    let dir = tempfile::tempdir().unwrap();
    let base = create_basemodel(dir.path().join("t.db"), DatabaseOptions::default()).unwrap();
    let user = Arc::new(base.model("User", user_fields()).unwrap());
    user.create(vec![("name", Value::from("seed")), ("n", Value::from(0))])
        .await
        .unwrap();

    let mut tasks = Vec::new();
    for i in 1..=8 {
        let writer = Arc::clone(&user);
        tasks.push(tokio::spawn(async move {
            writer
                .create(vec![
                    ("name", Value::from(format!("w{i}"))),
                    ("n", Value::from(i)),
                ])
                .await
                .unwrap();
        }));
        let reader = Arc::clone(&user);
        tasks.push(tokio::spawn(async move {
            // every read observes a consistent snapshot, at least the seed row
            let rows = reader.fetch(&Filter::new()).await.unwrap();
            assert!(!rows.is_empty());
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }
    assert_eq!(user.count(&Filter::new()).await.unwrap(), 9);
}
