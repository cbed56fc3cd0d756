use std::hint::black_box;

use criterion::{criterion_group, criterion_main, Criterion};
use quartdb::{create_basemodel, Column, DatabaseOptions, Filter, Value};

fn insert_and_fetch(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let base = create_basemodel(
        dir.path().join("bench.db"),
        DatabaseOptions {
            use_filelock: false,
            ..DatabaseOptions::default()
        },
    )
    .unwrap();
    let user = base
        .model(
            "User",
            vec![
                ("name", Column::new("STRING").unwrap().indexed()),
                ("age", Column::new("INTEGER").unwrap()),
            ],
        )
        .unwrap();

    let mut i: i64 = 0;
    c.bench_function("create", |b| {
        b.iter(|| {
            i += 1;
            rt.block_on(user.create(vec![
                ("name", Value::from(format!("user-{i}"))),
                ("age", Value::from(i % 90)),
            ]))
            .unwrap();
        })
    });

    c.bench_function("fetch by indexed field", |b| {
        b.iter(|| {
            let rows = rt
                .block_on(user.fetch(&Filter::new().field("name", "user-1")))
                .unwrap();
            black_box(rows);
        })
    });
}

criterion_group!(benches, insert_and_fetch);
criterion_main!(benches);
