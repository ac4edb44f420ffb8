use criterion::{criterion_group, criterion_main, Criterion};
use sqlmapper::config::Configuration;
use sqlmapper::dynamic::SqlNode;
use sqlmapper::param_value::Value;
use sqlmapper::sql_source::SqlSource;
use std::hint::black_box;

fn search_tree() -> SqlNode {
    SqlNode::mixed([
        SqlNode::text("SELECT id, name, email FROM users "),
        SqlNode::where_(SqlNode::mixed([
            SqlNode::if_("status != null", SqlNode::text("AND status = #{status} ")).unwrap(),
            SqlNode::if_("since != null", SqlNode::text("AND created_at >= #{since} ")).unwrap(),
            SqlNode::if_(
                "ids != null",
                SqlNode::mixed([
                    SqlNode::text(" AND id IN "),
                    SqlNode::foreach("ids", "id", None, "(", ")", ",", SqlNode::text("#{id}"))
                        .unwrap(),
                ]),
            )
            .unwrap(),
        ])),
        SqlNode::text(" ORDER BY created_at DESC"),
    ])
}

fn parameter(id_count: i64) -> Value {
    let mut object = indexmap::IndexMap::new();
    object.insert("status".to_string(), Value::Str("active".into()));
    object.insert(
        "ids".to_string(),
        Value::Array((0..id_count).map(Value::Int).collect()),
    );
    Value::Object(object)
}

fn bench_dynamic_render(c: &mut Criterion) {
    let config = Configuration::new();
    let source = SqlSource::dynamic(search_tree());

    c.bench_function("render_small_in_list", |b| {
        let parameter = parameter(3);
        b.iter(|| {
            black_box(
                source
                    .bound_sql(black_box(&config), black_box(&parameter))
                    .unwrap(),
            )
        });
    });

    c.bench_function("render_large_in_list", |b| {
        let parameter = parameter(200);
        b.iter(|| {
            black_box(
                source
                    .bound_sql(black_box(&config), black_box(&parameter))
                    .unwrap(),
            )
        });
    });
}

fn bench_raw_compile(c: &mut Criterion) {
    let config = Configuration::new();
    c.bench_function("compile_raw_cached", |b| {
        b.iter(|| {
            black_box(
                config
                    .compile_raw(black_box(
                        "SELECT id, name FROM users WHERE id = #{id} AND status = #{status}",
                    ))
                    .unwrap(),
            )
        });
    });
}

criterion_group!(benches, bench_dynamic_render, bench_raw_compile);
criterion_main!(benches);
