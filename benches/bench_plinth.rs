#![allow(
    clippy::tests_outside_test_module,
    clippy::unwrap_used,
    clippy::indexing_slicing,
    reason = "benchmark"
)]

use std::hint::black_box;

use criterion::{Criterion, criterion_group, criterion_main};
use plinth::{Context, Environment, Value};

mod utils;

fn plinth_benchmark(c: &mut Criterion) {
    let env = Environment::new();
    env.add_template("profile", include_str!("template_plinth.html"))
        .unwrap();
    let template = env.get_template("profile").unwrap();

    let contexts: Vec<Context> = utils::generate_random_contexts(100)
        .iter()
        .map(create_plinth_context)
        .collect();

    utils::print_binary_size();

    let mut group = c.benchmark_group("Template Rendering");
    group.sample_size(50);

    group.bench_function("plinth_render", |b| {
        b.iter(|| {
            for context in &contexts {
                black_box(template.render(context).unwrap());
            }
        });
    });

    // Includes the cache lookup, which every `Environment::render` pays.
    group.bench_function("plinth_render_by_name", |b| {
        b.iter(|| {
            for context in &contexts {
                black_box(env.render("profile", context).unwrap());
            }
        });
    });

    group.finish();
}

fn create_plinth_context(json: &serde_json::Value) -> Context {
    let user = &json["user"];
    let user: Value = [
        ("name", Value::from(user["name"].as_str().unwrap())),
        ("age", Value::from(user["age"].as_i64().unwrap())),
        ("active", Value::from(user["active"].as_bool().unwrap())),
    ]
    .into_iter()
    .collect();

    let items: Vec<Value> = json["items"]
        .as_array()
        .unwrap()
        .iter()
        .map(|item| {
            [
                ("name", Value::from(item["name"].as_str().unwrap())),
                ("value", Value::from(item["value"].as_i64().unwrap())),
                ("special", Value::from(item["special"].as_bool().unwrap())),
            ]
            .into_iter()
            .collect()
        })
        .collect();

    let mut context = Context::new();
    context
        .insert("user", user)
        .insert("items", items)
        .insert("show_details", json["show_details"].as_bool().unwrap())
        .insert("has_access", json["has_access"].as_bool().unwrap());
    context
}

criterion_group!(benches, plinth_benchmark);
criterion_main!(benches);
