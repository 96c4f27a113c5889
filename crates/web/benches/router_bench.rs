use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use http::{HeaderMap, HeaderValue, Method};
use spindle_web::route::{delete, get, post, Router};
use spindle_web::{handler_fn, Context};
use std::hint::black_box;

fn router() -> Router {
    let mut builder = Router::builder();
    for resource in ["users", "orders", "items", "carts", "invoices", "reports", "tags", "teams"] {
        builder = builder
            .route(format!("/api/v1/{resource}"), get(handler_fn(|_ctx: &Context| "list")))
            .route(format!("/api/v1/{resource}"), post(handler_fn(|_ctx: &Context| "create")).consumes("application/json"))
            .route(format!("/api/v1/{resource}/{{id:\\d+}}"), get(handler_fn(|_ctx: &Context| "one")).produces("application/json"))
            .route(format!("/api/v1/{resource}/{{id}}"), delete(handler_fn(|_ctx: &Context| "gone")));
    }
    builder.route("/static/*path", get(handler_fn(|_ctx: &Context| "file"))).build().expect("routes should be valid")
}

fn benchmark_route_table(criterion: &mut Criterion) {
    let router = router();
    let table = router.table();

    let mut json = HeaderMap::new();
    json.insert(http::header::ACCEPT, HeaderValue::from_static("application/json"));

    let cases = [
        ("first_route", Method::GET, "/api/v1/users"),
        ("last_variable", Method::GET, "/api/v1/teams/42"),
        ("glob", Method::GET, "/static/css/site.css"),
        ("miss", Method::GET, "/nothing/here"),
    ];

    let mut group = criterion.benchmark_group("route_table");
    for (name, method, path) in cases {
        group.bench_with_input(BenchmarkId::new("find", name), path, |b, path| {
            b.iter(|| black_box(table.find(&method, path, &json).expect("media types should match")));
        });
    }
    group.bench_function("allowed_methods", |b| {
        b.iter(|| black_box(table.allowed_methods("/api/v1/orders/7", &[Method::OPTIONS])));
    });
    group.finish();
}

criterion_group!(router_benches, benchmark_route_table);
criterion_main!(router_benches);
