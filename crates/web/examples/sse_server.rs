use futures::stream;
use spindle_web::config::AppOptions;
use spindle_web::reactive::Flux;
use spindle_web::{get, handler_fn, Context, Error, Payload, Router, Server};
use std::time::Duration;

// curl -N http://127.0.0.1:8080/sse
fn sse_process(_ctx: &Context) -> Flux<Payload> {
    let events = stream::unfold(0, |i| async move {
        if i == 5 {
            return None;
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
        Some((Ok::<_, Error>(Payload::text(format!("data: {i}\n\n"))), i + 1))
    });
    Flux::from_stream(events)
}

fn main() {
    let router = Router::builder().route("/sse", get(handler_fn(sse_process)).produces("text/event-stream"));

    let mut options = AppOptions::default();
    options.server.host = "127.0.0.1".to_string();

    let server = Server::builder().options(options).router(router).build().unwrap();
    server.start().unwrap();
    server.join();
}
