use spindle_web::config::AppOptions;
use spindle_web::{get, handler_fn, Context, Router, Server};

fn hello_world(_ctx: &Context) -> &'static str {
    "hello world"
}

fn main() {
    let router = Router::builder().route("/", get(handler_fn(hello_world)));

    let mut options = AppOptions::default();
    options.server.host = "127.0.0.1".to_string();
    options.server.port = 3000;

    let server = Server::builder().options(options).router(router).build().unwrap();
    server.start().unwrap();
    server.join();
}
