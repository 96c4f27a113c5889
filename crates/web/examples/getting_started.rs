use serde::{Deserialize, Serialize};
use spindle_web::config::AppOptions;
use spindle_web::reactive::Deferred;
use spindle_web::{get, handler_fn, post, Context, Error, ExecutionMode, Json, Router, Server};
use std::time::Duration;

#[derive(Deserialize, Serialize, Debug)]
pub struct User {
    name: String,
    zip: String,
}

// curl -v http://127.0.0.1:8080/users/42?fields=name
fn find_user(ctx: &Context) -> Result<String, Error> {
    let id = ctx.path_variable("id").unwrap_or_default();
    let fields = ctx.query("fields")?.unwrap_or_else(|| "all".to_string());
    Ok(format!("user {id}, fields: {fields}\r\n"))
}

// curl -v -d "name=hello&zip=world" http://127.0.0.1:8080/users
fn create_user_from_form(ctx: &Context) -> Result<Json<User>, Error> {
    let name = ctx.form("name")?.ok_or_else(|| Error::bad_request("name is required"))?;
    let zip = ctx.form("zip")?.unwrap_or_default();
    Ok(Json(User { name, zip }))
}

// curl -v -H 'Content-Type: application/json' -d '{"name":"hello","zip":"world"}' http://127.0.0.1:8080/users
fn create_user_from_json(ctx: &Context) -> Result<Json<User>, Error> {
    let user: User = serde_json::from_slice(&ctx.body_bytes()).map_err(|e| Error::bad_request(e.to_string()))?;
    Ok(Json(user))
}

// curl -v http://127.0.0.1:8080/slow
fn slow(_ctx: &Context) -> Deferred<String> {
    Deferred::new(async {
        tokio::time::sleep(Duration::from_millis(200)).await;
        Ok("finally\r\n".to_string())
    })
}

fn main() {
    let router = Router::builder()
        .route("/users/{id:\\d+}", get(handler_fn(find_user)))
        .route("/users", post(handler_fn(create_user_from_form)).consumes("application/x-www-form-urlencoded"))
        .route("/users", post(handler_fn(create_user_from_json)).consumes("application/json"))
        .route("/slow", get(handler_fn(slow)))
        .route("/ping", get(handler_fn(|_ctx: &Context| "pong\r\n")).mode(ExecutionMode::EventLoop));

    let options = AppOptions::from_json(r#"{ "server": { "host": "127.0.0.1", "port": 8080 }, "log": { "level": "debug" } }"#).unwrap();
    let server = Server::builder().options(options).router(router).build().unwrap();
    server.start().unwrap();
    server.join();
}
