use spindle_web::config::AppOptions;
use spindle_web::websocket::WebSocketMessage;
use spindle_web::{ws, Router, Server};
use tracing::info;

// websocat ws://127.0.0.1:8080/echo
fn main() {
    let router = Router::builder().route(
        "/echo",
        ws(|ctx, configurer| {
            let path = ctx.path().to_string();
            configurer
                .on_connect(move |_socket| {
                    info!(path, "client connected");
                    Ok(())
                })
                .on_message(|socket, message| {
                    match message {
                        WebSocketMessage::Text(text) => socket.send_text(text),
                        WebSocketMessage::Binary(data) => socket.send_binary(data),
                    }
                    Ok(())
                })
                .on_close(|_socket, status| {
                    info!(%status, "client left");
                    Ok(())
                });
        }),
    );

    let options = AppOptions::from_json(r#"{ "server": { "host": "127.0.0.1" }, "websocket": { "close_on_error": true } }"#).unwrap();
    let server = Server::builder().options(options).router(router).build().unwrap();
    server.start().unwrap();
    server.join();
}
