//! WebSocket routes.
//!
//! ```
//! use spindle_web::route::Router;
//! use spindle_web::websocket::{ws, WebSocketMessage};
//!
//! let router = Router::builder()
//!     .route(
//!         "/echo",
//!         ws(|_ctx, configurer| {
//!             configurer.on_message(|socket, message| {
//!                 if let WebSocketMessage::Text(text) = message {
//!                     socket.send_text(text);
//!                 }
//!                 Ok(())
//!             });
//!         }),
//!     )
//!     .build()
//!     .unwrap();
//! # drop(router);
//! ```

use crate::context::Context;
use crate::error::Error;
use crate::pipeline::{handler_fn, ExecutionMode, Handled};
use crate::route::{get, RouteItemBuilder};
use bytes::Bytes;
use serde::Serialize;
use spindle_http::{CloseStatus, NativeError, NativeWebSocket, Upgrade, WebSocketListener};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Declares a `GET` route upgrading to a WebSocket.
///
/// The handler stays on the I/O thread, the upgrade must happen before anything is written.
pub fn ws<F>(initializer: F) -> RouteItemBuilder
where
    F: Fn(&Context, &mut WebSocketConfigurer) + Send + Sync + 'static,
{
    let handler = handler_fn(move |ctx: &Context| -> Result<Handled, Error> {
        ctx.upgrade_websocket(&initializer)?;
        Ok(Handled)
    });
    get(handler).mode(ExecutionMode::EventLoop).upgrade()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebSocketMessage {
    Text(String),
    Binary(Bytes),
}

impl WebSocketMessage {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Binary(_) => None,
        }
    }

    pub fn into_bytes(self) -> Bytes {
        match self {
            Self::Text(text) => Bytes::from(text),
            Self::Binary(data) => data,
        }
    }
}

/// The application's handle on an upgraded connection.
#[derive(Clone)]
pub struct WebSocket {
    native: Arc<dyn NativeWebSocket>,
    path: Arc<str>,
}

impl WebSocket {
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn send_text(&self, text: impl Into<String>) {
        self.native.send_text(text.into());
    }

    pub fn send_binary(&self, data: impl Into<Bytes>) {
        self.native.send_binary(data.into());
    }

    pub fn send_json<T: Serialize + ?Sized>(&self, value: &T) -> Result<(), Error> {
        self.native.send_text(serde_json::to_string(value)?);
        Ok(())
    }

    pub fn close(&self, status: CloseStatus) {
        self.native.close(status);
    }

    pub fn pause(&self) {
        self.native.pause();
    }

    pub fn resume(&self) {
        self.native.resume();
    }

    pub fn terminate(&self) {
        self.native.terminate();
    }

    pub fn is_open(&self) -> bool {
        self.native.is_open()
    }
}

impl fmt::Debug for WebSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebSocket").field("path", &self.path).field("open", &self.is_open()).finish()
    }
}

type ConnectCallback = Box<dyn Fn(&WebSocket) -> Result<(), Error> + Send + Sync>;
type MessageCallback = Box<dyn Fn(&WebSocket, WebSocketMessage) -> Result<(), Error> + Send + Sync>;
type CloseCallback = Box<dyn Fn(&WebSocket, &CloseStatus) -> Result<(), Error> + Send + Sync>;
type ErrorCallback = Box<dyn Fn(&WebSocket, &Error) + Send + Sync>;

/// Collects the callbacks of a connection while it upgrades.
#[derive(Default)]
pub struct WebSocketConfigurer {
    on_connect: Option<ConnectCallback>,
    on_message: Option<MessageCallback>,
    on_close: Option<CloseCallback>,
    on_error: Option<ErrorCallback>,
}

impl WebSocketConfigurer {
    pub fn on_connect<F>(&mut self, callback: F) -> &mut Self
    where
        F: Fn(&WebSocket) -> Result<(), Error> + Send + Sync + 'static,
    {
        self.on_connect = Some(Box::new(callback));
        self
    }

    pub fn on_message<F>(&mut self, callback: F) -> &mut Self
    where
        F: Fn(&WebSocket, WebSocketMessage) -> Result<(), Error> + Send + Sync + 'static,
    {
        self.on_message = Some(Box::new(callback));
        self
    }

    pub fn on_close<F>(&mut self, callback: F) -> &mut Self
    where
        F: Fn(&WebSocket, &CloseStatus) -> Result<(), Error> + Send + Sync + 'static,
    {
        self.on_close = Some(Box::new(callback));
        self
    }

    /// Called with every callback failure and with connection errors.
    pub fn on_error<F>(&mut self, callback: F) -> &mut Self
    where
        F: Fn(&WebSocket, &Error) + Send + Sync + 'static,
    {
        self.on_error = Some(Box::new(callback));
        self
    }
}

impl fmt::Debug for WebSocketConfigurer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebSocketConfigurer")
            .field("on_connect", &self.on_connect.is_some())
            .field("on_message", &self.on_message.is_some())
            .field("on_close", &self.on_close.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

impl Context {
    /// Upgrades the exchange to a WebSocket and hands the connection to `initializer`.
    ///
    /// The exchange completes without a response, the backend owns the connection afterwards.
    pub fn upgrade_websocket<F>(&self, initializer: F) -> Result<(), Error>
    where
        F: FnOnce(&Context, &mut WebSocketConfigurer),
    {
        if self.is_response_started() {
            return Err(NativeError::Committed.into());
        }
        let native: Arc<dyn NativeWebSocket> = Arc::from(self.request().upgrade(Upgrade::WebSocket)?);
        if !self.complete_without_response() {
            native.terminate();
            return Err(NativeError::Committed.into());
        }
        self.request().destroy();

        let mut configurer = WebSocketConfigurer::default();
        initializer(self, &mut configurer);
        debug!(path = self.path(), ?configurer, "websocket upgraded");

        let socket = WebSocket { native: Arc::clone(&native), path: Arc::from(self.path()) };
        let listener = Listener { socket, callbacks: configurer, close_on_error: self.websocket_options().close_on_error };
        native.set_listener(Arc::new(listener));
        Ok(())
    }
}

/// Feeds backend events to the application callbacks.
struct Listener {
    socket: WebSocket,
    callbacks: WebSocketConfigurer,
    close_on_error: bool,
}

impl Listener {
    fn outcome(&self, result: Result<(), Error>) {
        if let Err(e) = result {
            self.failed(&e);
            if self.close_on_error && self.socket.is_open() {
                let status = if e.is_bad_data() { CloseStatus::BAD_DATA } else { CloseStatus::SERVER_ERROR };
                self.socket.close(status);
            }
        }
    }

    fn failed(&self, error: &Error) {
        warn!(cause = %error, path = self.socket.path(), "websocket callback failed");
        if let Some(on_error) = &self.callbacks.on_error {
            on_error(&self.socket, error);
        }
    }

    fn message(&self, message: WebSocketMessage) {
        if let Some(on_message) = &self.callbacks.on_message {
            self.outcome(on_message(&self.socket, message));
        }
    }
}

impl WebSocketListener for Listener {
    fn on_connect(&self) {
        if let Some(on_connect) = &self.callbacks.on_connect {
            self.outcome(on_connect(&self.socket));
        }
    }

    fn on_text(&self, text: String) {
        self.message(WebSocketMessage::Text(text));
    }

    fn on_binary(&self, data: Bytes) {
        self.message(WebSocketMessage::Binary(data));
    }

    fn on_close(&self, status: CloseStatus) {
        debug!(path = self.socket.path(), %status, "websocket closed");
        if let Some(on_close) = &self.callbacks.on_close
            && let Err(e) = on_close(&self.socket, &status)
        {
            self.failed(&e);
        }
    }

    fn on_error(&self, error: NativeError) {
        self.failed(&Error::from(error));
    }
}
