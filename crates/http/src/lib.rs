//! The native server contract of spindle and two small HTTP/1.1 backends.
//!
//! The dispatch pipeline above this crate never touches a socket. It sees an exchange as a pair
//! of trait objects: a [`NativeRequest`] to read from and a [`NativeResponse`] to write to, both
//! handed to an [`ExchangeHandler`] by a [`NativeServer`].
//!
//! # Backends
//!
//! - [`server::EventLoopServer`]: tokio based, the handler runs on an I/O thread and may move the
//!   response to a worker, supports WebSocket upgrades.
//! - [`server::BlockingServer`]: one thread per connection, the handler runs on a worker thread.
//! - [`mock`]: in-memory request, response and WebSocket for tests.
//!
//! # Example
//!
//! ```no_run
//! use spindle_http::{Body, EventLoopServer, NativeRequest, NativeResponse, NativeServer, ServerOptions};
//! use std::sync::Arc;
//!
//! let server = EventLoopServer::new(ServerOptions::default().with_port(8080));
//! let handler = |request: Box<dyn NativeRequest>, mut response: Box<dyn NativeResponse>| {
//!     let body = format!("hello {}", request.path());
//!     if let Err(e) = response.send(Body::from(body)) {
//!         tracing::warn!(cause = %e, "failed to send response");
//!     }
//! };
//! server.start(Arc::new(handler)).unwrap();
//! server.join();
//! ```
//!
//! # Wire format
//!
//! The [`wire`] module holds the HTTP/1.1 decoding and encoding both backends share: requests
//! are parsed with `httparse`, bodies are framed by `Content-Length` or chunked encoding and
//! buffered up to [`ServerOptions::max_request_size`](server::ServerOptions).
//!
//! # Limitations
//!
//! - HTTP/1.1 only
//! - No TLS support, [`NativeRequest::secure`] is always `false` on the bundled backends
//! - Maximum header size: 8KB
//! - Maximum number of headers: 64

mod body;
mod error;
mod handler;
mod request;
mod response;
mod upload;
mod websocket;

pub mod date;
pub mod mock;
pub mod params;
pub mod server;
pub mod thread_kind;
pub mod wire;

pub use body::Body;
pub use error::{NativeError, ParseError};
pub use handler::ExchangeHandler;
pub use request::{NativeRequest, Upgrade};
pub use response::NativeResponse;
pub use server::{BlockingServer, EventLoopServer, NativeServer, ServerOptions};
pub use thread_kind::ThreadKind;
pub use upload::{NativeUpload, TempFileUpload};
pub use websocket::{CloseStatus, NativeWebSocket, WebSocketListener};
