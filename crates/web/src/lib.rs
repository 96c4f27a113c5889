//! The request dispatch pipeline of spindle.
//!
//! `spindle-web` sits on top of the native contract of `spindle-http`. For every exchange it
//! builds a [`Context`], matches a route, and runs the route's pre-built [`pipeline`]: an
//! optional hop to a worker thread, an adapter for asynchronous return values, the route's
//! filters and finally the handler.
//!
//! # Features
//!
//! - Routes matched in declaration order, with path variables, content negotiation and the
//!   implicit `HEAD`, `OPTIONS` and CORS handling
//! - Handlers returning plain values, [`Deferred`](reactive::Deferred) futures, or
//!   [`Mono`](reactive::Mono) / [`Flux`](reactive::Flux) reactive sources
//! - Per-route [`ExecutionMode`](pipeline::ExecutionMode) deciding between the I/O thread and the
//!   worker pool
//! - WebSocket routes, see [`websocket`]
//!
//! # Example
//!
//! ```no_run
//! use spindle_web::pipeline::handler_fn;
//! use spindle_web::reactive::Flux;
//! use spindle_web::route::{get, Router};
//! use spindle_web::{Context, Server};
//!
//! let router = Router::builder()
//!     .route("/", get(handler_fn(|_ctx: &Context| "hello world")))
//!     .route("/count", get(handler_fn(|_ctx: &Context| Flux::iter(["1\n", "2\n", "3\n"]))));
//!
//! let server = Server::builder().router(router).build().unwrap();
//! server.start().unwrap();
//! server.join();
//! ```

pub mod config;
pub mod context;
pub mod error;
pub mod executor;
pub mod filter;
pub mod payload;
pub mod pipeline;
pub mod reactive;
pub mod route;
pub mod server;
pub mod websocket;

pub use context::Context;
pub use error::{BuildError, DefaultErrorHandler, Error, ErrorHandler};
pub use payload::{Json, Payload};
pub use pipeline::{handler_fn, ExecutionMode, Handled};
pub use route::{any, delete, get, head, options, patch, post, put, Router};
pub use server::{Server, ServerBuilder};
pub use websocket::ws;
