//! Wires a [`Router`] to a socket backend.
//!
//! ```no_run
//! use spindle_web::config::AppOptions;
//! use spindle_web::pipeline::handler_fn;
//! use spindle_web::route::{get, Router};
//! use spindle_web::{Context, Server};
//!
//! let router = Router::builder().route("/", get(handler_fn(|_ctx: &Context| "hello world")));
//! let server = Server::builder().options(AppOptions::default()).router(router).build().unwrap();
//! server.start().unwrap();
//! server.join();
//! ```

use crate::config::{AppOptions, Backend, WebSocketOptions};
use crate::context::Context;
use crate::error::{BuildError, DefaultErrorHandler, ErrorHandler};
use crate::executor::{Executor, WorkerPool};
use crate::route::{Router, RouterBuilder};
use spindle_http::{BlockingServer, EventLoopServer, ExchangeHandler, NativeRequest, NativeResponse, NativeServer};
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

pub struct ServerBuilder {
    options: AppOptions,
    router: Option<RouterBuilder>,
    error_handler: Arc<dyn ErrorHandler>,
    worker: Option<Arc<dyn Executor>>,
    native: Option<Box<dyn NativeServer>>,
}

impl ServerBuilder {
    fn new() -> Self {
        Self {
            options: AppOptions::default(),
            router: None,
            error_handler: Arc::new(DefaultErrorHandler),
            worker: None,
            native: None,
        }
    }

    pub fn options(mut self, options: AppOptions) -> Self {
        self.options = options;
        self
    }

    /// The routes to serve.
    ///
    /// The router settings and the default execution mode of the [`AppOptions`] replace the
    /// ones of `router` only when they are set. The CORS settings add a CORS filter.
    pub fn router(mut self, router: RouterBuilder) -> Self {
        self.router = Some(router);
        self
    }

    pub fn error_handler<H: ErrorHandler>(mut self, error_handler: H) -> Self {
        self.error_handler = Arc::new(error_handler);
        self
    }

    /// Replaces the worker pool.
    pub fn worker(mut self, worker: Arc<dyn Executor>) -> Self {
        self.worker = Some(worker);
        self
    }

    /// Serves through `native` instead of the backend named in the options.
    pub fn backend<S: NativeServer + 'static>(mut self, native: S) -> Self {
        self.native = Some(Box::new(native));
        self
    }

    pub fn build(self) -> Result<Server, BuildError> {
        let options = self.options;
        let mut router = self.router.ok_or(BuildError::MissingRouter)?;
        if let Some(router_options) = options.router {
            router = router.options(router_options);
        }
        if let Some(mode) = options.execution_mode {
            router = router.execution_mode(mode);
        }
        if let Some(cors) = options.cors.clone() {
            router = router.cors(cors);
        }
        let router = router.build()?;

        let worker = match self.worker {
            Some(worker) => worker,
            None => Arc::new(WorkerPool::new(&options.worker)?),
        };
        let native = self.native.unwrap_or_else(|| match options.backend {
            Backend::EventLoop => Box::new(EventLoopServer::new(options.server.clone())),
            Backend::Blocking => Box::new(BlockingServer::new(options.server.clone())),
        });

        let dispatcher =
            Arc::new(Dispatcher { router, worker, error_handler: self.error_handler, websocket: options.websocket.clone() });
        Ok(Server { options, native, dispatcher })
    }
}

impl fmt::Debug for ServerBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerBuilder")
            .field("options", &self.options)
            .field("router", &self.router)
            .finish_non_exhaustive()
    }
}

pub struct Server {
    options: AppOptions,
    native: Box<dyn NativeServer>,
    dispatcher: Arc<Dispatcher>,
}

impl Server {
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    /// Starts serving, returns the bound address.
    pub fn start(&self) -> Result<SocketAddr, BuildError> {
        if self.options.log.enabled {
            install_subscriber(&self.options.log.level);
        }

        let handler: Arc<dyn ExchangeHandler> = Arc::clone(&self.dispatcher) as Arc<dyn ExchangeHandler>;
        let local_addr = self.native.start(handler)?;
        info!(%local_addr, backend = self.native.name(), routes = self.dispatcher.router.table().definitions().len(), "application started");
        Ok(local_addr)
    }

    /// Blocks until [`Server::stop`] is called.
    pub fn join(&self) {
        self.native.join();
    }

    pub fn stop(&self) {
        self.native.stop();
    }

    pub fn router(&self) -> &Router {
        &self.dispatcher.router
    }

    /// The entry point the backend calls, usable to serve exchanges without a socket.
    pub fn handler(&self) -> Arc<dyn ExchangeHandler> {
        Arc::clone(&self.dispatcher) as Arc<dyn ExchangeHandler>
    }
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("backend", &self.native.name())
            .field("router", &self.dispatcher.router)
            .finish_non_exhaustive()
    }
}

fn install_subscriber(level: &str) {
    let parsed = Level::from_str(level);
    let subscriber = FmtSubscriber::builder().with_max_level(*parsed.as_ref().unwrap_or(&Level::INFO)).finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        debug!("a tracing subscriber is already installed");
    }
    if let Err(e) = parsed {
        warn!(level, cause = %e, "unknown log level, using info");
    }
}

/// Builds a [`Context`] for every exchange and runs the router.
struct Dispatcher {
    router: Router,
    worker: Arc<dyn Executor>,
    error_handler: Arc<dyn ErrorHandler>,
    websocket: WebSocketOptions,
}

impl ExchangeHandler for Dispatcher {
    fn handle(&self, request: Box<dyn NativeRequest>, response: Box<dyn NativeResponse>) {
        let ctx = Context::builder(request, response)
            .worker(Arc::clone(&self.worker))
            .error_handler(Arc::clone(&self.error_handler))
            .websocket_options(self.websocket.clone())
            .build();
        self.router.handle(&ctx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CorsOptions, RouterOptions};
    use crate::error::Error;
    use crate::executor::DirectExecutor;
    use crate::payload::{Json, Payload};
    use crate::pipeline::{handler_fn, ExecutionMode};
    use crate::reactive::{Deferred, Flux};
    use crate::route::{get, post};
    use http::StatusCode;
    use serde::Serialize;
    use spindle_http::mock::{MockRequest, MockResponse};
    use spindle_http::thread_kind::ThreadKind;
    use spindle_http::ServerOptions;
    use std::io::{Read, Write};
    use std::net::TcpStream;
    use std::thread;

    #[derive(Serialize)]
    struct Greeting {
        name: String,
    }

    fn routes() -> RouterBuilder {
        Router::builder()
            .route("/hello", get(handler_fn(|_ctx: &Context| "hello")))
            .route(
                "/thread",
                get(handler_fn(|ctx: &Context| match ctx.current_thread_kind() {
                    ThreadKind::Worker => "worker",
                    ThreadKind::Io => "io",
                    ThreadKind::Other => "other",
                })),
            )
            .route(
                "/greet/{name}",
                get(handler_fn(|ctx: &Context| Json(Greeting { name: ctx.path_variable("name").unwrap_or_default() }))),
            )
            .route(
                "/later",
                get(handler_fn(|_ctx: &Context| {
                    let (promise, deferred) = Deferred::pending();
                    thread::spawn(move || promise.complete("done later"));
                    deferred
                })),
            )
            .route("/stream", get(handler_fn(|_ctx: &Context| Flux::iter(["one,", "two,", "three"]))))
            .route("/echo", post(handler_fn(|ctx: &Context| ctx.body_bytes())))
    }

    fn options(backend: Backend) -> AppOptions {
        AppOptions {
            backend,
            server: ServerOptions::default().with_host("127.0.0.1").with_port(0).with_default_headers(false),
            log: crate::config::LogOptions { enabled: false, level: "debug".to_string() },
            ..AppOptions::default()
        }
    }

    fn exchange(addr: SocketAddr, raw: &str) -> String {
        let mut stream = TcpStream::connect(addr).unwrap();
        stream.write_all(raw.as_bytes()).unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).unwrap();
        response
    }

    fn get_request(path: &str) -> String {
        format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
    }

    fn check_backend(backend: Backend) {
        let server = Server::builder().options(options(backend)).router(routes()).build().unwrap();
        let addr = server.start().unwrap();

        let response = exchange(addr, &get_request("/hello"));
        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"), "{response}");
        assert!(response.ends_with("\r\n\r\nhello"), "{response}");

        let response = exchange(addr, &get_request("/thread"));
        assert!(response.ends_with("worker"), "{response}");

        let response = exchange(addr, &get_request("/greet/ada"));
        assert!(response.contains("content-type: application/json"), "{response}");
        assert!(response.ends_with(r#"{"name":"ada"}"#), "{response}");

        let response = exchange(addr, &get_request("/later"));
        assert!(response.ends_with("done later"), "{response}");

        let response = exchange(addr, &get_request("/stream"));
        for piece in ["one,", "two,", "three"] {
            assert!(response.contains(piece), "{response}");
        }

        let response = exchange(addr, "POST /echo HTTP/1.1\r\nConnection: close\r\nContent-Length: 4\r\n\r\nping");
        assert!(response.ends_with("ping"), "{response}");

        let response = exchange(addr, &get_request("/missing"));
        assert!(response.starts_with("HTTP/1.1 404 Not Found\r\n"), "{response}");

        let response = exchange(addr, "DELETE /hello HTTP/1.1\r\nConnection: close\r\n\r\n");
        assert!(response.starts_with("HTTP/1.1 405 Method Not Allowed\r\n"), "{response}");
        assert!(response.contains("allow: GET"), "{response}");

        server.stop();
    }

    #[test]
    fn test_event_loop_backend() {
        check_backend(Backend::EventLoop);
    }

    #[test]
    fn test_blocking_backend() {
        check_backend(Backend::Blocking);
    }

    #[test]
    fn test_missing_router() {
        assert!(matches!(Server::builder().build(), Err(BuildError::MissingRouter)));
    }

    #[test]
    fn test_options_apply_to_the_router() {
        let mut options = options(Backend::EventLoop);
        options.execution_mode = Some(ExecutionMode::EventLoop);
        options.router = Some(RouterOptions { ignore_trailing_slash: true, ..RouterOptions::default() });
        options.cors = Some(CorsOptions::default());

        let server = Server::builder()
            .options(options)
            .worker(Arc::new(DirectExecutor))
            .error_handler(|_ctx: &Context, error: &Error| Payload::text(format!("oops: {}", error.status_code().as_u16())))
            .router(routes())
            .build()
            .unwrap();

        let response = MockResponse::new();
        let request = MockRequest::get("/hello/").header("Origin", "https://a.example");
        server.handler().handle(Box::new(request), Box::new(response.clone()));
        assert_eq!(response.body_string(), "hello");
        assert_eq!(response.header_value("access-control-allow-origin").as_deref(), Some("*"));

        let response = MockResponse::new();
        server.handler().handle(Box::new(MockRequest::get("/nope")), Box::new(response.clone()));
        assert_eq!(response.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(response.body_string(), "oops: 404");

        let links = server.router().table().definitions()[0].pipeline().links().collect::<Vec<_>>();
        assert_eq!(links, vec!["pass-through", "convert", "handler"]);
    }

    #[test]
    fn test_router_settings_survive_default_options() {
        let router = Router::builder()
            .options(RouterOptions { ignore_case: true, ignore_trailing_slash: true })
            .execution_mode(ExecutionMode::EventLoop)
            .route("/users", get(handler_fn(|_ctx: &Context| "users")));

        let server = Server::builder()
            .options(AppOptions::default())
            .worker(Arc::new(DirectExecutor))
            .router(router)
            .build()
            .unwrap();

        let links = server.router().table().definitions()[0].pipeline().links().collect::<Vec<_>>();
        assert_eq!(links, vec!["pass-through", "convert", "handler"]);

        let response = MockResponse::new();
        server.handler().handle(Box::new(MockRequest::get("/Users/")), Box::new(response.clone()));
        assert_eq!(response.status_code(), StatusCode::OK);
        assert_eq!(response.body_string(), "users");
    }
}
