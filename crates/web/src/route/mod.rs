//! Route declarations and matching.
//!
//! Routes are matched in declaration order and the first one accepting the method, the path and
//! the negotiated media types wins, whatever its specificity:
//!
//! ```
//! use spindle_web::pipeline::handler_fn;
//! use spindle_web::route::{get, post, Router};
//! use spindle_web::Context;
//!
//! let router = Router::builder()
//!     .route("/users/{id:\\d+}", get(handler_fn(|ctx: &Context| ctx.path_variable("id").unwrap_or_default())))
//!     .route("/users", post(handler_fn(|ctx: &Context| ctx.body_bytes())).consumes("application/json"))
//!     .build()
//!     .unwrap();
//! assert_eq!(router.table().definitions().len(), 2);
//! ```

pub mod media;
mod pattern;

pub use pattern::PathPattern;

use crate::config::{CorsOptions, RouterOptions};
use crate::context::Context;
use crate::error::{BuildError, Error};
use crate::filter::{CorsFilter, Filter, HeadFilter, OptionsFilter};
use crate::pipeline::{
    AdapterRegistry, ExecutionMode, FilterLink, Handler, Pipeline, PipelineBuilder, ReturnType, RouteHandler, Value,
};
use http::header::{ACCEPT, CONTENT_TYPE};
use http::{HeaderMap, Method};
use mime::Mime;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, info};

/// An immutable route, created when the router is built.
pub struct RouteDefinition {
    /// `None` accepts every method.
    method: Option<Method>,
    path: PathPattern,
    consumes: Vec<Mime>,
    produces: Vec<Mime>,
    return_type: ReturnType,
    pipeline: Pipeline,
    upgrade: bool,
}

impl RouteDefinition {
    pub fn method(&self) -> Option<&Method> {
        self.method.as_ref()
    }

    pub fn pattern(&self) -> &str {
        self.path.as_str()
    }

    pub fn has_glob(&self) -> bool {
        self.path.has_glob()
    }

    /// Whether the route switches protocols, such routes never answer a synthesized `HEAD`.
    pub fn is_upgrade(&self) -> bool {
        self.upgrade
    }

    pub fn consumes(&self) -> &[Mime] {
        &self.consumes
    }

    pub fn produces(&self) -> &[Mime] {
        &self.produces
    }

    pub fn return_type(&self) -> &ReturnType {
        &self.return_type
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    fn accepts_method(&self, method: &Method) -> bool {
        self.method.as_ref().is_none_or(|own| own == method)
    }
}

impl fmt::Debug for RouteDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteDefinition")
            .field("method", &self.method)
            .field("pattern", &self.path.as_str())
            .field("consumes", &self.consumes)
            .field("produces", &self.produces)
            .field("return_type", &self.return_type.name())
            .field("pipeline", &self.pipeline)
            .field("upgrade", &self.upgrade)
            .finish()
    }
}

/// A definition matched against a request.
#[derive(Debug, Clone)]
pub struct Route {
    definition: Arc<RouteDefinition>,
    variables: Vec<(String, String)>,
    produces: Option<Mime>,
}

impl Route {
    pub fn definition(&self) -> &Arc<RouteDefinition> {
        &self.definition
    }

    pub fn pattern(&self) -> &str {
        self.definition.pattern()
    }

    pub fn variable(&self, name: &str) -> Option<&str> {
        self.variables.iter().find(|(n, _)| n == name).map(|(_, value)| value.as_str())
    }

    pub fn variables(&self) -> &[(String, String)] {
        &self.variables
    }

    /// The produced type picked from the `Accept` header.
    pub fn produces(&self) -> Option<&Mime> {
        self.produces.as_ref()
    }
}

/// Every route of a router, in declaration order.
#[derive(Debug, Default)]
pub struct RouteTable {
    definitions: Vec<Arc<RouteDefinition>>,
}

impl RouteTable {
    pub fn definitions(&self) -> &[Arc<RouteDefinition>] {
        &self.definitions
    }

    /// The first route matching the request.
    ///
    /// When routes matched the method and the path but all of them refused the media types, the
    /// refusal of the first one is returned.
    pub fn find(&self, method: &Method, path: &str, headers: &HeaderMap) -> Result<Option<Route>, Error> {
        self.find_where(method, path, headers, |_definition| true)
    }

    /// Like [`RouteTable::find`], among the definitions accepted by `filter`.
    pub fn find_where<F>(&self, method: &Method, path: &str, headers: &HeaderMap, filter: F) -> Result<Option<Route>, Error>
    where
        F: Fn(&RouteDefinition) -> bool,
    {
        let content_type = headers.get(CONTENT_TYPE).and_then(|value| value.to_str().ok());
        let accept = headers.get(ACCEPT).and_then(|value| value.to_str().ok());
        let mut refusal = None;

        for definition in &self.definitions {
            if !definition.accepts_method(method) || !filter(definition) {
                continue;
            }
            let Some(variables) = definition.path.matches(path) else {
                continue;
            };

            if !media::consumes(&definition.consumes, content_type) {
                refusal.get_or_insert_with(|| Error::UnsupportedMediaType(content_type.unwrap_or_default().to_string()));
                continue;
            }
            let produces = if definition.produces.is_empty() {
                None
            } else {
                let Some(produces) = media::negotiate(&definition.produces, accept) else {
                    refusal.get_or_insert_with(|| Error::NotAcceptable(accept.unwrap_or_default().to_string()));
                    continue;
                };
                Some(produces)
            };

            return Ok(Some(Route { definition: Arc::clone(definition), variables, produces }));
        }

        refusal.map_or(Ok(None), Err)
    }

    /// Methods of the routes matching `path`, in declaration order, without duplicates.
    ///
    /// Routes accepting any method are left out.
    pub fn allowed_methods(&self, path: &str, exclude: &[Method]) -> Vec<Method> {
        let mut methods: Vec<Method> = Vec::new();
        for definition in &self.definitions {
            let Some(method) = &definition.method else {
                continue;
            };
            if exclude.contains(method) || methods.contains(method) {
                continue;
            }
            if definition.path.matches(path).is_some() {
                methods.push(method.clone());
            }
        }
        methods
    }
}

/// Matches the request and runs the route's pipeline, or the fallback chain when nothing matched.
struct RouteStep {
    table: Arc<RouteTable>,
    fallback: Box<dyn Handler>,
}

impl Handler for RouteStep {
    fn apply(&self, ctx: &Context) -> Result<Value, Error> {
        let route = self.table.find(ctx.method(), ctx.path(), ctx.request().header_map())?;
        match route {
            Some(route) => {
                let definition = Arc::clone(route.definition());
                ctx.set_route(route);
                definition.pipeline().apply(ctx)
            }
            None => self.fallback.apply(ctx),
        }
    }

    fn name(&self) -> &'static str {
        "route"
    }

    fn next(&self) -> Option<&dyn Handler> {
        Some(self.fallback.as_ref())
    }
}

/// The end of the fallback chain.
struct Unmatched {
    table: Arc<RouteTable>,
}

impl Handler for Unmatched {
    fn apply(&self, ctx: &Context) -> Result<Value, Error> {
        let allow = self.table.allowed_methods(ctx.path(), &[]);
        if allow.is_empty() {
            Err(Error::NotFound { path: ctx.path().to_string() })
        } else {
            Err(Error::MethodNotAllowed { method: ctx.method().clone(), allow })
        }
    }

    fn name(&self) -> &'static str {
        "unmatched"
    }
}

pub struct Router {
    table: Arc<RouteTable>,
    head: Box<dyn Handler>,
}

impl Router {
    pub fn builder() -> RouterBuilder {
        RouterBuilder::new()
    }

    pub fn table(&self) -> &RouteTable {
        &self.table
    }

    /// Runs the request through the global filters and the matched route.
    pub fn dispatch(&self, ctx: &Context) -> Result<Value, Error> {
        self.head.apply(ctx)
    }

    /// Dispatches and turns a failure, or a panic, into an error response.
    pub fn handle(&self, ctx: &Context) {
        match panic::catch_unwind(AssertUnwindSafe(|| self.dispatch(ctx))) {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => ctx.fail(e),
            Err(payload) => ctx.fail(Error::from_panic(payload)),
        }
    }
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Router").field("routes", &self.table.definitions.len()).finish_non_exhaustive()
    }
}

pub struct RouterBuilder {
    routes: Vec<(String, RouteItemBuilder)>,
    filters: Vec<Arc<dyn Filter>>,
    options: RouterOptions,
    mode: ExecutionMode,
    registry: AdapterRegistry,
    cors: Option<CorsOptions>,
}

impl RouterBuilder {
    fn new() -> Self {
        Self {
            routes: Vec::new(),
            filters: Vec::new(),
            options: RouterOptions::default(),
            mode: ExecutionMode::default(),
            registry: AdapterRegistry::default(),
            cors: None,
        }
    }

    pub fn route(mut self, pattern: impl Into<String>, item_builder: RouteItemBuilder) -> Self {
        self.routes.push((pattern.into(), item_builder));
        self
    }

    /// Adds a filter running before every route and before the fallback chain.
    pub fn filter<F: Filter>(mut self, filter: F) -> Self {
        self.filters.push(Arc::new(filter));
        self
    }

    pub fn options(mut self, options: RouterOptions) -> Self {
        self.options = options;
        self
    }

    /// The execution mode of routes that don't pick their own.
    pub fn execution_mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn registry(mut self, registry: AdapterRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Installs the CORS filter ahead of every other filter.
    pub fn cors(mut self, options: CorsOptions) -> Self {
        self.cors = Some(options);
        self
    }

    pub fn build(self) -> Result<Router, BuildError> {
        let mut definitions = Vec::with_capacity(self.routes.len());
        for (pattern, item) in self.routes {
            let path = PathPattern::compile(&pattern, self.options)?;
            let consumes = parse_media("consumes", &item.consumes)?;
            let produces = parse_media("produces", &item.produces)?;
            let mode = item.mode.unwrap_or(self.mode);
            let pipeline = PipelineBuilder::new(&self.registry, mode).build(item.return_type.clone(), &item.filters, item.handler)?;

            debug!(method = ?item.method, pattern, ?mode, links = ?pipeline, "route ready");
            definitions.push(Arc::new(RouteDefinition {
                method: item.method,
                path,
                consumes,
                produces,
                return_type: item.return_type,
                pipeline,
                upgrade: item.upgrade,
            }));
        }
        info!(routes = definitions.len(), "router built");

        let table = Arc::new(RouteTable { definitions });
        let unmatched = Box::new(Unmatched { table: Arc::clone(&table) });
        let options = Box::new(FilterLink::new(Arc::new(OptionsFilter::new(Arc::clone(&table))), unmatched));
        let fallback = Box::new(FilterLink::new(Arc::new(HeadFilter::new(Arc::clone(&table))), options));

        let mut head: Box<dyn Handler> = Box::new(RouteStep { table: Arc::clone(&table), fallback });
        for filter in self.filters.iter().rev() {
            head = Box::new(FilterLink::new(Arc::clone(filter), head));
        }
        if let Some(cors) = self.cors {
            head = Box::new(FilterLink::new(Arc::new(CorsFilter::new(cors)?), head));
        }

        Ok(Router { table, head })
    }
}

impl fmt::Debug for RouterBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouterBuilder")
            .field("routes", &self.routes.iter().map(|(pattern, _)| pattern).collect::<Vec<_>>())
            .field("options", &self.options)
            .field("mode", &self.mode)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

fn parse_media(name: &'static str, media_types: &[String]) -> Result<Vec<Mime>, BuildError> {
    media_types
        .iter()
        .map(|media_type| {
            media_type.parse::<Mime>().map_err(|e| BuildError::InvalidOption { name, reason: format!("{media_type}: {e}") })
        })
        .collect()
}

macro_rules! method_route {
    ($($name:ident => $method:ident),* $(,)?) => {
        $(
            pub fn $name<H: RouteHandler>(handler: H) -> RouteItemBuilder {
                RouteItemBuilder::new(Some(Method::$method), handler)
            }
        )*
    };
}

method_route!(
    get => GET,
    post => POST,
    put => PUT,
    delete => DELETE,
    patch => PATCH,
    head => HEAD,
    options => OPTIONS,
);

/// A route accepting every method. It is left out of `Allow` lists.
pub fn any<H: RouteHandler>(handler: H) -> RouteItemBuilder {
    RouteItemBuilder::new(None, handler)
}

pub struct RouteItemBuilder {
    method: Option<Method>,
    handler: Box<dyn Handler>,
    return_type: ReturnType,
    consumes: Vec<String>,
    produces: Vec<String>,
    filters: Vec<Arc<dyn Filter>>,
    mode: Option<ExecutionMode>,
    upgrade: bool,
}

impl RouteItemBuilder {
    fn new<H: RouteHandler>(method: Option<Method>, handler: H) -> Self {
        Self {
            method,
            return_type: handler.return_type(),
            handler: Box::new(handler),
            consumes: Vec::new(),
            produces: Vec::new(),
            filters: Vec::new(),
            mode: None,
            upgrade: false,
        }
    }

    /// Accepts request bodies of `media_type`, may be repeated.
    pub fn consumes(mut self, media_type: &str) -> Self {
        self.consumes.push(media_type.to_string());
        self
    }

    /// Produces `media_type`, may be repeated; the order is the preference when the client
    /// accepts several.
    pub fn produces(mut self, media_type: &str) -> Self {
        self.produces.push(media_type.to_string());
        self
    }

    /// Adds a filter around this route's handler, filters run in the order they are added.
    pub fn with<F: Filter>(mut self, filter: F) -> Self {
        self.filters.push(Arc::new(filter));
        self
    }

    pub fn mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = Some(mode);
        self
    }

    pub(crate) fn upgrade(mut self) -> Self {
        self.upgrade = true;
        self
    }
}

impl fmt::Debug for RouteItemBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteItemBuilder")
            .field("method", &self.method)
            .field("return_type", &self.return_type.name())
            .field("consumes", &self.consumes)
            .field("produces", &self.produces)
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{handler_fn, Handled};
    use crate::reactive::Flux;
    use crate::testing::exchange_with;
    use http::StatusCode;
    use spindle_http::mock::{MockRequest, MockResponse};
    use spindle_http::NativeUpload;
    use std::path::PathBuf;
    use std::sync::Mutex;

    fn text(body: &'static str) -> impl RouteHandler {
        handler_fn(move |_ctx: &Context| body)
    }

    fn serve(router: &Router, request: MockRequest) -> MockResponse {
        let response = MockResponse::new();
        exchange_with(request, response.clone(), |ctx| router.handle(ctx));
        response
    }

    fn router() -> Router {
        Router::builder()
            .route("/", get(text("get /")))
            .route("/", post(text("post /")))
            .route("/users/{id}", get(handler_fn(|ctx: &Context| format!("user {}", ctx.path_variable("id").unwrap_or_default()))))
            .route("/users/{id}", delete(text("deleted")))
            .route("/users/:id", get(text("shadowed")))
            .route("/static/*path", get(handler_fn(|ctx: &Context| ctx.path_variable("path").unwrap_or_default())))
            .route("/items", options(text("custom options")))
            .build()
            .unwrap()
    }

    #[test]
    fn test_first_match_wins() {
        let router = router();
        assert_eq!(serve(&router, MockRequest::get("/users/42")).body_string(), "user 42");
        assert_eq!(serve(&router, MockRequest::post("/")).body_string(), "post /");
        assert_eq!(serve(&router, MockRequest::get("/static/css/site.css")).body_string(), "css/site.css");
    }

    #[test]
    fn test_not_found_and_method_not_allowed() {
        let router = router();

        let response = serve(&router, MockRequest::get("/missing"));
        assert_eq!(response.status_code(), StatusCode::NOT_FOUND);

        let response = serve(&router, MockRequest::new(Method::PUT, "/users/7"));
        assert_eq!(response.status_code(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(response.header_value("allow").as_deref(), Some("GET, DELETE"));
    }

    #[test]
    fn test_head_mirrors_get() {
        let router = router();
        let response = serve(&router, MockRequest::new(Method::HEAD, "/users/42"));

        assert_eq!(response.status_code(), StatusCode::OK);
        assert!(response.body().is_empty());
        assert_eq!(response.header_value("content-length").as_deref(), Some("0"));
        assert_eq!(response.header_value("content-type").as_deref(), Some("text/plain; charset=utf-8"));
    }

    #[test]
    fn test_head_skips_glob_routes() {
        let router = router();
        let response = serve(&router, MockRequest::new(Method::HEAD, "/static/app.js"));
        assert_eq!(response.status_code(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(response.header_value("allow").as_deref(), Some("GET"));
    }

    #[test]
    fn test_options_lists_methods_without_running_handlers() {
        let calls = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&calls);
        let router = Router::builder()
            .route(
                "/a",
                get(handler_fn(move |_ctx: &Context| {
                    *counter.lock().unwrap() += 1;
                    "a"
                })),
            )
            .route("/a", post(text("a")))
            .route("/a", get(text("again")))
            .route("/b", any(text("any")))
            .build()
            .unwrap();

        let response = serve(&router, MockRequest::new(Method::OPTIONS, "/a"));
        assert_eq!(response.status_code(), StatusCode::OK);
        assert_eq!(response.header_value("allow").as_deref(), Some("GET, POST"));
        assert_eq!(response.header_value("content-length").as_deref(), Some("0"));
        assert_eq!(*calls.lock().unwrap(), 0);

        assert!(router.table().allowed_methods("/b", &[]).is_empty());
        assert_eq!(serve(&router, MockRequest::new(Method::OPTIONS, "/b")).body_string(), "any");
    }

    #[test]
    fn test_explicit_options_route_wins() {
        let router = router();
        assert_eq!(serve(&router, MockRequest::new(Method::OPTIONS, "/items")).body_string(), "custom options");
        assert_eq!(serve(&router, MockRequest::new(Method::OPTIONS, "/nothing")).status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_content_negotiation() {
        let router = Router::builder()
            .route("/doc", post(text("json in")).consumes("application/json"))
            .route("/doc", post(text("xml in")).consumes("application/xml"))
            .route("/doc", get(text("{}")).produces("application/json").produces("text/html"))
            .build()
            .unwrap();

        let request = MockRequest::post("/doc").header("Content-Type", "application/xml");
        assert_eq!(serve(&router, request).body_string(), "xml in");

        let request = MockRequest::post("/doc").header("Content-Type", "text/plain");
        assert_eq!(serve(&router, request).status_code(), StatusCode::UNSUPPORTED_MEDIA_TYPE);

        let request = MockRequest::get("/doc").header("Accept", "text/html;q=0.9, application/json;q=0.5");
        assert_eq!(serve(&router, request).header_value("content-type").as_deref(), Some("text/html"));

        let request = MockRequest::get("/doc").header("Accept", "image/png");
        assert_eq!(serve(&router, request).status_code(), StatusCode::NOT_ACCEPTABLE);
    }

    #[test]
    fn test_router_options() {
        let options = RouterOptions { ignore_case: true, ignore_trailing_slash: true };
        let router = Router::builder().options(options).route("/Users", get(text("users"))).build().unwrap();
        assert_eq!(serve(&router, MockRequest::get("/users/")).body_string(), "users");

        let strict = Router::builder().route("/Users", get(text("users"))).build().unwrap();
        assert_eq!(serve(&strict, MockRequest::get("/users/")).status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_build_errors() {
        let result = Router::builder().route("no-slash", get(text("x"))).build();
        assert!(matches!(result, Err(BuildError::InvalidPattern { .. })));

        let result = Router::builder().route("/", get(text("x")).produces("not a type")).build();
        assert!(matches!(result, Err(BuildError::InvalidOption { name: "produces", .. })));

        let empty = AdapterRegistry::builder().build();
        let result = Router::builder().registry(empty).route("/", get(handler_fn(|_ctx: &Context| Flux::just("x")))).build();
        assert!(matches!(result, Err(BuildError::UnsupportedReturnType { .. })));
    }

    #[test]
    fn test_global_and_route_filters_order() {
        let trail = Arc::new(Mutex::new(Vec::new()));
        let record = |label: &'static str| {
            let trail = Arc::clone(&trail);
            move |ctx: &Context, next: &dyn Handler| {
                trail.lock().unwrap().push(label);
                next.apply(ctx)
            }
        };

        let router = Router::builder()
            .filter(record("global"))
            .route("/", get(text("ok")).with(record("first")).with(record("second")))
            .build()
            .unwrap();

        assert_eq!(serve(&router, MockRequest::get("/")).body_string(), "ok");
        serve(&router, MockRequest::get("/missing"));
        assert_eq!(*trail.lock().unwrap(), vec!["global", "first", "second", "global"]);
    }

    #[test]
    fn test_cors_preflight_through_router() {
        let router = Router::builder().cors(CorsOptions::default()).route("/api", post(text("created"))).build().unwrap();

        let preflight = MockRequest::new(Method::OPTIONS, "/api")
            .header("Origin", "https://a.example")
            .header("Access-Control-Request-Method", "POST");
        let response = serve(&router, preflight);
        assert_eq!(response.status_code(), StatusCode::OK);
        assert_eq!(response.header_value("access-control-allow-methods").as_deref(), Some("GET, POST"));
        assert!(response.header_value("allow").is_none());

        let simple = MockRequest::post("/api").header("Origin", "https://a.example");
        let response = serve(&router, simple);
        assert_eq!(response.body_string(), "created");
        assert_eq!(response.header_value("access-control-allow-origin").as_deref(), Some("*"));
    }

    #[test]
    fn test_panicking_handler_answers_500() {
        let router = Router::builder()
            .execution_mode(ExecutionMode::EventLoop)
            .route("/", get(handler_fn(|_ctx: &Context| -> Handled { panic!("broken handler") })))
            .build()
            .unwrap();
        assert_eq!(serve(&router, MockRequest::get("/")).status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_uploads_are_released_after_send() {
        let seen = Arc::new(Mutex::new(None::<PathBuf>));
        let slot = Arc::clone(&seen);
        let router = Router::builder()
            .route(
                "/upload",
                post(handler_fn(move |ctx: &Context| -> Result<String, Error> {
                    let files = ctx.files("doc")?;
                    let file = files.first().ok_or_else(|| Error::bad_request("doc is required"))?;
                    *slot.lock().unwrap() = Some(file.path().to_path_buf());
                    Ok(format!("{} bytes", file.size()))
                })),
            )
            .build()
            .unwrap();

        let body = "--XyZ\r\n\
Content-Disposition: form-data; name=\"doc\"; filename=\"a.txt\"\r\n\
Content-Type: text/plain\r\n\r\n\
file content\r\n\
--XyZ--\r\n";
        let request =
            MockRequest::post("/upload").header("Content-Type", "multipart/form-data; boundary=XyZ").body(body);

        let response = serve(&router, request);
        assert_eq!(response.body_string(), "12 bytes");
        let path = seen.lock().unwrap().clone().unwrap();
        assert!(!path.exists());
    }
}
