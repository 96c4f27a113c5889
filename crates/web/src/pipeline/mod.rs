//! Per-route handler pipelines.
//!
//! A route's pipeline is composed once, when the router is built, from the route's declared
//! [`ReturnType`] and the [`ExecutionMode`]:
//!
//! ```text
//! [dispatch] -> detach -> adapter  -> convert -> filters.. -> handler
//! [dispatch] -> pass-through       -> convert -> filters.. -> handler
//! ```
//!
//! The adapter is the first entry of the [`AdapterRegistry`] the return type is assignable to.
//! Routes returning a value available right away get the pass-through link instead.

mod adapter;
mod dispatch;
mod registry;
mod return_type;

pub use adapter::{DeferredAdapter, FluxAdapter, MonoAdapter};
pub use dispatch::{Convert, Detach, DispatchToWorker, FilterLink, PassThrough};
pub use registry::{AdapterFactory, AdapterRegistry, AdapterRegistryBuilder};
pub use return_type::{Reply, ReturnType, Shape};

use crate::context::Context;
use crate::error::{BuildError, Error};
use crate::filter::Filter;
use crate::payload::Payload;
use crate::reactive::{Deferred, Flux, Mono};
use serde::Deserialize;
use std::any::Any;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// A link of a pipeline.
pub trait Handler: Send + Sync + 'static {
    fn apply(&self, ctx: &Context) -> Result<Value, Error>;

    fn name(&self) -> &'static str {
        "handler"
    }

    /// The handler this link wraps.
    fn next(&self) -> Option<&dyn Handler> {
        None
    }
}

/// What a link hands back to the one wrapping it.
pub enum Value {
    /// The handler's own return value, before conversion.
    Raw(Box<dyn Any + Send>),
    Plain(Payload),
    Deferred(Deferred<Payload>),
    Mono(Mono<Payload>),
    Flux(Flux<Payload>),
    /// The response is taken care of, nothing to send.
    Handled,
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Raw(_) => f.write_str("Raw"),
            Self::Plain(payload) => f.debug_tuple("Plain").field(payload).finish(),
            Self::Deferred(_) => f.write_str("Deferred"),
            Self::Mono(_) => f.write_str("Mono"),
            Self::Flux(_) => f.write_str("Flux"),
            Self::Handled => f.write_str("Handled"),
        }
    }
}

/// Returned by handlers and filters that answered on their own.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Handled;

/// A handler whose return type is known when the route is declared.
pub trait RouteHandler: Handler {
    fn return_type(&self) -> ReturnType;
}

/// A closure turned into a route handler.
pub struct FnHandler<F, R> {
    f: F,
    _reply: PhantomData<fn() -> R>,
}

pub fn handler_fn<F, R>(f: F) -> FnHandler<F, R>
where
    F: Fn(&Context) -> R + Send + Sync + 'static,
    R: Reply,
{
    FnHandler { f, _reply: PhantomData }
}

impl<F, R> Handler for FnHandler<F, R>
where
    F: Fn(&Context) -> R + Send + Sync + 'static,
    R: Reply,
{
    fn apply(&self, ctx: &Context) -> Result<Value, Error> {
        Ok(Value::Raw(Box::new((self.f)(ctx))))
    }
}

impl<F, R> RouteHandler for FnHandler<F, R>
where
    F: Fn(&Context) -> R + Send + Sync + 'static,
    R: Reply,
{
    fn return_type(&self) -> ReturnType {
        ReturnType::of::<R>()
    }
}

impl<F, R> fmt::Debug for FnHandler<F, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnHandler").field("returns", &std::any::type_name::<R>()).finish()
    }
}

/// Where route handlers run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Synchronous handlers move to a worker, asynchronous ones stay on the I/O thread.
    #[default]
    Default,
    /// Every handler stays on the thread the request arrived on.
    EventLoop,
    /// Every handler moves to a worker.
    Worker,
}

/// A composed chain of links, built once per route.
pub struct Pipeline {
    head: Box<dyn Handler>,
}

impl Pipeline {
    pub fn apply(&self, ctx: &Context) -> Result<Value, Error> {
        self.head.apply(ctx)
    }

    /// The names of the links, outermost first.
    pub fn links(&self) -> Links<'_> {
        Links { current: Some(self.head.as_ref()) }
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.links()).finish()
    }
}

#[derive(Clone)]
pub struct Links<'a> {
    current: Option<&'a dyn Handler>,
}

impl<'a> Iterator for Links<'a> {
    type Item = &'static str;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.current?;
        self.current = current.next();
        Some(current.name())
    }
}

impl fmt::Debug for Links<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.clone()).finish()
    }
}

/// Composes route pipelines.
#[derive(Debug)]
pub struct PipelineBuilder<'a> {
    registry: &'a AdapterRegistry,
    mode: ExecutionMode,
}

impl<'a> PipelineBuilder<'a> {
    pub fn new(registry: &'a AdapterRegistry, mode: ExecutionMode) -> Self {
        Self { registry, mode }
    }

    pub fn build(
        &self,
        return_type: ReturnType,
        filters: &[Arc<dyn Filter>],
        handler: Box<dyn Handler>,
    ) -> Result<Pipeline, BuildError> {
        let mut chain = handler;
        for filter in filters.iter().rev() {
            chain = Box::new(FilterLink::new(Arc::clone(filter), chain));
        }

        let asynchronous = match self.registry.select(&return_type) {
            Some((shape, factory)) => {
                chain = Box::new(Convert::new(shape, return_type, chain));
                chain = Box::new(Detach::new(factory(chain)));
                true
            }
            None if return_type.is_assignable_to(Shape::Plain) => {
                chain = Box::new(PassThrough::new(Convert::new(Shape::Plain, return_type, chain)));
                false
            }
            None => return Err(BuildError::UnsupportedReturnType { return_type: return_type.name() }),
        };

        let dispatch = match self.mode {
            ExecutionMode::Worker => true,
            ExecutionMode::Default => !asynchronous,
            ExecutionMode::EventLoop => false,
        };
        if dispatch {
            chain = Box::new(DispatchToWorker::new(Arc::from(chain)));
        }

        Ok(Pipeline { head: chain })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::exchange_with;
    use spindle_http::mock::{MockRequest, MockResponse};
    use std::time::Duration;

    fn build(registry: &AdapterRegistry, mode: ExecutionMode, handler: impl RouteHandler) -> Pipeline {
        PipelineBuilder::new(registry, mode).build(handler.return_type(), &[], Box::new(handler)).unwrap()
    }

    fn links(pipeline: &Pipeline) -> Vec<&'static str> {
        pipeline.links().collect()
    }

    #[test]
    fn test_sync_route_links() {
        let registry = AdapterRegistry::default();
        let handler = || handler_fn(|_ctx: &Context| "plain");

        assert_eq!(
            links(&build(&registry, ExecutionMode::Default, handler())),
            vec!["dispatch", "pass-through", "convert", "handler"]
        );
        assert_eq!(links(&build(&registry, ExecutionMode::EventLoop, handler())), vec!["pass-through", "convert", "handler"]);
    }

    #[test]
    fn test_async_routes_are_detached() {
        let registry = AdapterRegistry::default();

        let deferred = build(&registry, ExecutionMode::Default, handler_fn(|_ctx: &Context| Deferred::ready("d")));
        assert_eq!(links(&deferred), vec!["detach", "deferred", "convert", "handler"]);

        let flux = build(&registry, ExecutionMode::Worker, handler_fn(|_ctx: &Context| Flux::just("f")));
        assert_eq!(links(&flux), vec!["dispatch", "detach", "flux", "convert", "handler"]);
    }

    #[test]
    fn test_registration_order_decides_overlapping_shapes() {
        let mono = || handler_fn(|_ctx: &Context| Mono::just("m"));

        let default_order = AdapterRegistry::default();
        assert_eq!(links(&build(&default_order, ExecutionMode::EventLoop, mono()))[1], "mono");

        let flux_first = AdapterRegistry::builder().register_flux().register_mono().build();
        assert_eq!(links(&build(&flux_first, ExecutionMode::EventLoop, mono()))[1], "flux");
    }

    #[test]
    fn test_flux_first_registry_streams_a_mono() {
        let registry = AdapterRegistry::builder().register_flux().register_mono().build();
        let pipeline = build(&registry, ExecutionMode::EventLoop, handler_fn(|_ctx: &Context| Mono::just("only")));

        let response = MockResponse::new();
        exchange_with(MockRequest::get("/"), response.clone(), |ctx| {
            pipeline.apply(ctx).unwrap();
        });

        assert!(response.await_completion(Duration::from_secs(5)));
        assert_eq!(response.chunks().len(), 1);
        assert_eq!(response.body_string(), "only");
    }

    #[test]
    fn test_unsupported_return_type() {
        let registry = AdapterRegistry::builder().build();
        let handler = handler_fn(|_ctx: &Context| Flux::just("f"));
        let result = PipelineBuilder::new(&registry, ExecutionMode::Default).build(handler.return_type(), &[], Box::new(handler));
        assert!(matches!(result, Err(BuildError::UnsupportedReturnType { .. })));
    }

    #[test]
    fn test_filters_wrap_the_handler() {
        let registry = AdapterRegistry::default();
        let filter: Arc<dyn Filter> = Arc::new(|ctx: &Context, next: &dyn Handler| next.apply(ctx));
        let handler = handler_fn(|_ctx: &Context| "x");
        let pipeline =
            PipelineBuilder::new(&registry, ExecutionMode::EventLoop).build(handler.return_type(), &[filter], Box::new(handler)).unwrap();
        assert_eq!(links(&pipeline), vec!["pass-through", "convert", "filter", "handler"]);
    }
}
