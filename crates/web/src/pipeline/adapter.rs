//! Bridges asynchronous values to the context.
//!
//! Each adapter calls exactly one of [`Context::send`] / [`Context::end_stream`] or
//! [`Context::send_error`] when its value resolves. A failure of the chain before the value exists
//! is sent right away, and the adapter hands back an already failed value of its own shape.

use crate::context::Context;
use crate::error::Error;
use crate::payload::Payload;
use crate::pipeline::{Handler, Value};
use crate::reactive::{Deferred, Flux, Mono, MonoObserver, Subscriber, Subscription};
use tracing::debug;

pub struct DeferredAdapter {
    next: Box<dyn Handler>,
}

impl DeferredAdapter {
    pub fn new(next: Box<dyn Handler>) -> Self {
        Self { next }
    }
}

impl Handler for DeferredAdapter {
    fn apply(&self, ctx: &Context) -> Result<Value, Error> {
        match self.next.apply(ctx) {
            Ok(Value::Deferred(deferred)) => {
                let ctx = ctx.clone();
                ctx.worker().spawn(Box::pin(async move {
                    match deferred.await {
                        Ok(payload) => ctx.send(payload),
                        Err(e) => ctx.send_error(e),
                    }
                }));
                Ok(Value::Handled)
            }
            Ok(other) => Ok(other),
            Err(e) => {
                ctx.send_error(e.clone());
                Ok(Value::Deferred(Deferred::failed(e)))
            }
        }
    }

    fn name(&self) -> &'static str {
        "deferred"
    }

    fn next(&self) -> Option<&dyn Handler> {
        Some(self.next.as_ref())
    }
}

pub struct MonoAdapter {
    next: Box<dyn Handler>,
}

impl MonoAdapter {
    pub fn new(next: Box<dyn Handler>) -> Self {
        Self { next }
    }
}

impl Handler for MonoAdapter {
    fn apply(&self, ctx: &Context) -> Result<Value, Error> {
        match self.next.apply(ctx) {
            Ok(Value::Mono(mono)) => {
                mono.subscribe(Box::new(ContextObserver { ctx: ctx.clone() }));
                Ok(Value::Handled)
            }
            Ok(other) => Ok(other),
            Err(e) => {
                ctx.send_error(e.clone());
                Ok(Value::Mono(Mono::error(e)))
            }
        }
    }

    fn name(&self) -> &'static str {
        "mono"
    }

    fn next(&self) -> Option<&dyn Handler> {
        Some(self.next.as_ref())
    }
}

struct ContextObserver {
    ctx: Context,
}

impl MonoObserver<Payload> for ContextObserver {
    fn on_success(self: Box<Self>, value: Payload) {
        self.ctx.send(value);
    }

    fn on_error(self: Box<Self>, error: Error) {
        self.ctx.send_error(error);
    }
}

/// Streams every item of a [`Flux`] as a chunk of the response.
pub struct FluxAdapter {
    next: Box<dyn Handler>,
}

impl FluxAdapter {
    pub fn new(next: Box<dyn Handler>) -> Self {
        Self { next }
    }
}

impl Handler for FluxAdapter {
    fn apply(&self, ctx: &Context) -> Result<Value, Error> {
        match self.next.apply(ctx) {
            Ok(Value::Flux(flux)) => {
                flux.subscribe(Box::new(ContextSubscriber { ctx: ctx.clone(), subscription: None }));
                Ok(Value::Handled)
            }
            Ok(other) => Ok(other),
            Err(e) => {
                ctx.send_error(e.clone());
                Ok(Value::Flux(Flux::error(e)))
            }
        }
    }

    fn name(&self) -> &'static str {
        "flux"
    }

    fn next(&self) -> Option<&dyn Handler> {
        Some(self.next.as_ref())
    }
}

struct ContextSubscriber {
    ctx: Context,
    subscription: Option<Subscription>,
}

impl ContextSubscriber {
    fn cancelled(&self) -> bool {
        self.subscription.as_ref().is_some_and(Subscription::is_cancelled)
    }

    fn cancel(&self) {
        if let Some(subscription) = &self.subscription {
            subscription.cancel();
        }
    }
}

impl Subscriber<Payload> for ContextSubscriber {
    fn on_subscribe(&mut self, subscription: &Subscription) {
        self.subscription = Some(subscription.clone());
        if !self.ctx.supports_streaming() {
            self.cancel();
            self.ctx.send_error(Error::StreamingUnsupported);
        }
    }

    fn on_next(&mut self, item: Payload) {
        if self.cancelled() {
            return;
        }
        if let Err(e) = self.ctx.send_chunk(item) {
            debug!(cause = %e, path = self.ctx.path(), "stream write failed, cancelling");
            self.cancel();
            self.ctx.fail(e);
        }
    }

    fn on_error(self: Box<Self>, error: Error) {
        if !self.cancelled() {
            self.ctx.send_error(error);
        }
    }

    fn on_complete(self: Box<Self>) {
        if !self.cancelled() {
            self.ctx.end_stream();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::DirectExecutor;
    use crate::pipeline::{handler_fn, Convert, RouteHandler, Shape};
    use crate::reactive::{FluxSink, MonoSink};
    use crate::testing::context_with;
    use http::StatusCode;
    use spindle_http::mock::{MockRequest, MockResponse};
    use std::sync::{Arc, Mutex};
    use std::thread;
    use std::time::Duration;

    fn converted(shape: Shape, handler: impl RouteHandler) -> Box<dyn Handler> {
        Box::new(Convert::new(shape, handler.return_type(), Box::new(handler)))
    }

    fn context(response: &MockResponse) -> Context {
        context_with(MockRequest::get("/"), response.clone(), Arc::new(DirectExecutor))
    }

    #[test]
    fn test_deferred_success() {
        let response = MockResponse::new();
        let adapter = DeferredAdapter::new(converted(
            Shape::Deferred,
            handler_fn(|_ctx: &Context| {
                let (promise, deferred) = Deferred::pending();
                thread::spawn(move || promise.complete("resolved"));
                deferred
            }),
        ));

        assert!(matches!(adapter.apply(&context(&response)), Ok(Value::Handled)));
        assert!(response.await_completion(Duration::from_secs(5)));
        assert_eq!(response.body_string(), "resolved");
        assert_eq!(response.send_count(), 1);
    }

    #[test]
    fn test_deferred_sync_failure() {
        let response = MockResponse::new();
        let adapter = DeferredAdapter::new(converted(
            Shape::Deferred,
            handler_fn(|_ctx: &Context| -> Result<Deferred<String>, Error> { Err(Error::bad_request("early")) }),
        ));

        let value = adapter.apply(&context(&response));
        assert!(matches!(value, Ok(Value::Deferred(_))));
        assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(response.send_count(), 1);
    }

    #[test]
    fn test_mono_value_then_dropped_sink_sends_once() {
        let response = MockResponse::new();
        let adapter = MonoAdapter::new(converted(
            Shape::Mono,
            handler_fn(|_ctx: &Context| Mono::create(|sink: MonoSink<String>| sink.success("first".into()))),
        ));

        adapter.apply(&context(&response)).unwrap();
        assert_eq!(response.body_string(), "first");
        assert_eq!(response.send_count(), 1);
        assert_eq!(response.status_code(), StatusCode::OK);
    }

    #[test]
    fn test_mono_error() {
        let response = MockResponse::new();
        let adapter = MonoAdapter::new(converted(
            Shape::Mono,
            handler_fn(|_ctx: &Context| Mono::<String>::error(Error::status(StatusCode::CONFLICT, "taken"))),
        ));

        adapter.apply(&context(&response)).unwrap();
        assert_eq!(response.status_code(), StatusCode::CONFLICT);
    }

    #[test]
    fn test_flux_streams_each_item() {
        let response = MockResponse::new();
        let adapter = FluxAdapter::new(converted(Shape::Flux, handler_fn(|_ctx: &Context| Flux::iter(["a", "b", "c"]))));

        adapter.apply(&context(&response)).unwrap();
        assert!(response.is_complete());
        assert_eq!(response.chunks().len(), 3);
        assert_eq!(response.body_string(), "abc");
        assert_eq!(response.send_count(), 0);
    }

    #[test]
    fn test_empty_flux_is_an_empty_response() {
        let response = MockResponse::new();
        let adapter = FluxAdapter::new(converted(Shape::Flux, handler_fn(|_ctx: &Context| Flux::<String>::empty())));

        adapter.apply(&context(&response)).unwrap();
        assert!(response.is_complete());
        assert_eq!(response.status_code(), StatusCode::OK);
        assert_eq!(response.header_value("content-length").as_deref(), Some("0"));
    }

    #[test]
    fn test_flux_requires_streaming() {
        let response = MockResponse::without_streaming();
        let produced = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&produced);
        let adapter = FluxAdapter::new(converted(
            Shape::Flux,
            handler_fn(move |_ctx: &Context| {
                let counter = Arc::clone(&counter);
                Flux::create(move |mut sink: FluxSink<String>| {
                    while sink.next("x".into()) {
                        *counter.lock().unwrap() += 1;
                    }
                    sink.complete();
                })
            }),
        ));

        adapter.apply(&context(&response)).unwrap();
        assert_eq!(response.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(response.chunks().is_empty());
        assert_eq!(*produced.lock().unwrap(), 0);
    }

    #[test]
    fn test_flux_error_after_items_aborts() {
        let response = MockResponse::new();
        let adapter = FluxAdapter::new(converted(
            Shape::Flux,
            handler_fn(|_ctx: &Context| {
                Flux::create(|mut sink: FluxSink<String>| {
                    sink.next("partial".into());
                    sink.error(Error::handler("source failed"));
                })
            }),
        ));

        let ctx = context(&response);
        adapter.apply(&ctx).unwrap();
        assert_eq!(response.body_string(), "partial");
        assert_eq!(response.status_code(), StatusCode::OK);
        assert!(!response.is_complete());
        assert!(ctx.is_completed());
    }
}
