use crate::context::Context;
use crate::error::Error;
use crate::filter::Filter;
use crate::pipeline::{Handler, ReturnType, Shape, Value};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// Converts the handler's return value into the canonical value of the selected shape.
pub struct Convert {
    shape: Shape,
    return_type: ReturnType,
    next: Box<dyn Handler>,
}

impl Convert {
    pub fn new(shape: Shape, return_type: ReturnType, next: Box<dyn Handler>) -> Self {
        Self { shape, return_type, next }
    }
}

impl Handler for Convert {
    fn apply(&self, ctx: &Context) -> Result<Value, Error> {
        match self.next.apply(ctx)? {
            Value::Raw(raw) => self.return_type.convert(raw, self.shape),
            other => Ok(other),
        }
    }

    fn name(&self) -> &'static str {
        "convert"
    }

    fn next(&self) -> Option<&dyn Handler> {
        Some(self.next.as_ref())
    }
}

/// Runs a filter around the rest of the chain.
pub struct FilterLink {
    filter: Arc<dyn Filter>,
    next: Box<dyn Handler>,
}

impl FilterLink {
    pub fn new(filter: Arc<dyn Filter>, next: Box<dyn Handler>) -> Self {
        Self { filter, next }
    }
}

impl Handler for FilterLink {
    fn apply(&self, ctx: &Context) -> Result<Value, Error> {
        self.filter.apply(ctx, self.next.as_ref())
    }

    fn name(&self) -> &'static str {
        "filter"
    }

    fn next(&self) -> Option<&dyn Handler> {
        Some(self.next.as_ref())
    }
}

/// Sends a plain value on the calling thread, unless the handler already started the response.
pub struct PassThrough {
    next: Convert,
}

impl PassThrough {
    pub fn new(next: Convert) -> Self {
        Self { next }
    }
}

impl Handler for PassThrough {
    fn apply(&self, ctx: &Context) -> Result<Value, Error> {
        match self.next.apply(ctx) {
            Ok(Value::Plain(payload)) => {
                if !ctx.is_response_started() {
                    ctx.send(payload);
                }
            }
            Ok(_) => {}
            Err(e) => ctx.fail(e),
        }
        Ok(Value::Handled)
    }

    fn name(&self) -> &'static str {
        "pass-through"
    }

    fn next(&self) -> Option<&dyn Handler> {
        Some(&self.next)
    }
}

/// Releases the I/O thread while an asynchronous value is pending.
pub struct Detach {
    next: Box<dyn Handler>,
}

impl Detach {
    pub fn new(next: Box<dyn Handler>) -> Self {
        Self { next }
    }
}

impl Handler for Detach {
    fn apply(&self, ctx: &Context) -> Result<Value, Error> {
        ctx.detach(|| self.next.apply(ctx))
    }

    fn name(&self) -> &'static str {
        "detach"
    }

    fn next(&self) -> Option<&dyn Handler> {
        Some(self.next.as_ref())
    }
}

/// Moves the rest of the chain from an I/O thread to the worker executor.
///
/// On any other thread the chain runs inline.
pub struct DispatchToWorker {
    next: Arc<dyn Handler>,
}

impl DispatchToWorker {
    pub fn new(next: Arc<dyn Handler>) -> Self {
        Self { next }
    }
}

impl Handler for DispatchToWorker {
    fn apply(&self, ctx: &Context) -> Result<Value, Error> {
        if !ctx.is_in_io_thread() {
            return self.next.apply(ctx);
        }

        let next = Arc::clone(&self.next);
        let task_ctx = ctx.clone();
        ctx.dispatch(ctx.worker().as_ref(), move || {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| next.apply(&task_ctx)));
            match outcome {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => task_ctx.fail(e),
                Err(payload) => task_ctx.fail(Error::from_panic(payload)),
            }
        });
        Ok(Value::Handled)
    }

    fn name(&self) -> &'static str {
        "dispatch"
    }

    fn next(&self) -> Option<&dyn Handler> {
        Some(self.next.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{Executor, MockExecutor};
    use crate::pipeline::{handler_fn, RouteHandler};
    use crate::testing::context_with;
    use spindle_http::mock::{MockRequest, MockResponse};
    use spindle_http::thread_kind::{mark_current_thread, ThreadKind};
    use std::sync::atomic::{AtomicBool, Ordering};

    fn pass_through(handler: impl RouteHandler) -> PassThrough {
        PassThrough::new(Convert::new(Shape::Plain, handler.return_type(), Box::new(handler)))
    }

    #[test]
    fn test_pass_through_sends_once() {
        let response = MockResponse::new();
        let ctx = context_with(MockRequest::get("/"), response.clone(), Arc::new(crate::executor::DirectExecutor));

        pass_through(handler_fn(|_ctx: &Context| "hello")).apply(&ctx).unwrap();

        assert_eq!(response.body_string(), "hello");
        assert_eq!(response.send_count(), 1);
    }

    #[test]
    fn test_pass_through_skips_started_response() {
        let response = MockResponse::new();
        let ctx = context_with(MockRequest::get("/"), response.clone(), Arc::new(crate::executor::DirectExecutor));

        let handler = handler_fn(|ctx: &Context| {
            ctx.send("manual");
            "ignored"
        });
        pass_through(handler).apply(&ctx).unwrap();

        assert_eq!(response.body_string(), "manual");
        assert_eq!(response.send_count(), 1);
    }

    #[test]
    fn test_pass_through_turns_errors_into_responses() {
        let response = MockResponse::new();
        let ctx = context_with(MockRequest::get("/"), response.clone(), Arc::new(crate::executor::DirectExecutor));

        let handler = handler_fn(|_ctx: &Context| -> Result<String, Error> { Err(Error::bad_request("missing id")) });
        pass_through(handler).apply(&ctx).unwrap();

        assert_eq!(response.status_code(), http::StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_dispatch_only_from_io_thread() {
        let mut executor = MockExecutor::new();
        executor.expect_execute().times(1).returning(|task| task());
        let executor: Arc<dyn Executor> = Arc::new(executor);

        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        let inner = pass_through(handler_fn(move |_ctx: &Context| {
            flag.store(true, Ordering::Release);
            "worker"
        }));
        let dispatch = DispatchToWorker::new(Arc::new(inner));

        // not an I/O thread: runs inline, the executor is never used
        let response = MockResponse::new();
        let ctx = context_with(MockRequest::get("/"), response.clone(), Arc::clone(&executor));
        dispatch.apply(&ctx).unwrap();
        assert!(ran.load(Ordering::Acquire));
        assert!(!response.async_started());

        mark_current_thread(ThreadKind::Io);
        let response = MockResponse::new();
        let ctx = context_with(MockRequest::get("/"), response.clone(), executor);
        let value = dispatch.apply(&ctx);
        mark_current_thread(ThreadKind::Other);

        assert!(matches!(value, Ok(Value::Handled)));
        assert!(response.async_started());
        assert_eq!(response.body_string(), "worker");
    }

    #[test]
    fn test_dispatch_recovers_panics() {
        let executor: Arc<dyn Executor> = Arc::new(crate::executor::DirectExecutor);
        let inner = handler_fn(|_ctx: &Context| -> &'static str { panic!("worker blew up") });
        let dispatch = DispatchToWorker::new(Arc::new(inner));

        mark_current_thread(ThreadKind::Io);
        let response = MockResponse::new();
        let ctx = context_with(MockRequest::get("/"), response.clone(), executor);
        let value = dispatch.apply(&ctx);
        mark_current_thread(ThreadKind::Other);

        assert!(value.is_ok());
        assert_eq!(response.status_code(), http::StatusCode::INTERNAL_SERVER_ERROR);
    }
}
