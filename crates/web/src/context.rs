//! The per-request facade handed to filters and handlers.
//!
//! A [`Context`] is a cheap handle, clones share the same exchange so a worker thread or a
//! reactive callback can finish the request. The exchange reaches exactly one terminal outcome:
//! a [`send`](Context::send), a [`send_error`](Context::send_error), or the
//! [`end_stream`](Context::end_stream) of a streamed response.

use crate::config::WebSocketOptions;
use crate::error::{DefaultErrorHandler, Error, ErrorHandler};
use crate::executor::{DirectExecutor, Executor};
use crate::payload::Payload;
use crate::route::Route;
use bytes::Bytes;
use http::header::{ALLOW, CONTENT_LENGTH, CONTENT_TYPE};
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use spindle_http::params::FormData;
use spindle_http::thread_kind::{current_thread_kind, ThreadKind};
use spindle_http::{Body, NativeError, NativeRequest, NativeResponse, NativeUpload};
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, error, warn};

const OPEN: u8 = 0;
const STREAMING: u8 = 1;
const COMPLETED: u8 = 2;

struct Inner {
    request: Box<dyn NativeRequest>,
    response: Mutex<Option<Box<dyn NativeResponse>>>,
    state: AtomicU8,
    route: Mutex<Option<Route>>,
    worker: Arc<dyn Executor>,
    error_handler: Arc<dyn ErrorHandler>,
    websocket: WebSocketOptions,
}

#[derive(Clone)]
pub struct Context {
    inner: Arc<Inner>,
}

pub struct ContextBuilder {
    request: Box<dyn NativeRequest>,
    response: Box<dyn NativeResponse>,
    worker: Arc<dyn Executor>,
    error_handler: Arc<dyn ErrorHandler>,
    websocket: WebSocketOptions,
}

impl ContextBuilder {
    pub fn worker(mut self, worker: Arc<dyn Executor>) -> Self {
        self.worker = worker;
        self
    }

    pub fn error_handler(mut self, error_handler: Arc<dyn ErrorHandler>) -> Self {
        self.error_handler = error_handler;
        self
    }

    pub fn websocket_options(mut self, options: WebSocketOptions) -> Self {
        self.websocket = options;
        self
    }

    pub fn build(self) -> Context {
        Context {
            inner: Arc::new(Inner {
                request: self.request,
                response: Mutex::new(Some(self.response)),
                state: AtomicU8::new(OPEN),
                route: Mutex::new(None),
                worker: self.worker,
                error_handler: self.error_handler,
                websocket: self.websocket,
            }),
        }
    }
}

impl fmt::Debug for ContextBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextBuilder").field("method", self.request.method()).field("path", &self.request.path()).finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Context {
    /// Starts a context with a [`DirectExecutor`] worker and the [`DefaultErrorHandler`].
    pub fn builder(request: Box<dyn NativeRequest>, response: Box<dyn NativeResponse>) -> ContextBuilder {
        ContextBuilder {
            request,
            response,
            worker: Arc::new(DirectExecutor),
            error_handler: Arc::new(DefaultErrorHandler),
            websocket: WebSocketOptions::default(),
        }
    }

    // request

    pub fn request(&self) -> &dyn NativeRequest {
        self.inner.request.as_ref()
    }

    pub fn method(&self) -> &Method {
        self.inner.request.method()
    }

    pub fn path(&self) -> &str {
        self.inner.request.path()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.inner.request.header(name).and_then(|value| value.to_str().ok())
    }

    /// The first value of a query string parameter.
    pub fn query(&self, name: &str) -> Result<Option<String>, Error> {
        let query = FormData::parse(self.inner.request.query_string(), &HeaderMap::new(), &[])?;
        Ok(query.values(name).into_iter().next())
    }

    /// The first value of a query, form or multipart parameter.
    pub fn form(&self, name: &str) -> Result<Option<String>, Error> {
        Ok(self.inner.request.params(name)?.into_iter().next())
    }

    pub fn files(&self, name: &str) -> Result<Vec<Arc<dyn NativeUpload>>, Error> {
        Ok(self.inner.request.files(name)?)
    }

    pub fn body_bytes(&self) -> Bytes {
        self.inner.request.body_bytes()
    }

    pub fn cookie(&self, name: &str) -> Option<String> {
        self.inner.request.cookies().remove(name)
    }

    /// A decoded path variable of the matched route.
    pub fn path_variable(&self, name: &str) -> Option<String> {
        lock(&self.inner.route).as_ref().and_then(|route| route.variable(name).map(str::to_string))
    }

    pub fn route(&self) -> Option<Route> {
        lock(&self.inner.route).clone()
    }

    pub fn set_route(&self, route: Route) {
        *lock(&self.inner.route) = Some(route);
    }

    // threads

    pub fn worker(&self) -> Arc<dyn Executor> {
        Arc::clone(&self.inner.worker)
    }

    pub fn current_thread_kind(&self) -> ThreadKind {
        current_thread_kind()
    }

    pub fn is_in_io_thread(&self) -> bool {
        current_thread_kind() == ThreadKind::Io
    }

    /// Tells the backend the exchange outlives the current call, then runs `task` right away.
    pub fn detach<R>(&self, task: impl FnOnce() -> R) -> R {
        self.start_async();
        task()
    }

    /// Tells the backend the exchange outlives the current call, then hands `task` to `executor`.
    pub fn dispatch(&self, executor: &dyn Executor, task: impl FnOnce() + Send + 'static) {
        self.start_async();
        executor.execute(Box::new(task));
    }

    fn start_async(&self) {
        if let Some(response) = lock(&self.inner.response).as_mut() {
            response.start_async();
        }
    }

    // response

    pub fn is_response_started(&self) -> bool {
        self.state() != OPEN
    }

    pub fn is_completed(&self) -> bool {
        self.state() == COMPLETED
    }

    pub fn supports_streaming(&self) -> bool {
        lock(&self.inner.response).as_ref().is_some_and(|response| response.supports_streaming())
    }

    pub fn set_status(&self, status: StatusCode) {
        if let Some(response) = lock(&self.inner.response).as_mut() {
            response.set_status(status);
        }
    }

    pub fn response_status(&self) -> Option<StatusCode> {
        lock(&self.inner.response).as_ref().map(|response| response.status())
    }

    pub fn set_response_header(&self, name: HeaderName, value: HeaderValue) -> Result<(), Error> {
        match lock(&self.inner.response).as_mut() {
            Some(response) => Ok(response.set_header(name, value)?),
            None => Err(NativeError::Closed.into()),
        }
    }

    pub fn response_header(&self, name: &HeaderName) -> Option<HeaderValue> {
        lock(&self.inner.response).as_ref().and_then(|response| response.header(name).cloned())
    }

    pub fn set_content_type(&self, content_type: &str) -> Result<(), Error> {
        let value = HeaderValue::from_str(content_type).map_err(Error::handler)?;
        self.set_response_header(CONTENT_TYPE, value)
    }

    pub fn set_response_length(&self, length: u64) -> Result<(), Error> {
        self.set_response_header(CONTENT_LENGTH, HeaderValue::from(length))
    }

    /// Completes the exchange with `payload`.
    ///
    /// The body is dropped for `HEAD` requests. The content type falls back to the route's
    /// negotiated media type, then to the payload's own.
    pub fn send(&self, payload: impl Into<Payload>) {
        if !self.transition(OPEN, COMPLETED) {
            self.completed_twice("send");
            return;
        }

        let (body, content_type) = payload.into().into_parts();
        let content_type = self.produced_type().or(content_type);
        let body = if self.is_head() { Body::Empty } else { body };

        if let Some(response) = lock(&self.inner.response).as_mut() {
            let result = set_default_content_type(response.as_mut(), content_type).and_then(|()| response.send(body));
            if let Err(e) = result {
                debug!(cause = %e, path = self.path(), "can't send response");
            }
        }
        self.release();
    }

    /// Completes the exchange with an error response.
    ///
    /// An uncommitted response is reset and rendered by the error handler. A response that
    /// already streamed chunks can't change its status anymore, so it is aborted.
    pub fn send_error(&self, error: Error) {
        if !self.complete_with_error(&error) {
            self.completed_twice("send_error");
        }
    }

    /// Completes the exchange with `error` in a single state transition, `false` when it had
    /// already completed.
    fn complete_with_error(&self, error: &Error) -> bool {
        let previous = self.inner.state.swap(COMPLETED, Ordering::AcqRel);
        if previous == COMPLETED {
            return false;
        }

        let status = error.status_code();
        if status.is_server_error() {
            error!(cause = %error, method = %self.method(), path = self.path(), %status, "request failed");
        } else {
            debug!(cause = %error, method = %self.method(), path = self.path(), %status, "request rejected");
        }

        if previous == STREAMING {
            warn!(path = self.path(), "aborting response after chunks were written");
            drop(lock(&self.inner.response).take());
            self.release();
        } else {
            self.render_error(error, status);
        }
        true
    }

    fn render_error(&self, error: &Error, status: StatusCode) {
        let (body, content_type) = self.inner.error_handler.render(self, error).into_parts();
        let body = if self.is_head() { Body::Empty } else { body };

        if let Some(response) = lock(&self.inner.response).as_mut() {
            let result = render_into(response.as_mut(), error, status, content_type, body);
            if let Err(e) = result {
                debug!(cause = %e, path = self.path(), "can't send error response");
            }
        }
        self.release();
    }

    /// Writes a chunk of a streamed response, the first chunk commits status and headers.
    pub fn send_chunk(&self, payload: impl Into<Payload>) -> Result<(), Error> {
        let mut guard = lock(&self.inner.response);
        let response = guard.as_mut().ok_or(NativeError::Closed)?;

        if self.state() == OPEN && !response.supports_streaming() {
            return Err(Error::StreamingUnsupported);
        }
        let first = match self.inner.state.compare_exchange(OPEN, STREAMING, Ordering::AcqRel, Ordering::Acquire) {
            Ok(_) => true,
            Err(STREAMING) => false,
            Err(_) => return Err(NativeError::Committed.into()),
        };

        let (body, content_type) = payload.into().into_parts();
        if first {
            set_default_content_type(response.as_mut(), self.produced_type().or(content_type))?;
        }
        if self.is_head() {
            return Ok(());
        }
        let bytes = body.into_bytes()?;
        if bytes.is_empty() {
            return Ok(());
        }
        Ok(response.write_chunk(bytes)?)
    }

    /// Ends a streamed response, an exchange that never streamed answers an empty body.
    pub fn end_stream(&self) {
        match self.inner.state.swap(COMPLETED, Ordering::AcqRel) {
            OPEN | STREAMING => {
                if let Some(response) = lock(&self.inner.response).as_mut() {
                    if let Err(e) = response.end() {
                        debug!(cause = %e, path = self.path(), "can't end response");
                    }
                }
                self.release();
            }
            _ => self.completed_twice("end_stream"),
        }
    }

    /// Sends `error` unless the exchange already completed, in which case there is nobody left
    /// to tell.
    pub(crate) fn fail(&self, error: Error) {
        if !self.complete_with_error(&error) {
            debug!(cause = %error, path = self.path(), "error after completion");
        }
    }

    /// Completes the exchange without a response, the connection belongs to someone else now.
    pub(crate) fn complete_without_response(&self) -> bool {
        if !self.transition(OPEN, COMPLETED) {
            self.completed_twice("upgrade");
            return false;
        }
        drop(lock(&self.inner.response).take());
        true
    }

    pub(crate) fn websocket_options(&self) -> &WebSocketOptions {
        &self.inner.websocket
    }

    fn state(&self) -> u8 {
        self.inner.state.load(Ordering::Acquire)
    }

    fn transition(&self, from: u8, to: u8) -> bool {
        self.inner.state.compare_exchange(from, to, Ordering::AcqRel, Ordering::Acquire).is_ok()
    }

    fn is_head(&self) -> bool {
        *self.method() == Method::HEAD
    }

    fn produced_type(&self) -> Option<HeaderValue> {
        let route = lock(&self.inner.route);
        route.as_ref().and_then(Route::produces).and_then(|mime| HeaderValue::from_str(mime.as_ref()).ok())
    }

    fn release(&self) {
        self.inner.request.destroy();
    }

    fn completed_twice(&self, operation: &str) {
        error!(operation, method = %self.method(), path = self.path(), "response already completed");
        if cfg!(debug_assertions) {
            panic!("{operation} called on a completed response for {} {}", self.method(), self.path());
        }
    }
}

fn set_default_content_type(response: &mut dyn NativeResponse, content_type: Option<HeaderValue>) -> Result<(), NativeError> {
    match content_type {
        Some(value) if response.header(&CONTENT_TYPE).is_none() => response.set_header(CONTENT_TYPE, value),
        _ => Ok(()),
    }
}

fn render_into(
    response: &mut dyn NativeResponse,
    error: &Error,
    status: StatusCode,
    content_type: Option<HeaderValue>,
    body: Body,
) -> Result<(), NativeError> {
    response.reset()?;
    response.set_status(status);
    if let Error::MethodNotAllowed { allow, .. } = error {
        let allow = allow.iter().map(Method::as_str).collect::<Vec<_>>().join(", ");
        if let Ok(value) = HeaderValue::from_str(&allow) {
            response.set_header(ALLOW, value)?;
        }
    }
    if let Some(value) = content_type {
        response.set_header(CONTENT_TYPE, value)?;
    }
    response.send(body)
}

impl Drop for Inner {
    fn drop(&mut self) {
        if self.state.load(Ordering::Acquire) != COMPLETED {
            warn!(method = %self.request.method(), path = self.request.path(), "exchange dropped before completion");
            self.request.destroy();
        }
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("method", self.method())
            .field("path", &self.path())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
