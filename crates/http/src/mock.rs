//! In-memory backend for tests.
//!
//! [`MockRequest`] is built by hand, [`MockResponse`] records everything written to it and can
//! be cloned so a test keeps a handle after the response was moved into a handler.
//! [`MockWebSocket`] records sent messages and lets the test play the client.

use crate::body::Body;
use crate::error::{NativeError, ParseError};
use crate::params::LazyForm;
use crate::request::{NativeRequest, Upgrade};
use crate::response::NativeResponse;
use crate::upload::NativeUpload;
use crate::websocket::{CloseStatus, NativeWebSocket, WebSocketListener};
use bytes::{Bytes, BytesMut};
use http::header::CONTENT_LENGTH;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Version};
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

pub struct MockRequest {
    method: Method,
    path: String,
    query: Option<String>,
    version: Version,
    headers: HeaderMap,
    body: Bytes,
    remote: Option<SocketAddr>,
    secure: bool,
    form: LazyForm,
    websocket: Option<MockWebSocket>,
    destroyed: Arc<AtomicBool>,
}

impl MockRequest {
    /// A request for `target`, a path with an optional query string.
    pub fn new(method: Method, target: &str) -> Self {
        let (path, query) = match target.split_once('?') {
            Some((path, query)) => (path.to_string(), Some(query.to_string())),
            None => (target.to_string(), None),
        };
        Self {
            method,
            path,
            query,
            version: Version::HTTP_11,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            remote: None,
            secure: false,
            form: LazyForm::default(),
            websocket: None,
            destroyed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn get(target: &str) -> Self {
        Self::new(Method::GET, target)
    }

    pub fn post(target: &str) -> Self {
        Self::new(Method::POST, target)
    }

    /// Appends a header, invalid names or values are ignored.
    pub fn header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_str(value)) {
            self.headers.append(name, value);
        }
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn remote(mut self, remote: SocketAddr) -> Self {
        self.remote = Some(remote);
        self
    }

    pub fn secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    pub fn version(mut self, version: Version) -> Self {
        self.version = version;
        self
    }

    /// Makes [`NativeRequest::upgrade`] succeed with the given socket.
    pub fn websocket(mut self, websocket: MockWebSocket) -> Self {
        self.websocket = Some(websocket);
        self
    }

    /// A flag set once [`NativeRequest::destroy`] was called.
    pub fn destroyed_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.destroyed)
    }
}

impl fmt::Debug for MockRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockRequest")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("query", &self.query)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

impl NativeRequest for MockRequest {
    fn method(&self) -> &Method {
        &self.method
    }

    fn path(&self) -> &str {
        &self.path
    }

    fn query_string(&self) -> Option<&str> {
        self.query.as_deref()
    }

    fn header_map(&self) -> &HeaderMap {
        &self.headers
    }

    fn param_names(&self) -> Result<Vec<String>, ParseError> {
        self.form.get(self.query.as_deref(), &self.headers, &self.body).map(|form| form.names())
    }

    fn params(&self, name: &str) -> Result<Vec<String>, ParseError> {
        self.form.get(self.query.as_deref(), &self.headers, &self.body).map(|form| form.values(name))
    }

    fn files(&self, name: &str) -> Result<Vec<Arc<dyn NativeUpload>>, ParseError> {
        self.form.get(self.query.as_deref(), &self.headers, &self.body).map(|form| form.files(name))
    }

    fn body_bytes(&self) -> Bytes {
        self.body.clone()
    }

    fn remote_address(&self) -> Option<SocketAddr> {
        self.remote
    }

    fn protocol(&self) -> Version {
        self.version
    }

    fn secure(&self) -> bool {
        self.secure
    }

    fn upgrade(&self, upgrade: Upgrade) -> Result<Box<dyn NativeWebSocket>, NativeError> {
        match &self.websocket {
            Some(websocket) => Ok(Box::new(websocket.clone())),
            None => Err(NativeError::UnsupportedUpgrade(upgrade)),
        }
    }

    fn destroy(&self) {
        self.form.destroy();
        self.destroyed.store(true, Ordering::Release);
    }
}

#[derive(Debug)]
struct ResponseState {
    status: StatusCode,
    headers: HeaderMap,
    body: BytesMut,
    chunks: Vec<Bytes>,
    committed: bool,
    ended: bool,
    send_count: usize,
    reset_count: usize,
    async_started: bool,
    supports_streaming: bool,
}

#[derive(Debug)]
struct ResponseInner {
    state: Mutex<ResponseState>,
    done: Condvar,
}

/// A response kept in memory.
///
/// Clones share the recorded state, each clone keeps its own view of the headers it set.
#[derive(Debug, Clone)]
pub struct MockResponse {
    inner: Arc<ResponseInner>,
    headers: HeaderMap,
}

impl Default for MockResponse {
    fn default() -> Self {
        Self::new()
    }
}

impl MockResponse {
    pub fn new() -> Self {
        let state = ResponseState {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: BytesMut::new(),
            chunks: Vec::new(),
            committed: false,
            ended: false,
            send_count: 0,
            reset_count: 0,
            async_started: false,
            supports_streaming: true,
        };
        Self { inner: Arc::new(ResponseInner { state: Mutex::new(state), done: Condvar::new() }), headers: HeaderMap::new() }
    }

    /// A response that refuses [`NativeResponse::write_chunk`].
    pub fn without_streaming() -> Self {
        let response = Self::new();
        response.lock().supports_streaming = false;
        response
    }

    fn lock(&self) -> MutexGuard<'_, ResponseState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn complete(&self, mut state: MutexGuard<'_, ResponseState>) {
        state.committed = true;
        state.ended = true;
        drop(state);
        self.inner.done.notify_all();
    }

    pub fn status_code(&self) -> StatusCode {
        self.lock().status
    }

    pub fn header_value(&self, name: &str) -> Option<String> {
        self.lock().headers.get(name).and_then(|value| value.to_str().ok()).map(str::to_string)
    }

    pub fn header_map(&self) -> HeaderMap {
        self.lock().headers.clone()
    }

    pub fn body(&self) -> Bytes {
        Bytes::copy_from_slice(&self.lock().body)
    }

    pub fn body_string(&self) -> String {
        String::from_utf8_lossy(&self.lock().body).into_owned()
    }

    pub fn chunks(&self) -> Vec<Bytes> {
        self.lock().chunks.clone()
    }

    /// How many times the response was completed through [`NativeResponse::send`].
    pub fn send_count(&self) -> usize {
        self.lock().send_count
    }

    pub fn reset_count(&self) -> usize {
        self.lock().reset_count
    }

    pub fn async_started(&self) -> bool {
        self.lock().async_started
    }

    pub fn is_complete(&self) -> bool {
        self.lock().ended
    }

    /// Waits until the response completes, returns `false` on timeout.
    pub fn await_completion(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        while !state.ended {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            state = match self.inner.done.wait_timeout(state, deadline - now) {
                Ok((state, _)) => state,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
        true
    }
}

impl NativeResponse for MockResponse {
    fn status(&self) -> StatusCode {
        self.lock().status
    }

    fn set_status(&mut self, status: StatusCode) {
        self.lock().status = status;
    }

    fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    fn set_header(&mut self, name: HeaderName, value: HeaderValue) -> Result<(), NativeError> {
        let mut state = self.lock();
        if state.committed {
            return Err(NativeError::Committed);
        }
        state.headers.insert(name.clone(), value.clone());
        drop(state);
        self.headers.insert(name, value);
        Ok(())
    }

    fn remove_header(&mut self, name: &HeaderName) -> Result<(), NativeError> {
        let mut state = self.lock();
        if state.committed {
            return Err(NativeError::Committed);
        }
        state.headers.remove(name);
        drop(state);
        self.headers.remove(name);
        Ok(())
    }

    fn committed(&self) -> bool {
        self.lock().committed
    }

    fn send(&mut self, body: Body) -> Result<(), NativeError> {
        if self.lock().committed {
            return Err(NativeError::Committed);
        }
        let bytes = body.into_bytes()?;

        let mut state = self.lock();
        if state.committed {
            return Err(NativeError::Committed);
        }
        if !state.headers.contains_key(CONTENT_LENGTH) {
            state.headers.insert(CONTENT_LENGTH, HeaderValue::from(bytes.len()));
        }
        state.body.extend_from_slice(&bytes);
        state.send_count += 1;
        self.complete(state);
        Ok(())
    }

    fn supports_streaming(&self) -> bool {
        self.lock().supports_streaming
    }

    fn write_chunk(&mut self, chunk: Bytes) -> Result<(), NativeError> {
        let mut state = self.lock();
        if !state.supports_streaming {
            return Err(NativeError::io(io::Error::new(io::ErrorKind::Unsupported, "streaming is not supported")));
        }
        if state.ended {
            return Err(NativeError::Committed);
        }
        state.committed = true;
        state.body.extend_from_slice(&chunk);
        state.chunks.push(chunk);
        Ok(())
    }

    fn start_async(&mut self) {
        self.lock().async_started = true;
    }

    fn end(&mut self) -> Result<(), NativeError> {
        let state = self.lock();
        if state.ended {
            return Ok(());
        }
        if !state.committed {
            drop(state);
            return self.send(Body::Empty);
        }
        self.complete(state);
        Ok(())
    }

    fn reset(&mut self) -> Result<(), NativeError> {
        let mut state = self.lock();
        if state.committed {
            return Err(NativeError::Committed);
        }
        state.status = StatusCode::OK;
        state.headers.clear();
        state.reset_count += 1;
        drop(state);
        self.headers.clear();
        Ok(())
    }
}

/// A message sent through a [`MockWebSocket`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockMessage {
    Text(String),
    Binary(Bytes),
}

#[derive(Default)]
struct SocketState {
    open: bool,
    paused: bool,
    listener: Option<Arc<dyn WebSocketListener>>,
    sent: Vec<MockMessage>,
    close_status: Option<CloseStatus>,
}

/// A WebSocket driven by the test.
#[derive(Clone)]
pub struct MockWebSocket {
    state: Arc<Mutex<SocketState>>,
}

impl fmt::Debug for MockWebSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("MockWebSocket")
            .field("open", &state.open)
            .field("sent", &state.sent)
            .field("close_status", &state.close_status)
            .finish_non_exhaustive()
    }
}

impl Default for MockWebSocket {
    fn default() -> Self {
        Self::new()
    }
}

impl MockWebSocket {
    pub fn new() -> Self {
        Self { state: Arc::new(Mutex::new(SocketState { open: true, ..SocketState::default() })) }
    }

    fn lock(&self) -> MutexGuard<'_, SocketState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn listener(&self) -> Option<Arc<dyn WebSocketListener>> {
        self.lock().listener.clone()
    }

    /// Marks the socket closed, returns the listener when it was still open.
    fn shut(&self, status: Option<CloseStatus>) -> Option<Arc<dyn WebSocketListener>> {
        let mut state = self.lock();
        if !state.open {
            return None;
        }
        state.open = false;
        state.close_status = status;
        state.listener.clone()
    }

    pub fn sent(&self) -> Vec<MockMessage> {
        self.lock().sent.clone()
    }

    /// The status of a close initiated by the server side.
    pub fn close_status(&self) -> Option<CloseStatus> {
        self.lock().close_status.clone()
    }

    pub fn is_paused(&self) -> bool {
        self.lock().paused
    }

    /// Delivers a text frame from the client.
    pub fn receive_text(&self, text: &str) {
        if let Some(listener) = self.listener() {
            listener.on_text(text.to_string());
        }
    }

    pub fn receive_binary(&self, data: Bytes) {
        if let Some(listener) = self.listener() {
            listener.on_binary(data);
        }
    }

    /// The client closes the connection.
    pub fn client_close(&self, status: CloseStatus) {
        if let Some(listener) = self.shut(None) {
            listener.on_close(status);
        }
    }

    /// The connection fails.
    pub fn fail(&self, error: NativeError) {
        if let Some(listener) = self.shut(None) {
            listener.on_error(error);
        }
    }
}

impl NativeWebSocket for MockWebSocket {
    fn set_listener(&self, listener: Arc<dyn WebSocketListener>) {
        self.lock().listener = Some(Arc::clone(&listener));
        listener.on_connect();
    }

    fn send_text(&self, text: String) {
        let mut state = self.lock();
        if state.open {
            state.sent.push(MockMessage::Text(text));
        }
    }

    fn send_binary(&self, data: Bytes) {
        let mut state = self.lock();
        if state.open {
            state.sent.push(MockMessage::Binary(data));
        }
    }

    fn close(&self, status: CloseStatus) {
        if let Some(listener) = self.shut(Some(status.clone())) {
            listener.on_close(status);
        }
    }

    fn pause(&self) {
        self.lock().paused = true;
    }

    fn resume(&self) {
        self.lock().paused = false;
    }

    fn terminate(&self) {
        if let Some(listener) = self.shut(Some(CloseStatus::HARSH_DISCONNECT)) {
            listener.on_close(CloseStatus::HARSH_DISCONNECT);
        }
    }

    fn is_open(&self) -> bool {
        self.lock().open
    }
}
