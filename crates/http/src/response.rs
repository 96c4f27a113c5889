//! The response side of the native contract.
//!
//! A response is either sent once with [`NativeResponse::send`], or opened with
//! [`NativeResponse::write_chunk`] and closed with [`NativeResponse::end`]. Headers and status can
//! change until the first byte leaves, after that the response is committed.

use crate::body::Body;
use crate::error::NativeError;
use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};

pub trait NativeResponse: Send {
    fn status(&self) -> StatusCode;

    fn set_status(&mut self, status: StatusCode);

    fn headers(&self) -> &HeaderMap;

    fn header(&self, name: &HeaderName) -> Option<&HeaderValue> {
        self.headers().get(name)
    }

    /// Replaces a header, fails once the response is committed.
    fn set_header(&mut self, name: HeaderName, value: HeaderValue) -> Result<(), NativeError>;

    fn remove_header(&mut self, name: &HeaderName) -> Result<(), NativeError>;

    /// Whether the status line and headers were already written.
    fn committed(&self) -> bool;

    /// Sends the whole response. When no `Content-Length` is set the backend computes it from
    /// the body, or falls back to chunked encoding for streams.
    fn send(&mut self, body: Body) -> Result<(), NativeError>;

    /// Whether [`NativeResponse::write_chunk`] is available.
    fn supports_streaming(&self) -> bool;

    /// Writes a chunk, committing the response on the first call.
    fn write_chunk(&mut self, chunk: Bytes) -> Result<(), NativeError>;

    /// Tells the backend the exchange completes after the handler returns.
    fn start_async(&mut self);

    /// Finishes a streamed response.
    fn end(&mut self) -> Result<(), NativeError>;

    /// Drops status and headers set so far, fails once committed.
    fn reset(&mut self) -> Result<(), NativeError>;
}
