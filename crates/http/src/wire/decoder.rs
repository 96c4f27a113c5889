//! HTTP/1.x request decoder.
//!
//! [`RequestDecoder`] implements the tokio-util [`Decoder`] trait and yields one
//! [`DecodedRequest`] per complete request: the head, parsed with `httparse`, plus the whole
//! body. Bodies are framed by `Content-Length` or by the chunked transfer coding and buffered up
//! to a configured limit.
//!
//! # Limits
//!
//! - Maximum number of headers: 64
//! - Maximum head size: 8 KiB
//! - Only HTTP/1.0 and HTTP/1.1
//!
//! The decoder works on a plain [`BytesMut`], so both the tokio backend and the blocking
//! backend drive the same state machine from their own read loops.

use crate::error::ParseError;
use crate::wire::{ensure, RequestHead};
use bytes::{Buf, Bytes, BytesMut};
use http::header::{CONTENT_LENGTH, TRANSFER_ENCODING};
use http::{HeaderName, HeaderValue, Request};
use httparse::Status;
use tokio_util::codec::Decoder;
use tracing::trace;

/// Maximum number of headers allowed in a request
pub const MAX_HEADER_NUM: usize = 64;

/// Maximum size in bytes allowed for the request head
pub const MAX_HEADER_BYTES: usize = 8 * 1024;

const MAX_TRAILER_NUM: usize = 16;

/// How the body of a request is delimited.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PayloadSize {
    Length(u64),
    Chunked,
    Empty,
}

/// A request with its body fully read.
#[derive(Debug)]
pub struct DecodedRequest {
    pub head: RequestHead,
    pub body: Bytes,
}

#[derive(Debug)]
pub struct RequestDecoder {
    max_body_size: usize,
    body: Option<BodyState>,
    continue_pending: bool,
}

#[derive(Debug)]
struct BodyState {
    head: RequestHead,
    kind: BodyKind,
    buf: BytesMut,
}

#[derive(Debug)]
enum BodyKind {
    Length { remaining: u64 },
    Chunked(ChunkedState),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkedState {
    /// Reading the chunk size line
    Size,
    /// Reading chunk data
    Data(u64),
    /// Reading the CRLF after chunk data
    DataEnd,
    /// Reading optional trailer fields up to the final empty line
    Trailers,
}

impl RequestDecoder {
    pub fn new(max_body_size: usize) -> Self {
        Self { max_body_size, body: None, continue_pending: false }
    }

    /// Whether the client waits for `100 Continue` before sending the body.
    ///
    /// Returns `true` once per request, the caller is expected to answer right away.
    pub fn take_continue(&mut self) -> bool {
        std::mem::take(&mut self.continue_pending)
    }

    fn complete(&mut self) -> Option<DecodedRequest> {
        self.continue_pending = false;
        self.body.take().map(|state| DecodedRequest { head: state.head, body: state.buf.freeze() })
    }
}

impl Decoder for RequestDecoder {
    type Item = DecodedRequest;
    type Error = ParseError;

    /// Attempts to decode a whole request from the provided buffer
    ///
    /// # Returns
    ///
    /// - `Ok(Some(_))`: a complete request, head and body
    /// - `Ok(None)`: need more data to proceed
    /// - `Err(_)`: the request is malformed or exceeds a limit
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if self.body.is_none() {
            let Some((head, payload_size)) = decode_head(src)? else {
                return Ok(None);
            };

            let kind = match payload_size {
                PayloadSize::Empty | PayloadSize::Length(0) => {
                    return Ok(Some(DecodedRequest { head, body: Bytes::new() }));
                }
                PayloadSize::Length(length) => {
                    ensure!(length <= self.max_body_size as u64, ParseError::TooLargeBody { max_size: self.max_body_size });
                    BodyKind::Length { remaining: length }
                }
                PayloadSize::Chunked => BodyKind::Chunked(ChunkedState::Size),
            };

            self.continue_pending = head.expects_continue();
            self.body = Some(BodyState { head, kind, buf: BytesMut::new() });
        }

        let Some(state) = self.body.as_mut() else {
            return Ok(None);
        };

        let finished = match &mut state.kind {
            BodyKind::Length { remaining } => {
                let n = src.len().min(usize::try_from(*remaining).unwrap_or(usize::MAX));
                state.buf.extend_from_slice(&src.split_to(n));
                *remaining -= n as u64;
                *remaining == 0
            }
            BodyKind::Chunked(chunked) => decode_chunked(chunked, src, &mut state.buf, self.max_body_size)?,
        };

        if finished { Ok(self.complete()) } else { Ok(None) }
    }
}

/// Parses a request head, leaving the body bytes in `src`.
pub(crate) fn decode_head(src: &mut BytesMut) -> Result<Option<(RequestHead, PayloadSize)>, ParseError> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADER_NUM];
    let mut req = httparse::Request::new(&mut headers);

    let parsed = req.parse(src).map_err(|e| match e {
        httparse::Error::TooManyHeaders => ParseError::too_many_headers(MAX_HEADER_NUM),
        httparse::Error::Version => ParseError::InvalidVersion(None),
        e => ParseError::invalid_header(e.to_string()),
    })?;

    let body_offset = match parsed {
        Status::Complete(body_offset) => body_offset,
        Status::Partial => {
            ensure!(src.len() <= MAX_HEADER_BYTES, ParseError::too_large_header(src.len(), MAX_HEADER_BYTES));
            return Ok(None);
        }
    };
    trace!(head_size = body_offset, "parsed request head");
    ensure!(body_offset <= MAX_HEADER_BYTES, ParseError::too_large_header(body_offset, MAX_HEADER_BYTES));

    let version = match req.version {
        Some(0) => http::Version::HTTP_10,
        Some(1) => http::Version::HTTP_11,
        _ => return Err(ParseError::InvalidVersion(req.version)),
    };

    let mut builder = Request::builder()
        .method(req.method.ok_or(ParseError::InvalidMethod)?)
        .uri(req.path.ok_or(ParseError::InvalidUri)?)
        .version(version);

    // record byte ranges so header values can share the buffer instead of being copied
    let header_count = req.headers.len();
    let base = src.as_ptr() as usize;
    let mut indices = Vec::with_capacity(header_count);
    for header in req.headers.iter() {
        let name_start = header.name.as_ptr() as usize - base;
        let value_start = header.value.as_ptr() as usize - base;
        indices.push((name_start..name_start + header.name.len(), value_start..value_start + header.value.len()));
    }

    let head_bytes = src.split_to(body_offset).freeze();
    if let Some(headers) = builder.headers_mut() {
        headers.reserve(header_count);
        for (name, value) in indices {
            let name = HeaderName::from_bytes(&head_bytes[name]).map_err(ParseError::invalid_header)?;
            let value = HeaderValue::from_maybe_shared(head_bytes.slice(value)).map_err(ParseError::invalid_header)?;
            headers.append(name, value);
        }
    }

    let request = builder.body(()).map_err(|_| ParseError::InvalidUri)?;
    let (parts, ()) = request.into_parts();
    let head = RequestHead::from(parts);
    let payload_size = parse_payload(&head)?;

    Ok(Some((head, payload_size)))
}

/// Determines the body framing from the `Content-Length` and `Transfer-Encoding` headers.
///
/// refer: <https://www.rfc-editor.org/rfc/rfc9112.html#name-transfer-encoding>
fn parse_payload(head: &RequestHead) -> Result<PayloadSize, ParseError> {
    let te_header = head.headers.get(TRANSFER_ENCODING);
    let cl_header = head.headers.get(CONTENT_LENGTH);

    match (te_header, cl_header) {
        (None, None) => Ok(PayloadSize::Empty),

        (Some(te_value), None) => {
            if is_chunked(te_value) {
                Ok(PayloadSize::Chunked)
            } else {
                Err(ParseError::invalid_body("unsupported transfer-encoding"))
            }
        }

        (None, Some(cl_value)) => {
            let cl_str = cl_value.to_str().map_err(|_| ParseError::invalid_content_length("value can't to_str"))?;

            let length = cl_str
                .trim()
                .parse::<u64>()
                .map_err(|_| ParseError::invalid_content_length(format!("value {cl_str} is not u64")))?;

            Ok(PayloadSize::Length(length))
        }

        (Some(_), Some(_)) => {
            Err(ParseError::invalid_content_length("transfer_encoding and content_length both present in headers"))
        }
    }
}

/// Chunked must be the last coding of `Transfer-Encoding`.
fn is_chunked(value: &HeaderValue) -> bool {
    value.as_bytes().rsplit(|b| *b == b',').next().is_some_and(|last| last.trim_ascii().eq_ignore_ascii_case(b"chunked"))
}

/// Moves chunk data from `src` to `buf`, returns `true` once the last chunk and the trailers are read.
fn decode_chunked(
    state: &mut ChunkedState,
    src: &mut BytesMut,
    buf: &mut BytesMut,
    max_body_size: usize,
) -> Result<bool, ParseError> {
    loop {
        match *state {
            ChunkedState::Size => {
                let (consumed, size) = match httparse::parse_chunk_size(src) {
                    Ok(Status::Complete(parsed)) => parsed,
                    Ok(Status::Partial) => return Ok(false),
                    Err(_) => return Err(ParseError::invalid_body("invalid chunk size")),
                };
                src.advance(consumed);

                if size == 0 {
                    *state = ChunkedState::Trailers;
                } else {
                    ensure!(
                        (buf.len() as u64).saturating_add(size) <= max_body_size as u64,
                        ParseError::TooLargeBody { max_size: max_body_size }
                    );
                    *state = ChunkedState::Data(size);
                }
            }
            ChunkedState::Data(remaining) => {
                if src.is_empty() {
                    return Ok(false);
                }
                let n = src.len().min(usize::try_from(remaining).unwrap_or(usize::MAX));
                buf.extend_from_slice(&src.split_to(n));
                let left = remaining - n as u64;
                trace!(len = n, left, "read chunked bytes");
                *state = if left == 0 { ChunkedState::DataEnd } else { ChunkedState::Data(left) };
            }
            ChunkedState::DataEnd => {
                if src.len() < 2 {
                    return Ok(false);
                }
                ensure!(&src[..2] == b"\r\n", ParseError::invalid_body("missing CRLF after chunk data"));
                src.advance(2);
                *state = ChunkedState::Size;
            }
            ChunkedState::Trailers => {
                let mut trailers = [httparse::EMPTY_HEADER; MAX_TRAILER_NUM];
                let consumed = match httparse::parse_headers(src, &mut trailers) {
                    Ok(Status::Complete((consumed, _))) => consumed,
                    Ok(Status::Partial) => return Ok(false),
                    Err(e) => return Err(ParseError::invalid_body(e)),
                };
                src.advance(consumed);
                return Ok(true);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::{Method, Version};
    use indoc::indoc;

    fn crlf(s: &str) -> BytesMut {
        BytesMut::from(s.replace('\n', "\r\n").as_str())
    }

    #[test]
    fn check_is_chunked() {
        assert!(is_chunked(&HeaderValue::from_static("gzip, chunked")));
        assert!(is_chunked(&HeaderValue::from_static("Chunked")));
        assert!(!is_chunked(&HeaderValue::from_static("chunked, gzip")));
        assert!(!is_chunked(&HeaderValue::from_static("gzip")));
    }

    #[test]
    fn from_curl() {
        let mut buf = crlf(indoc! {r##"
        GET /index.html?a=1&b=2 HTTP/1.1
        Host: 127.0.0.1:8080
        User-Agent: curl/7.79.1
        Accept: */*

        "##});

        let request = RequestDecoder::new(1024).decode(&mut buf).unwrap().unwrap();
        let head = request.head;

        assert_eq!(head.method, Method::GET);
        assert_eq!(head.version, Version::HTTP_11);
        assert_eq!(head.path(), "/index.html");
        assert_eq!(head.query(), Some("a=1&b=2"));
        assert_eq!(head.headers.len(), 3);
        assert_eq!(head.headers.get(http::header::ACCEPT), Some(&HeaderValue::from_static("*/*")));
        assert!(head.keep_alive());
        assert!(request.body.is_empty());
        assert!(buf.is_empty());
    }

    #[test]
    fn test_partial_head_waits() {
        let mut buf = BytesMut::from("GET / HTTP/1.1\r\nHost: loc");
        let mut decoder = RequestDecoder::new(1024);
        assert!(decoder.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(b"alhost\r\n\r\n");
        assert!(decoder.decode(&mut buf).unwrap().is_some());
    }

    #[test]
    fn test_length_body_across_reads() {
        let mut decoder = RequestDecoder::new(1024);
        let mut buf = BytesMut::from("POST /form HTTP/1.1\r\nContent-Length: 11\r\n\r\nhello");
        assert!(decoder.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(b" worldGET");
        let request = decoder.decode(&mut buf).unwrap().unwrap();
        assert_eq!(request.body, Bytes::from_static(b"hello world"));
        assert_eq!(&buf[..], b"GET");
    }

    #[test]
    fn test_chunked_body_with_trailer() {
        let mut decoder = RequestDecoder::new(1024);
        let mut buf = BytesMut::from(
            "POST /upload HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n6;ext=1\r\n world\r\n0\r\nX-Sum: 1\r\n\r\n",
        );

        let request = decoder.decode(&mut buf).unwrap().unwrap();
        assert_eq!(request.body, Bytes::from_static(b"hello world"));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_too_large_body() {
        let mut decoder = RequestDecoder::new(4);
        let mut buf = BytesMut::from("POST / HTTP/1.1\r\nContent-Length: 5\r\n\r\nhello");
        let error = decoder.decode(&mut buf).unwrap_err();
        assert_eq!(error, ParseError::TooLargeBody { max_size: 4 });
        assert_eq!(error.status_code(), http::StatusCode::PAYLOAD_TOO_LARGE);

        let mut decoder = RequestDecoder::new(4);
        let mut buf = BytesMut::from("POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n3\r\nabc\r\n3\r\ndef\r\n0\r\n\r\n");
        assert_eq!(decoder.decode(&mut buf).unwrap_err(), ParseError::TooLargeBody { max_size: 4 });
    }

    #[test]
    fn test_expect_continue() {
        let mut decoder = RequestDecoder::new(1024);
        let mut buf = BytesMut::from("PUT /doc HTTP/1.1\r\nExpect: 100-continue\r\nContent-Length: 2\r\n\r\n");
        assert!(decoder.decode(&mut buf).unwrap().is_none());
        assert!(decoder.take_continue());
        assert!(!decoder.take_continue());

        buf.extend_from_slice(b"ok");
        assert_eq!(decoder.decode(&mut buf).unwrap().unwrap().body, Bytes::from_static(b"ok"));
    }

    #[test]
    fn test_conflicting_framing() {
        let mut buf = BytesMut::from("POST / HTTP/1.1\r\nContent-Length: 2\r\nTransfer-Encoding: chunked\r\n\r\n");
        assert!(matches!(
            RequestDecoder::new(1024).decode(&mut buf),
            Err(ParseError::InvalidContentLength { .. })
        ));
    }

    #[test]
    fn test_oversized_head() {
        let mut buf = BytesMut::from("GET / HTTP/1.1\r\nX-Big: ");
        buf.extend_from_slice(&[b'a'; MAX_HEADER_BYTES]);
        assert!(matches!(
            RequestDecoder::new(1024).decode(&mut buf),
            Err(ParseError::TooLargeHeader { .. })
        ));
    }

    #[test]
    fn test_http_10_defaults_to_close() {
        let mut buf = BytesMut::from("GET / HTTP/1.0\r\n\r\n");
        let request = RequestDecoder::new(1024).decode(&mut buf).unwrap().unwrap();
        assert!(!request.head.keep_alive());

        let mut buf = BytesMut::from("GET / HTTP/1.0\r\nConnection: Keep-Alive\r\n\r\n");
        let request = RequestDecoder::new(1024).decode(&mut buf).unwrap().unwrap();
        assert!(request.head.keep_alive());
    }

    #[tokio::test]
    async fn test_framed_read_truncated_request() {
        use futures::StreamExt;
        use tokio_util::codec::FramedRead;

        let input: &[u8] = b"GET /a HTTP/1.1\r\n\r\nGET /b HTTP/1.1\r\nHost";
        let mut framed = FramedRead::new(input, RequestDecoder::new(1024));

        let first = framed.next().await.unwrap().unwrap();
        assert_eq!(first.head.uri.path(), "/a");

        let error = framed.next().await.unwrap().unwrap_err();
        assert!(matches!(error, ParseError::Io { .. }), "{error:?}");
        assert_eq!(error.status_code(), http::StatusCode::BAD_REQUEST);
    }
}
