use crate::body::Body;
use crate::error::NativeError;
use crate::response::NativeResponse;
use crate::wire::{encode_chunk, encode_head, encode_last_chunk, Framing, ResponseDefaults};
use bytes::{Bytes, BytesMut};
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode, Version};
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::sync::Arc;

/// What a response hands to its connection, in order.
pub enum Outbound {
    Bytes(Bytes),
    /// A body of unknown length, chunk-framed when `chunked` is set.
    Stream { reader: Box<dyn Read + Send>, chunked: bool },
    File { file: File, len: u64 },
    /// The response is complete.
    End { keep_alive: bool },
    /// The response was dropped before it completed.
    Abort,
}

impl fmt::Debug for Outbound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bytes(bytes) => f.debug_tuple("Bytes").field(&bytes.len()).finish(),
            Self::Stream { chunked, .. } => f.debug_struct("Stream").field("chunked", chunked).finish_non_exhaustive(),
            Self::File { len, .. } => f.debug_struct("File").field("len", len).finish_non_exhaustive(),
            Self::End { keep_alive } => f.debug_struct("End").field("keep_alive", keep_alive).finish(),
            Self::Abort => f.write_str("Abort"),
        }
    }
}

/// Where a [`WireResponse`] writes, implemented by each socket backend.
pub trait ResponseSink: Send {
    fn write(&mut self, frame: Outbound) -> Result<(), NativeError>;

    fn start_async(&mut self) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Open,
    Streaming { framing: Framing, keep_alive: bool },
    Done,
}

/// A [`NativeResponse`] encoding HTTP/1.x frames into a [`ResponseSink`].
pub struct WireResponse<S: ResponseSink> {
    version: Version,
    request_keep_alive: bool,
    head_request: bool,
    status: StatusCode,
    headers: HeaderMap,
    defaults: Arc<ResponseDefaults>,
    state: State,
    sink: S,
}

impl<S: ResponseSink> WireResponse<S> {
    pub fn new(version: Version, keep_alive: bool, defaults: Arc<ResponseDefaults>, sink: S) -> Self {
        Self {
            version,
            request_keep_alive: keep_alive,
            head_request: false,
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            defaults,
            state: State::Open,
            sink,
        }
    }

    /// Marks the response as the answer to a `HEAD` request, an empty body then keeps the
    /// declared `Content-Length`.
    pub fn head_request(mut self, head_request: bool) -> Self {
        self.head_request = head_request;
        self
    }

    fn encode_head(&self, framing: Framing) -> (BytesMut, bool) {
        let keep_alive = self.request_keep_alive && framing != Framing::UntilClose;
        let mut head = BytesMut::with_capacity(256);
        encode_head(&mut head, self.version, self.status, &self.headers, framing, keep_alive, &self.defaults);
        (head, keep_alive)
    }
}

impl<S: ResponseSink> fmt::Debug for WireResponse<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WireResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl<S: ResponseSink> NativeResponse for WireResponse<S> {
    fn status(&self) -> StatusCode {
        self.status
    }

    fn set_status(&mut self, status: StatusCode) {
        self.status = status;
    }

    fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    fn set_header(&mut self, name: HeaderName, value: HeaderValue) -> Result<(), NativeError> {
        if self.committed() {
            return Err(NativeError::Committed);
        }
        self.headers.insert(name, value);
        Ok(())
    }

    fn remove_header(&mut self, name: &HeaderName) -> Result<(), NativeError> {
        if self.committed() {
            return Err(NativeError::Committed);
        }
        self.headers.remove(name);
        Ok(())
    }

    fn committed(&self) -> bool {
        self.state != State::Open
    }

    fn send(&mut self, body: Body) -> Result<(), NativeError> {
        if self.committed() {
            return Err(NativeError::Committed);
        }

        let framing = Framing::select(self.version, &self.headers, body.exact_len(), self.head_request);
        let (mut head, keep_alive) = self.encode_head(framing);
        self.state = State::Done;

        match body {
            Body::Empty => self.sink.write(Outbound::Bytes(head.freeze()))?,
            Body::Bytes(bytes) => {
                head.extend_from_slice(&bytes);
                self.sink.write(Outbound::Bytes(head.freeze()))?;
            }
            Body::Stream(reader) => {
                self.sink.write(Outbound::Bytes(head.freeze()))?;
                self.sink.write(Outbound::Stream { reader, chunked: framing == Framing::Chunked })?;
            }
            Body::File { file, len } => {
                self.sink.write(Outbound::Bytes(head.freeze()))?;
                self.sink.write(Outbound::File { file, len })?;
            }
        }

        self.sink.write(Outbound::End { keep_alive })
    }

    fn supports_streaming(&self) -> bool {
        true
    }

    fn write_chunk(&mut self, chunk: Bytes) -> Result<(), NativeError> {
        let (mut buf, framing) = match self.state {
            State::Done => return Err(NativeError::Committed),
            State::Streaming { framing, .. } => (BytesMut::with_capacity(chunk.len() + 16), framing),
            State::Open => {
                let framing = Framing::select(self.version, &self.headers, None, self.head_request);
                let (head, keep_alive) = self.encode_head(framing);
                self.state = State::Streaming { framing, keep_alive };
                (head, framing)
            }
        };

        if framing == Framing::Chunked {
            encode_chunk(&mut buf, &chunk);
        } else {
            buf.extend_from_slice(&chunk);
        }

        if buf.is_empty() {
            return Ok(());
        }
        self.sink.write(Outbound::Bytes(buf.freeze()))
    }

    fn start_async(&mut self) {
        self.sink.start_async();
    }

    fn end(&mut self) -> Result<(), NativeError> {
        match self.state {
            State::Open => self.send(Body::Empty),
            State::Streaming { framing, keep_alive } => {
                self.state = State::Done;
                if framing == Framing::Chunked {
                    let mut buf = BytesMut::with_capacity(5);
                    encode_last_chunk(&mut buf);
                    self.sink.write(Outbound::Bytes(buf.freeze()))?;
                }
                self.sink.write(Outbound::End { keep_alive })
            }
            State::Done => Ok(()),
        }
    }

    fn reset(&mut self) -> Result<(), NativeError> {
        if self.committed() {
            return Err(NativeError::Committed);
        }
        self.status = StatusCode::OK;
        self.headers.clear();
        Ok(())
    }
}

impl<S: ResponseSink> Drop for WireResponse<S> {
    fn drop(&mut self) {
        if self.state != State::Done {
            self.state = State::Done;
            let _ = self.sink.write(Outbound::Abort);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::header::{CONTENT_LENGTH, CONTENT_TYPE};
    use std::io::Cursor;
    use std::sync::Mutex;

    #[derive(Default, Clone)]
    struct Recorder {
        frames: Arc<Mutex<Vec<String>>>,
    }

    impl ResponseSink for Recorder {
        fn write(&mut self, frame: Outbound) -> Result<(), NativeError> {
            let text = match frame {
                Outbound::Bytes(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
                Outbound::Stream { mut reader, chunked } => {
                    let mut body = String::new();
                    reader.read_to_string(&mut body).map_err(NativeError::io)?;
                    format!("stream({chunked}):{body}")
                }
                Outbound::File { len, .. } => format!("file:{len}"),
                Outbound::End { keep_alive } => format!("end:{keep_alive}"),
                Outbound::Abort => "abort".to_string(),
            };
            self.frames.lock().unwrap().push(text);
            Ok(())
        }
    }

    impl Recorder {
        fn frames(&self) -> Vec<String> {
            self.frames.lock().unwrap().clone()
        }
    }

    fn response(version: Version, recorder: &Recorder) -> WireResponse<Recorder> {
        WireResponse::new(version, true, Arc::new(ResponseDefaults::default()), recorder.clone())
    }

    #[test]
    fn test_send_bytes() {
        let recorder = Recorder::default();
        let mut response = response(Version::HTTP_11, &recorder);
        response.set_header(CONTENT_TYPE, HeaderValue::from_static("text/plain")).unwrap();
        response.send(Body::from("hello")).unwrap();

        assert!(response.committed());
        assert!(matches!(response.set_header(CONTENT_TYPE, HeaderValue::from_static("a/b")), Err(NativeError::Committed)));
        assert!(matches!(response.send(Body::empty()), Err(NativeError::Committed)));
        assert!(matches!(response.reset(), Err(NativeError::Committed)));
        drop(response);

        assert_eq!(
            recorder.frames(),
            vec!["HTTP/1.1 200 OK\r\ncontent-type: text/plain\r\ncontent-length: 5\r\n\r\nhello", "end:true"]
        );
    }

    #[test]
    fn test_send_stream_is_chunked() {
        let recorder = Recorder::default();
        let mut response = response(Version::HTTP_11, &recorder);
        response.send(Body::stream(Cursor::new(b"abc".to_vec()))).unwrap();

        assert_eq!(
            recorder.frames(),
            vec!["HTTP/1.1 200 OK\r\ntransfer-encoding: chunked\r\n\r\n", "stream(true):abc", "end:true"]
        );
    }

    #[test]
    fn test_chunks_then_end() {
        let recorder = Recorder::default();
        let mut response = response(Version::HTTP_11, &recorder);
        response.write_chunk(Bytes::from_static(b"one")).unwrap();
        assert!(response.committed());
        response.write_chunk(Bytes::from_static(b"two")).unwrap();
        response.end().unwrap();
        response.end().unwrap();

        assert_eq!(
            recorder.frames(),
            vec![
                "HTTP/1.1 200 OK\r\ntransfer-encoding: chunked\r\n\r\n3\r\none\r\n",
                "3\r\ntwo\r\n",
                "0\r\n\r\n",
                "end:true"
            ]
        );
    }

    #[test]
    fn test_http_10_stream_closes() {
        let recorder = Recorder::default();
        let mut response = response(Version::HTTP_10, &recorder);
        response.write_chunk(Bytes::from_static(b"one")).unwrap();
        response.end().unwrap();

        assert_eq!(recorder.frames(), vec!["HTTP/1.0 200 OK\r\n\r\none", "end:false"]);
    }

    #[test]
    fn test_end_without_writes_is_empty_response() {
        let recorder = Recorder::default();
        let mut response = response(Version::HTTP_11, &recorder);
        response.set_status(StatusCode::NO_CONTENT);
        response.end().unwrap();

        assert_eq!(recorder.frames(), vec!["HTTP/1.1 204 No Content\r\ncontent-length: 0\r\n\r\n", "end:true"]);
    }

    #[test]
    fn test_declared_length_only_kept_for_head() {
        let recorder = Recorder::default();
        let mut get = response(Version::HTTP_11, &recorder);
        get.set_header(CONTENT_LENGTH, HeaderValue::from_static("42")).unwrap();
        get.send(Body::empty()).unwrap();
        assert_eq!(recorder.frames(), vec!["HTTP/1.1 200 OK\r\ncontent-length: 0\r\n\r\n", "end:true"]);

        let recorder = Recorder::default();
        let mut head = response(Version::HTTP_11, &recorder).head_request(true);
        head.set_header(CONTENT_LENGTH, HeaderValue::from_static("42")).unwrap();
        head.end().unwrap();
        assert_eq!(recorder.frames(), vec!["HTTP/1.1 200 OK\r\ncontent-length: 42\r\n\r\n", "end:true"]);
    }

    #[test]
    fn test_reset_and_drop() {
        let recorder = Recorder::default();
        let mut response = response(Version::HTTP_11, &recorder);
        response.set_status(StatusCode::CREATED);
        response.set_header(CONTENT_TYPE, HeaderValue::from_static("text/plain")).unwrap();
        response.reset().unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().is_empty());

        drop(response);
        assert_eq!(recorder.frames(), vec!["abort"]);
    }
}
