//! Response head and chunk encoding.

use crate::date::DateService;
use bytes::{Bytes, BytesMut};
use http::header::{CONNECTION, CONTENT_LENGTH, DATE, SERVER, TRANSFER_ENCODING};
use http::{HeaderMap, HeaderValue, StatusCode, Version};

/// The interim response sent to clients waiting on `Expect: 100-continue`.
pub const CONTINUE: &[u8] = b"HTTP/1.1 100 Continue\r\n\r\n";

/// Headers a backend adds to every response that doesn't set them.
#[derive(Debug, Clone, Default)]
pub struct ResponseDefaults {
    pub date: bool,
    pub server: Option<HeaderValue>,
}

/// How the end of a response body is signalled to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    Length(u64),
    Chunked,
    /// The body ends when the connection closes, HTTP/1.0 only.
    UntilClose,
}

impl Framing {
    /// Picks the framing of a response.
    ///
    /// A known body is framed by its own length. A `Content-Length` set by the application
    /// frames a body of unknown length, and an empty body only when answering `HEAD`, which
    /// announces the length of the resource without sending it.
    pub fn select(version: Version, headers: &HeaderMap, body_len: Option<u64>, head_request: bool) -> Framing {
        let declared = headers
            .get(CONTENT_LENGTH)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<u64>().ok());

        match (body_len, declared) {
            (Some(0), Some(declared)) if head_request => Framing::Length(declared),
            (Some(len), _) => Framing::Length(len),
            (None, Some(declared)) => Framing::Length(declared),
            (None, None) if version == Version::HTTP_11 => Framing::Chunked,
            (None, None) => Framing::UntilClose,
        }
    }
}

/// Writes a status line and header block.
///
/// Framing and connection headers set by the application are replaced by the ones matching
/// `framing` and `keep_alive`.
pub fn encode_head(
    dst: &mut BytesMut,
    version: Version,
    status: StatusCode,
    headers: &HeaderMap,
    framing: Framing,
    keep_alive: bool,
    defaults: &ResponseDefaults,
) {
    dst.reserve(256);
    dst.extend_from_slice(if version == Version::HTTP_10 { b"HTTP/1.0 " } else { b"HTTP/1.1 " });
    dst.extend_from_slice(status.as_str().as_bytes());
    dst.extend_from_slice(b" ");
    dst.extend_from_slice(status.canonical_reason().unwrap_or("Unknown").as_bytes());
    dst.extend_from_slice(b"\r\n");

    for (name, value) in headers {
        if name == CONTENT_LENGTH || name == TRANSFER_ENCODING || name == CONNECTION {
            continue;
        }
        put_header(dst, name.as_str(), value.as_bytes());
    }

    match framing {
        Framing::Length(len) => put_header(dst, CONTENT_LENGTH.as_str(), len.to_string().as_bytes()),
        Framing::Chunked => put_header(dst, TRANSFER_ENCODING.as_str(), b"chunked"),
        Framing::UntilClose => {}
    }

    let keep_alive = keep_alive && framing != Framing::UntilClose;
    if version == Version::HTTP_10 && keep_alive {
        put_header(dst, CONNECTION.as_str(), b"keep-alive");
    } else if version != Version::HTTP_10 && !keep_alive {
        put_header(dst, CONNECTION.as_str(), b"close");
    }

    if defaults.date && !headers.contains_key(DATE) {
        let date = DateService::get_global_instance().http_date();
        put_header(dst, DATE.as_str(), date.as_bytes());
    }
    if let Some(server) = defaults.server.as_ref().filter(|_| !headers.contains_key(SERVER)) {
        put_header(dst, SERVER.as_str(), server.as_bytes());
    }

    dst.extend_from_slice(b"\r\n");
}

/// A complete empty response that closes the connection, used when a request can't be read.
pub fn encode_status(version: Version, status: StatusCode, defaults: &ResponseDefaults) -> Bytes {
    let mut dst = BytesMut::new();
    encode_head(&mut dst, version, status, &HeaderMap::new(), Framing::Length(0), false, defaults);
    dst.freeze()
}

pub fn encode_chunk(dst: &mut BytesMut, data: &[u8]) {
    if data.is_empty() {
        // a zero-size chunk would end the body
        return;
    }
    dst.extend_from_slice(format!("{:X}\r\n", data.len()).as_bytes());
    dst.extend_from_slice(data);
    dst.extend_from_slice(b"\r\n");
}

pub fn encode_last_chunk(dst: &mut BytesMut) {
    dst.extend_from_slice(b"0\r\n\r\n");
}

fn put_header(dst: &mut BytesMut, name: &str, value: &[u8]) {
    dst.extend_from_slice(name.as_bytes());
    dst.extend_from_slice(b": ");
    dst.extend_from_slice(value);
    dst.extend_from_slice(b"\r\n");
}
