//! HTTP/1.x wire format shared by the socket backends.
//!
//! - [`decoder`]: request heads and bodies, as a tokio-util [`Decoder`](tokio_util::codec::Decoder)
//! - [`encoder`]: response heads and chunk framing
//! - [`WireRequest`] and [`WireResponse`]: the native contract implemented over a decoded request
//!   and an outbound frame sink

mod decoder;
mod encoder;
mod request;
mod response;

pub use decoder::{DecodedRequest, PayloadSize, RequestDecoder, MAX_HEADER_BYTES, MAX_HEADER_NUM};
pub use encoder::{encode_chunk, encode_head, encode_last_chunk, encode_status, Framing, ResponseDefaults, CONTINUE};
pub use request::{websocket_accept_key, Upgrader, WireRequest};
pub use response::{Outbound, ResponseSink, WireResponse};

use http::header::{CONNECTION, EXPECT, UPGRADE};
use http::request::Parts;
use http::{HeaderMap, Method, Uri, Version};

/// Returns early with an error when a condition does not hold.
macro_rules! ensure {
    ($predicate:expr, $error:expr) => {
        if !$predicate {
            return Err($error);
        }
    };
}

pub(crate) use ensure;

/// A parsed request line and header block.
#[derive(Debug, Clone)]
pub struct RequestHead {
    pub method: Method,
    pub uri: Uri,
    pub version: Version,
    pub headers: HeaderMap,
}

impl RequestHead {
    pub fn path(&self) -> &str {
        self.uri.path()
    }

    pub fn query(&self) -> Option<&str> {
        self.uri.query()
    }

    /// HTTP/1.1 connections persist unless the client asks to close, HTTP/1.0 ones only when
    /// the client asks to keep them.
    pub fn keep_alive(&self) -> bool {
        match self.version {
            Version::HTTP_11 => !self.has_connection_token("close"),
            _ => self.has_connection_token("keep-alive"),
        }
    }

    pub fn expects_continue(&self) -> bool {
        self.version == Version::HTTP_11
            && self.headers.get(EXPECT).is_some_and(|value| value.as_bytes().eq_ignore_ascii_case(b"100-continue"))
    }

    pub fn wants_websocket(&self) -> bool {
        self.method == Method::GET
            && self.has_connection_token("upgrade")
            && self.headers.get(UPGRADE).is_some_and(|value| value.as_bytes().eq_ignore_ascii_case(b"websocket"))
    }

    fn has_connection_token(&self, token: &str) -> bool {
        self.headers
            .get_all(CONNECTION)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|value| value.split(','))
            .any(|t| t.trim().eq_ignore_ascii_case(token))
    }
}

impl From<Parts> for RequestHead {
    fn from(parts: Parts) -> Self {
        Self { method: parts.method, uri: parts.uri, version: parts.version, headers: parts.headers }
    }
}
