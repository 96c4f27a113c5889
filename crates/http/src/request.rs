//! The request side of the native contract.
//!
//! A [`NativeRequest`] is what a backend hands to the application for each exchange. Header
//! access is provided on top of [`NativeRequest::header_map`]; parameters, uploads and cookies
//! are parsed lazily by the backend and cached for the lifetime of the request.

use crate::error::{NativeError, ParseError};
use crate::params;
use crate::upload::NativeUpload;
use crate::websocket::NativeWebSocket;
use bytes::{Buf, Bytes};
use http::{HeaderMap, HeaderName, HeaderValue, Method, Version};
use std::collections::HashMap;
use std::fmt;
use std::io::Read;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

/// Protocols a request can be upgraded to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Upgrade {
    WebSocket,
}

impl fmt::Display for Upgrade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WebSocket => f.write_str("websocket"),
        }
    }
}

pub trait NativeRequest: Send + Sync {
    fn method(&self) -> &Method;

    /// The request path as received, without the query string.
    fn path(&self) -> &str;

    fn query_string(&self) -> Option<&str>;

    fn header_map(&self) -> &HeaderMap;

    fn header(&self, name: &str) -> Option<&HeaderValue> {
        self.header_map().get(name)
    }

    /// Every value of a header, in the order received.
    fn headers(&self, name: &str) -> Vec<&HeaderValue> {
        self.header_map().get_all(name).iter().collect()
    }

    fn header_names(&self) -> Vec<&HeaderName> {
        self.header_map().keys().collect()
    }

    fn cookies(&self) -> HashMap<String, String> {
        params::parse_cookies(self.header_map())
    }

    /// Names of the query, form and multipart parameters.
    fn param_names(&self) -> Result<Vec<String>, ParseError>;

    /// Every value of a parameter, query values first.
    fn params(&self, name: &str) -> Result<Vec<String>, ParseError>;

    /// Uploaded files of a multipart field.
    fn files(&self, name: &str) -> Result<Vec<Arc<dyn NativeUpload>>, ParseError>;

    /// The request body, fully read by the backend before the exchange starts.
    fn body_bytes(&self) -> Bytes;

    fn body(&self) -> Box<dyn Read + Send> {
        Box::new(self.body_bytes().reader())
    }

    fn remote_address(&self) -> Option<SocketAddr>;

    fn ip(&self) -> Option<IpAddr> {
        self.remote_address().map(|addr| addr.ip())
    }

    fn protocol(&self) -> Version;

    fn secure(&self) -> bool;

    /// Switches the connection to another protocol.
    ///
    /// Backends that can't upgrade answer [`NativeError::UnsupportedUpgrade`].
    fn upgrade(&self, upgrade: Upgrade) -> Result<Box<dyn NativeWebSocket>, NativeError>;

    /// Releases per-request resources such as temporary upload files.
    fn destroy(&self);
}
