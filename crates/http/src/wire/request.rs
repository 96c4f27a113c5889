use crate::error::{NativeError, ParseError};
use crate::params::LazyForm;
use crate::request::{NativeRequest, Upgrade};
use crate::upload::NativeUpload;
use crate::websocket::NativeWebSocket;
use crate::wire::{DecodedRequest, RequestHead};
use bytes::Bytes;
use http::header::SEC_WEBSOCKET_KEY;
use http::{HeaderMap, Method, Version};
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_tungstenite::tungstenite::handshake::derive_accept_key;

/// Switches a connection to the WebSocket protocol, provided by backends that can.
pub trait Upgrader: Send + Sync {
    fn upgrade(&self, head: &RequestHead) -> Result<Box<dyn NativeWebSocket>, NativeError>;
}

/// The `Sec-WebSocket-Accept` value answering a handshake request.
pub fn websocket_accept_key(head: &RequestHead) -> Result<String, ParseError> {
    if !head.wants_websocket() {
        return Err(ParseError::invalid_header("not a websocket handshake"));
    }
    let key = head.headers.get(SEC_WEBSOCKET_KEY).ok_or_else(|| ParseError::invalid_header("missing sec-websocket-key"))?;
    Ok(derive_accept_key(key.as_bytes()))
}

/// A request read from a socket.
pub struct WireRequest {
    head: RequestHead,
    body: Bytes,
    remote: Option<SocketAddr>,
    form: LazyForm,
    upgrader: Option<Box<dyn Upgrader>>,
}

impl WireRequest {
    pub fn new(decoded: DecodedRequest, remote: Option<SocketAddr>, upgrader: Option<Box<dyn Upgrader>>) -> Self {
        Self { head: decoded.head, body: decoded.body, remote, form: LazyForm::default(), upgrader }
    }

    pub fn head(&self) -> &RequestHead {
        &self.head
    }
}

impl fmt::Debug for WireRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WireRequest")
            .field("method", &self.head.method)
            .field("uri", &self.head.uri)
            .field("body", &self.body.len())
            .field("remote", &self.remote)
            .finish_non_exhaustive()
    }
}

impl NativeRequest for WireRequest {
    fn method(&self) -> &Method {
        &self.head.method
    }

    fn path(&self) -> &str {
        self.head.path()
    }

    fn query_string(&self) -> Option<&str> {
        self.head.query()
    }

    fn header_map(&self) -> &HeaderMap {
        &self.head.headers
    }

    fn param_names(&self) -> Result<Vec<String>, ParseError> {
        self.form.get(self.head.query(), &self.head.headers, &self.body).map(|form| form.names())
    }

    fn params(&self, name: &str) -> Result<Vec<String>, ParseError> {
        self.form.get(self.head.query(), &self.head.headers, &self.body).map(|form| form.values(name))
    }

    fn files(&self, name: &str) -> Result<Vec<Arc<dyn NativeUpload>>, ParseError> {
        self.form.get(self.head.query(), &self.head.headers, &self.body).map(|form| form.files(name))
    }

    fn body_bytes(&self) -> Bytes {
        self.body.clone()
    }

    fn remote_address(&self) -> Option<SocketAddr> {
        self.remote
    }

    fn protocol(&self) -> Version {
        self.head.version
    }

    fn secure(&self) -> bool {
        false
    }

    fn upgrade(&self, upgrade: Upgrade) -> Result<Box<dyn NativeWebSocket>, NativeError> {
        match (upgrade, &self.upgrader) {
            (Upgrade::WebSocket, Some(upgrader)) => upgrader.upgrade(&self.head),
            (upgrade, None) => Err(NativeError::UnsupportedUpgrade(upgrade)),
        }
    }

    fn destroy(&self) {
        self.form.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::RequestDecoder;
    use bytes::BytesMut;
    use tokio_util::codec::Decoder;

    fn decode(raw: &str) -> DecodedRequest {
        RequestDecoder::new(1024).decode(&mut BytesMut::from(raw)).unwrap().unwrap()
    }

    #[test]
    fn test_params_from_query_and_body() {
        let request = WireRequest::new(
            decode("POST /form?q=1 HTTP/1.1\r\nContent-Type: application/x-www-form-urlencoded\r\nContent-Length: 7\r\n\r\nname=al"),
            None,
            None,
        );

        assert_eq!(request.param_names().unwrap(), vec!["q", "name"]);
        assert_eq!(request.params("name").unwrap(), vec!["al"]);
        assert!(request.files("name").unwrap().is_empty());
    }

    #[test]
    fn test_upgrade_without_upgrader() {
        let request = WireRequest::new(decode("GET /ws HTTP/1.1\r\n\r\n"), None, None);
        assert!(matches!(
            request.upgrade(Upgrade::WebSocket),
            Err(NativeError::UnsupportedUpgrade(Upgrade::WebSocket))
        ));
    }

    #[test]
    fn test_accept_key() {
        let decoded = decode(
            "GET /chat HTTP/1.1\r\nHost: a\r\nUpgrade: websocket\r\nConnection: keep-alive, Upgrade\r\nSec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\nSec-WebSocket-Version: 13\r\n\r\n",
        );
        assert_eq!(websocket_accept_key(&decoded.head).unwrap(), "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");

        let plain = decode("GET /chat HTTP/1.1\r\n\r\n");
        assert!(websocket_accept_key(&plain.head).is_err());
    }
}
