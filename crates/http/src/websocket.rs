//! The WebSocket side of the native contract.

use crate::error::NativeError;
use bytes::Bytes;
use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

/// A close code with an optional reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseStatus {
    code: u16,
    reason: Cow<'static, str>,
}

impl CloseStatus {
    pub const NORMAL: CloseStatus = CloseStatus::from_static(1000, "Normal");
    pub const GOING_AWAY: CloseStatus = CloseStatus::from_static(1001, "Going away");
    pub const PROTOCOL_ERROR: CloseStatus = CloseStatus::from_static(1002, "Protocol error");
    pub const NOT_ACCEPTABLE: CloseStatus = CloseStatus::from_static(1003, "Not acceptable");
    pub const HARSH_DISCONNECT: CloseStatus = CloseStatus::from_static(1006, "Harsh disconnect");
    pub const BAD_DATA: CloseStatus = CloseStatus::from_static(1007, "Bad data");
    pub const POLICY_VIOLATION: CloseStatus = CloseStatus::from_static(1008, "Policy violation");
    pub const TOO_BIG_TO_PROCESS: CloseStatus = CloseStatus::from_static(1009, "Too big to process");
    pub const REQUIRED_EXTENSION: CloseStatus = CloseStatus::from_static(1010, "Required extension");
    pub const SERVER_ERROR: CloseStatus = CloseStatus::from_static(1011, "Server error");
    pub const SERVICE_RESTARTED: CloseStatus = CloseStatus::from_static(1012, "Service restarted");
    pub const SERVICE_OVERLOAD: CloseStatus = CloseStatus::from_static(1013, "Service overload");

    const fn from_static(code: u16, reason: &'static str) -> Self {
        Self { code, reason: Cow::Borrowed(reason) }
    }

    pub fn new(code: u16, reason: impl Into<Cow<'static, str>>) -> Self {
        Self { code, reason: reason.into() }
    }

    pub fn code(&self) -> u16 {
        self.code
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }
}

impl fmt::Display for CloseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.code, self.reason)
    }
}

/// Callbacks of an upgraded connection.
///
/// After `on_connect`, exactly one of `on_close` or `on_error` ends the connection.
pub trait WebSocketListener: Send + Sync {
    fn on_connect(&self) {}

    fn on_text(&self, _text: String) {}

    fn on_binary(&self, _data: Bytes) {}

    fn on_close(&self, _status: CloseStatus) {}

    fn on_error(&self, _error: NativeError) {}
}

/// A live WebSocket connection.
///
/// Messages sent once the connection is closed are dropped.
pub trait NativeWebSocket: Send + Sync {
    /// Registers the listener, the backend starts reading frames afterwards.
    fn set_listener(&self, listener: Arc<dyn WebSocketListener>);

    fn send_text(&self, text: String);

    fn send_binary(&self, data: Bytes);

    /// Sends a close frame and stops reading.
    fn close(&self, status: CloseStatus);

    /// Stops reading frames until [`NativeWebSocket::resume`].
    fn pause(&self);

    fn resume(&self);

    /// Drops the connection without a close handshake.
    fn terminate(&self);

    fn is_open(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::CloseStatus;

    #[test]
    fn test_close_codes() {
        assert_eq!(CloseStatus::NORMAL.code(), 1000);
        assert_eq!(CloseStatus::BAD_DATA.code(), 1007);
        assert_eq!(CloseStatus::SERVER_ERROR.code(), 1011);
        assert_eq!(CloseStatus::SERVICE_OVERLOAD.code(), 1013);
        assert_eq!(CloseStatus::new(4000, "custom").to_string(), "4000 (custom)");
    }
}
