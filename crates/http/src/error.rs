use std::io;
use thiserror::Error;

use crate::request::Upgrade;

/// Errors raised by a backend while serving the native contract.
#[derive(Debug, Error)]
pub enum NativeError {
    #[error("request error: {source}")]
    Parse {
        #[from]
        source: ParseError,
    },

    #[error("upgrade to {0} is not supported by this server")]
    UnsupportedUpgrade(Upgrade),

    #[error("response already committed")]
    Committed,

    #[error("connection closed")]
    Closed,

    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

impl NativeError {
    pub fn io<E: Into<io::Error>>(e: E) -> Self {
        Self::Io { source: e.into() }
    }
}

/// Failures while reading a request: the head, the body or the parameters derived from them.
///
/// Every variant is a client error, backends answer them with `400 Bad Request`
/// (or `413 Payload Too Large` for [`ParseError::TooLargeBody`]).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("header size too large, current: {current_size} exceed the limit {max_size}")]
    TooLargeHeader { current_size: usize, max_size: usize },

    #[error("header number exceed the limit {max_num}")]
    TooManyHeaders { max_num: usize },

    #[error("invalid header: {reason}")]
    InvalidHeader { reason: String },

    #[error("invalid http version: {0:?}")]
    InvalidVersion(Option<u8>),

    #[error("invalid http method")]
    InvalidMethod,

    #[error("invalid http uri")]
    InvalidUri,

    #[error("invalid content-length header: {reason}")]
    InvalidContentLength { reason: String },

    #[error("invalid body: {reason}")]
    InvalidBody { reason: String },

    #[error("body size exceed the limit {max_size}")]
    TooLargeBody { max_size: usize },

    #[error("invalid parameters: {reason}")]
    InvalidParams { reason: String },

    #[error("invalid multipart body: {reason}")]
    InvalidMultipart { reason: String },

    #[error("io error while reading request: {reason}")]
    Io { reason: String },
}

impl From<io::Error> for ParseError {
    fn from(e: io::Error) -> Self {
        Self::Io { reason: e.to_string() }
    }
}

impl ParseError {
    pub fn too_large_header(current_size: usize, max_size: usize) -> Self {
        Self::TooLargeHeader { current_size, max_size }
    }

    pub fn too_many_headers(max_num: usize) -> Self {
        Self::TooManyHeaders { max_num }
    }

    pub fn invalid_header<S: ToString>(str: S) -> Self {
        Self::InvalidHeader { reason: str.to_string() }
    }

    pub fn invalid_body<S: ToString>(str: S) -> Self {
        Self::InvalidBody { reason: str.to_string() }
    }

    pub fn invalid_content_length<S: ToString>(str: S) -> Self {
        Self::InvalidContentLength { reason: str.to_string() }
    }

    pub fn invalid_params<S: ToString>(str: S) -> Self {
        Self::InvalidParams { reason: str.to_string() }
    }

    pub fn invalid_multipart<S: ToString>(str: S) -> Self {
        Self::InvalidMultipart { reason: str.to_string() }
    }

    /// The status a backend answers with when this error stops a request.
    pub fn status_code(&self) -> http::StatusCode {
        match self {
            Self::TooLargeBody { .. } => http::StatusCode::PAYLOAD_TOO_LARGE,
            Self::TooLargeHeader { .. } | Self::TooManyHeaders { .. } => {
                http::StatusCode::REQUEST_HEADER_FIELDS_TOO_LARGE
            }
            _ => http::StatusCode::BAD_REQUEST,
        }
    }
}
