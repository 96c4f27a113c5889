use crate::context::Context;
use crate::payload::Payload;
use http::{Method, StatusCode};
use spindle_http::{NativeError, ParseError};
use std::any::Any;
use std::io;
use std::sync::Arc;
use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Failures raised while serving a request.
///
/// Every variant maps to a status code through [`Error::status_code`]; the error handler renders
/// the body. The type is cheap to clone so a failed async value can be observed more than once.
#[derive(Debug, Clone, Error)]
pub enum Error {
    #[error("no route matches {path}")]
    NotFound { path: String },

    #[error("method {method} is not allowed")]
    MethodNotAllowed { method: Method, allow: Vec<Method> },

    #[error("unsupported media type: {0}")]
    UnsupportedMediaType(String),

    #[error("not acceptable: {0}")]
    NotAcceptable(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("{message}")]
    Status { status: StatusCode, message: String },

    #[error(transparent)]
    Native(Arc<NativeError>),

    #[error("response does not support streaming")]
    StreamingUnsupported,

    #[error("handler panicked: {0}")]
    Panic(String),

    #[error(transparent)]
    Handler(Arc<dyn std::error::Error + Send + Sync>),
}

impl Error {
    pub fn status(status: StatusCode, message: impl Into<String>) -> Self {
        Self::Status { status, message: message.into() }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    /// Wraps any application error, it renders as `500 Internal Server Error`.
    pub fn handler<E: Into<BoxError>>(e: E) -> Self {
        Self::Handler(Arc::from(e.into()))
    }

    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = match payload.downcast::<String>() {
            Ok(message) => *message,
            Err(payload) => match payload.downcast::<&'static str>() {
                Ok(message) => (*message).to_string(),
                Err(_unknown) => "unknown panic".to_string(),
            },
        };
        Self::Panic(message)
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::MethodNotAllowed { .. } => StatusCode::METHOD_NOT_ALLOWED,
            Self::UnsupportedMediaType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Self::NotAcceptable(_) => StatusCode::NOT_ACCEPTABLE,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Parse(e) => e.status_code(),
            Self::Status { status, .. } => *status,
            Self::Native(e) => match e.as_ref() {
                NativeError::Parse { source } => source.status_code(),
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::StreamingUnsupported | Self::Panic(_) | Self::Handler(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether the client sent data the application could not use.
    ///
    /// WebSocket routes close with `1007` on these, and with `1011` on everything else.
    pub fn is_bad_data(&self) -> bool {
        match self {
            Self::BadRequest(_) | Self::Parse(_) => true,
            Self::Status { status, .. } => *status == StatusCode::BAD_REQUEST,
            Self::Native(e) => matches!(e.as_ref(), NativeError::Parse { .. }),
            _ => false,
        }
    }
}

impl From<NativeError> for Error {
    fn from(e: NativeError) -> Self {
        Self::Native(Arc::new(e))
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Self::Native(Arc::new(NativeError::io(e)))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::handler(e)
    }
}

/// Failures while assembling routes and the server.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("invalid path pattern {pattern}: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("no adapter or pass-through accepts return type {return_type}")]
    UnsupportedReturnType { return_type: &'static str },

    #[error("invalid option {name}: {reason}")]
    InvalidOption { name: &'static str, reason: String },

    #[error("router must be set")]
    MissingRouter,

    #[error("failed to create worker pool: {source}")]
    WorkerPool {
        #[from]
        source: io::Error,
    },

    #[error("failed to start server: {source}")]
    Start {
        #[from]
        source: NativeError,
    },
}

impl BuildError {
    pub(crate) fn invalid_pattern(pattern: &str, reason: impl Into<String>) -> Self {
        Self::InvalidPattern { pattern: pattern.to_string(), reason: reason.into() }
    }
}

/// Renders the body of an error response.
///
/// The status, the `Allow` header of a 405 and the reset of the response are taken care of by
/// [`Context::send_error`]; the handler only picks the payload.
pub trait ErrorHandler: Send + Sync + 'static {
    fn render(&self, ctx: &Context, error: &Error) -> Payload;
}

impl<F> ErrorHandler for F
where
    F: Fn(&Context, &Error) -> Payload + Send + Sync + 'static,
{
    fn render(&self, ctx: &Context, error: &Error) -> Payload {
        (self)(ctx, error)
    }
}

/// Answers `<status>: <message>` as plain text.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultErrorHandler;

impl ErrorHandler for DefaultErrorHandler {
    fn render(&self, _ctx: &Context, error: &Error) -> Payload {
        Payload::text(format!("{}: {error}", error.status_code().as_u16()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(Error::NotFound { path: "/x".into() }.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(
            Error::MethodNotAllowed { method: Method::PUT, allow: vec![Method::GET] }.status_code(),
            StatusCode::METHOD_NOT_ALLOWED
        );
        assert_eq!(Error::Parse(ParseError::TooLargeBody { max_size: 1 }).status_code(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(Error::from(NativeError::Committed).status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(Error::handler("boom").status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_bad_data() {
        assert!(Error::bad_request("nope").is_bad_data());
        assert!(Error::Parse(ParseError::invalid_body("x")).is_bad_data());
        assert!(!Error::handler("boom").is_bad_data());
        assert!(!Error::StreamingUnsupported.is_bad_data());
    }

    #[test]
    fn test_from_panic() {
        let payload = std::panic::catch_unwind(|| panic!("kaboom {}", 1)).unwrap_err();
        assert!(matches!(Error::from_panic(payload), Error::Panic(message) if message == "kaboom 1"));

        let payload = std::panic::catch_unwind(|| panic!("static")).unwrap_err();
        assert!(matches!(Error::from_panic(payload), Error::Panic(message) if message == "static"));
    }
}
