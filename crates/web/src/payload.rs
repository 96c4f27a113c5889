use crate::error::Error;
use bytes::Bytes;
use http::HeaderValue;
use serde::Serialize;
use spindle_http::Body;
use std::fs::File;
use std::io::{self, Read};

/// A response body together with its default content type.
///
/// The content type only applies when neither the handler nor the route's `produces` list set
/// one.
#[derive(Debug)]
pub struct Payload {
    body: Body,
    content_type: Option<HeaderValue>,
}

impl Payload {
    pub fn new(body: Body) -> Self {
        Self { body, content_type: None }
    }

    pub fn empty() -> Self {
        Self::new(Body::Empty)
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::new(Body::once(text.into())).with_content_type(mime::TEXT_PLAIN_UTF_8.as_ref())
    }

    pub fn bytes(bytes: impl Into<Bytes>) -> Self {
        Self::new(Body::once(bytes)).with_content_type(mime::APPLICATION_OCTET_STREAM.as_ref())
    }

    pub fn json<T: Serialize + ?Sized>(value: &T) -> Result<Self, Error> {
        let json = serde_json::to_vec(value)?;
        Ok(Self::new(Body::once(json)).with_content_type(mime::APPLICATION_JSON.as_ref()))
    }

    pub fn stream<R: Read + Send + 'static>(reader: R) -> Self {
        Self::new(Body::stream(reader)).with_content_type(mime::APPLICATION_OCTET_STREAM.as_ref())
    }

    pub fn file(file: File) -> io::Result<Self> {
        Ok(Self::new(Body::file(file)?).with_content_type(mime::APPLICATION_OCTET_STREAM.as_ref()))
    }

    /// Replaces the default content type, an invalid value is ignored.
    pub fn with_content_type(mut self, content_type: &str) -> Self {
        if let Ok(value) = HeaderValue::from_str(content_type) {
            self.content_type = Some(value);
        }
        self
    }

    pub fn content_type(&self) -> Option<&HeaderValue> {
        self.content_type.as_ref()
    }

    pub fn into_parts(self) -> (Body, Option<HeaderValue>) {
        (self.body, self.content_type)
    }
}

impl Default for Payload {
    fn default() -> Self {
        Self::empty()
    }
}

impl From<()> for Payload {
    fn from(_: ()) -> Self {
        Self::empty()
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Self::text(text)
    }
}

impl From<&'static str> for Payload {
    fn from(text: &'static str) -> Self {
        Self::text(text)
    }
}

impl From<Bytes> for Payload {
    fn from(bytes: Bytes) -> Self {
        Self::bytes(bytes)
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Self::bytes(bytes)
    }
}

impl From<Body> for Payload {
    fn from(body: Body) -> Self {
        Self::new(body)
    }
}

/// Serializes its value as the JSON response body.
#[derive(Debug, Clone)]
pub struct Json<T>(pub T);

impl<T: Serialize> Json<T> {
    pub fn into_payload(self) -> Result<Payload, Error> {
        Payload::json(&self.0)
    }
}
