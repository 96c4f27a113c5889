//! The body handed to [`NativeResponse::send`](crate::response::NativeResponse::send).
//!
//! A response body is sent exactly once, through one of the variants below:
//! nothing, a byte buffer, any blocking reader of unknown length, or a file with a known length.

use bytes::Bytes;
use std::fmt;
use std::fs::File;
use std::io::Read;

pub enum Body {
    Empty,
    Bytes(Bytes),
    Stream(Box<dyn Read + Send>),
    File { file: File, len: u64 },
}

impl Body {
    pub fn empty() -> Self {
        Self::Empty
    }

    pub fn once(bytes: impl Into<Bytes>) -> Self {
        let bytes = bytes.into();
        if bytes.is_empty() { Self::Empty } else { Self::Bytes(bytes) }
    }

    pub fn stream<R: Read + Send + 'static>(reader: R) -> Self {
        Self::Stream(Box::new(reader))
    }

    /// Sends an opened file, its length is read from the file metadata.
    pub fn file(file: File) -> std::io::Result<Self> {
        let len = file.metadata()?.len();
        Ok(Self::File { file, len })
    }

    /// The exact length of the body when it is known before writing.
    pub fn exact_len(&self) -> Option<u64> {
        match self {
            Self::Empty => Some(0),
            Self::Bytes(bytes) => Some(bytes.len() as u64),
            Self::Stream(_) => None,
            Self::File { len, .. } => Some(*len),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.exact_len() == Some(0)
    }

    /// Reads the whole body in memory, used by the in-memory backend.
    pub fn into_bytes(self) -> std::io::Result<Bytes> {
        match self {
            Self::Empty => Ok(Bytes::new()),
            Self::Bytes(bytes) => Ok(bytes),
            Self::Stream(mut reader) => {
                let mut buf = Vec::new();
                reader.read_to_end(&mut buf)?;
                Ok(Bytes::from(buf))
            }
            Self::File { file, len } => {
                let mut buf = Vec::with_capacity(usize::try_from(len).unwrap_or_default());
                file.take(len).read_to_end(&mut buf)?;
                Ok(Bytes::from(buf))
            }
        }
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("Empty"),
            Self::Bytes(bytes) => f.debug_tuple("Bytes").field(&bytes.len()).finish(),
            Self::Stream(_) => f.write_str("Stream(..)"),
            Self::File { len, .. } => f.debug_struct("File").field("len", len).finish(),
        }
    }
}

impl From<Bytes> for Body {
    fn from(bytes: Bytes) -> Self {
        Self::once(bytes)
    }
}

impl From<String> for Body {
    fn from(value: String) -> Self {
        Self::once(value)
    }
}

impl From<&'static str> for Body {
    fn from(value: &'static str) -> Self {
        Self::once(Bytes::from_static(value.as_bytes()))
    }
}

impl From<Vec<u8>> for Body {
    fn from(value: Vec<u8>) -> Self {
        Self::once(value)
    }
}

impl From<()> for Body {
    fn from(_: ()) -> Self {
        Self::empty()
    }
}
