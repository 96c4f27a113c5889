//! File uploads backed by temporary files.
//!
//! The temporary file lives until [`NativeUpload::destroy`] is called; nothing relies on drop
//! order or finalization to reclaim disk space.

use bytes::Bytes;
use std::fmt::Debug;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::{debug, warn};

pub trait NativeUpload: Send + Sync + Debug {
    /// The form field name.
    fn name(&self) -> &str;

    /// The file name sent by the client, if any.
    fn file_name(&self) -> Option<&str>;

    fn content_type(&self) -> Option<&str>;

    fn size(&self) -> u64;

    fn path(&self) -> &Path;

    /// Reads the whole upload in memory.
    fn bytes(&self) -> io::Result<Bytes>;

    /// Deletes the temporary file. Calling it more than once is a no-op.
    fn destroy(&self);
}

static NEXT_ID: AtomicU64 = AtomicU64::new(0);

/// An upload stored in the system temp directory.
#[derive(Debug)]
pub struct TempFileUpload {
    name: String,
    file_name: Option<String>,
    content_type: Option<String>,
    size: u64,
    path: PathBuf,
    destroyed: AtomicBool,
}

impl TempFileUpload {
    pub fn create(
        name: impl Into<String>,
        file_name: Option<String>,
        content_type: Option<String>,
        data: &[u8],
    ) -> io::Result<Self> {
        let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
        let path = std::env::temp_dir().join(format!("spindle-upload-{}-{id}", std::process::id()));
        fs::write(&path, data)?;
        debug!(path = %path.display(), size = data.len(), "stored upload");

        Ok(Self {
            name: name.into(),
            file_name,
            content_type,
            size: data.len() as u64,
            path,
            destroyed: AtomicBool::new(false),
        })
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }
}

impl NativeUpload for TempFileUpload {
    fn name(&self) -> &str {
        &self.name
    }

    fn file_name(&self) -> Option<&str> {
        self.file_name.as_deref()
    }

    fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn bytes(&self) -> io::Result<Bytes> {
        if self.is_destroyed() {
            return Err(io::Error::new(io::ErrorKind::NotFound, "upload has been destroyed"));
        }
        fs::read(&self.path).map(Bytes::from)
    }

    fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Err(e) = fs::remove_file(&self.path) {
            warn!(cause = %e, path = %self.path.display(), "failed to delete upload");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_destroy_removes_file_once() {
        let upload = TempFileUpload::create("avatar", Some("me.png".into()), None, b"png").unwrap();
        assert!(upload.path().exists());
        assert_eq!(upload.bytes().unwrap(), Bytes::from_static(b"png"));

        upload.destroy();
        assert!(!upload.path().exists());
        assert!(upload.bytes().is_err());

        upload.destroy();
        assert!(upload.is_destroyed());
    }
}
