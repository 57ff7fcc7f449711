//! File content access.
//!
//! The engine never reads files itself; it asks an [`UploadSource`] for the
//! byte range of each part. [`BytesSource`] serves in-memory content and
//! [`FileSource`] reads from the local filesystem.

use std::fmt;
use std::io::SeekFrom;
use std::ops::Range;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use crate::error::UploadError;

/// Content of a file to upload.
#[async_trait]
pub trait UploadSource: Send + Sync + fmt::Debug {
    /// File name, used to derive the object key.
    fn name(&self) -> &str;

    /// Size in bytes.
    fn size(&self) -> u64;

    /// MIME type, if known.
    fn content_type(&self) -> Option<&str> {
        None
    }

    /// Read the half-open byte range `range`.
    ///
    /// # Errors
    ///
    /// Returns [`UploadError::Source`] if the range cannot be read in full.
    async fn read_range(&self, range: Range<u64>) -> Result<Bytes, UploadError>;
}

/// In-memory file content.
///
/// # Examples
///
/// ```
/// use ruststack_upload_core::source::{BytesSource, UploadSource};
///
/// let source = BytesSource::new("hello.txt", "hello world").with_content_type("text/plain");
/// assert_eq!(source.size(), 11);
/// assert_eq!(source.content_type(), Some("text/plain"));
/// ```
#[derive(Debug, Clone)]
pub struct BytesSource {
    name: String,
    content_type: Option<String>,
    data: Bytes,
}

impl BytesSource {
    /// Wrap `data` under `name`.
    pub fn new(name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            content_type: None,
            data: data.into(),
        }
    }

    /// Set the MIME type.
    #[must_use]
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }
}

#[async_trait]
impl UploadSource for BytesSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    async fn read_range(&self, range: Range<u64>) -> Result<Bytes, UploadError> {
        let start = usize::try_from(range.start).ok();
        let end = usize::try_from(range.end).ok();
        match (start, end) {
            (Some(start), Some(end)) if start <= end && end <= self.data.len() => {
                Ok(self.data.slice(start..end))
            }
            _ => Err(UploadError::Source(format!(
                "range {}..{} is outside {} bytes of {}",
                range.start,
                range.end,
                self.data.len(),
                self.name
            ))),
        }
    }
}

/// A file on the local filesystem.
///
/// The size is captured when the source is opened; each read opens the file
/// anew so concurrent part reads do not share a cursor.
#[derive(Debug, Clone)]
pub struct FileSource {
    name: String,
    path: PathBuf,
    size: u64,
    content_type: Option<String>,
}

impl FileSource {
    /// Open `path`, recording its current size.
    ///
    /// # Errors
    ///
    /// Returns [`UploadError::Source`] if the file's metadata cannot be read or
    /// the path is not a regular file.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, UploadError> {
        let path = path.as_ref().to_path_buf();
        let metadata = tokio::fs::metadata(&path).await?;
        if !metadata.is_file() {
            return Err(UploadError::Source(format!(
                "{} is not a regular file",
                path.display()
            )));
        }
        let name = path
            .file_name()
            .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned());
        Ok(Self {
            name,
            path,
            size: metadata.len(),
            content_type: None,
        })
    }

    /// Set the MIME type.
    #[must_use]
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Path of the file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl UploadSource for FileSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    async fn read_range(&self, range: Range<u64>) -> Result<Bytes, UploadError> {
        if range.start > range.end || range.end > self.size {
            return Err(UploadError::Source(format!(
                "range {}..{} is outside {} bytes of {}",
                range.start,
                range.end,
                self.size,
                self.path.display()
            )));
        }
        let len = usize::try_from(range.end - range.start)
            .map_err(|_| UploadError::Source("part does not fit in memory".to_owned()))?;

        let mut file = tokio::fs::File::open(&self.path).await?;
        file.seek(SeekFrom::Start(range.start)).await?;
        let mut buf = vec![0_u8; len];
        file.read_exact(&mut buf).await?;
        Ok(Bytes::from(buf))
    }
}
