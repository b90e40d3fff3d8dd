//! File-based source element.

use crate::buffer::Buffer;
use crate::caps::Caps;
use crate::element::{BaseSrc, BaseSrcConfig, Element, Source};
use crate::error::Result;
use crate::flow::{FlowError, FlowResult};
use crate::metadata::Metadata;
use std::fs::File;
use std::io::{ErrorKind, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, error, trace};

#[derive(Debug)]
struct OpenFile {
    file: File,
    size: u64,
    /// Current read position, to skip redundant seeks.
    position: u64,
}

/// A seekable source element that reads from a file.
///
/// The file is opened when the element goes from READY to PAUSED and closed
/// on the way back. In push mode it reads [`with_blocksize`](Self::with_blocksize)
/// bytes at a time; in pull mode any range can be requested.
///
/// # Example
///
/// ```rust,no_run
/// use sluice::elements::FileSrc;
///
/// let src = FileSrc::new("input.bin").with_blocksize(16 * 1024).build("filesrc0");
/// assert!(src.static_pad("src").is_some());
/// ```
#[derive(Debug)]
pub struct FileSrc {
    path: PathBuf,
    caps: Caps,
    config: BaseSrcConfig,
    file: Mutex<Option<OpenFile>>,
}

impl FileSrc {
    /// Default block size (64 KB).
    pub const DEFAULT_BLOCKSIZE: usize = 64 * 1024;

    /// Create a new FileSrc that will read from the given path.
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            caps: Caps::any(),
            config: BaseSrcConfig::default().with_blocksize(Self::DEFAULT_BLOCKSIZE),
            file: Mutex::new(None),
        }
    }

    /// Bytes read per buffer in push mode.
    pub fn with_blocksize(mut self, blocksize: usize) -> Self {
        self.config = self.config.with_blocksize(blocksize);
        self
    }

    /// Formats offered on the source pad.
    pub fn with_caps(mut self, caps: Caps) -> Self {
        self.caps = caps;
        self
    }

    /// The file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create the element.
    pub fn build(self, name: impl Into<String>) -> Element {
        let config = self.config.clone();
        BaseSrc::new_element(name, self, config)
    }

    fn file(&self) -> MutexGuard<'_, Option<OpenFile>> {
        self.file.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Source for FileSrc {
    fn caps(&self) -> Caps {
        self.caps.clone()
    }

    fn start(&self) -> Result<()> {
        let file = File::open(&self.path).inspect_err(|err| {
            error!(path = %self.path.display(), error = %err, "cannot open file");
        })?;
        let size = file.metadata()?.len();
        debug!(path = %self.path.display(), size, "opened");
        *self.file() = Some(OpenFile {
            file,
            size,
            position: 0,
        });
        Ok(())
    }

    fn stop(&self) -> Result<()> {
        if self.file().take().is_some() {
            debug!(path = %self.path.display(), "closed");
        }
        Ok(())
    }

    fn is_seekable(&self) -> bool {
        true
    }

    fn size(&self) -> Option<u64> {
        self.file().as_ref().map(|f| f.size)
    }

    fn create(&self, offset: u64, len: usize) -> FlowResult<Buffer> {
        let mut guard = self.file();
        let Some(open) = guard.as_mut() else {
            return Err(FlowError::WrongState);
        };
        if offset >= open.size {
            return Err(FlowError::Eos);
        }
        let len = len.min(usize::try_from(open.size - offset).unwrap_or(usize::MAX));

        if open.position != offset {
            trace!(from = open.position, to = offset, "seeking");
            open.file.seek(SeekFrom::Start(offset)).map_err(|err| {
                error!(path = %self.path.display(), error = %err, "seek failed");
                FlowError::Error
            })?;
            open.position = offset;
        }

        let mut data = vec![0; len];
        let mut filled = 0;
        while filled < len {
            match open.file.read(&mut data[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => {}
                Err(err) => {
                    error!(path = %self.path.display(), error = %err, "read failed");
                    return Err(FlowError::Error);
                }
            }
        }
        open.position = offset + filled as u64;
        if filled == 0 && len > 0 {
            // Shrunk underneath us.
            return Err(FlowError::Eos);
        }
        data.truncate(filled);
        Ok(Buffer::new(
            data,
            Metadata::new().with_byte_range(offset, filled),
        ))
    }
}
