//! Audio output seam

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::{Error, Result};

/// Destination for synthesized speech
///
/// `play` starts output and returns without waiting for it to finish.
/// Starting a new playback replaces whatever was playing before.
pub trait AudioSink: Send + Sync {
    /// Start playing `audio`
    ///
    /// # Errors
    ///
    /// Returns error if the payload cannot be decoded or output cannot start
    fn play(&self, audio: Vec<u8>) -> Result<()>;

    /// Whether output is still in progress
    fn is_playing(&self) -> bool {
        false
    }
}

/// Writes each payload to a WAV file instead of playing it
pub struct FileSink {
    dir: PathBuf,
    seq: AtomicU64,
    last: Mutex<Option<PathBuf>>,
}

impl FileSink {
    /// Create a sink writing into `dir`, creating it if needed
    ///
    /// # Errors
    ///
    /// Returns error if the directory cannot be created
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            seq: AtomicU64::new(0),
            last: Mutex::new(None),
        })
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the most recently written file
    #[must_use]
    pub fn last_written(&self) -> Option<PathBuf> {
        self.last.lock().ok().and_then(|last| last.clone())
    }
}

impl AudioSink for FileSink {
    fn play(&self, audio: Vec<u8>) -> Result<()> {
        let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S%.3f");
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let path = self.dir.join(format!("reply-{stamp}-{seq:03}.wav"));

        std::fs::write(&path, &audio)?;
        tracing::info!(path = %path.display(), bytes = audio.len(), "wrote reply audio");

        let mut last = self
            .last
            .lock()
            .map_err(|_| Error::Audio("file sink state poisoned".to_string()))?;
        *last = Some(path);
        Ok(())
    }
}
