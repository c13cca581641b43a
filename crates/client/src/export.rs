// Export sink: materializes binary export payloads as files.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::info;

/// Writes each export blob to its own timestamped file.
#[derive(Debug, Clone)]
pub struct ExportSink {
    dir: PathBuf,
}

impl ExportSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write `bytes` and return the path written.
    pub fn write(&self, bytes: &[u8]) -> io::Result<PathBuf> {
        fs::create_dir_all(&self.dir)?;
        let stamp = Utc::now().format("%Y%m%dT%H%M%S%.3fZ");
        let mut path = self.dir.join(format!("annolab-export-{stamp}.bin"));
        let mut n = 1;
        while path.exists() {
            path = self.dir.join(format!("annolab-export-{stamp}-{n}.bin"));
            n += 1;
        }
        fs::write(&path, bytes)?;
        info!(path = %path.display(), bytes = bytes.len(), "export written");
        Ok(path)
    }
}
