//! Statement file fed to the local tool on stdin.

use std::fs::File;
use std::io::{self, Write};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use tempfile::TempPath;

/// A uniquely named temporary file holding one statement.
///
/// The file is removed by [`QueryFile::cleanup`] or, failing that, on drop.
/// Cleanup is idempotent and treats an already-missing file as removed.
#[derive(Debug)]
pub struct QueryFile {
    path: Option<TempPath>,
}

impl QueryFile {
    /// Write `statement` to a new file in `dir`.
    ///
    /// The name is `tql.<unix-nanos>.<random>` so concurrent invocations never
    /// collide.
    pub fn create(dir: &Path, statement: &str) -> io::Result<Self> {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        let mut file = tempfile::Builder::new()
            .prefix(&format!("tql.{nanos}."))
            .tempfile_in(dir)?;
        file.write_all(statement.as_bytes())?;
        file.flush()?;
        Ok(Self {
            path: Some(file.into_temp_path()),
        })
    }

    /// Path of the file, or `None` once cleaned up.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Open a fresh read handle for use as a child's stdin.
    pub fn open(&self) -> io::Result<File> {
        match &self.path {
            Some(path) => File::open(path),
            None => Err(io::Error::new(
                io::ErrorKind::NotFound,
                "query file already removed",
            )),
        }
    }

    /// Remove the file. Calling this again, or after the file vanished, is a no-op.
    pub fn cleanup(&mut self) -> io::Result<()> {
        let Some(path) = self.path.take() else {
            return Ok(());
        };
        match path.close() {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

impl Drop for QueryFile {
    fn drop(&mut self) {
        if let Err(e) = self.cleanup() {
            tracing::warn!(error = %e, "failed to remove query file");
        }
    }
}
