//! Persistence layer for files shared with other processes
//!
//! Writers replace whole files through a temp file and a rename, so a reader
//! never sees a half-written document. Readers treat a missing or malformed
//! file as "no data yet". Flag files are one-shot requests: whoever removes
//! the file first owns the request.

use crate::error::{GatewayError, Result};
use crate::logging::{StructuredLogger, get_logger};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::io::Write;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

/// One JSON document on disk
pub struct StateFile<T> {
    path: PathBuf,
    logger: StructuredLogger,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Serialize + DeserializeOwned> StateFile<T> {
    /// Create a handle for the file at `path`
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            logger: get_logger("persistence"),
            _marker: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the document, `None` when there is nothing usable
    pub fn load(&self) -> Result<Option<T>> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(GatewayError::persistence(format!(
                    "Cannot read {}: {}",
                    self.path.display(),
                    e
                )));
            }
        };

        match serde_json::from_str(&contents) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                self.logger.warn(&format!(
                    "Ignoring malformed {}: {}",
                    self.path.display(),
                    e
                ));
                Ok(None)
            }
        }
    }

    /// Atomically replace the document
    pub fn save(&self, value: &T) -> Result<()> {
        let contents = serde_json::to_vec_pretty(value)?;
        write_atomic(&self.path, &contents).map_err(|e| {
            GatewayError::persistence(format!("Cannot write {}: {}", self.path.display(), e))
        })?;
        self.logger
            .trace(&format!("Saved {}", self.path.display()));
        Ok(())
    }
}

fn write_atomic(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }

    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);

    {
        let mut file = std::fs::File::create(&tmp_path)?;
        file.write_all(contents)?;
        file.flush()?;
        file.sync_all()?;
    }
    std::fs::rename(&tmp_path, path)
}

/// Presence-only request file
#[derive(Debug, Clone)]
pub struct FlagFile {
    path: PathBuf,
}

impl FlagFile {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_raised(&self) -> bool {
        self.path.exists()
    }

    /// Consume the flag, returning whether it was raised
    pub fn take(&self) -> Result<bool> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(GatewayError::persistence(format!(
                "Cannot remove {}: {}",
                self.path.display(),
                e
            ))),
        }
    }

    /// Raise the flag
    pub fn raise(&self) -> Result<()> {
        write_atomic(&self.path, b"1").map_err(|e| {
            GatewayError::persistence(format!("Cannot create {}: {}", self.path.display(), e))
        })
    }
}
