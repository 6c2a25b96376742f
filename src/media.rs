//! Filesystem storage for card images.
//!
//! Files are addressed by their *stored name*: a `/`-separated path relative
//! to the media root, e.g. `cards/blue-eyes.png` or
//! `cards/optimized/blue-eyes_optimized.jpg`. Stored names are what the card
//! records hold; absolute paths never leave this module except for reading.
//!
//! ## Layout
//!
//! ```text
//! media/
//! └── cards/
//!     ├── blue-eyes.png                    # raw uploads
//!     ├── blue-eyes_3fa94c1.png            # same name, different upload
//!     └── optimized/
//!         └── blue-eyes_optimized.jpg      # derivatives
//! ```
//!
//! A name is claimed with `create_new`, so two concurrent saves under the
//! same name can never overwrite each other; the loser is given a
//! digest-suffixed name instead.

use crate::naming::disambiguated_name;
use sha2::{Digest, Sha256};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

/// Directory for raw uploads, relative to the media root.
pub const RAW_DIR: &str = "cards";
/// Directory for derivatives, relative to the media root.
pub const OPTIMIZED_DIR: &str = "cards/optimized";

const MAX_NAME_ATTEMPTS: u32 = 100;

#[derive(Error, Debug)]
pub enum MediaError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Invalid stored name: {0}")]
    InvalidName(String),
    #[error("No free name for {0}")]
    NameExhausted(String),
}

/// Media files rooted at one directory.
#[derive(Debug, Clone)]
pub struct MediaStore {
    root: PathBuf,
}

impl MediaStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a stored name to its absolute path.
    ///
    /// Rejects absolute names and names that climb out of the root.
    pub fn path(&self, stored_name: &str) -> Result<PathBuf, MediaError> {
        let relative = Path::new(stored_name);
        let clean = !stored_name.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !clean {
            return Err(MediaError::InvalidName(stored_name.to_string()));
        }
        Ok(self.root.join(relative))
    }

    pub fn exists(&self, stored_name: &str) -> bool {
        self.path(stored_name).is_ok_and(|p| p.is_file())
    }

    pub fn read(&self, stored_name: &str) -> Result<Vec<u8>, MediaError> {
        Ok(fs::read(self.path(stored_name)?)?)
    }

    /// Store a raw upload under `cards/`.
    pub fn save_raw(&self, filename: &str, bytes: &[u8]) -> Result<String, MediaError> {
        self.save(RAW_DIR, filename, bytes)
    }

    /// Store a derivative under `cards/optimized/`.
    pub fn save_optimized(&self, filename: &str, bytes: &[u8]) -> Result<String, MediaError> {
        self.save(OPTIMIZED_DIR, filename, bytes)
    }

    /// Write `bytes` into `dir` under `filename`, or under a disambiguated
    /// name if `filename` is taken. Returns the stored name.
    pub fn save(&self, dir: &str, filename: &str, bytes: &[u8]) -> Result<String, MediaError> {
        let dir_path = self.path(dir)?;
        fs::create_dir_all(&dir_path)?;

        let digest = format!("{:x}", Sha256::digest(bytes));
        let short = &digest[..7];

        for attempt in 0..MAX_NAME_ATTEMPTS {
            let candidate = match attempt {
                0 => filename.to_string(),
                1 => disambiguated_name(filename, short),
                n => disambiguated_name(filename, &format!("{short}-{n}")),
            };
            let path = dir_path.join(&candidate);
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    let written = file.write_all(bytes).and_then(|()| file.sync_all());
                    drop(file);
                    release_on_error(&path, written)?;
                    let stored = format!("{dir}/{candidate}");
                    debug!(stored = %stored, bytes = bytes.len(), "stored media file");
                    return Ok(stored);
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(MediaError::NameExhausted(filename.to_string()))
    }

    /// Remove a stored file. Returns `false` if it did not exist.
    pub fn delete(&self, stored_name: &str) -> Result<bool, MediaError> {
        let path = self.path(stored_name)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

/// Pass `result` through, removing the claimed file at `path` if it failed.
fn release_on_error(path: &Path, result: io::Result<()>) -> Result<(), MediaError> {
    if let Err(e) = result {
        if let Err(remove) = fs::remove_file(path) {
            warn!(path = %path.display(), error = %remove, "could not remove partial media file");
        }
        return Err(e.into());
    }
    Ok(())
}
