//! File-backed emulation of the microcontroller's EEPROM region.
//!
//! The whole region lives in memory; `commit` writes it to a sibling
//! temporary file and renames it over the original, so the file on disk is
//! always either the old or the new region.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info};

use crate::calibration::ByteStore;

/// Value of a never-written flash byte.
const ERASED: u8 = 0xFF;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("access of {len} byte(s) at offset {offset} exceeds region size {size}")]
    OutOfRange {
        offset: usize,
        len: usize,
        size: usize,
    },
    #[error("persistent region i/o failed: {0}")]
    Io(#[from] io::Error),
}

/// Check that `offset..offset + len` lies within a region of `size` bytes.
pub(crate) fn check_range(offset: usize, len: usize, size: usize) -> Result<(), StoreError> {
    match offset.checked_add(len) {
        Some(end) if end <= size => Ok(()),
        _ => Err(StoreError::OutOfRange { offset, len, size }),
    }
}

pub struct FileStore {
    path: PathBuf,
    region: Vec<u8>,
    dirty: bool,
}

impl FileStore {
    /// Open (or lazily create) a region of `size` bytes backed by `path`.
    ///
    /// A missing file, or the missing tail of a short one, reads as erased
    /// flash. Extra bytes beyond `size` are ignored.
    pub fn open(path: impl AsRef<Path>, size: usize) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let mut region = vec![ERASED; size];

        match fs::read(&path) {
            Ok(bytes) => {
                let n = bytes.len().min(size);
                region[..n].copy_from_slice(&bytes[..n]);
                debug!(path = %path.display(), bytes = bytes.len(), "persistent region loaded");
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                info!(path = %path.display(), "no persistent region yet, starting erased");
            }
            Err(e) => return Err(e.into()),
        }

        Ok(Self {
            path,
            region,
            dirty: false,
        })
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl ByteStore for FileStore {
    fn read(&mut self, offset: usize, buf: &mut [u8]) -> Result<(), StoreError> {
        check_range(offset, buf.len(), self.region.len())?;
        buf.copy_from_slice(&self.region[offset..offset + buf.len()]);
        Ok(())
    }

    fn write(&mut self, offset: usize, data: &[u8]) -> Result<(), StoreError> {
        check_range(offset, data.len(), self.region.len())?;
        let target = &mut self.region[offset..offset + data.len()];
        if target != data {
            target.copy_from_slice(data);
            self.dirty = true;
        }
        Ok(())
    }

    fn commit(&mut self) -> Result<(), StoreError> {
        // Like EEPROM.commit(): nothing changed, nothing to wear out.
        if !self.dirty {
            return Ok(());
        }
        let tmp = self.temp_path();
        let mut file = File::create(&tmp)?;
        file.write_all(&self.region)?;
        // Data must be on disk before the rename makes it visible.
        file.sync_all()?;
        drop(file);
        fs::rename(&tmp, &self.path)?;
        sync_parent_dir(&self.path)?;
        self.dirty = false;
        debug!(path = %self.path.display(), "persistent region committed");
        Ok(())
    }
}

/// Persist a rename by syncing the directory entry that holds `path`.
fn sync_parent_dir(path: &Path) -> io::Result<()> {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => File::open(dir)?.sync_all(),
        _ => File::open(".")?.sync_all(),
    }
}

// ===========================================================================
// Tests
// ===========================================================================
