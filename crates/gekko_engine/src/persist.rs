use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use thiserror::Error;

use crate::filename::PageLocation;

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("output directory {path:?} missing or not writable: {source}")]
    OutputDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("output path {0:?} is not a directory")]
    NotADirectory(PathBuf),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// Ensure output directory exists; create if missing.
pub fn ensure_output_dir(dir: &Path) -> Result<(), PersistError> {
    let output_dir = |source| PersistError::OutputDir {
        path: dir.to_path_buf(),
        source,
    };
    if dir.exists() {
        if !fs::metadata(dir).map_err(output_dir)?.is_dir() {
            return Err(PersistError::NotADirectory(dir.to_path_buf()));
        }
    } else {
        fs::create_dir_all(dir).map_err(output_dir)?;
    }
    Ok(())
}

/// Writes page bytes through a temp file in the target directory, then renames
/// it into place, so a reader never sees a half-written page.
#[derive(Debug, Default, Clone, Copy)]
pub struct AtomicFileWriter;

impl AtomicFileWriter {
    pub fn write(&self, location: &PageLocation, content: &[u8]) -> Result<PathBuf, PersistError> {
        ensure_output_dir(&location.dir)?;

        let target = location.path();
        let mut tmp = NamedTempFile::new_in(&location.dir)?;
        tmp.write_all(content)?;
        tmp.flush()?;
        tmp.as_file_mut().sync_all()?;

        // `persist` replaces an existing target.
        tmp.persist(&target).map_err(|e| PersistError::Io(e.error))?;
        Ok(target)
    }
}
