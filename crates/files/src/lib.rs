//! MedVault File Store
//!
//! Keeps uploaded patient files in a single flat directory. A file is named
//! `{patientId}_{originalName}` and that name is also the lookup key, so a
//! patient's file is found by prefix match on `{patientId}_`.

pub mod storage;

pub use storage::{DiskFileStore, FileStore, MemoryFileStore, StoredFile, StoredFileInfo};

use medvault_types::FileNameError;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("invalid file name: {0}")]
    InvalidName(#[from] FileNameError),

    #[error("storage path {} is not a directory", .0.display())]
    NotADirectory(PathBuf),

    #[error("failed to {op} {}: {source}", .path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl StoreError {
    pub(crate) fn io(op: &'static str, path: &Path, source: std::io::Error) -> Self {
        StoreError::Io {
            op,
            path: path.to_path_buf(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
