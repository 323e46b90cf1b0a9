//! Storage backends for uploaded patient files.

use async_trait::async_trait;
use medvault_crypto::FileHash;
use medvault_types::{stored_file_name, PatientId};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::{Result, StoreError};

/// Metadata returned after a file has been persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFileInfo {
    /// Name on disk, `{patientId}_{sanitizedOriginalName}`.
    pub name: String,
    pub size_bytes: u64,
    /// SHA-256 of the bytes as they were read back from the store.
    pub hash: FileHash,
}

/// A stored file together with its content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl StoredFile {
    pub fn hash(&self) -> FileHash {
        FileHash::from_data(&self.bytes)
    }
}

/// Trait for patient file storage backends.
///
/// Every backend keeps a single current file per patient: `put` replaces
/// whatever the patient had before.
#[async_trait]
pub trait FileStore: Send + Sync {
    /// Persist `bytes` for `patient` and hash what was stored.
    async fn put(
        &self,
        patient: &PatientId,
        original_name: &str,
        bytes: &[u8],
    ) -> Result<StoredFileInfo>;

    /// Fetch the patient's current file, if any.
    async fn find(&self, patient: &PatientId) -> Result<Option<StoredFile>>;

    /// Names of every stored file for the patient, sorted.
    async fn list(&self, patient: &PatientId) -> Result<Vec<String>>;
}

/// Flat-directory store; the file name is the lookup key.
#[derive(Debug, Clone)]
pub struct DiskFileStore {
    root: Arc<PathBuf>,
    tmp_counter: Arc<AtomicU64>,
}

impl DiskFileStore {
    /// Open (and create if missing) the storage directory, then verify it is
    /// writable.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|source| StoreError::io("create directory", &root, source))?;

        let meta = tokio::fs::metadata(&root)
            .await
            .map_err(|source| StoreError::io("stat directory", &root, source))?;
        if !meta.is_dir() {
            return Err(StoreError::NotADirectory(root));
        }

        let probe = root.join(".medvault_write_test");
        tokio::fs::write(&probe, b"ok")
            .await
            .map_err(|source| StoreError::io("write probe", &probe, source))?;
        let _ = tokio::fs::remove_file(&probe).await;

        Ok(Self {
            root: Arc::new(root),
            tmp_counter: Arc::new(AtomicU64::new(0)),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn temp_path(&self, final_name: &str) -> PathBuf {
        // Leading dot: never matches a patient prefix.
        let seq = self.tmp_counter.fetch_add(1, Ordering::Relaxed);
        self.root
            .join(format!(".{final_name}.{}.{seq}.tmp", std::process::id()))
    }

    async fn matching_names(&self, prefix: &str) -> Result<Vec<String>> {
        let root = self.root.as_path();
        let mut entries = tokio::fs::read_dir(root)
            .await
            .map_err(|source| StoreError::io("read directory", root, source))?;

        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|source| StoreError::io("read directory", root, source))?
        {
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if !name.starts_with(prefix) {
                continue;
            }
            match entry.file_type().await {
                Ok(file_type) if file_type.is_file() => names.push(name),
                Ok(_) => {}
                Err(err) => warn!("Skipping {}: {}", name, err),
            }
        }
        names.sort();
        Ok(names)
    }
}

#[async_trait]
impl FileStore for DiskFileStore {
    async fn put(
        &self,
        patient: &PatientId,
        original_name: &str,
        bytes: &[u8],
    ) -> Result<StoredFileInfo> {
        let name = stored_file_name(patient, original_name)?;
        let final_path = self.root.join(&name);
        let tmp_path = self.temp_path(&name);

        tokio::fs::write(&tmp_path, bytes)
            .await
            .map_err(|source| StoreError::io("write", &tmp_path, source))?;
        if let Err(source) = tokio::fs::rename(&tmp_path, &final_path).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(StoreError::io("rename", &final_path, source));
        }

        // Hash what is on disk, not what we were handed.
        let written = tokio::fs::read(&final_path)
            .await
            .map_err(|source| StoreError::io("read back", &final_path, source))?;
        let hash = FileHash::from_data(&written);

        for stale in self.matching_names(&patient.file_prefix()).await? {
            if stale == name {
                continue;
            }
            let stale_path = self.root.join(&stale);
            match tokio::fs::remove_file(&stale_path).await {
                Ok(()) => debug!("Removed superseded file {}", stale),
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(source) => return Err(StoreError::io("remove", &stale_path, source)),
            }
        }

        Ok(StoredFileInfo {
            name,
            size_bytes: written.len() as u64,
            hash,
        })
    }

    async fn find(&self, patient: &PatientId) -> Result<Option<StoredFile>> {
        let mut names = self.matching_names(&patient.file_prefix()).await?;
        if names.len() > 1 {
            warn!(
                "Patient {} has {} stored files; serving the last by name",
                patient,
                names.len()
            );
        }
        let Some(name) = names.pop() else {
            return Ok(None);
        };

        let path = self.root.join(&name);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(StoredFile { name, bytes })),
            // Replaced between listing and reading.
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StoreError::io("read", &path, source)),
        }
    }

    async fn list(&self, patient: &PatientId) -> Result<Vec<String>> {
        self.matching_names(&patient.file_prefix()).await
    }
}

/// In-memory file storage (for testing and ephemeral deployments).
#[derive(Clone, Default)]
pub struct MemoryFileStore {
    files: Arc<RwLock<BTreeMap<String, Vec<u8>>>>,
}

impl MemoryFileStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total stored files.
    pub fn count(&self) -> usize {
        self.files.read().len()
    }
}

#[async_trait]
impl FileStore for MemoryFileStore {
    async fn put(
        &self,
        patient: &PatientId,
        original_name: &str,
        bytes: &[u8],
    ) -> Result<StoredFileInfo> {
        let name = stored_file_name(patient, original_name)?;
        let prefix = patient.file_prefix();

        let mut files = self.files.write();
        files.retain(|existing, _| !existing.starts_with(&prefix));
        files.insert(name.clone(), bytes.to_vec());

        Ok(StoredFileInfo {
            name,
            size_bytes: bytes.len() as u64,
            hash: FileHash::from_data(bytes),
        })
    }

    async fn find(&self, patient: &PatientId) -> Result<Option<StoredFile>> {
        let prefix = patient.file_prefix();
        let files = self.files.read();
        Ok(files
            .iter()
            .rev()
            .find(|(name, _)| name.starts_with(&prefix))
            .map(|(name, bytes)| StoredFile {
                name: name.clone(),
                bytes: bytes.clone(),
            }))
    }

    async fn list(&self, patient: &PatientId) -> Result<Vec<String>> {
        let prefix = patient.file_prefix();
        let files = self.files.read();
        Ok(files
            .keys()
            .filter(|name| name.starts_with(&prefix))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use medvault_types::FileNameError;

    fn pid(raw: &str) -> PatientId {
        PatientId::parse(raw).unwrap()
    }

    #[tokio::test]
    async fn test_put_and_find() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskFileStore::open(dir.path()).await.unwrap();

        let info = store.put(&pid("p1"), "scan.txt", b"hello").await.unwrap();
        assert_eq!(info.name, "p1_scan.txt");
        assert_eq!(info.size_bytes, 5);
        assert_eq!(info.hash, FileHash::from_data(b"hello"));
        assert!(dir.path().join("p1_scan.txt").is_file());

        let found = store.find(&pid("p1")).await.unwrap().unwrap();
        assert_eq!(found.name, "p1_scan.txt");
        assert_eq!(found.bytes, b"hello");
        assert_eq!(found.hash(), info.hash);
    }

    #[tokio::test]
    async fn test_reupload_keeps_single_current_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskFileStore::open(dir.path()).await.unwrap();
        let patient = pid("p1");

        store.put(&patient, "scan.txt", b"v1").await.unwrap();
        store.put(&patient, "scan.txt", b"v2").await.unwrap();
        assert_eq!(store.list(&patient).await.unwrap(), vec!["p1_scan.txt"]);
        assert_eq!(store.find(&patient).await.unwrap().unwrap().bytes, b"v2");

        store.put(&patient, "other name.pdf", b"v3").await.unwrap();
        assert_eq!(store.list(&patient).await.unwrap(), vec!["p1_other_name.pdf"]);
        assert_eq!(store.find(&patient).await.unwrap().unwrap().bytes, b"v3");
    }

    #[tokio::test]
    async fn test_patients_do_not_collide() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskFileStore::open(dir.path()).await.unwrap();

        store.put(&pid("p1"), "a.txt", b"one").await.unwrap();
        store.put(&pid("p10"), "a.txt", b"ten").await.unwrap();

        assert_eq!(store.find(&pid("p1")).await.unwrap().unwrap().bytes, b"one");
        assert_eq!(store.find(&pid("p10")).await.unwrap().unwrap().bytes, b"ten");
        assert!(store.find(&pid("p2")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_find_picks_last_name_when_several_exist() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("p1_a.txt"), b"a").unwrap();
        std::fs::write(dir.path().join("p1_b.txt"), b"b").unwrap();
        let store = DiskFileStore::open(dir.path()).await.unwrap();

        let found = store.find(&pid("p1")).await.unwrap().unwrap();
        assert_eq!(found.name, "p1_b.txt");
    }

    #[tokio::test]
    async fn test_directories_and_temp_files_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("p1_dir")).unwrap();
        std::fs::write(dir.path().join(".p1_x.txt.1.0.tmp"), b"partial").unwrap();
        let store = DiskFileStore::open(dir.path()).await.unwrap();

        assert!(store.find(&pid("p1")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_invalid_file_name_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskFileStore::open(dir.path()).await.unwrap();

        let err = store.put(&pid("p1"), "uploads/", b"x").await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidName(FileNameError::Empty)));
    }

    #[tokio::test]
    async fn test_open_creates_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        let store = DiskFileStore::open(&nested).await.unwrap();
        assert_eq!(store.root(), nested.as_path());
        assert!(nested.is_dir());
    }

    #[tokio::test]
    async fn test_open_rejects_regular_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("not-a-dir");
        std::fs::write(&file, b"x").unwrap();
        assert!(DiskFileStore::open(&file).await.is_err());
    }

    #[tokio::test]
    async fn test_memory_store_replaces_patient_file() {
        let store = MemoryFileStore::new();
        store.put(&pid("p1"), "a.txt", b"1").await.unwrap();
        store.put(&pid("p1"), "b.txt", b"2").await.unwrap();
        store.put(&pid("p2"), "a.txt", b"3").await.unwrap();

        assert_eq!(store.count(), 2);
        let found = store.find(&pid("p1")).await.unwrap().unwrap();
        assert_eq!(found.name, "p1_b.txt");
        assert_eq!(found.bytes, b"2");
    }
}
