//! Upload and download workflows tying the file store to the ledger.

use std::sync::Arc;

use medvault_crypto::FileHash;
use medvault_files::{FileStore, StoreError, StoredFile, StoredFileInfo};
use medvault_ledger::{AccessLedger, LedgerError, TxReceipt};
use medvault_types::{
    sanitize_file_name, FileNameError, Hospital, HospitalRegistry, PatientId, PatientIdError,
    RegistryError,
};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

pub const UPLOADS_TOTAL: &str = "medvault_uploads_total";
pub const DOWNLOADS_TOTAL: &str = "medvault_downloads_total";
pub const ACCESS_DENIED_TOTAL: &str = "medvault_access_denied_total";
pub const LEDGER_FAILURES_TOTAL: &str = "medvault_ledger_failures_total";

/// Failures of the record workflows. The display text is what clients see.
#[derive(Debug, Error)]
pub enum RecordError {
    #[error("{0}")]
    InvalidInput(String),

    #[error("Access Denied by Blockchain")]
    Unauthorized,

    #[error("File not found")]
    NotFound,

    #[error("Storage failure: {0}")]
    StorageFailure(#[source] StoreError),

    #[error("Stored file does not match the ledger record")]
    IntegrityMismatch { recorded: String, actual: String },

    #[error("Ledger failure: {0}")]
    LedgerFailure(#[source] LedgerError),
}

pub type Result<T> = std::result::Result<T, RecordError>;

impl RecordError {
    fn missing_details() -> Self {
        RecordError::InvalidInput("Missing details".into())
    }
}

impl From<RegistryError> for RecordError {
    fn from(err: RegistryError) -> Self {
        RecordError::InvalidInput(err.to_string())
    }
}

impl From<PatientIdError> for RecordError {
    fn from(err: PatientIdError) -> Self {
        RecordError::InvalidInput(err.to_string())
    }
}

impl From<FileNameError> for RecordError {
    fn from(err: FileNameError) -> Self {
        RecordError::InvalidInput(err.to_string())
    }
}

impl From<StoreError> for RecordError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::InvalidName(name) => name.into(),
            other => RecordError::StorageFailure(other),
        }
    }
}

impl From<LedgerError> for RecordError {
    fn from(err: LedgerError) -> Self {
        RecordError::LedgerFailure(err)
    }
}

/// Raw upload input as received from a client. Empty strings mean "missing".
#[derive(Debug, Clone, Default)]
pub struct UploadRequest {
    pub patient_id: String,
    pub hospital: String,
    pub file_name: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct UploadOutcome {
    pub patient: PatientId,
    pub hospital: Hospital,
    pub stored: StoredFileInfo,
    pub record_tx: TxReceipt,
    pub grant_tx: TxReceipt,
}

pub struct RecordService {
    hospitals: Arc<HospitalRegistry>,
    store: Arc<dyn FileStore>,
    ledger: Arc<dyn AccessLedger>,
    verify_integrity: bool,
    // Held from the file write until both ledger transactions confirm.
    upload_lock: Mutex<()>,
}

impl RecordService {
    pub fn new(
        hospitals: Arc<HospitalRegistry>,
        store: Arc<dyn FileStore>,
        ledger: Arc<dyn AccessLedger>,
    ) -> Self {
        Self {
            hospitals,
            store,
            ledger,
            verify_integrity: true,
            upload_lock: Mutex::new(()),
        }
    }

    /// Compare stored bytes with the recorded hash on download.
    pub fn with_integrity_check(mut self, enabled: bool) -> Self {
        self.verify_integrity = enabled;
        self
    }

    pub fn hospitals(&self) -> &HospitalRegistry {
        &self.hospitals
    }

    pub fn ledger(&self) -> &dyn AccessLedger {
        self.ledger.as_ref()
    }

    pub async fn upload(&self, request: UploadRequest) -> Result<UploadOutcome> {
        let patient_raw = request.patient_id.trim();
        let hospital_name = request.hospital.trim();
        if patient_raw.is_empty() || hospital_name.is_empty() || request.file_name.is_empty() {
            return Err(RecordError::missing_details());
        }

        let hospital = self.lookup(hospital_name)?;
        let patient = PatientId::parse(patient_raw)?;
        sanitize_file_name(&request.file_name)?;

        let _guard = self.upload_lock.lock().await;

        let stored = self
            .store
            .put(&patient, &request.file_name, &request.bytes)
            .await
            .map_err(|err| {
                error!("Failed to store file for patient {}: {}", patient, err);
                RecordError::from(err)
            })?;
        info!(
            "Stored {} ({} bytes, sha256 {})",
            stored.name, stored.size_bytes, stored.hash
        );

        let record_tx = self
            .ledger_step(&patient, "addRecord", self.ledger.add_record(&patient, &stored.hash))
            .await?;
        let grant_tx = self
            .ledger_step(
                &patient,
                "grantAccess",
                self.ledger.grant_access(&patient, &hospital.address),
            )
            .await?;

        metrics::counter!(UPLOADS_TOTAL).increment(1);
        info!(
            "Patient {} recorded and {} granted access (tx {}, {})",
            patient, hospital.name, record_tx.tx_hash, grant_tx.tx_hash
        );

        Ok(UploadOutcome {
            patient,
            hospital,
            stored,
            record_tx,
            grant_tx,
        })
    }

    pub async fn download(&self, patient_id: &str, hospital: &str) -> Result<StoredFile> {
        let patient_raw = patient_id.trim();
        let hospital_name = hospital.trim();
        if patient_raw.is_empty() || hospital_name.is_empty() {
            return Err(RecordError::missing_details());
        }

        let hospital = self.lookup(hospital_name)?;
        let patient = PatientId::parse(patient_raw)?;

        let allowed = self
            .ledger
            .check_access(&patient, &hospital.address)
            .await
            .map_err(|err| self.ledger_failed(&patient, "checkAccess", err))?;
        if !allowed {
            metrics::counter!(ACCESS_DENIED_TOTAL).increment(1);
            warn!("Access denied: {} for patient {}", hospital.name, patient);
            return Err(RecordError::Unauthorized);
        }

        let file = self
            .store
            .find(&patient)
            .await
            .map_err(|err| {
                error!("Failed to read file for patient {}: {}", patient, err);
                RecordError::from(err)
            })?
            .ok_or(RecordError::NotFound)?;

        if self.verify_integrity {
            self.verify(&patient, &file.hash()).await?;
        }

        metrics::counter!(DOWNLOADS_TOTAL).increment(1);
        info!("Released {} to {}", file.name, hospital.name);
        Ok(file)
    }

    fn lookup(&self, name: &str) -> Result<Hospital> {
        self.hospitals
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownHospital(name.to_string()).into())
    }

    async fn verify(&self, patient: &PatientId, actual: &FileHash) -> Result<()> {
        let recorded = self
            .ledger
            .file_hash(patient)
            .await
            .map_err(|err| self.ledger_failed(patient, "getFileHash", err))?;
        let Some(recorded) = recorded else {
            return Ok(());
        };

        let actual = actual.to_hex();
        let normalized = recorded.trim().trim_start_matches("0x");
        if normalized.eq_ignore_ascii_case(&actual) {
            Ok(())
        } else {
            warn!(
                "Integrity mismatch for patient {}: ledger {} vs stored {}",
                patient, recorded, actual
            );
            Err(RecordError::IntegrityMismatch { recorded, actual })
        }
    }

    async fn ledger_step<F>(&self, patient: &PatientId, call: &str, step: F) -> Result<TxReceipt>
    where
        F: std::future::Future<Output = medvault_ledger::Result<TxReceipt>>,
    {
        step.await.map_err(|err| {
            // The file is already on disk; it stays there.
            warn!("{} failed after storing file for patient {}", call, patient);
            self.ledger_failed(patient, call, err)
        })
    }

    fn ledger_failed(&self, patient: &PatientId, call: &str, err: LedgerError) -> RecordError {
        metrics::counter!(LEDGER_FAILURES_TOTAL).increment(1);
        warn!("Ledger call {} for patient {} failed: {}", call, patient, err);
        RecordError::from(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use medvault_files::{DiskFileStore, MemoryFileStore};
    use medvault_ledger::MemoryLedger;
    use tempfile::TempDir;

    const APOLLO: &str = "Apollo Hospital";
    const AIIMS: &str = "AIIMS Hospital";

    struct Harness {
        service: RecordService,
        ledger: Arc<MemoryLedger>,
        store: Arc<dyn FileStore>,
    }

    fn harness_with(store: Arc<dyn FileStore>) -> Harness {
        let ledger = Arc::new(MemoryLedger::default());
        let service = RecordService::new(
            Arc::new(HospitalRegistry::with_defaults()),
            store.clone(),
            ledger.clone(),
        );
        Harness {
            service,
            ledger,
            store,
        }
    }

    fn harness() -> Harness {
        harness_with(Arc::new(MemoryFileStore::new()))
    }

    fn upload(patient: &str, hospital: &str, name: &str, bytes: &[u8]) -> UploadRequest {
        UploadRequest {
            patient_id: patient.into(),
            hospital: hospital.into(),
            file_name: name.into(),
            bytes: bytes.to_vec(),
        }
    }

    fn pid(raw: &str) -> PatientId {
        PatientId::parse(raw).unwrap()
    }

    #[tokio::test]
    async fn upload_records_hash_and_grants_hospital() {
        let h = harness();
        let outcome = h
            .service
            .upload(upload("p1", APOLLO, "scan.txt", b"hello"))
            .await
            .unwrap();

        assert_eq!(outcome.stored.name, "p1_scan.txt");
        let expected = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";
        assert_eq!(h.ledger.recorded_hash(&pid("p1")).as_deref(), Some(expected));
        assert!(h.ledger.is_granted(&pid("p1"), &outcome.hospital.address));

        let file = h.service.download("p1", APOLLO).await.unwrap();
        assert_eq!(file.bytes, b"hello");
        assert_eq!(file.name, "p1_scan.txt");

        let denied = h.service.download("p1", AIIMS).await.unwrap_err();
        assert!(matches!(denied, RecordError::Unauthorized));
        assert_eq!(denied.to_string(), "Access Denied by Blockchain");
    }

    #[tokio::test]
    async fn missing_fields_are_rejected() {
        let h = harness();
        for request in [
            upload("", APOLLO, "a.txt", b"x"),
            upload("p1", " ", "a.txt", b"x"),
            upload("p1", APOLLO, "", b"x"),
        ] {
            let err = h.service.upload(request).await.unwrap_err();
            assert_eq!(err.to_string(), "Missing details");
        }
        let err = h.service.download("p1", "").await.unwrap_err();
        assert_eq!(err.to_string(), "Missing details");
        assert_eq!(h.ledger.query_count(), 0);
    }

    #[tokio::test]
    async fn unregistered_hospital_never_reaches_ledger() {
        let h = harness();
        let err = h
            .service
            .upload(upload("p1", "Nowhere Clinic", "a.txt", b"x"))
            .await
            .unwrap_err();
        assert!(matches!(err, RecordError::InvalidInput(_)));

        let err = h.service.download("p1", "Nowhere Clinic").await.unwrap_err();
        assert!(matches!(err, RecordError::InvalidInput(_)));
        assert_eq!(h.ledger.query_count(), 0);
        assert!(h.store.list(&pid("p1")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn invalid_patient_or_file_name_is_invalid_input() {
        let h = harness();
        for request in [
            upload("../etc", APOLLO, "a.txt", b"x"),
            upload("p_1", APOLLO, "a.txt", b"x"),
            upload("p1", APOLLO, "dir/..", b"x"),
        ] {
            let err = h.service.upload(request).await.unwrap_err();
            assert!(matches!(err, RecordError::InvalidInput(_)), "got {err:?}");
        }
        assert_eq!(h.ledger.query_count(), 0);
    }

    #[tokio::test]
    async fn access_without_file_is_not_found() {
        let h = harness();
        h.service
            .upload(upload("p1", APOLLO, "a.txt", b"x"))
            .await
            .unwrap();
        let removed = Arc::new(MemoryFileStore::new());
        let service = RecordService::new(
            Arc::new(HospitalRegistry::with_defaults()),
            removed,
            h.ledger.clone(),
        );

        let err = service.download("p1", APOLLO).await.unwrap_err();
        assert!(matches!(err, RecordError::NotFound));
    }

    #[tokio::test]
    async fn reupload_replaces_the_current_file() {
        let dir = TempDir::new().unwrap();
        let store: Arc<dyn FileStore> = Arc::new(DiskFileStore::open(dir.path()).await.unwrap());
        let h = harness_with(store);

        h.service
            .upload(upload("p1", APOLLO, "report.pdf", b"first"))
            .await
            .unwrap();
        h.service
            .upload(upload("p1", AIIMS, "report.pdf", b"second"))
            .await
            .unwrap();

        assert_eq!(h.store.list(&pid("p1")).await.unwrap(), vec!["p1_report.pdf"]);
        // Both grants survive; the latest bytes are served.
        for hospital in [APOLLO, AIIMS] {
            let file = h.service.download("p1", hospital).await.unwrap();
            assert_eq!(file.bytes, b"second");
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_uploads_leave_one_consistent_file() {
        let dir = TempDir::new().unwrap();
        let store: Arc<dyn FileStore> = Arc::new(DiskFileStore::open(dir.path()).await.unwrap());
        let h = harness_with(store);
        let service = Arc::new(h.service);

        let mut tasks = tokio::task::JoinSet::new();
        for i in 0..8 {
            let service = service.clone();
            let name = format!("scan-{i}.txt");
            let request = upload("p1", APOLLO, &name, format!("body {i}").as_bytes());
            tasks.spawn(async move { service.upload(request).await });
        }
        while let Some(joined) = tasks.join_next().await {
            joined.unwrap().unwrap();
        }

        assert_eq!(h.store.list(&pid("p1")).await.unwrap().len(), 1);
        assert_eq!(h.ledger.nonce(), 16);
        // The surviving file is the one whose hash the ledger recorded last.
        let file = service.download("p1", APOLLO).await.unwrap();
        assert_eq!(
            h.ledger.recorded_hash(&pid("p1")),
            Some(FileHash::from_data(&file.bytes).to_hex())
        );
    }

    #[tokio::test]
    async fn tampered_file_fails_integrity_check() {
        let dir = TempDir::new().unwrap();
        let store: Arc<dyn FileStore> = Arc::new(DiskFileStore::open(dir.path()).await.unwrap());
        let h = harness_with(store);
        h.service
            .upload(upload("p1", APOLLO, "a.txt", b"original"))
            .await
            .unwrap();

        std::fs::write(dir.path().join("p1_a.txt"), b"tampered").unwrap();

        let err = h.service.download("p1", APOLLO).await.unwrap_err();
        assert!(matches!(err, RecordError::IntegrityMismatch { .. }));

        let lenient = RecordService::new(
            Arc::new(HospitalRegistry::with_defaults()),
            h.store.clone(),
            h.ledger.clone(),
        )
        .with_integrity_check(false);
        assert_eq!(lenient.download("p1", APOLLO).await.unwrap().bytes, b"tampered");
    }

    #[tokio::test]
    async fn ledger_outage_keeps_file_and_reports_failure() {
        let h = harness();
        h.ledger.set_offline(true);

        let err = h
            .service
            .upload(upload("p1", APOLLO, "a.txt", b"x"))
            .await
            .unwrap_err();
        assert!(matches!(err, RecordError::LedgerFailure(_)));
        assert_eq!(h.store.list(&pid("p1")).await.unwrap(), vec!["p1_a.txt"]);

        let err = h.service.download("p1", APOLLO).await.unwrap_err();
        assert!(matches!(err, RecordError::LedgerFailure(_)));
    }
}
