//! MedVault HTTP gateway: HTML forms, multipart upload and ledger-gated
//! download of patient files.

pub mod pages;
pub mod records;
pub mod server;

pub use records::{RecordError, RecordService, UploadOutcome, UploadRequest};
pub use server::{build_router, start_server, ApiError, AppState, DEFAULT_MAX_UPLOAD_BYTES};
