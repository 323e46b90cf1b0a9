use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use axum::body::Body;
use axum::extract::multipart::MultipartRejection;
use axum::extract::rejection::FormRejection;
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::pages;
use crate::records::{RecordError, RecordService, UploadRequest};

/// Default cap on a single multipart upload.
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 25 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub records: Arc<RecordService>,
    pub metrics: Option<PrometheusHandle>,
    pub max_upload_bytes: usize,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(records: Arc<RecordService>) -> Self {
        Self {
            records,
            metrics: None,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            start_time: Instant::now(),
        }
    }

    fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

type SharedState = Arc<AppState>;

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
    version: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    commit: Option<&'static str>,
    signer: String,
    chain_id: u64,
    hospitals: usize,
    uptime_secs: u64,
}

#[derive(Debug, Default, Deserialize)]
struct DownloadForm {
    #[serde(default)]
    patient_id: String,
    #[serde(default)]
    hospital: String,
}

/// Error rendered as `❌`-prefixed plain text.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new<S: Into<String>>(status: StatusCode, message: S) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn bad_request<S: Into<String>>(message: S) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    fn internal<S: Into<String>>(message: S) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    fn service_unavailable<S: Into<String>>(message: S) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, message)
    }
}

impl From<RecordError> for ApiError {
    fn from(err: RecordError) -> Self {
        let status = match &err {
            RecordError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            RecordError::Unauthorized => StatusCode::FORBIDDEN,
            RecordError::NotFound => StatusCode::NOT_FOUND,
            RecordError::StorageFailure(_) => StatusCode::INTERNAL_SERVER_ERROR,
            RecordError::IntegrityMismatch { .. } => StatusCode::CONFLICT,
            RecordError::LedgerFailure(_) => StatusCode::BAD_GATEWAY,
        };
        Self::new(status, err.to_string())
    }
}

impl From<MultipartRejection> for ApiError {
    fn from(rejection: MultipartRejection) -> Self {
        warn!("Rejected upload request: {}", rejection.body_text());
        Self::new(rejection.status(), rejection.body_text())
    }
}

impl From<FormRejection> for ApiError {
    fn from(rejection: FormRejection) -> Self {
        warn!("Rejected download request: {}", rejection.body_text());
        Self::new(rejection.status(), rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, format!("❌ {}", self.message)).into_response()
    }
}

pub async fn start_server(state: AppState, addr: &str) -> Result<()> {
    let app = build_router(state);
    let listener = bind_listener(addr).await?;
    info!("MedVault listening on {}", listener.local_addr()?);
    axum::serve(listener, app)
        .await
        .context("HTTP server terminated unexpectedly")
}

async fn bind_listener(addr: &str) -> Result<tokio::net::TcpListener> {
    if let Ok(socket_addr) = addr.parse::<SocketAddr>() {
        tokio::net::TcpListener::bind(socket_addr)
            .await
            .with_context(|| format!("failed to bind HTTP listener on {socket_addr}"))
    } else {
        tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind HTTP listener on {addr}"))
    }
}

pub fn build_router(state: AppState) -> Router {
    let upload_limit = state.max_upload_bytes;
    let shared: SharedState = Arc::new(state);

    Router::new()
        .route("/", get(handle_index))
        .route("/upload_page", get(handle_upload_page))
        .route("/download_page", get(handle_download_page))
        .route(
            "/upload",
            post(handle_upload).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route(
            "/download",
            post(handle_download).get(|| async { Redirect::to("/download_page") }),
        )
        .route("/health", get(handle_health))
        .route("/metrics", get(handle_metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(shared)
}

async fn handle_index() -> Html<String> {
    Html(pages::index())
}

async fn handle_upload_page(State(state): State<SharedState>) -> Html<String> {
    Html(pages::upload(state.records.hospitals()))
}

async fn handle_download_page(State(state): State<SharedState>) -> Html<String> {
    Html(pages::download(state.records.hospitals()))
}

async fn handle_upload(
    State(state): State<SharedState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Redirect, ApiError> {
    let mut multipart = multipart?;
    let mut request = UploadRequest::default();

    while let Some(field) = multipart.next_field().await.map_err(|err| {
        warn!("Rejected malformed upload: {}", err);
        ApiError::new(err.status(), format!("Malformed upload: {}", err.body_text()))
    })? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "patient_id" | "hospital" => {
                let value = field
                    .text()
                    .await
                    .map_err(|err| ApiError::bad_request(format!("Unreadable {name}: {err}")))?;
                if name == "patient_id" {
                    request.patient_id = value;
                } else {
                    request.hospital = value;
                }
            }
            "file" => {
                request.file_name = field.file_name().unwrap_or_default().to_string();
                request.bytes = field
                    .bytes()
                    .await
                    .map_err(|err| ApiError::new(err.status(), err.body_text()))?
                    .to_vec();
            }
            _ => {}
        }
    }

    state.records.upload(request).await?;
    Ok(Redirect::to("/"))
}

async fn handle_download(
    State(state): State<SharedState>,
    form: Result<Form<DownloadForm>, FormRejection>,
) -> Result<Response, ApiError> {
    let Form(form) = form?;
    let file = state
        .records
        .download(&form.patient_id, &form.hospital)
        .await?;

    let disposition = format!(
        "attachment; filename=\"{}\"",
        file.name.replace('\\', "\\\\").replace('"', "\\\"")
    );
    let disposition = HeaderValue::from_str(&disposition)
        .map_err(|err| ApiError::internal(format!("Unrepresentable file name: {err}")))?;

    let mut response = Response::new(Body::from(file.bytes));
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    headers.insert(header::CONTENT_DISPOSITION, disposition);
    Ok(response)
}

async fn handle_health(State(state): State<SharedState>) -> Json<HealthResponse> {
    let ledger = state.records.ledger();
    Json(HealthResponse {
        status: "ok",
        service: "medvault",
        version: env!("CARGO_PKG_VERSION"),
        commit: option_env!("GIT_COMMIT_HASH"),
        signer: ledger.signer().to_checksum(),
        chain_id: ledger.chain_id(),
        hospitals: state.records.hospitals().len(),
        uptime_secs: state.uptime_seconds(),
    })
}

async fn handle_metrics(State(state): State<SharedState>) -> Result<Response, ApiError> {
    let handle = state
        .metrics
        .as_ref()
        .ok_or_else(|| ApiError::service_unavailable("Metrics are disabled"))?;

    let mut response = Response::new(Body::from(handle.render()));
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; version=0.0.4"),
    );
    Ok(response)
}
