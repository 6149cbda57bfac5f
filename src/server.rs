use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::{DefaultBodyLimit, Multipart, Path, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use serde::Serialize;
use tokio::signal;

use crate::batch::ImageInput;
use crate::config::ServerSettings;
use crate::core::db::{Toolkit, ToolkitItem, ToolkitRepository};
use crate::error::CheckError;
use crate::media::MediaStore;
use crate::service::{BatchCheckResponse, CheckResponse, CheckService};

/// Shared application state.
pub struct AppState {
    pub service: CheckService,
    pub start_time: Instant,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub uptime_secs: f64,
    pub detector_available: bool,
}

#[derive(Serialize)]
pub struct ToolkitDetail {
    #[serde(flatten)]
    pub toolkit: Toolkit,
    pub items: Vec<ToolkitItem>,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

pub fn create_router(state: Arc<AppState>, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/predict", post(predict))
        .route("/predict/batch", post(predict_batch))
        .route("/predict/archive", post(predict_archive))
        .route("/media/:filename", get(media))
        .route("/toolkits", get(list_toolkits))
        .route("/toolkits/:id", get(get_toolkit))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .with_state(state)
}

pub async fn serve(service: CheckService, settings: &ServerSettings) -> anyhow::Result<()> {
    let state = Arc::new(AppState {
        service,
        start_time: Instant::now(),
    });

    let app = create_router(state, settings.max_upload_bytes)
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(tower_http::cors::CorsLayer::permissive());

    let addr: SocketAddr = format!("{}:{}", settings.host, settings.port).parse()?;
    tracing::info!(%addr, "starting HTTP server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutdown signal received");
}

/// HTTP status a rejected check call maps to
pub fn status_for(error: &CheckError) -> StatusCode {
    match error {
        CheckError::Validation(_) | CheckError::Archive(_) => StatusCode::BAD_REQUEST,
        CheckError::UnknownToolkit(_) => StatusCode::NOT_FOUND,
        CheckError::Image { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        CheckError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn check_error(error: CheckError) -> ApiError {
    let status = status_for(&error);
    if status.is_server_error() {
        return internal_error(format!("{error:#}"));
    }
    (status, Json(ErrorResponse { error: error.to_string() }))
}

fn bad_request(msg: String) -> ApiError {
    (StatusCode::BAD_REQUEST, Json(ErrorResponse { error: msg }))
}

fn not_found(msg: String) -> ApiError {
    (StatusCode::NOT_FOUND, Json(ErrorResponse { error: msg }))
}

fn internal_error(msg: String) -> ApiError {
    tracing::error!(error = %msg, "internal error");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse { error: msg }),
    )
}

/// Form fields shared by the predict endpoints
#[derive(Default)]
struct PredictForm {
    files: Vec<ImageInput>,
    toolkit_id: Option<i64>,
    confidence: Option<f32>,
}

impl PredictForm {
    async fn read(mut multipart: Multipart, file_fields: &[&str]) -> Result<Self, ApiError> {
        let mut form = PredictForm::default();

        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| bad_request(format!("multipart error: {e}")))?
        {
            let name = field.name().unwrap_or_default().to_string();
            match name.as_str() {
                "toolkit_id" => {
                    let text = field
                        .text()
                        .await
                        .map_err(|e| bad_request(format!("toolkit_id field error: {e}")))?;
                    form.toolkit_id = Some(
                        text.trim()
                            .parse()
                            .map_err(|e| bad_request(format!("invalid toolkit_id: {e}")))?,
                    );
                }
                "confidence" => {
                    let text = field
                        .text()
                        .await
                        .map_err(|e| bad_request(format!("confidence field error: {e}")))?;
                    form.confidence = Some(
                        text.trim()
                            .parse()
                            .map_err(|e| bad_request(format!("invalid confidence: {e}")))?,
                    );
                }
                n if file_fields.contains(&n) => {
                    let filename = field
                        .file_name()
                        .map(str::to_string)
                        .unwrap_or_else(|| format!("upload_{}", form.files.len()));
                    let bytes = field
                        .bytes()
                        .await
                        .map_err(|e| bad_request(format!("file read error: {e}")))?;
                    form.files.push(ImageInput::new(filename, bytes.to_vec()));
                }
                _ => {}
            }
        }

        Ok(form)
    }

    fn toolkit_id(&self) -> Result<i64, ApiError> {
        self.toolkit_id
            .ok_or_else(|| bad_request("missing 'toolkit_id' field".into()))
    }
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        uptime_secs: state.start_time.elapsed().as_secs_f64(),
        detector_available: state.service.detector_available(),
    })
}

/// POST /predict: one `file` plus `toolkit_id` and optional `confidence`.
async fn predict(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<Json<CheckResponse>, ApiError> {
    let form = PredictForm::read(multipart, &["file"]).await?;
    let toolkit_id = form.toolkit_id()?;
    let input = form
        .files
        .into_iter()
        .next()
        .ok_or_else(|| bad_request("missing 'file' field".into()))?;

    state
        .service
        .check_image(input.bytes, &input.filename, toolkit_id, form.confidence)
        .await
        .map(Json)
        .map_err(check_error)
}

/// POST /predict/batch: repeated `files` fields, checked in upload order.
async fn predict_batch(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<Json<BatchCheckResponse>, ApiError> {
    let form = PredictForm::read(multipart, &["files", "file"]).await?;
    let toolkit_id = form.toolkit_id()?;

    state
        .service
        .check_batch(form.files, toolkit_id, form.confidence)
        .await
        .map(Json)
        .map_err(check_error)
}

/// POST /predict/archive: one `archive` field holding a zip, tar or tar.zst.
async fn predict_archive(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<Json<BatchCheckResponse>, ApiError> {
    let form = PredictForm::read(multipart, &["archive", "file"]).await?;
    let toolkit_id = form.toolkit_id()?;
    let archive = form
        .files
        .into_iter()
        .next()
        .ok_or_else(|| bad_request("missing 'archive' field".into()))?;

    state
        .service
        .check_archive(archive.bytes, toolkit_id, form.confidence)
        .await
        .map(Json)
        .map_err(check_error)
}

async fn media(
    State(state): State<Arc<AppState>>,
    Path(filename): Path<String>,
) -> Result<Response, ApiError> {
    let path = state
        .service
        .media()
        .resolve(&filename)
        .ok_or_else(|| not_found(format!("media file {filename} not found")))?;

    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|e| internal_error(format!("failed to read {}: {e}", path.display())))?;

    Ok((
        [(header::CONTENT_TYPE, MediaStore::content_type(&filename))],
        bytes,
    )
        .into_response())
}

async fn list_toolkits(State(state): State<Arc<AppState>>) -> Result<Json<Vec<Toolkit>>, ApiError> {
    state
        .service
        .db()
        .get_toolkits()
        .await
        .map(Json)
        .map_err(|e| internal_error(format!("{e:#}")))
}

async fn get_toolkit(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<ToolkitDetail>, ApiError> {
    let db = state.service.db();
    let toolkit = db
        .get_toolkit(id)
        .await
        .map_err(|e| internal_error(format!("{e:#}")))?
        .ok_or_else(|| not_found(format!("Toolkit {id} not found")))?;
    let items = db
        .get_items(id)
        .await
        .map_err(|e| internal_error(format!("{e:#}")))?;

    Ok(Json(ToolkitDetail { toolkit, items }))
}
