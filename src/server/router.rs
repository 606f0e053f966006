//! HTTP routes.
//!
//! | Method | Path                  | Delivery                                 |
//! |--------|-----------------------|------------------------------------------|
//! | POST   | `/upload`             | CSV text inline + download URL           |
//! | POST   | `/api/parse`          | JSON records, all artifacts removed      |
//! | GET    | `/download/:filename` | a published CSV file                     |
//! | GET    | `/health`             | liveness probe                           |

use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, Multipart, Path, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tower_http::cors::CorsLayer;

use crate::deliver::{deliver_inline, deliver_structured, resolve_download};
use crate::error::PipelineError;
use crate::pipeline::table::TabularRecord;
use crate::pipeline::upload::{stage_upload, UploadedDocument};
use crate::run::Pipeline;
use crate::server::error::{ApiError, ParseApiError};

/// Body of a successful `POST /upload`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub success: bool,
    pub message: String,
    pub csv_data: String,
    pub download_url: String,
}

/// Body of a successful `POST /api/parse`.
#[derive(Debug, Serialize)]
pub struct ParseResponse {
    pub success: bool,
    pub data: Vec<TabularRecord>,
}

/// Build the service router around a shared pipeline.
pub fn router(pipeline: Arc<Pipeline>) -> Router {
    let body_limit = match pipeline.config().max_upload_bytes {
        0 => DefaultBodyLimit::disable(),
        n => DefaultBodyLimit::max(n),
    };

    Router::new()
        .route("/upload", post(upload))
        .route("/api/parse", post(parse))
        .route("/download/:filename", get(download))
        .route("/health", get(|| async { "ok" }))
        .layer(body_limit)
        .layer(CorsLayer::permissive())
        .with_state(pipeline)
}

async fn upload(
    State(pipeline): State<Arc<Pipeline>>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    let doc = receive_document(&pipeline, &mut multipart).await?;
    let delivery = deliver_inline(&pipeline, &doc).await?;

    Ok(Json(UploadResponse {
        success: true,
        message: "File processed successfully".to_string(),
        csv_data: delivery.csv_data,
        download_url: delivery.download_url,
    }))
}

async fn parse(
    State(pipeline): State<Arc<Pipeline>>,
    mut multipart: Multipart,
) -> Result<Json<ParseResponse>, ParseApiError> {
    let doc = receive_document(&pipeline, &mut multipart).await?;
    let data = deliver_structured(&pipeline, doc).await?;

    Ok(Json(ParseResponse {
        success: true,
        data,
    }))
}

async fn download(
    State(pipeline): State<Arc<Pipeline>>,
    Path(filename): Path<String>,
) -> Result<Response, ApiError> {
    let path = resolve_download(&pipeline.config().output_dir, &filename).await?;
    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|e| PipelineError::io(format!("Failed to read {}", path.display()), e))?;

    tracing::debug!("Serving download {} ({} bytes)", filename, bytes.len());
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{filename}\""),
            ),
        ],
        bytes,
    )
        .into_response())
}

/// Pull the configured file field out of the multipart body and stage it.
///
/// Other fields are ignored. The first matching field wins.
async fn receive_document(
    pipeline: &Pipeline,
    multipart: &mut Multipart,
) -> Result<UploadedDocument, ApiError> {
    let config = pipeline.config();

    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some(config.upload_field.as_str()) {
            continue;
        }
        let declared = field.content_type().map(str::to_string);
        let bytes = field.bytes().await?;
        return Ok(stage_upload(&bytes, declared.as_deref(), config).await?);
    }

    Err(PipelineError::MissingUpload {
        field: config.upload_field.clone(),
    }
    .into())
}
