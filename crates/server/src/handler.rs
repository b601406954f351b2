//! Route handlers and error mapping.

use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::body::Body;
use axum::extract::{DefaultBodyLimit, Path, Query, Request, State};
use axum::http::{HeaderValue, Method, StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use futures_util::TryStreamExt;
use tokio_util::io::StreamReader;
use tracing::{debug, error, warn};

use ferry_protocol::constants::{CHECK_ROUTE, MERGE_ROUTE, UPLOAD_ROUTE};
use ferry_protocol::{CheckFileResponse, CodeResponse, MergeQuery, UploadChunkQuery, UploadedChunk};
use ferry_store::{CheckOutcome, ChunkStore, MergeOutcome, StoreError};

/// Builds the router over a shared store.
pub fn router(store: Arc<ChunkStore>) -> Router {
    Router::new()
        .route(CHECK_ROUTE, get(check_file))
        .route(UPLOAD_ROUTE, post(upload_chunk))
        .route(MERGE_ROUTE, get(merge_chunks))
        // Chunk bodies are streamed to disk, never buffered.
        .layer(DefaultBodyLimit::disable())
        .layer(middleware::from_fn(cors))
        .with_state(store)
}

/// Allows browser clients on any origin; answers preflights directly.
async fn cors(req: Request, next: Next) -> Response {
    let mut resp = if req.method() == Method::OPTIONS {
        StatusCode::NO_CONTENT.into_response()
    } else {
        next.run(req).await
    };
    let headers = resp.headers_mut();
    headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, POST, OPTIONS"),
    );
    headers.insert(header::ACCESS_CONTROL_ALLOW_HEADERS, HeaderValue::from_static("*"));
    resp
}

async fn check_file(
    State(store): State<Arc<ChunkStore>>,
    Path(filename): Path<String>,
) -> Result<Json<CheckFileResponse>, ApiError> {
    let resp = match store.check(&filename).await? {
        CheckOutcome::Exists => CheckFileResponse::exists(),
        CheckOutcome::Missing(records) => CheckFileResponse::missing(
            records
                .into_iter()
                .map(|r| UploadedChunk {
                    chunk_filename: r.chunk_name,
                    size: r.bytes_persisted,
                })
                .collect(),
        ),
    };
    Ok(Json(resp))
}

async fn upload_chunk(
    State(store): State<Arc<ChunkStore>>,
    Path(filename): Path<String>,
    Query(query): Query<UploadChunkQuery>,
    body: Body,
) -> Result<Json<CodeResponse>, ApiError> {
    let reader = StreamReader::new(body.into_data_stream().map_err(std::io::Error::other));

    // Detached so a client abort reaches the receiver as a body error and
    // the chunk file is closed cleanly instead of the future being dropped.
    let persisted = tokio::spawn(async move {
        store
            .receive(
                &filename,
                &query.chunk_filename,
                query.start,
                query.chunk_total,
                reader,
            )
            .await
    })
    .await
    .map_err(ApiError::internal)??;

    debug!(persisted, "upload request finished");
    Ok(Json(CodeResponse::ok()))
}

async fn merge_chunks(
    State(store): State<Arc<ChunkStore>>,
    Path(filename): Path<String>,
    Query(query): Query<MergeQuery>,
) -> Result<Json<CodeResponse>, ApiError> {
    // Runs to completion even if the caller disconnects.
    let outcome = tokio::spawn(async move {
        store
            .merge(&filename, query.chunk_size, query.file_size)
            .await
    })
    .await
    .map_err(ApiError::internal)??;

    if let MergeOutcome::Merged { size } = outcome {
        debug!(size, "merge request finished");
    }
    Ok(Json(CodeResponse::ok()))
}

/// Non-success response: an HTTP status plus a `{code: 1, message}` body.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn internal(e: impl std::fmt::Display) -> Self {
        error!(error = %e, "request task failed");
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        let status = match &e {
            StoreError::InvalidName(_) | StoreError::InvalidRequest(_) | StoreError::Aborted { .. } => {
                StatusCode::BAD_REQUEST
            }
            StoreError::OffsetMismatch { .. }
            | StoreError::ChunkOverflow { .. }
            | StoreError::ChunkBusy(_)
            | StoreError::SessionBusy(_)
            | StoreError::AlreadyMerged(_) => StatusCode::CONFLICT,
            StoreError::SessionNotFound(_) => StatusCode::NOT_FOUND,
            StoreError::IncompleteChunkSet(_) => StatusCode::UNPROCESSABLE_ENTITY,
            StoreError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            error!(error = %e, "store failure");
        } else {
            warn!(error = %e, status = status.as_u16(), "request rejected");
        }
        Self::new(status, e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(CodeResponse::error(self.message))).into_response()
    }
}
