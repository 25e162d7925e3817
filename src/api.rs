use std::time::Duration;

use axum::error_handling::HandleErrorLayer;
use axum::extract::multipart::{Field, MultipartError, MultipartRejection};
use axum::extract::rejection::{PathRejection, QueryRejection};
use axum::extract::{DefaultBodyLimit, Multipart, Path, Query, State};
use axum::http::{HeaderValue, StatusCode};
use axum::routing::{get, post};
use axum::{BoxError, Json, Router};
use bytes::{Bytes, BytesMut};
use serde::Deserialize;
use serde_json::json;
use tower::ServiceBuilder;
use tower::timeout::TimeoutLayer;
use tower::timeout::error::Elapsed;
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};

use crate::assets::MatchAssets;
use crate::error::ApiError;
use crate::reference::MapName;
use crate::state::AppState;

/// Room for multipart framing and the text fields on top of the file itself.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

pub fn router(state: AppState) -> Router {
    let body_limit = state.config.max_upload_bytes.saturating_add(MULTIPART_OVERHEAD);
    let timeout = Duration::from_secs(state.config.request_timeout_secs);
    let cors = cors_layer(&state.config.allowed_origins);

    let routes = Router::new()
        .route("/ff14_map_treasure_uploadfile/{selected_map}", post(upload_file))
        .route("/health", get(health))
        .layer(DefaultBodyLimit::max(body_limit));

    with_request_timeout(routes, timeout).layer(cors).with_state(state)
}

/// Fail requests that run past `timeout` with the usual JSON error body.
fn with_request_timeout<S>(router: Router<S>, timeout: Duration) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    router.layer(
        ServiceBuilder::new()
            .layer(HandleErrorLayer::new(middleware_error))
            .layer(TimeoutLayer::new(timeout)),
    )
}

async fn middleware_error(err: BoxError) -> ApiError {
    if err.is::<Elapsed>() {
        ApiError::Timeout
    } else {
        ApiError::Internal(format!("middleware failed: {err}"))
    }
}

/// Only the listed origins may call the service. Methods and headers are
/// mirrored from the preflight because wildcards cannot be combined with
/// credentials.
fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({"status": "ok"}))
}

#[derive(Debug, Default, Deserialize)]
struct UploadParams {
    selected_area: Option<String>,
}

struct Upload {
    file: Bytes,
    selected_area: Option<String>,
}

async fn upload_file(
    State(state): State<AppState>,
    path: Result<Path<String>, PathRejection>,
    query: Result<Query<UploadParams>, QueryRejection>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<MatchAssets>, ApiError> {
    let Path(selected_map) = path.map_err(|e| ApiError::Validation(e.body_text()))?;
    let map = MapName::parse(&selected_map).map_err(|e| ApiError::Validation(e.to_string()))?;
    let Query(params) = query.map_err(|e| ApiError::Validation(e.body_text()))?;
    let multipart = multipart.map_err(|e| ApiError::Validation(e.body_text()))?;

    let upload = read_upload(multipart, state.config.max_upload_bytes).await?;
    let area = params.selected_area.or(upload.selected_area);

    tracing::debug!(%map, area = ?area, bytes = upload.file.len(), "received screenshot");

    // Decoding, hashing and ranking are CPU-bound; keep them off the runtime.
    let assets = tokio::task::spawn_blocking(move || {
        state.locator().locate(&map, &upload.file, area.as_deref())
    })
    .await
    .map_err(|e| ApiError::Internal(format!("lookup task failed: {e}")))??;

    Ok(Json(assets))
}

async fn read_upload(mut multipart: Multipart, limit: usize) -> Result<Upload, ApiError> {
    let mut file = None;
    let mut selected_area = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(e, limit))?
    {
        let name = field.name().map(str::to_owned);
        match name.as_deref() {
            Some("upload_file") => file = Some(read_capped(field, limit).await?),
            Some("selected_area") => {
                let text = field.text().await.map_err(|e| multipart_error(e, limit))?;
                selected_area = Some(text);
            }
            other => tracing::debug!(field = ?other, "ignoring multipart field"),
        }
    }

    let file = file.ok_or_else(|| ApiError::Validation("missing upload_file field".into()))?;
    Ok(Upload { file, selected_area })
}

/// Buffer a file field, giving up as soon as it grows past `limit`.
async fn read_capped(mut field: Field<'_>, limit: usize) -> Result<Bytes, ApiError> {
    let mut buf = BytesMut::new();
    while let Some(chunk) = field.chunk().await.map_err(|e| multipart_error(e, limit))? {
        let received = buf.len() + chunk.len();
        if received > limit {
            tracing::debug!(received, limit, "upload over size limit");
            return Err(ApiError::PayloadTooLarge { limit });
        }
        buf.extend_from_slice(&chunk);
    }
    Ok(buf.freeze())
}

fn multipart_error(err: MultipartError, limit: usize) -> ApiError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge { limit }
    } else {
        ApiError::Validation(err.body_text())
    }
}
