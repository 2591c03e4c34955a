use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::Response;
use axum::Json;
use cvdesk_core::{Clock, SystemClock};
use futures::TryStreamExt;
use tokio_util::io::ReaderStream;

use crate::auth::middleware::AuthUser;
use crate::dto::{DownloadLinkResponse, DownloadQuery};
use crate::error::AppError;
use crate::state::AppState;

const INVALID_LINK: &str = "This download link is invalid or has expired";

/// Issues a signed download link for an order the caller owns.
pub async fn create_download_link(
    user: AuthUser,
    State(state): State<AppState>,
    Path(order_id): Path<i64>,
) -> Result<Json<DownloadLinkResponse>, AppError> {
    let order = state
        .config
        .find_order(order_id)
        .ok_or_else(|| AppError::NotFound(format!("Order not found: {order_id}")))?;

    if order.user_id != user.user_id {
        tracing::warn!(
            "User {} requested a download link for order {order_id} owned by {}",
            user.user_id,
            order.user_id
        );
        return Err(AppError::Forbidden("Access denied".to_string()));
    }

    let ttl_minutes = state.config.auth.download_link_ttl_minutes;
    let expires_at = SystemClock.now_secs() + u64::from(ttl_minutes) * 60;
    let url = state.download_signer.signed_download_url(
        &state.config.public_base_url,
        order.id,
        user.user_id,
        &order.file_url,
        ttl_minutes,
    )?;
    tracing::info!("Download link issued for order {order_id} to user {}", user.user_id);

    Ok(Json(DownloadLinkResponse { url, expires_at }))
}

/// Streams the file a download token was issued for.
///
/// The file comes from the token, not the current order record, so a link
/// keeps serving the exact file it was created for.
pub async fn download(
    State(state): State<AppState>,
    Path(order_id): Path<i64>,
    Query(query): Query<DownloadQuery>,
) -> Result<Response, AppError> {
    let token = query
        .token
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AppError::Auth(INVALID_LINK.to_string()))?;

    let claims = state
        .download_signer
        .verify(&token)
        .ok_or_else(|| AppError::Auth(INVALID_LINK.to_string()))?;

    if claims.order_id != order_id {
        tracing::warn!(
            "Download token for order {} presented at order {order_id}",
            claims.order_id
        );
        return Err(AppError::Forbidden(
            "This download link does not belong to this order".to_string(),
        ));
    }

    // The configured display name only applies while the order still points
    // at the same file the token names.
    let file_name = state
        .config
        .find_order(order_id)
        .filter(|o| o.file_url == claims.file_url)
        .and_then(|o| o.file_name.as_deref())
        .map(sanitize_file_name)
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| file_name_from_url(&claims.file_url));
    let (body, content_length) = open_file(&state.http, &claims.file_url).await?;
    tracing::info!(
        "Serving {file_name} for order {order_id} to user {}",
        claims.user_id
    );

    let content_type = mime_guess::from_path(&file_name).first_or_octet_stream();
    let disposition = HeaderValue::try_from(format!("attachment; filename=\"{file_name}\""))
        .map_err(|e| AppError::Internal(format!("Bad file name header: {e}")))?;

    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type.as_ref())
        .header(header::CONTENT_DISPOSITION, disposition);
    if let Some(len) = content_length {
        builder = builder.header(header::CONTENT_LENGTH, len);
    }
    builder
        .body(body)
        .map_err(|e| AppError::Internal(format!("Failed to build response: {e}")))
}

/// Opens `file_url` as a byte stream. Remote URLs go through `http`; anything
/// else is a local path, optionally prefixed with `file://`.
async fn open_file(
    http: &reqwest::Client,
    file_url: &str,
) -> Result<(Body, Option<u64>), AppError> {
    if file_url.starts_with("http://") || file_url.starts_with("https://") {
        let response = http
            .get(file_url)
            .send()
            .await
            .map_err(|e| AppError::Internal(format!("Failed to fetch {file_url}: {e}")))?;
        if !response.status().is_success() {
            tracing::warn!("Storage returned {} for {file_url}", response.status());
            return Err(AppError::NotFound("File is no longer available".to_string()));
        }
        let content_length = response.content_length();
        let stream = response
            .bytes_stream()
            .inspect_err(|e| tracing::warn!("Remote file stream failed: {e}"));
        return Ok((Body::from_stream(stream), content_length));
    }

    let path = file_url.strip_prefix("file://").unwrap_or(file_url);
    let file = tokio::fs::File::open(path).await.map_err(|e| {
        tracing::warn!("Failed to open {path}: {e}");
        AppError::NotFound("File is no longer available".to_string())
    })?;
    let content_length = file.metadata().await.ok().map(|m| m.len());
    let stream = ReaderStream::new(file).inspect_err(|e| tracing::warn!("File read failed: {e}"));
    Ok((Body::from_stream(stream), content_length))
}

/// Last path segment of `file_url`, reduced to header-safe ASCII.
fn file_name_from_url(file_url: &str) -> String {
    let path = file_url.split(['?', '#']).next().unwrap_or(file_url);
    let name = sanitize_file_name(path.rsplit('/').next().unwrap_or_default());
    if name.is_empty() {
        "download".to_string()
    } else {
        name
    }
}

fn sanitize_file_name(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_ascii() && !c.is_ascii_control() && *c != '"' && *c != '\\')
        .collect()
}
