use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use update_proxy::{ProxiedAsset, UpdateCheckRequest, UpdateStatus};

use crate::AppState;

/// Headers never relayed from upstream. `content-length` is recomputed.
const HOP_BY_HOP: &[&str] = &["connection", "transfer-encoding", "keep-alive", "content-length"];

#[derive(Debug, Deserialize)]
pub(crate) struct DownloadQuery {
    asset: Option<String>,
    filename: Option<String>,
}

pub(crate) async fn check(
    State(state): State<AppState>,
    Path((platform, arch, version)): Path<(String, String, String)>,
    headers: HeaderMap,
) -> Response {
    let root = root_url(&state, &headers);
    let request = UpdateCheckRequest::new(platform, arch, version);

    match state.service.check_for_update(&request, &root).await {
        UpdateStatus::Available(manifest) => Json(*manifest).into_response(),
        UpdateStatus::UpToDate => StatusCode::NO_CONTENT.into_response(),
        UpdateStatus::NotFound(reason) => {
            tracing::debug!(
                platform = %request.platform,
                arch = %request.arch,
                version = %request.version,
                %reason,
                "update check not found"
            );
            StatusCode::NOT_FOUND.into_response()
        }
    }
}

pub(crate) async fn download_asset(
    State(state): State<AppState>,
    Query(query): Query<DownloadQuery>,
) -> Response {
    let (Some(asset), Some(filename)) = (query.asset, query.filename) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    match state.service.download_asset(&asset, &filename).await {
        Some(proxied) => asset_response(proxied),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

pub(crate) async fn download_latest(
    State(state): State<AppState>,
    Path((platform, arch)): Path<(String, String)>,
) -> Response {
    let Some(resolved) = state.service.latest_download(&platform, &arch).await else {
        tracing::debug!(%platform, %arch, "no installer for download");
        return StatusCode::NOT_FOUND.into_response();
    };
    match state
        .service
        .download_asset(&resolved.download_url, &resolved.filename)
        .await
    {
        Some(proxied) => asset_response(proxied),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

pub(crate) async fn latest(State(state): State<AppState>) -> Response {
    match state.service.latest_release().await {
        Some(release) => Json(release).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

pub(crate) async fn ping() -> String {
    format!("pong {}", chrono::Utc::now().to_rfc3339())
}

pub(crate) async fn not_found() -> StatusCode {
    StatusCode::NOT_FOUND
}

/// Configured public URL, else `<x-forwarded-proto or http>://<Host>`.
fn root_url(state: &AppState, headers: &HeaderMap) -> String {
    if let Some(url) = &state.public_url {
        return url.clone();
    }
    let proto = headers
        .get("x-forwarded-proto")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or("http");
    let host = headers
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    format!("{proto}://{host}")
}

fn asset_response(asset: ProxiedAsset) -> Response {
    tracing::debug!(source = ?asset.source, bytes = asset.body.len(), "relaying asset");

    let mut response = Response::new(Body::from(asset.body));
    let headers = response.headers_mut();
    for (name, value) in &asset.headers {
        if HOP_BY_HOP.iter().any(|hop| name.eq_ignore_ascii_case(hop)) {
            continue;
        }
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_bytes(value.as_bytes()),
        ) {
            (Ok(name), Ok(value)) => {
                headers.append(name, value);
            }
            _ => tracing::debug!(header = %name, "dropping unrepresentable header"),
        }
    }
    response
}
