//! End-to-end tests against a mock GitHub served by axum.
//!
//! Each test binds its own listener on an ephemeral port, points a
//! `GithubClient` at it and drives the service the way the HTTP layer does.

use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use reqwest::Url;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use update_proxy::{
    AssetSource, CacheClient, GithubClient, ManualClock, ProxyConfig, Upstream, UpdateCheckRequest,
    UpdateService, UpdateStatus,
};

#[derive(Default)]
struct MockGithub {
    fail: AtomicBool,
    release_hits: AtomicUsize,
    asset_hits: AtomicUsize,
    seen: Mutex<Vec<HeaderMap>>,
    base: Mutex<String>,
}

impl MockGithub {
    fn set_failing(&self, failing: bool) {
        self.fail.store(failing, Ordering::SeqCst);
    }

    fn last_headers(&self) -> HeaderMap {
        self.seen.lock().unwrap().last().cloned().expect("a request was made")
    }
}

async fn latest_release(
    State(mock): State<Arc<MockGithub>>,
    Path((owner, repo)): Path<(String, String)>,
    headers: HeaderMap,
) -> Response {
    mock.release_hits.fetch_add(1, Ordering::SeqCst);
    mock.seen.lock().unwrap().push(headers);
    if mock.fail.load(Ordering::SeqCst) {
        return (StatusCode::SERVICE_UNAVAILABLE, "unavailable").into_response();
    }

    let base = mock.base.lock().unwrap().clone();
    Json(json!({
        "url": format!("{base}/repos/{owner}/{repo}/releases/1"),
        "tag_name": "v1.2.0",
        "name": "App v1.2.0",
        "body": "Release notes",
        "draft": false,
        "prerelease": false,
        "published_at": "2024-06-01T12:00:00Z",
        "assets": [
            {
                "name": "App_1.2.0_x64-setup.nsis.zip",
                "browser_download_url": format!("{base}/download/App_1.2.0_x64-setup.nsis.zip"),
                "url": format!("{base}/repos/{owner}/{repo}/releases/assets/1"),
                "size": 11
            },
            {
                "name": "App_1.2.0_x64-setup.nsis.zip.sig",
                "browser_download_url": format!("{base}/download/App_1.2.0_x64-setup.nsis.zip.sig"),
                "url": format!("{base}/repos/{owner}/{repo}/releases/assets/2"),
                "size": 9
            }
        ]
    }))
    .into_response()
}

async fn download(
    State(mock): State<Arc<MockGithub>>,
    Path(name): Path<String>,
    headers: HeaderMap,
) -> Response {
    mock.asset_hits.fetch_add(1, Ordering::SeqCst);
    mock.seen.lock().unwrap().push(headers);
    if mock.fail.load(Ordering::SeqCst) {
        return (StatusCode::BAD_GATEWAY, "bad gateway").into_response();
    }

    let body: Vec<u8> = if name.ends_with(".sig") {
        b"signature".to_vec()
    } else {
        vec![0x50, 0x4b, 0x03, 0x04, 0x00, 0xff, 0xfe, 0x00, 0x01, 0x02, 0x03]
    };
    (
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename={name}"),
            ),
            (header::ETAG, "\"0x1234\"".to_string()),
        ],
        body,
    )
        .into_response()
}

async fn start_mock() -> (Arc<MockGithub>, SocketAddr) {
    let mock = Arc::new(MockGithub::default());
    let app = Router::new()
        .route("/repos/:owner/:repo/releases/latest", get(latest_release))
        .route("/download/:name", get(download))
        .with_state(mock.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind mock server");
    let addr = listener.local_addr().unwrap();
    *mock.base.lock().unwrap() = format!("http://{addr}");

    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("Mock server failed");
    });
    (mock, addr)
}

fn config(addr: SocketAddr, token: Option<&str>) -> ProxyConfig {
    ProxyConfig::new("acme", "app")
        .api_base(Url::parse(&format!("http://{addr}/")).unwrap())
        .user_agent("update-proxy-tests")
        .token(token.map(str::to_string))
}

fn service(
    addr: SocketAddr,
    token: Option<&str>,
) -> (Arc<ManualClock>, UpdateService<GithubClient>) {
    let config = config(addr, token);
    let clock = Arc::new(ManualClock::new(1_700_000_000_000));
    let upstream = GithubClient::builder(config.clone()).build().unwrap();
    let service = UpdateService::new(upstream, CacheClient::in_memory(clock.clone()), config);
    (clock, service)
}

#[tokio::test]
async fn release_request_carries_github_headers() {
    let (mock, addr) = start_mock().await;
    let client = GithubClient::builder(config(addr, Some("secret"))).build().unwrap();

    let body = client.latest_release().await.unwrap();
    assert!(!body.is_empty());

    let headers = mock.last_headers();
    assert_eq!(headers[header::ACCEPT], "application/vnd.github.preview");
    assert_eq!(headers[header::USER_AGENT], "update-proxy-tests");
    assert_eq!(headers[header::AUTHORIZATION], "token secret");
}

#[tokio::test]
async fn missing_token_means_unauthenticated_request() {
    let (mock, addr) = start_mock().await;
    let client = GithubClient::builder(config(addr, None)).build().unwrap();
    client.latest_release().await.unwrap();
    assert!(mock.last_headers().get(header::AUTHORIZATION).is_none());

    let client = GithubClient::builder(config(addr, Some(""))).build().unwrap();
    client.latest_release().await.unwrap();
    assert!(mock.last_headers().get(header::AUTHORIZATION).is_none());
}

#[tokio::test]
async fn asset_request_asks_for_octet_stream() {
    let (mock, addr) = start_mock().await;
    let client = GithubClient::builder(config(addr, Some("secret"))).build().unwrap();

    let fetched = client
        .fetch_asset(&format!("http://{addr}/download/App.zip"))
        .await
        .unwrap();
    assert_eq!(fetched.body.len(), 11);
    assert!(fetched
        .headers
        .iter()
        .any(|(k, v)| k == "etag" && v == "\"0x1234\""));

    let headers = mock.last_headers();
    assert_eq!(headers[header::ACCEPT], "application/octet-stream");
    assert_eq!(headers[header::USER_AGENT], "update-proxy-tests");
}

#[tokio::test]
async fn token_reaches_api_origin_but_not_foreign_asset_hosts() {
    let (github, github_addr) = start_mock().await;
    let (foreign, foreign_addr) = start_mock().await;
    let (_clock, service) = service(github_addr, Some("ghp_secret"));

    let asset = service
        .download_asset(&format!("http://{foreign_addr}/download/x.zip"), "x.zip")
        .await
        .expect("foreign asset is still relayed");
    assert_eq!(asset.source, AssetSource::Upstream);
    let headers = foreign.last_headers();
    assert!(headers.get(header::AUTHORIZATION).is_none());
    assert_eq!(headers[header::USER_AGENT], "update-proxy-tests");

    service
        .download_asset(&format!("http://{github_addr}/download/App.zip"), "App.zip")
        .await
        .unwrap();
    assert_eq!(github.last_headers()[header::AUTHORIZATION], "token ghp_secret");
}

#[tokio::test]
async fn upstream_error_status_is_an_error() {
    let (mock, addr) = start_mock().await;
    mock.set_failing(true);
    let client = GithubClient::builder(config(addr, None)).build().unwrap();

    let err = client.latest_release().await.unwrap_err();
    assert!(err.is_upstream());
    let err = client
        .fetch_asset(&format!("http://{addr}/download/App.zip"))
        .await
        .unwrap_err();
    assert!(err.is_upstream());
}

#[tokio::test]
async fn update_check_end_to_end() {
    let (mock, addr) = start_mock().await;
    let (_clock, service) = service(addr, None);

    let status = service
        .check_for_update(
            &UpdateCheckRequest::new("windows", "x86_64", "1.1.9"),
            "https://updates.example.com",
        )
        .await;
    let manifest = match status {
        UpdateStatus::Available(manifest) => manifest,
        other => panic!("expected update, got {other:?}"),
    };
    assert_eq!(manifest.name, "v1.2.0");
    assert_eq!(manifest.notes, "Release notes");
    assert_eq!(manifest.signature.as_deref(), Some("signature"));
    assert!(manifest
        .url
        .starts_with("https://updates.example.com/github/download-asset?asset=http%3A%2F%2F127.0.0.1"));

    let status = service
        .check_for_update(
            &UpdateCheckRequest::new("windows", "x86_64", "1.2.0"),
            "https://updates.example.com",
        )
        .await;
    assert_eq!(status, UpdateStatus::UpToDate);
    assert_eq!(mock.release_hits.load(Ordering::SeqCst), 1, "second check is served from cache");
}

#[tokio::test]
async fn stale_release_survives_upstream_outage() {
    let (mock, addr) = start_mock().await;
    let (clock, service) = service(addr, None);

    assert_eq!(service.latest_release().await.unwrap().tag_name, "v1.2.0");
    mock.set_failing(true);
    clock.advance(24 * 3_600_000);

    let release = service.latest_release().await.expect("stale release");
    assert_eq!(release.tag_name, "v1.2.0");
    assert_eq!(mock.release_hits.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn asset_download_falls_back_to_cache() {
    let (mock, addr) = start_mock().await;
    let (clock, service) = service(addr, None);
    let url = format!("http://{addr}/download/App_1.2.0_x64-setup.nsis.zip");

    let asset = service.download_asset(&url, "App-latest.zip").await.unwrap();
    assert_eq!(asset.source, AssetSource::Upstream);
    assert_eq!(
        asset.header("content-disposition"),
        Some("attachment; filename=\"App-latest.zip\"")
    );

    mock.set_failing(true);
    clock.advance(48 * 3_600_000);

    let cached = service.download_asset(&url, "App-1.2.0.zip").await.unwrap();
    assert_eq!(cached.source, AssetSource::Cache);
    assert_eq!(cached.body, asset.body);
    assert_eq!(
        cached.header("content-disposition"),
        Some("attachment; filename=\"App-1.2.0.zip\"")
    );
    assert_eq!(cached.header("etag"), Some("\"0x1234\""));
    assert_eq!(mock.asset_hits.load(Ordering::SeqCst), 2, "no retry after a cache hit");
}

#[tokio::test]
async fn asset_download_without_cache_retries_once() {
    let (mock, addr) = start_mock().await;
    mock.set_failing(true);
    let (_clock, service) = service(addr, None);

    let url = format!("http://{addr}/download/App.zip");
    assert!(service.download_asset(&url, "App.zip").await.is_none());
    assert_eq!(mock.asset_hits.load(Ordering::SeqCst), 2);
}
