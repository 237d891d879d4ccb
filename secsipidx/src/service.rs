// SPDX-License-Identifier: MIT
// Copyright (c) Microsoft Corporation.

//! The HTTP API.
//!
//! Two endpoints are offered:
//!
//! - `POST /v1/check` checks the Identity header value in the request body and responds
//!   with `OK` or `FAILED`.
//! - `POST /v1/sign-csv` builds and signs an identity from a
//!   `origTN,destTN,attest,origID,x5u` request body and responds with the Identity header
//!   value.
//!
//! If `--http-dir` is set, its contents are also served under `/v1/pub/`, which is useful
//! for publishing the certificates referenced by `x5u`.
//!
//! The API is served over HTTP, HTTPS, or both. The listeners share the same handlers; if
//! any of them fails, the others are stopped as well.

use std::{net::SocketAddr, sync::Arc};

use anyhow::{anyhow, Context};
use axum::{
    extract::{rejection::BytesRejection, State},
    http::StatusCode,
    routing::post,
    Router,
};
use bytes::Bytes;
use secsipid::Engine;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tower_http::{services::ServeDir, trace::TraceLayer};
use tracing::instrument;

use crate::{
    config::{non_empty, Config},
    resolver::{self, CheckRequest},
    tls,
};

/// The state shared by all request handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub engine: Arc<Engine>,
}

/// Build the API router.
pub fn router(state: AppState) -> Router {
    let mut router = Router::new()
        .route("/v1/check", post(check))
        .route("/v1/sign-csv", post(sign_csv));
    if let Some(http_dir) = non_empty(&state.config.http_dir) {
        tracing::info!(?http_dir, "Serving files under /v1/pub/");
        router = router.nest_service("/v1/pub", ServeDir::new(http_dir));
    }
    router.layer(TraceLayer::new_for_http()).with_state(state)
}

/// Check the Identity header value in the request body.
#[instrument(skip_all, fields(request_id = uuid::Uuid::now_v7().to_string()))]
async fn check(
    State(state): State<AppState>,
    body: Result<Bytes, BytesRejection>,
) -> (StatusCode, &'static str) {
    tracing::info!("Incoming request for identity check");
    let identity = match body.as_deref().map(std::str::from_utf8) {
        Ok(Ok(identity)) => identity.trim(),
        Ok(Err(error)) => {
            tracing::warn!(%error, "Request body is not valid UTF-8");
            return (StatusCode::BAD_REQUEST, "cannot read body\n");
        }
        Err(error) => {
            tracing::warn!(%error, "Failed to read the request body");
            return (StatusCode::BAD_REQUEST, "cannot read body\n");
        }
    };
    if identity.is_empty() {
        tracing::warn!("Request body has no identity");
        return (StatusCode::BAD_REQUEST, "missing identity\n");
    }

    let request = CheckRequest::with_identity(&state.config, identity.to_string());
    match request.check(&state.engine).await {
        Ok(payload) => {
            tracing::info!(orig = payload.orig.tn, "Valid identity");
            (StatusCode::OK, "OK\n")
        }
        Err(error) => {
            tracing::warn!(%error, code = error.code(), "Failed checking identity");
            (StatusCode::INTERNAL_SERVER_ERROR, "FAILED\n")
        }
    }
}

/// Build and sign an identity from the comma-separated values in the request body.
#[instrument(skip_all, fields(request_id = uuid::Uuid::now_v7().to_string()))]
async fn sign_csv(
    State(state): State<AppState>,
    body: Result<Bytes, BytesRejection>,
) -> (StatusCode, String) {
    tracing::info!("Incoming request for building identity");
    let body = match body.as_deref().map(std::str::from_utf8) {
        Ok(Ok(body)) => body,
        Ok(Err(error)) => {
            tracing::warn!(%error, "Request body is not valid UTF-8");
            return (StatusCode::BAD_REQUEST, "cannot read body\n".to_string());
        }
        Err(error) => {
            tracing::warn!(%error, "Failed to read the request body");
            return (StatusCode::BAD_REQUEST, "cannot read body\n".to_string());
        }
    };
    let fields = match resolver::identity_fields_from_csv(body) {
        Ok(fields) => fields,
        Err(error) => {
            tracing::warn!(%error, "Invalid signing request");
            return (StatusCode::BAD_REQUEST, "too few fields\n".to_string());
        }
    };
    let Some(private_key) = non_empty(&state.config.fprvkey).cloned() else {
        tracing::error!("No private key is configured for signing");
        return (StatusCode::BAD_REQUEST, "cannot sign\n".to_string());
    };

    let engine = state.engine.clone();
    let result =
        tokio::task::spawn_blocking(move || engine.get_identity(&fields, &private_key)).await;
    match result {
        Ok(Ok(identity)) => (StatusCode::OK, format!("{identity}\n")),
        Ok(Err(error)) => {
            tracing::warn!(%error, code = error.code(), "Failed building identity");
            (StatusCode::BAD_REQUEST, "cannot sign\n".to_string())
        }
        Err(error) => {
            tracing::error!(%error, "Signing task failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "cannot sign\n".to_string())
        }
    }
}

/// Resolve a Go-style bind address; `:8080` binds to all interfaces.
async fn bind_address(address: &str) -> anyhow::Result<SocketAddr> {
    let address = if address.starts_with(':') {
        format!("0.0.0.0{address}")
    } else {
        address.to_string()
    };
    let resolved = tokio::net::lookup_host(address.as_str())
        .await
        .with_context(|| format!("Invalid bind address {address}"))?
        .next();
    resolved.ok_or_else(|| anyhow!("Bind address {address} did not resolve"))
}

/// Serve the API on the configured HTTP and HTTPS addresses.
///
/// This only returns once a listener fails or `halt_token` is cancelled; in both cases the
/// remaining listeners are aborted and an error describing the cause is returned. Requests
/// in progress are not drained.
#[instrument(err, skip_all)]
pub async fn listen(
    config: Arc<Config>,
    engine: Arc<Engine>,
    halt_token: CancellationToken,
) -> anyhow::Result<()> {
    let app = router(AppState {
        config: config.clone(),
        engine,
    });
    let mut listeners = JoinSet::new();

    if let Some(address) = config.http_address() {
        let address = bind_address(address).await?;
        let app = app.clone();
        tracing::info!(%address, "Starting HTTP service");
        listeners.spawn(async move {
            axum_server::bind(address)
                .serve(app.into_make_service())
                .await
                .with_context(|| format!("HTTP listener on {address} failed"))
        });
    }

    if let Some((address, certificate, private_key)) = config.https_settings() {
        let address = bind_address(address).await?;
        let tls_config = tls::ServerConfig::new(certificate, private_key)?.openssl_config();
        let app = app.clone();
        tracing::info!(%address, ?certificate, "Starting HTTPS service");
        listeners.spawn(async move {
            axum_server::bind_openssl(address, tls_config)
                .serve(app.into_make_service())
                .await
                .with_context(|| format!("HTTPS listener on {address} failed"))
        });
    }

    if listeners.is_empty() {
        return Err(anyhow!("No HTTP or HTTPS bind address is configured"));
    }

    let result = tokio::select! {
        _ = halt_token.cancelled() => {
            tracing::info!("Shutdown requested, stopping listeners");
            Err(anyhow!("Service halted"))
        }
        Some(result) = listeners.join_next() => {
            match result.context("Listener task failed")? {
                Ok(()) => Err(anyhow!("Listener stopped unexpectedly")),
                Err(error) => Err(error),
            }
        }
    };
    listeners.abort_all();

    result
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use axum::{body::Body, http::Request};
    use tower::ServiceExt;

    use super::*;

    fn certs() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../devel/certs/")
    }

    fn state(config: Config) -> AppState {
        AppState {
            engine: Arc::new(Engine::new(config.engine_options()).unwrap()),
            config: Arc::new(config),
        }
    }

    fn signing_config() -> Config {
        Config {
            fprvkey: Some(certs().join("ec256-private.pem")),
            fpubkey: Some(certs().join("ec256-public.pem")),
            ..Default::default()
        }
    }

    async fn post(app: Router, uri: &str, body: &str) -> (StatusCode, String) {
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(uri)
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn sign_csv_then_check() {
        let app = router(state(signing_config()));

        let (status, identity) = post(
            app.clone(),
            "/v1/sign-csv",
            "493055555555,493044444444,A,32c7e392-33fc-11ea-840b-784f435c76a8,https://example.org/cert.pem",
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(identity.ends_with(";info=<https://example.org/cert.pem>;alg=ES256;ppt=shaken\n"));

        let (status, body) = post(app, "/v1/check", &identity).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "OK\n");
    }

    #[tokio::test]
    async fn sign_csv_too_few_fields() {
        let app = router(state(signing_config()));
        let (status, _) = post(app, "/v1/sign-csv", "a,b,c").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn sign_csv_without_private_key() {
        let app = router(state(Config::default()));
        let (status, _) = post(app, "/v1/sign-csv", "1,2,A,id,https://example.org/cert.pem").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn check_empty_body() {
        let app = router(state(signing_config()));
        let (status, _) = post(app, "/v1/check", "").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(logs_contain("Request body has no identity"));
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn check_invalid_identity() {
        let app = router(state(signing_config()));
        let (status, body) = post(app, "/v1/check", "aaa.bbb.ccc;info=<x>").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, "FAILED\n");
        assert!(logs_contain("Failed checking identity"));
    }

    #[tokio::test]
    async fn static_files() -> anyhow::Result<()> {
        let http_dir = tempfile::tempdir()?;
        std::fs::write(http_dir.path().join("cert.pem"), "certificate")?;
        let app = router(state(Config {
            http_dir: Some(http_dir.path().to_path_buf()),
            ..Default::default()
        }));

        let response = app
            .clone()
            .oneshot(Request::builder().uri("/v1/pub/cert.pem").body(Body::empty())?)
            .await?;
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
        assert_eq!(&body[..], b"certificate");

        let response = app
            .oneshot(Request::builder().uri("/v1/pub/missing.pem").body(Body::empty())?)
            .await?;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        Ok(())
    }

    #[tokio::test]
    async fn no_static_files_by_default() -> anyhow::Result<()> {
        let app = router(state(Config::default()));
        let response = app
            .oneshot(Request::builder().uri("/v1/pub/cert.pem").body(Body::empty())?)
            .await?;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        Ok(())
    }

    #[tokio::test]
    async fn bind_addresses() -> anyhow::Result<()> {
        assert_eq!(bind_address(":8080").await?, "0.0.0.0:8080".parse()?);
        assert_eq!(bind_address("127.0.0.1:9").await?, "127.0.0.1:9".parse()?);
        assert!(bind_address("not an address").await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn listener_failure_stops_service() -> anyhow::Result<()> {
        // Occupy the port so the HTTP listener cannot bind.
        let occupied = std::net::TcpListener::bind("127.0.0.1:0")?;
        let config = Config {
            http_srv: Some(occupied.local_addr()?.to_string()),
            ..Default::default()
        };
        let state = state(config);

        let result = tokio::time::timeout(
            std::time::Duration::from_secs(10),
            listen(state.config, state.engine, CancellationToken::new()),
        )
        .await?;
        let error = result.unwrap_err();
        assert!(format!("{error:#}").contains("HTTP listener"));
        Ok(())
    }

    #[tokio::test]
    async fn halt_stops_service() -> anyhow::Result<()> {
        let config = Config {
            http_srv: Some("127.0.0.1:0".into()),
            ..Default::default()
        };
        let state = state(config);
        let halt_token = CancellationToken::new();
        halt_token.cancel();

        let result = tokio::time::timeout(
            std::time::Duration::from_secs(10),
            listen(state.config, state.engine, halt_token),
        )
        .await?;
        assert!(result.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn https_listener_failure() -> anyhow::Result<()> {
        let occupied = std::net::TcpListener::bind("127.0.0.1:0")?;
        let config = Config {
            https_srv: Some(occupied.local_addr()?.to_string()),
            https_pubkey: Some(certs().join("cert.pem")),
            https_prvkey: Some(certs().join("ec256-private.pem")),
            ..Default::default()
        };
        let state = state(config);

        let result = tokio::time::timeout(
            std::time::Duration::from_secs(10),
            listen(state.config, state.engine, CancellationToken::new()),
        )
        .await?;
        assert!(format!("{:#}", result.unwrap_err()).contains("HTTPS listener"));
        Ok(())
    }

    #[tokio::test]
    async fn https_sign_csv_then_check() -> anyhow::Result<()> {
        let port = std::net::TcpListener::bind("127.0.0.1:0")?.local_addr()?.port();
        let config = Config {
            https_srv: Some(format!("127.0.0.1:{port}")),
            https_pubkey: Some(certs().join("cert.pem")),
            https_prvkey: Some(certs().join("ec256-private.pem")),
            ..signing_config()
        };
        let state = state(config);
        let halt_token = CancellationToken::new();
        let service = tokio::spawn(listen(state.config, state.engine, halt_token.clone()));

        // The test certificate is not issued for 127.0.0.1.
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .danger_accept_invalid_hostnames(true)
            .build()?;
        let base = format!("https://127.0.0.1:{port}");
        let mut attempts = 0;
        let response = loop {
            let request = client
                .post(format!("{base}/v1/sign-csv"))
                .body("493055555555,493044444444,A,32c7e392-33fc-11ea-840b-784f435c76a8,https://example.org/cert.pem")
                .send()
                .await;
            match request {
                Ok(response) => break response,
                Err(error) if attempts < 50 => {
                    tracing::debug!(?error, "HTTPS listener not ready yet");
                    attempts += 1;
                    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                }
                Err(error) => return Err(error.into()),
            }
        };
        assert_eq!(response.status(), reqwest::StatusCode::OK);
        let identity = response.text().await?;
        assert!(identity.ends_with(";info=<https://example.org/cert.pem>;alg=ES256;ppt=shaken\n"));

        let response = client
            .post(format!("{base}/v1/check"))
            .body(identity)
            .send()
            .await?;
        assert_eq!(response.status(), reqwest::StatusCode::OK);
        assert_eq!(response.text().await?, "OK\n");

        let response = client.post(format!("{base}/v1/check")).send().await?;
        assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);

        halt_token.cancel();
        let result = tokio::time::timeout(std::time::Duration::from_secs(10), service).await??;
        assert!(result.is_err());
        Ok(())
    }
}
