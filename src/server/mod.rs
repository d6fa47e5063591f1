//! HTTP boundary: `POST /predict` and `GET /health`.

mod response;
mod upload;

pub use response::apply_rate_limit_headers;
pub use upload::read_image;

use crate::config::{RuntimeKind, ServerSettings};
use crate::constants::upload::MULTIPART_OVERHEAD_BYTES;
use crate::error::{Error, PredictError, Result};
use crate::ratelimit::{RateLimiter, client_key};
use crate::service::PredictionPipeline;
use axum::extract::multipart::MultipartRejection;
use axum::extract::{ConnectInfo, DefaultBodyLimit, Multipart, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// Shared state for request handlers.
#[derive(Clone)]
pub struct AppState {
    pipeline: PredictionPipeline,
    limiter: Option<Arc<RateLimiter>>,
    max_upload_bytes: usize,
    trust_forwarded_headers: bool,
    runtime: RuntimeKind,
}

impl AppState {
    /// Create handler state.
    pub fn new(
        pipeline: PredictionPipeline,
        limiter: Option<RateLimiter>,
        settings: &ServerSettings,
        runtime: RuntimeKind,
    ) -> Self {
        Self {
            pipeline,
            limiter: limiter.map(Arc::new),
            max_upload_bytes: settings.max_upload_bytes,
            trust_forwarded_headers: settings.trust_forwarded_headers,
            runtime,
        }
    }
}

/// Build the application router.
pub fn router(state: AppState) -> Router {
    let body_limit = state.max_upload_bytes + MULTIPART_OVERHEAD_BYTES;

    Router::new()
        .route("/predict", post(predict))
        .layer(DefaultBodyLimit::max(body_limit))
        .route("/health", get(health))
        .with_state(state)
}

/// Bind and serve until Ctrl+C or SIGTERM.
pub async fn serve(settings: &ServerSettings, state: AppState) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(&settings.bind)
        .await
        .map_err(|e| Error::Bind {
            addr: settings.bind.clone(),
            source: e,
        })?;
    info!("Listening on http://{}", listener.local_addr()?);

    axum::serve(
        listener,
        router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    info!("Shutdown signal received, finishing in-flight requests");
}

async fn predict(
    State(state): State<AppState>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> Response {
    let started = Instant::now();
    let key = if state.trust_forwarded_headers {
        client_key(
            header_str(&headers, "x-forwarded-for"),
            header_str(&headers, "x-real-ip"),
            peer.map(|ConnectInfo(addr)| addr.ip()),
        )
    } else {
        client_key(None, None, peer.map(|ConnectInfo(addr)| addr.ip()))
    };

    let decision = match &state.limiter {
        Some(limiter) => Some(limiter.admit(&key).await),
        None => None,
    };

    let outcome = match decision {
        Some(d) if !d.allowed => Err(PredictError::RateLimitExceeded(d)),
        _ => match read_image(multipart, state.max_upload_bytes).await {
            Ok(image) => state.pipeline.predict(image).await,
            Err(e) => Err(e),
        },
    };

    let mut response = match outcome {
        Ok(body) => (StatusCode::OK, Json(body)).into_response(),
        Err(e) => {
            if e.status_code() >= 500 {
                warn!("Prediction for {key} failed ({}): {e}", e.kind());
            }
            e.into_response()
        }
    };

    if let Some(decision) = &decision {
        apply_rate_limit_headers(response.headers_mut(), decision);
    }

    info!(
        "POST /predict {} from {key} in {:.1}ms",
        response.status().as_u16(),
        started.elapsed().as_secs_f64() * 1000.0
    );
    response
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthBody {
    status: &'static str,
    model_loaded: bool,
    model_available: bool,
    runtime: String,
}

async fn health(State(state): State<AppState>) -> Response {
    let cache = state.pipeline.cache();
    let model_loaded = cache.is_loaded();
    let model_available = cache.is_available().await;

    let (status, label) = if model_available {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "unavailable")
    };

    (
        status,
        Json(HealthBody {
            status: label,
            model_loaded,
            model_available,
            runtime: state.runtime.to_string(),
        }),
    )
        .into_response()
}
