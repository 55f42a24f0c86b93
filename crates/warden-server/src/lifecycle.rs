// SPDX-License-Identifier: AGPL-3.0-only
//! Process lifecycle and the unauthenticated operational endpoints.
//!
//! The phase only moves forward through starting, serving, draining and
//! stopped. Logins are accepted while serving. `/ready` reports the phase
//! together with the number of live relay sessions so an orchestrator can
//! watch a drain progress.

use crate::metrics::metrics;
use axum::{
    Json, Router,
    extract::State,
    http::{StatusCode, header::CONTENT_TYPE},
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::{Duration, Instant};
use warden_relay::TerminalRelay;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Starting,
    Serving,
    Draining,
    Stopped,
}

impl Phase {
    fn from_raw(raw: u8) -> Phase {
        match raw {
            0 => Phase::Starting,
            1 => Phase::Serving,
            2 => Phase::Draining,
            _ => Phase::Stopped,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Lifecycle {
    phase: Arc<AtomicU8>,
    started: Instant,
}

impl Lifecycle {
    pub fn new() -> Lifecycle {
        Lifecycle {
            phase: Arc::new(AtomicU8::new(Phase::Starting as u8)),
            started: Instant::now(),
        }
    }

    pub fn phase(&self) -> Phase {
        Phase::from_raw(self.phase.load(Ordering::SeqCst))
    }

    /// Moves to `phase` unless the process is already past it.
    fn advance(&self, phase: Phase) -> Phase {
        Phase::from_raw(self.phase.fetch_max(phase as u8, Ordering::SeqCst))
    }

    pub fn serve(&self) {
        self.advance(Phase::Serving);
    }

    /// Returns `true` for the call that started the drain.
    pub fn drain(&self) -> bool {
        self.advance(Phase::Draining) < Phase::Draining
    }

    pub fn stop(&self) {
        self.advance(Phase::Stopped);
    }

    /// Whether new logins are taken.
    pub fn accepting(&self) -> bool {
        self.phase() == Phase::Serving
    }

    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone)]
struct OpsState {
    lifecycle: Lifecycle,
    relay: Arc<TerminalRelay>,
}

async fn health(State(state): State<OpsState>) -> Response {
    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "uptimeSecs": state.lifecycle.uptime().as_secs(),
    }))
    .into_response()
}

/// 200 while serving, 503 otherwise. The body names the phase.
async fn ready(State(state): State<OpsState>) -> Response {
    let phase = state.lifecycle.phase();
    let status = if phase == Phase::Serving {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    let body = json!({ "status": phase, "sessions": state.relay.registry().len() });
    (status, Json(body)).into_response()
}

async fn live(State(state): State<OpsState>) -> Response {
    let phase = state.lifecycle.phase();
    let status = if phase == Phase::Stopped {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    (status, Json(json!({ "status": phase }))).into_response()
}

async fn prometheus_text() -> Response {
    (
        [(CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        metrics().encode(),
    )
        .into_response()
}

pub fn ops_router(lifecycle: Lifecycle, relay: Arc<TerminalRelay>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/live", get(live))
        .route("/metrics", get(prometheus_text))
        .with_state(OpsState { lifecycle, relay })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::tests::test_app;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    async fn fetch(router: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = router
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    // ==================== Phase Tests ====================

    #[test]
    fn phase_never_moves_backwards() {
        let lifecycle = Lifecycle::new();
        assert!(!lifecycle.accepting());
        lifecycle.serve();
        assert!(lifecycle.accepting());

        let shared = lifecycle.clone();
        assert!(shared.drain());
        assert!(!lifecycle.drain());
        lifecycle.serve();
        assert_eq!(lifecycle.phase(), Phase::Draining);
        lifecycle.stop();
        assert_eq!(shared.phase(), Phase::Stopped);
    }

    // ==================== Endpoint Tests ====================

    #[tokio::test]
    async fn ready_tracks_phase_and_sessions() {
        let app = test_app();
        let lifecycle = Lifecycle::new();
        let router = || ops_router(lifecycle.clone(), app.state.relay.clone());

        let (status, body) = fetch(router(), "/ready").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["status"], "starting");

        lifecycle.serve();
        let (status, body) = fetch(router(), "/ready").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "status": "serving", "sessions": 0 }));

        lifecycle.drain();
        let (status, body) = fetch(router(), "/ready").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["status"], "draining");
        let (status, _) = fetch(router(), "/live").await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn stopped_process_is_not_live() {
        let app = test_app();
        let lifecycle = Lifecycle::new();
        lifecycle.stop();
        let (status, body) = fetch(ops_router(lifecycle, app.state.relay.clone()), "/live").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["status"], "stopped");
    }

    #[tokio::test]
    async fn health_reports_version() {
        let app = test_app();
        let (status, body) = fetch(ops_router(Lifecycle::new(), app.state.relay.clone()), "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
        assert!(body["uptimeSecs"].is_u64());
    }

    #[tokio::test]
    async fn metrics_are_prometheus_text() {
        let app = test_app();
        let response = ops_router(Lifecycle::new(), app.state.relay.clone())
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response.headers().get(CONTENT_TYPE).unwrap().to_str().unwrap();
        assert!(content_type.starts_with("text/plain"));
    }
}
