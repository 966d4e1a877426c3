// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 CAB Ingénierie / Christophe ABOULICAM
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared application state for health endpoints.
#[derive(Clone)]
pub struct AppState {
    /// Set by the worker once the tap listener is bound and the clusters are loaded
    pub tap_ready: Arc<AtomicBool>,
    /// Flag indicating if we're shutting down
    pub shutting_down: Arc<AtomicBool>,
}

/// Health check response body.
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    tap_status: Option<&'static str>,
}

/// Kubernetes liveness probe endpoint.
///
/// Returns 200 OK if the process is alive.
///
/// # Endpoint
/// `GET /health/live`
pub async fn health_live() -> Response {
    let response = HealthResponse {
        status: "ok",
        tap_status: None,
    };
    (StatusCode::OK, Json(response)).into_response()
}

/// Kubernetes readiness probe endpoint.
///
/// Returns 503 while the tap is not accepting connections or once
/// shutdown has started.
///
/// # Endpoint
/// `GET /health/ready`
pub async fn health_ready(State(state): State<AppState>) -> Response {
    if state.shutting_down.load(Ordering::SeqCst) {
        let response = HealthResponse {
            status: "shutting_down",
            tap_status: None,
        };
        return (StatusCode::SERVICE_UNAVAILABLE, Json(response)).into_response();
    }

    if !state.tap_ready.load(Ordering::SeqCst) {
        let response = HealthResponse {
            status: "starting",
            tap_status: Some("down"),
        };
        return (StatusCode::SERVICE_UNAVAILABLE, Json(response)).into_response();
    }

    let response = HealthResponse {
        status: "ok",
        tap_status: Some("up"),
    };
    (StatusCode::OK, Json(response)).into_response()
}

/// Kubernetes startup probe endpoint.
///
/// # Endpoint
/// `GET /health/startup`
pub async fn health_startup() -> Response {
    let response = HealthResponse {
        status: "ok",
        tap_status: None,
    };
    (StatusCode::OK, Json(response)).into_response()
}
