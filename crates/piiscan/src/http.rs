//! Control API shim.
//!
//! Thin request-handling layer over the service: every handler forwards and
//! returns the service's JSON verbatim. Status codes are informational; the
//! `success` flag in the body is authoritative.

use crate::service::{ActionReply, AnalysisService};
use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};

pub fn router(service: AnalysisService) -> Router {
    Router::new()
        .route("/start", post(start))
        .route("/stop", post(stop))
        .route("/clear", post(clear))
        .route("/status", get(status))
        .route("/export", get(export))
        .with_state(service)
}

async fn start(State(service): State<AnalysisService>) -> Json<ActionReply> {
    Json(service.start().await)
}

async fn stop(State(service): State<AnalysisService>) -> Json<ActionReply> {
    Json(service.stop())
}

async fn clear(State(service): State<AnalysisService>) -> Json<ActionReply> {
    Json(service.clear().await)
}

async fn status(State(service): State<AnalysisService>) -> Json<serde_json::Value> {
    Json(service.status().await)
}

async fn export(State(service): State<AnalysisService>) -> Json<serde_json::Value> {
    Json(service.export_json().await)
}
