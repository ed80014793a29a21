use axum::{response::IntoResponse, Json};
use serde::Serialize;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub message: &'static str,
}

/// Liveness probe; also the keepalive target.
pub async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "OK",
        message: "server is up and running",
    })
}
