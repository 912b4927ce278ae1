use crate::auth::{AuthRequest, AuthService};
use crate::errors::ProxyError;
use actix_web::{web, HttpResponse};
use prometheus::{Encoder, TextEncoder};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use sync_core::{SyncLogStore, SyncMetrics, SyncStatus};
use tracing::warn;

const DEFAULT_QUARANTINE_LIMIT: i64 = 100;
const MAX_QUARANTINE_LIMIT: i64 = 1000;

/// Shared handler state
pub struct AppState {
    pub auth: AuthService,
    pub logs: Arc<dyn SyncLogStore>,
    pub metrics: Arc<SyncMetrics>,
}

fn failure(msg: impl Into<String>) -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "code": -1,
        "msg": msg.into()
    }))
}

/// Health check endpoint
pub async fn health_check() -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "service": "chain-proxy",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Authorize a user and start relaying their balance changes
///
/// Failures are reported in the body with `code: -1`; the HTTP status is
/// always 200.
pub async fn authorize(state: web::Data<AppState>, body: web::Bytes) -> HttpResponse {
    if body.is_empty() {
        return failure("request is nil");
    }

    let request: AuthRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => return failure(format!("invalid request: {}", e)),
    };

    match state.auth.authorize(request).await {
        Ok(response) => HttpResponse::Ok().json(json!({
            "code": 0,
            "data": response
        })),
        Err(e) => {
            warn!(error = %e, "Authorization failed");
            failure(e.to_string())
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct QuarantineQuery {
    limit: Option<i64>,
}

impl QuarantineQuery {
    fn limit(&self) -> i64 {
        self.limit
            .unwrap_or(DEFAULT_QUARANTINE_LIMIT)
            .clamp(0, MAX_QUARANTINE_LIMIT)
    }
}

/// Rows that exhausted their retries, newest first
pub async fn list_quarantined(
    state: web::Data<AppState>,
    query: web::Query<QuarantineQuery>,
) -> Result<HttpResponse, ProxyError> {
    let rows = state
        .logs
        .list_by_status(SyncStatus::Ignored, query.limit())
        .await?;

    Ok(HttpResponse::Ok().json(json!({
        "code": 0,
        "data": rows,
        "total": rows.len()
    })))
}

/// Prometheus metrics endpoint
pub async fn metrics_endpoint(state: web::Data<AppState>) -> HttpResponse {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    match encoder.encode(&state.metrics.registry().gather(), &mut buffer) {
        Ok(()) => HttpResponse::Ok()
            .content_type("text/plain; version=0.0.4")
            .body(buffer),
        Err(e) => HttpResponse::InternalServerError().json(json!({
            "error": "Failed to gather metrics",
            "details": e.to_string()
        })),
    }
}

/// Configure routes
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/chainProxy")
            .route("/auth", web::post().to(authorize))
            .route("/quarantine", web::get().to(list_quarantined)),
    )
    .route("/metrics", web::get().to(metrics_endpoint))
    .route("/health", web::get().to(health_check));
}
