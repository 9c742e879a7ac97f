//! Health endpoints
//!
//! - `/` - banner and version
//! - `/health`, `/api/v2/health` - liveness plus a store round trip
//!
//! With the in-memory store the database is reported as `memory`; that
//! mode is for development only.

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use serde::Serialize;
use tracing::warn;

use super::envelope_response;
use crate::server::AppState;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Serialize)]
struct RootInfo {
    message: &'static str,
    version: &'static str,
}

pub fn root_info() -> Response<Full<Bytes>> {
    let info = RootInfo {
        message: "ChoosePure API is running",
        version: VERSION,
    };
    let data = serde_json::to_value(&info).unwrap_or_default();
    envelope_response(StatusCode::OK, true, info.message, &data)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    database: &'static str,
    backend: &'static str,
    version: &'static str,
}

pub async fn health_check(state: &AppState) -> Response<Full<Bytes>> {
    let reachable = match state.ctx.stores.accounts.count().await {
        Ok(_) => true,
        Err(e) => {
            warn!("Health check store probe failed: {}", e);
            false
        }
    };

    let (status_code, status, database) = match (reachable, state.backend.is_persistent()) {
        (true, true) => (StatusCode::OK, "healthy", "connected"),
        (true, false) => (StatusCode::OK, "healthy", "memory"),
        (false, _) => (StatusCode::SERVICE_UNAVAILABLE, "degraded", "unreachable"),
    };

    let health = HealthResponse {
        status,
        database,
        backend: state.backend.as_str(),
        version: VERSION,
    };
    let data = serde_json::to_value(health).unwrap_or_default();
    envelope_response(status_code, reachable, status, &data)
}
