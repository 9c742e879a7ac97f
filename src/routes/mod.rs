//! HTTP routes for ChoosePure
//!
//! Every response uses the envelope `{success, message, data}`. Failures
//! map [`AppError`] to a status code and carry the public detail in `data`.

pub mod api;
pub mod health;
pub mod onboarding;
pub mod samples;
pub mod subscriptions;
pub mod users;
pub mod voting;

pub use api::{handle_api_request, ApiRequest};
pub use health::{health_check, root_info};

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use serde::Serialize;
use tracing::{debug, error};

use crate::types::{AppError, Result};

/// Successful operation output before it is wrapped in the envelope
#[derive(Debug, Clone)]
pub struct Reply {
    pub message: String,
    pub data: serde_json::Value,
}

impl Reply {
    pub fn new(message: impl Into<String>, data: impl Serialize) -> Result<Self> {
        let data = serde_json::to_value(data)
            .map_err(|e| AppError::Internal(format!("Response serialization failed: {}", e)))?;
        Ok(Self {
            message: message.into(),
            data,
        })
    }
}

#[derive(Serialize)]
struct Envelope<'a> {
    success: bool,
    message: &'a str,
    data: &'a serde_json::Value,
}

/// Build an enveloped JSON response
pub fn envelope_response(
    status: StatusCode,
    success: bool,
    message: &str,
    data: &serde_json::Value,
) -> Response<Full<Bytes>> {
    let body = serde_json::to_vec(&Envelope {
        success,
        message,
        data,
    })
    .unwrap_or_default();

    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .header("Cache-Control", "no-store")
        .header("Access-Control-Allow-Origin", "*")
        .body(Full::new(Bytes::from(body)))
        .unwrap_or_else(|_| Response::new(Full::new(Bytes::from_static(b"{\"success\":false}"))))
}

pub fn reply_response(reply: Reply) -> Response<Full<Bytes>> {
    envelope_response(StatusCode::OK, true, &reply.message, &reply.data)
}

pub fn error_response(err: &AppError) -> Response<Full<Bytes>> {
    match err {
        AppError::Store(_) | AppError::Internal(_) => error!("Request failed: {}", err),
        other if other.is_business_outcome() => debug!("Request refused: {}", other),
        _ => {}
    }
    let data = err.detail().unwrap_or(serde_json::Value::Null);
    envelope_response(err.status_code(), false, &err.public_message(), &data)
}

pub fn not_found_response(path: &str) -> Response<Full<Bytes>> {
    envelope_response(
        StatusCode::NOT_FOUND,
        false,
        "Not Found",
        &serde_json::json!({ "path": path }),
    )
}

pub fn timeout_response() -> Response<Full<Bytes>> {
    envelope_response(
        StatusCode::GATEWAY_TIMEOUT,
        false,
        "Request timed out",
        &serde_json::Value::Null,
    )
}

/// CORS preflight response
pub fn preflight_response() -> Response<Full<Bytes>> {
    Response::builder()
        .status(StatusCode::OK)
        .header("Access-Control-Allow-Origin", "*")
        .header("Access-Control-Allow-Headers", "*")
        .header("Access-Control-Allow-Methods", "GET, POST, OPTIONS")
        .header("Access-Control-Max-Age", "86400")
        .body(Full::new(Bytes::new()))
        .unwrap_or_else(|_| Response::new(Full::new(Bytes::new())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AlreadyDone, UsageKind};
    use http_body_util::BodyExt;

    async fn body_json(resp: Response<Full<Bytes>>) -> serde_json::Value {
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_limit_error_envelope() {
        let err = AppError::LimitReached {
            kind: UsageKind::ReportView,
            used: 3,
            limit: 3,
        };
        let resp = error_response(&err);
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
        assert_eq!(
            resp.headers().get("Access-Control-Allow-Origin").unwrap(),
            "*"
        );

        let body = body_json(resp).await;
        assert_eq!(body["success"], false);
        assert_eq!(body["data"]["error"], "view_limit_reached");
        assert_eq!(body["data"]["used"], 3);
        assert_eq!(body["data"]["upgrade_required"], true);
    }

    #[tokio::test]
    async fn test_already_done_envelope() {
        let resp = error_response(&AppError::AlreadyDone(AlreadyDone::AlreadyVoted));
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body = body_json(resp).await;
        assert_eq!(body["data"]["error"], "already_voted");
    }

    #[tokio::test]
    async fn test_reply_envelope() {
        let reply = Reply::new("Done", serde_json::json!({ "n": 1 })).unwrap();
        let body = body_json(reply_response(reply)).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["message"], "Done");
        assert_eq!(body["data"]["n"], 1);
    }

    #[test]
    fn test_preflight_headers() {
        let resp = preflight_response();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(resp.headers().contains_key("Access-Control-Allow-Methods"));
    }
}
