//! ChoosePure API v2
//!
//! ## Routes
//!
//! - `/api/v2/onboarding/*` - funnel tracking and journeys
//! - `/api/v2/samples/*` - sample report catalog
//! - `/api/v2/voting/*` - community voting
//! - `/api/v2/users/*` - dashboard, profile, metered activity
//! - `/api/v2/subscriptions/*` - trials, payments, upgrade prompts
//!
//! Requests are read up to a size limit, then parsed into typed service requests. Path
//! segments and query values are percent-decoded before they reach a service.

use bson::DateTime;
use bytes::Bytes;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Body;
use hyper::{Method, Request, Response};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use tracing::debug;

use super::{error_response, not_found_response, reply_response, Reply};
use super::{onboarding, samples, subscriptions, users, voting};
use crate::server::AppState;
use crate::types::{AppError, Result};

pub const API_PREFIX: &str = "/api/v2";

/// Request bodies larger than this are rejected while they are read
const MAX_BODY_BYTES: usize = 64 * 1024;

/// Error type request bodies must convert into
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// A fully-read API request
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    query: HashMap<String, String>,
    body: Bytes,
}

impl ApiRequest {
    pub async fn from_request<B>(req: Request<B>) -> Result<Self>
    where
        B: Body,
        B::Error: Into<BoxError>,
    {
        let method = req.method().clone();
        let path = req.uri().path().to_string();
        let query = parse_query_params(req.uri().query().unwrap_or(""))?;

        let body = Limited::new(req.into_body(), MAX_BODY_BYTES)
            .collect()
            .await
            .map_err(|e| {
                if e.downcast_ref::<LengthLimitError>().is_some() {
                    AppError::Validation("Request body too large".into())
                } else {
                    AppError::Validation(format!("Failed to read request body: {}", e))
                }
            })?
            .to_bytes();

        Ok(Self {
            method,
            path,
            query,
            body,
        })
    }

    /// Non-empty query value
    pub fn query(&self, key: &str) -> Option<&str> {
        self.query
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    pub fn query_flag(&self, key: &str) -> Result<bool> {
        match self.query(key) {
            None => Ok(false),
            Some("true") | Some("1") => Ok(true),
            Some("false") | Some("0") => Ok(false),
            Some(other) => Err(AppError::Validation(format!(
                "{} must be true or false, got {}",
                key, other
            ))),
        }
    }

    pub fn query_i64(&self, key: &str) -> Result<Option<i64>> {
        self.query(key)
            .map(|v| {
                v.parse::<i64>()
                    .map_err(|_| AppError::Validation(format!("{} must be an integer", key)))
            })
            .transpose()
    }

    /// Parse the JSON body. An empty body parses as the default request.
    pub fn json<T: DeserializeOwned + Default>(&self) -> Result<T> {
        if self.body.iter().all(u8::is_ascii_whitespace) {
            return Ok(T::default());
        }
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// JSON object body as free-form details
    pub fn details(&self) -> Result<serde_json::Map<String, serde_json::Value>> {
        self.json()
    }

    /// Decoded path segments after the API prefix, or `None` outside it
    pub fn api_segments(&self) -> Option<Result<Vec<String>>> {
        let rest = self.path.strip_prefix(API_PREFIX)?;
        if !rest.is_empty() && !rest.starts_with('/') {
            return None;
        }
        Some(
            rest.split('/')
                .filter(|s| !s.is_empty())
                .map(decode)
                .collect(),
        )
    }
}

fn decode(raw: &str) -> Result<String> {
    urlencoding::decode(&raw.replace('+', " "))
        .map(|s| s.into_owned())
        .map_err(|_| AppError::Validation("Malformed percent-encoding".into()))
}

/// Parse query string into key-value map
fn parse_query_params(query: &str) -> Result<HashMap<String, String>> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let mut parts = pair.splitn(2, '=');
            let key = decode(parts.next().unwrap_or_default())?;
            let value = decode(parts.next().unwrap_or(""))?;
            Ok((key, value))
        })
        .collect()
}

/// Dispatch a request under `/api/v2`
pub async fn handle_api_request<B>(state: &AppState, req: Request<B>) -> Response<Full<Bytes>>
where
    B: Body,
    B::Error: Into<BoxError>,
{
    let path = req.uri().path().to_string();
    let request = match ApiRequest::from_request(req).await {
        Ok(request) => request,
        Err(e) => return error_response(&e),
    };

    let segments = match request.api_segments() {
        Some(Ok(segments)) => segments,
        Some(Err(e)) => return error_response(&e),
        None => return not_found_response(&path),
    };
    let segments: Vec<&str> = segments.iter().map(String::as_str).collect();

    debug!(method = %request.method, path = %path, "API request");

    let ctx = &state.ctx;
    let now = DateTime::now();
    let outcome: Option<Result<Reply>> = match segments.split_first() {
        Some((&"onboarding", rest)) => onboarding::route(ctx, &request, rest, now).await,
        Some((&"samples", rest)) => samples::route(ctx, &request, rest, now).await,
        Some((&"voting", rest)) => voting::route(ctx, &request, rest, now).await,
        Some((&"users", rest)) => users::route(ctx, &request, rest, now).await,
        Some((&"subscriptions", rest)) => subscriptions::route(ctx, &request, rest, now).await,
        _ => None,
    };

    match outcome {
        Some(Ok(reply)) => reply_response(reply),
        Some(Err(e)) => error_response(&e),
        None => not_found_response(&path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn request(method: Method, uri: &str, body: &str) -> ApiRequest {
        let req = Request::builder()
            .method(method)
            .uri(uri)
            .body(Full::new(Bytes::from(body.to_string())))
            .unwrap();
        ApiRequest::from_request(req).await.unwrap()
    }

    #[tokio::test]
    async fn test_segments_are_decoded() {
        let req = request(Method::GET, "/api/v2/users/dashboard/a%40x.com", "").await;
        let segments = req.api_segments().unwrap().unwrap();
        assert_eq!(segments, vec!["users", "dashboard", "a@x.com"]);
    }

    #[tokio::test]
    async fn test_outside_prefix() {
        let req = request(Method::GET, "/api/v2x/users", "").await;
        assert!(req.api_segments().is_none());
        let req = request(Method::GET, "/api/v1/users", "").await;
        assert!(req.api_segments().is_none());
    }

    #[tokio::test]
    async fn test_query_parsing() {
        let req = request(
            Method::GET,
            "/api/v2/samples/reports?category=Instant%20Food&featured_only=true&limit=5",
            "",
        )
        .await;
        assert_eq!(req.query("category"), Some("Instant Food"));
        assert!(req.query_flag("featured_only").unwrap());
        assert_eq!(req.query_i64("limit").unwrap(), Some(5));
        assert_eq!(req.query_i64("missing").unwrap(), None);
    }

    #[tokio::test]
    async fn test_bad_query_values() {
        let req = request(Method::GET, "/api/v2/samples/reports?limit=ten&featured_only=maybe", "").await;
        assert!(req.query_i64("limit").is_err());
        assert!(req.query_flag("featured_only").is_err());
    }

    #[tokio::test]
    async fn test_empty_body_is_default() {
        let req = request(Method::POST, "/api/v2/voting/quick-signup", "  ").await;
        let details = req.details().unwrap();
        assert!(details.is_empty());
    }

    #[tokio::test]
    async fn test_oversized_body_rejected() {
        let req = Request::builder()
            .method(Method::POST)
            .uri("/api/v2/onboarding/track-action")
            .body(Full::new(Bytes::from(vec![b' '; MAX_BODY_BYTES + 1])))
            .unwrap();
        let err = ApiRequest::from_request(req).await.unwrap_err();
        assert_eq!(err.to_string(), "Request body too large");
    }

    #[tokio::test]
    async fn test_invalid_json_is_validation_error() {
        let req = request(Method::POST, "/api/v2/voting/quick-signup", "{email").await;
        let err = req.details().unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }
}
