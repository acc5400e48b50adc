//! Broker REST client that records every outcome on its endpoint

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::Credentials;
use crate::endpoint::{ApiError, Endpoint, EndpointKind, DEAD_STREAM_CODE};
use crate::error::Result;
use crate::io::{ApiRequest, HttpClient};

const KEY_ID_HEADER: &str = "APCA-API-KEY-ID";
const SECRET_KEY_HEADER: &str = "APCA-API-SECRET-KEY";

/// Issues requests and keeps endpoint state current
pub struct ApiClient {
    http: Arc<dyn HttpClient>,
    credentials: Option<Credentials>,
}

impl ApiClient {
    pub fn new(http: Arc<dyn HttpClient>, credentials: Option<Credentials>) -> Self {
        Self { http, credentials }
    }

    /// Perform `request` and record its outcome on `endpoint`
    ///
    /// Returns the decoded body and status. Non-2xx responses are returned as
    /// well (and recorded as errors); only transport failures produce `Err`.
    /// Successful responses on an orders endpoint are stored as confirmations.
    pub async fn request(
        &self,
        endpoint: &Endpoint,
        mut request: ApiRequest,
    ) -> Result<(serde_json::Value, u16)> {
        if let Some(credentials) = &self.credentials {
            request
                .headers
                .insert(KEY_ID_HEADER.to_string(), credentials.key_id.clone());
            request
                .headers
                .insert(SECRET_KEY_HEADER.to_string(), credentials.secret_key.clone());
        }

        let response = match self.http.send(&request).await {
            Ok(response) => response,
            Err(e) => {
                warn!("Request to '{}' failed: {}", endpoint.name(), e);
                endpoint
                    .record_error(api_error(&request, None, DEAD_STREAM_CODE, e.to_string()))
                    .await;
                return Err(e);
            }
        };

        let payload = parse_body(&response.body);
        if (200..300).contains(&response.status) {
            let confirmation = match endpoint.kind() {
                EndpointKind::Orders => Some(payload.clone()),
                _ => None,
            };
            endpoint.record_response(response.status, confirmation).await;
        } else {
            let message = error_message(&payload)
                .unwrap_or_else(|| format!("HTTP {}", response.status));
            debug!(
                "Endpoint '{}' returned {}: {}",
                endpoint.name(),
                response.status,
                message
            );
            endpoint
                .record_error(api_error(
                    &request,
                    Some(payload.clone()),
                    response.status,
                    message,
                ))
                .await;
        }

        Ok((payload, response.status))
    }
}

fn parse_body(body: &str) -> serde_json::Value {
    if body.trim().is_empty() {
        return serde_json::Value::Null;
    }
    serde_json::from_str(body).unwrap_or_else(|_| serde_json::Value::String(body.to_string()))
}

fn error_message(payload: &serde_json::Value) -> Option<String> {
    payload
        .get("message")
        .and_then(|m| m.as_str())
        .map(str::to_string)
}

fn api_error(
    request: &ApiRequest,
    payload: Option<serde_json::Value>,
    code: u16,
    message: String,
) -> ApiError {
    ApiError {
        url: request.url.clone(),
        headers: redact(&request.headers),
        params: request.params.clone(),
        payload,
        code,
        message,
    }
}

fn redact(headers: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    headers
        .iter()
        .map(|(name, value)| {
            let lower = name.to_ascii_lowercase();
            if lower.contains("key") || lower.contains("secret") || lower == "authorization" {
                (name.clone(), "***".to_string())
            } else {
                (name.clone(), value.clone())
            }
        })
        .collect()
}
