//! Endpoint state holders
//!
//! Every logical broker resource has one [`Endpoint`]. Its result code and
//! the payload belonging to that code live behind a single mutex, so readers
//! always see a pair written by the same request.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

use crate::stream::StreamSlot;

/// Code used for failures that never produced an HTTP status, such as a dead stream
pub const DEAD_STREAM_CODE: u16 = 999;

/// Status code reported by a stream that connected successfully
pub const STREAM_OPEN_CODE: u16 = 101;

/// Outcome of the most recent request against an endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultCode {
    /// Nothing issued yet, or no stream started
    #[default]
    Idle,
    Status(u16),
}

impl ResultCode {
    pub fn is_success(self) -> bool {
        matches!(self, ResultCode::Status(STREAM_OPEN_CODE | 200..=299))
    }

    pub fn as_u16(self) -> u16 {
        match self {
            ResultCode::Idle => 0,
            ResultCode::Status(code) => code,
        }
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResultCode::Idle => write!(f, "idle"),
            ResultCode::Status(code) => write!(f, "{}", code),
        }
    }
}

/// Structured description of a failed request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiError {
    pub url: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
    #[serde(default)]
    pub payload: Option<serde_json::Value>,
    pub code: u16,
    pub message: String,
}

impl ApiError {
    /// A failure with no HTTP exchange behind it
    pub fn dead_stream(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: BTreeMap::new(),
            params: BTreeMap::new(),
            payload: None,
            code: DEAD_STREAM_CODE,
            message: message.into(),
        }
    }
}

/// The kind of resource an endpoint represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointKind {
    Rest,
    Orders,
    Stream,
}

impl EndpointKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EndpointKind::Rest => "rest",
            EndpointKind::Orders => "orders",
            EndpointKind::Stream => "stream",
        }
    }
}

impl fmt::Display for EndpointKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Last result code and the payload that came with it
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EndpointStatus {
    pub code: ResultCode,
    pub error: Option<ApiError>,
    pub confirmation: Option<serde_json::Value>,
}

impl EndpointStatus {
    pub fn set_response(&mut self, code: u16, confirmation: Option<serde_json::Value>) {
        self.code = ResultCode::Status(code);
        self.error = None;
        self.confirmation = confirmation;
    }

    pub fn set_error(&mut self, error: ApiError) {
        self.code = ResultCode::Status(error.code);
        self.error = Some(error);
        self.confirmation = None;
    }

    pub fn set_idle(&mut self) {
        *self = EndpointStatus::default();
    }
}

/// A monitored broker resource
pub struct Endpoint {
    name: String,
    kind: EndpointKind,
    status: Mutex<EndpointStatus>,
    stream: Option<StreamSlot>,
}

/// Shared endpoint handle
pub type EndpointHandle = Arc<Endpoint>;

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("stream", &self.stream)
            .finish()
    }
}

impl Endpoint {
    pub fn new(name: impl Into<String>, kind: EndpointKind) -> Self {
        Self {
            name: name.into(),
            kind,
            status: Mutex::new(EndpointStatus::default()),
            stream: None,
        }
    }

    pub fn with_stream(name: impl Into<String>, slot: StreamSlot) -> Self {
        Self {
            name: name.into(),
            kind: EndpointKind::Stream,
            status: Mutex::new(EndpointStatus::default()),
            stream: Some(slot),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> EndpointKind {
        self.kind
    }

    pub fn stream(&self) -> Option<&StreamSlot> {
        self.stream.as_ref()
    }

    /// Acquire the guard over code and payload
    pub async fn lock(&self) -> MutexGuard<'_, EndpointStatus> {
        self.status.lock().await
    }

    pub async fn record_response(&self, code: u16, confirmation: Option<serde_json::Value>) {
        self.lock().await.set_response(code, confirmation);
    }

    pub async fn record_error(&self, error: ApiError) {
        self.lock().await.set_error(error);
    }

    /// Consistent copy of the current status
    pub async fn snapshot(&self) -> EndpointStatus {
        self.lock().await.clone()
    }

    /// Start (or restart) the stream and record the outcome
    ///
    /// Does nothing for endpoints without a stream.
    pub async fn start_stream(&self) {
        let Some(slot) = &self.stream else {
            return;
        };
        match slot.start().await {
            Ok(()) => {
                debug!("Stream endpoint '{}' started", self.name);
                self.record_response(STREAM_OPEN_CODE, None).await;
            }
            Err(e) => {
                warn!("Stream endpoint '{}' failed to start: {}", self.name, e);
                self.record_error(ApiError::dead_stream(&slot.args().url, e.to_string()))
                    .await;
            }
        }
    }

    /// Stop the stream and return the endpoint to idle
    pub async fn stop_stream(&self) {
        if let Some(slot) = &self.stream {
            slot.stop().await;
            self.lock().await.set_idle();
        }
    }
}
