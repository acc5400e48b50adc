//! The three watchdog policies: transport errors, order confirmations and
//! stream liveness

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::config::StreamMonitorConfig;
use crate::endpoint::{ApiError, Endpoint, EndpointStatus, ResultCode};
use crate::log::DetailsField;
use crate::watchdog::{Verdict, WatchPolicy};

/// Message used once a stream has used up its restarts
pub const RESTARTS_EXHAUSTED_MESSAGE: &str = "Max stream restarts attempted, leaving stream dead.";

/// Reports endpoints whose last request failed
#[derive(Debug, Default, Clone, Copy)]
pub struct ErrorPolicy;

#[async_trait]
impl WatchPolicy for ErrorPolicy {
    fn details_field(&self) -> DetailsField {
        DetailsField::Error
    }

    async fn assess(
        &mut self,
        _endpoint: &Endpoint,
        status: &mut EndpointStatus,
        _now: Instant,
    ) -> Verdict {
        if status.code == ResultCode::Idle || status.code.is_success() {
            return Verdict::Healthy;
        }
        let payload = status
            .error
            .as_ref()
            .and_then(|error| serde_json::to_value(error).ok())
            .unwrap_or_else(|| {
                json!({
                    "code": status.code.as_u16(),
                    "message": "no error details recorded",
                })
            });
        Verdict::Unhealthy(payload)
    }
}

/// Reports order confirmations
#[derive(Debug, Default, Clone, Copy)]
pub struct OrderPolicy;

#[async_trait]
impl WatchPolicy for OrderPolicy {
    fn details_field(&self) -> DetailsField {
        DetailsField::Confirmation
    }

    async fn assess(
        &mut self,
        _endpoint: &Endpoint,
        status: &mut EndpointStatus,
        _now: Instant,
    ) -> Verdict {
        match &status.confirmation {
            Some(confirmation) => Verdict::Unhealthy(confirmation.clone()),
            None => Verdict::Healthy,
        }
    }
}

/// Detects streams whose heartbeat aged out and restarts them, up to a ceiling
#[derive(Debug)]
pub struct StreamPolicy {
    dead_on_arrival: Duration,
    max_restarts: u32,
    reset_window: Duration,
    restart_pause: Duration,
    restarts: HashMap<String, u32>,
    last_reset: Instant,
    restart_pending: bool,
}

impl StreamPolicy {
    pub fn new(
        dead_on_arrival: Duration,
        max_restarts: u32,
        reset_window: Duration,
        restart_pause: Duration,
    ) -> Self {
        Self {
            dead_on_arrival,
            max_restarts,
            reset_window,
            restart_pause,
            restarts: HashMap::new(),
            last_reset: Instant::now(),
            restart_pending: false,
        }
    }

    pub fn from_config(config: &StreamMonitorConfig) -> Self {
        Self::new(
            Duration::from_secs(config.dead_on_arrival_seconds),
            config.max_restarts,
            Duration::from_secs(config.reset_window_seconds),
            Duration::from_millis(config.restart_pause_ms),
        )
    }

    /// Restart attempts made for `name` since the last reset
    pub fn restart_count(&self, name: &str) -> u32 {
        self.restarts.get(name).copied().unwrap_or(0)
    }

    fn is_fresh(&self, last_heartbeat: Option<Instant>, now: Instant) -> bool {
        match last_heartbeat {
            Some(beat) => now.saturating_duration_since(beat) < self.dead_on_arrival,
            None => false,
        }
    }

    async fn pause(&self) {
        if !self.restart_pause.is_zero() {
            tokio::time::sleep(self.restart_pause).await;
        }
    }
}

#[async_trait]
impl WatchPolicy for StreamPolicy {
    fn details_field(&self) -> DetailsField {
        DetailsField::Error
    }

    async fn begin_scan(&mut self, now: Instant) {
        if now.saturating_duration_since(self.last_reset) >= self.reset_window {
            if self.restarts.values().any(|count| *count > 0) {
                info!("Restart window elapsed, resetting stream restart counters");
            }
            self.restarts.values_mut().for_each(|count| *count = 0);
            self.last_reset = now;
        }
    }

    async fn assess(
        &mut self,
        endpoint: &Endpoint,
        status: &mut EndpointStatus,
        now: Instant,
    ) -> Verdict {
        let Some(slot) = endpoint.stream() else {
            return Verdict::Healthy;
        };
        if status.code == ResultCode::Idle {
            return Verdict::Healthy;
        }
        if self.is_fresh(slot.last_heartbeat().await, now) {
            return Verdict::Healthy;
        }

        let count = self.restart_count(endpoint.name());
        let message = if count < self.max_restarts {
            self.restart_pending = true;
            format!(
                "Dead stream: no heartbeat within {}s, restarting stream (attempt {} of {})",
                self.dead_on_arrival.as_secs(),
                count + 1,
                self.max_restarts
            )
        } else {
            RESTARTS_EXHAUSTED_MESSAGE.to_string()
        };

        let error = ApiError::dead_stream(&slot.args().url, message);
        let payload = serde_json::to_value(&error).unwrap_or_else(|_| {
            json!({"code": error.code, "message": error.message.clone()})
        });
        status.set_error(error);
        Verdict::Unhealthy(payload)
    }

    async fn after_assess(&mut self, endpoint: &Endpoint) {
        if !std::mem::take(&mut self.restart_pending) {
            return;
        }
        let Some(slot) = endpoint.stream() else {
            return;
        };

        warn!("Restarting stream endpoint '{}'", endpoint.name());
        slot.stop().await;
        self.pause().await;
        endpoint.start_stream().await;
        self.pause().await;

        let count = self.restarts.entry(endpoint.name().to_string()).or_insert(0);
        *count += 1;
        debug!(
            "Stream endpoint '{}' restart attempts: {}/{}",
            endpoint.name(),
            count,
            self.max_restarts
        );
    }
}
