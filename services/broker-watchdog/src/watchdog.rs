//! Generic polling watchdog
//!
//! A [`Watchdog`] repeatedly scans a fixed list of endpoints. A
//! [`WatchPolicy`] decides whether each endpoint is healthy; unhealthy
//! payloads are logged once until the endpoint recovers or the payload
//! changes.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures_util::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::endpoint::{Endpoint, EndpointHandle, EndpointStatus};
use crate::error::Result;
use crate::log::{DetailsField, EventLog};

/// Result of assessing one endpoint
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Healthy,
    /// Report-worthy state with the payload to log
    Unhealthy(serde_json::Value),
}

/// Health classification and reaction strategy of a watchdog
#[async_trait]
pub trait WatchPolicy: Send {
    /// Payload field used by this policy's log entries
    fn details_field(&self) -> DetailsField;

    /// Called once before each scan
    async fn begin_scan(&mut self, _now: Instant) {}

    /// Classify `status` while the endpoint's guard is held
    ///
    /// The policy may update `status`; the change is published together with
    /// the guard release.
    async fn assess(
        &mut self,
        endpoint: &Endpoint,
        status: &mut EndpointStatus,
        now: Instant,
    ) -> Verdict;

    /// Called after the guard has been released, for every endpoint
    async fn after_assess(&mut self, _endpoint: &Endpoint) {}
}

/// Deduplication state for one watched endpoint
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlagRecord {
    pub raised: bool,
    pub last_seen: Option<serde_json::Value>,
}

/// Polls endpoints and logs state transitions reported by its policy
#[derive(Debug)]
pub struct Watchdog<P> {
    name: String,
    endpoints: Vec<EndpointHandle>,
    flags: Vec<FlagRecord>,
    policy: P,
    log: EventLog,
    print: bool,
    scan_interval: Duration,
}

impl<P: WatchPolicy> Watchdog<P> {
    /// Watchdog with an in-memory log
    pub fn new(name: impl Into<String>, endpoints: Vec<EndpointHandle>, policy: P) -> Self {
        let log = EventLog::in_memory(policy.details_field());
        Self::with_log(name.into(), endpoints, policy, log)
    }

    /// Watchdog whose log is loaded from and appended to `log_path`
    pub fn open(
        name: impl Into<String>,
        endpoints: Vec<EndpointHandle>,
        policy: P,
        log_path: Option<PathBuf>,
    ) -> Result<Self> {
        let log = EventLog::open(log_path, policy.details_field())?;
        Ok(Self::with_log(name.into(), endpoints, policy, log))
    }

    fn with_log(name: String, endpoints: Vec<EndpointHandle>, policy: P, log: EventLog) -> Self {
        let flags = vec![FlagRecord::default(); endpoints.len()];
        Self {
            name,
            endpoints,
            flags,
            policy,
            log,
            print: false,
            scan_interval: Duration::from_millis(100),
        }
    }

    /// Print each new entry to stdout
    pub fn with_print(mut self, print: bool) -> Self {
        self.print = print;
        self
    }

    pub fn with_scan_interval(mut self, scan_interval: Duration) -> Self {
        self.scan_interval = scan_interval;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn log(&self) -> &EventLog {
        &self.log
    }

    pub fn policy(&self) -> &P {
        &self.policy
    }

    /// Flag record of the endpoint called `name`
    pub fn flag(&self, name: &str) -> Option<&FlagRecord> {
        self.endpoints
            .iter()
            .position(|e| e.name() == name)
            .map(|i| &self.flags[i])
    }

    pub async fn scan(&mut self) -> usize {
        self.scan_at(Instant::now()).await
    }

    /// Scan every endpoint once, returning the number of entries appended
    pub async fn scan_at(&mut self, now: Instant) -> usize {
        self.policy.begin_scan(now).await;

        let mut appended = 0;
        for (endpoint, flag) in self.endpoints.iter().zip(self.flags.iter_mut()) {
            {
                let mut status = endpoint.lock().await;
                match self.policy.assess(endpoint, &mut status, now).await {
                    Verdict::Healthy => {
                        if flag.raised {
                            debug!(
                                "Watchdog '{}': endpoint '{}' recovered ({})",
                                self.name,
                                endpoint.name(),
                                status.code
                            );
                            *flag = FlagRecord::default();
                        }
                    }
                    Verdict::Unhealthy(payload)
                        if flag.raised && flag.last_seen.as_ref() == Some(&payload) => {}
                    Verdict::Unhealthy(payload) => {
                        let entry = self.log.append(endpoint.name(), payload.clone());
                        warn!(
                            "Watchdog '{}': endpoint '{}' reported {} (entry {})",
                            self.name,
                            endpoint.name(),
                            status.code,
                            entry.entry_id
                        );
                        if self.print {
                            match serde_json::to_string_pretty(entry) {
                                Ok(text) => println!("{}", text),
                                Err(e) => warn!("Failed to render log entry: {}", e),
                            }
                        }
                        *flag = FlagRecord {
                            raised: true,
                            last_seen: Some(payload),
                        };
                        appended += 1;
                    }
                }
            }
            self.policy.after_assess(endpoint).await;
        }
        appended
    }

    /// Scan until `cancel` fires, then hand back the log
    ///
    /// Cancellation is observed between scans only. A scan that panics is
    /// reported and the next scan starts as usual.
    pub async fn run(mut self, cancel: CancellationToken) -> EventLog {
        info!(
            "Watchdog '{}' started ({} endpoints)",
            self.name,
            self.endpoints.len()
        );
        while !cancel.is_cancelled() {
            if let Err(panic) = AssertUnwindSafe(self.scan()).catch_unwind().await {
                error!(
                    "Watchdog '{}' scan panicked: {}",
                    self.name,
                    panic_message(panic.as_ref())
                );
            }
            tokio::select! {
                _ = tokio::time::sleep(self.scan_interval) => {}
                _ = cancel.cancelled() => {}
            }
        }
        info!(
            "Watchdog '{}' stopped with {} log entries",
            self.name,
            self.log.len()
        );
        self.log
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}
