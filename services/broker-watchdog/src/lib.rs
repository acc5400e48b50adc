//! Broker watchdog - heartbeat watchdogs for a broker client session
//!
//! Endpoints record the outcome of every request made against them; three
//! watchdogs poll those endpoints and log transport errors, order
//! confirmations and dead streams, restarting streams within a budget.

pub mod api;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod io;
pub mod log;
pub mod policy;
pub mod probe;
pub mod stream;
pub mod watchdog;

pub use config::{load_config, Config};
pub use error::{Result, WatchdogError};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::api::ApiClient;
use crate::config::EndpointConfig;
use crate::endpoint::{Endpoint, EndpointHandle, EndpointKind};
use crate::io::{ApiRequest, HttpClient, ReqwestHttpClient};
use crate::log::EventLog;
use crate::policy::{ErrorPolicy, OrderPolicy, StreamPolicy};
use crate::probe::Probe;
use crate::stream::{StreamArgs, StreamFactory, StreamSlot, WsStreamFactory};
use crate::watchdog::Watchdog;

/// Endpoints, probes and watchdogs of one broker session, wired explicitly
pub struct Session {
    endpoints: Vec<EndpointHandle>,
    base_urls: HashMap<String, String>,
    api: Arc<ApiClient>,
    probes: Vec<Probe>,
    errors: Option<Watchdog<ErrorPolicy>>,
    orders: Option<Watchdog<OrderPolicy>>,
    streams: Option<Watchdog<StreamPolicy>>,
}

impl Session {
    pub fn new(
        config: &Config,
        http: Arc<dyn HttpClient>,
        stream_factory: Arc<dyn StreamFactory>,
    ) -> Result<Self> {
        config.validate()?;

        let mut endpoints = Vec::new();
        let mut base_urls = HashMap::new();
        let mut probes = Vec::new();
        for endpoint_config in &config.endpoints {
            let endpoint = match endpoint_config {
                EndpointConfig::Rest {
                    name,
                    base_url,
                    probe_path,
                    probe_interval_seconds,
                } => {
                    let endpoint = Arc::new(Endpoint::new(name.clone(), EndpointKind::Rest));
                    if let Some(path) = probe_path {
                        probes.push(Probe::new(
                            Arc::clone(&endpoint),
                            join_url(base_url, path),
                            Duration::from_secs(*probe_interval_seconds),
                        ));
                    }
                    base_urls.insert(name.clone(), base_url.clone());
                    endpoint
                }
                EndpointConfig::Orders { name, base_url } => {
                    base_urls.insert(name.clone(), base_url.clone());
                    Arc::new(Endpoint::new(name.clone(), EndpointKind::Orders))
                }
                EndpointConfig::Stream {
                    name,
                    url,
                    subscribe,
                    history_size,
                    connect_timeout_seconds,
                } => {
                    let args = StreamArgs {
                        url: url.clone(),
                        subscribe: subscribe.clone(),
                        history_size: *history_size,
                        connect_timeout_seconds: *connect_timeout_seconds,
                    };
                    let slot = StreamSlot::new(args, Arc::clone(&stream_factory));
                    Arc::new(Endpoint::with_stream(name.clone(), slot))
                }
            };
            tracing::debug!("Created {} endpoint '{}'", endpoint.kind(), endpoint.name());
            endpoints.push(endpoint);
        }

        let of_kind = |kind: EndpointKind| -> Vec<EndpointHandle> {
            endpoints
                .iter()
                .filter(|e| e.kind() == kind)
                .cloned()
                .collect()
        };

        let errors = if config.errors.enabled && !endpoints.is_empty() {
            Some(
                Watchdog::open(
                    "errors",
                    endpoints.clone(),
                    ErrorPolicy,
                    config.errors.log_path.clone(),
                )?
                .with_print(config.errors.print)
                .with_scan_interval(config.errors.scan_interval()),
            )
        } else {
            None
        };

        let order_endpoints = of_kind(EndpointKind::Orders);
        let orders = if config.orders.enabled && !order_endpoints.is_empty() {
            Some(
                Watchdog::open(
                    "orders",
                    order_endpoints,
                    OrderPolicy,
                    config.orders.log_path.clone(),
                )?
                .with_print(config.orders.print)
                .with_scan_interval(config.orders.scan_interval()),
            )
        } else {
            None
        };

        let stream_endpoints = of_kind(EndpointKind::Stream);
        let streams = if config.streams.monitor.enabled && !stream_endpoints.is_empty() {
            Some(
                Watchdog::open(
                    "streams",
                    stream_endpoints,
                    StreamPolicy::from_config(&config.streams),
                    config.streams.monitor.log_path.clone(),
                )?
                .with_print(config.streams.monitor.print)
                .with_scan_interval(config.streams.monitor.scan_interval()),
            )
        } else {
            None
        };

        Ok(Self {
            endpoints,
            base_urls,
            api: Arc::new(ApiClient::new(http, config.credentials.clone())),
            probes,
            errors,
            orders,
            streams,
        })
    }

    pub fn endpoints(&self) -> &[EndpointHandle] {
        &self.endpoints
    }

    pub fn endpoint(&self, name: &str) -> Option<EndpointHandle> {
        self.endpoints.iter().find(|e| e.name() == name).cloned()
    }

    pub fn api(&self) -> Arc<ApiClient> {
        Arc::clone(&self.api)
    }

    pub fn has_watchdog(&self, name: &str) -> bool {
        match name {
            "errors" => self.errors.is_some(),
            "orders" => self.orders.is_some(),
            "streams" => self.streams.is_some(),
            _ => false,
        }
    }

    /// Submit an order through the named orders endpoint
    pub async fn submit_order(
        &self,
        endpoint_name: &str,
        order: serde_json::Value,
    ) -> Result<(serde_json::Value, u16)> {
        submit_order(&self.api, &self.endpoints, &self.base_urls, endpoint_name, order).await
    }

    /// Start streams, probes and watchdogs
    pub async fn start(self, cancel: CancellationToken) -> RunningSession {
        for endpoint in &self.endpoints {
            endpoint.start_stream().await;
        }

        tracing::info!(
            "Session started: {} endpoints, {} probes",
            self.endpoints.len(),
            self.probes.len()
        );

        let api = self.api;
        let probes = self
            .probes
            .into_iter()
            .map(|probe| tokio::spawn(probe.run(Arc::clone(&api), cancel.clone())))
            .collect();

        let errors = self.errors.map(|w| tokio::spawn(w.run(cancel.clone())));
        let orders = self.orders.map(|w| tokio::spawn(w.run(cancel.clone())));
        let streams = self.streams.map(|w| tokio::spawn(w.run(cancel.clone())));

        RunningSession {
            endpoints: self.endpoints,
            base_urls: self.base_urls,
            api,
            probes,
            errors,
            orders,
            streams,
            cancel,
        }
    }
}

/// Logs handed back by the watchdogs of a finished session
#[derive(Debug, Default)]
pub struct SessionLogs {
    pub errors: Option<EventLog>,
    pub orders: Option<EventLog>,
    pub streams: Option<EventLog>,
}

/// A session whose tasks are running
pub struct RunningSession {
    endpoints: Vec<EndpointHandle>,
    base_urls: HashMap<String, String>,
    api: Arc<ApiClient>,
    probes: Vec<JoinHandle<()>>,
    errors: Option<JoinHandle<EventLog>>,
    orders: Option<JoinHandle<EventLog>>,
    streams: Option<JoinHandle<EventLog>>,
    cancel: CancellationToken,
}

impl RunningSession {
    pub fn endpoint(&self, name: &str) -> Option<EndpointHandle> {
        self.endpoints.iter().find(|e| e.name() == name).cloned()
    }

    pub fn api(&self) -> Arc<ApiClient> {
        Arc::clone(&self.api)
    }

    /// Submit an order while the watchdogs are running
    pub async fn submit_order(
        &self,
        endpoint_name: &str,
        order: serde_json::Value,
    ) -> Result<(serde_json::Value, u16)> {
        submit_order(&self.api, &self.endpoints, &self.base_urls, endpoint_name, order).await
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for cancellation, stop every task and stream, return the logs
    ///
    /// A watchdog task that panicked is reported and yields no log.
    pub async fn join(self) -> SessionLogs {
        self.cancel.cancelled().await;

        let logs = SessionLogs {
            errors: join_watchdog("errors", self.errors).await,
            orders: join_watchdog("orders", self.orders).await,
            streams: join_watchdog("streams", self.streams).await,
        };

        for probe in self.probes {
            if let Err(e) = probe.await {
                tracing::error!("Probe task failed: {}", e);
            }
        }

        for endpoint in &self.endpoints {
            endpoint.stop_stream().await;
        }

        logs
    }
}

async fn join_watchdog(name: &str, handle: Option<JoinHandle<EventLog>>) -> Option<EventLog> {
    match handle?.await {
        Ok(log) => Some(log),
        Err(e) => {
            tracing::error!("Watchdog '{}' task failed: {}", name, e);
            None
        }
    }
}

async fn submit_order(
    api: &ApiClient,
    endpoints: &[EndpointHandle],
    base_urls: &HashMap<String, String>,
    endpoint_name: &str,
    order: serde_json::Value,
) -> Result<(serde_json::Value, u16)> {
    let endpoint = endpoints
        .iter()
        .find(|e| e.name() == endpoint_name && e.kind() == EndpointKind::Orders)
        .ok_or_else(|| {
            WatchdogError::Config(format!("No orders endpoint named '{}'", endpoint_name))
        })?;
    let base_url = base_urls
        .get(endpoint_name)
        .ok_or_else(|| WatchdogError::Config(format!("No base URL for '{}'", endpoint_name)))?;
    api.request(endpoint, ApiRequest::post(join_url(base_url, "/v2/orders"), order))
        .await
}

fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// Run the broker watchdog service with the given configuration
pub async fn run(config: Config) -> Result<()> {
    let http: Arc<dyn HttpClient> = Arc::new(ReqwestHttpClient::new());
    let stream_factory: Arc<dyn StreamFactory> = Arc::new(WsStreamFactory);
    let cancel = CancellationToken::new();

    let session = Session::new(&config, http, stream_factory)?;

    let cancel_for_signal = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("Shutdown signal received"),
            Err(e) => tracing::error!("Failed to listen for ctrl-c: {}", e),
        }
        cancel_for_signal.cancel();
    });

    let running = session.start(cancel).await;
    tracing::info!("Broker watchdog started");

    let logs = running.join().await;
    for (name, log) in [
        ("errors", &logs.errors),
        ("orders", &logs.orders),
        ("streams", &logs.streams),
    ] {
        if let Some(log) = log {
            tracing::info!("Watchdog '{}' recorded {} entries", name, log.len());
        }
    }
    tracing::info!("Broker watchdog stopped");

    Ok(())
}
