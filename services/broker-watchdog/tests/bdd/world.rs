//! BDD test world for the broker watchdog

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use async_trait::async_trait;
use cucumber::World;
use tokio::sync::broadcast;

use broker_watchdog::config::Credentials;
use broker_watchdog::endpoint::EndpointHandle;
use broker_watchdog::io::{ApiRequest, HttpClient, HttpResponse};
use broker_watchdog::log::EventLog;
use broker_watchdog::policy::{ErrorPolicy, OrderPolicy, StreamPolicy};
use broker_watchdog::stream::{StreamArgs, StreamConnection, StreamFactory};
use broker_watchdog::watchdog::Watchdog;
use broker_watchdog::WatchdogError;

#[derive(Debug, Default, World)]
pub struct WatchdogWorld {
    pub endpoints: HashMap<String, EndpointHandle>,
    pub clock: Option<Instant>,

    // Watchdogs under test
    pub error_watchdog: Option<Watchdog<ErrorPolicy>>,
    pub order_watchdog: Option<Watchdog<OrderPolicy>>,
    pub stream_watchdog: Option<Watchdog<StreamPolicy>>,
    pub streams: Option<Arc<TestStreamFactory>>,

    // API client testing
    pub http: Option<Arc<ScriptedHttpClient>>,
    pub credentials: Option<Credentials>,
    pub api_result: Option<broker_watchdog::Result<(serde_json::Value, u16)>>,

    // Log persistence testing
    pub log_dir: Option<tempfile::TempDir>,
    pub reopened_log: Option<EventLog>,
}

impl WatchdogWorld {
    pub fn endpoint(&self, name: &str) -> EndpointHandle {
        Arc::clone(
            self.endpoints
                .get(name)
                .unwrap_or_else(|| panic!("endpoint {} not set", name)),
        )
    }

    pub fn log_dir(&mut self) -> &std::path::Path {
        self.log_dir
            .get_or_insert_with(|| tempfile::tempdir().unwrap())
            .path()
    }

    pub fn now(&mut self) -> Instant {
        *self.clock.get_or_insert_with(Instant::now)
    }
}

/// Stream whose heartbeat is driven by the scenario
#[derive(Debug)]
pub struct TestStream {
    heartbeat: Arc<Mutex<Option<Instant>>>,
    refuse: bool,
}

#[async_trait]
impl StreamConnection for TestStream {
    async fn start(&self) -> broker_watchdog::Result<()> {
        if self.refuse {
            return Err(WatchdogError::Stream("connection refused".to_string()));
        }
        Ok(())
    }

    async fn stop(&self) {}

    fn last_heartbeat(&self) -> Option<Instant> {
        *self.heartbeat.lock().unwrap()
    }

    fn heartbeat_count(&self) -> usize {
        usize::from(self.heartbeat.lock().unwrap().is_some())
    }

    fn subscribe(&self) -> broadcast::Receiver<String> {
        broadcast::channel(1).1
    }
}

/// Counts opened connections; all of them share one heartbeat cell
#[derive(Debug, Default)]
pub struct TestStreamFactory {
    pub heartbeat: Arc<Mutex<Option<Instant>>>,
    pub opened: AtomicU32,
    pub refuse: AtomicBool,
}

impl TestStreamFactory {
    pub fn opened(&self) -> u32 {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn beat(&self, at: Instant) {
        *self.heartbeat.lock().unwrap() = Some(at);
    }
}

impl StreamFactory for TestStreamFactory {
    fn open(&self, _args: &StreamArgs) -> Arc<dyn StreamConnection> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        Arc::new(TestStream {
            heartbeat: Arc::clone(&self.heartbeat),
            refuse: self.refuse.load(Ordering::SeqCst),
        })
    }
}

/// What the scripted HTTP client answers
#[derive(Debug, Clone)]
pub enum Reply {
    Status(u16, String),
    Unreachable,
}

/// HTTP client that answers every request with one scripted reply
#[derive(Debug)]
pub struct ScriptedHttpClient {
    reply: Reply,
    pub last_request: Mutex<Option<ApiRequest>>,
}

impl ScriptedHttpClient {
    pub fn new(reply: Reply) -> Self {
        Self {
            reply,
            last_request: Mutex::new(None),
        }
    }
}

#[async_trait]
impl HttpClient for ScriptedHttpClient {
    async fn send(&self, request: &ApiRequest) -> broker_watchdog::Result<HttpResponse> {
        *self.last_request.lock().unwrap() = Some(request.clone());
        match &self.reply {
            Reply::Status(status, body) => Ok(HttpResponse {
                status: *status,
                body: body.clone(),
            }),
            Reply::Unreachable => Err(WatchdogError::Http(format!(
                "{} {} failed: connection refused",
                request.method, request.url
            ))),
        }
    }
}
