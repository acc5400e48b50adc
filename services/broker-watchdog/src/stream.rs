//! Streaming connections and their heartbeat history
//!
//! A stream endpoint owns a [`StreamSlot`], which remembers the arguments the
//! stream was built from so that a dead connection can be replaced by an
//! identical fresh one.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Result, WatchdogError};

/// Content sink capacity per connection
const CONTENT_CHANNEL_CAPACITY: usize = 1024;

/// Arguments a stream was constructed with
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamArgs {
    pub url: String,
    /// Message sent right after the connection opens (auth/subscribe)
    #[serde(default)]
    pub subscribe: Option<serde_json::Value>,
    /// Number of heartbeat timestamps kept per connection
    #[serde(default = "default_history_size")]
    pub history_size: usize,
    /// Upper bound on the WebSocket handshake
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: u64,
}

fn default_history_size() -> usize {
    64
}

fn default_connect_timeout() -> u64 {
    10
}

impl StreamArgs {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            subscribe: None,
            history_size: default_history_size(),
            connect_timeout_seconds: default_connect_timeout(),
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds)
    }
}

/// A live streaming connection
#[async_trait]
pub trait StreamConnection: Send + Sync {
    /// Open the connection and begin recording heartbeats
    async fn start(&self) -> Result<()>;

    /// Close the connection. Idempotent.
    async fn stop(&self);

    /// Timestamp of the most recent heartbeat, if any
    fn last_heartbeat(&self) -> Option<Instant>;

    /// Number of heartbeats currently held in the history
    fn heartbeat_count(&self) -> usize;

    /// Subscribe to the text content received on this connection
    fn subscribe(&self) -> broadcast::Receiver<String>;
}

/// Builds fresh connections from their construction arguments
pub trait StreamFactory: Send + Sync {
    fn open(&self, args: &StreamArgs) -> Arc<dyn StreamConnection>;
}

/// The current connection of a stream endpoint
pub struct StreamSlot {
    args: StreamArgs,
    factory: Arc<dyn StreamFactory>,
    current: Mutex<Option<Arc<dyn StreamConnection>>>,
}

impl std::fmt::Debug for StreamSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamSlot")
            .field("url", &self.args.url)
            .finish()
    }
}

impl StreamSlot {
    pub fn new(args: StreamArgs, factory: Arc<dyn StreamFactory>) -> Self {
        Self {
            args,
            factory,
            current: Mutex::new(None),
        }
    }

    pub fn args(&self) -> &StreamArgs {
        &self.args
    }

    /// Replace the current connection with a new one built from the original arguments
    ///
    /// The new connection is kept even when starting it fails, so that its
    /// empty heartbeat history is what the stream watchdog sees.
    pub async fn start(&self) -> Result<()> {
        let mut current = self.current.lock().await;
        if let Some(old) = current.take() {
            old.stop().await;
        }
        let connection = self.factory.open(&self.args);
        let result = connection.start().await;
        *current = Some(connection);
        result
    }

    /// Stop and drop the current connection
    pub async fn stop(&self) {
        if let Some(connection) = self.current.lock().await.take() {
            connection.stop().await;
        }
    }

    pub async fn is_started(&self) -> bool {
        self.current.lock().await.is_some()
    }

    pub async fn last_heartbeat(&self) -> Option<Instant> {
        self.current
            .lock()
            .await
            .as_ref()
            .and_then(|c| c.last_heartbeat())
    }

    pub async fn subscribe(&self) -> Option<broadcast::Receiver<String>> {
        self.current.lock().await.as_ref().map(|c| c.subscribe())
    }
}

/// Bounded heartbeat history shared between a connection and its reader task
#[derive(Debug, Clone)]
struct HeartbeatHistory {
    beats: Arc<StdMutex<VecDeque<Instant>>>,
    capacity: usize,
}

impl HeartbeatHistory {
    fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            beats: Arc::new(StdMutex::new(VecDeque::with_capacity(capacity))),
            capacity,
        }
    }

    fn beat(&self) {
        let mut beats = self.beats.lock().unwrap_or_else(|e| e.into_inner());
        if beats.len() >= self.capacity {
            beats.pop_front();
        }
        beats.push_back(Instant::now());
    }

    fn last(&self) -> Option<Instant> {
        self.beats
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .back()
            .copied()
    }

    fn len(&self) -> usize {
        self.beats.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

/// WebSocket stream; every received frame counts as a heartbeat
pub struct WsStream {
    args: StreamArgs,
    heartbeats: HeartbeatHistory,
    content: broadcast::Sender<String>,
    cancel: CancellationToken,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl WsStream {
    pub fn new(args: StreamArgs) -> Self {
        let (content, _) = broadcast::channel(CONTENT_CHANNEL_CAPACITY);
        Self {
            heartbeats: HeartbeatHistory::new(args.history_size),
            args,
            content,
            cancel: CancellationToken::new(),
            reader: Mutex::new(None),
        }
    }
}

#[async_trait]
impl StreamConnection for WsStream {
    async fn start(&self) -> Result<()> {
        info!("Connecting stream {}", self.args.url);
        let timeout = self.args.connect_timeout();
        let (ws, response) = tokio::time::timeout(timeout, connect_async(self.args.url.as_str()))
            .await
            .map_err(|_| {
                WatchdogError::Stream(format!(
                    "connect {} timed out after {}s",
                    self.args.url,
                    timeout.as_secs()
                ))
            })?
            .map_err(|e| WatchdogError::Stream(format!("connect {} failed: {}", self.args.url, e)))?;
        debug!("Stream {} connected ({})", self.args.url, response.status());
        self.heartbeats.beat();

        let (mut write, mut read) = ws.split();

        if let Some(subscribe) = &self.args.subscribe {
            write
                .send(Message::Text(subscribe.to_string()))
                .await
                .map_err(|e| WatchdogError::Stream(format!("subscribe failed: {}", e)))?;
        }

        let heartbeats = self.heartbeats.clone();
        let content = self.content.clone();
        let cancel = self.cancel.clone();
        let url = self.args.url.clone();

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("Stream {} reader cancelled", url);
                        let _ = write.send(Message::Close(None)).await;
                        break;
                    }
                    frame = read.next() => {
                        match frame {
                            Some(Ok(Message::Text(text))) => {
                                heartbeats.beat();
                                let _ = content.send(text);
                            }
                            Some(Ok(Message::Ping(data))) => {
                                heartbeats.beat();
                                if let Err(e) = write.send(Message::Pong(data)).await {
                                    warn!("Stream {} pong failed: {}", url, e);
                                    break;
                                }
                            }
                            Some(Ok(Message::Close(_))) => {
                                info!("Stream {} closed by remote", url);
                                break;
                            }
                            Some(Ok(_)) => heartbeats.beat(),
                            Some(Err(e)) => {
                                warn!("Stream {} read error: {}", url, e);
                                break;
                            }
                            None => break,
                        }
                    }
                }
            }
        });

        *self.reader.lock().await = Some(handle);
        Ok(())
    }

    async fn stop(&self) {
        self.cancel.cancel();
        if let Some(handle) = self.reader.lock().await.take() {
            let _ = handle.await;
        }
        debug!("Stream {} stopped", self.args.url);
    }

    fn last_heartbeat(&self) -> Option<Instant> {
        self.heartbeats.last()
    }

    fn heartbeat_count(&self) -> usize {
        self.heartbeats.len()
    }

    fn subscribe(&self) -> broadcast::Receiver<String> {
        self.content.subscribe()
    }
}

/// Factory for [`WsStream`] connections
#[derive(Debug, Default)]
pub struct WsStreamFactory;

impl StreamFactory for WsStreamFactory {
    fn open(&self, args: &StreamArgs) -> Arc<dyn StreamConnection> {
        Arc::new(WsStream::new(args.clone()))
    }
}
