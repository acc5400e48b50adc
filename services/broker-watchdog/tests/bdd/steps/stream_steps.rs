//! BDD step definitions for stream liveness and restarts

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use cucumber::{given, then, when};

use broker_watchdog::endpoint::Endpoint;
use broker_watchdog::policy::{StreamPolicy, RESTARTS_EXHAUSTED_MESSAGE};
use broker_watchdog::stream::{StreamArgs, StreamSlot};
use broker_watchdog::watchdog::Watchdog;

use crate::world::{TestStreamFactory, WatchdogWorld};

fn add_stream_endpoint(world: &mut WatchdogWorld, name: String, refuse: bool) {
    let factory = Arc::new(TestStreamFactory::default());
    factory.refuse.store(refuse, Ordering::SeqCst);
    let slot = StreamSlot::new(
        StreamArgs::new(format!("wss://stream.example/{}", name)),
        factory.clone(),
    );
    world
        .endpoints
        .insert(name.clone(), Arc::new(Endpoint::with_stream(name, slot)));
    world.streams = Some(factory);
}

fn factory(world: &WatchdogWorld) -> Arc<TestStreamFactory> {
    Arc::clone(world.streams.as_ref().expect("stream factory not set"))
}

#[given(expr = "a stream endpoint {string}")]
fn stream_endpoint(world: &mut WatchdogWorld, name: String) {
    add_stream_endpoint(world, name, false);
}

#[given(expr = "a stream endpoint {string} that refuses to connect")]
fn refusing_stream_endpoint(world: &mut WatchdogWorld, name: String) {
    add_stream_endpoint(world, name, true);
}

#[given(expr = "a stream watchdog allowing {int} restart(s) per {int} seconds")]
fn stream_watchdog(world: &mut WatchdogWorld, max_restarts: u32, window_seconds: u64) {
    let endpoints: Vec<_> = world
        .endpoints
        .values()
        .filter(|e| e.stream().is_some())
        .cloned()
        .collect();
    let policy = StreamPolicy::new(
        Duration::from_secs(30),
        max_restarts,
        Duration::from_secs(window_seconds),
        Duration::ZERO,
    );
    world.stream_watchdog = Some(Watchdog::new("streams", endpoints, policy));
    world.clock = None;
    world.now();
}

#[given(expr = "the stream {string} has been started")]
async fn stream_started(world: &mut WatchdogWorld, name: String) {
    world.endpoint(&name).start_stream().await;
}

#[when(expr = "the stream {string} is started")]
async fn start_stream(world: &mut WatchdogWorld, name: String) {
    world.endpoint(&name).start_stream().await;
}

#[given(expr = "the stream {string} sent a heartbeat")]
fn heartbeat(world: &mut WatchdogWorld, _name: String) {
    let now = world.now();
    factory(world).beat(now);
}

#[when(expr = "{int} seconds pass")]
fn time_passes(world: &mut WatchdogWorld, seconds: u64) {
    let now = world.now();
    world.clock = Some(now + Duration::from_secs(seconds));
}

#[when(expr = "the stream watchdog scans {int} time(s)")]
async fn stream_scans(world: &mut WatchdogWorld, count: u32) {
    let now = world.now();
    let watchdog = world
        .stream_watchdog
        .as_mut()
        .expect("stream watchdog not set");
    for _ in 0..count {
        watchdog.scan_at(now).await;
    }
}

#[then(expr = "the stream {string} has been restarted {int} time(s)")]
fn restarted(world: &mut WatchdogWorld, _name: String, count: u32) {
    assert_eq!(factory(world).opened(), count + 1);
}

#[then(expr = "the restart counter of {string} is {int}")]
fn restart_counter(world: &mut WatchdogWorld, name: String, count: u32) {
    let watchdog = world
        .stream_watchdog
        .as_ref()
        .expect("stream watchdog not set");
    assert_eq!(watchdog.policy().restart_count(&name), count);
}

#[then(expr = "the stream log has {int} entry/entries")]
fn stream_log_len(world: &mut WatchdogWorld, count: usize) {
    let watchdog = world
        .stream_watchdog
        .as_ref()
        .expect("stream watchdog not set");
    assert_eq!(watchdog.log().len(), count);
}

#[then("the last stream log entry says the restarts are exhausted")]
fn last_entry_exhausted(world: &mut WatchdogWorld) {
    let watchdog = world
        .stream_watchdog
        .as_ref()
        .expect("stream watchdog not set");
    let entry = watchdog.log().entries().last().expect("stream log is empty");
    let details = entry.error_details.as_ref().unwrap();
    assert_eq!(details["code"], 999);
    assert_eq!(details["message"], RESTARTS_EXHAUSTED_MESSAGE);
}

#[then(expr = "the recorded stream error mentions {string}")]
async fn stream_error_mentions(world: &mut WatchdogWorld, text: String) {
    let endpoint = world
        .endpoints
        .values()
        .find(|e| e.stream().is_some())
        .cloned()
        .expect("no stream endpoint");
    let status = endpoint.snapshot().await;
    let message = status.error.expect("no error recorded").message;
    assert!(message.contains(&text), "{}", message);
}
