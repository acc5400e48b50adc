//! BDD step definitions for the error and order watchdogs

use std::sync::Arc;

use cucumber::{given, then, when};
use serde_json::json;

use broker_watchdog::endpoint::{ApiError, Endpoint, EndpointKind, ResultCode};
use broker_watchdog::policy::{ErrorPolicy, OrderPolicy};
use broker_watchdog::watchdog::Watchdog;

use crate::world::WatchdogWorld;

#[given(expr = "a rest endpoint {string}")]
fn rest_endpoint(world: &mut WatchdogWorld, name: String) {
    let endpoint = Arc::new(Endpoint::new(name.clone(), EndpointKind::Rest));
    world.endpoints.insert(name, endpoint);
}

#[given(expr = "an orders endpoint {string}")]
fn orders_endpoint(world: &mut WatchdogWorld, name: String) {
    let endpoint = Arc::new(Endpoint::new(name.clone(), EndpointKind::Orders));
    world.endpoints.insert(name, endpoint);
}

#[given("an error watchdog over all endpoints")]
fn error_watchdog(world: &mut WatchdogWorld) {
    let mut endpoints: Vec<_> = world.endpoints.values().cloned().collect();
    endpoints.sort_by(|a, b| a.name().cmp(b.name()));
    world.error_watchdog = Some(Watchdog::new("errors", endpoints, ErrorPolicy));
}

#[given(expr = "an error watchdog persisting to {string}")]
fn persisting_error_watchdog(world: &mut WatchdogWorld, file: String) {
    let path = world.log_dir().join(file);
    let mut endpoints: Vec<_> = world.endpoints.values().cloned().collect();
    endpoints.sort_by(|a, b| a.name().cmp(b.name()));
    world.error_watchdog =
        Some(Watchdog::open("errors", endpoints, ErrorPolicy, Some(path)).unwrap());
}

#[given("an order watchdog over the orders endpoints")]
fn order_watchdog(world: &mut WatchdogWorld) {
    let endpoints: Vec<_> = world
        .endpoints
        .values()
        .filter(|e| e.kind() == EndpointKind::Orders)
        .cloned()
        .collect();
    world.order_watchdog = Some(Watchdog::new("orders", endpoints, OrderPolicy));
}

#[when(expr = "endpoint {string} records error {int} {string}")]
async fn record_error(world: &mut WatchdogWorld, name: String, code: u16, message: String) {
    world
        .endpoint(&name)
        .record_error(ApiError {
            url: format!("https://api.example/v2/{}", name),
            headers: Default::default(),
            params: Default::default(),
            payload: Some(json!({"message": message})),
            code,
            message,
        })
        .await;
}

#[when(expr = "endpoint {string} records response {int}")]
async fn record_response(world: &mut WatchdogWorld, name: String, code: u16) {
    world.endpoint(&name).record_response(code, None).await;
}

#[when(expr = "endpoint {string} records confirmation {string}")]
async fn record_confirmation(world: &mut WatchdogWorld, name: String, order_id: String) {
    world
        .endpoint(&name)
        .record_response(200, Some(json!({"id": order_id, "status": "accepted"})))
        .await;
}

#[when(expr = "the error watchdog scans {int} time(s)")]
async fn error_scans(world: &mut WatchdogWorld, count: u32) {
    let watchdog = world.error_watchdog.as_mut().expect("error watchdog not set");
    for _ in 0..count {
        watchdog.scan().await;
    }
}

#[when(expr = "the order watchdog scans {int} time(s)")]
async fn order_scans(world: &mut WatchdogWorld, count: u32) {
    let watchdog = world.order_watchdog.as_mut().expect("order watchdog not set");
    for _ in 0..count {
        watchdog.scan().await;
    }
}

#[then(expr = "the error log has {int} entry/entries")]
fn error_log_len(world: &mut WatchdogWorld, count: usize) {
    let watchdog = world.error_watchdog.as_ref().expect("error watchdog not set");
    assert_eq!(watchdog.log().len(), count);
}

#[then(expr = "error log entry {int} has origin {string} and code {int}")]
fn error_log_entry(world: &mut WatchdogWorld, index: usize, origin: String, code: u16) {
    let watchdog = world.error_watchdog.as_ref().expect("error watchdog not set");
    let entry = &watchdog.log().entries()[index];
    assert_eq!(entry.entry_id, index as u64);
    assert_eq!(entry.origin_class, origin);
    assert_eq!(entry.error_details.as_ref().unwrap()["code"], code);
}

#[then(expr = "the order log has {int} entry/entries")]
fn order_log_len(world: &mut WatchdogWorld, count: usize) {
    let watchdog = world.order_watchdog.as_ref().expect("order watchdog not set");
    assert_eq!(watchdog.log().len(), count);
}

#[then(expr = "order log entry {int} confirms order {string}")]
fn order_log_entry(world: &mut WatchdogWorld, index: usize, order_id: String) {
    let watchdog = world.order_watchdog.as_ref().expect("order watchdog not set");
    let entry = &watchdog.log().entries()[index];
    assert!(entry.error_details.is_none());
    assert_eq!(entry.confirmation_details.as_ref().unwrap()["id"], order_id);
}

#[then(expr = "endpoint {string} reports code {int}")]
async fn endpoint_code(world: &mut WatchdogWorld, name: String, code: u16) {
    let status = world.endpoint(&name).snapshot().await;
    assert_eq!(status.code, ResultCode::Status(code));
    if !status.code.is_success() {
        assert_eq!(status.error.expect("error payload missing").code, code);
    }
}
