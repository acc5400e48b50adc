//! BDD step definitions for log persistence

use cucumber::{given, then, when};

use broker_watchdog::log::{DetailsField, EventLog};

use crate::world::WatchdogWorld;

const LEGACY_LOG: &str = concat!(
    r#"{"entryID": 0, "datetime": "2024-03-01T14:30:00Z", "originClass": "trade_updates", "errorDetails": {"url": "wss://stream.example", "code": 999, "message": "Dead stream"}},"#,
    "\n",
    r#"{"entryID": 1, "datetime": "2024-03-01T14:35:12Z", "originClass": "account", "errorDetails": {"url": "https://api.example/v2/account", "code": 500, "message": "internal error"}},"#,
    "\n"
);

#[given(expr = "a log file {string} containing two legacy entries")]
fn legacy_log(world: &mut WatchdogWorld, file: String) {
    let path = world.log_dir().join(file);
    std::fs::write(path, LEGACY_LOG).unwrap();
}

#[when(expr = "the log file {string} is reopened")]
fn reopen_log(world: &mut WatchdogWorld, file: String) {
    let path = world.log_dir().join(file);
    world.reopened_log = Some(EventLog::open(Some(path), DetailsField::Error).unwrap());
}

#[then(expr = "the reopened log has {int} entry/entries")]
fn reopened_len(world: &mut WatchdogWorld, count: usize) {
    let log = world.reopened_log.as_ref().expect("log not reopened");
    assert_eq!(log.len(), count);
}

#[then("the reopened log equals the error log")]
fn reopened_equals(world: &mut WatchdogWorld) {
    let reopened = world.reopened_log.as_ref().expect("log not reopened");
    let watchdog = world.error_watchdog.as_ref().expect("error watchdog not set");
    assert_eq!(reopened.entries(), watchdog.log().entries());
}

#[then(expr = "a new entry in the reopened log gets id {int}")]
fn next_id(world: &mut WatchdogWorld, id: u64) {
    let log = world.reopened_log.as_mut().expect("log not reopened");
    let entry = log.append("account", serde_json::json!({"code": 503}));
    assert_eq!(entry.entry_id, id);
}
