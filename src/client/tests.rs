use super::{ClientLog, ClientSession, FailureStage, SessionConfig, SessionState};
use crate::config::Settings;
use crate::transport::ProtocolVersion;
use chrono::{Local, TimeZone};
use std::fs;
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;
use tracing::Level;

#[test]
fn test_session_config_from_settings() {
    let mut settings = Settings::default();
    settings.broker.username = Some("user".to_string());
    settings.broker.password = Some("pass".to_string());

    let config = SessionConfig::from_settings(&settings, 4).unwrap();
    assert_eq!(config.index, 4);
    assert_eq!(config.client_id, "mqtt-test-4");
    assert_eq!(config.endpoint.url(), "ws://127.0.0.1:8083/mqtt");
    assert!(!config.clean_session);
    assert_eq!(config.session_expiry, Duration::from_secs(3600));
    assert_eq!(config.communication_timeout, Duration::from_secs(30));
    assert_eq!(config.protocol, ProtocolVersion::V311);
    assert_eq!(config.credentials.unwrap().username, "user");
}

#[test]
fn test_client_ids_are_reproducible() {
    let settings = Settings::default();
    let first = SessionConfig::from_settings(&settings, 2).unwrap();
    let second = SessionConfig::from_settings(&settings, 2).unwrap();
    assert_eq!(first.client_id, second.client_id);
}

#[test]
fn test_first_failure_wins() {
    let dir = tempdir().unwrap();
    let config = SessionConfig::from_settings(&Settings::default(), 0).unwrap();
    let log = Arc::new(ClientLog::new(dir.path(), 0));
    let mut session: ClientSession<()> = ClientSession::new(config, log);
    assert_eq!(session.state, SessionState::Uninitialized);

    session.fail(FailureStage::Connect, "refused");
    session.fail(FailureStage::Disconnect, "not connected");

    let failure = session.failure.clone().unwrap();
    assert_eq!(failure.stage, FailureStage::Connect);
    assert_eq!(failure.reason, "refused");
    assert!(!session.is_connected());
}

#[test]
fn test_log_lines_are_appended_per_client() {
    let dir = tempdir().unwrap();
    let log = ClientLog::new(dir.path(), 3);
    let now = Local.with_ymd_and_hms(2024, 5, 17, 9, 30, 0).unwrap();

    log.write_at(now, Level::INFO, "Client 3 subscribed to /test");
    log.write_at(now, Level::ERROR, "Client 3 connect failed: refused");

    let path = log.path_for(now.date_naive());
    assert_eq!(path, dir.path().join("client3").join("client320240517.txt"));

    let contents = fs::read_to_string(path).unwrap();
    let lines: Vec<&str> = contents.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].starts_with("2024-05-17 09:30:00.000"));
    assert!(lines[0].ends_with("[INF] Client 3 subscribed to /test"));
    assert!(lines[1].ends_with("[ERR] Client 3 connect failed: refused"));
}

#[test]
fn test_log_rolls_over_on_new_day() {
    let dir = tempdir().unwrap();
    let log = ClientLog::new(dir.path(), 0);
    let day_one = Local.with_ymd_and_hms(2024, 5, 17, 23, 59, 59).unwrap();
    let day_two = Local.with_ymd_and_hms(2024, 5, 18, 0, 0, 1).unwrap();

    log.write_at(day_one, Level::INFO, "late");
    log.write_at(day_two, Level::INFO, "early");
    log.flush();

    let first = fs::read_to_string(log.path_for(day_one.date_naive())).unwrap();
    let second = fs::read_to_string(log.path_for(day_two.date_naive())).unwrap();
    assert!(first.contains("late") && !first.contains("early"));
    assert!(second.contains("early") && !second.contains("late"));
}

#[test]
fn test_info_entries_are_buffered_until_flush() {
    let dir = tempdir().unwrap();
    let log = ClientLog::new(dir.path(), 2);
    let now = Local.with_ymd_and_hms(2024, 5, 17, 12, 0, 0).unwrap();
    let path = log.path_for(now.date_naive());

    log.write_at(now, Level::INFO, "Client 2 received message #1 on topic: /test");
    assert_eq!(fs::read_to_string(&path).unwrap(), "");

    log.flush();
    assert!(fs::read_to_string(&path).unwrap().contains("message #1"));

    log.write_at(now, Level::WARN, "Client 2 not started: shutdown requested");
    assert!(fs::read_to_string(&path).unwrap().contains("[WRN] Client 2 not started"));
}

#[test]
fn test_unwritable_log_does_not_panic() {
    let dir = tempdir().unwrap();
    // A regular file where the client directory should be.
    let root = dir.path().join("blocked");
    fs::write(&root, b"").unwrap();
    let log = ClientLog::new(&root, 1);
    log.info("first");
    log.error("second");
    log.flush();
}
