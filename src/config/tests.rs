use super::{ENV_PREFIX, Settings, load_config};
use crate::transport::{ProtocolVersion, Qos, Scheme};
use crate::utils::HarnessError;
use serial_test::serial;
use std::fs;
use tempfile::TempDir;

#[test]
fn test_default_settings() {
    let settings = Settings::default();
    assert_eq!(settings.broker.host, "127.0.0.1");
    assert_eq!(settings.broker.scheme, "ws");
    assert_eq!(settings.broker.path, "/mqtt");
    assert_eq!(settings.session.client_id_prefix, "mqtt-test-");
    assert!(!settings.session.clean_session);
    assert_eq!(settings.session.session_expiry_secs, 3600);
    assert_eq!(settings.session.communication_timeout_secs, 30);
    assert_eq!(settings.subscription.topic, "/test");
    assert_eq!(settings.subscription.qos, 2);
    assert_eq!(settings.harness.clients, 10);
    assert_eq!(settings.harness.summary_file, "logs/summary.txt");
    assert!(settings.validate().is_ok());
}

#[test]
fn typed_accessors_follow_defaults() {
    let settings = Settings::default();
    assert_eq!(settings.qos().unwrap(), Qos::ExactlyOnce);
    assert_eq!(settings.protocol().unwrap(), ProtocolVersion::V311);
    let endpoint = settings.endpoint().unwrap();
    assert_eq!(endpoint.scheme, Scheme::Ws);
    assert_eq!(endpoint.url(), "ws://127.0.0.1:8083/mqtt");
    assert_eq!(settings.client_id(7), "mqtt-test-7");
    assert!(settings.credentials().unwrap().is_none());
}

#[test]
fn zero_clients_is_rejected() {
    let mut settings = Settings::default();
    settings.harness.clients = 0;
    assert!(matches!(
        settings.validate(),
        Err(HarnessError::Configuration(_))
    ));
}

#[test]
fn empty_connection_parameters_are_rejected() {
    let mut settings = Settings::default();
    settings.broker.host = "  ".to_string();
    assert!(settings.validate().is_err());

    let mut settings = Settings::default();
    settings.subscription.topic = String::new();
    assert!(settings.validate().is_err());

    let mut settings = Settings::default();
    settings.broker.port = 0;
    assert!(settings.validate().is_err());
}

#[test]
fn bad_enumerations_are_rejected() {
    let mut settings = Settings::default();
    settings.subscription.qos = 3;
    assert!(settings.validate().is_err());

    let mut settings = Settings::default();
    settings.broker.protocol_version = "3.1".to_string();
    assert!(settings.validate().is_err());

    let mut settings = Settings::default();
    settings.broker.scheme = "wss".to_string();
    assert!(settings.validate().is_err());
}

#[test]
fn short_keep_alive_is_rejected() {
    let mut settings = Settings::default();
    settings.session.keep_alive_secs = 2;
    assert!(settings.validate().is_err());
    settings.session.keep_alive_secs = 0;
    assert!(settings.validate().is_ok());
}

#[test]
fn v5_requires_keep_alive() {
    let mut settings = Settings::default();
    settings.broker.protocol_version = "5".to_string();
    settings.session.keep_alive_secs = 0;
    let err = settings.validate().unwrap_err();
    assert!(err.to_string().contains("protocol version 5"));

    settings.session.keep_alive_secs = 5;
    assert!(settings.validate().is_ok());
}

#[test]
fn password_requires_username() {
    let mut settings = Settings::default();
    settings.broker.password = Some("secret".to_string());
    assert!(settings.validate().is_err());

    settings.broker.username = Some("tester".to_string());
    let creds = settings.credentials().unwrap().unwrap();
    assert_eq!(creds.username, "tester");
    assert_eq!(creds.password, "secret");
    assert!(!format!("{creds:?}").contains("secret"));
}

#[test]
#[serial]
fn load_config_from_file_overrides_defaults() {
    let tmp = TempDir::new().expect("create tempdir");
    let path = tmp.path().join("harness.toml");
    let toml = r#"
        [broker]
        host = "broker.local"
        port = 9001
        username = "load"
        password = "test"

        [subscription]
        topic = "bench/#"
        qos = 1

        [harness]
        clients = 3
        summary_file = "out/summary.txt"
    "#;
    fs::write(&path, toml).expect("write config file");

    let cfg = load_config(Some(&path)).expect("load_config failed");
    assert_eq!(cfg.broker.host, "broker.local");
    assert_eq!(cfg.broker.port, 9001);
    assert_eq!(cfg.broker.username.as_deref(), Some("load"));
    assert_eq!(cfg.subscription.topic, "bench/#");
    assert_eq!(cfg.subscription.qos, 1);
    assert_eq!(cfg.harness.clients, 3);
    assert_eq!(cfg.harness.summary_file, "out/summary.txt");
    // untouched values keep their defaults
    assert_eq!(cfg.broker.scheme, "ws");
    assert_eq!(cfg.session.session_expiry_secs, 3600);
}

#[test]
#[serial]
fn environment_overrides_file() {
    let tmp = TempDir::new().expect("create tempdir");
    let path = tmp.path().join("harness.toml");
    fs::write(&path, "[harness]\nclients = 3\n").expect("write config file");

    let host_key = format!("{ENV_PREFIX}__BROKER__HOST");
    let clients_key = format!("{ENV_PREFIX}__HARNESS__CLIENTS");
    let prefix_key = format!("{ENV_PREFIX}__SESSION__CLIENT_ID_PREFIX");

    temp_env::with_vars(
        [
            (host_key.as_str(), Some("10.0.0.5")),
            (clients_key.as_str(), Some("25")),
            (prefix_key.as_str(), Some("soak-")),
        ],
        || {
            let cfg = load_config(Some(&path)).expect("load_config failed");
            assert_eq!(cfg.broker.host, "10.0.0.5");
            assert_eq!(cfg.harness.clients, 25);
            assert_eq!(cfg.client_id(4), "soak-4");
        },
    );
}

#[test]
#[serial]
fn missing_explicit_file_is_an_error() {
    let tmp = TempDir::new().expect("create tempdir");
    let path = tmp.path().join("absent.toml");
    assert!(load_config(Some(&path)).is_err());
}
