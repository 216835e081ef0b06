use serde::Deserialize;

/// Top-level configuration settings for the harness.
///
/// Includes the broker under test, the per-session connection options, the
/// subscription every session makes, and the harness run parameters.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct Settings {
    pub broker: BrokerSettings,
    pub session: SessionSettings,
    pub subscription: SubscriptionSettings,
    pub harness: HarnessSettings,
}

/// Where the broker lives and how to reach it.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct BrokerSettings {
    pub host: String,
    pub port: u16,
    /// `ws` or `tcp`.
    pub scheme: String,
    /// Only used by the `ws` scheme.
    pub path: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// `3.1.1` or `5`.
    pub protocol_version: String,
}

/// Options applied to every client session.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct SessionSettings {
    /// Client ids are `{client_id_prefix}{index}`.
    pub client_id_prefix: String,
    pub clean_session: bool,
    pub session_expiry_secs: u32,
    pub communication_timeout_secs: u64,
    pub keep_alive_secs: u64,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct SubscriptionSettings {
    pub topic: String,
    pub qos: u8,
}

/// Run parameters of the harness itself.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct HarnessSettings {
    pub clients: usize,
    pub log_dir: String,
    pub summary_file: String,
    pub report_file: Option<String>,
    pub echo_payloads: bool,
    pub wait_for_enter: bool,
    pub run_duration_secs: Option<u64>,
}

/// Partial configuration settings loaded from files or environment.
///
/// Any subset of keys may be given. Missing values are filled from defaults.
#[derive(Debug, Deserialize, Default)]
pub struct PartialSettings {
    pub broker: Option<PartialBrokerSettings>,
    pub session: Option<PartialSessionSettings>,
    pub subscription: Option<PartialSubscriptionSettings>,
    pub harness: Option<PartialHarnessSettings>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialBrokerSettings {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub scheme: Option<String>,
    pub path: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub protocol_version: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialSessionSettings {
    pub client_id_prefix: Option<String>,
    pub clean_session: Option<bool>,
    pub session_expiry_secs: Option<u32>,
    pub communication_timeout_secs: Option<u64>,
    pub keep_alive_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialSubscriptionSettings {
    pub topic: Option<String>,
    pub qos: Option<u8>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialHarnessSettings {
    pub clients: Option<usize>,
    pub log_dir: Option<String>,
    pub summary_file: Option<String>,
    pub report_file: Option<String>,
    pub echo_payloads: Option<bool>,
    pub wait_for_enter: Option<bool>,
    pub run_duration_secs: Option<u64>,
}

impl PartialSettings {
    /// Fills every missing value from `base`.
    pub fn merge_onto(self, base: Settings) -> Settings {
        let broker = self.broker.unwrap_or_default();
        let session = self.session.unwrap_or_default();
        let subscription = self.subscription.unwrap_or_default();
        let harness = self.harness.unwrap_or_default();

        Settings {
            broker: BrokerSettings {
                host: broker.host.unwrap_or(base.broker.host),
                port: broker.port.unwrap_or(base.broker.port),
                scheme: broker.scheme.unwrap_or(base.broker.scheme),
                path: broker.path.unwrap_or(base.broker.path),
                username: broker.username.or(base.broker.username),
                password: broker.password.or(base.broker.password),
                protocol_version: broker
                    .protocol_version
                    .unwrap_or(base.broker.protocol_version),
            },
            session: SessionSettings {
                client_id_prefix: session
                    .client_id_prefix
                    .unwrap_or(base.session.client_id_prefix),
                clean_session: session.clean_session.unwrap_or(base.session.clean_session),
                session_expiry_secs: session
                    .session_expiry_secs
                    .unwrap_or(base.session.session_expiry_secs),
                communication_timeout_secs: session
                    .communication_timeout_secs
                    .unwrap_or(base.session.communication_timeout_secs),
                keep_alive_secs: session
                    .keep_alive_secs
                    .unwrap_or(base.session.keep_alive_secs),
            },
            subscription: SubscriptionSettings {
                topic: subscription.topic.unwrap_or(base.subscription.topic),
                qos: subscription.qos.unwrap_or(base.subscription.qos),
            },
            harness: HarnessSettings {
                clients: harness.clients.unwrap_or(base.harness.clients),
                log_dir: harness.log_dir.unwrap_or(base.harness.log_dir),
                summary_file: harness.summary_file.unwrap_or(base.harness.summary_file),
                report_file: harness.report_file.or(base.harness.report_file),
                echo_payloads: harness.echo_payloads.unwrap_or(base.harness.echo_payloads),
                wait_for_enter: harness
                    .wait_for_enter
                    .unwrap_or(base.harness.wait_for_enter),
                run_duration_secs: harness.run_duration_secs.or(base.harness.run_duration_secs),
            },
        }
    }
}

/// Provides default values for `Settings`.
///
/// Mirrors the load profile the harness was first written for: ten
/// persistent sessions over WebSocket, each subscribed with QoS 2.
impl Default for Settings {
    fn default() -> Self {
        Self {
            broker: BrokerSettings {
                host: "127.0.0.1".to_string(),
                port: 8083,
                scheme: "ws".to_string(),
                path: "/mqtt".to_string(),
                username: None,
                password: None,
                protocol_version: "3.1.1".to_string(),
            },
            session: SessionSettings {
                client_id_prefix: "mqtt-test-".to_string(),
                clean_session: false,
                session_expiry_secs: 3600,
                communication_timeout_secs: 30,
                keep_alive_secs: 30,
            },
            subscription: SubscriptionSettings {
                topic: "/test".to_string(),
                qos: 2,
            },
            harness: HarnessSettings {
                clients: 10,
                log_dir: "logs".to_string(),
                summary_file: "logs/summary.txt".to_string(),
                report_file: None,
                echo_payloads: true,
                wait_for_enter: false,
                run_duration_secs: None,
            },
        }
    }
}
