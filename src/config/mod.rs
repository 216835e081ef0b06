mod settings;

use std::path::Path;
use std::time::Duration;

use config::{Config, ConfigError, Environment, File};

use crate::transport::{Credentials, Endpoint, MIN_V5_KEEP_ALIVE, ProtocolVersion, Qos, Scheme};
use crate::utils::HarnessError;
use settings::PartialSettings;

pub use settings::{
    BrokerSettings, HarnessSettings, SessionSettings, Settings, SubscriptionSettings,
};

/// Prefix for environment overrides, e.g. `MQTTSWARM__BROKER__HOST`.
pub const ENV_PREFIX: &str = "MQTTSWARM";

/// Loads the configuration from `file` (or `config/default` when `None`)
/// and `MQTTSWARM__*` environment variables.
/// Merges the result with default values.
pub fn load_config(file: Option<&Path>) -> Result<Settings, ConfigError> {
    let file_source = match file {
        Some(path) => File::from(path).required(true),
        None => File::with_name("config/default").required(false),
    };

    let builder = Config::builder().add_source(file_source).add_source(
        Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true),
    );

    let config = builder.build()?;

    // Try to deserialize what is available
    let partial: PartialSettings = config.try_deserialize()?;

    Ok(partial.merge_onto(Settings::default()))
}

impl Settings {
    /// Checks everything the harness needs before any network activity.
    pub fn validate(&self) -> Result<(), HarnessError> {
        if self.harness.clients == 0 {
            return Err(invalid("harness.clients must be at least 1"));
        }
        if self.broker.host.trim().is_empty() {
            return Err(invalid("broker.host must not be empty"));
        }
        if self.broker.port == 0 {
            return Err(invalid("broker.port must not be 0"));
        }
        if self.subscription.topic.is_empty() {
            return Err(invalid("subscription.topic must not be empty"));
        }
        if self.session.client_id_prefix.is_empty() {
            return Err(invalid("session.client_id_prefix must not be empty"));
        }
        if self.session.communication_timeout_secs == 0 {
            return Err(invalid(
                "session.communication_timeout_secs must be at least 1",
            ));
        }
        if self.session.keep_alive_secs != 0 && self.session.keep_alive_secs < 5 {
            return Err(invalid(
                "session.keep_alive_secs must be 0 (disabled) or at least 5",
            ));
        }
        if self.protocol()? == ProtocolVersion::V5
            && self.session.keep_alive_secs < MIN_V5_KEEP_ALIVE.as_secs()
        {
            return Err(invalid(
                "session.keep_alive_secs must be at least 5 with protocol version 5",
            ));
        }
        if self.harness.summary_file.trim().is_empty() {
            return Err(invalid("harness.summary_file must not be empty"));
        }
        self.credentials()?;
        self.qos()?;
        self.protocol()?;
        self.endpoint()?;
        Ok(())
    }

    pub fn qos(&self) -> Result<Qos, HarnessError> {
        Qos::try_from(self.subscription.qos).map_err(HarnessError::Configuration)
    }

    pub fn protocol(&self) -> Result<ProtocolVersion, HarnessError> {
        self.broker
            .protocol_version
            .parse()
            .map_err(HarnessError::Configuration)
    }

    pub fn endpoint(&self) -> Result<Endpoint, HarnessError> {
        let scheme: Scheme = self
            .broker
            .scheme
            .parse()
            .map_err(HarnessError::Configuration)?;
        Ok(Endpoint {
            scheme,
            host: self.broker.host.trim().to_string(),
            port: self.broker.port,
            path: self.broker.path.clone(),
        })
    }

    /// Empty strings count as absent. A password without a username is rejected.
    pub fn credentials(&self) -> Result<Option<Credentials>, HarnessError> {
        let username = self.broker.username.as_deref().filter(|u| !u.is_empty());
        let password = self.broker.password.as_deref().filter(|p| !p.is_empty());
        match (username, password) {
            (Some(username), password) => Ok(Some(Credentials {
                username: username.to_string(),
                password: password.unwrap_or_default().to_string(),
            })),
            (None, Some(_)) => Err(invalid("broker.password is set without broker.username")),
            (None, None) => Ok(None),
        }
    }

    pub fn communication_timeout(&self) -> Duration {
        Duration::from_secs(self.session.communication_timeout_secs)
    }

    /// Client identifier for session `index`; stable across runs.
    pub fn client_id(&self, index: usize) -> String {
        format!("{}{}", self.session.client_id_prefix, index)
    }
}

fn invalid(reason: &str) -> HarnessError {
    HarnessError::Configuration(reason.to_string())
}

#[cfg(test)]
mod tests;
