use std::{fs, io, net::SocketAddr, path::Path, time::Duration};

use serde::Deserialize;
use shared::{broker::BrokerAddress, domain::PropId, protocol::Topics};

use crate::error::ConfigError;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub prop_id: String,
    pub prop_name: String,
    pub site: String,
    pub room: String,
    pub topic_namespace: String,
    pub mqtt_broker: String,
    pub reconnect_interval_ms: u64,
    pub gpio_program: String,
    pub gpio_chip: String,
    pub gpio_line: u32,
    pub ws_bind: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            prop_id: "hollywood_cryptex".into(),
            prop_name: "Cryptex".into(),
            site: "ey1".into(),
            room: "hollywood".into(),
            topic_namespace: "ey".into(),
            mqtt_broker: "mqtt://192.168.1.99:1883".into(),
            reconnect_interval_ms: 5000,
            gpio_program: "gpioset".into(),
            gpio_chip: "gpiochip0".into(),
            gpio_line: 17,
            ws_bind: "0.0.0.0:9000".into(),
        }
    }
}

impl Settings {
    pub fn prop_id(&self) -> PropId {
        PropId::new(self.prop_id.clone())
    }

    pub fn topics(&self) -> Topics {
        Topics::new(&self.topic_namespace, &self.site, &self.room, &self.prop_id())
    }

    pub fn broker(&self) -> Result<BrokerAddress, ConfigError> {
        Ok(BrokerAddress::parse(&self.mqtt_broker)?)
    }

    pub fn ws_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.ws_bind.parse().map_err(|source| ConfigError::Bind {
            value: self.ws_bind.clone(),
            source,
        })
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.prop_id.trim().is_empty() {
            return Err(ConfigError::EmptyPropId);
        }
        self.broker()?;
        self.ws_addr()?;
        Ok(())
    }
}

/// Defaults, then the TOML file at `path` (if it exists), then environment.
pub fn load_settings(path: &Path) -> Result<Settings, ConfigError> {
    let mut settings = match fs::read_to_string(path) {
        Ok(raw) => parse_settings(path, &raw)?,
        Err(err) if err.kind() == io::ErrorKind::NotFound => Settings::default(),
        Err(source) => {
            return Err(ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    apply_env_overrides(&mut settings, |key| std::env::var(key).ok())?;
    Ok(settings)
}

fn parse_settings(path: &Path, raw: &str) -> Result<Settings, ConfigError> {
    toml::from_str(raw).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn apply_env_overrides(
    settings: &mut Settings,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<(), ConfigError> {
    if let Some(v) = lookup("MQTT_BROKER") {
        settings.mqtt_broker = v;
    }
    if let Some(v) = lookup("APP__MQTT_BROKER") {
        settings.mqtt_broker = v;
    }
    if let Some(v) = lookup("APP__PROP_ID") {
        settings.prop_id = v;
    }
    if let Some(v) = lookup("APP__PROP_NAME") {
        settings.prop_name = v;
    }
    if let Some(v) = lookup("APP__SITE") {
        settings.site = v;
    }
    if let Some(v) = lookup("APP__ROOM") {
        settings.room = v;
    }
    if let Some(v) = lookup("APP__GPIO_CHIP") {
        settings.gpio_chip = v;
    }
    if let Some(v) = lookup("APP__GPIO_PROGRAM") {
        settings.gpio_program = v;
    }
    if let Some(v) = lookup("APP__WS_BIND") {
        settings.ws_bind = v;
    }

    if let Some(v) = lookup("APP__GPIO_LINE") {
        settings.gpio_line = v.parse().map_err(|_| ConfigError::InvalidEnv {
            key: "APP__GPIO_LINE",
            value: v,
        })?;
    }
    if let Some(v) = lookup("APP__RECONNECT_INTERVAL_MS") {
        settings.reconnect_interval_ms = v.parse().map_err(|_| ConfigError::InvalidEnv {
            key: "APP__RECONNECT_INTERVAL_MS",
            value: v,
        })?;
    }

    Ok(())
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
