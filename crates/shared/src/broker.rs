use url::Url;

use crate::error::BrokerUrlError;

pub const DEFAULT_MQTT_PORT: u16 = 1883;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerAddress {
    pub host: String,
    pub port: u16,
}

impl BrokerAddress {
    /// Accepts `mqtt://host[:port]` or `tcp://host[:port]`.
    pub fn parse(raw: &str) -> Result<Self, BrokerUrlError> {
        let raw = raw.trim();
        let url = Url::parse(raw).map_err(|source| BrokerUrlError::Parse {
            url: raw.to_string(),
            source,
        })?;

        match url.scheme() {
            "mqtt" | "tcp" => {}
            other => {
                return Err(BrokerUrlError::UnsupportedScheme {
                    scheme: other.to_string(),
                })
            }
        }

        let host = url
            .host_str()
            .filter(|host| !host.is_empty())
            .ok_or_else(|| BrokerUrlError::MissingHost {
                url: raw.to_string(),
            })?;

        Ok(Self {
            host: host.to_string(),
            port: url.port().unwrap_or(DEFAULT_MQTT_PORT),
        })
    }
}

impl std::fmt::Display for BrokerAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "mqtt://{}:{}", self.host, self.port)
    }
}
