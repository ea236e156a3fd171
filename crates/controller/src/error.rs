use std::{net::AddrParseError, path::PathBuf};

use shared::{domain::PropId, error::BrokerUrlError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{}': {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config file '{}': {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("environment variable {key} has invalid value '{value}'")]
    InvalidEnv { key: &'static str, value: String },
    #[error(transparent)]
    Broker(#[from] BrokerUrlError),
    #[error("invalid local link bind address '{value}': {source}")]
    Bind {
        value: String,
        source: AddrParseError,
    },
    #[error("prop id must not be empty")]
    EmptyPropId,
}

/// The line-setting process could not be started. The logical state is kept.
#[derive(Debug, Error)]
pub enum ActuationError {
    #[error("failed to start '{program}' for {chip} line {line}: {source}")]
    Spawn {
        program: String,
        chip: String,
        line: u32,
        source: std::io::Error,
    },
}

/// Reasons an inbound bus payload is dropped instead of routed.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolFault {
    #[error("payload is not valid JSON for a bus record")]
    Malformed,
    #[error("record type is not a command")]
    NotACommand,
    #[error("command addressed to prop '{0}'")]
    OtherProp(PropId),
    #[error("unknown command '{0}'")]
    UnknownCommand(String),
}
