use thiserror::Error;

#[derive(Debug, Error)]
pub enum BrokerUrlError {
    #[error("invalid broker url '{url}': {source}")]
    Parse {
        url: String,
        source: url::ParseError,
    },
    #[error("unsupported broker scheme '{scheme}' (expected mqtt:// or tcp://)")]
    UnsupportedScheme { scheme: String },
    #[error("broker url '{url}' has no host")]
    MissingHost { url: String },
}
