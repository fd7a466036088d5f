//! Error types for configuration parsing and size arithmetic.

use thiserror::Error;

/// Errors produced while parsing configuration values (annotations,
/// policy templates, CLI defaults).
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("invalid quantity {value:?}: {reason}")]
    InvalidQuantity { value: String, reason: String },

    #[error("percentage must end with '%': {0:?}")]
    MissingPercentSign(String),

    #[error("invalid percentage {0:?}")]
    InvalidPercentage(String),

    #[error("percentage out of range [0, 100]: {0:?}")]
    PercentageOutOfRange(String),

    #[error("invalid duration {value:?}: {reason}")]
    InvalidDuration { value: String, reason: String },

    #[error("invalid timestamp {value:?}: {reason}")]
    InvalidTimestamp { value: String, reason: String },

    #[error("invalid boolean {0:?}, expected \"true\" or \"false\"")]
    InvalidBool(String),

    #[error("annotation {key}: {source}")]
    Annotation {
        key: String,
        #[source]
        source: Box<ConfigError>,
    },
}

impl ConfigError {
    /// Wrap a parse error with the annotation key it came from.
    pub fn for_annotation(key: &str, source: ConfigError) -> Self {
        ConfigError::Annotation {
            key: key.to_string(),
            source: Box::new(source),
        }
    }
}

/// Errors produced when planning an expansion.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExpansionError {
    #[error("new size {new} exceeds max size {max}")]
    ExceedsMaxSize { new: String, max: String },

    #[error(transparent)]
    Config(#[from] ConfigError),
}
