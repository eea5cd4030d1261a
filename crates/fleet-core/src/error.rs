//! Configuration error types.

use thiserror::Error;

/// Result type alias for configuration loading.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors raised while loading or validating fleet configuration.
///
/// All of these are reported before any control loop starts.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid duration for `{field}`: {value:?}")]
    Duration { field: &'static str, value: String },

    #[error("min_instances ({min}) must be greater than zero")]
    ZeroMinInstances { min: u32 },

    #[error("min_instances ({min}) exceeds max_instances ({max})")]
    MinExceedsMax { min: u32, max: u32 },

    #[error("`{field}` must be within 0..=100, got {value}")]
    PercentOutOfRange { field: &'static str, value: f64 },

    #[error("scale_down_threshold ({down}) must be below scale_up_threshold ({up})")]
    ThresholdOrder { down: f64, up: f64 },

    #[error("unknown load balancing algorithm: {0}")]
    UnknownAlgorithm(String),

    #[error("`{field}` must be non-zero")]
    ZeroDuration { field: &'static str },

    #[error("at least one region must be configured")]
    NoRegions,

    #[error("unhealthy_threshold must be at least 1")]
    ZeroUnhealthyThreshold,
}
