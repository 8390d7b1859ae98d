// Core Module - Foundational types, configuration, logging

pub mod types;
pub mod config;
pub mod logger;

// Re-export commonly used items for convenience
pub use types::*;
pub use config::{
    ConfigError, FeedConfig, IndicatorConfig, ProviderConfig, ProviderCredentials,
    SyntheticConfig,
};
pub use logger::setup_logging;
