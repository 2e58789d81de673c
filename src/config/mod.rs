pub mod config;
pub mod settings;

pub use config::Config;
pub use settings::{AggregatorSettings, AggregatorSettingsBuilder, QualityThresholds, TypingSettings};
