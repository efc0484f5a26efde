//! Configuration for serving endpoint resources
//!
//! `ResourceConfig` controls the freshness hints attached to read responses,
//! link listing layout, and the well-known property that carries transition
//! durations.

use std::time::Duration;

use thiserror::Error;

use crate::key::Section;

/// Invalid configuration
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid configuration: {0}")]
pub struct ConfigError(pub String);

/// Configuration for section resources
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceConfig {
    /// Freshness hint for the state section
    /// Default: 30 seconds
    pub state_max_age: Duration,

    /// Freshness hint for the config section
    /// Default: 3600 seconds
    pub config_max_age: Duration,

    /// Freshness hint for the metadata section
    /// Default: 600 seconds
    pub metadata_max_age: Duration,

    /// Values whose text form is shorter than this are inlined in link listings
    /// Default: 16
    pub link_value_inline_limit: usize,

    /// Property that receives the `d` query duration on writes
    /// Default: "s/trans/d"
    pub transition_duration_key: String,
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            state_max_age: Duration::from_secs(30),
            config_max_age: Duration::from_secs(3600),
            metadata_max_age: Duration::from_secs(600),
            link_value_inline_limit: 16,
            transition_duration_key: "s/trans/d".to_string(),
        }
    }
}

impl ResourceConfig {
    /// Create a new ResourceConfig with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Preset that asks clients not to cache anything
    pub fn no_caching() -> Self {
        Self {
            state_max_age: Duration::ZERO,
            config_max_age: Duration::ZERO,
            metadata_max_age: Duration::ZERO,
            ..Default::default()
        }
    }

    /// Preset for link listings that never inline values
    pub fn compact_links() -> Self {
        Self {
            link_value_inline_limit: 0,
            ..Default::default()
        }
    }

    /// Freshness hint for a section
    pub fn max_age(&self, section: Section) -> Duration {
        match section {
            Section::State => self.state_max_age,
            Section::Config => self.config_max_age,
            Section::Metadata => self.metadata_max_age,
        }
    }

    pub fn with_max_age(mut self, section: Section, max_age: Duration) -> Self {
        match section {
            Section::State => self.state_max_age = max_age,
            Section::Config => self.config_max_age = max_age,
            Section::Metadata => self.metadata_max_age = max_age,
        }
        self
    }

    pub fn with_link_value_inline_limit(mut self, limit: usize) -> Self {
        self.link_value_inline_limit = limit;
        self
    }

    pub fn with_transition_duration_key(mut self, key: impl Into<String>) -> Self {
        self.transition_duration_key = key.into();
        self
    }

    /// Validate the configuration and return any issues
    pub fn validate(&self) -> Result<(), ConfigError> {
        if Section::of(&self.transition_duration_key).is_none() {
            return Err(ConfigError(format!(
                "Transition duration key \"{}\" has no section prefix",
                self.transition_duration_key
            )));
        }

        if self.transition_duration_key.split('/').count() != 3 {
            return Err(ConfigError(format!(
                "Transition duration key \"{}\" must be section/trait/prop",
                self.transition_duration_key
            )));
        }

        Ok(())
    }
}
