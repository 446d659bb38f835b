//! Node configuration.

use crate::error::{NodeError, NodeResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Protocol timing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    /// How long the coordinator waits for votes, measured from entry into
    /// the prepare phase. Expiry converts the decision to abort.
    pub vote_timeout_ms: u64,

    /// How long the coordinator waits for acks before retransmitting the
    /// outcome to the participants that have not answered.
    pub ack_timeout_ms: u64,

    /// How many retransmission rounds to attempt before giving up on the
    /// missing acks. Giving up is counted, not silent.
    pub max_outcome_rounds: u32,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            // 3 second vote deadline
            vote_timeout_ms: 3_000,
            // 3 seconds between outcome retransmissions
            ack_timeout_ms: 3_000,
            // up to 20 retransmission rounds
            max_outcome_rounds: 20,
        }
    }
}

impl TimingConfig {
    /// Vote-collection deadline as a [`Duration`].
    #[must_use]
    pub fn vote_timeout(&self) -> Duration {
        Duration::from_millis(self.vote_timeout_ms)
    }

    /// Ack-collection window as a [`Duration`].
    #[must_use]
    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }
}

/// Configuration for the coordinator node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Address the coordinator listens on for participant traffic.
    pub listen_addr: String,

    /// Working directory: WAL, image blobs and relatively-addressed
    /// destination artifacts all live here.
    pub data_dir: PathBuf,

    /// Protocol timing.
    pub timing: TimingConfig,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:7000".to_string(),
            data_dir: PathBuf::from("./mosaic-coordinator"),
            timing: TimingConfig::default(),
        }
    }
}

impl CoordinatorConfig {
    /// Create a new configuration builder.
    #[must_use]
    pub fn builder() -> CoordinatorConfigBuilder {
        CoordinatorConfigBuilder::default()
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::Config`] describing the first problem found.
    pub fn validate(&self) -> NodeResult<()> {
        if self.listen_addr.is_empty() {
            return Err(NodeError::Config("listen_addr is required".to_string()));
        }
        if self.data_dir.as_os_str().is_empty() {
            return Err(NodeError::Config("data_dir is required".to_string()));
        }
        Ok(())
    }
}

/// Builder for [`CoordinatorConfig`].
#[derive(Debug, Default)]
pub struct CoordinatorConfigBuilder {
    config: CoordinatorConfig,
}

impl CoordinatorConfigBuilder {
    /// Set the listen address.
    #[must_use]
    pub fn listen_addr(mut self, addr: impl Into<String>) -> Self {
        self.config.listen_addr = addr.into();
        self
    }

    /// Set the working directory.
    #[must_use]
    pub fn data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.data_dir = dir.into();
        self
    }

    /// Set the full timing configuration.
    #[must_use]
    pub fn timing(mut self, timing: TimingConfig) -> Self {
        self.config.timing = timing;
        self
    }

    /// Set the vote-collection deadline in milliseconds.
    #[must_use]
    pub fn vote_timeout_ms(mut self, ms: u64) -> Self {
        self.config.timing.vote_timeout_ms = ms;
        self
    }

    /// Set the ack retransmission window in milliseconds.
    #[must_use]
    pub fn ack_timeout_ms(mut self, ms: u64) -> Self {
        self.config.timing.ack_timeout_ms = ms;
        self
    }

    /// Set the maximum number of outcome retransmission rounds.
    #[must_use]
    pub fn max_outcome_rounds(mut self, rounds: u32) -> Self {
        self.config.timing.max_outcome_rounds = rounds;
        self
    }

    /// Build and validate the configuration.
    ///
    /// # Errors
    ///
    /// Propagates [`CoordinatorConfig::validate`] failures.
    pub fn build(self) -> NodeResult<CoordinatorConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Configuration for a participant node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParticipantConfig {
    /// This participant's identity; the address other nodes know it by.
    pub id: String,

    /// Address this node listens on for coordinator traffic.
    pub listen_addr: String,

    /// Address of the coordinator, for votes and acks.
    pub coordinator_addr: String,

    /// Working directory: the WAL and the guarded source files live here.
    pub data_dir: PathBuf,
}

impl Default for ParticipantConfig {
    fn default() -> Self {
        Self {
            id: String::new(),
            listen_addr: "127.0.0.1:7001".to_string(),
            coordinator_addr: "127.0.0.1:7000".to_string(),
            data_dir: PathBuf::from("./mosaic-participant"),
        }
    }
}

impl ParticipantConfig {
    /// Create a new configuration builder.
    #[must_use]
    pub fn builder() -> ParticipantConfigBuilder {
        ParticipantConfigBuilder::default()
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::Config`] describing the first problem found.
    pub fn validate(&self) -> NodeResult<()> {
        if self.id.is_empty() {
            return Err(NodeError::Config("participant id is required".to_string()));
        }
        if self.id.contains(',') {
            // Participant ids appear as fields in the comma-separated WAL.
            return Err(NodeError::Config(
                "participant id must not contain ','".to_string(),
            ));
        }
        if self.data_dir.as_os_str().is_empty() {
            return Err(NodeError::Config("data_dir is required".to_string()));
        }
        Ok(())
    }
}

/// Builder for [`ParticipantConfig`].
#[derive(Debug, Default)]
pub struct ParticipantConfigBuilder {
    config: ParticipantConfig,
}

impl ParticipantConfigBuilder {
    /// Set the participant identity.
    #[must_use]
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.config.id = id.into();
        self
    }

    /// Set the listen address.
    #[must_use]
    pub fn listen_addr(mut self, addr: impl Into<String>) -> Self {
        self.config.listen_addr = addr.into();
        self
    }

    /// Set the coordinator address.
    #[must_use]
    pub fn coordinator_addr(mut self, addr: impl Into<String>) -> Self {
        self.config.coordinator_addr = addr.into();
        self
    }

    /// Set the working directory.
    #[must_use]
    pub fn data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.data_dir = dir.into();
        self
    }

    /// Build and validate the configuration.
    ///
    /// # Errors
    ///
    /// Propagates [`ParticipantConfig::validate`] failures.
    pub fn build(self) -> NodeResult<ParticipantConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timing_defaults_match_protocol_constants() {
        let timing = TimingConfig::default();
        assert_eq!(timing.vote_timeout(), Duration::from_secs(3));
        assert_eq!(timing.ack_timeout(), Duration::from_secs(3));
        assert_eq!(timing.max_outcome_rounds, 20);
    }

    #[test]
    fn participant_config_requires_id() {
        let result = ParticipantConfig::builder().data_dir("/tmp/x").build();
        assert!(result.is_err());
    }

    #[test]
    fn participant_id_rejects_comma() {
        let result = ParticipantConfig::builder()
            .id("a,b")
            .data_dir("/tmp/x")
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn coordinator_builder_applies_timing() {
        let config = CoordinatorConfig::builder()
            .data_dir("/tmp/x")
            .vote_timeout_ms(100)
            .ack_timeout_ms(50)
            .max_outcome_rounds(2)
            .build()
            .expect("valid config");
        assert_eq!(config.timing.vote_timeout_ms, 100);
        assert_eq!(config.timing.ack_timeout_ms, 50);
        assert_eq!(config.timing.max_outcome_rounds, 2);
    }
}
