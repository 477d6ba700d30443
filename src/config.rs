//! Bucket configuration: the ordered set of bandwidths a bucket enforces.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::bandwidth::Bandwidth;
use crate::error::ConfigurationError;

/// Ordered, non-empty list of bandwidths.
///
/// Order matters for per-bandwidth reporting and for matching slots by index when a
/// configuration is replaced. Available tokens are always the minimum across all of them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "ConfigurationRepr", into = "ConfigurationRepr")]
pub struct BucketConfiguration {
    bandwidths: Vec<Bandwidth>,
}

impl BucketConfiguration {
    /// Validate and build a configuration.
    pub fn new(bandwidths: Vec<Bandwidth>) -> Result<Self, ConfigurationError> {
        if bandwidths.is_empty() {
            return Err(ConfigurationError::EmptyConfiguration);
        }
        let mut seen = HashSet::new();
        for bandwidth in &bandwidths {
            bandwidth.validate()?;
            if let Some(id) = bandwidth.id() {
                if !seen.insert(id) {
                    return Err(ConfigurationError::DuplicateBandwidthId { id: id.to_string() });
                }
            }
        }
        Ok(Self { bandwidths })
    }

    /// Single-bandwidth configuration.
    pub fn single(bandwidth: Bandwidth) -> Self {
        Self { bandwidths: vec![bandwidth] }
    }

    pub fn bandwidths(&self) -> &[Bandwidth] {
        &self.bandwidths
    }

    pub fn len(&self) -> usize {
        self.bandwidths.len()
    }

    /// Always false for a validated configuration.
    pub fn is_empty(&self) -> bool {
        self.bandwidths.is_empty()
    }

    /// Whether any bandwidth carries an id (needs format version 2 on the wire).
    pub fn has_ids(&self) -> bool {
        self.bandwidths.iter().any(|b| b.id().is_some())
    }

    /// Whether any bandwidth is aligned to wall-clock time.
    pub fn has_aligned_refill(&self) -> bool {
        self.bandwidths.iter().any(Bandwidth::is_intervally_aligned)
    }

    /// Position of the bandwidth with `id`.
    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.bandwidths.iter().position(|b| b.id() == Some(id))
    }
}

#[derive(Serialize, Deserialize)]
struct ConfigurationRepr {
    bandwidths: Vec<Bandwidth>,
}

impl TryFrom<ConfigurationRepr> for BucketConfiguration {
    type Error = ConfigurationError;

    fn try_from(repr: ConfigurationRepr) -> Result<Self, Self::Error> {
        BucketConfiguration::new(repr.bandwidths)
    }
}

impl From<BucketConfiguration> for ConfigurationRepr {
    fn from(config: BucketConfiguration) -> Self {
        ConfigurationRepr { bandwidths: config.bandwidths }
    }
}

/// How current tokens carry over when a bucket's configuration is replaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TokensInheritanceStrategy {
    /// Start every bandwidth from its fresh initial state.
    Reset,
    /// Keep token counts, capped at the new capacity.
    AsIs,
    /// Scale token counts by `new_capacity / old_capacity`.
    Proportionally,
    /// Keep token counts and add the new bandwidth's initial tokens, capped at capacity.
    Additive,
}

impl TokensInheritanceStrategy {
    pub(crate) fn code(self) -> u8 {
        match self {
            TokensInheritanceStrategy::Reset => 0,
            TokensInheritanceStrategy::AsIs => 1,
            TokensInheritanceStrategy::Proportionally => 2,
            TokensInheritanceStrategy::Additive => 3,
        }
    }

    pub(crate) fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(TokensInheritanceStrategy::Reset),
            1 => Some(TokensInheritanceStrategy::AsIs),
            2 => Some(TokensInheritanceStrategy::Proportionally),
            3 => Some(TokensInheritanceStrategy::Additive),
            _ => None,
        }
    }
}
