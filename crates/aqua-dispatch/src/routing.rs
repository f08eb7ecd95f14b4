//! Routing of published events onto delivery paths.
//!
//! Every event is persisted durably regardless of routing; classification
//! only decides whether a fast-path hint is worth pushing. Unlisted event
//! types always take the durable path, so a misconfigured routing table can
//! delay events but never lose them.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use aqua_core::models::event_type;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::DispatchError;

/// Delivery path assigned to an event type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteClass {
    /// Hinted to in-memory workers for sub-second pickup.
    Fast,
    /// Reaches the broker through outbox polling alone.
    Durable,
}

/// Messaging strategy selecting which delivery paths run and which events
/// receive fast-path hints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyMode {
    /// Broker-first: hint every event type, keep both worker pools running.
    Artemis,
    /// Hint latency-sensitive types only; both pools run. The default.
    Hybrid,
    /// No hints; only the durable polling pool runs.
    OutboxOnly,
    /// Hint everything; only the fast pool runs.
    MemoryOnly,
}

impl StrategyMode {
    /// Whether this mode spawns the hint-driven fast pool.
    pub fn runs_fast_pool(&self) -> bool {
        matches!(self, Self::Artemis | Self::Hybrid | Self::MemoryOnly)
    }

    /// Whether this mode spawns the outbox polling pool.
    pub fn runs_durable_pool(&self) -> bool {
        matches!(self, Self::Artemis | Self::Hybrid | Self::OutboxOnly)
    }

    /// Whether events of the given class receive a fast-path hint.
    pub fn hints_class(&self, class: RouteClass) -> bool {
        match self {
            Self::Hybrid => class == RouteClass::Fast,
            Self::Artemis | Self::MemoryOnly => true,
            Self::OutboxOnly => false,
        }
    }
}

impl fmt::Display for StrategyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Artemis => "artemis",
            Self::Hybrid => "hybrid",
            Self::OutboxOnly => "outbox-only",
            Self::MemoryOnly => "memory-only",
        };
        write!(f, "{s}")
    }
}

impl FromStr for StrategyMode {
    type Err = DispatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "artemis" => Ok(Self::Artemis),
            "hybrid" => Ok(Self::Hybrid),
            "outbox-only" => Ok(Self::OutboxOnly),
            "memory-only" => Ok(Self::MemoryOnly),
            _ => Err(DispatchError::configuration(format!(
                "unknown messaging strategy: {s}"
            ))),
        }
    }
}

/// Maps event types to their latency class.
#[derive(Debug, Clone)]
pub struct RoutingTable {
    high_frequency: HashSet<String>,
    low_frequency: HashSet<String>,
}

impl RoutingTable {
    /// Builds a routing table from configured event type lists.
    pub fn new(
        high_frequency: impl IntoIterator<Item = String>,
        low_frequency: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            high_frequency: high_frequency.into_iter().collect(),
            low_frequency: low_frequency.into_iter().collect(),
        }
    }

    /// Classifies an event type.
    ///
    /// Types absent from both configured lists are treated as durable and
    /// logged once per publish, since they usually indicate a new event type
    /// nobody added to the routing configuration yet.
    pub fn classify(&self, event_type: &str) -> RouteClass {
        if self.high_frequency.contains(event_type) {
            return RouteClass::Fast;
        }
        if !self.low_frequency.contains(event_type) {
            debug!(event_type, "event type not in routing table, using durable path");
        }
        RouteClass::Durable
    }
}

impl Default for RoutingTable {
    fn default() -> Self {
        Self::new(
            event_type::HIGH_FREQUENCY.map(str::to_string),
            event_type::LOW_FREQUENCY.map(str::to_string),
        )
    }
}
