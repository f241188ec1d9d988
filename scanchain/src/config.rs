//! Tunables of a [`Chain`](crate::Chain) and its cable queue.
//!
//! Everything has a default, so a configuration file only needs to name what it changes:
//!
//! ```yaml
//! queue:
//!   initial_capacity: 256
//! detect:
//!   test_count: 8
//!   threshold_percent: 75
//! ```

use serde::{Deserialize, Serialize};

/// Configuration of a chain, loadable from YAML.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ChainConfig {
    /// Sizing and flushing of the cable's deferred queues.
    pub queue: QueueConfig,
    /// Parameters of the register length detection heuristics.
    pub detect: DetectConfig,
}

impl ChainConfig {
    pub fn from_yaml_reader<R: std::io::Read>(reader: R) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_reader(reader)
    }

    pub fn from_yaml_str(definition: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(definition)
    }
}

/// Sizing of the `todo` and `done` ring buffers of a cable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QueueConfig {
    /// Number of slots allocated up front.
    pub initial_capacity: usize,
    /// Number of slots added whenever a full queue receives another item.
    pub growth: usize,
    /// For drivers which combine queued items into transfers: the number of pending items
    /// at which an optional flush is carried out. `None` defers everything until output is
    /// actually needed.
    pub optional_flush_threshold: Option<usize>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            initial_capacity: 128,
            growth: 128,
            optional_flush_threshold: None,
        }
    }
}

/// Parameters of [`Chain::detect_register_size`](crate::Chain::detect_register_size) and
/// [`Chain::scan`](crate::Chain::scan).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DetectConfig {
    /// Largest register length tried before giving up.
    pub max_register_length: usize,
    /// Width of the test pattern shifted behind the zeroed register.
    pub pattern_bits: usize,
    /// Number of trials per pattern.
    pub test_count: usize,
    /// Percentage of trials which must return the pattern for a length to be accepted.
    pub threshold_percent: usize,
    /// Upper bound on the number of devices an IDCODE scan looks for.
    pub max_parts: usize,
}

impl Default for DetectConfig {
    fn default() -> Self {
        Self {
            max_register_length: 1024,
            pattern_bits: 8,
            test_count: 1,
            threshold_percent: 100,
            max_parts: 8,
        }
    }
}
