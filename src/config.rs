use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::protocol::Request;
use crate::source::OrderingPolicy;
use crate::storage::Credentials;
use crate::{DEFAULT_POLL_INTERVAL_MS, DEFAULT_TICK_INTERVAL_MS};

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

fn default_tick_interval_ms() -> u64 {
    DEFAULT_TICK_INTERVAL_MS
}

/// Where a segment source polls and how often.
///
/// ```rust
/// use edfstream::{OrderingPolicy, SourceConfig};
///
/// let config = SourceConfig::from_json_str(r#"{"folder":"patients/42","ordering":"descending"}"#)?;
/// assert_eq!(config.ordering, OrderingPolicy::Descending);
/// assert_eq!(config.poll_interval_ms, edfstream::DEFAULT_POLL_INTERVAL_MS);
/// # Ok::<(), edfstream::EdfError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub folder: String,
    #[serde(default)]
    pub ordering: OrderingPolicy,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default)]
    pub credentials: Option<Credentials>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        SourceConfig {
            folder: String::new(),
            ordering: OrderingPolicy::default(),
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            credentials: None,
        }
    }
}

impl SourceConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// The `Initialize` request that builds a source for this folder
    pub fn initialize_request(&self) -> Request {
        Request::Initialize {
            credentials: self.credentials.clone(),
            folder: self.folder.clone(),
            ordering: self.ordering,
        }
    }

    pub fn start_request(&self) -> Request {
        Request::Start {
            poll_interval_ms: self.poll_interval_ms,
        }
    }
}

/// Pacing of the timeline synchronization tick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineConfig {
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
}

impl Default for TimelineConfig {
    fn default() -> Self {
        TimelineConfig {
            tick_interval_ms: DEFAULT_TICK_INTERVAL_MS,
        }
    }
}

impl TimelineConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}
