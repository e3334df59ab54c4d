use std::fs;

use serde::{Deserialize, Serialize};
use shellexpand::tilde;

use crate::engine::identity::IdentitySourceSpec;
use crate::error::TrackError;

/// Milliseconds since the UNIX epoch. Every stateful operation of the engine
/// takes an explicit `now` so the whole state machine stays deterministic.
pub type Millis = u64;

#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
#[serde(default)]
pub struct EngineConfig {
    /// How long an execution may stay pending before it expires.
    pub max_wait_time: Millis,
    /// How long after a trigger a network call may still be attributed to it.
    /// Strictly shorter than `max_wait_time`.
    pub time_window: Millis,
    /// Terminal executions linger this long for debug inspection before the
    /// registry drops them.
    pub execution_grace: Millis,
    /// Suppression window for repeated event fingerprints.
    pub dedup_window: Millis,
    /// Loop guard: rolling window length.
    pub loop_window: Millis,
    /// Loop guard: max calls per (method, endpoint, rule) within one window.
    pub loop_ceiling: u32,
    /// Loop guard: cool-down once a key is blocked.
    pub loop_cooldown: Millis,
    /// Element extractor: how many ancestors to climb for scoped lookups.
    pub ancestor_hops: usize,
    /// Storage key under which the identity side channel persists itself.
    pub identity_storage_key: String,
    /// Where the logged-in identity appears on the wire.
    pub identity_sources: Vec<IdentitySourceSpec>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            max_wait_time: 10_000,
            time_window: 5_000,
            execution_grace: 1_000,
            dedup_window: 2_000,
            loop_window: 1_000,
            loop_ceiling: 5,
            loop_cooldown: 30_000,
            ancestor_hops: 3,
            identity_storage_key: "__tracklet_identity".to_string(),
            identity_sources: Vec::new(),
        }
    }
}

impl EngineConfig {
    pub fn from_file(path: &str) -> Result<Self, TrackError> {
        let expanded = tilde(path).to_string();
        let file = fs::File::open(&expanded)
            .map_err(|e| TrackError::new(format!("Cannot open config '{}': {}", &expanded, e)))?;

        let config: EngineConfig = serde_yaml::from_reader(file)?;
        config.validate()?;

        Ok(config)
    }

    pub(crate) fn validate(&self) -> Result<(), TrackError> {
        if self.time_window >= self.max_wait_time {
            return Err(TrackError::new(
                "time_window must be strictly shorter than max_wait_time",
            ));
        }

        if self.loop_ceiling == 0 {
            return Err(TrackError::new("loop_ceiling must be positive"));
        }

        Ok(())
    }
}

/// Wall-clock `now` for live hosts. Tests and the replay tool pass their own
/// timestamps instead.
pub fn clock_now_ms() -> Millis {
    let nanos = time::OffsetDateTime::now_utc().unix_timestamp_nanos();
    (nanos / 1_000_000) as Millis
}
