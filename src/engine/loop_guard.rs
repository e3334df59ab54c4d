use std::collections::HashMap;

use log::{debug, warn};

use crate::config::{EngineConfig, Millis};

#[derive(Debug, Clone)]
struct RateRecord {
    window_start: Millis,
    count: u32,
    blocked_until: Option<Millis>,
}

/// Rate-based circuit breaker over (method, endpoint, rule) triples. The
/// observer sees the engine's own delivery traffic too; without this, an
/// event whose delivery matches its own rule would re-trigger forever.
pub struct LoopGuard {
    window: Millis,
    ceiling: u32,
    cooldown: Millis,
    records: HashMap<(String, String, String), RateRecord>,
}

impl LoopGuard {
    pub fn new(config: &EngineConfig) -> Self {
        LoopGuard {
            window: config.loop_window,
            ceiling: config.loop_ceiling,
            cooldown: config.loop_cooldown,
            records: HashMap::new(),
        }
    }

    /// True means the caller must skip processing this (endpoint, method,
    /// rule) triple. Once the in-window count exceeds the ceiling the key is
    /// blocked for the full cool-down, no matter what the traffic does next.
    pub fn check_and_record(
        &mut self,
        endpoint: &str,
        method: &str,
        rule_id: &str,
        now: Millis,
    ) -> bool {
        let key = (
            method.to_lowercase(),
            endpoint.to_string(),
            rule_id.to_string(),
        );

        let record = self.records.entry(key).or_insert(RateRecord {
            window_start: now,
            count: 0,
            blocked_until: None,
        });

        if let Some(blocked_until) = record.blocked_until {
            if now < blocked_until {
                return true;
            }

            // cool-down over, start a fresh window
            debug!("Loop guard unblocked {} {} for rule '{}'", method, endpoint, rule_id);
            record.blocked_until = None;
            record.window_start = now;
            record.count = 0;
        }

        if now.saturating_sub(record.window_start) > self.window {
            record.window_start = now;
            record.count = 0;
        }

        record.count += 1;

        if record.count > self.ceiling {
            record.blocked_until = Some(now + self.cooldown);
            warn!(
                "Loop guard blocking {} {} for rule '{}' ({} calls inside {}ms)",
                method, endpoint, rule_id, record.count, self.window
            );
            return true;
        }

        false
    }

    /// Drops records that are neither blocked nor inside a live window.
    pub fn sweep(&mut self, now: Millis) {
        let window = self.window;
        self.records.retain(|_, record| {
            if let Some(blocked_until) = record.blocked_until {
                return now < blocked_until;
            }
            now.saturating_sub(record.window_start) <= window
        });
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
