use std::collections::HashMap;

use log::debug;
use sha2::{Digest, Sha256};

use crate::config::{EngineConfig, Millis};

/// Suppresses repeats of one finished event within a short window. The
/// fingerprint is order-sensitive over all identifying fields, so
/// (type, rule, user, item, qualifiers...) collisions mean a true repeat.
pub struct Deduplicator {
    window: Millis,
    seen: HashMap<String, Millis>,
}

pub(crate) fn fingerprint(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts.iter() {
        hasher.update(part.as_bytes());
        hasher.update([0x1f]); // field separator, keeps ("ab","c") != ("a","bc")
    }

    let digest = hasher.finalize();
    digest
        .iter()
        .take(8)
        .map(|b| format!("{:02x}", b))
        .collect()
}

impl Deduplicator {
    pub fn new(config: &EngineConfig) -> Self {
        Deduplicator {
            window: config.dedup_window,
            seen: HashMap::new(),
        }
    }

    /// True means the caller must drop the event. A suppressed repeat does
    /// not refresh the timestamp; the window is anchored at the first sight.
    pub fn is_duplicate(&mut self, parts: &[&str], now: Millis) -> bool {
        let key = fingerprint(parts);

        if let Some(last_seen) = self.seen.get(&key) {
            if now.saturating_sub(*last_seen) <= self.window {
                debug!("Suppressing duplicate event fingerprint {}", &key);
                return true;
            }
        }

        self.seen.insert(key, now);
        false
    }

    /// Evicts fingerprints older than the window to bound memory.
    pub fn sweep(&mut self, now: Millis) {
        let window = self.window;
        self.seen
            .retain(|_, last_seen| now.saturating_sub(*last_seen) <= window);
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}
