use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::config::Millis;

/// A browser-style key/value storage area. The hosting integration wires this
/// to whatever the platform offers; [`MemoryStorage`] backs tests and replay.
pub trait StorageArea {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&mut self, key: &str, value: &str);
    fn remove(&mut self, key: &str);
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct MemoryStorage {
    entries: HashMap<String, String>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: HashMap<String, String>) -> Self {
        MemoryStorage { entries }
    }
}

impl StorageArea for MemoryStorage {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: &str) {
        self.entries.insert(key.to_string(), value.to_string());
    }

    fn remove(&mut self, key: &str) {
        self.entries.remove(key);
    }
}

/// The current page location, parsed once per navigation. URL extraction reads
/// from here, never from network traffic.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct PageLocation {
    pub href: String,
    #[serde(skip)]
    path: String,
    #[serde(skip)]
    query: Vec<(String, String)>,
    #[serde(skip)]
    hash: String,
}

impl PageLocation {
    pub fn parse(href: &str) -> Self {
        let mut rest = href;

        if let Some(scheme_end) = rest.find("://") {
            let after = &rest[scheme_end + 3..];
            rest = match after.find('/') {
                Some(slash) => &after[slash..],
                None => "/",
            };
        }

        let (rest, hash) = match rest.split_once('#') {
            Some((r, h)) => (r, h.to_string()),
            None => (rest, String::new()),
        };

        let (path, raw_query) = match rest.split_once('?') {
            Some((p, q)) => (p.to_string(), q),
            None => (rest.to_string(), ""),
        };

        let query = raw_query
            .split('&')
            .filter(|p| !p.is_empty())
            .map(|pair| match pair.split_once('=') {
                Some((k, v)) => (k.to_string(), v.to_string()),
                None => (pair.to_string(), String::new()),
            })
            .collect();

        PageLocation {
            href: href.to_string(),
            path,
            query,
            hash,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn path_segment(&self, index: usize) -> Option<&str> {
        self.path.split('/').filter(|s| !s.is_empty()).nth(index)
    }

    pub fn fragment(&self) -> Option<&str> {
        if self.hash.is_empty() { None } else { Some(self.hash.as_str()) }
    }
}

/// `a=1; b=2` cookie header into name/value pairs.
pub(crate) fn parse_cookie(raw: &str, name: &str) -> Option<String> {
    for pair in raw.split(';') {
        if let Some((k, v)) = pair.split_once('=') {
            if k.trim() == name {
                return Some(v.trim().to_string());
            }
        }
    }

    None
}

/// One normalized, finished event handed to the downstream dispatcher.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct TrackedEvent {
    pub event_type: String,
    pub rule_id: String,
    pub fields: HashMap<String, String>,
    pub timestamp: Millis,
}

/// Downstream dispatcher port. Batching, retry and backoff live behind it,
/// not in this engine.
pub trait EventSink {
    fn deliver(&mut self, event: TrackedEvent);
}

#[derive(Debug, Default)]
pub struct RecordingSink {
    pub events: Vec<TrackedEvent>,
}

impl EventSink for RecordingSink {
    fn deliver(&mut self, event: TrackedEvent) {
        self.events.push(event);
    }
}
