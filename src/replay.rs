use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};

use colored::Colorize;
use log::warn;
use serde::Deserialize;

use crate::config::Millis;
use crate::dom::ElementSnapshot;
use crate::engine::{Engine, TriggerEvent};
use crate::error::TrackError;
use crate::net::{NetworkExchange, RequestWrapper, ResponseWrapper};
use crate::ports::{EventSink, TrackedEvent};
use crate::rules::TriggerKind;

/// One line of a recorded session log: navigations, interactions and
/// completed network calls, each stamped with the capture time.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReplayRecord {
    Navigation {
        timestamp: Millis,
        href: String,
        #[serde(default)]
        cookies: Option<String>,
        #[serde(default)]
        local_storage: Option<HashMap<String, String>>,
        #[serde(default)]
        session_storage: Option<HashMap<String, String>>,
    },
    Interaction {
        timestamp: Millis,
        kind: TriggerKind,
        element: ElementSnapshot,
    },
    Network {
        timestamp: Millis,
        request: RequestWrapper,
        #[serde(default)]
        response: Option<ResponseWrapper>,
    },
}

#[derive(Debug, Default)]
pub struct ReplayStats {
    pub interactions: usize,
    pub network_calls: usize,
    pub navigations: usize,
    pub skipped_lines: usize,
}

/// Prints every finished event to the terminal, one line each, the way the
/// delivery dispatcher would see them.
#[derive(Debug, Default)]
pub struct PrintingSink {
    pub delivered: usize,
}

impl EventSink for PrintingSink {
    fn deliver(&mut self, event: TrackedEvent) {
        self.delivered += 1;

        let fields = serde_json::to_string(&event.fields).unwrap_or_else(|_| "{}".to_string());
        println!(
            "{} {} {} rule={} {}",
            "evt".green().bold(),
            event.timestamp,
            event.event_type.bold(),
            event.rule_id,
            fields
        );
    }
}

/// Feeds a recorded JSONL session through the engine in capture order.
/// Malformed lines are skipped with a warning; a final sweep past the expiry
/// deadline flushes whatever never got its confirming signal.
pub fn replay_file(engine: &mut Engine, path: &str) -> Result<ReplayStats, TrackError> {
    let file = File::open(path)
        .map_err(|e| TrackError::new(format!("Cannot open log '{}': {}", path, e)))?;

    let mut stats = ReplayStats::default();
    let mut last_timestamp: Millis = 0;

    for (line_number, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        let record: ReplayRecord = match serde_json::from_str(&line) {
            Ok(record) => record,
            Err(err) => {
                warn!("Skipping unreadable line {}: {}", line_number + 1, err);
                stats.skipped_lines += 1;
                continue;
            }
        };

        match record {
            ReplayRecord::Navigation {
                timestamp,
                href,
                cookies,
                local_storage,
                session_storage,
            } => {
                stats.navigations += 1;
                last_timestamp = timestamp;
                engine.sweep(timestamp);

                engine.set_location(&href);
                if let Some(cookies) = cookies {
                    engine.set_cookies(&cookies);
                }
                if let Some(entries) = local_storage {
                    for (key, value) in entries.iter() {
                        engine.local_storage_mut().set(key, value);
                    }
                }
                if let Some(entries) = session_storage {
                    for (key, value) in entries.iter() {
                        engine.session_storage_mut().set(key, value);
                    }
                }
            }
            ReplayRecord::Interaction { timestamp, kind, element } => {
                stats.interactions += 1;
                last_timestamp = timestamp;
                engine.sweep(timestamp);

                let trigger = TriggerEvent { kind, element };
                engine.handle_trigger(&trigger, timestamp);
            }
            ReplayRecord::Network { timestamp, request, response } => {
                stats.network_calls += 1;
                last_timestamp = timestamp;
                engine.sweep(timestamp);

                let exchange = NetworkExchange { request, response };
                engine.handle_request_completed(&exchange, timestamp);
            }
        }
    }

    // expire whatever is still waiting, well past any deadline
    engine.sweep(last_timestamp + engine.config().max_wait_time + engine.config().execution_grace + 1);

    Ok(stats)
}
