use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::config::Millis;
use crate::error::TrackError;
use crate::extract::walk_json;
use crate::net::NetworkExchange;
use crate::pattern::CompiledPattern;
use crate::ports::StorageArea;

/// Where the logged-in identity shows up on the wire: one declaration per
/// known endpoint, consumed from configuration.
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct IdentitySourceSpec {
    /// Canonical field name the discovered value is cached under.
    pub field: String,
    pub request_url_pattern: String,
    pub request_method: String,
    pub request_body_path: String,
}

struct IdentitySource {
    field: String,
    method: String,
    pattern: CompiledPattern,
    body_path: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct CachedIdentity {
    pub field: String,
    pub value: String,
    pub timestamp: Millis,
}

/// The user-identity side channel: watches all traffic for the configured
/// identity endpoints, independent of any pending execution, and keeps the
/// last discovered identity. The cache is the engine's only cross-reload
/// state, persisted to a storage area under a fixed key.
pub struct IdentityChannel {
    storage_key: String,
    sources: Vec<IdentitySource>,
    cached: Option<CachedIdentity>,
    /// Pending executions awaiting an identity field: (execution id, field
    /// name the execution currently requires).
    awaiting: Vec<(String, String)>,
}

impl IdentityChannel {
    pub(crate) fn new(specs: &[IdentitySourceSpec], storage_key: &str) -> Result<Self, TrackError> {
        let mut sources = Vec::with_capacity(specs.len());

        for spec in specs.iter() {
            if spec.field.trim().is_empty() {
                return Err(TrackError::new("identity source with empty field name"));
            }

            let pattern = CompiledPattern::compile(&spec.request_url_pattern).map_err(|e| {
                TrackError::new(format!(
                    "identity source '{}' has unusable pattern: {}",
                    &spec.field, e
                ))
            })?;

            let body_path: Vec<String> = spec
                .request_body_path
                .split('.')
                .map(str::to_string)
                .collect();
            if body_path.iter().any(|s| s.is_empty()) {
                return Err(TrackError::new(format!(
                    "identity source '{}' has unusable body path '{}'",
                    &spec.field, &spec.request_body_path
                )));
            }

            sources.push(IdentitySource {
                field: spec.field.clone(),
                method: spec.request_method.to_lowercase(),
                pattern,
                body_path,
            });
        }

        Ok(IdentityChannel {
            storage_key: storage_key.to_string(),
            sources,
            cached: None,
            awaiting: Vec::new(),
        })
    }

    /// Restores a previously persisted identity, if the storage area has one.
    pub(crate) fn hydrate(&mut self, storage: &dyn StorageArea) {
        let raw = match storage.get(&self.storage_key) {
            Some(raw) => raw,
            None => return,
        };

        match serde_json::from_str::<CachedIdentity>(&raw) {
            Ok(cached) => {
                debug!("Restored identity '{}' from storage", &cached.field);
                self.cached = Some(cached);
            }
            Err(err) => {
                // next successful discovery overwrites the key
                debug!("Ignoring unreadable persisted identity: {}", err);
            }
        }
    }

    pub fn current(&self) -> Option<&CachedIdentity> {
        self.cached.as_ref()
    }

    pub(crate) fn register_awaiting(&mut self, execution_id: &str, field: &str) {
        self.awaiting
            .push((execution_id.to_string(), field.to_string()));
    }

    pub(crate) fn take_awaiting(&mut self) -> Vec<(String, String)> {
        std::mem::take(&mut self.awaiting)
    }

    /// Observer step one: match the call against the identity sources and
    /// cache whatever it reveals. Never requires a pending execution.
    pub(crate) fn observe(
        &mut self,
        exchange: &NetworkExchange,
        now: Millis,
        storage: &mut dyn StorageArea,
    ) -> Option<CachedIdentity> {
        let path = exchange.request.path();

        for source in self.sources.iter() {
            if !exchange.request.method_is(&source.method) {
                continue;
            }

            if !source.pattern.static_segments_present(path) || !source.pattern.matches(path) {
                continue;
            }

            let value = lookup_identity_value(exchange, &source.body_path);

            if let Some(value) = value {
                let cached = CachedIdentity {
                    field: source.field.clone(),
                    value,
                    timestamp: now,
                };

                info!("Identity side channel discovered '{}'", &cached.field);

                if let Ok(serialized) = serde_json::to_string(&cached) {
                    storage.set(&self.storage_key, &serialized);
                }

                self.cached = Some(cached.clone());
                return Some(cached);
            }
        }

        None
    }
}

fn lookup_identity_value(exchange: &NetworkExchange, path: &[String]) -> Option<String> {
    // Request body first for payload-carrying methods; a GET has none worth
    // reading, and either way the response may be where identity lives.
    let primary = if exchange.request.method_is("get") {
        None
    }
    else {
        exchange.request.json_body()
    };

    if let Some(parsed) = primary {
        if let Some(value) = walk_json(&parsed, path) {
            return Some(value);
        }
    }

    let parsed = exchange.response.as_ref()?.json_body()?;
    walk_json(&parsed, path)
}
