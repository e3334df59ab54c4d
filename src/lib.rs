//! tracklet is the correlation core of a client-side behavioral tracking
//! SDK: it matches UI interactions against configured rules, waits for the
//! asynchronous network signals that carry the actual business data, merges
//! everything into one payload and hands finished events to a downstream
//! dispatcher, guarded against duplicates and self-triggering loops.

pub mod config;
pub mod dom;
pub mod engine;
pub mod error;
pub(crate) mod extract;
pub mod net;
pub mod pattern;
pub(crate) mod payload;
pub mod ports;
pub mod replay;
pub mod rules;

pub use config::{clock_now_ms, EngineConfig, Millis};
pub use engine::{Engine, TriggerEvent};
pub use error::TrackError;
pub use net::{NetworkExchange, RequestWrapper, ResponseWrapper};
pub use ports::{EventSink, MemoryStorage, RecordingSink, StorageArea, TrackedEvent};
pub use rules::{
    load_rule::{load_rules, rule_from_yaml_str},
    Rule,
};
