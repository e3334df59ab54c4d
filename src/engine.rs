pub mod dedup;
pub mod execution;
pub mod identity;
pub mod loop_guard;
pub mod observer;

use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;

use log::{debug, info};
use serde::Deserialize;

use crate::config::{EngineConfig, Millis};
use crate::dom::{Dom, ElementSnapshot};
use crate::error::TrackError;
use crate::extract::ExtractionContext;
use crate::net::NetworkExchange;
use crate::payload::PayloadBuilder;
use crate::ports::{EventSink, PageLocation, StorageArea, TrackedEvent};
use crate::rules::{Condition, Rule, StorageKind, TriggerKind};

use dedup::Deduplicator;
use execution::{CollectedFields, CompletionCallback, ExecutionManager};
use identity::IdentityChannel;
use loop_guard::LoopGuard;
use observer::NetworkObserver;

/// A UI-originated interaction, as delivered by the host's event source:
/// what happened and a snapshot of the element it happened on.
#[derive(Debug, Clone, Deserialize)]
pub struct TriggerEvent {
    pub kind: TriggerKind,
    pub element: ElementSnapshot,
}

/// The correlation engine. One instance per page load owns every registry:
/// executions, identity cache, fingerprints, rate records. No globals; the
/// host constructs it once and passes interactions, completed calls and
/// clock ticks in.
pub struct Engine {
    config: EngineConfig,
    rules: Vec<Rc<Rule>>,
    builder: PayloadBuilder,
    manager: ExecutionManager,
    observer: NetworkObserver,
    identity: Rc<RefCell<IdentityChannel>>,
    dedup: Rc<RefCell<Deduplicator>>,
    loop_guard: LoopGuard,
    sink: Rc<RefCell<dyn EventSink>>,
    local: Box<dyn StorageArea>,
    session: Box<dyn StorageArea>,
    cookies: String,
    location: PageLocation,
}

impl Engine {
    pub fn new(
        config: EngineConfig,
        rules: Vec<Rule>,
        local: Box<dyn StorageArea>,
        session: Box<dyn StorageArea>,
        sink: Rc<RefCell<dyn EventSink>>,
    ) -> Result<Self, TrackError> {
        config.validate()?;

        let mut identity =
            IdentityChannel::new(&config.identity_sources, &config.identity_storage_key)?;
        identity.hydrate(&*local);

        let mut engine = Engine {
            manager: ExecutionManager::new(&config),
            observer: NetworkObserver::new(),
            identity: Rc::new(RefCell::new(identity)),
            dedup: Rc::new(RefCell::new(Deduplicator::new(&config))),
            loop_guard: LoopGuard::new(&config),
            builder: PayloadBuilder::new(),
            rules: Vec::new(),
            config,
            sink,
            local,
            session,
            cookies: String::new(),
            location: PageLocation::default(),
        };

        for rule in rules {
            engine.register_rule(rule)?;
        }

        Ok(engine)
    }

    /// Validates and installs a rule; rules with network-sourced mappings are
    /// also registered with the observer.
    pub fn register_rule(&mut self, mut rule: Rule) -> Result<(), TrackError> {
        rule.check_up()?;

        if self.rules.iter().any(|r| r.get_id() == rule.get_id()) {
            return Err(TrackError::new(format!(
                "Rule '{}' is already registered",
                rule.get_id()
            )));
        }

        info!("Registered rule '{}' ({})", rule.get_id(), &rule.event_type);

        let rule = Rc::new(rule);
        self.observer.register_rule(rule.clone());
        self.rules.push(rule);

        Ok(())
    }

    pub fn unregister_rule(&mut self, rule_id: &str) {
        self.rules.retain(|r| r.get_id() != rule_id);
        self.observer.unregister_rule(rule_id);
    }

    /// The host calls this on navigation; URL extraction reads from here.
    pub fn set_location(&mut self, href: &str) {
        self.location = PageLocation::parse(href);
    }

    pub fn set_cookies(&mut self, raw: &str) {
        self.cookies = raw.to_string();
    }

    pub fn local_storage_mut(&mut self) -> &mut dyn StorageArea {
        &mut *self.local
    }

    pub fn session_storage_mut(&mut self) -> &mut dyn StorageArea {
        &mut *self.session
    }

    /// An interaction fired. Matching rules get their synchronous extraction
    /// immediately; whatever still needs a confirming network signal opens an
    /// execution with exactly those fields as required.
    pub fn handle_trigger(&mut self, trigger: &TriggerEvent, now: Millis) {
        let dom = Dom::from_snapshot(&trigger.element);
        let target = match dom.target() {
            Some(target) => target,
            None => return,
        };

        let rules = self.rules.clone();
        for rule in rules {
            if rule.trigger.on != trigger.kind {
                continue;
            }

            let selector = match rule.trigger.target_cache.as_ref() {
                Some(selector) => selector,
                None => continue,
            };
            if dom.closest(target, selector).is_none() {
                continue;
            }

            if !self.conditions_hold(&rule) {
                debug!("Rule '{}' matched the target but failed a condition", rule.get_id());
                continue;
            }

            debug!("Rule '{}' triggered by {:?}", rule.get_id(), trigger.kind);

            let mut payload = {
                let ctx = ExtractionContext {
                    dom: Some(&dom),
                    target: Some(target),
                    exchange: None,
                    location: &self.location,
                    local: &*self.local,
                    session: &*self.session,
                    cookies: &self.cookies,
                    ancestor_hops: self.config.ancestor_hops,
                };
                self.builder.build(&ctx, &rule)
            };

            let cached_identity = self.identity.borrow().current().cloned();

            let mut required: HashSet<String> = HashSet::new();
            let mut awaiting_identity: Option<String> = None;

            for mapping in rule.mappings.iter() {
                if payload.contains_key(&mapping.field) {
                    continue;
                }

                if mapping.source.is_network() {
                    required.insert(mapping.field.clone());
                }
                else if mapping.identity {
                    // synchronous lookup failed; fall back to the side
                    // channel, cached or yet to be discovered
                    match cached_identity.as_ref() {
                        Some(cached) => {
                            payload.insert(mapping.field.clone(), cached.value.clone());
                        }
                        None => {
                            required.insert(mapping.field.clone());
                            awaiting_identity = Some(mapping.field.clone());
                        }
                    }
                }
            }

            if required.is_empty() {
                // fully satisfied synchronously, no execution needed
                deliver_event(&rule, &self.dedup, &self.sink, &self.identity, payload, now);
            }
            else {
                let callback =
                    completion_callback(&rule, &self.dedup, &self.sink, &self.identity);
                let execution_id =
                    self.manager
                        .create_context(rule.get_id(), required, payload, callback, now);

                if let Some(field) = awaiting_identity {
                    self.identity
                        .borrow_mut()
                        .register_awaiting(&execution_id, &field);
                }
            }
        }
    }

    /// The host's interception hook reports one completed outgoing call.
    pub fn handle_request_completed(&mut self, exchange: &NetworkExchange, now: Millis) {
        self.observer.on_request_completed(
            exchange,
            now,
            &self.identity,
            &mut *self.local,
            &mut self.manager,
            &mut self.loop_guard,
            &self.builder,
        );
    }

    /// Periodic housekeeping: expires overdue executions and bounds the
    /// fingerprint and rate tables.
    pub fn sweep(&mut self, now: Millis) {
        self.manager.sweep(now);
        self.dedup.borrow_mut().sweep(now);
        self.loop_guard.sweep(now);
    }

    fn conditions_hold(&self, rule: &Rule) -> bool {
        rule.conditions.iter().all(|condition| match condition {
            Condition::UrlMatches { pattern_cache, .. } => pattern_cache
                .as_ref()
                .map(|p| p.matches(self.location.path()))
                .unwrap_or(false),
            Condition::StorageEquals { area, key, equals } => {
                let actual = match area {
                    StorageKind::Local => self.local.get(key),
                    StorageKind::Session => self.session.get(key),
                };
                actual.as_deref() == Some(equals.as_str())
            }
        })
    }

    pub fn pending_executions(&self) -> usize {
        self.manager.pending_count()
    }

    pub fn watched_rules(&self) -> usize {
        self.observer.watched_rules()
    }

    pub fn current_identity(&self) -> Option<String> {
        self.identity.borrow().current().map(|c| c.value.clone())
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}

fn completion_callback(
    rule: &Rc<Rule>,
    dedup: &Rc<RefCell<Deduplicator>>,
    sink: &Rc<RefCell<dyn EventSink>>,
    identity: &Rc<RefCell<IdentityChannel>>,
) -> CompletionCallback {
    let rule = rule.clone();
    let dedup = dedup.clone();
    let sink = sink.clone();
    let identity = identity.clone();

    Box::new(move |fields, now| {
        deliver_event(&rule, &dedup, &sink, &identity, fields, now);
    })
}

/// Every finished payload funnels through here, whether it completed
/// synchronously or through an execution: fingerprint, dedup gate, sink.
fn deliver_event(
    rule: &Rule,
    dedup: &Rc<RefCell<Deduplicator>>,
    sink: &Rc<RefCell<dyn EventSink>>,
    identity: &Rc<RefCell<IdentityChannel>>,
    fields: CollectedFields,
    now: Millis,
) {
    let user_identity = rule
        .mappings
        .iter()
        .filter(|m| m.identity)
        .find_map(|m| fields.get(&m.field).cloned())
        .or_else(|| identity.borrow().current().map(|c| c.value.clone()))
        .unwrap_or_default();

    let item_identity = rule
        .item_field
        .as_ref()
        .and_then(|f| fields.get(f).cloned())
        .unwrap_or_default();

    let is_duplicate = dedup.borrow_mut().is_duplicate(
        &[&rule.event_type, rule.get_id(), &user_identity, &item_identity],
        now,
    );

    if is_duplicate {
        debug!(
            "Dropping duplicate '{}' event for rule '{}'",
            &rule.event_type,
            rule.get_id()
        );
        return;
    }

    sink.borrow_mut().deliver(TrackedEvent {
        event_type: rule.event_type.clone(),
        rule_id: rule.get_id().to_string(),
        fields,
        timestamp: now,
    });
}
