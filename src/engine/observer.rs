use std::cell::RefCell;
use std::rc::Rc;

use log::debug;

use crate::config::Millis;
use crate::engine::execution::ExecutionManager;
use crate::engine::identity::IdentityChannel;
use crate::engine::loop_guard::LoopGuard;
use crate::extract::ExtractionContext;
use crate::net::NetworkExchange;
use crate::payload::PayloadBuilder;
use crate::ports::{MemoryStorage, PageLocation, StorageArea};
use crate::rules::Rule;

/// Passive, always-on interceptor of the page's outgoing traffic. Installed
/// once at startup behind the host's interception port; sees every call the
/// page makes, including the engine's own delivery traffic, so the cheap
/// pre-filter and the loop guard run before anything expensive.
pub struct NetworkObserver {
    rules: Vec<Rc<Rule>>,
}

impl NetworkObserver {
    pub(crate) fn new() -> Self {
        NetworkObserver { rules: Vec::new() }
    }

    /// Registers a rule for network matching. Rules with no network-sourced
    /// mappings are not kept; they never need this path.
    pub(crate) fn register_rule(&mut self, rule: Rc<Rule>) {
        if !rule.needs_network_data() {
            return;
        }

        if self.rules.iter().any(|r| r.get_id() == rule.get_id()) {
            return;
        }

        debug!("Observer now watching rule '{}'", rule.get_id());
        self.rules.push(rule);
    }

    pub(crate) fn unregister_rule(&mut self, rule_id: &str) {
        self.rules.retain(|r| r.get_id() != rule_id);
    }

    pub(crate) fn watched_rules(&self) -> usize {
        self.rules.len()
    }

    /// One intercepted completed call. Order matters: the identity side
    /// channel runs unconditionally, then the static pre-filter decides
    /// whether any body is worth parsing at all, and only then do matching
    /// rules get their field extraction. Every matching rule is processed
    /// independently.
    pub(crate) fn on_request_completed(
        &mut self,
        exchange: &NetworkExchange,
        now: Millis,
        identity: &Rc<RefCell<IdentityChannel>>,
        local: &mut dyn StorageArea,
        manager: &mut ExecutionManager,
        loop_guard: &mut LoopGuard,
        builder: &PayloadBuilder,
    ) {
        let path = exchange.request.path().to_string();
        let method = exchange.request.method.clone();

        // 1. user-identity side channel, no pending execution required
        let discovered = identity.borrow_mut().observe(exchange, now, local);
        if let Some(found) = discovered {
            // borrow released above; collect_field may fire completion
            // callbacks that read the channel again
            let awaiting = identity.borrow_mut().take_awaiting();
            for (execution_id, preferred) in awaiting {
                if preferred != found.field {
                    manager.replace_required_field(&execution_id, &preferred, &found.field, now);
                }
                manager.collect_field(&execution_id, &found.field, &found.value, now);
            }
        }

        // 2. with nothing registered, this call costs nothing more
        if self.rules.is_empty() {
            return;
        }

        let mut candidates: Vec<(Rc<Rule>, Vec<usize>)> = Vec::new();
        for rule in self.rules.iter() {
            let mut mapping_indexes = Vec::new();

            for (index, mapping) in rule.mappings.iter().enumerate() {
                if !mapping.source.is_network() {
                    continue;
                }

                let wanted_method = match mapping.request_method.as_deref() {
                    Some(m) => m,
                    None => continue,
                };
                if !exchange.request.method_is(wanted_method) {
                    continue;
                }

                let pattern = match mapping.pattern_cache.as_ref() {
                    Some(p) => p,
                    None => continue,
                };
                if pattern.static_segments_present(&path) {
                    mapping_indexes.push(index);
                }
            }

            if !mapping_indexes.is_empty() {
                candidates.push((rule.clone(), mapping_indexes));
            }
        }

        if candidates.is_empty() {
            return;
        }

        debug!(
            "{} {} passed the pre-filter for {} rule(s)",
            &method,
            &path,
            candidates.len()
        );

        // 3./4. only pre-filter survivors reach body parsing and collection
        let empty_location = PageLocation::default();
        let empty_local = MemoryStorage::new();
        let empty_session = MemoryStorage::new();
        let ctx = ExtractionContext {
            dom: None,
            target: None,
            exchange: Some(exchange),
            location: &empty_location,
            local: &empty_local,
            session: &empty_session,
            cookies: "",
            ancestor_hops: 0,
        };

        for (rule, mapping_indexes) in candidates {
            if loop_guard.check_and_record(&path, &method, rule.get_id(), now) {
                debug!("Loop guard dropped {} {} for rule '{}'", &method, &path, rule.get_id());
                continue;
            }

            for index in mapping_indexes {
                let mapping = &rule.mappings[index];

                let pattern = match mapping.pattern_cache.as_ref() {
                    Some(p) => p,
                    None => continue,
                };
                if !pattern.matches(&path) {
                    continue;
                }

                let execution_id = match manager.find_matching_context(rule.get_id(), now) {
                    Some(execution) => execution.id().to_string(),
                    None => {
                        debug!(
                            "No in-window execution of rule '{}' for {} {}",
                            rule.get_id(),
                            &method,
                            &path
                        );
                        continue;
                    }
                };

                if let Some(value) = builder.extract_one(mapping, &ctx) {
                    manager.collect_field(&execution_id, &mapping.field, &value, now);
                }
            }
        }
    }
}
