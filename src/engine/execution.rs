use std::collections::{HashMap, HashSet};

use log::debug;
use rand::distributions::Alphanumeric;
use rand::Rng;

use crate::config::{EngineConfig, Millis};

pub type CollectedFields = HashMap<String, String>;

/// Fires at most once: either on completion, or never (expiry drops it).
pub(crate) type CompletionCallback = Box<dyn FnOnce(CollectedFields, Millis)>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionStatus {
    Pending,
    Completed,
    Expired,
}

/// The one timer an execution owns. Cancelled exactly once on the completion
/// path; partial progress never extends it.
#[derive(Debug, Clone)]
struct ExpiryTimer {
    deadline: Millis,
    armed: bool,
}

impl ExpiryTimer {
    fn new(deadline: Millis) -> Self {
        ExpiryTimer { deadline, armed: true }
    }

    fn fired(&self, now: Millis) -> bool {
        self.armed && now >= self.deadline
    }

    fn cancel(&mut self) {
        self.armed = false;
    }
}

/// One in-flight attempt to gather all data for one triggered rule instance.
/// Status moves away from `Pending` at most once and never comes back.
pub struct Execution {
    id: String,
    rule_id: String,
    created_at: Millis,
    status: ExecutionStatus,
    required: HashSet<String>,
    collected: CollectedFields,
    on_complete: Option<CompletionCallback>,
    timer: ExpiryTimer,
    remove_at: Option<Millis>,
}

impl Execution {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn rule_id(&self) -> &str {
        &self.rule_id
    }

    pub fn created_at(&self) -> Millis {
        self.created_at
    }

    pub fn status(&self) -> ExecutionStatus {
        self.status
    }

    pub fn required_fields(&self) -> &HashSet<String> {
        &self.required
    }

    pub fn collected_fields(&self) -> &CollectedFields {
        &self.collected
    }

    fn is_satisfied(&self) -> bool {
        self.required
            .iter()
            .all(|field| self.collected.contains_key(field))
    }
}

/// Registry and state machine for executions. Owned by the engine, one
/// instance per page load; all mutation goes through these operations.
pub struct ExecutionManager {
    executions: HashMap<String, Execution>,
    max_wait_time: Millis,
    time_window: Millis,
    grace: Millis,
}

impl ExecutionManager {
    pub fn new(config: &EngineConfig) -> Self {
        ExecutionManager {
            executions: HashMap::new(),
            max_wait_time: config.max_wait_time,
            time_window: config.time_window,
            grace: config.execution_grace,
        }
    }

    /// Allocates a new pending execution. `seed` carries the fields already
    /// known at trigger time; `required` names the ones still missing. If the
    /// seed already covers everything, the execution completes immediately.
    pub fn create_context(
        &mut self,
        rule_id: &str,
        required: HashSet<String>,
        seed: CollectedFields,
        on_complete: CompletionCallback,
        now: Millis,
    ) -> String {
        let suffix: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(6)
            .map(char::from)
            .collect();
        let id = format!("{}-{}-{}", rule_id, now, suffix);

        let execution = Execution {
            id: id.clone(),
            rule_id: rule_id.to_string(),
            created_at: now,
            status: ExecutionStatus::Pending,
            required,
            collected: seed,
            on_complete: Some(on_complete),
            timer: ExpiryTimer::new(now + self.max_wait_time),
            remove_at: None,
        };

        debug!(
            "Created execution '{}' awaiting {:?}",
            &id, &execution.required
        );

        self.executions.insert(id.clone(), execution);
        self.evaluate(&id, now);

        id
    }

    /// Records a field value into a pending execution and re-evaluates
    /// completion. Ignored for unknown ids and terminal executions. A value
    /// arriving past the deadline expires the execution instead.
    pub fn collect_field(&mut self, execution_id: &str, field: &str, value: &str, now: Millis) {
        let execution = match self.executions.get_mut(execution_id) {
            Some(execution) => execution,
            None => return,
        };

        if execution.status != ExecutionStatus::Pending {
            return;
        }

        if execution.timer.fired(now) {
            Self::expire(execution, now, self.grace);
            return;
        }

        execution.collected.insert(field.to_string(), value.to_string());
        debug!("Execution '{}' collected field '{}'", execution_id, field);

        self.evaluate(execution_id, now);
    }

    /// Swaps one awaited field name for another, for the case where the
    /// preferred field turns out unobtainable and a fallback should be
    /// awaited instead. Only legal while pending.
    pub fn replace_required_field(
        &mut self,
        execution_id: &str,
        old_name: &str,
        new_name: &str,
        now: Millis,
    ) {
        let execution = match self.executions.get_mut(execution_id) {
            Some(execution) => execution,
            None => return,
        };

        if execution.status != ExecutionStatus::Pending {
            return;
        }

        if execution.required.remove(old_name) {
            execution.required.insert(new_name.to_string());
            debug!(
                "Execution '{}' now awaits '{}' instead of '{}'",
                execution_id, new_name, old_name
            );
            // the replacement may already be satisfied by collected data
            self.evaluate(execution_id, now);
        }
    }

    /// A pending execution of the rule whose time window covers the observed
    /// timestamp. The window is strictly shorter than the expiry deadline;
    /// an execution can be pending yet no longer attributable. When several
    /// qualify, the oldest wins.
    pub fn find_matching_context(&self, rule_id: &str, observed: Millis) -> Option<&Execution> {
        self.executions
            .values()
            .filter(|e| {
                e.status == ExecutionStatus::Pending
                    && e.rule_id == rule_id
                    && e.created_at <= observed
                    && observed - e.created_at <= self.time_window
            })
            .min_by_key(|e| e.created_at)
    }

    pub fn get(&self, execution_id: &str) -> Option<&Execution> {
        self.executions.get(execution_id)
    }

    /// Ids of pending executions still awaiting the given field.
    pub fn pending_awaiting(&self, field: &str) -> Vec<String> {
        self.executions
            .values()
            .filter(|e| e.status == ExecutionStatus::Pending && e.required.contains(field))
            .map(|e| e.id.clone())
            .collect()
    }

    /// Expires overdue pending executions and drops terminal ones whose
    /// grace period has passed. The host drives this from its own cadence.
    pub fn sweep(&mut self, now: Millis) {
        for execution in self.executions.values_mut() {
            if execution.status == ExecutionStatus::Pending && execution.timer.fired(now) {
                Self::expire(execution, now, self.grace);
            }
        }

        self.executions
            .retain(|_, e| e.remove_at.map(|at| now < at).unwrap_or(true));
    }

    pub fn pending_count(&self) -> usize {
        self.executions
            .values()
            .filter(|e| e.status == ExecutionStatus::Pending)
            .count()
    }

    pub fn len(&self) -> usize {
        self.executions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.executions.is_empty()
    }

    fn expire(execution: &mut Execution, now: Millis, grace: Millis) {
        execution.status = ExecutionStatus::Expired;
        execution.on_complete = None;
        execution.remove_at = Some(now + grace);
        debug!(
            "Execution '{}' expired still awaiting {:?}",
            &execution.id, &execution.required
        );
    }

    fn evaluate(&mut self, execution_id: &str, now: Millis) {
        let execution = match self.executions.get_mut(execution_id) {
            Some(execution) => execution,
            None => return,
        };

        if execution.status != ExecutionStatus::Pending || !execution.is_satisfied() {
            return;
        }

        execution.status = ExecutionStatus::Completed;
        execution.timer.cancel();
        execution.remove_at = Some(now + self.grace);

        let callback = execution.on_complete.take();
        let fields = execution.collected.clone();
        debug!("Execution '{}' completed with {} fields", execution_id, fields.len());

        if let Some(callback) = callback {
            callback(fields, now);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;

    fn manager() -> ExecutionManager {
        ExecutionManager::new(&EngineConfig::default())
    }

    fn required(names: &[&str]) -> HashSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    type Delivered = Rc<RefCell<Vec<CollectedFields>>>;

    fn recording_callback() -> (CompletionCallback, Delivered) {
        let delivered: Delivered = Rc::new(RefCell::new(Vec::new()));
        let clone = delivered.clone();
        let callback: CompletionCallback = Box::new(move |fields, _now| {
            clone.borrow_mut().push(fields);
        });
        (callback, delivered)
    }

    #[test]
    fn partial_collection_never_completes() {
        let mut mgr = manager();
        let (cb, delivered) = recording_callback();
        let id = mgr.create_context("r1", required(&["A", "B"]), HashMap::new(), cb, 1_000);

        mgr.collect_field(&id, "A", "1", 1_100);

        assert_eq!(mgr.get(&id).unwrap().status(), ExecutionStatus::Pending);
        assert!(delivered.borrow().is_empty());
    }

    #[test]
    fn full_collection_completes_exactly_once_with_exact_keys() {
        let mut mgr = manager();
        let (cb, delivered) = recording_callback();
        let id = mgr.create_context("r1", required(&["A", "B"]), HashMap::new(), cb, 1_000);

        mgr.collect_field(&id, "A", "va", 1_100);
        mgr.collect_field(&id, "B", "vb", 1_200);
        // a late extra collect on a terminal execution is ignored
        mgr.collect_field(&id, "C", "vc", 1_300);

        let delivered = delivered.borrow();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].len(), 2);
        assert_eq!(delivered[0].get("A").map(String::as_str), Some("va"));
        assert_eq!(delivered[0].get("B").map(String::as_str), Some("vb"));
        assert_eq!(mgr.get(&id).unwrap().status(), ExecutionStatus::Completed);
    }

    #[test]
    fn seed_fields_are_merged_into_the_completion_record() {
        let mut mgr = manager();
        let (cb, delivered) = recording_callback();
        let mut seed = HashMap::new();
        seed.insert("ItemId".to_string(), "42".to_string());

        let id = mgr.create_context("r1", required(&["Rating"]), seed, cb, 1_000);
        mgr.collect_field(&id, "Rating", "4", 1_500);

        let delivered = delivered.borrow();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].get("ItemId").map(String::as_str), Some("42"));
        assert_eq!(delivered[0].get("Rating").map(String::as_str), Some("4"));
    }

    #[test]
    fn satisfied_seed_completes_immediately() {
        let mut mgr = manager();
        let (cb, delivered) = recording_callback();
        let mut seed = HashMap::new();
        seed.insert("A".to_string(), "1".to_string());

        mgr.create_context("r1", required(&["A"]), seed, cb, 1_000);
        assert_eq!(delivered.borrow().len(), 1);
    }

    #[test]
    fn expiry_blocks_late_completion() {
        let mut mgr = manager();
        let (cb, delivered) = recording_callback();
        let id = mgr.create_context("r1", required(&["A"]), HashMap::new(), cb, 1_000);

        mgr.sweep(11_000); // max_wait_time elapsed
        assert_eq!(mgr.get(&id).unwrap().status(), ExecutionStatus::Expired);

        mgr.collect_field(&id, "A", "late", 11_001);
        assert!(delivered.borrow().is_empty());
        assert_eq!(mgr.get(&id).unwrap().status(), ExecutionStatus::Expired);
    }

    #[test]
    fn late_field_without_prior_sweep_still_expires() {
        let mut mgr = manager();
        let (cb, delivered) = recording_callback();
        let id = mgr.create_context("r1", required(&["A"]), HashMap::new(), cb, 1_000);

        // nobody swept, but the deadline has passed by the time data shows up
        mgr.collect_field(&id, "A", "late", 12_345);

        assert!(delivered.borrow().is_empty());
        assert_eq!(mgr.get(&id).unwrap().status(), ExecutionStatus::Expired);
    }

    #[test]
    fn matching_window_is_shorter_than_expiry() {
        let mut mgr = manager();
        let (cb, _) = recording_callback();
        let id = mgr.create_context("r1", required(&["A"]), HashMap::new(), cb, 1_000);

        assert!(mgr.find_matching_context("r1", 1_000).is_some());
        assert!(mgr.find_matching_context("r1", 6_000).is_some()); // creation + window
        assert!(mgr.find_matching_context("r1", 6_001).is_none()); // 1ms past the window
        assert!(mgr.find_matching_context("r1", 999).is_none()); // before creation
        assert!(mgr.find_matching_context("r2", 1_500).is_none()); // other rule

        // still pending though, only unattributable
        assert_eq!(mgr.get(&id).unwrap().status(), ExecutionStatus::Pending);
    }

    #[test]
    fn independent_triggers_get_independent_executions() {
        let mut mgr = manager();
        let (cb1, _) = recording_callback();
        let (cb2, _) = recording_callback();

        let first = mgr.create_context("r1", required(&["A"]), HashMap::new(), cb1, 1_000);
        let second = mgr.create_context("r1", required(&["A"]), HashMap::new(), cb2, 2_000);

        assert_ne!(first, second);
        // the oldest in-window execution wins
        assert_eq!(mgr.find_matching_context("r1", 2_500).unwrap().id(), first);
        // once the first window lapses, the second takes over
        assert_eq!(mgr.find_matching_context("r1", 6_500).unwrap().id(), second);
    }

    #[test]
    fn replace_required_field_swaps_the_requirement() {
        let mut mgr = manager();
        let (cb, delivered) = recording_callback();
        let id = mgr.create_context("r1", required(&["UserId"]), HashMap::new(), cb, 1_000);

        mgr.replace_required_field(&id, "UserId", "Email", 1_100);
        mgr.collect_field(&id, "UserId", "u-1", 1_200);
        assert!(delivered.borrow().is_empty());

        mgr.collect_field(&id, "Email", "a@b.c", 1_300);
        assert_eq!(delivered.borrow().len(), 1);
    }

    #[test]
    fn replace_on_terminal_execution_is_ignored() {
        let mut mgr = manager();
        let (cb, _) = recording_callback();
        let id = mgr.create_context("r1", required(&["A"]), HashMap::new(), cb, 1_000);
        mgr.collect_field(&id, "A", "1", 1_100);

        mgr.replace_required_field(&id, "A", "B", 1_200);
        assert_eq!(mgr.get(&id).unwrap().status(), ExecutionStatus::Completed);
        assert!(mgr.get(&id).unwrap().required_fields().contains("A"));
    }

    #[test]
    fn terminal_executions_are_removed_after_grace() {
        let mut mgr = manager();
        let (cb, _) = recording_callback();
        let id = mgr.create_context("r1", required(&["A"]), HashMap::new(), cb, 1_000);
        mgr.collect_field(&id, "A", "1", 1_100);

        // still inspectable right after completion
        mgr.sweep(1_500);
        assert!(mgr.get(&id).is_some());

        mgr.sweep(3_000); // past completion + grace
        assert!(mgr.get(&id).is_none());
        assert!(mgr.is_empty());
    }
}
