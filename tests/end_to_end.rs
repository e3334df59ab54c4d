use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use tracklet::engine::identity::IdentitySourceSpec;
use tracklet::{
    rule_from_yaml_str, Engine, EngineConfig, MemoryStorage, NetworkExchange, RecordingSink,
    RequestWrapper, ResponseWrapper, TriggerEvent,
};

const RATE_RULE: &str = r#"
metadata:
  name: Rate product
id: rate-product
event_type: product_rated
item_field: ItemId
trigger:
  on: click
  target: "button.rate"
mappings:
  - field: ItemId
    source: element
    value: "[data-item-id]"
  - field: Rating
    source: request_body
    request_url_pattern: "api/rate"
    request_method: POST
    request_body_path: "stars"
"#;

fn sink() -> Rc<RefCell<RecordingSink>> {
    Rc::new(RefCell::new(RecordingSink::default()))
}

fn engine_with(config: EngineConfig, rules: &[&str], sink: Rc<RefCell<RecordingSink>>) -> Engine {
    let rules = rules
        .iter()
        .map(|text| rule_from_yaml_str(text).unwrap())
        .collect();

    Engine::new(
        config,
        rules,
        Box::new(MemoryStorage::new()),
        Box::new(MemoryStorage::new()),
        sink,
    )
    .unwrap()
}

fn click_on_item(item_id: &str) -> TriggerEvent {
    let json = format!(
        r#"{{"kind": "click", "element": {{"tag": "button",
            "attributes": {{"class": "rate", "data-item-id": "{}"}}, "target": true}}}}"#,
        item_id
    );
    serde_json::from_str(&json).unwrap()
}

fn post(url: &str, body: &str) -> NetworkExchange {
    NetworkExchange {
        request: RequestWrapper {
            url: url.to_string(),
            method: "POST".to_string(),
            headers: HashMap::new(),
            body: Some(body.to_string()),
        },
        response: Some(ResponseWrapper {
            status: 200,
            headers: HashMap::new(),
            body: None,
        }),
    }
}

#[test]
fn click_and_confirming_call_merge_into_one_event() {
    let sink = sink();
    let mut engine = engine_with(EngineConfig::default(), &[RATE_RULE], sink.clone());

    engine.handle_trigger(&click_on_item("42"), 1_000);

    // the click alone cannot finish the payload
    assert_eq!(engine.pending_executions(), 1);
    assert!(sink.borrow().events.is_empty());

    engine.handle_request_completed(
        &post("https://shop.example/api/rate?utm=x", r#"{"stars": 4}"#),
        1_800,
    );

    assert_eq!(engine.pending_executions(), 0);
    let events = &sink.borrow().events;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type, "product_rated");
    assert_eq!(events[0].fields.get("ItemId").map(String::as_str), Some("42"));
    assert_eq!(events[0].fields.get("Rating").map(String::as_str), Some("4"));
    assert_eq!(events[0].timestamp, 1_800);
}

#[test]
fn execution_expires_when_the_call_never_comes() {
    let sink = sink();
    let mut engine = engine_with(EngineConfig::default(), &[RATE_RULE], sink.clone());

    engine.handle_trigger(&click_on_item("42"), 1_000);
    assert_eq!(engine.pending_executions(), 1);

    engine.sweep(11_001); // past max_wait_time

    assert_eq!(engine.pending_executions(), 0);
    assert!(sink.borrow().events.is_empty());
}

#[test]
fn calls_outside_the_correlation_window_are_not_attributed() {
    let sink = sink();
    let mut engine = engine_with(EngineConfig::default(), &[RATE_RULE], sink.clone());

    engine.handle_trigger(&click_on_item("42"), 1_000);

    // 5s window passed; the call matches the pattern but not the trigger
    engine.handle_request_completed(&post("/api/rate", r#"{"stars": 4}"#), 6_100);

    assert!(sink.borrow().events.is_empty());
    engine.sweep(12_001);
    assert_eq!(engine.pending_executions(), 0);
    assert!(sink.borrow().events.is_empty());
}

#[test]
fn unrelated_calls_leave_the_execution_pending() {
    let sink = sink();
    let mut engine = engine_with(EngineConfig::default(), &[RATE_RULE], sink.clone());

    engine.handle_trigger(&click_on_item("42"), 1_000);

    engine.handle_request_completed(&post("/api/cart", r#"{"stars": 4}"#), 1_200);
    engine.handle_request_completed(&post("/api/rate", "not json"), 1_300);

    assert_eq!(engine.pending_executions(), 1);
    assert!(sink.borrow().events.is_empty());

    // the real one still lands
    engine.handle_request_completed(&post("/api/rate", r#"{"stars": 5}"#), 1_400);
    assert_eq!(sink.borrow().events.len(), 1);
}

#[test]
fn concurrent_executions_complete_oldest_first() {
    let sink = sink();
    let mut engine = engine_with(EngineConfig::default(), &[RATE_RULE], sink.clone());

    engine.handle_trigger(&click_on_item("1"), 1_000);
    engine.handle_trigger(&click_on_item("2"), 1_100);
    assert_eq!(engine.pending_executions(), 2);

    engine.handle_request_completed(&post("/api/rate", r#"{"stars": 3}"#), 1_200);
    engine.handle_request_completed(&post("/api/rate", r#"{"stars": 5}"#), 1_300);

    let events = &sink.borrow().events;
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].fields.get("ItemId").map(String::as_str), Some("1"));
    assert_eq!(events[0].fields.get("Rating").map(String::as_str), Some("3"));
    assert_eq!(events[1].fields.get("ItemId").map(String::as_str), Some("2"));
    assert_eq!(events[1].fields.get("Rating").map(String::as_str), Some("5"));
}

#[test]
fn runaway_endpoint_trips_the_loop_guard() {
    let sink = sink();
    let mut engine = engine_with(EngineConfig::default(), &[RATE_RULE], sink.clone());

    // ceiling is 5 per 1s window
    for i in 0..7u64 {
        engine.handle_trigger(&click_on_item(&format!("{}", i)), 1_000 + i * 10);
    }
    for i in 0..7u64 {
        engine.handle_request_completed(&post("/api/rate", r#"{"stars": 4}"#), 1_100 + i * 10);
    }

    // calls six and seven were dropped before extraction
    assert_eq!(sink.borrow().events.len(), 5);
    assert_eq!(engine.pending_executions(), 2);
}

#[test]
fn identity_side_channel_fills_the_missing_user_field() {
    const IDENTITY_RULE: &str = r#"
metadata:
  name: Add to cart
id: cart-add
event_type: cart_add
item_field: ItemId
trigger:
  on: click
  target: "button.rate"
mappings:
  - field: ItemId
    source: element
    value: "[data-item-id]"
  - field: UserId
    source: local_storage
    value: "uid"
    identity: true
"#;

    let config = EngineConfig {
        identity_sources: vec![IdentitySourceSpec {
            field: "user_id".to_string(),
            request_url_pattern: "api/login".to_string(),
            request_method: "POST".to_string(),
            request_body_path: "user.id".to_string(),
        }],
        ..EngineConfig::default()
    };

    let sink = sink();
    let mut engine = engine_with(config, &[IDENTITY_RULE], sink.clone());

    // storage has no uid and nothing is cached yet; the click must wait
    engine.handle_trigger(&click_on_item("42"), 1_000);
    assert_eq!(engine.pending_executions(), 1);
    assert!(sink.borrow().events.is_empty());

    engine.handle_request_completed(
        &post("https://shop.example/api/login", r#"{"user": {"id": "u-9"}}"#),
        1_500,
    );

    assert_eq!(engine.pending_executions(), 0);
    let events = sink.borrow().events.clone();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].fields.get("ItemId").map(String::as_str), Some("42"));
    assert_eq!(events[0].fields.get("user_id").map(String::as_str), Some("u-9"));

    assert_eq!(engine.current_identity().as_deref(), Some("u-9"));

    // with the cache warm, the next click completes synchronously
    engine.handle_trigger(&click_on_item("43"), 2_000);
    assert_eq!(engine.pending_executions(), 0);
    assert_eq!(sink.borrow().events.len(), 2);
}

#[test]
fn conditions_gate_the_trigger() {
    const CONDITIONAL_RULE: &str = r#"
metadata:
  name: Rate on detail page
id: rate-on-detail
event_type: product_rated
trigger:
  on: click
  target: "button.rate"
conditions:
  - kind: url_matches
    pattern: "product/:id"
mappings:
  - field: ItemId
    source: element
    value: "[data-item-id]"
"#;

    let sink = sink();
    let mut engine = engine_with(EngineConfig::default(), &[CONDITIONAL_RULE], sink.clone());

    engine.set_location("https://shop.example/search?q=x");
    engine.handle_trigger(&click_on_item("42"), 1_000);
    assert!(sink.borrow().events.is_empty());

    engine.set_location("https://shop.example/product/42");
    engine.handle_trigger(&click_on_item("42"), 2_000);
    assert_eq!(sink.borrow().events.len(), 1);
}
