use crate::{
    domain::{clamp_counter, CounterMode, CounterRange, NodeId, StateKey, StateValue, COUNTER_MAX},
    error::ErrorCode,
    protocol::{CounterResponse, NodeRun, ServerEvent, TextResponse},
};

#[test]
fn clamps_negative_and_oversized_counters() {
    assert_eq!(clamp_counter(-5), 0);
    assert_eq!(clamp_counter(42), 42);
    assert_eq!(clamp_counter(i64::MAX), COUNTER_MAX);
}

#[test]
fn parses_counter_modes_case_insensitively() {
    assert_eq!("Increment".parse::<CounterMode>().expect("mode"), CounterMode::Increment);
    assert_eq!(" randomize ".parse::<CounterMode>().expect("mode"), CounterMode::Randomize);
    let err = "sideways".parse::<CounterMode>().expect_err("must fail");
    assert_eq!(err.code, ErrorCode::Validation);
}

#[test]
fn state_keys_default_to_type_appropriate_values() {
    assert_eq!(StateKey::Counter.default_value(), StateValue::Counter(0));
    assert_eq!(
        StateKey::CacheText.default_value(),
        StateValue::Text(String::new())
    );
    assert_eq!("cache_text".parse::<StateKey>().expect("key"), StateKey::CacheText);
}

#[test]
fn rejects_inverted_counter_range() {
    assert!(CounterRange::new(5, 1).is_err());
    let range = CounterRange::new(1, 10).expect("range");
    assert_eq!(range.clamp(0), 1);
    assert_eq!(range.clamp(11), 10);
}

#[test]
fn inverted_counter_range_cannot_be_deserialized() {
    let err = serde_json::from_str::<CounterRange>(r#"{"min":9,"max":1}"#)
        .expect_err("inverted range must be rejected");
    assert!(err.to_string().contains("exceeds max"));

    let range: CounterRange = serde_json::from_str(r#"{"min":1,"max":9}"#).expect("json");
    assert_eq!((range.min(), range.max()), (1, 9));
    assert_eq!(
        serde_json::to_string(&range).expect("json"),
        r#"{"min":1,"max":9}"#
    );
}

#[test]
fn read_responses_accept_bodies_without_version() {
    let counter: CounterResponse = serde_json::from_str(r#"{"value":3}"#).expect("json");
    assert_eq!(counter.value, 3);
    assert_eq!(counter.version, 0);

    let text: TextResponse = serde_json::from_str(r#"{"text":"hello"}"#).expect("json");
    assert_eq!(text.text, "hello");
}

#[test]
fn node_runs_are_tagged_by_kind() {
    let run: NodeRun = serde_json::from_value(serde_json::json!({
        "kind": "text_cache",
        "id": "7",
        "input_text": "hello",
    }))
    .expect("json");
    assert_eq!(run.node_id(), &NodeId::new("7"));

    let event = ServerEvent::StateChanged {
        node_id: NodeId::new("7"),
        state_key: StateKey::Counter,
        version: 2,
    };
    let encoded = serde_json::to_value(&event).expect("json");
    assert_eq!(encoded["type"], "state_changed");
    assert_eq!(encoded["payload"]["state_key"], "counter");
}
