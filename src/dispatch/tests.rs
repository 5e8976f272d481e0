use pretty_assertions::assert_eq;

use super::*;

#[derive(Default)]
struct Recorder {
    published: Vec<(String, String)>,
}

impl Publisher for Recorder {
    fn publish(&mut self, topic: &str, payload: &[u8]) {
        self.published.push((
            topic.to_string(),
            String::from_utf8_lossy(payload).to_string(),
        ));
    }
}

fn template(s: &str) -> Option<TopicTemplate> {
    Some(TopicTemplate::parse(s).unwrap())
}

fn pairs(published: &[(&str, &str)]) -> Vec<(String, String)> {
    published
        .iter()
        .map(|(t, p)| (t.to_string(), p.to_string()))
        .collect()
}

fn dispatch(dispatcher: &mut Dispatcher, event: &Event) -> Vec<(String, String)> {
    let mut recorder = Recorder::default();
    dispatcher.dispatch(event, &mut recorder);
    assert!(dispatcher.topic.is_empty());
    recorder.published
}

fn devices_only(devices: &str) -> Dispatcher {
    Dispatcher::new(template(devices), None, None, "pi")
}

fn all_topics() -> Dispatcher {
    Dispatcher::new(template("d/[model]/[id]"), template("e"), template("s"), "pi")
}

#[test]
fn test_device_fields_under_base_topic() {
    let mut dispatcher = devices_only("d/[model]/[id]");
    let event = Event::new()
        .with("model", "X")
        .with("id", 5)
        .with("battery", "OK");

    assert_eq!(
        dispatch(&mut dispatcher, &event),
        pairs(&[("d/X/5/id", "5"), ("d/X/5/battery", "OK")])
    );
}

#[test]
fn test_state_update_published_once() {
    let mut dispatcher = all_topics();
    let event = Event::new().with("type", "TPMS");

    assert_eq!(
        dispatch(&mut dispatcher, &event),
        pairs(&[("s", r#"{"type":"TPMS"}"#)])
    );
}

#[test]
fn test_state_update_without_states_topic() {
    let mut dispatcher = devices_only("d/[model]");
    let event = Event::new().with("time", "2024-01-01 00:00:00");
    assert!(dispatch(&mut dispatcher, &event).is_empty());
}

#[test]
fn test_events_before_devices() {
    let mut dispatcher = all_topics();
    let event = Event::new()
        .with("model", "X")
        .with("id", 5)
        .with("temperature_C", 21.5);

    assert_eq!(
        dispatch(&mut dispatcher, &event),
        pairs(&[
            ("e", r#"{"model":"X","id":5,"temperature_C":21.5}"#),
            ("d/X/5/id", "5"),
            ("d/X/5/temperature_C", "21.5"),
        ])
    );
}

#[test]
fn test_skips_selector_fields() {
    let mut dispatcher = devices_only("d[/type][/model][/subtype]");
    let event = Event::new()
        .with("type", "TPMS")
        .with("model", "X")
        .with("subtype", "rear")
        .with("pressure_kPa", 220.0);

    assert_eq!(
        dispatch(&mut dispatcher, &event),
        pairs(&[("d/TPMS/X/rear/pressure_kPa", "220.0")])
    );
}

#[test]
fn test_array_elements_indexed() {
    let mut dispatcher = devices_only("d/[model]");
    let event = Event::new()
        .with("model", "X")
        .with("codes", vec![7, 9])
        .with("rows", vec![vec!["a"], vec!["b", "c"]]);

    assert_eq!(
        dispatch(&mut dispatcher, &event),
        pairs(&[
            ("d/X/codes/0", "7"),
            ("d/X/codes/1", "9"),
            ("d/X/rows/0/0", "a"),
            ("d/X/rows/1/0", "b"),
            ("d/X/rows/1/1", "c"),
        ])
    );
}

#[test]
fn test_nested_objects_recurse() {
    let mut dispatcher = devices_only("d/[model]");
    let nested = Event::new()
        .with("model", "inner")
        .with("value", 1)
        .with("unit", "V");
    let event = Event::new()
        .with("model", "X")
        .with("sensor", nested)
        .with("rssi", -0.5);

    assert_eq!(
        dispatch(&mut dispatcher, &event),
        pairs(&[
            ("d/X/sensor/value", "1"),
            ("d/X/sensor/unit", "V"),
            ("d/X/rssi", "-0.5"),
        ])
    );
}

#[test]
fn test_oversized_event_skipped() {
    let mut dispatcher = all_topics();
    let event = Event::new()
        .with("model", "X")
        .with("id", 1)
        .with("raw", "f".repeat(EVENT_PAYLOAD_LIMIT));

    let topics: Vec<String> = dispatch(&mut dispatcher, &event)
        .into_iter()
        .map(|(topic, _)| topic)
        .collect();
    assert_eq!(topics, vec!["d/X/1/id", "d/X/1/raw"]);
}

#[test]
fn test_oversized_state_skipped() {
    let mut dispatcher = all_topics();
    let event = Event::new().with("frames", "0".repeat(STATE_PAYLOAD_LIMIT));
    assert!(dispatch(&mut dispatcher, &event).is_empty());
}

#[test]
fn test_large_state_fits() {
    let mut dispatcher = all_topics();
    let event = Event::new().with("frames", "0".repeat(EVENT_PAYLOAD_LIMIT * 2));
    assert_eq!(dispatch(&mut dispatcher, &event).len(), 1);
}

#[test]
fn test_overlong_field_skipped() {
    let mut dispatcher = devices_only("d/[model]");
    let event = Event::new()
        .with("model", "X")
        .with("k".repeat(2000), 1)
        .with("ok", 2);

    assert_eq!(
        dispatch(&mut dispatcher, &event),
        pairs(&[("d/X/ok", "2")])
    );
}

#[test]
fn test_wildcard_key_skipped() {
    let mut dispatcher = devices_only("d/[model]");
    let event = Event::new()
        .with("model", "X")
        .with("a+b", 1)
        .with("c", 2);

    assert_eq!(
        dispatch(&mut dispatcher, &event),
        pairs(&[("d/X/c", "2")])
    );
}

#[test]
fn test_hostname_in_topic() {
    let mut dispatcher = Dispatcher::new(None, template("rtl_433/[hostname]/events"), None, "pi");
    let event = Event::new().with("model", "X");

    assert_eq!(
        dispatch(&mut dispatcher, &event),
        pairs(&[("rtl_433/pi/events", r#"{"model":"X"}"#)])
    );
}

#[test]
fn test_dispatcher_is_reusable() {
    let mut dispatcher = all_topics();
    let first = Event::new().with("model", "A").with("id", 1);
    let second = Event::new().with("model", "B").with("id", 2);

    dispatch(&mut dispatcher, &first);
    assert_eq!(
        dispatch(&mut dispatcher, &second),
        pairs(&[
            ("e", r#"{"model":"B","id":2}"#),
            ("d/B/2/id", "2"),
        ])
    );
}

#[test]
fn test_from_config_defaults() {
    let config = OutputConfig::parse("mqtt://broker", "pi").unwrap();
    let mut dispatcher = Dispatcher::from_config(&config);
    let event = Event::new().with("model", "X").with("id", 3);

    assert_eq!(
        dispatch(&mut dispatcher, &event),
        pairs(&[
            ("rtl_433/pi/events", r#"{"model":"X","id":3}"#),
            ("rtl_433/pi/devices/X/3/id", "3"),
        ])
    );
}
