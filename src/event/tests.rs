use pretty_assertions::assert_eq;

use super::*;

fn sample() -> Event {
    Event::new()
        .with("time", "2024-01-01 12:00:00")
        .with("model", "Acurite-Tower")
        .with("id", 1234)
        .with("temperature_C", 21.5)
}

#[test]
fn test_insert_preserves_order_and_replaces() {
    let mut event = sample();
    event.insert("id", 99);

    let keys: Vec<&str> = event.iter().map(|(k, _)| k).collect();
    assert_eq!(keys, vec!["time", "model", "id", "temperature_C"]);
    assert_eq!(event.get("id"), Some(&Value::Int(99)));
    assert_eq!(event.len(), 4);
}

#[test]
fn test_to_json_keeps_field_order() {
    let json = sample().to_json().unwrap();
    assert_eq!(
        json,
        r#"{"time":"2024-01-01 12:00:00","model":"Acurite-Tower","id":1234,"temperature_C":21.5}"#
    );
}

#[test]
fn test_from_json_nested() {
    let event = Event::from_json(
        r#"{"model":"X","codes":[1,2],"radio":{"freq":433.92},"ok":true}"#,
    )
    .unwrap();

    assert_eq!(event.get("model"), Some(&Value::from("X")));
    assert_eq!(event.get("codes"), Some(&Value::from(vec![1, 2])));
    assert_eq!(
        event.get("radio"),
        Some(&Value::Object(Event::new().with("freq", 433.92)))
    );
    assert_eq!(event.get("ok"), Some(&Value::Int(1)));
}

#[test]
fn test_from_json_round_trip_order() {
    let input = r#"{"z":1,"a":"b","m":[{"k":2}]}"#;
    let event = Event::from_json(input).unwrap();
    assert_eq!(event.to_json().unwrap(), input);
}

#[test]
fn test_from_json_rejects_null() {
    let err = Event::from_json(r#"{"model":"X","battery":null}"#).unwrap_err();
    assert!(matches!(
        err,
        EventError::UnsupportedValue { ref key, kind: "null" } if key == "battery"
    ));
}

#[test]
fn test_from_json_rejects_non_object() {
    let err = Event::from_json("[1,2]").unwrap_err();
    assert!(matches!(err, EventError::NotAnObject("array")));
}

#[test]
fn test_from_json_invalid() {
    assert!(matches!(
        Event::from_json("{"),
        Err(EventError::Json(_))
    ));
}

#[test]
fn test_large_unsigned_becomes_double() {
    let event = Event::from_json(r#"{"v":18446744073709551615}"#).unwrap();
    assert!(matches!(event.get("v"), Some(Value::Double(_))));
}

#[test]
fn test_scalar_text() {
    assert_eq!(Value::Int(-3).to_text().as_deref(), Some("-3"));
    assert_eq!(Value::Double(3.0).to_text().as_deref(), Some("3.0"));
    assert_eq!(Value::from("OK").to_text().as_deref(), Some("OK"));
    assert_eq!(Value::from(vec![1]).to_text(), None);
    assert_eq!(Value::Object(Event::new()).to_text(), None);
}
