//! Integration tests for the payload codec.
//!
//! Decodes realistic API records, edits them through a tracked object and
//! checks that timestamps keep their original shape through the patch that
//! goes back to the server.

use chrono::{NaiveDate, TimeDelta};

use tass_core::json::{decode_with_datetimes, Map, Value};
use tass_core::patch::{apply_patch, OpKind, TrackedDict};

const STUDENT: &[u8] = br#"{
    "stud_code": 1042,
    "surname": "Okafor",
    "dob": "2011-06-30",
    "doe": "2023-01-30T08:00:00.000",
    "updated_on": "2024-02-01 13:45:10.250000Z",
    "contacts": [{"name": "Ada", "start_date": "2020-01-01T00:00:00"}],
    "year_grp": 8
}"#;

fn decode_student() -> Map {
    match decode_with_datetimes(STUDENT).unwrap() {
        Value::Object(map) => map,
        other => panic!("expected an object, got {}", other.kind()),
    }
}

// ---- Decoding ----

#[test]
fn decoded_timestamps_reserialize_unchanged() {
    let student = decode_student();

    for (key, expected) in [
        ("dob", "2011-06-30"),
        ("doe", "2023-01-30T08:00:00.000"),
        ("updated_on", "2024-02-01 13:45:10.250000Z"),
    ] {
        let value = student[key].as_datetime().unwrap_or_else(|| panic!("{key} was not decoded"));
        assert_eq!(value.to_string(), expected);
    }

    let contact = student["contacts"].as_array().unwrap()[0].as_object().unwrap();
    assert!(contact["start_date"].as_datetime().is_some());
    assert_eq!(student["surname"].as_str(), Some("Okafor"));

    let json = serde_json::to_value(Value::Object(student)).unwrap();
    assert_eq!(json["updated_on"], "2024-02-01 13:45:10.250000Z");
    assert_eq!(json["dob"], "2011-06-30");
}

#[test]
fn arithmetic_keeps_format() {
    let student = decode_student();
    let doe = student["doe"].as_datetime().unwrap();

    let next_term = doe.checked_add(TimeDelta::days(70)).unwrap();
    assert_eq!(next_term.to_string(), "2023-04-10T08:00:00.000");

    let moved = doe.with_date(NaiveDate::from_ymd_opt(2023, 7, 17).unwrap());
    assert_eq!(moved.to_string(), "2023-07-17T08:00:00.000");
    assert!(moved > *doe);
}

// ---- Patching ----

#[test]
fn tracked_edits_patch_back_to_the_same_record() {
    let mut tracked = TrackedDict::new(decode_student());
    let doe = tracked["doe"].as_datetime().unwrap().clone();

    tracked.insert("surname".into(), Value::from("Okafor-Bell"));
    tracked.insert(
        "doe".into(),
        Value::Datetime(doe.checked_add(TimeDelta::days(1)).unwrap()),
    );
    tracked.remove("year_grp");
    tracked.insert("house".into(), Value::from("Banksia"));
    assert!(tracked.has_changes());

    let ops = tracked.as_patch();
    assert_eq!(
        ops.iter().map(|op| op.op).collect::<Vec<_>>(),
        vec![
            OpKind::Test,
            OpKind::Remove,
            OpKind::Add,
            OpKind::Test,
            OpKind::Replace,
            OpKind::Test,
            OpKind::Replace,
        ]
    );

    let patch: serde_json::Value = serde_json::from_str(&tracked.as_patch_str().unwrap()).unwrap();
    assert_eq!(patch[4]["path"], "/doe");
    assert_eq!(patch[4]["value"], "2023-01-31T08:00:00.000");

    let mut server_copy = Value::Object(tracked.snapshot().clone());
    apply_patch(&mut server_copy, &ops).unwrap();
    assert_eq!(server_copy, Value::Object((*tracked).clone()));

    tracked.update_snapshot();
    assert!(tracked.as_patch().is_empty());
}

#[test]
fn stale_patch_fails_its_test_step() {
    let mut tracked = TrackedDict::new(decode_student());
    tracked.insert("surname".into(), Value::from("Okafor-Bell"));
    let ops = tracked.as_patch();

    let mut changed_elsewhere = Value::Object(tracked.snapshot().clone());
    if let Some(map) = changed_elsewhere.as_object_mut() {
        map.insert("surname".into(), Value::from("Bell"));
    }
    assert!(apply_patch(&mut changed_elsewhere, &ops).is_err());
}
