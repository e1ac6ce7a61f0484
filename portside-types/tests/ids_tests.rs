use portside_types::InstanceId;
use std::str::FromStr;
use uuid::Uuid;

#[test]
fn instance_ids_are_unique() {
    let a = InstanceId::new();
    let b = InstanceId::new();
    assert_ne!(a, b);
}

#[test]
fn instance_ids_are_time_ordered() {
    // UUID v7 embeds a timestamp, so ids created in sequence sort.
    let a = InstanceId::new();
    std::thread::sleep(std::time::Duration::from_millis(2));
    let b = InstanceId::new();
    assert!(a < b);
}

#[test]
fn from_uuid_round_trip() {
    let uuid = Uuid::now_v7();
    let id = InstanceId::from_uuid(uuid);
    assert_eq!(id.as_uuid(), uuid);
}

#[test]
fn parse_and_display_round_trip() {
    let id = InstanceId::new();
    let s = id.to_string();
    assert_eq!(InstanceId::parse(&s).unwrap(), id);
    assert_eq!(InstanceId::from_str(&s).unwrap(), id);
}

#[test]
fn parse_rejects_garbage() {
    assert!(InstanceId::parse("not-a-uuid").is_err());
}

#[test]
fn serde_is_transparent() {
    let id = InstanceId::new();
    let json = serde_json::to_string(&id).unwrap();
    assert_eq!(json, format!("\"{id}\""));

    let back: InstanceId = serde_json::from_str(&json).unwrap();
    assert_eq!(back, id);
}
