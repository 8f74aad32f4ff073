//! Tests for the strava-relay-core library module.

use super::*;
use crate::webhook::ObjectType;

#[test]
fn test_event_id_generation() {
    let id1 = EventId::new();
    let id2 = EventId::new();

    assert_ne!(id1, id2);
    assert!(!id1.as_str().is_empty());
}

#[test]
fn test_event_id_parse_round_trip() {
    let id = EventId::new();
    let parsed: EventId = id.to_string().parse().unwrap();
    assert_eq!(parsed, id);

    assert!("not-a-ulid".parse::<EventId>().is_err());
}

#[test]
fn test_session_id_validation() {
    assert!(SessionId::new("activity/1360128428".to_string()).is_ok());

    let too_long = "a".repeat(129);
    assert!(matches!(
        SessionId::new(too_long),
        Err(ValidationError::TooLong { .. })
    ));

    assert!(matches!(
        SessionId::new("activity/with space".to_string()),
        Err(ValidationError::InvalidCharacters { .. })
    ));

    assert!(matches!(
        SessionId::new("activity//1".to_string()),
        Err(ValidationError::InvalidFormat { .. })
    ));
}

#[test]
fn test_session_id_for_entity() {
    let activity = SessionId::for_entity(ObjectType::Activity, "42");
    let athlete = SessionId::for_entity(ObjectType::Athlete, "42");

    assert_eq!(activity.as_str(), "activity/42");
    assert_eq!(athlete.as_str(), "athlete/42");
    assert_ne!(activity, athlete);
}

#[test]
fn test_user_id_requires_value() {
    assert!(UserId::new("user-1").is_ok());
    assert!(matches!(
        UserId::new("   "),
        Err(ValidationError::Required { .. })
    ));
}

#[test]
fn test_external_ids() {
    let owner = ExternalOwnerId::from(134815_u64);
    assert_eq!(owner.as_str(), "134815");
    assert_eq!(owner.as_u64(), Some(134815));

    let object = ExternalObjectId::new("abc").unwrap();
    assert_eq!(object.as_u64(), None);

    assert!(matches!(
        ExternalObjectId::new(""),
        Err(ValidationError::Required { .. })
    ));
    assert!(matches!(
        ExternalOwnerId::new("1 2"),
        Err(ValidationError::InvalidCharacters { .. })
    ));
    assert!(matches!(
        ExternalOwnerId::new("9".repeat(65)),
        Err(ValidationError::TooLong { .. })
    ));
}

#[test]
fn test_timestamp_from_unix_seconds() {
    let ts = Timestamp::from_unix_seconds(1_516_126_040).unwrap();
    assert_eq!(ts.unix_seconds(), 1_516_126_040);
    assert_eq!(ts.to_rfc3339(), "2018-01-16T18:07:20+00:00");

    assert!(Timestamp::from_unix_seconds(i64::MAX).is_none());
}

#[test]
fn test_timestamp_ordering_and_elapsed() {
    let earlier = Timestamp::from_unix_seconds(100).unwrap();
    let later = Timestamp::from_unix_seconds(200).unwrap();

    assert!(earlier < later);
    assert!(earlier.elapsed() > Duration::ZERO);
}
