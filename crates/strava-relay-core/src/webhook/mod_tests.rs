//! Tests for the webhook event model.

use super::*;

fn owner(id: u64) -> ExternalOwnerId {
    ExternalOwnerId::from(id)
}

fn object(id: u64) -> ExternalObjectId {
    ExternalObjectId::from(id)
}

#[test]
fn test_activity_constructor_selects_kind() {
    assert_eq!(
        WebhookEvent::activity(AspectType::Create, owner(1), object(2)).kind,
        EventKind::ActivityUpsert
    );
    assert_eq!(
        WebhookEvent::activity(AspectType::Update, owner(1), object(2)).kind,
        EventKind::ActivityUpsert
    );
    assert_eq!(
        WebhookEvent::activity(AspectType::Delete, owner(1), object(2)).kind,
        EventKind::ActivityDelete
    );
}

#[test]
fn test_session_id_groups_by_entity() {
    let create = WebhookEvent::activity(AspectType::Create, owner(7), object(99));
    let delete = WebhookEvent::activity(AspectType::Delete, owner(7), object(99));
    let other = WebhookEvent::activity(AspectType::Create, owner(7), object(100));
    let deauth = WebhookEvent::deauthorization(owner(7));

    assert_eq!(create.session_id(), delete.session_id());
    assert_ne!(create.session_id(), other.session_id());
    assert_eq!(create.session_id().as_str(), "activity/99");
    assert_eq!(deauth.session_id().as_str(), "athlete/7");
}

#[test]
fn test_idempotency_key_requires_event_time() {
    let event = WebhookEvent::activity(AspectType::Update, owner(1), object(2));
    assert!(event.idempotency_key().is_none());

    let timed = event.with_event_time(Timestamp::from_unix_seconds(1516126040).unwrap());
    assert_eq!(
        timed.idempotency_key().as_deref(),
        Some("activity:2:update:1516126040:{}")
    );
}

#[test]
fn test_idempotency_key_distinguishes_updates_in_same_second() {
    let at = Timestamp::from_unix_seconds(1516126040).unwrap();

    let mut title = WebhookEvent::activity(AspectType::Update, owner(1), object(2))
        .with_event_time(at);
    title.updates.insert("title".to_string(), "Evening Ride".to_string());

    let mut sport = WebhookEvent::activity(AspectType::Update, owner(1), object(2))
        .with_event_time(at);
    sport.updates.insert("type".to_string(), "Run".to_string());

    assert_ne!(title.idempotency_key(), sport.idempotency_key());
    assert_eq!(
        title.idempotency_key().as_deref(),
        Some(r#"activity:2:update:1516126040:{"title":"Evening Ride"}"#)
    );
}

#[test]
fn test_idempotency_key_ignores_update_insertion_order() {
    let at = Timestamp::from_unix_seconds(1516126040).unwrap();

    let mut first = WebhookEvent::activity(AspectType::Update, owner(1), object(2))
        .with_event_time(at);
    first.updates.insert("title".to_string(), "Ride".to_string());
    first.updates.insert("private".to_string(), "true".to_string());

    let mut second = WebhookEvent::activity(AspectType::Update, owner(1), object(2))
        .with_event_time(at);
    second.updates.insert("private".to_string(), "true".to_string());
    second.updates.insert("title".to_string(), "Ride".to_string());

    assert_eq!(first.idempotency_key(), second.idempotency_key());
}

#[test]
fn test_deauthorization_event_shape() {
    let event = WebhookEvent::deauthorization(owner(134815));

    assert_eq!(event.object_type, ObjectType::Athlete);
    assert_eq!(event.aspect_type, AspectType::Update);
    assert_eq!(event.object_id.as_str(), "134815");
    assert_eq!(event.updates.get("authorized").unwrap(), "false");
}

#[test]
fn test_enum_string_forms() {
    assert_eq!(ObjectType::parse("activity"), Some(ObjectType::Activity));
    assert_eq!(ObjectType::parse("Activity"), None);
    assert_eq!(AspectType::parse("delete"), Some(AspectType::Delete));
    assert_eq!(AspectType::parse("archive"), None);
    assert_eq!(EventKind::Deauthorization.to_string(), "deauthorization");
}
