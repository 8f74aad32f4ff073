// Event normalization from raw delivery bodies
//
// Field rules:
//   object_type / aspect_type  required strings
//   owner_id / object_id       required, JSON number or string
//   updates                    optional object, values stringified
//   event_time                 optional Unix seconds
//   subscription_id            optional non-negative integer

use super::{AspectType, EventKind, NormalizationError, ObjectType, WebhookEvent};
use crate::{EventId, ExternalObjectId, ExternalOwnerId, Timestamp};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::debug;

/// Converts raw webhook bodies into [`WebhookEvent`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct EventNormalizer;

impl EventNormalizer {
    pub fn new() -> Self {
        Self
    }

    /// Normalize one delivery body.
    ///
    /// # Errors
    ///
    /// - [`NormalizationError::JsonParsing`] / [`NormalizationError::NotAnObject`]
    ///   for bodies that are not a JSON object
    /// - [`NormalizationError::MissingRequiredField`] /
    ///   [`NormalizationError::InvalidFieldFormat`] for bad fields
    /// - [`NormalizationError::Unsupported`] for well-formed events that map
    ///   to no handler (including athlete updates that keep authorization)
    pub fn normalize(
        &self,
        event_id: EventId,
        payload: &[u8],
        received_at: Timestamp,
    ) -> Result<WebhookEvent, NormalizationError> {
        let value: Value = serde_json::from_slice(payload)?;
        let object = value.as_object().ok_or(NormalizationError::NotAnObject)?;

        let object_type_raw = required_str(object, "object_type")?;
        let aspect_type_raw = required_str(object, "aspect_type")?;

        let owner_id = ExternalOwnerId::new(required_id(object, "owner_id")?).map_err(|e| {
            NormalizationError::InvalidFieldFormat {
                field: "owner_id".to_string(),
                message: e.to_string(),
            }
        })?;
        let object_id = ExternalObjectId::new(required_id(object, "object_id")?).map_err(|e| {
            NormalizationError::InvalidFieldFormat {
                field: "object_id".to_string(),
                message: e.to_string(),
            }
        })?;

        let updates = extract_updates(object)?;
        let event_time = extract_event_time(object)?;
        let subscription_id = extract_subscription_id(object)?;

        let unsupported = || NormalizationError::Unsupported {
            object_type: object_type_raw.to_string(),
            aspect_type: aspect_type_raw.to_string(),
        };

        let object_type = ObjectType::parse(object_type_raw).ok_or_else(unsupported)?;
        let aspect_type = AspectType::parse(aspect_type_raw).ok_or_else(unsupported)?;

        let kind = match (object_type, aspect_type) {
            (ObjectType::Activity, AspectType::Create | AspectType::Update) => {
                EventKind::ActivityUpsert
            }
            (ObjectType::Activity, AspectType::Delete) => EventKind::ActivityDelete,
            (ObjectType::Athlete, AspectType::Update)
                if updates.get("authorized").map(String::as_str) == Some("false") =>
            {
                EventKind::Deauthorization
            }
            _ => return Err(unsupported()),
        };

        debug!(
            event_id = %event_id,
            kind = %kind,
            owner_id = %owner_id,
            object_id = %object_id,
            "Normalized webhook event"
        );

        Ok(WebhookEvent {
            event_id,
            kind,
            object_type,
            aspect_type,
            owner_id,
            object_id,
            updates,
            event_time,
            subscription_id,
            received_at,
        })
    }
}

fn required_str<'a>(
    object: &'a Map<String, Value>,
    field: &str,
) -> Result<&'a str, NormalizationError> {
    match object.get(field) {
        None | Some(Value::Null) => Err(NormalizationError::MissingRequiredField {
            field: field.to_string(),
        }),
        Some(Value::String(s)) => Ok(s.as_str()),
        Some(other) => Err(NormalizationError::InvalidFieldFormat {
            field: field.to_string(),
            message: format!("expected string, got {}", other),
        }),
    }
}

/// Ids arrive as numbers from Strava but some relays forward them as strings.
fn required_id(object: &Map<String, Value>, field: &str) -> Result<String, NormalizationError> {
    match object.get(field) {
        None | Some(Value::Null) => Err(NormalizationError::MissingRequiredField {
            field: field.to_string(),
        }),
        Some(Value::Number(n)) if n.is_u64() || n.is_i64() => Ok(n.to_string()),
        Some(Value::String(s)) => Ok(s.clone()),
        Some(other) => Err(NormalizationError::InvalidFieldFormat {
            field: field.to_string(),
            message: format!("expected integer or string, got {}", other),
        }),
    }
}

fn extract_updates(
    object: &Map<String, Value>,
) -> Result<BTreeMap<String, String>, NormalizationError> {
    match object.get("updates") {
        None | Some(Value::Null) => Ok(BTreeMap::new()),
        Some(Value::Object(map)) => Ok(map
            .iter()
            .map(|(key, value)| {
                let value = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (key.clone(), value)
            })
            .collect()),
        Some(other) => Err(NormalizationError::InvalidFieldFormat {
            field: "updates".to_string(),
            message: format!("expected object, got {}", other),
        }),
    }
}

fn extract_event_time(
    object: &Map<String, Value>,
) -> Result<Option<Timestamp>, NormalizationError> {
    let invalid = |message: String| NormalizationError::InvalidFieldFormat {
        field: "event_time".to_string(),
        message,
    };

    match object.get("event_time") {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => {
            let seconds = n
                .as_i64()
                .ok_or_else(|| invalid(format!("expected integer seconds, got {}", n)))?;
            Timestamp::from_unix_seconds(seconds)
                .map(Some)
                .ok_or_else(|| invalid(format!("out of range: {}", seconds)))
        }
        Some(other) => Err(invalid(format!("expected integer seconds, got {}", other))),
    }
}

fn extract_subscription_id(object: &Map<String, Value>) -> Result<Option<u64>, NormalizationError> {
    match object.get("subscription_id") {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value.as_u64().map(Some).ok_or_else(|| {
            NormalizationError::InvalidFieldFormat {
                field: "subscription_id".to_string(),
                message: format!("expected non-negative integer, got {}", value),
            }
        }),
    }
}

#[cfg(test)]
#[path = "normalizer_tests.rs"]
mod tests;
