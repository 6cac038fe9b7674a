use serde_json::Value;

use crate::error::DecodeError;
use crate::types::{ActivityEvent, EventKind};

/// Decode one raw text frame from the push feed.
///
/// Only the discriminant is inspected. Anything that is not a JSON object
/// with a string `type` is rejected; unknown `type` values are accepted as
/// [`EventKind::Unknown`] with the payload passed through untouched.
pub fn classify(raw: &str) -> Result<ActivityEvent, DecodeError> {
    let value: Value = serde_json::from_str(raw)?;
    classify_value(value)
}

pub fn classify_value(value: Value) -> Result<ActivityEvent, DecodeError> {
    let Value::Object(payload) = value else {
        return Err(DecodeError::NotAnObject);
    };
    let kind = match payload.get("type") {
        Some(Value::String(discriminant)) => EventKind::from_discriminant(discriminant),
        _ => return Err(DecodeError::MissingType),
    };
    Ok(ActivityEvent::new(kind, payload))
}
