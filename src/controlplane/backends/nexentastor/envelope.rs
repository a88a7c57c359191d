//! Appliance response envelopes
//!
//! Discriminated decoding of the appliance's JSON bodies: error envelopes are
//! classified into [`NefError`], success bodies are validated against a
//! per-response [`ResponseSchema`] before being deserialized.

use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

// =============================================================================
// Error Envelope
// =============================================================================

/// Error reported by the appliance in its JSON error envelope
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} ({code})")]
pub struct NefError {
    /// Appliance error code, e.g. `ENOENT`
    pub code: String,
    pub message: String,
    /// HTTP status the envelope arrived with
    pub status: u16,
}

/// Error kinds the provider distinguishes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NefErrorKind {
    Auth,
    NotFound,
    AlreadyExists,
    InvalidArgument,
    Busy,
    Other(String),
}

impl NefErrorKind {
    pub fn from_code(code: &str) -> Self {
        match code {
            "EAUTH" => NefErrorKind::Auth,
            "ENOENT" => NefErrorKind::NotFound,
            "EEXIST" => NefErrorKind::AlreadyExists,
            "EINVAL" | "EBADARG" => NefErrorKind::InvalidArgument,
            "EBUSY" => NefErrorKind::Busy,
            other => NefErrorKind::Other(other.to_string()),
        }
    }
}

impl NefError {
    pub fn kind(&self) -> NefErrorKind {
        NefErrorKind::from_code(&self.code)
    }
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    code: String,
    #[serde(default)]
    message: Option<String>,
}

/// Classify a response body as an appliance error.
///
/// Returns `None` when the body does not have the envelope shape; callers
/// fall back to a protocol error carrying the raw body.
pub fn classify(status: StatusCode, body: &Value) -> Option<NefError> {
    let envelope = ErrorEnvelope::deserialize(body).ok()?;
    Some(NefError {
        code: envelope.code,
        message: envelope
            .message
            .unwrap_or_else(|| "Unknown REST error".to_string()),
        status: status.as_u16(),
    })
}

// =============================================================================
// Response Schemas
// =============================================================================

/// A response entry with fields that must be present before decoding
pub trait ResponseSchema: DeserializeOwned {
    const REQUIRED_FIELDS: &'static [&'static str];
}

/// Required fields absent from `value`
pub fn missing_fields(value: &Value, fields: &[&'static str]) -> Vec<&'static str> {
    fields
        .iter()
        .copied()
        .filter(|f| value.get(*f).is_none())
        .collect()
}

/// Validate and decode one entry; the error string names what was wrong
pub fn decode_entry<T: ResponseSchema>(value: &Value) -> std::result::Result<T, String> {
    if !value.is_object() {
        return Err(format!("entry is not an object: {}", value));
    }
    let missing = missing_fields(value, T::REQUIRED_FIELDS);
    if !missing.is_empty() {
        return Err(format!("Properties missed: {:?}", missing));
    }
    T::deserialize(value).map_err(|e| e.to_string())
}

/// The `data` list of a collection response
pub fn data_list(body: &Value) -> std::result::Result<&[Value], String> {
    body.get("data")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .ok_or_else(|| format!("response doesn't contain 'data' property: {}", body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct Entry {
        pool_name: String,
        #[allow(dead_code)]
        health: String,
    }

    impl ResponseSchema for Entry {
        const REQUIRED_FIELDS: &'static [&'static str] = &["poolName", "health"];
    }

    #[test]
    fn test_classify_envelope() {
        let body = json!({
            "name": "NefError",
            "code": "ENOENT",
            "message": "Filesystem pool1/missing does not exist",
        });
        let err = classify(StatusCode::NOT_FOUND, &body).unwrap();
        assert_eq!(err.code, "ENOENT");
        assert_eq!(err.status, 404);
        assert_eq!(err.kind(), NefErrorKind::NotFound);
        assert!(err.to_string().contains("does not exist"));
    }

    #[test]
    fn test_classify_without_message() {
        let err = classify(StatusCode::UNAUTHORIZED, &json!({ "code": "EAUTH" })).unwrap();
        assert_eq!(err.kind(), NefErrorKind::Auth);
        assert_eq!(err.message, "Unknown REST error");
    }

    #[test]
    fn test_classify_rejects_other_shapes() {
        assert!(classify(StatusCode::INTERNAL_SERVER_ERROR, &Value::Null).is_none());
        assert!(classify(StatusCode::BAD_REQUEST, &json!({ "message": "no code" })).is_none());
        assert!(classify(StatusCode::BAD_REQUEST, &json!([1, 2, 3])).is_none());
        assert!(classify(StatusCode::BAD_REQUEST, &json!({ "code": 17 })).is_none());
    }

    #[test]
    fn test_error_kind_codes() {
        assert_eq!(NefErrorKind::from_code("EEXIST"), NefErrorKind::AlreadyExists);
        assert_eq!(NefErrorKind::from_code("EBADARG"), NefErrorKind::InvalidArgument);
        assert_eq!(NefErrorKind::from_code("EBUSY"), NefErrorKind::Busy);
        assert_eq!(
            NefErrorKind::from_code("EFAILED"),
            NefErrorKind::Other("EFAILED".into())
        );
    }

    #[test]
    fn test_decode_entry_names_missing_fields() {
        let err = decode_entry::<Entry>(&json!({ "other": 1 })).unwrap_err();
        assert!(err.contains("poolName"));
        assert!(err.contains("health"));

        let entry = decode_entry::<Entry>(&json!({ "poolName": "pool1", "health": "ONLINE" }))
            .unwrap();
        assert_eq!(entry.pool_name, "pool1");
    }

    #[test]
    fn test_data_list() {
        assert_eq!(data_list(&json!({ "data": [1, 2] })).unwrap().len(), 2);
        assert!(data_list(&json!({ "items": [] })).is_err());
        assert!(data_list(&json!({ "data": "x" })).is_err());
    }
}
