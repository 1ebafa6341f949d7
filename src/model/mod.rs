//! Domain records for a battle map and its placeables.
//!
//! DESIGN
//! ======
//! Records mirror their tables. Enumerated columns are Rust enums stored as
//! lowercase text; parsing an unknown value is a `ValidationError`, never a
//! silent fallback. `New*` and `*Update` types are built from request
//! payloads and validated before anything reaches the repository.

pub mod fog;
pub mod light;
pub mod map;
pub mod token;

pub use fog::{FogState, NewRevealedArea, RevealShape, RevealedArea};
pub use light::{LightSource, LightSourceView, LightType, LightUpdate, NewLightSource};
pub use map::{AmbientLight, MapRecord, NewMap};
pub use token::{NewToken, Token, TokenSize, TokenSummary, TokenType, TokenUpdate, VisionType};

use uuid::Uuid;

use crate::frame::{Data, ErrorCode};

// =============================================================================
// VALIDATION ERROR
// =============================================================================

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("unknown {field}: {value}")]
    UnknownVariant { field: &'static str, value: String },
    #[error("{field} out of range: {reason}")]
    OutOfRange { field: &'static str, reason: String },
    #[error("{0} required")]
    Missing(&'static str),
    #[error("{field} has the wrong type")]
    WrongType { field: &'static str },
}

impl ErrorCode for ValidationError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::UnknownVariant { .. } => "E_INVALID_VARIANT",
            Self::OutOfRange { .. } => "E_OUT_OF_RANGE",
            Self::Missing(_) => "E_MISSING_FIELD",
            Self::WrongType { .. } => "E_WRONG_TYPE",
        }
    }
}

pub(crate) fn out_of_range(field: &'static str, reason: impl Into<String>) -> ValidationError {
    ValidationError::OutOfRange { field, reason: reason.into() }
}

/// Reject NaN and infinities for a coordinate or measurement.
pub(crate) fn require_finite(field: &'static str, value: f64) -> Result<f64, ValidationError> {
    if value.is_finite() { Ok(value) } else { Err(out_of_range(field, "must be a finite number")) }
}

pub(crate) fn require_non_negative(field: &'static str, value: f64) -> Result<f64, ValidationError> {
    require_finite(field, value)?;
    if value < 0.0 { Err(out_of_range(field, format!("{value} < 0"))) } else { Ok(value) }
}

// =============================================================================
// PAYLOAD READERS
// =============================================================================
//
// Absent keys and explicit `null` are distinguished: `opt_*` treat both as
// "not provided", while `nullable_*` return `Some(None)` for an explicit null
// so updates can clear a column.

pub(crate) fn opt_f64(data: &Data, key: &'static str) -> Result<Option<f64>, ValidationError> {
    match data.get(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(v) => {
            let n = v.as_f64().ok_or(ValidationError::WrongType { field: key })?;
            require_finite(key, n).map(Some)
        }
    }
}

pub(crate) fn req_f64(data: &Data, key: &'static str) -> Result<f64, ValidationError> {
    opt_f64(data, key)?.ok_or(ValidationError::Missing(key))
}

pub(crate) fn opt_bool(data: &Data, key: &'static str) -> Result<Option<bool>, ValidationError> {
    match data.get(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(v) => v.as_bool().map(Some).ok_or(ValidationError::WrongType { field: key }),
    }
}

pub(crate) fn opt_str<'a>(data: &'a Data, key: &'static str) -> Result<Option<&'a str>, ValidationError> {
    match data.get(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(v) => v.as_str().map(Some).ok_or(ValidationError::WrongType { field: key }),
    }
}

pub(crate) fn opt_uuid(data: &Data, key: &'static str) -> Result<Option<Uuid>, ValidationError> {
    opt_str(data, key)?
        .map(|s| s.parse::<Uuid>().map_err(|_| ValidationError::WrongType { field: key }))
        .transpose()
}

pub(crate) fn req_uuid(data: &Data, key: &'static str) -> Result<Uuid, ValidationError> {
    opt_uuid(data, key)?.ok_or(ValidationError::Missing(key))
}

pub(crate) fn nullable_str(data: &Data, key: &'static str) -> Result<Option<Option<String>>, ValidationError> {
    match data.get(key) {
        None => Ok(None),
        Some(serde_json::Value::Null) => Ok(Some(None)),
        Some(v) => v
            .as_str()
            .map(|s| Some(Some(s.to_string())))
            .ok_or(ValidationError::WrongType { field: key }),
    }
}

pub(crate) fn nullable_f64(data: &Data, key: &'static str) -> Result<Option<Option<f64>>, ValidationError> {
    match data.get(key) {
        None => Ok(None),
        Some(serde_json::Value::Null) => Ok(Some(None)),
        Some(_) => Ok(Some(opt_f64(data, key)?)),
    }
}

pub(crate) fn nullable_uuid(data: &Data, key: &'static str) -> Result<Option<Option<Uuid>>, ValidationError> {
    match data.get(key) {
        None => Ok(None),
        Some(serde_json::Value::Null) => Ok(Some(None)),
        Some(_) => Ok(Some(opt_uuid(data, key)?)),
    }
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;
