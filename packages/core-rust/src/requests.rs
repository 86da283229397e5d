//! Request bodies and the request decoder.
//!
//! Bodies are JSON objects. Absent fields fall back to their zero value and
//! unknown fields are ignored, so validation cannot tell an omitted field from
//! an explicit `0` or `""`. Neither is a valid domain value: ids start at 1 and
//! names are non-empty.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Rejection of a request body. Always reported to callers as `wrong input`.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("wrong input")]
    Malformed(#[source] serde_json::Error),
    #[error("wrong input")]
    NotAnObject,
    #[error("wrong input")]
    MissingField(&'static str),
}

impl DecodeError {
    /// Name of the missing field, if that was the cause.
    #[must_use]
    pub fn missing_field(&self) -> Option<&'static str> {
        match self {
            Self::MissingField(field) => Some(field),
            Self::Malformed(_) | Self::NotAnObject => None,
        }
    }
}

/// Required-field check run after deserialization.
pub trait Validate {
    /// # Errors
    ///
    /// Returns [`DecodeError::MissingField`] for the first required field
    /// holding its zero value.
    fn validate(&self) -> Result<(), DecodeError>;
}

/// Parses and validates a request body.
///
/// # Errors
///
/// Returns [`DecodeError`] when the body is not a JSON object of the expected
/// shape or a required field is zero/empty.
pub fn decode<T>(body: &[u8]) -> Result<T, DecodeError>
where
    T: DeserializeOwned + Validate,
{
    let value: serde_json::Value = serde_json::from_slice(body).map_err(DecodeError::Malformed)?;
    if !value.is_object() {
        return Err(DecodeError::NotAnObject);
    }
    let request: T = serde_json::from_value(value).map_err(DecodeError::Malformed)?;
    request.validate()?;
    Ok(request)
}

fn require_id(value: i64, field: &'static str) -> Result<(), DecodeError> {
    if value == 0 {
        Err(DecodeError::MissingField(field))
    } else {
        Ok(())
    }
}

fn require_text(value: &str, field: &'static str) -> Result<(), DecodeError> {
    if value.is_empty() {
        Err(DecodeError::MissingField(field))
    } else {
        Ok(())
    }
}

/// Body of `exgroup.create`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CreateExerciseGroup {
    pub user_id: i64,
    pub name: String,
}

impl Validate for CreateExerciseGroup {
    fn validate(&self) -> Result<(), DecodeError> {
        require_id(self.user_id, "user_id")?;
        require_text(&self.name, "name")
    }
}

/// Body of `exgroup.delete` and `exgroup.find`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExerciseGroupKey {
    pub user_id: i64,
    pub name: String,
}

impl Validate for ExerciseGroupKey {
    fn validate(&self) -> Result<(), DecodeError> {
        require_id(self.user_id, "user_id")?;
        require_text(&self.name, "name")
    }
}

/// Body of `exgroup.update`: renames `name` to `newname`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenameExerciseGroup {
    pub user_id: i64,
    pub name: String,
    pub newname: String,
}

impl Validate for RenameExerciseGroup {
    fn validate(&self) -> Result<(), DecodeError> {
        require_id(self.user_id, "user_id")?;
        require_text(&self.name, "name")?;
        require_text(&self.newname, "newname")
    }
}

/// Body of requests scoped to a user only: `exgroup.findByUser` and every
/// `training.*` operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserRequest {
    pub user_id: i64,
}

impl Validate for UserRequest {
    fn validate(&self) -> Result<(), DecodeError> {
        require_id(self.user_id, "user_id")
    }
}
