use thiserror::Error;

/// JMAP servers commonly advertise 256 as the default `maxChanges`.
pub const DEFAULT_CHANGE_LIMIT: usize = 256;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{0} must not be empty")]
    Empty(&'static str),
    #[error("{0} must not contain control characters")]
    ControlCharacter(&'static str),
    #[error("limit must be a positive integer")]
    NonPositiveLimit,
    #[error("the initial state cannot be assigned to a change")]
    InitialState,
    #[error("UID validity must be a positive 32-bit value")]
    InvalidUidValidity,
}

/// Rejects empty values and values carrying control characters. `field` names
/// the offending input in the error message.
pub fn validate_name(field: &'static str, value: &str) -> Result<(), ValidationError> {
    if value.is_empty() {
        return Err(ValidationError::Empty(field));
    }
    if value.chars().any(char::is_control) {
        return Err(ValidationError::ControlCharacter(field));
    }
    Ok(())
}
