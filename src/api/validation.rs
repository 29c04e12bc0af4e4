use crate::api::errors::ApiError;

pub(crate) const MAX_IDENTIFIER_LEN: usize = 128;

/// Test and question ids are interpolated into remote URLs, so keep them path-safe.
pub(crate) fn validate_identifier(value: &str, label: &str) -> Result<(), ApiError> {
    let valid = !value.is_empty()
        && value.len() <= MAX_IDENTIFIER_LEN
        && value.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        && value != "."
        && value != "..";
    if valid {
        Ok(())
    } else {
        Err(ApiError::BadRequest(format!("Invalid {label} format")))
    }
}
