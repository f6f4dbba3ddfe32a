use validator::{Validate, ValidationErrors};

use crate::error::{ApiError, FieldError};

/// Run a request DTO through its declarative schema and surface field-level
/// failures in the 400 envelope.
pub fn validate_payload<T: Validate>(payload: &T) -> Result<(), ApiError> {
    payload
        .validate()
        .map_err(|errs| ApiError::validation_error("Invalid input data", collect(&errs)))
}

fn collect(errs: &ValidationErrors) -> Vec<FieldError> {
    let mut out = Vec::new();
    for (field, failures) in errs.field_errors() {
        for failure in failures {
            let message = failure
                .message
                .as_ref()
                .map(|m| m.to_string())
                .unwrap_or_else(|| format!("invalid value ({})", failure.code));
            out.push(FieldError {
                field: field.to_string(),
                message,
            });
        }
    }
    out.sort_by(|a, b| a.field.cmp(&b.field));
    out
}
