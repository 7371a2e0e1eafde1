//! Argument guards
//!
//! Small precondition helpers used at construction and registration
//! boundaries. Each returns `AuditError::InvalidArgument` naming the
//! offending argument.

use crate::error::{AuditError, Result};

/// Reject an empty (or whitespace-only) string argument
pub fn against_empty<'a>(value: &'a str, argument_name: &str) -> Result<&'a str> {
    if value.trim().is_empty() {
        return Err(AuditError::InvalidArgument {
            name: argument_name.to_string(),
        });
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_against_empty_accepts_value() {
        assert_eq!(against_empty("InvokeSaga", "step_id").unwrap(), "InvokeSaga");
    }

    #[test]
    fn test_against_empty_rejects_blank() {
        for blank in ["", "   ", "\t"] {
            let err = against_empty(blank, "logger_name").unwrap_err();
            match err {
                AuditError::InvalidArgument { name } => assert_eq!(name, "logger_name"),
                other => panic!("unexpected error: {other}"),
            }
        }
    }
}
