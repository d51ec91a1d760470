use thiserror::Error;

/// Per-record failure raised while validating or resolving a single source
/// document. These never abort a migrator step; the record is skipped (or the
/// offending optional field nulled), counted, and logged. Anything else that
/// escapes a migrator is a step failure handled by the orchestrator.
#[derive(Debug, Error)]
pub enum RecordError {
    #[error("{path}: missing required field `{field}`")]
    MissingField { path: String, field: &'static str },

    #[error("{path}: field `{field}` has invalid value {value:?}")]
    InvalidField {
        path: String,
        field: &'static str,
        value: String,
    },

    #[error("{path}: unresolved {entity} reference {key:?}")]
    UnresolvedReference {
        path: String,
        entity: &'static str,
        key: String,
    },
}

impl RecordError {
    pub fn missing(path: &str, field: &'static str) -> Self {
        Self::MissingField {
            path: path.to_string(),
            field,
        }
    }

    pub fn invalid(path: &str, field: &'static str, value: &str) -> Self {
        Self::InvalidField {
            path: path.to_string(),
            field,
            value: value.to_string(),
        }
    }

    pub fn unresolved(path: &str, entity: &'static str, key: impl ToString) -> Self {
        Self::UnresolvedReference {
            path: path.to_string(),
            entity,
            key: key.to_string(),
        }
    }
}
