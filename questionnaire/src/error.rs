//! Error types for the questionnaire core
//!
//! Every error here is a data-consistency problem between a question source
//! and the state that was derived from it. None of them are retried inside this
//! crate; they are reported to the caller as-is.

use thiserror::Error;

/// Result type for questionnaire operations
pub type Result<T> = std::result::Result<T, QuestionnaireError>;

/// Errors raised while building, compiling or resuming a stage
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QuestionnaireError {
    /// A question record could not be parsed
    #[error("Malformed question source at {path}: {reason}")]
    MalformedQuestionSource { path: String, reason: String },

    /// A saved batch index does not exist in the freshly compiled graph
    #[error("Batch index {index} is out of range for a stage with {len} batches")]
    IndexOutOfRange { index: usize, len: usize },

    /// A persisted cursor row carries an impossible stage id
    #[error("Invalid cursor: stage id {0}")]
    InvalidCursor(i64),
}

impl QuestionnaireError {
    pub(crate) fn malformed(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedQuestionSource {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = QuestionnaireError::malformed("questions[1]", "missing `text`");
        assert_eq!(
            err.to_string(),
            "Malformed question source at questions[1]: missing `text`"
        );

        let err = QuestionnaireError::IndexOutOfRange { index: 99, len: 2 };
        assert!(err.to_string().contains("99"));
        assert!(err.to_string().contains("2 batches"));
    }
}
