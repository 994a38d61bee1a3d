//! Traversal cursor
//!
//! The only traversal state that outlives a process: which stage a
//! conversation is in and which batch of that stage was presented last.
//! Storage keeps it as two integers with `-1` meaning "not started".

use crate::error::{QuestionnaireError, Result};

const NOT_STARTED: i64 = -1;

/// Persisted position of a conversation in the questionnaire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Cursor {
    pub stage_index: usize,
    /// `None` until the first batch of the stage has been presented
    pub batch_index: Option<usize>,
}

impl Cursor {
    /// A cursor at the beginning of a stage
    pub fn start(stage_index: usize) -> Self {
        Self {
            stage_index,
            batch_index: None,
        }
    }

    /// Storage representation `(stage_id, batch_id)`
    pub fn to_row(self) -> (i64, i64) {
        let batch = self
            .batch_index
            .and_then(|index| i64::try_from(index).ok())
            .unwrap_or(NOT_STARTED);
        (self.stage_index as i64, batch)
    }

    /// Rebuild a cursor from its storage representation
    ///
    /// Any negative batch id reads as "not started".
    pub fn from_row(stage_id: i64, batch_id: i64) -> Result<Self> {
        let stage_index =
            usize::try_from(stage_id).map_err(|_| QuestionnaireError::InvalidCursor(stage_id))?;
        Ok(Self {
            stage_index,
            batch_index: usize::try_from(batch_id).ok(),
        })
    }
}
