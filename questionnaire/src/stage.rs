//! Stage Traversal Engine
//!
//! Walks the batch graph of one stage, one batch per call to
//! [`StageTraversal::advance`]. The position is an index into the compiled
//! graph, so it can be persisted as an integer and restored by compiling the
//! same source again.
//!
//! # States
//!
//! - `Uninitialized`: no stage loaded yet
//! - `Root`: stage loaded, nothing presented; the next advance lands on batch 0
//! - `At(id)`: batch `id` was presented last
//! - `Exhausted`: the stage has no more batches (terminal)
//!
//! The engine is not synchronized. A conversation owns its traversal and must
//! not advance it from two places at once.

use serde_json::Value;

use crate::batch::{BatchGraph, BatchId};
use crate::error::{QuestionnaireError, Result};
use crate::source::{self, Question};

/// Questions to present next
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchPrompt {
    pub questions: Vec<String>,
    /// The batch holds an if-question whose answer picks the next batch
    pub is_conditional: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Position {
    #[default]
    Uninitialized,
    Root,
    At(BatchId),
    Exhausted,
}

/// Cursor over the batch graph of one stage
#[derive(Debug, Clone, Default)]
pub struct StageTraversal {
    graph: BatchGraph,
    position: Position,
}

impl StageTraversal {
    /// An engine with no stage loaded
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a stage from its question source
    ///
    /// `saved` is the persisted batch index, or `None` to start from the
    /// beginning of the stage.
    ///
    /// # Errors
    ///
    /// Returns [`QuestionnaireError::MalformedQuestionSource`] if the source
    /// cannot be parsed and [`QuestionnaireError::IndexOutOfRange`] if `saved`
    /// does not exist in the compiled graph. On error the previous state is
    /// left untouched.
    pub fn initialize(&mut self, source: &Value, saved: Option<usize>) -> Result<()> {
        let questions = source::build(source)?;
        self.initialize_questions(&questions, saved)
    }

    /// Load a stage from an already built question tree
    pub fn initialize_questions(&mut self, questions: &[Question], saved: Option<usize>) -> Result<()> {
        let graph = BatchGraph::compile(questions);

        let position = match saved {
            None => Position::Root,
            Some(index) if index < graph.len() => Position::At(BatchId(index)),
            Some(index) => {
                return Err(QuestionnaireError::IndexOutOfRange {
                    index,
                    len: graph.len(),
                })
            }
        };

        self.graph = graph;
        self.position = position;
        Ok(())
    }

    /// Move to the next batch and return its questions
    ///
    /// Follows `on_affirmative` when `affirmative` is set and the current batch
    /// has one, `on_complete` otherwise. Returns `None` once the stage is
    /// exhausted; the caller should move on to the next stage.
    pub fn advance(&mut self, affirmative: bool) -> Option<BatchPrompt> {
        let next = match self.position {
            Position::Uninitialized | Position::Exhausted => return None,
            Position::Root => self.graph.first(),
            Position::At(id) => self.graph.get(id).and_then(|batch| match batch.on_affirmative {
                Some(yes) if affirmative => Some(yes),
                _ => batch.on_complete,
            }),
        };

        match next.and_then(|id| self.graph.get(id).map(|batch| (id, batch))) {
            Some((id, batch)) => {
                let prompt = BatchPrompt {
                    questions: batch.questions.clone(),
                    is_conditional: batch.is_branching(),
                };
                self.position = Position::At(id);
                Some(prompt)
            }
            None => {
                self.position = Position::Exhausted;
                None
            }
        }
    }

    /// Index of the batch presented last, `None` before the first advance
    pub fn current_batch_index(&self) -> Option<usize> {
        match self.position {
            Position::At(id) => Some(id.index()),
            _ => None,
        }
    }

    /// Whether the batch presented last awaits a yes/no answer
    pub fn current_is_conditional(&self) -> bool {
        match self.position {
            Position::At(id) => self.graph.get(id).is_some_and(|batch| batch.is_branching()),
            _ => false,
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.position != Position::Uninitialized
    }

    pub fn is_exhausted(&self) -> bool {
        self.position == Position::Exhausted
    }

    pub fn graph(&self) -> &BatchGraph {
        &self.graph
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rejoin_source() -> Value {
        json!([
            {"id": 1, "text": "A"},
            {"id": 2, "text": "B", "if": true, "questions": [{"id": 3, "text": "X"}]},
            {"id": 4, "text": "C"},
        ])
    }

    fn prompt(questions: &[&str], is_conditional: bool) -> Option<BatchPrompt> {
        Some(BatchPrompt {
            questions: questions.iter().map(|q| q.to_string()).collect(),
            is_conditional,
        })
    }

    #[test]
    fn test_uninitialized_engine() {
        let mut stage = StageTraversal::new();

        assert!(!stage.is_initialized());
        assert_eq!(stage.current_batch_index(), None);
        assert_eq!(stage.advance(true), None);
        assert!(!stage.is_exhausted());
    }

    #[test]
    fn test_walk_affirmative_branch() {
        let mut stage = StageTraversal::new();
        stage.initialize(&rejoin_source(), None).unwrap();
        assert_eq!(stage.current_batch_index(), None);

        assert_eq!(stage.advance(false), prompt(&["A"], false));
        assert_eq!(stage.current_batch_index(), Some(0));

        assert_eq!(stage.advance(false), prompt(&["B"], true));
        assert!(stage.current_is_conditional());

        assert_eq!(stage.advance(true), prompt(&["X"], false));
        assert_eq!(stage.current_batch_index(), Some(2));

        assert_eq!(stage.advance(false), prompt(&["C"], false));
        assert_eq!(stage.advance(false), None);
        assert!(stage.is_exhausted());
        assert_eq!(stage.current_batch_index(), None);
    }

    #[test]
    fn test_negative_answer_skips_branch() {
        let mut stage = StageTraversal::new();
        stage.initialize(&rejoin_source(), Some(1)).unwrap();

        assert_eq!(stage.advance(false), prompt(&["C"], false));
        assert_eq!(stage.current_batch_index(), Some(3));
    }

    #[test]
    fn test_affirmative_on_plain_batch_follows_complete() {
        let mut stage = StageTraversal::new();
        stage.initialize(&rejoin_source(), Some(0)).unwrap();

        assert_eq!(stage.advance(true), prompt(&["B"], true));
    }

    #[test]
    fn test_resume_matches_replay() {
        let mut replayed = StageTraversal::new();
        replayed.initialize(&rejoin_source(), None).unwrap();
        replayed.advance(false);
        replayed.advance(false);
        replayed.advance(true);
        assert_eq!(replayed.current_batch_index(), Some(2));

        let mut resumed = StageTraversal::new();
        resumed.initialize(&rejoin_source(), Some(2)).unwrap();

        assert_eq!(resumed.advance(false), replayed.advance(false));
        assert_eq!(resumed.current_batch_index(), replayed.current_batch_index());
    }

    #[test]
    fn test_single_batch_exhaustion() {
        let mut stage = StageTraversal::new();
        stage.initialize(&json!([{"id": 1, "text": "A"}]), None).unwrap();

        assert_eq!(stage.advance(false), prompt(&["A"], false));
        assert_eq!(stage.advance(false), None);
        assert!(stage.is_exhausted());
        assert_eq!(stage.advance(true), None);
    }

    #[test]
    fn test_out_of_range_resume_is_rejected() {
        let source = json!([
            {"id": 1, "text": "A"},
            {"id": 2, "text": "B", "if": true},
        ]);
        let mut stage = StageTraversal::new();
        stage.initialize(&source, Some(1)).unwrap();
        assert_eq!(stage.graph().len(), 2);

        let err = stage.initialize(&source, Some(99)).unwrap_err();
        assert_eq!(err, QuestionnaireError::IndexOutOfRange { index: 99, len: 2 });

        // The failed resume does not disturb the loaded stage
        assert_eq!(stage.current_batch_index(), Some(1));
    }

    #[test]
    fn test_empty_stage_is_exhausted_at_once() {
        let mut stage = StageTraversal::new();
        stage.initialize(&json!([]), None).unwrap();

        assert!(stage.is_initialized());
        assert_eq!(stage.advance(false), None);
        assert!(stage.is_exhausted());
    }

    #[test]
    fn test_malformed_source_propagates() {
        let mut stage = StageTraversal::new();
        let err = stage.initialize(&json!([{"id": 1}]), None).unwrap_err();

        assert!(matches!(err, QuestionnaireError::MalformedQuestionSource { .. }));
        assert!(!stage.is_initialized());
    }

    #[test]
    fn test_conditional_without_children_reads_as_plain() {
        let mut stage = StageTraversal::new();
        stage
            .initialize(&json!([{"id": 1, "text": "Lonely?", "if": true}]), None)
            .unwrap();

        assert_eq!(stage.advance(true), prompt(&["Lonely?"], false));
        assert_eq!(stage.advance(true), None);
    }
}
