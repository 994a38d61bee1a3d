//! Questionnaire Core
//!
//! Turns a nested, conditionally-branching question tree into a linear graph of
//! question batches and walks that graph one step at a time. This crate is
//! pure and synchronous: it performs no I/O and holds no global state, so it is
//! used by the engine's conversation orchestrator and by its tests alike.

/// Question tree builder
pub mod source;

/// Batch graph compiler
pub mod batch;

/// Stage traversal engine
pub mod stage;

/// Persisted traversal position
pub mod cursor;

/// Preorder listing of a question tree
pub mod flatten;

/// Error types
pub mod error;

// Re-export commonly used types
pub use batch::{compile, Batch, BatchGraph, BatchId};
pub use cursor::Cursor;
pub use error::{QuestionnaireError, Result};
pub use flatten::{flatten, FlatQuestion};
pub use source::{build, Question};
pub use stage::{BatchPrompt, StageTraversal};
