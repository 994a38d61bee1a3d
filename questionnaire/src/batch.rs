//! Batch Graph Compiler
//!
//! Flattens a question tree into a graph of batches, the units of questions
//! presented to the conversational agent together. Batches live in an arena
//! ([`BatchGraph`]) and refer to each other by [`BatchId`], so a position in the
//! graph is a plain integer that survives a rebuild from the same source.
//!
//! A batch has one of two shapes:
//!
//! - **plain**: a run of consecutive non-conditional question texts,
//!   `on_affirmative` is always `None`;
//! - **conditional**: the text of a single if-question, `on_affirmative` points
//!   at the first batch of its sub-questionnaire (if it has one).
//!
//! `on_complete` points at whatever follows at the same nesting level. The last
//! batches of a sub-questionnaire rejoin the parent level at the batch that
//! follows their if-question, so edges may converge but never point backwards.
//!
//! Batches are numbered in discovery order: a sealed plain run, then the
//! conditional batch, then its descendants depth-first, then what follows.

use serde::Serialize;
use std::fmt;

use crate::source::Question;

/// Index of a batch in its [`BatchGraph`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct BatchId(pub usize);

impl BatchId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A group of questions asked in one context turn
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct Batch {
    pub questions: Vec<String>,
    /// Next batch when the if-question is answered affirmatively
    pub on_affirmative: Option<BatchId>,
    /// Next batch once this one is done; `None` ends the stage
    pub on_complete: Option<BatchId>,
}

impl Batch {
    fn with_questions(questions: Vec<String>) -> Self {
        Self {
            questions,
            ..Self::default()
        }
    }

    /// Whether answering this batch chooses between two successors
    pub fn is_branching(&self) -> bool {
        self.on_affirmative.is_some()
    }
}

/// Compile a question sequence into batches
///
/// Returns the ordered batch list and the ids of the batches whose
/// `on_complete` is still unresolved. At the top level those are the batches
/// that end the stage.
pub fn compile(questions: &[Question]) -> (Vec<Batch>, Vec<BatchId>) {
    compile_level(questions, 0)
}

/// Compile one nesting level whose first batch will sit at arena index `base`
///
/// Ids in the returned batches and tails are absolute, so the caller can append
/// the batches to its own list unchanged.
fn compile_level(questions: &[Question], base: usize) -> (Vec<Batch>, Vec<BatchId>) {
    let mut batches: Vec<Batch> = Vec::new();
    let mut plain: Vec<String> = Vec::new();
    let mut tails: Vec<BatchId> = Vec::new();

    for question in questions {
        if !question.is_conditional {
            plain.push(question.text.clone());
            continue;
        }

        if !plain.is_empty() {
            let sealed = seal(&mut batches, base, &mut tails, std::mem::take(&mut plain));
            tails.push(sealed);
        }

        let id = BatchId(base + batches.len());
        resolve(&mut batches, base, &mut tails, id);

        let (children, child_tails) = compile_level(&question.children, id.0 + 1);
        let mut batch = Batch::with_questions(vec![question.text.clone()]);
        if !children.is_empty() {
            batch.on_affirmative = Some(BatchId(id.0 + 1));
        }

        batches.push(batch);
        batches.extend(children);
        tails.push(id);
        tails.extend(child_tails);
    }

    if !plain.is_empty() {
        let sealed = seal(&mut batches, base, &mut tails, plain);
        tails.push(sealed);
    }

    (batches, tails)
}

/// Push a plain batch, linking every pending tail to it
fn seal(
    batches: &mut Vec<Batch>,
    base: usize,
    tails: &mut Vec<BatchId>,
    questions: Vec<String>,
) -> BatchId {
    let id = BatchId(base + batches.len());
    resolve(batches, base, tails, id);
    batches.push(Batch::with_questions(questions));
    id
}

/// Point the `on_complete` of every pending tail at `target`
fn resolve(batches: &mut [Batch], base: usize, tails: &mut Vec<BatchId>, target: BatchId) {
    for tail in tails.drain(..) {
        batches[tail.0 - base].on_complete = Some(target);
    }
}

/// The compiled batches of one stage
/// Serializes as the plain list of batches.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(transparent)]
pub struct BatchGraph {
    batches: Vec<Batch>,
}

impl BatchGraph {
    /// Compile a question tree into a graph
    pub fn compile(questions: &[Question]) -> Self {
        let (batches, _) = compile(questions);
        Self { batches }
    }

    pub fn len(&self) -> usize {
        self.batches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    pub fn get(&self, id: BatchId) -> Option<&Batch> {
        self.batches.get(id.0)
    }

    /// Id of the entry batch, if the stage has any questions
    pub fn first(&self) -> Option<BatchId> {
        (!self.batches.is_empty()).then_some(BatchId(0))
    }

    pub fn batches(&self) -> &[Batch] {
        &self.batches
    }
}

impl fmt::Display for BatchGraph {
    /// One line per batch, 1-based: `2: ["Any pain?"] if_yes=3 done=4`
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let one_based =
            |id: Option<BatchId>| id.map_or_else(|| "-".to_string(), |id| (id.0 + 1).to_string());

        for (i, batch) in self.batches.iter().enumerate() {
            writeln!(
                f,
                "{}: {:?} if_yes={} done={}",
                i + 1,
                batch.questions,
                one_based(batch.on_affirmative),
                one_based(batch.on_complete)
            )?;
        }
        Ok(())
    }
}
