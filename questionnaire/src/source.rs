//! Question Tree Builder
//!
//! Parses the declarative question source of one stage into an ordered tree of
//! [`Question`]s. The source is a JSON array of records:
//!
//! ```json
//! [
//!   { "id": 1, "text": "How are you feeling?" },
//!   { "id": 2, "text": "Any pain?", "if": true,
//!     "questions": [ { "id": 3, "text": "Where does it hurt?" } ] }
//! ]
//! ```
//!
//! `"conditional"` and `"children"` are accepted as aliases of `"if"` and
//! `"questions"`. Parsing is purely structural: ids are not checked for
//! uniqueness and texts are taken verbatim. Nested records are only read when
//! the conditional flag is set; under a plain question they are dropped without
//! being parsed.

use serde_json::{Map, Value};

use crate::error::{QuestionnaireError, Result};

const FLAG_KEYS: [&str; 2] = ["if", "conditional"];
const CHILDREN_KEYS: [&str; 2] = ["questions", "children"];

/// One question of a stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Question {
    pub id: i64,
    pub text: String,
    /// An if-question: an affirmative answer unlocks `children`
    pub is_conditional: bool,
    /// Always empty unless `is_conditional`
    pub children: Vec<Question>,
}

impl Question {
    /// Create a plain question
    pub fn plain(id: i64, text: impl Into<String>) -> Self {
        Self {
            id,
            text: text.into(),
            is_conditional: false,
            children: Vec::new(),
        }
    }

    /// Create an if-question with its sub-questionnaire
    pub fn conditional(id: i64, text: impl Into<String>, children: Vec<Question>) -> Self {
        Self {
            id,
            text: text.into(),
            is_conditional: true,
            children,
        }
    }
}

/// Build the question tree of a stage from its declarative source
///
/// # Errors
///
/// Returns [`QuestionnaireError::MalformedQuestionSource`] if the source is not
/// an array of objects, or a record lacks an integer `id` or a string `text`.
pub fn build(source: &Value) -> Result<Vec<Question>> {
    build_level(source, "questions")
}

fn build_level(source: &Value, path: &str) -> Result<Vec<Question>> {
    let records = source
        .as_array()
        .ok_or_else(|| QuestionnaireError::malformed(path, "expected an array of questions"))?;

    records
        .iter()
        .enumerate()
        .map(|(i, record)| build_question(record, &format!("{}[{}]", path, i)))
        .collect()
}

fn build_question(record: &Value, path: &str) -> Result<Question> {
    let fields = record
        .as_object()
        .ok_or_else(|| QuestionnaireError::malformed(path, "expected an object"))?;

    let id = fields
        .get("id")
        .ok_or_else(|| QuestionnaireError::malformed(path, "missing `id`"))?
        .as_i64()
        .ok_or_else(|| QuestionnaireError::malformed(path, "`id` must be an integer"))?;

    let text = fields
        .get("text")
        .ok_or_else(|| QuestionnaireError::malformed(path, "missing `text`"))?
        .as_str()
        .ok_or_else(|| QuestionnaireError::malformed(path, "`text` must be a string"))?;

    let is_conditional = match lookup(fields, &FLAG_KEYS) {
        None | Some(Value::Null) => false,
        Some(Value::Bool(flag)) => *flag,
        Some(_) => {
            return Err(QuestionnaireError::malformed(
                path,
                "conditional flag must be a boolean",
            ))
        }
    };

    let children = if is_conditional {
        match lookup(fields, &CHILDREN_KEYS) {
            None | Some(Value::Null) => Vec::new(),
            Some(nested) => build_level(nested, &format!("{}.questions", path))?,
        }
    } else {
        Vec::new()
    };

    Ok(Question {
        id,
        text: text.to_string(),
        is_conditional,
        children,
    })
}

fn lookup<'a>(fields: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|key| fields.get(*key))
}
