//! Stage catalog
//!
//! The questionnaire is split into stages, each with a name shown in prompts
//! and its own question source. The catalog is a JSON array:
//!
//! ```json
//! [
//!   { "name": "Wellbeing", "questions": [ { "id": 1, "text": "How do you feel?" } ] },
//!   { "name": "Medication", "questions": [ ... ] }
//! ]
//! ```
//!
//! Question sources are kept as raw JSON and built on demand, so a malformed
//! stage only fails when a conversation actually reaches it.

use anyhow::{Context, Result};
use questionnaire::{build, Question, QuestionnaireError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use tracing::info;

/// One stage of the questionnaire
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stage {
    pub name: String,

    /// Declarative question source of this stage
    #[serde(default = "empty_source")]
    pub questions: Value,
}

fn empty_source() -> Value {
    Value::Array(Vec::new())
}

impl Stage {
    /// Build the question tree of this stage
    pub fn question_tree(&self) -> Result<Vec<Question>, QuestionnaireError> {
        build(&self.questions)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CatalogFile {
    Stages(Vec<Stage>),
    Wrapped { stages: Vec<Stage> },
}

/// All stages, in the order a conversation goes through them
#[derive(Debug, Clone, Default)]
pub struct StageCatalog {
    stages: Vec<Stage>,
}

impl StageCatalog {
    /// Load the catalog from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read stage catalog {}", path.display()))?;
        let catalog = Self::from_json(&contents)
            .with_context(|| format!("Failed to parse stage catalog {}", path.display()))?;

        info!("Loaded {} questionnaire stages from {}", catalog.len(), path.display());
        Ok(catalog)
    }

    /// Parse a catalog: either a bare array of stages or `{"stages": [...]}`
    pub fn from_json(contents: &str) -> Result<Self> {
        let stages = match serde_json::from_str(contents)? {
            CatalogFile::Stages(stages) => stages,
            CatalogFile::Wrapped { stages } => stages,
        };
        Ok(Self { stages })
    }

    pub fn new(stages: Vec<Stage>) -> Self {
        Self { stages }
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Stage> {
        self.stages.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Stage> {
        self.stages.iter()
    }
}
