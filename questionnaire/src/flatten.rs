//! Preorder listing of a question tree, used when asking for the final answers.

use crate::source::Question;

/// A question stripped of its tree structure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlatQuestion {
    pub id: i64,
    pub text: String,
}

/// List every question of a tree, each if-question followed by its children
pub fn flatten(questions: &[Question]) -> Vec<FlatQuestion> {
    let mut flat = Vec::new();
    collect(questions, &mut flat);
    flat
}

fn collect(questions: &[Question], flat: &mut Vec<FlatQuestion>) {
    for question in questions {
        flat.push(FlatQuestion {
            id: question.id,
            text: question.text.clone(),
        });
        if question.is_conditional {
            collect(&question.children, flat);
        }
    }
}
