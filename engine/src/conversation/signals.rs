//! Progress tags in model replies
//!
//! The model reports questionnaire progress by writing `\done`, `\yes` or
//! `\no` into its reply. Tags are matched case-insensitively and removed,
//! together with the blanks in front of them, before the reply reaches the
//! patient.

use regex::Regex;
use std::sync::OnceLock;

static TAG_PATTERN: OnceLock<Regex> = OnceLock::new();

fn tag_pattern() -> &'static Regex {
    TAG_PATTERN.get_or_init(|| Regex::new(r"(?i)[ \t]*\\(yes|no|done)\b").expect("Invalid tag pattern"))
}

/// Tags found in one model reply
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Signals {
    pub yes: bool,
    pub no: bool,
    pub done: bool,
}

impl Signals {
    /// Answer to an if-question, if the reply carries one
    ///
    /// `\no` wins when both tags are present.
    pub fn branch_answer(&self) -> Option<bool> {
        if self.no {
            Some(false)
        } else if self.yes {
            Some(true)
        } else {
            None
        }
    }
}

/// Find the progress tags in a reply
pub fn detect(text: &str) -> Signals {
    let mut signals = Signals::default();
    for captures in tag_pattern().captures_iter(text) {
        match captures[1].to_ascii_lowercase().as_str() {
            "yes" => signals.yes = true,
            "no" => signals.no = true,
            _ => signals.done = true,
        }
    }
    signals
}

/// Remove the progress tags from a reply
pub fn strip(text: &str) -> String {
    tag_pattern().replace_all(text, "").trim().to_string()
}
