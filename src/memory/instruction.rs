//! Instruction classifier for explicit "remember this" directives
//!
//! An utterance is a memory instruction only when a directive phrase is the
//! leading clause: "Remember that I prefer dark mode" qualifies, "I remember
//! when we met" does not. Questions ("Remember when we talked about X?") are
//! treated as recall, not as directives, unless the question is only a
//! trailing tag on a directive with a `that`/`this`/`:` complement
//! ("Remember that I'm vegan, okay?").

use crate::error::{Error, Result};
use regex::Regex;

/// A directive phrase that marks an utterance as a memory instruction.
#[derive(Debug, Clone)]
pub struct DirectiveRule {
    /// Rule name, used in debug logs
    pub name: String,
    /// Regex body for the directive phrase (anchored and made
    /// case-insensitive at compile time)
    pub pattern: String,
}

impl DirectiveRule {
    fn new(name: &str, pattern: &str) -> Self {
        Self {
            name: name.to_string(),
            pattern: pattern.to_string(),
        }
    }
}

/// Built-in directive phrases.
pub fn default_directive_rules() -> Vec<DirectiveRule> {
    vec![
        DirectiveRule::new("remember", r"remember\b(?:\s+(?:that|this)\b)?"),
        DirectiveRule::new(
            "dont_forget",
            r"(?:don['’]?t|do\s+not|never)\s+forget\b(?:\s+(?:that|this)\b)?",
        ),
        DirectiveRule::new("memorize", r"memori[sz]e\b(?:\s+(?:that|this)\b)?"),
        DirectiveRule::new(
            "note",
            r"(?:note(?:\s+to\s+self|\s+that|\s+this)\b|note\s*:|(?:make|take)\s+(?:a\s+)?note\b(?:\s+(?:that|of\s+this|of))?)",
        ),
        DirectiveRule::new(
            "keep_in_mind",
            r"(?:keep|bear)\s+in\s+mind\b(?:\s+that\b)?",
        ),
        DirectiveRule::new(
            "save",
            r"(?:save|store)\s+(?:this|that)\b(?:\s+(?:to|in)\s+(?:your\s+)?memory\b)?",
        ),
        DirectiveRule::new(
            "save_to_memory",
            r"(?:save|store|add)\s+(?:to|in)\s+(?:your\s+)?memory\b(?:\s+that\b)?",
        ),
    ]
}

/// Leading filler that may precede a directive ("Hey, please remember ...").
const LEAD_IN: &str = r"^\s*(?:(?:hey|hi|ok|okay|so|also|and|oh)\b[\s,]*)*(?:(?:please|pls|kindly)\b[\s,]*)?";

/// Separators allowed between the directive phrase and the content.
const SEPARATOR: &str = r"[\s:,;\-–]*";

/// Trailing tag that turns a directive into a polite question.
const TAG_QUESTION: &str =
    r"(?i)[\s,]*\b(?:ok(?:ay)?|alright|got it|will you|would you|please|thanks)\s*\?+\s*$";

struct CompiledDirective {
    name: String,
    pattern: Regex,
}

/// Decides whether an utterance is an explicit request to remember something.
///
/// Pure and deterministic: the only state is the compiled rule set.
pub struct InstructionClassifier {
    rules: Vec<CompiledDirective>,
    tag_question: Option<Regex>,
}

impl InstructionClassifier {
    /// Create a classifier from directive rules
    pub fn new(rules: Vec<DirectiveRule>) -> Result<Self> {
        let rules = rules
            .into_iter()
            .map(compile_rule)
            .collect::<Result<Vec<_>>>()?;
        let tag_question = Regex::new(TAG_QUESTION)
            .map_err(|e| Error::Config(format!("Invalid tag question pattern: {}", e)))?;

        Ok(Self {
            rules,
            tag_question: Some(tag_question),
        })
    }

    /// Whether the utterance is a memory instruction
    pub fn is_memory_instruction(&self, text: &str) -> bool {
        self.strip_directive(text).is_some()
    }

    /// Strip the leading directive phrase, returning the remainder.
    ///
    /// Returns `None` when the utterance is not a directive. The remainder
    /// may be empty ("Remember that"); the extractor decides what to do
    /// with it. A trailing tag question is dropped from the remainder.
    pub fn strip_directive<'a>(&self, text: &'a str) -> Option<&'a str> {
        let tag_start = self
            .tag_question
            .as_ref()
            .and_then(|tag| tag.find(text))
            .map(|m| m.start());
        let body = &text[..tag_start.unwrap_or(text.len())];
        if body.trim_end().ends_with('?') {
            return None;
        }

        // Longest match wins so "remember that" beats "remember".
        let (name, end) = self
            .rules
            .iter()
            .filter_map(|rule| rule.pattern.find(body).map(|m| (&rule.name, m.end())))
            .max_by_key(|(_, end)| *end)?;

        if tag_start.is_some() && !has_complement(&body[..end]) {
            return None;
        }

        tracing::debug!(rule = %name, "Matched memory directive");
        Some(body[end..].trim())
    }
}

/// Whether a matched directive ends in `that`/`this` or carries a colon.
fn has_complement(directive: &str) -> bool {
    if directive.contains(':') {
        return true;
    }
    let last_word = directive
        .trim_end_matches(|c: char| c.is_whitespace() || matches!(c, ',' | ';' | '-' | '–'))
        .rsplit(char::is_whitespace)
        .next()
        .unwrap_or_default()
        .to_lowercase();
    matches!(last_word.as_str(), "that" | "this")
}

impl Default for InstructionClassifier {
    fn default() -> Self {
        Self {
            rules: default_directive_rules()
                .into_iter()
                .filter_map(|rule| compile_rule(rule).ok())
                .collect(),
            tag_question: Regex::new(TAG_QUESTION).ok(),
        }
    }
}

fn compile_rule(rule: DirectiveRule) -> Result<CompiledDirective> {
    let full = format!("(?i){LEAD_IN}(?:{}){SEPARATOR}", rule.pattern);
    let pattern = Regex::new(&full).map_err(|e| {
        Error::Config(format!(
            "Invalid directive pattern for rule '{}': {}",
            rule.name, e
        ))
    })?;
    Ok(CompiledDirective {
        name: rule.name,
        pattern,
    })
}
