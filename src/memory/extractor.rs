//! Extraction of candidate memories from a conversational turn
//!
//! Two paths, chosen by the instruction classifier:
//!
//! 1. **Manual**: the utterance is a directive. The directive phrase is
//!    stripped and the remainder becomes one `instruction` item at maximum
//!    importance. An empty remainder yields nothing.
//! 2. **Automatic**: a `ReasoningBackend` proposes raw candidates, which
//!    are coerced into the closed category set, clamped in importance and
//!    bounded in length. Malformed candidates are dropped. A failing or
//!    slow backend yields zero candidates.
//!
//! Deduplication against the existing collection is left to the merger.

use super::instruction::InstructionClassifier;
use super::item::{
    MemoryCategory, MemoryItem, MemoryItemBuilder, MemorySource, DEFAULT_IMPORTANCE,
    MAX_IMPORTANCE, MIN_IMPORTANCE,
};
use super::reasoning::{CandidateFact, InferenceRequest, ReasoningBackend};
use crate::error::{Error, Result};
use std::sync::Arc;
use std::time::Duration;

/// Default maximum length of a memory's content, in characters.
pub const DEFAULT_MAX_CONTENT_CHARS: usize = 500;

/// Produces candidate `MemoryItem`s from user utterances.
pub struct FactExtractor {
    classifier: Arc<InstructionClassifier>,
    reasoner: Arc<dyn ReasoningBackend>,
    timeout: Duration,
    max_content_chars: usize,
}

impl FactExtractor {
    /// Create an extractor
    pub fn new(
        classifier: Arc<InstructionClassifier>,
        reasoner: Arc<dyn ReasoningBackend>,
        timeout: Duration,
        max_content_chars: usize,
    ) -> Self {
        Self {
            classifier,
            reasoner,
            timeout,
            max_content_chars,
        }
    }

    /// Name of the configured reasoning backend
    pub fn reasoner_name(&self) -> &str {
        self.reasoner.name()
    }

    /// Turn an explicit instruction into one manual memory.
    ///
    /// Returns `None` if the utterance is not a directive or nothing is
    /// left once the directive phrase is removed.
    pub fn extract_manual(&self, utterance: &str, session_id: &str) -> Option<MemoryItem> {
        let remainder = self.classifier.strip_directive(utterance)?;
        let Some(content) = normalize_content(remainder, self.max_content_chars) else {
            tracing::debug!(
                error = %Error::InvalidInput("memory instruction has no content".to_string()),
                "Ignoring empty memory instruction"
            );
            return None;
        };

        MemoryItemBuilder::new(MemoryCategory::Instruction)
            .content(content)
            .importance(MAX_IMPORTANCE)
            .source(MemorySource::Manual)
            .session_id(session_id)
            .build()
            .ok()
    }

    /// Ask the reasoning backend for inferred memories.
    ///
    /// Never fails: backend errors and timeouts are logged and produce an
    /// empty result.
    pub async fn extract_automatic(
        &self,
        user_message: &str,
        assistant_reply: &str,
        existing: &[MemoryItem],
        session_id: &str,
    ) -> Vec<MemoryItem> {
        let request = InferenceRequest {
            user_message,
            assistant_reply,
            existing,
        };

        let facts = match self.infer(&request).await {
            Ok(facts) => facts,
            Err(e) => {
                tracing::warn!(
                    backend = self.reasoner.name(),
                    error = %e,
                    "Automatic memory extraction unavailable, continuing without new memories"
                );
                return Vec::new();
            }
        };

        let total = facts.len();
        let items: Vec<MemoryItem> = facts
            .into_iter()
            .filter_map(|fact| self.coerce_candidate(fact, session_id))
            .collect();

        tracing::debug!(
            backend = self.reasoner.name(),
            proposed = total,
            accepted = items.len(),
            "Automatic memory extraction complete"
        );
        items
    }

    async fn infer(&self, request: &InferenceRequest<'_>) -> Result<Vec<CandidateFact>> {
        tokio::time::timeout(self.timeout, self.reasoner.infer(request))
            .await
            .map_err(|_| {
                Error::ExtractionUnavailable(format!(
                    "reasoning backend timed out after {:?}",
                    self.timeout
                ))
            })?
    }

    /// Validate a raw candidate and coerce it into an inferred `MemoryItem`.
    pub fn coerce_candidate(&self, fact: CandidateFact, session_id: &str) -> Option<MemoryItem> {
        let content = normalize_content(&fact.content, self.max_content_chars)?;
        let importance = fact
            .importance
            .map(|v| v.clamp(i64::from(MIN_IMPORTANCE), i64::from(MAX_IMPORTANCE)) as u8)
            .unwrap_or(DEFAULT_IMPORTANCE);

        MemoryItemBuilder::new(coerce_category(&fact.category))
            .content(content)
            .importance(importance)
            .source(MemorySource::Inferred)
            .session_id(session_id)
            .build()
            .ok()
    }
}

/// Map a free-form category label onto the closed set.
pub fn coerce_category(label: &str) -> MemoryCategory {
    if let Ok(category) = label.parse::<MemoryCategory>() {
        return category;
    }
    match label.trim().to_lowercase().as_str() {
        "name" | "identity" | "profile" | "bio" | "biography" | "location" | "occupation"
        | "job" | "family" | "demographic" => MemoryCategory::Personal,
        "preferences" | "like" | "likes" | "dislike" | "dislikes" | "favorite"
        | "favourite" | "taste" | "style" => MemoryCategory::Preference,
        "facts" | "project" | "projects" | "goal" | "goals" | "constraint" | "constraints"
        | "context" | "work" | "skill" | "skills" | "health" | "diet" => MemoryCategory::Fact,
        "instructions" | "directive" | "rule" | "rules" | "reminder" | "request" => {
            MemoryCategory::Instruction
        }
        _ => MemoryCategory::Other,
    }
}

/// Clean up fact text: collapse whitespace, drop stray leading separators
/// and trailing sentence punctuation, cap the length. `None` if empty.
pub fn normalize_content(text: &str, max_chars: usize) -> Option<String> {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    let trimmed = collapsed
        .trim_start_matches([':', ',', ';', '-', '–'])
        .trim_end_matches(['.', '!'])
        .trim();

    if trimmed.is_empty() {
        return None;
    }

    let capped: String = trimmed.chars().take(max_chars).collect();
    let capped = capped.trim_end();
    (!capped.is_empty()).then(|| capped.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::reasoning::{DisabledReasoner, HeuristicReasoner};
    use async_trait::async_trait;

    struct FixedReasoner(Vec<CandidateFact>);

    #[async_trait]
    impl ReasoningBackend for FixedReasoner {
        async fn infer(&self, _request: &InferenceRequest<'_>) -> Result<Vec<CandidateFact>> {
            Ok(self.0.clone())
        }

        fn name(&self) -> &str {
            "fixed"
        }
    }

    struct FailingReasoner;

    #[async_trait]
    impl ReasoningBackend for FailingReasoner {
        async fn infer(&self, _request: &InferenceRequest<'_>) -> Result<Vec<CandidateFact>> {
            Err(Error::ExtractionUnavailable("backend down".to_string()))
        }

        fn name(&self) -> &str {
            "failing"
        }
    }

    struct SlowReasoner;

    #[async_trait]
    impl ReasoningBackend for SlowReasoner {
        async fn infer(&self, _request: &InferenceRequest<'_>) -> Result<Vec<CandidateFact>> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(vec![CandidateFact::new("fact", "too late", Some(3))])
        }

        fn name(&self) -> &str {
            "slow"
        }
    }

    fn extractor(reasoner: Arc<dyn ReasoningBackend>) -> FactExtractor {
        FactExtractor::new(
            Arc::new(InstructionClassifier::default()),
            reasoner,
            Duration::from_millis(50),
            DEFAULT_MAX_CONTENT_CHARS,
        )
    }

    #[test]
    fn test_manual_extraction() {
        let ex = extractor(Arc::new(DisabledReasoner));
        let item = ex
            .extract_manual("Remember that I prefer dark mode", "session-1")
            .unwrap();

        assert_eq!(item.content, "I prefer dark mode");
        assert_eq!(item.category, MemoryCategory::Instruction);
        assert_eq!(item.importance, MAX_IMPORTANCE);
        assert_eq!(item.source, MemorySource::Manual);
        assert_eq!(item.session_id, "session-1");
    }

    #[test]
    fn test_manual_extraction_empty_remainder() {
        let ex = extractor(Arc::new(DisabledReasoner));
        assert!(ex.extract_manual("Remember that", "s").is_none());
        assert!(ex.extract_manual("Remember that.", "s").is_none());
        assert!(ex.extract_manual("remember:   ", "s").is_none());
    }

    #[test]
    fn test_manual_extraction_not_a_directive() {
        let ex = extractor(Arc::new(DisabledReasoner));
        assert!(ex.extract_manual("I prefer dark mode", "s").is_none());
    }

    #[test]
    fn test_manual_extraction_caps_length() {
        let ex = FactExtractor::new(
            Arc::new(InstructionClassifier::default()),
            Arc::new(DisabledReasoner),
            Duration::from_secs(1),
            10,
        );
        let item = ex
            .extract_manual("Remember that my favourite number is 42", "s")
            .unwrap();
        assert_eq!(item.content, "my favouri");
    }

    #[tokio::test]
    async fn test_automatic_extraction_coerces_candidates() {
        let ex = extractor(Arc::new(FixedReasoner(vec![
            CandidateFact::new("Preferences", "Likes green tea.", Some(9)),
            CandidateFact::new("project", "Building a compiler", None),
            CandidateFact::new("hobby", "Plays chess", Some(-3)),
            CandidateFact::new("fact", "   ", Some(3)),
        ])));

        let items = ex.extract_automatic("hi", "hello", &[], "s-2").await;

        assert_eq!(items.len(), 3);
        assert_eq!(items[0].category, MemoryCategory::Preference);
        assert_eq!(items[0].content, "Likes green tea");
        assert_eq!(items[0].importance, MAX_IMPORTANCE);
        assert_eq!(items[1].category, MemoryCategory::Fact);
        assert_eq!(items[1].importance, DEFAULT_IMPORTANCE);
        assert_eq!(items[2].category, MemoryCategory::Other);
        assert_eq!(items[2].importance, MIN_IMPORTANCE);
        assert!(items.iter().all(|i| i.source == MemorySource::Inferred));
        assert!(items.iter().all(|i| i.session_id == "s-2"));
    }

    #[tokio::test]
    async fn test_automatic_extraction_with_heuristics() {
        let ex = extractor(Arc::new(HeuristicReasoner::new()));
        let message = "My name is Ada and I live in Lisbon.";
        let items = ex
            .extract_automatic(message, "Nice to meet you!", &[], "s")
            .await;
        assert!(items.iter().any(|i| {
            i.category == MemoryCategory::Personal && i.content.starts_with("My name is Ada")
        }));
    }

    #[tokio::test]
    async fn test_automatic_extraction_backend_failure_is_empty() {
        let ex = extractor(Arc::new(FailingReasoner));
        assert!(ex.extract_automatic("hi", "hello", &[], "s").await.is_empty());
    }

    #[tokio::test]
    async fn test_automatic_extraction_timeout_is_empty() {
        let ex = extractor(Arc::new(SlowReasoner));
        assert!(ex.extract_automatic("hi", "hello", &[], "s").await.is_empty());
    }

    #[test]
    fn test_coerce_category() {
        assert_eq!(coerce_category("PERSONAL"), MemoryCategory::Personal);
        assert_eq!(coerce_category("name"), MemoryCategory::Personal);
        assert_eq!(coerce_category("likes"), MemoryCategory::Preference);
        assert_eq!(coerce_category("goals"), MemoryCategory::Fact);
        assert_eq!(coerce_category("reminder"), MemoryCategory::Instruction);
        assert_eq!(coerce_category(""), MemoryCategory::Other);
        assert_eq!(coerce_category("astrology"), MemoryCategory::Other);
    }

    #[test]
    fn test_normalize_content() {
        assert_eq!(
            normalize_content("  : I   prefer\tdark mode. ", 100).as_deref(),
            Some("I prefer dark mode")
        );
        assert_eq!(normalize_content("...", 100), None);
        assert_eq!(normalize_content("héllo wörld", 4).as_deref(), Some("héll"));
        assert_eq!(normalize_content("ab cd", 3).as_deref(), Some("ab"));
    }
}
