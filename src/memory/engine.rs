//! Per-turn memory pipeline
//!
//! `MemoryEngine` wires the classifier, extractor, merger and budgeter into
//! one call per conversational turn. It holds configuration and collaborator
//! handles only: every call receives the full current `UserMemory` (or none)
//! and returns the next one.

use super::budget::StorageBudget;
use super::context::ContextRenderer;
use super::extractor::FactExtractor;
use super::instruction::InstructionClassifier;
use super::item::{MemoryItem, UserMemory};
use super::merge::Deduplicator;
use super::reasoning::{DisabledReasoner, HeuristicReasoner, LlmReasoner, ReasoningBackend};
use crate::config::{AuraConfig, MemoryConfig, ReasonerKind, ReasoningConfig};
use crate::error::{Error, Result};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// One conversational turn as seen by the memory subsystem.
#[derive(Debug, Clone, Copy)]
pub struct Turn<'a> {
    /// Owner of the memory document
    pub user_id: &'a str,
    /// Conversation the turn belongs to, recorded on new items
    pub session_id: &'a str,
    /// What the user said
    pub user_message: &'a str,
    /// What the assistant answered; may be empty
    pub assistant_reply: &'a str,
}

/// What a turn did to the user's memory.
#[derive(Debug, Clone, Default)]
pub struct TurnOutcome {
    /// The collection to persist. `None` when the user has no memory
    /// document and this turn produced nothing to store.
    pub memory: Option<UserMemory>,
    /// Whether the utterance was an explicit memory instruction
    pub manual_instruction: bool,
    /// Ids of newly stored items
    pub added: Vec<Uuid>,
    /// Ids of existing items reinforced by this turn
    pub reinforced: Vec<Uuid>,
    /// Ids evicted to stay under the storage limit
    pub evicted: Vec<Uuid>,
    /// Ids whose content was truncated because it could not fit on its own
    pub truncated: Vec<Uuid>,
    /// Whether `memory` differs from what was passed in
    pub changed: bool,
}

/// Stateless memory pipeline for a single user turn.
pub struct MemoryEngine {
    classifier: Arc<InstructionClassifier>,
    extractor: FactExtractor,
    deduplicator: Deduplicator,
    budget: StorageBudget,
    renderer: ContextRenderer,
    storage_limit: usize,
}

impl MemoryEngine {
    /// Create an engine around an explicit reasoning backend
    pub fn new(
        config: &MemoryConfig,
        reasoner: Arc<dyn ReasoningBackend>,
        extraction_timeout: Duration,
    ) -> Self {
        let classifier = Arc::new(InstructionClassifier::default());
        let extractor = FactExtractor::new(
            classifier.clone(),
            reasoner,
            extraction_timeout,
            config.max_content_chars,
        );

        Self {
            classifier,
            extractor,
            deduplicator: Deduplicator::new(config.similarity_threshold),
            budget: StorageBudget::new(config.storage_limit, config.eviction),
            renderer: ContextRenderer::new(config.context_char_budget),
            storage_limit: config.storage_limit,
        }
    }

    /// Create an engine from configuration, building the configured backend
    pub fn from_config(config: &AuraConfig) -> Result<Self> {
        config.validate()?;
        let reasoner = build_reasoner(&config.reasoning)?;
        tracing::debug!(backend = reasoner.name(), "Memory engine configured");
        Ok(Self::new(
            &config.memory,
            reasoner,
            Duration::from_secs(config.reasoning.timeout_secs),
        ))
    }

    /// The instruction classifier
    pub fn classifier(&self) -> &InstructionClassifier {
        &self.classifier
    }

    /// Run classify → extract → merge → budget for one turn.
    ///
    /// Extraction failures never fail the turn; they contribute nothing.
    pub async fn process_turn(
        &self,
        existing: Option<UserMemory>,
        turn: &Turn<'_>,
    ) -> Result<TurnOutcome> {
        if let Some(memory) = &existing {
            if memory.user_id != turn.user_id {
                return Err(Error::InvalidInput(format!(
                    "memory document belongs to '{}', not '{}'",
                    memory.user_id, turn.user_id
                )));
            }
        }

        let had_document = existing.is_some();
        let mut memory = match existing {
            Some(mut memory) => {
                memory.normalize()?;
                memory
            }
            None => UserMemory::new(turn.user_id, self.storage_limit, Utc::now()),
        };
        let limit_changed = memory.storage_limit != self.storage_limit;
        memory.storage_limit = self.storage_limit;

        let manual_instruction = self.classifier.is_memory_instruction(turn.user_message);
        let candidates = self.extract(&memory.memories, turn, manual_instruction).await;

        let mut outcome = TurnOutcome {
            manual_instruction,
            ..Default::default()
        };

        if candidates.is_empty() && !limit_changed && memory.storage_used <= memory.storage_limit {
            outcome.memory = had_document.then_some(memory);
            return Ok(outcome);
        }

        let now = Utc::now();
        let merged = self.deduplicator.merge(
            std::mem::take(&mut memory.memories),
            candidates,
            now,
        );
        let budgeted = self.budget.enforce(merged.memories, now)?;

        memory.memories = budgeted.memories;
        memory.refresh_stats()?;

        outcome.added = merged
            .added
            .into_iter()
            .filter(|id| memory.get(id).is_some())
            .collect();
        outcome.reinforced = merged
            .reinforced
            .into_iter()
            .filter(|id| memory.get(id).is_some())
            .collect();
        outcome.evicted = budgeted.evicted;
        outcome.truncated = budgeted.truncated;
        outcome.changed = limit_changed
            || !outcome.added.is_empty()
            || !outcome.reinforced.is_empty()
            || !outcome.evicted.is_empty()
            || !outcome.truncated.is_empty();

        if outcome.changed {
            memory.last_updated = now;
        }

        tracing::debug!(
            user_id = turn.user_id,
            manual = manual_instruction,
            added = outcome.added.len(),
            reinforced = outcome.reinforced.len(),
            evicted = outcome.evicted.len(),
            storage_used = memory.storage_used,
            "Processed memory turn"
        );

        outcome.memory = (had_document || !memory.is_empty()).then_some(memory);
        Ok(outcome)
    }

    async fn extract(
        &self,
        existing: &[MemoryItem],
        turn: &Turn<'_>,
        manual_instruction: bool,
    ) -> Vec<MemoryItem> {
        if turn.user_message.trim().is_empty() {
            return Vec::new();
        }
        if manual_instruction {
            return self
                .extractor
                .extract_manual(turn.user_message, turn.session_id)
                .into_iter()
                .collect();
        }
        self.extractor
            .extract_automatic(turn.user_message, turn.assistant_reply, existing, turn.session_id)
            .await
    }

    /// Render a user's memories as prompt context; empty means none.
    pub fn render_context(&self, memory: Option<&UserMemory>) -> String {
        memory
            .map(|m| self.renderer.render(&m.memories))
            .unwrap_or_default()
    }
}

/// Build the reasoning backend named by configuration
pub fn build_reasoner(config: &ReasoningConfig) -> Result<Arc<dyn ReasoningBackend>> {
    Ok(match config.backend {
        ReasonerKind::Heuristic => Arc::new(HeuristicReasoner::new()),
        ReasonerKind::Llm => Arc::new(LlmReasoner::from_config(config)?),
        ReasonerKind::Disabled => Arc::new(DisabledReasoner),
    })
}
