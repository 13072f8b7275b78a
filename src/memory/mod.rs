//! Memory subsystem: durable facts about a user across sessions
//!
//! Per turn: classify → extract → merge → budget. Before each model call
//! the stored collection is rendered into a bounded context block.
//!
//! - [`instruction`]: explicit "remember this" directives
//! - [`extractor`]: manual and inferred candidate facts
//! - [`merge`]: deduplication and reinforcement
//! - [`budget`]: storage ceiling and eviction
//! - [`context`]: prompt context rendering
//! - [`engine`]: the stateless per-turn pipeline
//! - [`store`], [`service`]: persistence and per-user write serialization

pub mod budget;
pub mod context;
pub mod engine;
pub mod extractor;
pub mod instruction;
pub mod item;
pub mod merge;
pub mod reasoning;
pub mod service;
pub mod store;

pub use budget::{serialized_size, BudgetReport, StorageBudget};
pub use context::{memory_prompt_section, ContextRenderer};
pub use engine::{MemoryEngine, Turn, TurnOutcome};
pub use extractor::FactExtractor;
pub use instruction::{DirectiveRule, InstructionClassifier};
pub use item::{MemoryCategory, MemoryItem, MemoryItemBuilder, MemorySource, UserMemory};
pub use merge::{similarity, Deduplicator, MergeReport};
pub use reasoning::{
    CandidateFact, DisabledReasoner, HeuristicReasoner, InferenceRequest, LlmReasoner,
    ReasoningBackend,
};
pub use service::MemoryService;
pub use store::{InMemoryStore, JsonFileStore, MemoryStore};
