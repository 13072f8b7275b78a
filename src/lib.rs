//! AURA Memory - long-term user memory for a conversational assistant
//!
//! Decides which parts of a conversation are worth remembering, keeps one
//! bounded, deduplicated memory document per user, and renders it back
//! into prompt context on the next turn.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        MemoryService                         │
//! │     per-user lock → load → MemoryEngine → save               │
//! │                              │                               │
//! │  ┌───────────────────────────▼────────────────────────────┐  │
//! │  │                     MemoryEngine                       │  │
//! │  │  InstructionClassifier → FactExtractor                 │  │
//! │  │        → Deduplicator → StorageBudget                  │  │
//! │  │                                                        │  │
//! │  │  ReasoningBackend: heuristic | llm | disabled          │  │
//! │  └────────────────────────────────────────────────────────┘  │
//! │                                                              │
//! │  MemoryStore: in-memory | JSON files     ContextRenderer     │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`memory`]: classification, extraction, merging, budgeting, rendering
//! - [`config`]: Configuration management
//! - [`error`]: Error types

pub mod config;
pub mod error;
pub mod memory;

pub use config::AuraConfig;
pub use error::{Error, Result};
