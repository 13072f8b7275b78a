//! Memory data types
//!
//! A `MemoryItem` is one durable fact about a user. A `UserMemory` is the
//! per-user document holding every item plus derived bookkeeping
//! (`totalMemories`, `storageUsed`) that is recomputed on every mutation.
//!
//! Field names serialize in camelCase so the persisted document keeps the
//! shape of the per-user memory collection in the document store.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;
use zeroize::Zeroize;

/// Lowest importance tier.
pub const MIN_IMPORTANCE: u8 = 1;

/// Highest importance tier. Manual memories are created at this tier.
pub const MAX_IMPORTANCE: u8 = 5;

/// Importance assigned when no hint is available.
pub const DEFAULT_IMPORTANCE: u8 = 3;

/// Default per-user storage ceiling in bytes (1 MiB).
pub const DEFAULT_STORAGE_LIMIT: usize = 1024 * 1024;

/// Closed set of memory categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryCategory {
    /// Personal details (name, location, occupation)
    Personal,
    /// Stated likes, dislikes and preferences
    Preference,
    /// Facts about the user's projects or circumstances
    Fact,
    /// Explicit instructions the user asked to be remembered
    Instruction,
    /// Anything else worth keeping
    Other,
}

impl MemoryCategory {
    /// All categories, in display order.
    pub const ALL: [MemoryCategory; 5] = [
        MemoryCategory::Personal,
        MemoryCategory::Preference,
        MemoryCategory::Fact,
        MemoryCategory::Instruction,
        MemoryCategory::Other,
    ];

    /// Lowercase label used in serialized form and rendered context.
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryCategory::Personal => "personal",
            MemoryCategory::Preference => "preference",
            MemoryCategory::Fact => "fact",
            MemoryCategory::Instruction => "instruction",
            MemoryCategory::Other => "other",
        }
    }
}

impl fmt::Display for MemoryCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MemoryCategory {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        MemoryCategory::ALL
            .iter()
            .copied()
            .find(|c| c.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| Error::InvalidInput(format!("unknown memory category '{s}'")))
    }
}

/// How a memory entered the collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemorySource {
    /// The user explicitly asked for it to be remembered
    Manual,
    /// Detected automatically from conversation
    Inferred,
}

/// One durable fact about a user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryItem {
    /// Unique identifier, immutable once assigned
    pub id: Uuid,
    /// Normalized fact text
    pub content: String,
    /// Category used for ranking and display grouping
    pub category: MemoryCategory,
    /// Importance tier (`MIN_IMPORTANCE..=MAX_IMPORTANCE`)
    pub importance: u8,
    /// Manual or inferred
    pub source: MemorySource,
    /// Session that produced this memory (provenance only)
    pub session_id: String,
    /// Creation time, refreshed when the fact is reinforced
    pub timestamp: DateTime<Utc>,
}

impl MemoryItem {
    /// Raise importance by one tier, saturating at `MAX_IMPORTANCE`.
    pub fn reinforce(&mut self, now: DateTime<Utc>) {
        self.importance = self.importance.saturating_add(1).min(MAX_IMPORTANCE);
        self.timestamp = now;
    }

    /// Zeroize content before the item is dropped.
    pub fn erase(&mut self) {
        self.content.zeroize();
    }
}

/// Builder for constructing `MemoryItem` instances
pub struct MemoryItemBuilder {
    category: MemoryCategory,
    content: Option<String>,
    importance: u8,
    source: MemorySource,
    session_id: String,
    timestamp: Option<DateTime<Utc>>,
}

impl MemoryItemBuilder {
    /// Create a new builder with the required category
    pub fn new(category: MemoryCategory) -> Self {
        Self {
            category,
            content: None,
            importance: DEFAULT_IMPORTANCE,
            source: MemorySource::Inferred,
            session_id: String::new(),
            timestamp: None,
        }
    }

    /// Set the fact text
    pub fn content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    /// Set the importance tier (clamped to the valid range)
    pub fn importance(mut self, importance: u8) -> Self {
        self.importance = importance.clamp(MIN_IMPORTANCE, MAX_IMPORTANCE);
        self
    }

    /// Set the source
    pub fn source(mut self, source: MemorySource) -> Self {
        self.source = source;
        self
    }

    /// Set the producing session
    pub fn session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = session_id.into();
        self
    }

    /// Override the creation time (defaults to now)
    pub fn timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Build the item, returning an error if content is missing or blank
    pub fn build(self) -> Result<MemoryItem> {
        let content = self
            .content
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .ok_or_else(|| Error::InvalidInput("memory content is required".to_string()))?;

        Ok(MemoryItem {
            id: Uuid::new_v4(),
            content,
            category: self.category,
            importance: self.importance,
            source: self.source,
            session_id: self.session_id,
            timestamp: self.timestamp.unwrap_or_else(Utc::now),
        })
    }
}

/// The per-user memory document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserMemory {
    /// Owning user
    pub user_id: String,
    /// Memory items; order carries no meaning
    pub memories: Vec<MemoryItem>,
    /// Time of the last mutation
    pub last_updated: DateTime<Utc>,
    /// Always `memories.len()` after `refresh_stats`
    pub total_memories: usize,
    /// Serialized byte size of `memories` after `refresh_stats`
    pub storage_used: usize,
    /// Storage ceiling in bytes
    pub storage_limit: usize,
}

impl UserMemory {
    /// Create an empty collection for a user.
    pub fn new(user_id: impl Into<String>, storage_limit: usize, now: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.into(),
            memories: Vec::new(),
            last_updated: now,
            total_memories: 0,
            storage_used: super::budget::EMPTY_COLLECTION_SIZE,
            storage_limit,
        }
    }

    /// Recompute `total_memories` and `storage_used` from `memories`.
    pub fn refresh_stats(&mut self) -> Result<()> {
        self.total_memories = self.memories.len();
        self.storage_used = super::budget::serialized_size(&self.memories)?;
        Ok(())
    }

    /// Normalize a document read back from storage: drop repeated ids,
    /// clamp importance into range and recompute derived counters instead
    /// of trusting the stored values.
    pub fn normalize(&mut self) -> Result<()> {
        let mut seen = HashSet::with_capacity(self.memories.len());
        let before = self.memories.len();
        self.memories.retain(|m| seen.insert(m.id));
        if self.memories.len() != before {
            tracing::warn!(
                user_id = %self.user_id,
                dropped = before - self.memories.len(),
                "Dropped memories with duplicate ids"
            );
        }
        for item in &mut self.memories {
            item.importance = item.importance.clamp(MIN_IMPORTANCE, MAX_IMPORTANCE);
        }
        self.refresh_stats()
    }

    /// Look up an item by id
    pub fn get(&self, id: &Uuid) -> Option<&MemoryItem> {
        self.memories.iter().find(|m| m.id == *id)
    }

    /// Whether the collection holds no memories
    pub fn is_empty(&self) -> bool {
        self.memories.is_empty()
    }
}
