//! Storage budget enforcement with least-value-first eviction
//!
//! The size of a collection is the byte length of its canonical JSON
//! serialization. When a collection exceeds the storage limit, items are
//! evicted one at a time, lowest eviction score first, until it fits.
//!
//! ```text
//! score = importance
//!       + manual_bonus              (manual items only)
//!       + recency_weight * 2^(-age_days / half_life_days)
//! ```
//!
//! With `recency_weight < manual_bonus` and `manual_bonus + recency_weight
//! < 1`, importance always dominates, manual beats inferred at equal
//! importance, and within equal importance and source the oldest item goes
//! first. Ties fall back to timestamp, then id.
//!
//! An item too large to fit on its own is truncated rather than kept
//! oversized. Evicted items are zeroized before they are dropped.

use super::item::{MemoryItem, MemorySource};
use crate::config::EvictionWeights;
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use uuid::Uuid;

/// Serialized size of an empty collection (`[]`).
pub const EMPTY_COLLECTION_SIZE: usize = 2;

/// Byte length of the canonical serialized form of `items`.
pub fn serialized_size(items: &[MemoryItem]) -> Result<usize> {
    Ok(serde_json::to_vec(items)?.len())
}

/// Collection size from per-item sizes: brackets plus separating commas.
fn collection_size(item_sizes: &[usize]) -> usize {
    EMPTY_COLLECTION_SIZE + item_sizes.iter().sum::<usize>() + item_sizes.len().saturating_sub(1)
}

/// Outcome of enforcing the budget.
#[derive(Debug, Clone, Default)]
pub struct BudgetReport {
    /// Collection within budget
    pub memories: Vec<MemoryItem>,
    /// Ids removed to get under budget
    pub evicted: Vec<Uuid>,
    /// Ids whose content was truncated to fit on their own
    pub truncated: Vec<Uuid>,
    /// Serialized size of `memories`
    pub storage_used: usize,
}

/// Enforces a hard storage ceiling on a memory collection.
#[derive(Debug, Clone)]
pub struct StorageBudget {
    limit: usize,
    weights: EvictionWeights,
}

impl StorageBudget {
    /// Create a budget with a byte limit and eviction weights
    pub fn new(limit: usize, weights: EvictionWeights) -> Self {
        Self { limit, weights }
    }

    /// The byte limit
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Eviction score; lower is evicted first.
    pub fn eviction_score(&self, item: &MemoryItem, now: DateTime<Utc>) -> f64 {
        let age_days = ((now - item.timestamp).num_seconds().max(0) as f64) / 86_400.0;
        let recency = (-age_days / self.weights.recency_half_life_days).exp2();
        let manual = match item.source {
            MemorySource::Manual => self.weights.manual_bonus,
            MemorySource::Inferred => 0.0,
        };
        f64::from(item.importance) + manual + self.weights.recency_weight * recency
    }

    /// Order two items by eviction preference (`Less` = evict first).
    fn eviction_order(&self, a: &MemoryItem, b: &MemoryItem, now: DateTime<Utc>) -> Ordering {
        self.eviction_score(a, now)
            .total_cmp(&self.eviction_score(b, now))
            .then_with(|| a.timestamp.cmp(&b.timestamp))
            .then_with(|| a.id.cmp(&b.id))
    }

    /// Bring `items` within the limit.
    ///
    /// Runs at most `items.len()` eviction rounds. If the limit is below
    /// even an empty collection the result is empty.
    pub fn enforce(&self, items: Vec<MemoryItem>, now: DateTime<Utc>) -> Result<BudgetReport> {
        let mut memories = Vec::with_capacity(items.len());
        let mut sizes = Vec::with_capacity(items.len());
        let mut evicted = Vec::new();
        let mut truncated = Vec::new();

        for mut item in items {
            let size = serialized_size(std::slice::from_ref(&item))? - EMPTY_COLLECTION_SIZE;
            if size + EMPTY_COLLECTION_SIZE <= self.limit {
                memories.push(item);
                sizes.push(size);
                continue;
            }

            tracing::warn!(
                id = %item.id,
                error = %Error::OversizedItem {
                    size: size + EMPTY_COLLECTION_SIZE,
                    limit: self.limit,
                },
                "Truncating memory that cannot fit on its own"
            );
            match self.truncate_to_fit(&item)? {
                Some(content) => {
                    item.content = content;
                    truncated.push(item.id);
                    let item_size = serialized_size(std::slice::from_ref(&item))?;
                    sizes.push(item_size - EMPTY_COLLECTION_SIZE);
                    memories.push(item);
                }
                None => {
                    evicted.push(item.id);
                    item.erase();
                }
            }
        }

        let mut used = collection_size(&sizes);
        while used > self.limit && !memories.is_empty() {
            let victim = (0..memories.len())
                .min_by(|&a, &b| self.eviction_order(&memories[a], &memories[b], now))
                .unwrap_or(0);

            let mut item = memories.remove(victim);
            sizes.remove(victim);
            used = collection_size(&sizes);

            tracing::debug!(
                id = %item.id,
                importance = item.importance,
                source = ?item.source,
                used,
                limit = self.limit,
                "Evicted memory to satisfy storage limit"
            );
            evicted.push(item.id);
            item.erase();
        }

        if !evicted.is_empty() {
            tracing::info!(
                evicted = evicted.len(),
                remaining = memories.len(),
                used,
                "Storage budget enforced"
            );
        }

        Ok(BudgetReport {
            memories,
            evicted,
            truncated,
            storage_used: used,
        })
    }

    /// Longest prefix of the item's content that lets it fit on its own,
    /// or `None` if not even one character fits.
    fn truncate_to_fit(&self, item: &MemoryItem) -> Result<Option<String>> {
        let chars: Vec<char> = item.content.chars().collect();
        let mut trial = item.clone();
        let (mut lo, mut hi) = (0usize, chars.len());

        // Largest `n` with size(prefix(n)) <= limit; size is monotone in n.
        while lo < hi {
            let mid = (lo + hi + 1) / 2;
            trial.content = chars[..mid].iter().collect();
            if serialized_size(std::slice::from_ref(&trial))? <= self.limit {
                lo = mid;
            } else {
                hi = mid - 1;
            }
        }

        let content: String = chars[..lo].iter().collect::<String>().trim_end().to_string();
        Ok(if content.is_empty() { None } else { Some(content) })
    }
}
