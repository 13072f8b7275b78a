//! Deduplication and merging of new facts into a memory collection
//!
//! Each candidate is compared against every existing item of the same
//! category. The best match at or above the similarity threshold is
//! reinforced (importance +1, timestamp refreshed) and the candidate is
//! dropped; otherwise the candidate is appended. Appended candidates take
//! part in the comparison for later candidates in the same batch, so the
//! collection never holds two same-category items whose similarity reaches
//! the threshold.

use super::item::{MemoryItem, MemorySource};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use uuid::Uuid;

/// Default similarity at or above which two facts are the same fact.
pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.8;

/// Lowercase, replace punctuation with spaces and collapse whitespace.
///
/// Apostrophes are dropped rather than split on, so "I'm" and "im" agree.
pub fn normalize(text: &str) -> String {
    let mapped: String = text
        .chars()
        .filter(|c| !matches!(c, '\'' | '’'))
        .map(|c| {
            if c.is_alphanumeric() {
                c.to_lowercase().next().unwrap_or(c)
            } else {
                ' '
            }
        })
        .collect();
    mapped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Symmetric word-overlap similarity in `[0.0, 1.0]`.
///
/// Dice coefficient over the normalized word sets: `2|A∩B| / (|A|+|B|)`.
/// Texts that normalize to the same string score 1.0.
pub fn similarity(a: &str, b: &str) -> f64 {
    let na = normalize(a);
    let nb = normalize(b);
    if na == nb {
        return 1.0;
    }

    let wa: HashSet<&str> = na.split_whitespace().collect();
    let wb: HashSet<&str> = nb.split_whitespace().collect();
    if wa.is_empty() || wb.is_empty() {
        return 0.0;
    }

    let shared = wa.intersection(&wb).count();
    (2 * shared) as f64 / (wa.len() + wb.len()) as f64
}

/// Result of merging a batch of candidates.
#[derive(Debug, Clone, Default)]
pub struct MergeReport {
    /// Merged collection
    pub memories: Vec<MemoryItem>,
    /// Ids of candidates appended as new items
    pub added: Vec<Uuid>,
    /// Ids of existing items that were reinforced
    pub reinforced: Vec<Uuid>,
}

/// Compares candidates against the collection and merges them in.
#[derive(Debug, Clone)]
pub struct Deduplicator {
    threshold: f64,
}

impl Deduplicator {
    /// Create a deduplicator; the threshold is clamped to `[0.0, 1.0]`
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold: threshold.clamp(0.0, 1.0),
        }
    }

    /// The match threshold
    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Whether two items count as the same fact
    pub fn is_match(&self, a: &MemoryItem, b: &MemoryItem) -> bool {
        a.category == b.category && similarity(&a.content, &b.content) >= self.threshold
    }

    /// Index and score of the best same-category match for `candidate`
    fn best_match(&self, memories: &[MemoryItem], candidate: &MemoryItem) -> Option<(usize, f64)> {
        memories
            .iter()
            .enumerate()
            .filter(|(_, m)| m.category == candidate.category)
            .map(|(idx, m)| (idx, similarity(&m.content, &candidate.content)))
            .filter(|(_, score)| *score >= self.threshold)
            .fold(None, |best: Option<(usize, f64)>, (idx, score)| match best {
                Some((_, best_score)) if best_score >= score => best,
                _ => Some((idx, score)),
            })
    }

    /// Merge candidates into the existing sequence.
    pub fn merge(
        &self,
        existing: Vec<MemoryItem>,
        candidates: Vec<MemoryItem>,
        now: DateTime<Utc>,
    ) -> MergeReport {
        let mut memories = existing;
        let mut ids: HashSet<Uuid> = memories.iter().map(|m| m.id).collect();
        let mut added = Vec::new();
        let mut reinforced = Vec::new();

        for mut candidate in candidates {
            if let Some((idx, score)) = self.best_match(&memories, &candidate) {
                let item = &mut memories[idx];
                item.reinforce(now);
                // An explicit request confirms an inferred fact.
                if candidate.source == MemorySource::Manual {
                    item.source = MemorySource::Manual;
                }
                tracing::debug!(
                    id = %item.id,
                    score,
                    importance = item.importance,
                    "Reinforced existing memory"
                );
                if !reinforced.contains(&item.id) {
                    reinforced.push(item.id);
                }
                continue;
            }

            if !ids.insert(candidate.id) {
                candidate.id = Uuid::new_v4();
                ids.insert(candidate.id);
            }
            tracing::debug!(
                id = %candidate.id,
                category = %candidate.category,
                "Appended new memory"
            );
            added.push(candidate.id);
            memories.push(candidate);
        }

        MergeReport {
            memories,
            added,
            reinforced,
        }
    }
}

impl Default for Deduplicator {
    fn default() -> Self {
        Self::new(DEFAULT_SIMILARITY_THRESHOLD)
    }
}
