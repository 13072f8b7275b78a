//! Memory service: load → process → save with per-user serialization
//!
//! Two concurrent turns for the same user would otherwise read the same
//! document and race to overwrite each other's merge. The service holds
//! one async mutex per user around the whole read-modify-write, so
//! in-process callers never lose an update. Different users proceed in
//! parallel. A user's entry is dropped once no turn holds or awaits it, so
//! the lock map stays bounded by the number of users in flight.

use super::context::memory_prompt_section;
use super::engine::{MemoryEngine, Turn, TurnOutcome};
use super::item::UserMemory;
use super::store::MemoryStore;
use crate::error::Result;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Drives the memory engine against a persistence collaborator.
pub struct MemoryService {
    engine: Arc<MemoryEngine>,
    store: Arc<dyn MemoryStore>,
    user_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl MemoryService {
    /// Create a service
    pub fn new(engine: Arc<MemoryEngine>, store: Arc<dyn MemoryStore>) -> Self {
        Self {
            engine,
            store,
            user_locks: Mutex::new(HashMap::new()),
        }
    }

    /// The engine
    pub fn engine(&self) -> &MemoryEngine {
        &self.engine
    }

    async fn user_lock(&self, user_id: &str) -> Arc<Mutex<()>> {
        self.user_locks
            .lock()
            .await
            .entry(user_id.to_string())
            .or_default()
            .clone()
    }

    /// Drop the user's lock entry when no other turn holds or awaits it.
    async fn release_user_lock(&self, user_id: &str, lock: &Arc<Mutex<()>>) {
        let mut locks = self.user_locks.lock().await;
        let idle = locks
            .get(user_id)
            .is_some_and(|held| Arc::ptr_eq(held, lock) && Arc::strong_count(lock) == 2);
        if idle {
            locks.remove(user_id);
        }
    }

    /// Users with a turn in flight or queued
    pub async fn active_users(&self) -> usize {
        self.user_locks.lock().await.len()
    }

    /// Process one turn and persist the result if it changed anything.
    pub async fn handle_turn(&self, turn: &Turn<'_>) -> Result<TurnOutcome> {
        let lock = self.user_lock(turn.user_id).await;
        let result = {
            let _guard = lock.lock().await;
            self.process_and_save(turn).await
        };
        self.release_user_lock(turn.user_id, &lock).await;
        result
    }

    async fn process_and_save(&self, turn: &Turn<'_>) -> Result<TurnOutcome> {
        let existing = self.store.load(turn.user_id).await?;
        let outcome = self.engine.process_turn(existing, turn).await?;

        if outcome.changed {
            if let Some(memory) = &outcome.memory {
                self.store.save(turn.user_id, memory).await?;
                tracing::info!(
                    user_id = turn.user_id,
                    added = outcome.added.len(),
                    reinforced = outcome.reinforced.len(),
                    evicted = outcome.evicted.len(),
                    total = memory.total_memories,
                    storage_used = memory.storage_used,
                    "Persisted memory update"
                );
            }
        }

        Ok(outcome)
    }

    /// The user's stored document, if any
    pub async fn memory_for(&self, user_id: &str) -> Result<Option<UserMemory>> {
        self.store.load(user_id).await
    }

    /// Rendered context for the user's next prompt; empty means none.
    pub async fn context_for(&self, user_id: &str) -> Result<String> {
        let memory = self.store.load(user_id).await?;
        Ok(self.engine.render_context(memory.as_ref()))
    }

    /// The "what I remember" prompt section, or `None` when there is
    /// nothing to say.
    pub async fn prompt_section_for(&self, user_id: &str) -> Result<Option<String>> {
        let context = self.context_for(user_id).await?;
        Ok(memory_prompt_section(&context))
    }
}
