//! Ordered store of live turns: append at the tail, evict at the head

use super::ledger::TokenLedger;
use super::models::{ChatMessage, Role, Turn, TurnId};
use super::token_estimator::TokenEstimator;
use crate::error::{ContextError, Result};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Store handle shared between the primary loop and background tasks.
///
/// Every mutation runs to completion under the write lock, so a snapshot
/// never observes a half-applied update.
pub type SharedStore = Arc<RwLock<MessageStore>>;

/// Chronological sequence of live turns with its token ledger
#[derive(Debug)]
pub struct MessageStore {
    turns: VecDeque<Turn>,
    ledger: TokenLedger,
}

impl MessageStore {
    pub fn new(estimator: Arc<dyn TokenEstimator>) -> Self {
        Self {
            turns: VecDeque::new(),
            ledger: TokenLedger::new(estimator),
        }
    }

    /// Wrap a fresh store for sharing across tasks
    pub fn shared(estimator: Arc<dyn TokenEstimator>) -> SharedStore {
        Arc::new(RwLock::new(Self::new(estimator)))
    }

    /// Tokenize and append a turn. Nothing is stored if tokenization fails.
    pub fn append(&mut self, role: Role, content: impl Into<String>) -> Result<TurnId> {
        let content = content.into();
        let token_count = self.ledger.count(&content)?;
        let turn = Turn::new(role, content, token_count);
        let id = turn.id;

        self.turns.push_back(turn);
        self.ledger.record_append(token_count);

        debug!(
            "Appended {} turn {}: {} tokens, total {}",
            role,
            id,
            token_count,
            self.ledger.total()
        );

        Ok(id)
    }

    /// Remove and return the oldest turn
    pub fn evict_front(&mut self) -> Result<Turn> {
        let turn = self.turns.pop_front().ok_or(ContextError::EmptyStore)?;
        self.ledger.record_evict(turn.token_count);
        Ok(turn)
    }

    /// Remove a live turn wherever it sits. `None` if it is already gone.
    pub fn remove_by_id(&mut self, id: TurnId) -> Option<Turn> {
        let index = self.position(id)?;
        let turn = self.turns.remove(index)?;
        self.ledger.record_evict(turn.token_count);
        debug!("Removed turn {}: total {}", id, self.ledger.total());
        Some(turn)
    }

    /// Replace a turn's content if the turn is still live.
    ///
    /// Returns `Ok(false)` without touching anything when the id is absent;
    /// the turn may have been evicted before an async update landed.
    pub fn update_content_by_id(
        &mut self,
        id: TurnId,
        new_content: impl Into<String>,
    ) -> Result<bool> {
        let Some(index) = self.position(id) else {
            debug!("Update for turn {} skipped: no longer in store", id);
            return Ok(false);
        };

        let new_content = new_content.into();
        let new_tokens = self.ledger.count(&new_content)?;

        let turn = &mut self.turns[index];
        let old_tokens = turn.token_count;
        turn.content = new_content;
        turn.token_count = new_tokens;
        self.ledger.record_update(old_tokens, new_tokens);

        debug!("Updated turn {}: {} -> {} tokens", id, old_tokens, new_tokens);
        Ok(true)
    }

    /// Role/content view of every live turn, oldest first
    pub fn snapshot(&self) -> Vec<ChatMessage> {
        self.turns.iter().map(Turn::to_message).collect()
    }

    /// Role/content view of the newest `n` turns, oldest first
    pub fn recent(&self, n: usize) -> Vec<ChatMessage> {
        let skip = self.turns.len().saturating_sub(n);
        self.turns.iter().skip(skip).map(Turn::to_message).collect()
    }

    pub fn get(&self, id: TurnId) -> Option<&Turn> {
        self.turns.iter().find(|t| t.id == id)
    }

    pub fn turns(&self) -> impl Iterator<Item = &Turn> {
        self.turns.iter()
    }

    pub fn front(&self) -> Option<&Turn> {
        self.turns.front()
    }

    pub fn total_tokens(&self) -> usize {
        self.ledger.total()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    fn position(&self, id: TurnId) -> Option<usize> {
        self.turns.iter().position(|t| t.id == id)
    }
}
