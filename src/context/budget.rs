//! Token budget enforcement by oldest-first eviction
//!
//! After every turn the live store is trimmed from the head until the ledger
//! total fits the budget. Eviction is strictly FIFO by conversation order;
//! turn size and importance play no part.
//!
//! A single turn larger than the whole budget is the one boundary case, and
//! [`OverflowPolicy`] decides what happens to it.

use super::models::TurnId;
use super::store::MessageStore;
use crate::config::BudgetConfig;
use crate::error::{ContextError, Result};
use crate::metrics::METRICS;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// What to do when the budget cannot hold even the newest remaining turn
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Keep evicting, even if the store ends up empty
    #[default]
    EvictAll,
    /// Stop at one turn, leaving it over budget
    RetainNewest,
    /// Stop at one turn and report `BudgetTooSmall`
    Fail,
}

/// Outcome of one enforcement pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvictionReport {
    pub evicted: Vec<TurnId>,
    pub evicted_tokens: usize,
    pub remaining_tokens: usize,
    pub remaining_turns: usize,
    /// The store is still over budget: a single retained turn is larger
    /// than the whole budget
    pub overflow: bool,
}

impl EvictionReport {
    pub fn is_empty(&self) -> bool {
        self.evicted.is_empty()
    }
}

/// FIFO budget enforcer
#[derive(Debug, Clone)]
pub struct BudgetEnforcer {
    max_total: usize,
    policy: OverflowPolicy,
}

impl BudgetEnforcer {
    pub fn new(max_total: usize, policy: OverflowPolicy) -> Self {
        Self { max_total, policy }
    }

    pub fn from_config(config: &BudgetConfig) -> Self {
        Self::new(config.max_total, config.overflow)
    }

    pub fn max_total(&self) -> usize {
        self.max_total
    }

    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }

    /// Whether a total fits within the budget
    pub fn is_within_budget(&self, total: usize) -> bool {
        total <= self.max_total
    }

    /// Evict from the head until the store fits the budget, or until the
    /// policy's floor of retained turns is reached
    pub fn enforce(&self, store: &mut MessageStore) -> Result<EvictionReport> {
        let mut report = EvictionReport::default();
        let floor = match self.policy {
            OverflowPolicy::EvictAll => 0,
            OverflowPolicy::RetainNewest | OverflowPolicy::Fail => 1,
        };

        while store.total_tokens() > self.max_total && store.len() > floor {
            let turn = store.evict_front()?;
            debug!(
                "Evicted {} turn {} ({} tokens), total now {}",
                turn.role,
                turn.id,
                turn.token_count,
                store.total_tokens()
            );
            report.evicted_tokens += turn.token_count;
            report.evicted.push(turn.id);
        }

        report.remaining_tokens = store.total_tokens();
        report.remaining_turns = store.len();
        report.overflow = !self.is_within_budget(report.remaining_tokens);
        METRICS.record_eviction(report.evicted.len(), report.remaining_tokens);

        if report.overflow {
            warn!(
                "Single turn of {} tokens exceeds budget of {}",
                report.remaining_tokens, self.max_total
            );
        }

        Ok(report)
    }

    /// Surface an overflow as `BudgetTooSmall` under [`OverflowPolicy::Fail`].
    /// The other policies accept whatever `enforce` left behind.
    pub fn check(&self, report: &EvictionReport) -> Result<()> {
        if report.overflow && self.policy == OverflowPolicy::Fail {
            return Err(ContextError::BudgetTooSmall {
                budget: self.max_total,
                smallest: report.remaining_tokens,
            });
        }
        Ok(())
    }
}
