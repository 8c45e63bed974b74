//! Token budget accounting.

use serde::{Deserialize, Serialize};

/// A fixed token budget with running spend tracking.
///
/// Used by the context assembler to fill tiers in priority order: each
/// `charge` either fits and reduces the remainder, or is rejected leaving
/// the budget untouched. The budget never goes negative.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenBudget {
    /// Total tokens available.
    pub limit: u32,
    /// Tokens spent so far.
    pub spent: u32,
}

impl TokenBudget {
    /// Create a fresh budget with nothing spent.
    #[must_use]
    pub fn new(limit: u32) -> Self {
        Self { limit, spent: 0 }
    }

    /// Tokens still available.
    #[must_use]
    pub fn remaining(&self) -> u32 {
        self.limit.saturating_sub(self.spent)
    }

    /// Whether `cost` tokens fit in the remaining budget.
    #[must_use]
    pub fn fits(&self, cost: u32) -> bool {
        cost <= self.remaining()
    }

    /// Charge `cost` tokens if they fit.
    ///
    /// Returns `true` and records the spend if the cost fits, otherwise
    /// returns `false` and leaves the budget unchanged.
    pub fn charge(&mut self, cost: u32) -> bool {
        if self.fits(cost) {
            self.spent += cost;
            true
        } else {
            false
        }
    }

    /// Carve out a sub-budget of up to `reserve` tokens from the remainder.
    ///
    /// The reservation is capped at what is actually left; the parent budget
    /// is charged for the full reservation immediately.
    pub fn reserve(&mut self, reserve: u32) -> Self {
        let granted = reserve.min(self.remaining());
        self.spent += granted;
        Self::new(granted)
    }

    /// Return unspent tokens from a sub-budget back to this one.
    pub fn refund(&mut self, sub: &Self) {
        self.spent = self.spent.saturating_sub(sub.remaining());
    }
}
