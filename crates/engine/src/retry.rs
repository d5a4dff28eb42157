//! Retry bookkeeping for one inbound request.

/// Extra attempts left after the first one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryBudget {
    remaining: u32,
}

impl RetryBudget {
    pub fn new(retries: u32) -> Self {
        Self { remaining: retries }
    }

    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    /// Spend one retry. `false` once the budget is exhausted.
    pub fn try_consume(&mut self) -> bool {
        if self.remaining == 0 {
            return false;
        }
        self.remaining -= 1;
        true
    }
}

impl Default for RetryBudget {
    fn default() -> Self {
        Self::new(2)
    }
}

/// Where an attempt loop stands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptState<T> {
    /// No attempt made yet.
    Pending,
    /// The last attempt failed in a retryable way.
    Retry,
    /// Finished, successfully or not.
    Done(T),
}

impl<T> AttemptState<T> {
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done(_))
    }

    /// Move to [`AttemptState::Retry`] if the budget allows, else finish with
    /// `fallback`.
    pub fn retry_or(budget: &mut RetryBudget, fallback: T) -> Self {
        if budget.try_consume() {
            Self::Retry
        } else {
            Self::Done(fallback)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_budget_allows_three_attempts() {
        let mut budget = RetryBudget::default();
        let mut attempts = 1;
        while budget.try_consume() {
            attempts += 1;
        }
        assert_eq!(attempts, 3);
        assert_eq!(budget.remaining(), 0);
        assert!(!budget.try_consume());
    }

    #[test]
    fn retry_or_finishes_when_exhausted() {
        let mut budget = RetryBudget::new(1);
        assert_eq!(AttemptState::retry_or(&mut budget, "x"), AttemptState::Retry);
        let state = AttemptState::retry_or(&mut budget, "x");
        assert!(state.is_done());
        assert_eq!(state, AttemptState::Done("x"));
    }

    #[test]
    fn zero_budget_means_single_attempt() {
        let mut budget = RetryBudget::new(0);
        assert!(!budget.try_consume());
        assert!(!AttemptState::<()>::Pending.is_done());
    }
}
