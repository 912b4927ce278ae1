//! Sync-log status state machine
//!
//! ```text
//! Pending ──dispatch──► Sent ──delivered──► Success
//!                        │  ▲
//!          sweep failed  │  │ dispatch (retry)
//!                        ▼  │
//!                       Failed ──budget exhausted──► Ignored
//! ```
//!
//! Any open row whose retry count reaches `max_retries` ends in `Ignored`,
//! whichever path bumped the counter.
//!
//! Both the delivery engine and the reconciliation poller go through
//! [`next_status`]; neither decides a status on its own.

use crate::config::RetryPolicy;
use crate::types::SyncStatus;
use crate::{Error, Result};

/// Max-retries message recorded on quarantine
pub const MAX_RETRIES_MESSAGE: &str = "Max retries reached";

/// What happened to a row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Row is being handed to the downstream consumer
    Dispatched,
    /// Downstream consumer confirmed the change
    Delivered,
    /// Every in-process attempt failed; carries the post-increment retry count
    TacticalExhausted {
        /// Persisted retry count after the increment
        retry_count: i32,
    },
    /// The single sweep attempt failed; carries the post-increment retry count
    SweepFailed {
        /// Persisted retry count after the increment
        retry_count: i32,
    },
    /// Row selected with its retry budget already spent
    BudgetSpent,
}

impl Outcome {
    fn name(self) -> &'static str {
        match self {
            Outcome::Dispatched => "dispatched",
            Outcome::Delivered => "delivered",
            Outcome::TacticalExhausted { .. } => "tactical_exhausted",
            Outcome::SweepFailed { .. } => "sweep_failed",
            Outcome::BudgetSpent => "budget_spent",
        }
    }
}

/// Status a row moves to when `outcome` is applied in `current`
pub fn next_status(current: SyncStatus, outcome: Outcome, policy: &RetryPolicy) -> Result<SyncStatus> {
    let invalid = || Error::InvalidTransition {
        from: current,
        outcome: outcome.name(),
    };

    if current.is_terminal() {
        return Err(invalid());
    }

    match (current, outcome) {
        (SyncStatus::Pending | SyncStatus::Sent | SyncStatus::Failed, Outcome::Dispatched) => {
            Ok(SyncStatus::Sent)
        }
        (SyncStatus::Sent, Outcome::Delivered) => Ok(SyncStatus::Success),
        (SyncStatus::Sent, Outcome::TacticalExhausted { retry_count }) => {
            if retry_count >= policy.max_retries {
                Ok(SyncStatus::Ignored)
            } else if retry_count >= policy.failed_threshold {
                Ok(SyncStatus::Failed)
            } else {
                Ok(SyncStatus::Sent)
            }
        }
        (SyncStatus::Sent, Outcome::SweepFailed { retry_count }) => {
            if retry_count >= policy.max_retries {
                Ok(SyncStatus::Ignored)
            } else {
                Ok(SyncStatus::Failed)
            }
        }
        (SyncStatus::Pending | SyncStatus::Sent | SyncStatus::Failed, Outcome::BudgetSpent) => {
            Ok(SyncStatus::Ignored)
        }
        _ => Err(invalid()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy::default()
    }

    #[test]
    fn test_dispatch_from_retryable_states() {
        for from in [SyncStatus::Pending, SyncStatus::Sent, SyncStatus::Failed] {
            assert_eq!(
                next_status(from, Outcome::Dispatched, &policy()).unwrap(),
                SyncStatus::Sent
            );
        }
    }

    #[test]
    fn test_delivered_requires_sent() {
        assert_eq!(
            next_status(SyncStatus::Sent, Outcome::Delivered, &policy()).unwrap(),
            SyncStatus::Success
        );
        assert!(next_status(SyncStatus::Pending, Outcome::Delivered, &policy()).is_err());
    }

    #[test]
    fn test_tactical_exhaustion_threshold() {
        let p = policy();
        assert_eq!(
            next_status(SyncStatus::Sent, Outcome::TacticalExhausted { retry_count: 1 }, &p).unwrap(),
            SyncStatus::Sent
        );
        assert_eq!(
            next_status(SyncStatus::Sent, Outcome::TacticalExhausted { retry_count: 3 }, &p).unwrap(),
            SyncStatus::Failed
        );
    }

    #[test]
    fn test_tactical_exhaustion_at_max_quarantines() {
        let p = RetryPolicy {
            max_retries: 1,
            failed_threshold: 1,
            ..RetryPolicy::default()
        };
        assert_eq!(
            next_status(SyncStatus::Sent, Outcome::TacticalExhausted { retry_count: 1 }, &p).unwrap(),
            SyncStatus::Ignored
        );
    }

    #[test]
    fn test_spent_budget_quarantines_any_open_row() {
        for from in [SyncStatus::Pending, SyncStatus::Sent, SyncStatus::Failed] {
            assert_eq!(
                next_status(from, Outcome::BudgetSpent, &policy()).unwrap(),
                SyncStatus::Ignored
            );
        }
    }

    #[test]
    fn test_sweep_failure_quarantines_at_max() {
        let p = policy();
        assert_eq!(
            next_status(SyncStatus::Sent, Outcome::SweepFailed { retry_count: 4 }, &p).unwrap(),
            SyncStatus::Failed
        );
        assert_eq!(
            next_status(SyncStatus::Sent, Outcome::SweepFailed { retry_count: 5 }, &p).unwrap(),
            SyncStatus::Ignored
        );
    }

    #[test]
    fn test_no_transition_out_of_terminal() {
        let outcomes = [
            Outcome::Dispatched,
            Outcome::Delivered,
            Outcome::TacticalExhausted { retry_count: 1 },
            Outcome::SweepFailed { retry_count: 1 },
            Outcome::BudgetSpent,
        ];
        for from in [SyncStatus::Success, SyncStatus::Ignored] {
            for outcome in outcomes {
                assert!(matches!(
                    next_status(from, outcome, &policy()),
                    Err(Error::InvalidTransition { .. })
                ));
            }
        }
    }
}
