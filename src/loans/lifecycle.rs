use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::{EngineError, Result};
use crate::types::{LoanStatus, PaymentStatus};

/// loan lifecycle events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoanEvent {
    Approve,
    Reject,
    Disburse,
    /// fully repaid
    Complete,
    /// externally triggered after missed installments
    Default,
    /// a refund reopened the balance
    Refund,
}

impl fmt::Display for LoanEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verb = match self {
            LoanEvent::Approve => "approve",
            LoanEvent::Reject => "reject",
            LoanEvent::Disburse => "disburse",
            LoanEvent::Complete => "complete",
            LoanEvent::Default => "default",
            LoanEvent::Refund => "refund",
        };
        f.write_str(verb)
    }
}

const LOAN_TRANSITIONS: &[(LoanStatus, LoanEvent, LoanStatus)] = &[
    (LoanStatus::Pending, LoanEvent::Approve, LoanStatus::Approved),
    (LoanStatus::Pending, LoanEvent::Reject, LoanStatus::Rejected),
    (LoanStatus::Approved, LoanEvent::Disburse, LoanStatus::Active),
    (LoanStatus::Active, LoanEvent::Complete, LoanStatus::Completed),
    (LoanStatus::Active, LoanEvent::Default, LoanStatus::Defaulted),
    (LoanStatus::Completed, LoanEvent::Refund, LoanStatus::Active),
];

impl LoanStatus {
    /// next status for `event`, or `InvalidTransition` carrying the current one
    pub fn transition(self, event: LoanEvent) -> Result<LoanStatus> {
        LOAN_TRANSITIONS
            .iter()
            .find(|(from, on, _)| *from == self && *on == event)
            .map(|(_, _, to)| *to)
            .ok_or_else(|| EngineError::InvalidTransition {
                entity: "loan",
                current: self.to_string(),
                attempted: event.to_string(),
            })
    }
}

/// payment lifecycle events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentEvent {
    Succeed,
    Fail,
    Refund,
}

impl fmt::Display for PaymentEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verb = match self {
            PaymentEvent::Succeed => "mark successful",
            PaymentEvent::Fail => "mark failed",
            PaymentEvent::Refund => "refund",
        };
        f.write_str(verb)
    }
}

const PAYMENT_TRANSITIONS: &[(PaymentStatus, PaymentEvent, PaymentStatus)] = &[
    (PaymentStatus::Pending, PaymentEvent::Succeed, PaymentStatus::Success),
    (PaymentStatus::Pending, PaymentEvent::Fail, PaymentStatus::Failed),
    (PaymentStatus::Success, PaymentEvent::Refund, PaymentStatus::Refunded),
];

impl PaymentStatus {
    pub fn transition(self, event: PaymentEvent) -> Result<PaymentStatus> {
        PAYMENT_TRANSITIONS
            .iter()
            .find(|(from, on, _)| *from == self && *on == event)
            .map(|(_, _, to)| *to)
            .ok_or_else(|| EngineError::InvalidTransition {
                entity: "payment",
                current: self.to_string(),
                attempted: event.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_LOAN_STATES: [LoanStatus; 6] = [
        LoanStatus::Pending,
        LoanStatus::Approved,
        LoanStatus::Rejected,
        LoanStatus::Active,
        LoanStatus::Completed,
        LoanStatus::Defaulted,
    ];

    const ALL_LOAN_EVENTS: [LoanEvent; 6] = [
        LoanEvent::Approve,
        LoanEvent::Reject,
        LoanEvent::Disburse,
        LoanEvent::Complete,
        LoanEvent::Default,
        LoanEvent::Refund,
    ];

    #[test]
    fn test_happy_path() {
        let status = LoanStatus::Pending
            .transition(LoanEvent::Approve)
            .and_then(|s| s.transition(LoanEvent::Disburse))
            .and_then(|s| s.transition(LoanEvent::Complete))
            .unwrap();
        assert_eq!(status, LoanStatus::Completed);
    }

    #[test]
    fn test_only_table_entries_are_allowed() {
        let mut allowed = 0;
        for state in ALL_LOAN_STATES {
            for event in ALL_LOAN_EVENTS {
                if state.transition(event).is_ok() {
                    allowed += 1;
                }
            }
        }
        assert_eq!(allowed, LOAN_TRANSITIONS.len());
    }

    #[test]
    fn test_rejection_reports_current_state() {
        let err = LoanStatus::Active.transition(LoanEvent::Approve).unwrap_err();
        assert_eq!(
            err,
            EngineError::InvalidTransition {
                entity: "loan",
                current: "Active".to_string(),
                attempted: "approve".to_string(),
            }
        );
    }

    #[test]
    fn test_terminal_states_stay_put() {
        for event in ALL_LOAN_EVENTS {
            assert!(LoanStatus::Rejected.transition(event).is_err());
            assert!(LoanStatus::Defaulted.transition(event).is_err());
        }
        // refund is the single way back out of completed
        assert_eq!(
            LoanStatus::Completed.transition(LoanEvent::Refund).unwrap(),
            LoanStatus::Active
        );
        assert!(LoanStatus::Completed.transition(LoanEvent::Disburse).is_err());
    }

    #[test]
    fn test_payment_transitions() {
        assert_eq!(
            PaymentStatus::Pending.transition(PaymentEvent::Succeed).unwrap(),
            PaymentStatus::Success
        );
        assert_eq!(
            PaymentStatus::Pending.transition(PaymentEvent::Fail).unwrap(),
            PaymentStatus::Failed
        );
        assert_eq!(
            PaymentStatus::Success.transition(PaymentEvent::Refund).unwrap(),
            PaymentStatus::Refunded
        );
        assert!(PaymentStatus::Pending.transition(PaymentEvent::Refund).is_err());
        assert!(PaymentStatus::Failed.transition(PaymentEvent::Succeed).is_err());
        assert!(PaymentStatus::Success.transition(PaymentEvent::Fail).is_err());
        assert!(PaymentStatus::Refunded.transition(PaymentEvent::Refund).is_err());
    }
}
