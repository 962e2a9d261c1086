pub mod allocation;
pub mod refund;

use chrono::{DateTime, Utc};

use crate::errors::{EngineError, Result};
use crate::loans::PaymentEvent;
use crate::state::{Payment, ScheduleEntry};

pub use allocation::{AllocationOutcome, CreditApplication, PaymentAllocator};
pub use refund::{reverse_payment, RefundOutcome};

/// failure path: the payment alone changes, no loan or schedule mutation
pub fn mark_failed(payment: &mut Payment, reason: &str, now: DateTime<Utc>) -> Result<()> {
    let reason = reason.trim();
    if reason.is_empty() {
        return Err(EngineError::validation("a failure reason is required"));
    }
    payment.status = payment.status.transition(PaymentEvent::Fail)?;
    payment.failure_reason = Some(reason.to_string());
    payment.processed_at = Some(now);
    Ok(())
}

/// oldest installment that can still take money
pub fn oldest_outstanding(entries: &[ScheduleEntry]) -> Option<&ScheduleEntry> {
    entries
        .iter()
        .filter(|e| e.status.is_outstanding() && e.outstanding().is_positive())
        .min_by_key(|e| e.week_number)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decimal::Money;
    use crate::types::{PaymentMethod, PaymentStatus, ScheduleStatus};
    use chrono::NaiveDate;
    use hourglass_rs::{SafeTimeProvider, TimeSource};
    use uuid::Uuid;

    fn payment(time: &SafeTimeProvider) -> Payment {
        Payment {
            id: Uuid::new_v4(),
            loan_id: Uuid::new_v4(),
            borrower_id: Uuid::new_v4(),
            amount: Money::from_major(500),
            method: PaymentMethod::MobileMoney,
            status: PaymentStatus::Pending,
            schedule_entry_id: None,
            allocations: Vec::new(),
            unallocated: Money::ZERO,
            provider_ref: None,
            provider_transaction_id: None,
            failure_reason: None,
            refund_reason: None,
            initiated_at: time.now(),
            processed_at: None,
            refunded_at: None,
        }
    }

    #[test]
    fn test_mark_failed() {
        let time = SafeTimeProvider::new(TimeSource::Test(Utc::now()));
        let mut p = payment(&time);

        assert!(mark_failed(&mut p, "  ", time.now()).is_err());
        assert_eq!(p.status, PaymentStatus::Pending);

        mark_failed(&mut p, "insufficient funds", time.now()).unwrap();
        assert_eq!(p.status, PaymentStatus::Failed);
        assert_eq!(p.failure_reason.as_deref(), Some("insufficient funds"));
        assert_eq!(p.processed_at, Some(time.now()));

        // terminal
        assert!(mark_failed(&mut p, "again", time.now()).is_err());
    }

    #[test]
    fn test_oldest_outstanding_skips_paid() {
        let loan_id = Uuid::new_v4();
        let due = NaiveDate::from_ymd_opt(2026, 1, 5).unwrap();
        let entry = |week: u32, status: ScheduleStatus| ScheduleEntry {
            id: Uuid::new_v4(),
            loan_id,
            week_number: week,
            due_date: due,
            amount_due: Money::from_major(100),
            amount_paid: if status == ScheduleStatus::Paid {
                Money::from_major(100)
            } else {
                Money::ZERO
            },
            status,
            paid_at: None,
        };
        let entries = vec![
            entry(3, ScheduleStatus::Pending),
            entry(1, ScheduleStatus::Paid),
            entry(2, ScheduleStatus::Overdue),
        ];
        assert_eq!(oldest_outstanding(&entries).map(|e| e.week_number), Some(2));
        assert!(oldest_outstanding(&entries[1..2]).is_none());
    }
}
