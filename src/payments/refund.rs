use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::decimal::Money;
use crate::errors::{EngineError, Result};
use crate::loans::{LoanEvent, PaymentEvent};
use crate::state::{Loan, Payment, ScheduleEntry};
use crate::types::{LoanStatus, ScheduleStatus};

/// what a refund took back out of the ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefundOutcome {
    /// removed from schedule entries and `loan.amount_paid`
    pub reversed: Money,
    /// removed from `loan.credit_balance`
    pub credit_reversed: Money,
    pub loan_reopened: bool,
}

/// exact inverse of allocation, driven by the allocations recorded on the payment
pub fn reverse_payment(
    loan: &mut Loan,
    entries: &mut [ScheduleEntry],
    payment: &mut Payment,
    reason: &str,
    now: DateTime<Utc>,
) -> Result<RefundOutcome> {
    if payment.loan_id != loan.id {
        return Err(EngineError::Conflict {
            message: format!("payment {} does not belong to loan {}", payment.id, loan.id),
        });
    }
    let next_status = payment.status.transition(PaymentEvent::Refund)?;

    let reversed = payment.allocated();
    if reversed + payment.unallocated != payment.amount {
        return Err(EngineError::Conflict {
            message: format!(
                "payment {} records {} allocated and {} held against {}",
                payment.id, reversed, payment.unallocated, payment.amount
            ),
        });
    }
    if reversed > loan.amount_paid || payment.unallocated > loan.credit_balance {
        return Err(EngineError::Conflict {
            message: format!(
                "refund of {} exceeds what loan {} has recorded",
                payment.amount, loan.id
            ),
        });
    }

    // validate every entry before touching any of them
    let mut targets = Vec::with_capacity(payment.allocations.len());
    for allocation in payment.allocations.iter().rev() {
        let index = entries
            .iter()
            .position(|e| e.id == allocation.entry_id)
            .ok_or_else(|| EngineError::not_found("schedule entry", allocation.entry_id))?;
        if entries[index].amount_paid < allocation.amount {
            return Err(EngineError::Conflict {
                message: format!(
                    "week {} holds {} but the payment allocated {}",
                    allocation.week_number, entries[index].amount_paid, allocation.amount
                ),
            });
        }
        targets.push((index, allocation));
    }

    for (index, allocation) in targets {
        let entry = &mut entries[index];
        entry.amount_paid -= allocation.amount;
        if entry.amount_paid >= entry.amount_due {
            // still covered by later payments
            continue;
        }
        entry.status = if allocation.prior_status == ScheduleStatus::Overdue {
            ScheduleStatus::Overdue
        } else if entry.amount_paid.is_positive() {
            ScheduleStatus::Partial
        } else {
            ScheduleStatus::Pending
        };
        entry.paid_at = allocation.prior_paid_at;
    }

    loan.amount_paid -= reversed;
    loan.credit_balance -= payment.unallocated;

    let loan_reopened = loan.status == LoanStatus::Completed && !loan.is_fully_repaid();
    if loan_reopened {
        loan.status = loan.status.transition(LoanEvent::Refund)?;
        loan.closed_at = None;
    }
    loan.updated_at = now;

    payment.status = next_status;
    payment.refund_reason = Some(reason.to_string());
    payment.refunded_at = Some(now);

    Ok(RefundOutcome {
        reversed,
        credit_reversed: payment.unallocated,
        loan_reopened,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decimal::Rate;
    use crate::loans::{LoanAmortizer, ScheduleGenerator};
    use crate::payments::PaymentAllocator;
    use crate::types::{PaymentMethod, PaymentStatus};
    use chrono::{Duration, NaiveDate, TimeZone};
    use uuid::Uuid;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 4, 8, 0, 0).unwrap()
    }

    fn fixture() -> (Loan, Vec<ScheduleEntry>) {
        let a = LoanAmortizer::new()
            .compute(Money::from_major(3_000), Rate::ZERO, 3)
            .unwrap();
        let start = NaiveDate::from_ymd_opt(2026, 4, 20).unwrap();
        let loan = Loan {
            id: Uuid::new_v4(),
            borrower_id: Uuid::new_v4(),
            principal: a.principal,
            interest_rate: a.interest_rate,
            term_weeks: 3,
            total_repayment: a.total_repayment,
            weekly_payment: a.weekly_payment,
            amount_paid: Money::ZERO,
            credit_balance: Money::ZERO,
            status: LoanStatus::Active,
            purpose: "phone".to_string(),
            applied_at: now(),
            approved_at: Some(now()),
            approved_by: Some("ops".to_string()),
            start_date: Some(start),
            end_date: None,
            disbursed_at: Some(now()),
            closed_at: None,
            rejection_reason: None,
            default_reason: None,
            updated_at: now(),
        };
        let entries = ScheduleGenerator::new()
            .generate(loan.id, start, 3, a.weekly_payment)
            .unwrap();
        (loan, entries)
    }

    fn settle(loan: &mut Loan, entries: &mut [ScheduleEntry], amount: i64) -> Payment {
        let mut payment = Payment::new(loan, Money::from_major(amount), PaymentMethod::MobileMoney, None, now());
        PaymentAllocator::new()
            .apply(loan, entries, &mut payment, now())
            .unwrap();
        payment
    }

    #[test]
    fn test_refund_restores_prior_state_exactly() {
        let (mut loan, mut entries) = fixture();
        settle(&mut loan, &mut entries, 400);
        let loan_before = loan.clone();
        let entries_before = entries.clone();

        let mut payment = settle(&mut loan, &mut entries, 1_100);
        reverse_payment(&mut loan, &mut entries, &mut payment, "chargeback", now()).unwrap();

        assert_eq!(entries, entries_before);
        assert_eq!(loan.amount_paid, loan_before.amount_paid);
        assert_eq!(loan.status, loan_before.status);
        assert_eq!(payment.status, PaymentStatus::Refunded);
        assert_eq!(payment.refund_reason.as_deref(), Some("chargeback"));
        assert_eq!(payment.refunded_at, Some(now()));
    }

    #[test]
    fn test_refund_reopens_completed_loan() {
        let (mut loan, mut entries) = fixture();
        let mut payment = settle(&mut loan, &mut entries, 3_000);
        assert_eq!(loan.status, LoanStatus::Completed);

        let outcome =
            reverse_payment(&mut loan, &mut entries, &mut payment, "duplicate charge", now()).unwrap();
        assert!(outcome.loan_reopened);
        assert_eq!(outcome.reversed, Money::from_major(3_000));
        assert_eq!(loan.status, LoanStatus::Active);
        assert_eq!(loan.amount_paid, Money::ZERO);
        assert!(loan.closed_at.is_none());
        assert!(entries
            .iter()
            .all(|e| e.status == ScheduleStatus::Pending && e.paid_at.is_none()));
    }

    #[test]
    fn test_refund_of_earlier_payment_keeps_later_coverage() {
        let (mut loan, mut entries) = fixture();
        let mut first = settle(&mut loan, &mut entries, 300);
        settle(&mut loan, &mut entries, 700);
        assert_eq!(entries[0].status, ScheduleStatus::Paid);

        reverse_payment(&mut loan, &mut entries, &mut first, "reversed", now()).unwrap();
        assert_eq!(entries[0].amount_paid, Money::from_major(700));
        assert_eq!(entries[0].status, ScheduleStatus::Partial);
        assert!(entries[0].paid_at.is_none());
        assert_eq!(loan.amount_paid, Money::from_major(700));
    }

    #[test]
    fn test_refund_restores_overdue() {
        let (mut loan, mut entries) = fixture();
        entries[0].status = ScheduleStatus::Overdue;
        let mut payment = settle(&mut loan, &mut entries, 1_000);
        assert_eq!(entries[0].status, ScheduleStatus::Paid);

        reverse_payment(&mut loan, &mut entries, &mut payment, "reversed", now() + Duration::days(1))
            .unwrap();
        assert_eq!(entries[0].status, ScheduleStatus::Overdue);
        assert_eq!(entries[0].amount_paid, Money::ZERO);
    }

    #[test]
    fn test_refund_returns_held_credit() {
        let (mut loan, mut entries) = fixture();
        let mut payment = settle(&mut loan, &mut entries, 3_200);
        assert_eq!(loan.credit_balance, Money::from_major(200));

        let outcome = reverse_payment(&mut loan, &mut entries, &mut payment, "overpaid", now()).unwrap();
        assert_eq!(outcome.credit_reversed, Money::from_major(200));
        assert_eq!(loan.credit_balance, Money::ZERO);
        assert_eq!(loan.amount_paid, Money::ZERO);
    }

    #[test]
    fn test_only_successful_payments_refund() {
        let (mut loan, mut entries) = fixture();
        let mut pending = Payment::new(&loan, Money::from_major(100), PaymentMethod::Cash, None, now());
        let err = reverse_payment(&mut loan, &mut entries, &mut pending, "nope", now()).unwrap_err();
        assert!(matches!(err, EngineError::InvalidTransition { .. }));

        let mut payment = settle(&mut loan, &mut entries, 100);
        reverse_payment(&mut loan, &mut entries, &mut payment, "once", now()).unwrap();
        assert!(reverse_payment(&mut loan, &mut entries, &mut payment, "twice", now()).is_err());
        assert_eq!(loan.amount_paid, Money::ZERO);
    }

    #[test]
    fn test_refund_rejects_inconsistent_allocation_record() {
        let (mut loan, mut entries) = fixture();
        let mut payment = settle(&mut loan, &mut entries, 800);
        payment.allocations[0].amount = Money::from_major(500);
        let before = entries.clone();

        let err = reverse_payment(&mut loan, &mut entries, &mut payment, "chargeback", now()).unwrap_err();
        assert!(matches!(err, EngineError::Conflict { .. }));
        assert_eq!(entries, before);
        assert_eq!(loan.amount_paid, Money::from_major(800));
        assert_eq!(payment.status, PaymentStatus::Success);
    }

    #[test]
    fn test_refund_after_credit_was_drawn_undoes_those_allocations() {
        let (mut loan, mut entries) = fixture();
        let mut first = settle(&mut loan, &mut entries, 1_000);
        settle(&mut loan, &mut entries, 2_000);
        let third = settle(&mut loan, &mut entries, 700);
        reverse_payment(&mut loan, &mut entries, &mut first, "chargeback", now()).unwrap();

        let mut holders = vec![third];
        PaymentAllocator::new()
            .apply_held_credit(&mut loan, &mut entries, &mut holders, now())
            .unwrap();
        assert_eq!(loan.outstanding_balance(), Money::from_major(300));

        let mut third = holders.remove(0);
        let outcome = reverse_payment(&mut loan, &mut entries, &mut third, "chargeback", now()).unwrap();
        assert_eq!(outcome.reversed, Money::from_major(700));
        assert_eq!(outcome.credit_reversed, Money::ZERO);
        assert_eq!(loan.outstanding_balance(), Money::from_major(1_000));
        assert_eq!(loan.credit_balance, Money::ZERO);
        assert_eq!(entries[0].amount_paid, Money::ZERO);
        assert_eq!(entries[0].status, ScheduleStatus::Pending);
    }
}
