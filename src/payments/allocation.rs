use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::decimal::Money;
use crate::errors::{EngineError, Result};
use crate::loans::{LoanEvent, PaymentEvent};
use crate::state::{Allocation, Loan, Payment, ScheduleEntry};
use crate::types::{LoanStatus, PaymentId, PaymentStatus, ScheduleStatus};

/// what one successful payment did to the ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationOutcome {
    pub allocations: Vec<Allocation>,
    /// total applied to schedule entries
    pub allocated: Money,
    /// excess over the loan's remaining balance, held as credit
    pub held_as_credit: Money,
    pub loan_completed: bool,
}

/// walks outstanding installments oldest first
#[derive(Debug, Clone, Copy, Default)]
pub struct PaymentAllocator;

impl PaymentAllocator {
    pub fn new() -> Self {
        Self
    }

    /// settle a pending payment against its loan and schedule
    ///
    /// Mutates all three records in place; the caller persists them together.
    pub fn apply(
        &self,
        loan: &mut Loan,
        entries: &mut [ScheduleEntry],
        payment: &mut Payment,
        now: DateTime<Utc>,
    ) -> Result<AllocationOutcome> {
        if payment.loan_id != loan.id {
            return Err(EngineError::Conflict {
                message: format!("payment {} does not belong to loan {}", payment.id, loan.id),
            });
        }
        if !payment.amount.is_positive() {
            return Err(EngineError::validation(format!(
                "payment amount must be positive, got {}",
                payment.amount
            )));
        }
        let next_status = payment.status.transition(PaymentEvent::Succeed)?;

        // loan aggregate
        let to_loan = payment.amount.min(loan.outstanding_balance());
        let held_as_credit = payment.amount - to_loan;
        loan.amount_paid += to_loan;
        loan.credit_balance += held_as_credit;

        let allocations = allocate_oldest_first(loan, entries, payment.amount, now);

        let loan_completed = complete_if_repaid(loan, now)?;

        let allocated: Money = allocations.iter().map(|a| a.amount).sum();
        if let Some(first) = allocations.first() {
            payment.schedule_entry_id = Some(first.entry_id);
        }
        payment.status = next_status;
        payment.processed_at = Some(now);
        payment.allocations = allocations.clone();
        payment.unallocated = held_as_credit;

        Ok(AllocationOutcome {
            allocations,
            allocated,
            held_as_credit,
            loan_completed,
        })
    }

    /// move credit held on earlier payments back onto a loan that owes money again
    ///
    /// Credit is drawn from `holders` in settlement order and the resulting
    /// allocations are appended to the payment that held it, so refunding that
    /// payment later reverses them too.
    pub fn apply_held_credit(
        &self,
        loan: &mut Loan,
        entries: &mut [ScheduleEntry],
        holders: &mut [Payment],
        now: DateTime<Utc>,
    ) -> Result<CreditApplication> {
        let mut applied = CreditApplication::default();
        if loan.status != LoanStatus::Active {
            return Ok(applied);
        }

        let mut order: Vec<usize> = (0..holders.len())
            .filter(|&i| {
                let p = &holders[i];
                p.loan_id == loan.id && p.status == PaymentStatus::Success && p.unallocated.is_positive()
            })
            .collect();
        order.sort_by_key(|&i| holders[i].processed_at);

        for i in order {
            let available = holders[i]
                .unallocated
                .min(loan.credit_balance)
                .min(loan.outstanding_balance());
            if !available.is_positive() {
                break;
            }

            let allocations = allocate_oldest_first(loan, entries, available, now);
            let moved: Money = allocations.iter().map(|a| a.amount).sum();
            if moved.is_zero() {
                break;
            }
            loan.amount_paid += moved;
            loan.credit_balance -= moved;

            let holder = &mut holders[i];
            holder.unallocated -= moved;
            if holder.schedule_entry_id.is_none() {
                holder.schedule_entry_id = allocations.first().map(|a| a.entry_id);
            }
            holder.allocations.extend(allocations);

            applied.amount += moved;
            applied.payments.push(holder.id);
        }

        applied.loan_completed = complete_if_repaid(loan, now)?;
        Ok(applied)
    }
}

/// held credit moved back onto a loan's schedule
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CreditApplication {
    pub amount: Money,
    /// payments whose held credit was drawn on
    pub payments: Vec<PaymentId>,
    pub loan_completed: bool,
}

/// spread `amount` over the loan's outstanding entries, ascending week number
fn allocate_oldest_first(
    loan: &Loan,
    entries: &mut [ScheduleEntry],
    amount: Money,
    now: DateTime<Utc>,
) -> Vec<Allocation> {
    let mut order: Vec<usize> = (0..entries.len())
        .filter(|&i| entries[i].loan_id == loan.id && entries[i].status.is_outstanding())
        .collect();
    order.sort_by_key(|&i| entries[i].week_number);

    let mut remaining = amount;
    let mut allocations = Vec::new();
    for i in order {
        if remaining.is_zero() {
            break;
        }
        let entry = &mut entries[i];
        let outstanding = entry.outstanding();
        if !outstanding.is_positive() {
            continue;
        }

        let to_apply = remaining.min(outstanding);
        allocations.push(Allocation {
            entry_id: entry.id,
            week_number: entry.week_number,
            amount: to_apply,
            prior_status: entry.status,
            prior_paid_at: entry.paid_at,
        });

        entry.amount_paid += to_apply;
        if entry.amount_paid >= entry.amount_due {
            entry.status = ScheduleStatus::Paid;
            entry.paid_at = Some(now);
        } else {
            entry.status = ScheduleStatus::Partial;
        }
        remaining -= to_apply;
    }
    allocations
}

fn complete_if_repaid(loan: &mut Loan, now: DateTime<Utc>) -> Result<bool> {
    let completed = loan.status == LoanStatus::Active && loan.is_fully_repaid();
    if completed {
        loan.status = loan.status.transition(LoanEvent::Complete)?;
        loan.closed_at = Some(now);
    }
    loan.updated_at = now;
    Ok(completed)
}
