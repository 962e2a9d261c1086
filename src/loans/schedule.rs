use chrono::{Duration, NaiveDate};
use uuid::Uuid;

use crate::decimal::Money;
use crate::errors::{EngineError, Result};
use crate::state::ScheduleEntry;
use crate::types::{LoanId, ScheduleStatus};

/// builds the weekly installment list for an approved loan
#[derive(Debug, Clone, Copy, Default)]
pub struct ScheduleGenerator;

impl ScheduleGenerator {
    pub fn new() -> Self {
        Self
    }

    /// one pending entry per week, due `start_date + 7w` days
    pub fn generate(
        &self,
        loan_id: LoanId,
        start_date: NaiveDate,
        term_weeks: u32,
        periodic_payment: Money,
    ) -> Result<Vec<ScheduleEntry>> {
        if term_weeks == 0 {
            return Err(EngineError::validation("cannot build a schedule with zero weeks"));
        }

        let entries = (1..=term_weeks)
            .map(|week| ScheduleEntry {
                id: Uuid::new_v4(),
                loan_id,
                week_number: week,
                due_date: start_date + Duration::days(7 * i64::from(week)),
                amount_due: periodic_payment,
                amount_paid: Money::ZERO,
                status: ScheduleStatus::Pending,
                paid_at: None,
            })
            .collect();

        Ok(entries)
    }

    /// generate, then fold the rounding residue into the final installment
    /// so the schedule sums to `total_repayment`
    pub fn generate_reconciled(
        &self,
        loan_id: LoanId,
        start_date: NaiveDate,
        term_weeks: u32,
        periodic_payment: Money,
        total_repayment: Money,
    ) -> Result<Vec<ScheduleEntry>> {
        let mut entries = self.generate(loan_id, start_date, term_weeks, periodic_payment)?;
        reconcile_final_installment(&mut entries, total_repayment)?;
        Ok(entries)
    }
}

/// adjust last payment for rounding
pub fn reconcile_final_installment(entries: &mut [ScheduleEntry], total_repayment: Money) -> Result<()> {
    let scheduled: Money = entries.iter().map(|e| e.amount_due).sum();
    let residue = total_repayment - scheduled;
    if residue.is_zero() {
        return Ok(());
    }

    let last = entries
        .last_mut()
        .ok_or_else(|| EngineError::validation("cannot reconcile an empty schedule"))?;
    let adjusted = last.amount_due + residue;
    if !adjusted.is_positive() {
        return Err(EngineError::validation(format!(
            "rounding residue {residue} exceeds the final installment"
        )));
    }
    last.amount_due = adjusted;
    Ok(())
}

/// mark an unpaid entry whose due date has passed; returns whether it changed
pub fn mark_overdue(entry: &mut ScheduleEntry, today: NaiveDate) -> bool {
    let sweepable = matches!(entry.status, ScheduleStatus::Pending | ScheduleStatus::Partial);
    if sweepable && entry.is_past_due(today) {
        entry.status = ScheduleStatus::Overdue;
        true
    } else {
        false
    }
}
