/// serializable summaries of ledger state
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::decimal::Money;
use crate::state::{Loan, ScheduleEntry};
use crate::types::{BorrowerId, LoanId, LoanStatus, ScheduleStatus};

/// serializable view of a loan and its repayment progress
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoanView {
    pub id: LoanId,
    pub borrower_id: BorrowerId,
    pub status: LoanStatus,
    pub purpose: String,
    pub terms: TermsView,
    pub balance: BalanceView,
    pub progress: ProgressView,
    pub next_due: Option<InstallmentView>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TermsView {
    pub principal: Money,
    /// annual, in percent
    pub interest_rate_pct: Decimal,
    pub term_weeks: u32,
    pub total_repayment: Money,
    pub weekly_payment: Money,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceView {
    pub amount_paid: Money,
    pub outstanding: Money,
    pub credit_balance: Money,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressView {
    pub installments_total: usize,
    pub installments_paid: usize,
    pub installments_partial: usize,
    pub installments_overdue: usize,
    pub scheduled_outstanding: Money,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstallmentView {
    pub week_number: u32,
    pub due_date: NaiveDate,
    pub amount_due: Money,
    pub outstanding: Money,
    pub status: ScheduleStatus,
}

impl LoanView {
    pub fn from_loan(loan: &Loan, schedule: &[ScheduleEntry]) -> Self {
        let count = |status: ScheduleStatus| schedule.iter().filter(|e| e.status == status).count();

        let next_due = schedule
            .iter()
            .filter(|e| e.status.is_outstanding())
            .min_by_key(|e| e.week_number)
            .map(|e| InstallmentView {
                week_number: e.week_number,
                due_date: e.due_date,
                amount_due: e.amount_due,
                outstanding: e.outstanding(),
                status: e.status,
            });

        LoanView {
            id: loan.id,
            borrower_id: loan.borrower_id,
            status: loan.status,
            purpose: loan.purpose.clone(),
            terms: TermsView {
                principal: loan.principal,
                interest_rate_pct: loan.interest_rate.as_percentage().normalize(),
                term_weeks: loan.term_weeks,
                total_repayment: loan.total_repayment,
                weekly_payment: loan.weekly_payment,
                start_date: loan.start_date,
                end_date: loan.end_date,
            },
            balance: BalanceView {
                amount_paid: loan.amount_paid,
                outstanding: loan.outstanding_balance(),
                credit_balance: loan.credit_balance,
            },
            progress: ProgressView {
                installments_total: schedule.len(),
                installments_paid: count(ScheduleStatus::Paid),
                installments_partial: count(ScheduleStatus::Partial),
                installments_overdue: count(ScheduleStatus::Overdue),
                scheduled_outstanding: schedule.iter().map(|e| e.outstanding()).sum(),
            },
            next_due,
        }
    }

    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
