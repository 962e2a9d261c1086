use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::decimal::{Money, Rate};
use crate::scoring::ScoreComponents;
use crate::types::{
    AccountStatus, BorrowerId, CreditRating, DocumentId, DocumentStatus, DocumentType, KycStatus,
    LoanId, LoanStatus, PaymentId, PaymentMethod, PaymentStatus, ScheduleEntryId, ScheduleStatus,
    Score, SnapshotId,
};

/// a registered driver
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Borrower {
    pub id: BorrowerId,
    /// identifier used by the telemetry provider
    pub external_ref: String,
    /// payer reference handed to the payment rail (e.g. msisdn)
    pub payer_ref: String,
    pub account_status: AccountStatus,
    pub kyc_status: KycStatus,
    /// current pointer into the snapshot log
    pub credit_score: Score,
    pub credit_rating: CreditRating,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Borrower {
    pub fn new(
        external_ref: String,
        payer_ref: String,
        seed_score: Score,
        seed_rating: CreditRating,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            external_ref,
            payer_ref,
            account_status: AccountStatus::Active,
            kyc_status: KycStatus::NotStarted,
            credit_score: seed_score,
            credit_rating: seed_rating,
            created_at: now,
            updated_at: now,
        }
    }

    /// whole days since registration
    pub fn account_age_days(&self, now: DateTime<Utc>) -> i64 {
        (now - self.created_at).num_days().max(0)
    }
}

/// a submitted identity document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KycDocument {
    pub id: DocumentId,
    pub borrower_id: BorrowerId,
    pub doc_type: DocumentType,
    pub status: DocumentStatus,
    pub submitted_at: DateTime<Utc>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
}

/// immutable record of one score calculation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreditScoreSnapshot {
    pub id: SnapshotId,
    pub borrower_id: BorrowerId,
    pub total: Score,
    pub rating: CreditRating,
    pub components: ScoreComponents,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

impl CreditScoreSnapshot {
    pub fn capture(
        borrower_id: BorrowerId,
        total: Score,
        rating: CreditRating,
        components: ScoreComponents,
        reason: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            borrower_id,
            total,
            rating,
            components,
            reason: reason.into(),
            created_at: now,
        }
    }
}

/// a microloan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Loan {
    pub id: LoanId,
    pub borrower_id: BorrowerId,
    pub principal: Money,
    pub interest_rate: Rate,
    pub term_weeks: u32,
    /// fixed once approved
    pub total_repayment: Money,
    /// fixed once approved
    pub weekly_payment: Money,
    pub amount_paid: Money,
    /// money received beyond `total_repayment`, held rather than allocated
    pub credit_balance: Money,
    pub status: LoanStatus,
    pub purpose: String,
    pub applied_at: DateTime<Utc>,
    pub approved_at: Option<DateTime<Utc>>,
    pub approved_by: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub disbursed_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
    pub default_reason: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl Loan {
    /// remaining amount owed
    pub fn outstanding_balance(&self) -> Money {
        self.total_repayment.saturating_sub(self.amount_paid)
    }

    pub fn is_fully_repaid(&self) -> bool {
        self.amount_paid >= self.total_repayment
    }
}

/// one weekly installment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleEntry {
    pub id: ScheduleEntryId,
    pub loan_id: LoanId,
    pub week_number: u32,
    pub due_date: NaiveDate,
    pub amount_due: Money,
    pub amount_paid: Money,
    pub status: ScheduleStatus,
    pub paid_at: Option<DateTime<Utc>>,
}

impl ScheduleEntry {
    pub fn outstanding(&self) -> Money {
        self.amount_due.saturating_sub(self.amount_paid)
    }

    pub fn is_past_due(&self, today: NaiveDate) -> bool {
        today > self.due_date
    }
}

/// the part of a payment applied to one schedule entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Allocation {
    pub entry_id: ScheduleEntryId,
    pub week_number: u32,
    pub amount: Money,
    /// entry state before this allocation, restored on refund
    pub prior_status: ScheduleStatus,
    pub prior_paid_at: Option<DateTime<Utc>>,
}

/// a repayment attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    pub loan_id: LoanId,
    pub borrower_id: BorrowerId,
    pub amount: Money,
    pub method: PaymentMethod,
    pub status: PaymentStatus,
    /// installment targeted at initiation, then the first entry touched
    pub schedule_entry_id: Option<ScheduleEntryId>,
    pub allocations: Vec<Allocation>,
    /// amount held as loan credit instead of allocated
    pub unallocated: Money,
    pub provider_ref: Option<String>,
    pub provider_transaction_id: Option<String>,
    pub failure_reason: Option<String>,
    pub refund_reason: Option<String>,
    pub initiated_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub refunded_at: Option<DateTime<Utc>>,
}

impl Payment {
    pub fn new(
        loan: &Loan,
        amount: Money,
        method: PaymentMethod,
        target_entry: Option<ScheduleEntryId>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            loan_id: loan.id,
            borrower_id: loan.borrower_id,
            amount,
            method,
            status: PaymentStatus::Pending,
            schedule_entry_id: target_entry,
            allocations: Vec::new(),
            unallocated: Money::ZERO,
            provider_ref: None,
            provider_transaction_id: None,
            failure_reason: None,
            refund_reason: None,
            initiated_at: now,
            processed_at: None,
            refunded_at: None,
        }
    }

    /// total applied to schedule entries
    pub fn allocated(&self) -> Money {
        self.allocations.iter().map(|a| a.amount).sum()
    }
}

/// queued request to recalculate a borrower's score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RescoreRequest {
    pub id: Uuid,
    pub borrower_id: BorrowerId,
    pub reason: String,
    pub requested_at: DateTime<Utc>,
}

impl RescoreRequest {
    pub fn new(borrower_id: BorrowerId, reason: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            borrower_id,
            reason: reason.into(),
            requested_at: now,
        }
    }
}
