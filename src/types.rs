use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::decimal::Money;

pub type BorrowerId = Uuid;
pub type LoanId = Uuid;
pub type ScheduleEntryId = Uuid;
pub type PaymentId = Uuid;
pub type DocumentId = Uuid;
pub type SnapshotId = Uuid;

/// credit score on the 0-1000 scale
pub type Score = u16;

pub const MAX_SCORE: Score = 1000;

/// borrower account status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountStatus {
    Active,
    Suspended,
    /// soft-deleted; the record is kept
    Deleted,
}

/// borrower kyc status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KycStatus {
    NotStarted,
    Pending,
    Verified,
    Rejected,
}

/// letter grade derived from the score; `A` is best
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum CreditRating {
    A,
    B,
    C,
    D,
    E,
}

/// loan lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoanStatus {
    /// application received, awaiting admin decision
    Pending,
    /// approved with schedule generated, not yet disbursed
    Approved,
    Rejected,
    /// disbursed and repaying
    Active,
    Completed,
    Defaulted,
}

impl LoanStatus {
    /// statuses counted as an open loan for the one-open-loan policy
    pub fn is_open(&self) -> bool {
        matches!(self, LoanStatus::Pending | LoanStatus::Approved | LoanStatus::Active)
    }
}

/// schedule entry status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScheduleStatus {
    Pending,
    Partial,
    Paid,
    Overdue,
}

impl ScheduleStatus {
    /// entries the allocator may still apply money to
    pub fn is_outstanding(&self) -> bool {
        matches!(
            self,
            ScheduleStatus::Pending | ScheduleStatus::Partial | ScheduleStatus::Overdue
        )
    }
}

/// payment status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentStatus {
    Pending,
    Success,
    Failed,
    Refunded,
}

/// payment channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentMethod {
    MobileMoney,
    BankTransfer,
    Cash,
}

/// kyc document kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DocumentType {
    NationalId,
    DriversLicense,
    Selfie,
}

/// kyc document review status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DocumentStatus {
    Pending,
    Approved,
    Rejected,
}

/// admin decision on a kyc document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum KycDecision {
    Approve,
    Reject { reason: String },
}

/// admin adjustments applied at approval time
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApprovalOverrides {
    pub principal: Option<Money>,
    pub term_weeks: Option<u32>,
    pub interest_rate: Option<crate::decimal::Rate>,
}

macro_rules! display_as_debug {
    ($($t:ty),*) => {
        $(
            impl fmt::Display for $t {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    fmt::Debug::fmt(self, f)
                }
            }
        )*
    };
}

display_as_debug!(
    AccountStatus,
    KycStatus,
    CreditRating,
    LoanStatus,
    ScheduleStatus,
    PaymentStatus,
    DocumentType,
    DocumentStatus
);
