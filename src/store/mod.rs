pub mod memory;

use uuid::Uuid;

use crate::errors::Result;
use crate::state::{
    Borrower, CreditScoreSnapshot, KycDocument, Loan, Payment, RescoreRequest, ScheduleEntry,
};
use crate::types::{BorrowerId, DocumentId, LoanId, PaymentId};

pub use memory::InMemoryStore;

/// reads and writes visible inside one transaction
pub trait LedgerTx {
    // borrowers
    fn borrower(&self, id: BorrowerId) -> Result<Borrower>;
    fn borrower_by_external_ref(&self, external_ref: &str) -> Option<Borrower>;
    fn put_borrower(&mut self, borrower: Borrower) -> Result<()>;

    // kyc
    fn kyc_document(&self, id: DocumentId) -> Result<KycDocument>;
    fn kyc_documents(&self, borrower_id: BorrowerId) -> Vec<KycDocument>;
    /// replaces any earlier document of the same type for the borrower
    fn put_kyc_document(&mut self, document: KycDocument) -> Result<()>;

    // loans
    fn loan(&self, id: LoanId) -> Result<Loan>;
    /// oldest application first
    fn loans_for_borrower(&self, borrower_id: BorrowerId) -> Vec<Loan>;
    fn active_loans(&self) -> Vec<Loan>;
    fn put_loan(&mut self, loan: Loan) -> Result<()>;

    // schedule
    /// batch insert; `Conflict` when the loan already has a schedule
    fn insert_schedule(&mut self, loan_id: LoanId, entries: Vec<ScheduleEntry>) -> Result<()>;
    /// ascending week number
    fn schedule(&self, loan_id: LoanId) -> Vec<ScheduleEntry>;
    /// entries must already exist; only status and paid amounts change
    fn update_schedule_entry(&mut self, entry: ScheduleEntry) -> Result<()>;

    // payments
    fn payment(&self, id: PaymentId) -> Result<Payment>;
    fn payments_for_loan(&self, loan_id: LoanId) -> Vec<Payment>;
    fn payments_for_borrower(&self, borrower_id: BorrowerId) -> Vec<Payment>;
    fn put_payment(&mut self, payment: Payment) -> Result<()>;

    // score history
    fn append_snapshot(&mut self, snapshot: CreditScoreSnapshot) -> Result<()>;
    /// oldest first
    fn snapshots(&self, borrower_id: BorrowerId) -> Vec<CreditScoreSnapshot>;

    // rescore queue
    fn enqueue_rescore(&mut self, request: RescoreRequest) -> Result<()>;
    /// oldest first
    fn pending_rescores(&self) -> Vec<RescoreRequest>;
    fn remove_rescore(&mut self, id: Uuid) -> Result<()>;
}

/// transactional store with read-your-writes inside a transaction
pub trait LedgerStore: Send + Sync {
    /// run `f` atomically; `Ok` commits, `Err` rolls back
    fn transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut dyn LedgerTx) -> Result<T>;

    /// read-only view
    fn read<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&dyn LedgerTx) -> Result<T>;
}
