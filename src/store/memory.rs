use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use uuid::Uuid;

use crate::errors::{EngineError, Result};
use crate::state::{
    Borrower, CreditScoreSnapshot, KycDocument, Loan, Payment, RescoreRequest, ScheduleEntry,
};
use crate::types::{BorrowerId, DocumentId, LoanId, LoanStatus, PaymentId};

use super::{LedgerStore, LedgerTx};

#[derive(Debug, Clone, Default)]
struct Tables {
    borrowers: HashMap<BorrowerId, Borrower>,
    documents: HashMap<DocumentId, KycDocument>,
    loans: HashMap<LoanId, Loan>,
    schedules: HashMap<LoanId, Vec<ScheduleEntry>>,
    payments: HashMap<PaymentId, Payment>,
    snapshots: Vec<CreditScoreSnapshot>,
    rescores: Vec<RescoreRequest>,
}

/// mutex-guarded tables; transactions run on a copy swapped in on success
///
/// The lock is held for the whole transaction, so operations on the same
/// loan are serialized.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    tables: Mutex<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Tables>> {
        self.tables.lock().map_err(|_| EngineError::StoreUnavailable {
            message: "ledger tables poisoned".to_string(),
        })
    }
}

impl LedgerStore for InMemoryStore {
    fn transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut dyn LedgerTx) -> Result<T>,
    {
        let mut guard = self.lock()?;
        let mut working = guard.clone();
        let value = f(&mut working)?;
        *guard = working;
        Ok(value)
    }

    fn read<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&dyn LedgerTx) -> Result<T>,
    {
        let guard = self.lock()?;
        f(&*guard)
    }
}

impl LedgerTx for Tables {
    fn borrower(&self, id: BorrowerId) -> Result<Borrower> {
        self.borrowers
            .get(&id)
            .cloned()
            .ok_or_else(|| EngineError::not_found("borrower", id))
    }

    fn borrower_by_external_ref(&self, external_ref: &str) -> Option<Borrower> {
        self.borrowers
            .values()
            .find(|b| b.external_ref == external_ref)
            .cloned()
    }

    fn put_borrower(&mut self, borrower: Borrower) -> Result<()> {
        self.borrowers.insert(borrower.id, borrower);
        Ok(())
    }

    fn kyc_document(&self, id: DocumentId) -> Result<KycDocument> {
        self.documents
            .get(&id)
            .cloned()
            .ok_or_else(|| EngineError::not_found("kyc document", id))
    }

    fn kyc_documents(&self, borrower_id: BorrowerId) -> Vec<KycDocument> {
        let mut docs: Vec<KycDocument> = self
            .documents
            .values()
            .filter(|d| d.borrower_id == borrower_id)
            .cloned()
            .collect();
        docs.sort_by_key(|d| d.submitted_at);
        docs
    }

    fn put_kyc_document(&mut self, document: KycDocument) -> Result<()> {
        self.documents.retain(|id, d| {
            *id == document.id
                || d.borrower_id != document.borrower_id
                || d.doc_type != document.doc_type
        });
        self.documents.insert(document.id, document);
        Ok(())
    }

    fn loan(&self, id: LoanId) -> Result<Loan> {
        self.loans
            .get(&id)
            .cloned()
            .ok_or_else(|| EngineError::not_found("loan", id))
    }

    fn loans_for_borrower(&self, borrower_id: BorrowerId) -> Vec<Loan> {
        let mut loans: Vec<Loan> = self
            .loans
            .values()
            .filter(|l| l.borrower_id == borrower_id)
            .cloned()
            .collect();
        loans.sort_by_key(|l| l.applied_at);
        loans
    }

    fn active_loans(&self) -> Vec<Loan> {
        let mut loans: Vec<Loan> = self
            .loans
            .values()
            .filter(|l| l.status == LoanStatus::Active)
            .cloned()
            .collect();
        loans.sort_by_key(|l| l.applied_at);
        loans
    }

    fn put_loan(&mut self, loan: Loan) -> Result<()> {
        if !self.borrowers.contains_key(&loan.borrower_id) {
            return Err(EngineError::not_found("borrower", loan.borrower_id));
        }
        self.loans.insert(loan.id, loan);
        Ok(())
    }

    fn insert_schedule(&mut self, loan_id: LoanId, mut entries: Vec<ScheduleEntry>) -> Result<()> {
        if !self.loans.contains_key(&loan_id) {
            return Err(EngineError::not_found("loan", loan_id));
        }
        if self.schedules.contains_key(&loan_id) {
            return Err(EngineError::Conflict {
                message: format!("loan {loan_id} already has a schedule"),
            });
        }
        if entries.iter().any(|e| e.loan_id != loan_id) {
            return Err(EngineError::Conflict {
                message: format!("schedule batch for loan {loan_id} contains foreign entries"),
            });
        }
        entries.sort_by_key(|e| e.week_number);
        if entries.windows(2).any(|w| w[0].week_number == w[1].week_number) {
            return Err(EngineError::Conflict {
                message: format!("duplicate week number in schedule for loan {loan_id}"),
            });
        }
        self.schedules.insert(loan_id, entries);
        Ok(())
    }

    fn schedule(&self, loan_id: LoanId) -> Vec<ScheduleEntry> {
        self.schedules.get(&loan_id).cloned().unwrap_or_default()
    }

    fn update_schedule_entry(&mut self, entry: ScheduleEntry) -> Result<()> {
        let slot = self
            .schedules
            .get_mut(&entry.loan_id)
            .and_then(|entries| entries.iter_mut().find(|e| e.id == entry.id))
            .ok_or_else(|| EngineError::not_found("schedule entry", entry.id))?;
        if slot.week_number != entry.week_number || slot.due_date != entry.due_date {
            return Err(EngineError::Conflict {
                message: format!("schedule entry {} cannot be reordered", entry.id),
            });
        }
        *slot = entry;
        Ok(())
    }

    fn payment(&self, id: PaymentId) -> Result<Payment> {
        self.payments
            .get(&id)
            .cloned()
            .ok_or_else(|| EngineError::not_found("payment", id))
    }

    fn payments_for_loan(&self, loan_id: LoanId) -> Vec<Payment> {
        let mut payments: Vec<Payment> = self
            .payments
            .values()
            .filter(|p| p.loan_id == loan_id)
            .cloned()
            .collect();
        payments.sort_by_key(|p| p.initiated_at);
        payments
    }

    fn payments_for_borrower(&self, borrower_id: BorrowerId) -> Vec<Payment> {
        let mut payments: Vec<Payment> = self
            .payments
            .values()
            .filter(|p| p.borrower_id == borrower_id)
            .cloned()
            .collect();
        payments.sort_by_key(|p| p.initiated_at);
        payments
    }

    fn put_payment(&mut self, payment: Payment) -> Result<()> {
        if !self.loans.contains_key(&payment.loan_id) {
            return Err(EngineError::not_found("loan", payment.loan_id));
        }
        self.payments.insert(payment.id, payment);
        Ok(())
    }

    fn append_snapshot(&mut self, snapshot: CreditScoreSnapshot) -> Result<()> {
        if self.snapshots.iter().any(|s| s.id == snapshot.id) {
            return Err(EngineError::Conflict {
                message: format!("snapshot {} already recorded", snapshot.id),
            });
        }
        self.snapshots.push(snapshot);
        Ok(())
    }

    fn snapshots(&self, borrower_id: BorrowerId) -> Vec<CreditScoreSnapshot> {
        self.snapshots
            .iter()
            .filter(|s| s.borrower_id == borrower_id)
            .cloned()
            .collect()
    }

    fn enqueue_rescore(&mut self, request: RescoreRequest) -> Result<()> {
        self.rescores.push(request);
        Ok(())
    }

    fn pending_rescores(&self) -> Vec<RescoreRequest> {
        self.rescores.clone()
    }

    fn remove_rescore(&mut self, id: Uuid) -> Result<()> {
        let before = self.rescores.len();
        self.rescores.retain(|r| r.id != id);
        if self.rescores.len() == before {
            return Err(EngineError::not_found("rescore request", id));
        }
        Ok(())
    }
}
