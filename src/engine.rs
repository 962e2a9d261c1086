use chrono::{Duration, NaiveDate};
use hourglass_rs::SafeTimeProvider;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::decimal::Money;
use crate::eligibility::{EligibilityDecision, EligibilityEvaluator, IneligibilityReason};
use crate::errors::{EngineError, Result};
use crate::events::{dispatch, Notification, NotificationSink, Outbox};
use crate::kyc;
use crate::loans::{Amortization, LoanAmortizer, LoanApplication, LoanEvent, ScheduleGenerator};
use crate::loans::schedule::mark_overdue;
use crate::payments::{
    mark_failed, oldest_outstanding, reverse_payment, CreditApplication, PaymentAllocator,
};
use crate::rail::{CheckoutRequest, PaymentRail, RailEvent, RailStatus};
use crate::scoring::{BorrowerHistory, CreditScorer};
use crate::state::{
    Borrower, CreditScoreSnapshot, KycDocument, Loan, Payment, RescoreRequest, ScheduleEntry,
};
use crate::store::{LedgerStore, LedgerTx};
use crate::telemetry::{lookup_performance, DriverPerformance, TelemetryProvider};
use crate::types::{
    AccountStatus, ApprovalOverrides, BorrowerId, CreditRating, DocumentId, DocumentType,
    KycDecision, KycStatus, LoanId, LoanStatus, PaymentId, PaymentMethod, PaymentStatus,
};
use crate::views::LoanView;

pub const REASON_REGISTRATION: &str = "initial registration";
pub const REASON_KYC_VERIFIED: &str = "kyc verified";
pub const REASON_LOAN_APPROVED: &str = "loan approved";
pub const REASON_PAYMENT_PROCESSED: &str = "payment processed";
pub const REASON_PAYMENT_REFUNDED: &str = "payment refunded";
pub const REASON_LOAN_DEFAULTED: &str = "loan defaulted";

/// what a rail event did
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RailOutcome {
    Applied(Payment),
    Failed(Payment),
    /// already terminal with the same outcome; nothing changed
    Duplicate(Payment),
}

/// ledger engine over a transactional store
///
/// each state change runs in one store transaction; notifications go out
/// and queued rescores run only after it commits
pub struct LedgerEngine<S: LedgerStore> {
    store: S,
    config: EngineConfig,
    scorer: CreditScorer,
    eligibility: EligibilityEvaluator,
    amortizer: LoanAmortizer,
    schedules: ScheduleGenerator,
    allocator: PaymentAllocator,
    telemetry: Box<dyn TelemetryProvider>,
    rail: Box<dyn PaymentRail>,
    notifications: Box<dyn NotificationSink>,
}

impl<S: LedgerStore> LedgerEngine<S> {
    pub fn new(
        store: S,
        config: EngineConfig,
        telemetry: Box<dyn TelemetryProvider>,
        rail: Box<dyn PaymentRail>,
        notifications: Box<dyn NotificationSink>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            scorer: CreditScorer::from_config(&config),
            eligibility: EligibilityEvaluator::from_config(&config),
            amortizer: LoanAmortizer::new(),
            schedules: ScheduleGenerator::new(),
            allocator: PaymentAllocator::new(),
            store,
            config,
            telemetry,
            rail,
            notifications,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// run `op` in a transaction, then dispatch its notifications and drain rescoring
    fn commit<T, F>(&self, time: &SafeTimeProvider, op: F) -> Result<T>
    where
        F: FnOnce(&mut dyn LedgerTx, &mut Outbox) -> Result<T>,
    {
        let mut outbox = Outbox::new();
        let value = self.store.transaction(|tx| op(tx, &mut outbox))?;
        dispatch(self.notifications.as_ref(), outbox.take());
        if let Err(err) = self.process_rescore_queue(time) {
            warn!(error = %err, "rescore queue left for retry");
        }
        Ok(value)
    }

    pub fn register_borrower(
        &self,
        external_ref: &str,
        payer_ref: &str,
        time: &SafeTimeProvider,
    ) -> Result<Borrower> {
        let external_ref = external_ref.trim();
        let payer_ref = payer_ref.trim();
        if external_ref.is_empty() || payer_ref.is_empty() {
            return Err(EngineError::validation("external and payer references are required"));
        }

        let now = time.now();
        let seed = self.scorer.seed();
        let borrower = self.commit(time, |tx, _| {
            if tx.borrower_by_external_ref(external_ref).is_some() {
                return Err(EngineError::Conflict {
                    message: format!("driver {external_ref} is already registered"),
                });
            }
            let borrower = Borrower::new(
                external_ref.to_string(),
                payer_ref.to_string(),
                seed.total,
                seed.rating,
                now,
            );
            tx.put_borrower(borrower.clone())?;
            tx.append_snapshot(CreditScoreSnapshot::capture(
                borrower.id,
                seed.total,
                seed.rating,
                seed.components,
                REASON_REGISTRATION,
                now,
            ))?;
            Ok(borrower)
        })?;

        info!(borrower_id = %borrower.id, score = borrower.credit_score, "borrower registered");
        Ok(borrower)
    }

    pub fn set_account_status(
        &self,
        borrower_id: BorrowerId,
        status: AccountStatus,
        time: &SafeTimeProvider,
    ) -> Result<Borrower> {
        let now = time.now();
        let borrower = self.commit(time, |tx, _| {
            let mut borrower = tx.borrower(borrower_id)?;
            if borrower.account_status == status {
                return Ok(borrower);
            }
            if borrower.account_status == AccountStatus::Deleted {
                return Err(EngineError::InvalidTransition {
                    entity: "borrower",
                    current: borrower.account_status.to_string(),
                    attempted: format!("set {status}"),
                });
            }
            borrower.account_status = status;
            borrower.updated_at = now;
            tx.put_borrower(borrower.clone())?;
            Ok(borrower)
        })?;

        info!(borrower_id = %borrower_id, status = %borrower.account_status, "account status set");
        Ok(borrower)
    }

    pub fn submit_kyc_document(
        &self,
        borrower_id: BorrowerId,
        doc_type: DocumentType,
        time: &SafeTimeProvider,
    ) -> Result<KycDocument> {
        let now = time.now();
        let document = self.commit(time, |tx, _| {
            let mut borrower = tx.borrower(borrower_id)?;
            ensure_not_deleted(&borrower, "submit kyc document")?;

            let document = kyc::new_document(borrower_id, doc_type, now);
            tx.put_kyc_document(document.clone())?;

            borrower.kyc_status = kyc::derive_kyc_status(&tx.kyc_documents(borrower_id));
            borrower.updated_at = now;
            tx.put_borrower(borrower)?;
            Ok(document)
        })?;

        debug!(borrower_id = %borrower_id, doc_type = %doc_type, "kyc document submitted");
        Ok(document)
    }

    pub fn review_kyc_document(
        &self,
        document_id: DocumentId,
        decision: KycDecision,
        time: &SafeTimeProvider,
    ) -> Result<KycDocument> {
        let now = time.now();
        let document = self.commit(time, |tx, outbox| {
            let mut document = tx.kyc_document(document_id)?;
            kyc::review(&mut document, &decision, now)?;
            tx.put_kyc_document(document.clone())?;

            let mut borrower = tx.borrower(document.borrower_id)?;
            let previous = borrower.kyc_status;
            borrower.kyc_status = kyc::derive_kyc_status(&tx.kyc_documents(borrower.id));
            borrower.updated_at = now;

            if let KycDecision::Reject { reason } = &decision {
                outbox.emit(Notification::KycRejected {
                    borrower_id: borrower.id,
                    doc_type: document.doc_type,
                    reason: reason.trim().to_string(),
                    timestamp: now,
                });
            }
            if borrower.kyc_status == KycStatus::Verified && previous != KycStatus::Verified {
                tx.enqueue_rescore(RescoreRequest::new(borrower.id, REASON_KYC_VERIFIED, now))?;
                outbox.emit(Notification::KycApproved {
                    borrower_id: borrower.id,
                    timestamp: now,
                });
            }
            tx.put_borrower(borrower)?;
            Ok(document)
        })?;

        info!(
            borrower_id = %document.borrower_id,
            doc_type = %document.doc_type,
            status = %document.status,
            "kyc document reviewed"
        );
        Ok(document)
    }

    /// score now and append a snapshot, outside the queue
    pub fn recalculate_score(
        &self,
        borrower_id: BorrowerId,
        reason: &str,
        time: &SafeTimeProvider,
    ) -> Result<CreditScoreSnapshot> {
        self.rescore(borrower_id, reason, None, time)
    }

    /// drain queued rescore requests; failures stay queued
    pub fn process_rescore_queue(&self, time: &SafeTimeProvider) -> Result<usize> {
        let pending = self.store.read(|tx| Ok(tx.pending_rescores()))?;
        let mut processed = 0;
        for request in pending {
            match self.rescore(request.borrower_id, &request.reason, Some(request.id), time) {
                Ok(_) => processed += 1,
                Err(err) => warn!(
                    borrower_id = %request.borrower_id,
                    reason = %request.reason,
                    error = %err,
                    "rescore failed, request kept"
                ),
            }
        }
        Ok(processed)
    }

    fn rescore(
        &self,
        borrower_id: BorrowerId,
        reason: &str,
        request_id: Option<Uuid>,
        time: &SafeTimeProvider,
    ) -> Result<CreditScoreSnapshot> {
        let now = time.now();
        let external_ref = self
            .store
            .read(|tx| tx.borrower(borrower_id).map(|b| b.external_ref))?;
        // outside the transaction: external call
        let driving = lookup_performance(self.telemetry.as_ref(), &external_ref);

        let mut outbox = Outbox::new();
        let snapshot = self.store.transaction(|tx| {
            let mut borrower = tx.borrower(borrower_id)?;
            let history = load_history(&*tx, borrower.clone(), driving);
            let breakdown = self.scorer.score(&history, now);
            let snapshot = CreditScoreSnapshot::capture(
                borrower_id,
                breakdown.total,
                breakdown.rating,
                breakdown.components,
                reason,
                now,
            );
            tx.append_snapshot(snapshot.clone())?;

            if breakdown.total != borrower.credit_score {
                outbox.emit(Notification::CreditScoreChanged {
                    borrower_id,
                    old_score: borrower.credit_score,
                    new_score: breakdown.total,
                    old_rating: borrower.credit_rating,
                    new_rating: breakdown.rating,
                    reason: reason.to_string(),
                    timestamp: now,
                });
            }
            borrower.credit_score = breakdown.total;
            borrower.credit_rating = breakdown.rating;
            borrower.updated_at = now;
            tx.put_borrower(borrower)?;

            if let Some(id) = request_id {
                tx.remove_rescore(id)?;
            }
            Ok(snapshot)
        })?;
        dispatch(self.notifications.as_ref(), outbox.take());

        info!(
            borrower_id = %borrower_id,
            score = snapshot.total,
            rating = %snapshot.rating,
            reason,
            "credit score recalculated"
        );
        Ok(snapshot)
    }

    pub fn evaluate_eligibility(
        &self,
        borrower_id: BorrowerId,
        time: &SafeTimeProvider,
    ) -> Result<EligibilityDecision> {
        let now = time.now();
        self.store.read(|tx| {
            let borrower = tx.borrower(borrower_id)?;
            let loans = tx.loans_for_borrower(borrower_id);
            Ok(self.eligibility.evaluate(&borrower, &loans, now))
        })
    }

    /// application-time amortization for a rating, nothing persisted
    pub fn preview_loan(
        &self,
        amount: Money,
        term_weeks: u32,
        rating: CreditRating,
    ) -> Result<Amortization> {
        self.config.limits.check(amount, term_weeks)?;
        let rate = self.config.ratings.interest_rate(rating).ok_or_else(|| {
            EngineError::PolicyViolation {
                reasons: vec![format!("rating {rating} carries no loan offer")],
            }
        })?;
        self.amortizer.compute(amount, rate, term_weeks)
    }

    pub fn apply_for_loan(
        &self,
        borrower_id: BorrowerId,
        application: LoanApplication,
        time: &SafeTimeProvider,
    ) -> Result<Loan> {
        self.config.limits.check(application.amount, application.term_weeks)?;
        let purpose = application.purpose.trim().to_string();
        if purpose.is_empty() {
            return Err(EngineError::validation("a loan purpose is required"));
        }

        let now = time.now();
        let max_open = self.eligibility.policy().max_active_loans;
        let loan = self.commit(time, |tx, _| {
            let borrower = tx.borrower(borrower_id)?;
            let loans = tx.loans_for_borrower(borrower_id);
            let mut decision = self.eligibility.evaluate(&borrower, &loans, now);

            let open = loans.iter().filter(|l| l.status.is_open()).count();
            let active_limit_reported = decision
                .reasons
                .iter()
                .any(|r| matches!(r, IneligibilityReason::TooManyActiveLoans { .. }));
            if open >= max_open && !active_limit_reported {
                decision.reasons.push(IneligibilityReason::OpenLoanLimit {
                    open,
                    maximum: max_open,
                });
            }
            if application.amount > decision.max_loan_amount {
                decision.reasons.push(IneligibilityReason::AmountAboveMaximum {
                    requested: application.amount,
                    maximum: decision.max_loan_amount,
                });
            }
            if !decision.reasons.is_empty() {
                info!(
                    borrower_id = %borrower_id,
                    reasons = decision.reasons.len(),
                    "loan application declined"
                );
                return Err(decision.into_violation());
            }

            let rate = decision.interest_rate.ok_or_else(|| EngineError::PolicyViolation {
                reasons: vec![format!("rating {} carries no loan offer", decision.rating)],
            })?;
            let terms = self
                .amortizer
                .compute(application.amount, rate, application.term_weeks)?;

            let loan = Loan {
                id: Uuid::new_v4(),
                borrower_id,
                principal: terms.principal,
                interest_rate: terms.interest_rate,
                term_weeks: terms.term_weeks,
                total_repayment: terms.total_repayment,
                weekly_payment: terms.weekly_payment,
                amount_paid: Money::ZERO,
                credit_balance: Money::ZERO,
                status: LoanStatus::Pending,
                purpose,
                applied_at: now,
                approved_at: None,
                approved_by: None,
                start_date: None,
                end_date: None,
                disbursed_at: None,
                closed_at: None,
                rejection_reason: None,
                default_reason: None,
                updated_at: now,
            };
            tx.put_loan(loan.clone())?;
            Ok(loan)
        })?;

        info!(
            borrower_id = %borrower_id,
            loan_id = %loan.id,
            principal = %loan.principal,
            rate = %loan.interest_rate,
            "loan application received"
        );
        Ok(loan)
    }

    pub fn approve_loan(
        &self,
        loan_id: LoanId,
        admin: &str,
        overrides: ApprovalOverrides,
        time: &SafeTimeProvider,
    ) -> Result<Loan> {
        let admin = admin.trim();
        if admin.is_empty() {
            return Err(EngineError::validation("approving admin is required"));
        }

        let now = time.now();
        let loan = self.commit(time, |tx, outbox| {
            let mut loan = tx.loan(loan_id)?;
            let next = loan.status.transition(LoanEvent::Approve)?;

            let borrower = tx.borrower(loan.borrower_id)?;
            let minimum = self.eligibility.policy().min_credit_score;
            if borrower.credit_score < minimum {
                let reason = IneligibilityReason::ScoreTooLow {
                    score: borrower.credit_score,
                    minimum,
                };
                return Err(EngineError::PolicyViolation {
                    reasons: vec![reason.summary()],
                });
            }

            let principal = overrides.principal.unwrap_or(loan.principal);
            let term_weeks = overrides.term_weeks.unwrap_or(loan.term_weeks);
            let rate = overrides.interest_rate.unwrap_or(loan.interest_rate);
            self.config.limits.check(principal, term_weeks)?;
            let terms = self.amortizer.compute(principal, rate, term_weeks)?;

            let start = now.date_naive();
            let end = start + Duration::days(7 * i64::from(term_weeks));
            let entries = self.schedules.generate_reconciled(
                loan.id,
                start,
                term_weeks,
                terms.weekly_payment,
                terms.total_repayment,
            )?;

            loan.principal = terms.principal;
            loan.interest_rate = terms.interest_rate;
            loan.term_weeks = terms.term_weeks;
            loan.total_repayment = terms.total_repayment;
            loan.weekly_payment = terms.weekly_payment;
            loan.status = next;
            loan.approved_at = Some(now);
            loan.approved_by = Some(admin.to_string());
            loan.start_date = Some(start);
            loan.end_date = Some(end);
            loan.updated_at = now;

            tx.put_loan(loan.clone())?;
            tx.insert_schedule(loan.id, entries)?;
            tx.enqueue_rescore(RescoreRequest::new(loan.borrower_id, REASON_LOAN_APPROVED, now))?;
            outbox.emit(Notification::LoanApproved {
                borrower_id: loan.borrower_id,
                loan_id: loan.id,
                principal: loan.principal,
                total_repayment: loan.total_repayment,
                weekly_payment: loan.weekly_payment,
                term_weeks: loan.term_weeks,
                timestamp: now,
            });
            Ok(loan)
        })?;

        info!(
            loan_id = %loan.id,
            borrower_id = %loan.borrower_id,
            admin,
            total_repayment = %loan.total_repayment,
            "loan approved"
        );
        Ok(loan)
    }

    pub fn reject_loan(&self, loan_id: LoanId, reason: &str, time: &SafeTimeProvider) -> Result<Loan> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(EngineError::validation("a rejection reason is required"));
        }

        let now = time.now();
        let loan = self.commit(time, |tx, outbox| {
            let mut loan = tx.loan(loan_id)?;
            loan.status = loan.status.transition(LoanEvent::Reject)?;
            loan.rejection_reason = Some(reason.to_string());
            loan.closed_at = Some(now);
            loan.updated_at = now;
            tx.put_loan(loan.clone())?;
            outbox.emit(Notification::LoanRejected {
                borrower_id: loan.borrower_id,
                loan_id,
                reason: reason.to_string(),
                timestamp: now,
            });
            Ok(loan)
        })?;

        info!(loan_id = %loan_id, reason, "loan rejected");
        Ok(loan)
    }

    pub fn disburse_loan(&self, loan_id: LoanId, time: &SafeTimeProvider) -> Result<Loan> {
        let now = time.now();
        let loan = self.commit(time, |tx, outbox| {
            let mut loan = tx.loan(loan_id)?;
            loan.status = loan.status.transition(LoanEvent::Disburse)?;
            loan.disbursed_at = Some(now);
            loan.updated_at = now;
            tx.put_loan(loan.clone())?;
            outbox.emit(Notification::LoanDisbursed {
                borrower_id: loan.borrower_id,
                loan_id,
                amount: loan.principal,
                timestamp: now,
            });
            Ok(loan)
        })?;

        info!(loan_id = %loan_id, amount = %loan.principal, "loan disbursed");
        Ok(loan)
    }

    /// externally triggered default of an active loan
    pub fn mark_defaulted(&self, loan_id: LoanId, reason: &str, time: &SafeTimeProvider) -> Result<Loan> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(EngineError::validation("a default reason is required"));
        }

        let now = time.now();
        let loan = self.commit(time, |tx, outbox| {
            let mut loan = tx.loan(loan_id)?;
            loan.status = loan.status.transition(LoanEvent::Default)?;
            loan.default_reason = Some(reason.to_string());
            loan.closed_at = Some(now);
            loan.updated_at = now;
            tx.put_loan(loan.clone())?;
            tx.enqueue_rescore(RescoreRequest::new(loan.borrower_id, REASON_LOAN_DEFAULTED, now))?;
            outbox.emit(Notification::LoanDefaulted {
                borrower_id: loan.borrower_id,
                loan_id,
                outstanding: loan.outstanding_balance(),
                reason: reason.to_string(),
                timestamp: now,
            });
            Ok(loan)
        })?;

        warn!(loan_id = %loan_id, outstanding = %loan.outstanding_balance(), "loan defaulted");
        Ok(loan)
    }

    /// mark unpaid installments past their due date as overdue
    pub fn sweep_overdue(&self, today: NaiveDate) -> Result<usize> {
        let marked = self.store.transaction(|tx| {
            let mut marked = 0;
            for loan in tx.active_loans() {
                for mut entry in tx.schedule(loan.id) {
                    if mark_overdue(&mut entry, today) {
                        tx.update_schedule_entry(entry)?;
                        marked += 1;
                    }
                }
            }
            Ok(marked)
        })?;

        debug!(%today, marked, "overdue sweep finished");
        Ok(marked)
    }

    /// create a pending payment and open a checkout with the rail
    pub fn initiate_payment(
        &self,
        loan_id: LoanId,
        amount: Money,
        method: PaymentMethod,
        time: &SafeTimeProvider,
    ) -> Result<Payment> {
        if !amount.is_positive() {
            return Err(EngineError::validation(format!(
                "payment amount must be positive, got {amount}"
            )));
        }

        let now = time.now();
        let payment = self.commit(time, |tx, _| {
            let loan = tx.loan(loan_id)?;
            if loan.status != LoanStatus::Active {
                return Err(EngineError::InvalidTransition {
                    entity: "loan",
                    current: loan.status.to_string(),
                    attempted: "accept payment".to_string(),
                });
            }
            let outstanding = loan.outstanding_balance();
            if amount > outstanding {
                return Err(EngineError::validation(format!(
                    "payment {amount} exceeds the outstanding balance {outstanding}"
                )));
            }

            let borrower = tx.borrower(loan.borrower_id)?;
            let schedule = tx.schedule(loan_id);
            let target = oldest_outstanding(&schedule).map(|e| e.id);
            let mut payment = Payment::new(&loan, amount, method, target, now);

            let checkout = self.rail.initiate_checkout(&CheckoutRequest {
                amount,
                currency: self.config.currency.clone(),
                payer_ref: borrower.payer_ref.clone(),
                description: format!("repayment for loan {loan_id}"),
                client_reference: payment.id.to_string(),
            })?;
            payment.provider_ref = Some(checkout.provider_ref);
            tx.put_payment(payment.clone())?;
            Ok(payment)
        })?;

        info!(loan_id = %loan_id, payment_id = %payment.id, amount = %amount, "payment initiated");
        Ok(payment)
    }

    /// consume a terminal status reported by the rail
    pub fn handle_rail_event(&self, event: RailEvent, time: &SafeTimeProvider) -> Result<RailOutcome> {
        let payment_id = Uuid::parse_str(&event.client_reference).map_err(|_| {
            EngineError::validation(format!("unknown client reference {}", event.client_reference))
        })?;
        let payment = self.store.read(|tx| tx.payment(payment_id))?;

        match (payment.status, event.status) {
            (PaymentStatus::Pending, _) => {}
            (PaymentStatus::Success | PaymentStatus::Refunded, RailStatus::Success)
            | (PaymentStatus::Failed, RailStatus::Failed) => {
                debug!(payment_id = %payment_id, transaction_id = %event.transaction_id, "duplicate rail event");
                return Ok(RailOutcome::Duplicate(payment));
            }
            (current, reported) => {
                return Err(EngineError::InvalidTransition {
                    entity: "payment",
                    current: current.to_string(),
                    attempted: format!("settle as {reported:?}"),
                });
            }
        }

        match event.status {
            RailStatus::Success => {
                if event.currency != self.config.currency || event.amount != payment.amount {
                    return Err(EngineError::validation(format!(
                        "rail reported {} {} for payment {} of {} {}",
                        event.amount, event.currency, payment_id, payment.amount, self.config.currency
                    )));
                }
                self.apply_payment(payment_id, Some(event.transaction_id), time)
                    .map(RailOutcome::Applied)
            }
            RailStatus::Failed => self
                .mark_payment_failed(payment_id, "payment rail reported failure", time)
                .map(RailOutcome::Failed),
        }
    }

    /// settle a pending payment and allocate it oldest installment first
    pub fn apply_payment(
        &self,
        payment_id: PaymentId,
        transaction_id: Option<String>,
        time: &SafeTimeProvider,
    ) -> Result<Payment> {
        let now = time.now();
        let payment = self.commit(time, |tx, outbox| {
            let mut payment = tx.payment(payment_id)?;
            let mut loan = tx.loan(payment.loan_id)?;
            if !matches!(
                loan.status,
                LoanStatus::Active | LoanStatus::Completed | LoanStatus::Defaulted
            ) {
                return Err(EngineError::InvalidTransition {
                    entity: "loan",
                    current: loan.status.to_string(),
                    attempted: "settle payment".to_string(),
                });
            }

            let mut schedule = tx.schedule(loan.id);
            let outcome = self
                .allocator
                .apply(&mut loan, &mut schedule, &mut payment, now)?;
            if transaction_id.is_some() {
                payment.provider_transaction_id = transaction_id;
            }

            for allocation in &outcome.allocations {
                if let Some(entry) = schedule.iter().find(|e| e.id == allocation.entry_id) {
                    tx.update_schedule_entry(entry.clone())?;
                }
            }
            tx.put_loan(loan.clone())?;
            tx.put_payment(payment.clone())?;
            tx.enqueue_rescore(RescoreRequest::new(loan.borrower_id, REASON_PAYMENT_PROCESSED, now))?;

            outbox.emit(Notification::PaymentSucceeded {
                borrower_id: loan.borrower_id,
                loan_id: loan.id,
                payment_id,
                amount: payment.amount,
                outstanding: loan.outstanding_balance(),
                timestamp: now,
            });
            if outcome.loan_completed {
                outbox.emit(Notification::LoanCompleted {
                    borrower_id: loan.borrower_id,
                    loan_id: loan.id,
                    timestamp: now,
                });
            }
            if outcome.held_as_credit.is_positive() {
                warn!(
                    loan_id = %loan.id,
                    payment_id = %payment_id,
                    credit = %outcome.held_as_credit,
                    "payment exceeded balance, excess held as credit"
                );
            }
            Ok(payment)
        })?;

        info!(
            payment_id = %payment_id,
            loan_id = %payment.loan_id,
            amount = %payment.amount,
            allocations = payment.allocations.len(),
            "payment applied"
        );
        Ok(payment)
    }

    pub fn mark_payment_failed(
        &self,
        payment_id: PaymentId,
        reason: &str,
        time: &SafeTimeProvider,
    ) -> Result<Payment> {
        let now = time.now();
        let payment = self.commit(time, |tx, outbox| {
            let mut payment = tx.payment(payment_id)?;
            mark_failed(&mut payment, reason, now)?;
            tx.put_payment(payment.clone())?;
            outbox.emit(Notification::PaymentFailed {
                borrower_id: payment.borrower_id,
                loan_id: payment.loan_id,
                payment_id,
                amount: payment.amount,
                reason: payment.failure_reason.clone().unwrap_or_default(),
                timestamp: now,
            });
            Ok(payment)
        })?;

        info!(payment_id = %payment_id, reason = %reason.trim(), "payment failed");
        Ok(payment)
    }

    /// reverse a successful payment's allocations
    pub fn refund_payment(
        &self,
        payment_id: PaymentId,
        reason: &str,
        time: &SafeTimeProvider,
    ) -> Result<Payment> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(EngineError::validation("a refund reason is required"));
        }

        let now = time.now();
        let payment = self.commit(time, |tx, outbox| {
            let mut payment = tx.payment(payment_id)?;
            let mut loan = tx.loan(payment.loan_id)?;
            let mut schedule = tx.schedule(loan.id);

            let outcome = reverse_payment(&mut loan, &mut schedule, &mut payment, reason, now)?;

            // a reopened loan draws on credit other payments left behind
            let mut holders: Vec<Payment> = tx
                .payments_for_loan(loan.id)
                .into_iter()
                .filter(|p| p.id != payment_id)
                .collect();
            let credit = if loan.status == LoanStatus::Active && loan.credit_balance.is_positive() {
                self.allocator
                    .apply_held_credit(&mut loan, &mut schedule, &mut holders, now)?
            } else {
                CreditApplication::default()
            };

            for entry in &schedule {
                tx.update_schedule_entry(entry.clone())?;
            }
            for holder in holders.into_iter().filter(|p| credit.payments.contains(&p.id)) {
                tx.put_payment(holder)?;
            }
            tx.put_loan(loan.clone())?;
            tx.put_payment(payment.clone())?;
            tx.enqueue_rescore(RescoreRequest::new(loan.borrower_id, REASON_PAYMENT_REFUNDED, now))?;
            outbox.emit(Notification::PaymentRefunded {
                borrower_id: loan.borrower_id,
                loan_id: loan.id,
                payment_id,
                amount: payment.amount,
                timestamp: now,
            });
            if outcome.loan_reopened {
                info!(loan_id = %loan.id, "refund reopened completed loan");
            }
            if credit.amount.is_positive() {
                info!(
                    loan_id = %loan.id,
                    applied = %credit.amount,
                    outstanding = %loan.outstanding_balance(),
                    "held credit applied to reopened loan"
                );
            }
            if credit.loan_completed {
                outbox.emit(Notification::LoanCompleted {
                    borrower_id: loan.borrower_id,
                    loan_id: loan.id,
                    timestamp: now,
                });
            }
            Ok(payment)
        })?;

        info!(payment_id = %payment_id, amount = %payment.amount, reason, "payment refunded");
        Ok(payment)
    }

    pub fn borrower(&self, borrower_id: BorrowerId) -> Result<Borrower> {
        self.store.read(|tx| tx.borrower(borrower_id))
    }

    pub fn kyc_documents(&self, borrower_id: BorrowerId) -> Result<Vec<KycDocument>> {
        self.store.read(|tx| {
            tx.borrower(borrower_id)?;
            Ok(tx.kyc_documents(borrower_id))
        })
    }

    pub fn loan(&self, loan_id: LoanId) -> Result<Loan> {
        self.store.read(|tx| tx.loan(loan_id))
    }

    pub fn loans_for_borrower(&self, borrower_id: BorrowerId) -> Result<Vec<Loan>> {
        self.store.read(|tx| Ok(tx.loans_for_borrower(borrower_id)))
    }

    pub fn schedule(&self, loan_id: LoanId) -> Result<Vec<ScheduleEntry>> {
        self.store.read(|tx| {
            tx.loan(loan_id)?;
            Ok(tx.schedule(loan_id))
        })
    }

    pub fn payment(&self, payment_id: PaymentId) -> Result<Payment> {
        self.store.read(|tx| tx.payment(payment_id))
    }

    pub fn payments_for_loan(&self, loan_id: LoanId) -> Result<Vec<Payment>> {
        self.store.read(|tx| Ok(tx.payments_for_loan(loan_id)))
    }

    /// append-only score history, oldest first
    pub fn score_history(&self, borrower_id: BorrowerId) -> Result<Vec<CreditScoreSnapshot>> {
        self.store.read(|tx| Ok(tx.snapshots(borrower_id)))
    }

    pub fn pending_rescores(&self) -> Result<Vec<RescoreRequest>> {
        self.store.read(|tx| Ok(tx.pending_rescores()))
    }

    pub fn loan_view(&self, loan_id: LoanId) -> Result<LoanView> {
        self.store.read(|tx| {
            let loan = tx.loan(loan_id)?;
            Ok(LoanView::from_loan(&loan, &tx.schedule(loan_id)))
        })
    }
}

fn ensure_not_deleted(borrower: &Borrower, attempted: &str) -> Result<()> {
    if borrower.account_status == AccountStatus::Deleted {
        return Err(EngineError::InvalidTransition {
            entity: "borrower",
            current: borrower.account_status.to_string(),
            attempted: attempted.to_string(),
        });
    }
    Ok(())
}

fn load_history(
    tx: &dyn LedgerTx,
    borrower: Borrower,
    driving: Option<DriverPerformance>,
) -> BorrowerHistory {
    let loans = tx.loans_for_borrower(borrower.id);
    let schedule = loans.iter().flat_map(|l| tx.schedule(l.id)).collect();
    BorrowerHistory {
        payments: tx.payments_for_borrower(borrower.id),
        documents: tx.kyc_documents(borrower.id),
        borrower,
        loans,
        schedule,
        driving,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::InMemoryNotificationSink;
    use crate::rail::InMemoryPaymentRail;
    use crate::store::InMemoryStore;
    use crate::telemetry::InMemoryTelemetry;
    use chrono::{DateTime, TimeZone, Utc};
    use hourglass_rs::TimeSource;
    use std::sync::Arc;

    struct Harness {
        engine: LedgerEngine<InMemoryStore>,
        telemetry: Arc<InMemoryTelemetry>,
        rail: Arc<InMemoryPaymentRail>,
        sink: Arc<InMemoryNotificationSink>,
    }

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 5, 9, 0, 0).unwrap()
    }

    fn at(days: i64) -> SafeTimeProvider {
        SafeTimeProvider::new(TimeSource::Test(base() + Duration::days(days)))
    }

    fn harness() -> Harness {
        let telemetry = Arc::new(InMemoryTelemetry::new());
        let rail = Arc::new(InMemoryPaymentRail::new());
        let sink = Arc::new(InMemoryNotificationSink::new());
        let engine = LedgerEngine::new(
            InMemoryStore::new(),
            EngineConfig::default(),
            Box::new(telemetry.clone()),
            Box::new(rail.clone()),
            Box::new(sink.clone()),
        )
        .unwrap();
        Harness {
            engine,
            telemetry,
            rail,
            sink,
        }
    }

    fn verified_borrower(h: &Harness) -> Borrower {
        let engine = &h.engine;
        let borrower = engine.register_borrower("drv-100", "254711000100", &at(0)).unwrap();
        for doc_type in kyc::REQUIRED_DOCUMENTS {
            let doc = engine.submit_kyc_document(borrower.id, doc_type, &at(1)).unwrap();
            engine
                .review_kyc_document(doc.id, KycDecision::Approve, &at(2))
                .unwrap();
        }
        engine.borrower(borrower.id).unwrap()
    }

    #[test]
    fn test_registration_seeds_snapshot() {
        let h = harness();
        let borrower = h.engine.register_borrower("drv-1", "254700000001", &at(0)).unwrap();
        assert_eq!(borrower.credit_score, 500);
        assert_eq!(borrower.credit_rating, CreditRating::C);
        assert_eq!(borrower.kyc_status, KycStatus::NotStarted);

        let history = h.engine.score_history(borrower.id).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].reason, REASON_REGISTRATION);

        let dup = h.engine.register_borrower("drv-1", "254700000002", &at(0));
        assert!(matches!(dup, Err(EngineError::Conflict { .. })));
    }

    #[test]
    fn test_kyc_verification_triggers_rescore() {
        let h = harness();
        let borrower = verified_borrower(&h);
        assert_eq!(borrower.kyc_status, KycStatus::Verified);

        let history = h.engine.score_history(borrower.id).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].reason, REASON_KYC_VERIFIED);
        // 175 + 240 + 30 + 50 + 100
        assert_eq!(borrower.credit_score, 595);
        assert!(h.engine.pending_rescores().unwrap().is_empty());
        assert!(h
            .sink
            .delivered()
            .iter()
            .any(|n| matches!(n, Notification::KycApproved { .. })));
    }

    #[test]
    fn test_telemetry_outage_degrades_to_neutral() {
        let h = harness();
        let borrower = verified_borrower(&h);
        h.telemetry.set_unavailable(true);
        let snapshot = h
            .engine
            .recalculate_score(borrower.id, "manual", &at(3))
            .unwrap();
        assert_eq!(snapshot.components.driving_performance, 500);
    }

    #[test]
    fn test_rail_outage_rolls_back_payment() {
        let h = harness();
        let borrower = verified_borrower(&h);
        let loan = h
            .engine
            .apply_for_loan(
                borrower.id,
                LoanApplication::new(Money::from_major(50_000), 10, "tyres"),
                &at(40),
            )
            .unwrap();
        h.engine
            .approve_loan(loan.id, "ops", ApprovalOverrides::default(), &at(41))
            .unwrap();
        h.engine.disburse_loan(loan.id, &at(41)).unwrap();

        h.rail.set_offline(true);
        let err = h
            .engine
            .initiate_payment(loan.id, Money::from_major(1_000), PaymentMethod::MobileMoney, &at(45))
            .unwrap_err();
        assert!(err.is_retryable());
        assert!(h.engine.payments_for_loan(loan.id).unwrap().is_empty());
    }

    #[test]
    fn test_deleted_account_is_terminal() {
        let h = harness();
        let borrower = h.engine.register_borrower("drv-9", "254700000009", &at(0)).unwrap();
        h.engine
            .set_account_status(borrower.id, AccountStatus::Deleted, &at(1))
            .unwrap();
        assert!(h
            .engine
            .set_account_status(borrower.id, AccountStatus::Active, &at(2))
            .is_err());
        assert!(h
            .engine
            .submit_kyc_document(borrower.id, DocumentType::Selfie, &at(2))
            .is_err());
    }

    #[test]
    fn test_preview_uses_rating_rate() {
        let h = harness();
        let preview = h
            .engine
            .preview_loan(Money::from_major(500_000), 26, CreditRating::B)
            .unwrap();
        assert_eq!(preview.total_repayment, Money::from_major(537_500));
        assert!(h
            .engine
            .preview_loan(Money::from_major(500_000), 26, CreditRating::E)
            .is_err());
        assert!(h
            .engine
            .preview_loan(Money::from_major(500), 26, CreditRating::B)
            .is_err());
    }
}
