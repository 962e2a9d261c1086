use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::decimal::Money;
use crate::errors::{EngineError, Result};
use crate::types::{BorrowerId, CreditRating, DocumentType, LoanId, PaymentId, Score};

/// notification intents emitted by the engine; rendering is left to the sink
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Notification {
    // loan events
    LoanApproved {
        borrower_id: BorrowerId,
        loan_id: LoanId,
        principal: Money,
        total_repayment: Money,
        weekly_payment: Money,
        term_weeks: u32,
        timestamp: DateTime<Utc>,
    },
    LoanRejected {
        borrower_id: BorrowerId,
        loan_id: LoanId,
        reason: String,
        timestamp: DateTime<Utc>,
    },
    LoanDisbursed {
        borrower_id: BorrowerId,
        loan_id: LoanId,
        amount: Money,
        timestamp: DateTime<Utc>,
    },
    LoanCompleted {
        borrower_id: BorrowerId,
        loan_id: LoanId,
        timestamp: DateTime<Utc>,
    },
    LoanDefaulted {
        borrower_id: BorrowerId,
        loan_id: LoanId,
        outstanding: Money,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    // kyc events
    KycApproved {
        borrower_id: BorrowerId,
        timestamp: DateTime<Utc>,
    },
    KycRejected {
        borrower_id: BorrowerId,
        doc_type: DocumentType,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    // scoring events
    CreditScoreChanged {
        borrower_id: BorrowerId,
        old_score: Score,
        new_score: Score,
        old_rating: CreditRating,
        new_rating: CreditRating,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    // payment events
    PaymentSucceeded {
        borrower_id: BorrowerId,
        loan_id: LoanId,
        payment_id: PaymentId,
        amount: Money,
        outstanding: Money,
        timestamp: DateTime<Utc>,
    },
    PaymentFailed {
        borrower_id: BorrowerId,
        loan_id: LoanId,
        payment_id: PaymentId,
        amount: Money,
        reason: String,
        timestamp: DateTime<Utc>,
    },
    PaymentRefunded {
        borrower_id: BorrowerId,
        loan_id: LoanId,
        payment_id: PaymentId,
        amount: Money,
        timestamp: DateTime<Utc>,
    },
}

impl Notification {
    /// borrower the notification is addressed to
    pub fn borrower_id(&self) -> BorrowerId {
        match self {
            Notification::LoanApproved { borrower_id, .. }
            | Notification::LoanRejected { borrower_id, .. }
            | Notification::LoanDisbursed { borrower_id, .. }
            | Notification::LoanCompleted { borrower_id, .. }
            | Notification::LoanDefaulted { borrower_id, .. }
            | Notification::KycApproved { borrower_id, .. }
            | Notification::KycRejected { borrower_id, .. }
            | Notification::CreditScoreChanged { borrower_id, .. }
            | Notification::PaymentSucceeded { borrower_id, .. }
            | Notification::PaymentFailed { borrower_id, .. }
            | Notification::PaymentRefunded { borrower_id, .. } => *borrower_id,
        }
    }

    /// short kind label for logs
    pub fn kind(&self) -> &'static str {
        match self {
            Notification::LoanApproved { .. } => "loan_approved",
            Notification::LoanRejected { .. } => "loan_rejected",
            Notification::LoanDisbursed { .. } => "loan_disbursed",
            Notification::LoanCompleted { .. } => "loan_completed",
            Notification::LoanDefaulted { .. } => "loan_defaulted",
            Notification::KycApproved { .. } => "kyc_approved",
            Notification::KycRejected { .. } => "kyc_rejected",
            Notification::CreditScoreChanged { .. } => "credit_score_changed",
            Notification::PaymentSucceeded { .. } => "payment_succeeded",
            Notification::PaymentFailed { .. } => "payment_failed",
            Notification::PaymentRefunded { .. } => "payment_refunded",
        }
    }
}

/// notifications collected during one operation, dispatched after commit
#[derive(Debug, Default)]
pub struct Outbox {
    pending: Vec<Notification>,
}

impl Outbox {
    pub fn new() -> Self {
        Self {
            pending: Vec::new(),
        }
    }

    pub fn emit(&mut self, notification: Notification) {
        self.pending.push(notification);
    }

    pub fn take(&mut self) -> Vec<Notification> {
        std::mem::take(&mut self.pending)
    }

    pub fn pending(&self) -> &[Notification] {
        &self.pending
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// delivery layer for notification intents
pub trait NotificationSink: Send + Sync {
    fn deliver(&self, notification: &Notification) -> Result<()>;
}

/// deliver every notification, logging failures instead of returning them
pub fn dispatch(sink: &dyn NotificationSink, notifications: Vec<Notification>) {
    for notification in notifications {
        match sink.deliver(&notification) {
            Ok(()) => tracing::debug!(
                kind = notification.kind(),
                borrower_id = %notification.borrower_id(),
                "notification delivered"
            ),
            Err(err) => tracing::warn!(
                kind = notification.kind(),
                borrower_id = %notification.borrower_id(),
                error = %err,
                "notification delivery failed"
            ),
        }
    }
}

/// sink that records everything it receives
#[derive(Debug, Default)]
pub struct InMemoryNotificationSink {
    delivered: Mutex<Vec<Notification>>,
}

impl InMemoryNotificationSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// snapshot of delivered notifications, oldest first
    pub fn delivered(&self) -> Vec<Notification> {
        self.delivered
            .lock()
            .map(|d| d.clone())
            .unwrap_or_default()
    }

    pub fn clear(&self) {
        if let Ok(mut delivered) = self.delivered.lock() {
            delivered.clear();
        }
    }
}

impl NotificationSink for InMemoryNotificationSink {
    fn deliver(&self, notification: &Notification) -> Result<()> {
        let mut delivered = self.delivered.lock().map_err(|_| EngineError::ExternalDependency {
            service: "notifications",
            message: "sink poisoned".to_string(),
        })?;
        delivered.push(notification.clone());
        Ok(())
    }
}

impl<T: NotificationSink + ?Sized> NotificationSink for std::sync::Arc<T> {
    fn deliver(&self, notification: &Notification) -> Result<()> {
        (**self).deliver(notification)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hourglass_rs::{SafeTimeProvider, TimeSource};
    use std::sync::Arc;
    use uuid::Uuid;

    struct RefusingSink;

    impl NotificationSink for RefusingSink {
        fn deliver(&self, _notification: &Notification) -> Result<()> {
            Err(EngineError::ExternalDependency {
                service: "notifications",
                message: "smtp down".to_string(),
            })
        }
    }

    fn approved(time: &SafeTimeProvider) -> Notification {
        Notification::KycApproved {
            borrower_id: Uuid::new_v4(),
            timestamp: time.now(),
        }
    }

    #[test]
    fn test_outbox_take_drains() {
        let time = SafeTimeProvider::new(TimeSource::Test(Utc::now()));
        let mut outbox = Outbox::new();
        outbox.emit(approved(&time));
        outbox.emit(approved(&time));
        assert_eq!(outbox.pending().len(), 2);

        let taken = outbox.take();
        assert_eq!(taken.len(), 2);
        assert!(outbox.is_empty());
    }

    #[test]
    fn test_dispatch_records_in_order() {
        let time = SafeTimeProvider::new(TimeSource::Test(Utc::now()));
        let sink = Arc::new(InMemoryNotificationSink::new());
        let first = approved(&time);
        let second = approved(&time);

        dispatch(&sink, vec![first.clone(), second.clone()]);
        assert_eq!(sink.delivered(), vec![first, second]);

        sink.clear();
        assert!(sink.delivered().is_empty());
    }

    #[test]
    fn test_dispatch_survives_sink_failure() {
        let time = SafeTimeProvider::new(TimeSource::Test(Utc::now()));
        // must not panic or propagate
        dispatch(&RefusingSink, vec![approved(&time)]);
    }

    #[test]
    fn test_notification_kind_and_recipient() {
        let borrower_id = Uuid::new_v4();
        let n = Notification::CreditScoreChanged {
            borrower_id,
            old_score: 500,
            new_score: 735,
            old_rating: CreditRating::C,
            new_rating: CreditRating::B,
            reason: "payment processed".to_string(),
            timestamp: Utc::now(),
        };
        assert_eq!(n.kind(), "credit_score_changed");
        assert_eq!(n.borrower_id(), borrower_id);
    }
}
