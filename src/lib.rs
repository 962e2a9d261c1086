pub mod config;
pub mod decimal;
pub mod eligibility;
pub mod engine;
pub mod errors;
pub mod events;
pub mod kyc;
pub mod loans;
pub mod payments;
pub mod rail;
pub mod scoring;
pub mod state;
pub mod store;
pub mod telemetry;
pub mod types;
pub mod views;

// re-export key types
pub use config::{EligibilityPolicy, EngineConfig, LoanLimits, RatingTable, ScoringConfig, TelemetryMode};
pub use decimal::{Money, Rate};
pub use eligibility::{EligibilityDecision, EligibilityEvaluator, IneligibilityReason};
pub use engine::{LedgerEngine, RailOutcome};
pub use errors::{EngineError, Result};
pub use events::{InMemoryNotificationSink, Notification, NotificationSink, Outbox};
pub use loans::{Amortization, LoanAmortizer, LoanApplication, ScheduleGenerator};
pub use payments::{AllocationOutcome, CreditApplication, PaymentAllocator, RefundOutcome};
pub use rail::{Checkout, CheckoutRequest, InMemoryPaymentRail, PaymentRail, RailEvent, RailStatus};
pub use scoring::{BorrowerHistory, CreditScorer, ScoreBreakdown, ScoreComponents};
pub use state::{
    Allocation, Borrower, CreditScoreSnapshot, KycDocument, Loan, Payment, RescoreRequest,
    ScheduleEntry,
};
pub use store::{InMemoryStore, LedgerStore, LedgerTx};
pub use telemetry::{
    telemetry_from_config, DriverFeed, DriverPerformance, InMemoryTelemetry, TelemetryProvider,
    TripFeedTelemetry, TripSummary,
};
pub use types::{
    AccountStatus, ApprovalOverrides, BorrowerId, CreditRating, DocumentStatus, DocumentType,
    KycDecision, KycStatus, LoanId, LoanStatus, PaymentId, PaymentMethod, PaymentStatus,
    ScheduleStatus, Score,
};
pub use views::LoanView;

// re-export external dependencies that users will need
pub use chrono;
pub use hourglass_rs::{SafeTimeProvider, TimeSource};
pub use rust_decimal::Decimal;
pub use uuid::Uuid;
