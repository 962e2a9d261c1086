/// quick start - register a driver, verify kyc, borrow
use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use driver_credit_rs::{
    ApprovalOverrides, DocumentType, EngineConfig, InMemoryNotificationSink, InMemoryPaymentRail,
    InMemoryStore, InMemoryTelemetry, KycDecision, LedgerEngine, LoanApplication, Money,
    SafeTimeProvider, TimeSource,
};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let time = SafeTimeProvider::new(TimeSource::Test(
        Utc.with_ymd_and_hms(2026, 1, 5, 8, 0, 0).unwrap(),
    ));
    let controller = time.test_control().unwrap();

    let sink = Arc::new(InMemoryNotificationSink::new());
    let engine = LedgerEngine::new(
        InMemoryStore::new(),
        EngineConfig::default(),
        Box::new(InMemoryTelemetry::new()),
        Box::new(InMemoryPaymentRail::new()),
        Box::new(sink.clone()),
    )?;

    // register and verify
    let driver = engine.register_borrower("drv-0001", "254711000001", &time)?;
    for doc_type in [DocumentType::NationalId, DocumentType::DriversLicense, DocumentType::Selfie] {
        let doc = engine.submit_kyc_document(driver.id, doc_type, &time)?;
        engine.review_kyc_document(doc.id, KycDecision::Approve, &time)?;
    }

    // accounts must be 30 days old before borrowing
    controller.advance(Duration::days(31));
    let decision = engine.evaluate_eligibility(driver.id, &time)?;
    println!(
        "eligible: {} (rating {}, up to {})",
        decision.eligible, decision.rating, decision.max_loan_amount
    );

    let loan = engine.apply_for_loan(
        driver.id,
        LoanApplication::new(Money::from_major(60_000), 12, "tyres and service"),
        &time,
    )?;
    engine.approve_loan(loan.id, "ops@desk", ApprovalOverrides::default(), &time)?;
    engine.disburse_loan(loan.id, &time)?;

    println!("{}", engine.loan_view(loan.id)?.to_json_pretty()?);
    println!("{} notification(s) queued for delivery", sink.delivered().len());

    Ok(())
}
