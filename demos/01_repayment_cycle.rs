/// repayment cycle - checkout, rail callbacks, overdue sweep, refund
use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use driver_credit_rs::{
    ApprovalOverrides, DocumentType, DriverPerformance, EngineConfig, InMemoryNotificationSink,
    InMemoryPaymentRail, InMemoryStore, InMemoryTelemetry, KycDecision, LedgerEngine,
    LoanApplication, Money, PaymentMethod, RailOutcome, RailStatus, Rate, SafeTimeProvider, TimeSource,
};
use rust_decimal_macros::dec;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    println!("=== repayment cycle ===\n");

    let time = SafeTimeProvider::new(TimeSource::Test(
        Utc.with_ymd_and_hms(2026, 3, 2, 8, 0, 0).unwrap(),
    ));
    let controller = time.test_control().unwrap();

    let telemetry = InMemoryTelemetry::new().with_driver(
        "drv-0042",
        DriverPerformance {
            avg_rating: dec!(4.9),
            acceptance_rate: Rate::from_percentage(92),
            completed_trips: 1_940,
            total_trips: 2_000,
        },
    );
    let rail = Arc::new(InMemoryPaymentRail::new());
    let sink = Arc::new(InMemoryNotificationSink::new());
    let engine = LedgerEngine::new(
        InMemoryStore::new(),
        EngineConfig::default(),
        Box::new(telemetry),
        Box::new(rail.clone()),
        Box::new(sink.clone()),
    )?;

    let driver = engine.register_borrower("drv-0042", "254722000042", &time)?;
    for doc_type in [DocumentType::NationalId, DocumentType::DriversLicense, DocumentType::Selfie] {
        let doc = engine.submit_kyc_document(driver.id, doc_type, &time)?;
        engine.review_kyc_document(doc.id, KycDecision::Approve, &time)?;
    }
    controller.advance(Duration::days(45));

    let loan = engine.apply_for_loan(
        driver.id,
        LoanApplication::new(Money::from_major(40_000), 4, "fuel float"),
        &time,
    )?;
    let loan = engine.approve_loan(loan.id, "ops@desk", ApprovalOverrides::default(), &time)?;
    engine.disburse_loan(loan.id, &time)?;
    println!(
        "loan {}: {} over {} weeks, {} per week",
        loan.id, loan.total_repayment, loan.term_weeks, loan.weekly_payment
    );

    // week one paid on time through the rail
    controller.advance(Duration::days(6));
    let payment = engine.initiate_payment(loan.id, loan.weekly_payment, PaymentMethod::MobileMoney, &time)?;
    if let Some(event) = rail.settle(&payment.id.to_string(), RailStatus::Success) {
        let outcome = engine.handle_rail_event(event.clone(), &time)?;
        println!("rail event applied: {outcome:?}");
        // redelivery is a no-op
        let again = engine.handle_rail_event(event, &time)?;
        println!("redelivery ignored: {}", matches!(again, RailOutcome::Duplicate(_)));
    }

    // week two fails at the rail
    controller.advance(Duration::days(7));
    let failed = engine.initiate_payment(loan.id, loan.weekly_payment, PaymentMethod::MobileMoney, &time)?;
    if let Some(event) = rail.settle(&failed.id.to_string(), RailStatus::Failed) {
        engine.handle_rail_event(event, &time)?;
    }

    // a few days later week two is overdue
    controller.advance(Duration::days(3));
    let marked = engine.sweep_overdue(time.now().date_naive())?;
    println!("\n{marked} installment(s) marked overdue");

    // catch up with one larger payment, then refund it
    let catch_up = engine.initiate_payment(loan.id, Money::from_major(15_000), PaymentMethod::MobileMoney, &time)?;
    let catch_up = engine.apply_payment(catch_up.id, Some("manual-reconcile-1".to_string()), &time)?;
    println!("catch-up spread over {} installment(s)", catch_up.allocations.len());

    let refunded = engine.refund_payment(catch_up.id, "duplicate charge", &time)?;
    println!("refunded {} ({:?})", refunded.amount, refunded.status);

    let view = engine.loan_view(loan.id)?;
    println!("\n{}", view.to_json_pretty()?);

    let history = engine.score_history(driver.id)?;
    println!("\nscore history:");
    for snapshot in history {
        println!("  {} {:>4} {}  ({})", snapshot.created_at.format("%Y-%m-%d"), snapshot.total, snapshot.rating, snapshot.reason);
    }
    println!("\n{} notification(s) delivered", sink.delivered().len());

    Ok(())
}
