use std::collections::HashMap;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::config::{
    score_at_least, score_at_most, AccountAgeConfig, DrivingConfig, KycScoreConfig,
    PaymentHistoryConfig, UtilizationConfig,
};
use crate::decimal::Money;
use crate::state::{KycDocument, Loan, Payment, ScheduleEntry};
use crate::telemetry::DriverPerformance;
use crate::types::{
    DocumentStatus, DocumentType, LoanStatus, PaymentStatus, ScheduleEntryId, Score,
};

/// how a settled payment relates to its installment's due date
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Timeliness {
    OnTime,
    Late,
    Missed,
}

/// classify a payment against its due date; failed payments are always missed
pub fn classify_payment(
    payment: &Payment,
    due_date: NaiveDate,
    late_grace_days: i64,
) -> Option<Timeliness> {
    match payment.status {
        PaymentStatus::Failed => Some(Timeliness::Missed),
        PaymentStatus::Success => {
            let settled_on = payment.processed_at.unwrap_or(payment.initiated_at).date_naive();
            let days_late = (settled_on - due_date).num_days();
            Some(if days_late <= 0 {
                Timeliness::OnTime
            } else if days_late <= late_grace_days {
                Timeliness::Late
            } else {
                Timeliness::Missed
            })
        }
        PaymentStatus::Pending | PaymentStatus::Refunded => None,
    }
}

/// counts of classified payments
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelinessCounts {
    pub on_time: u32,
    pub late: u32,
    pub missed: u32,
}

impl TimelinessCounts {
    pub fn total(&self) -> u32 {
        self.on_time + self.late + self.missed
    }

    /// on-time share as a percentage; `None` when nothing was classified
    pub fn on_time_percentage(&self) -> Option<Decimal> {
        match self.total() {
            0 => None,
            total => Some(Decimal::from(self.on_time) * Decimal::ONE_HUNDRED / Decimal::from(total)),
        }
    }
}

/// tally payments that are tied to a known schedule entry
pub fn tally_payments(
    payments: &[Payment],
    schedule: &[ScheduleEntry],
    late_grace_days: i64,
) -> TimelinessCounts {
    let due_dates: HashMap<ScheduleEntryId, NaiveDate> =
        schedule.iter().map(|e| (e.id, e.due_date)).collect();

    let mut counts = TimelinessCounts::default();
    for payment in payments {
        let due = payment
            .schedule_entry_id
            .and_then(|entry_id| due_dates.get(&entry_id));
        let Some(due_date) = due else {
            continue;
        };
        match classify_payment(payment, *due_date, late_grace_days) {
            Some(Timeliness::OnTime) => counts.on_time += 1,
            Some(Timeliness::Late) => counts.late += 1,
            Some(Timeliness::Missed) => counts.missed += 1,
            None => {}
        }
    }
    counts
}

pub fn payment_history_score(
    payments: &[Payment],
    schedule: &[ScheduleEntry],
    config: &PaymentHistoryConfig,
) -> Score {
    let counts = tally_payments(payments, schedule, config.late_grace_days);
    match counts.on_time_percentage() {
        None => config.no_history_score,
        Some(pct) => score_at_least(&config.bands, pct).unwrap_or(config.floor_score),
    }
}

/// utilization percentage across active loans; `None` without active principal
pub fn utilization_percentage(loans: &[Loan]) -> Option<Decimal> {
    let active: Vec<&Loan> = loans
        .iter()
        .filter(|l| l.status == LoanStatus::Active)
        .collect();

    let principal: Money = active.iter().map(|l| l.principal).sum();
    if !principal.is_positive() {
        return None;
    }
    let paid: Money = active.iter().map(|l| l.amount_paid).sum();
    let outstanding = principal - paid;

    Some(outstanding.as_decimal() / principal.as_decimal() * Decimal::ONE_HUNDRED)
}

pub fn loan_utilization_score(loans: &[Loan], config: &UtilizationConfig) -> Score {
    match utilization_percentage(loans) {
        None => config.no_active_loans_score,
        Some(pct) => score_at_most(&config.bands, pct).unwrap_or(config.over_limit_score),
    }
}

pub fn account_age_score(age_days: i64, config: &AccountAgeConfig) -> Score {
    score_at_least(&config.bands, Decimal::from(age_days)).unwrap_or(config.floor_score)
}

pub fn driving_performance_score(
    performance: Option<&DriverPerformance>,
    config: &DrivingConfig,
) -> Score {
    let Some(perf) = performance else {
        return config.neutral_score;
    };

    let rating_points = score_at_least(&config.rating_bands, perf.avg_rating).unwrap_or(0);
    let acceptance_points =
        score_at_least(&config.acceptance_bands, perf.acceptance_rate.as_decimal()).unwrap_or(0);
    // no trips means no completion evidence
    let completion_points = perf
        .completion_rate()
        .and_then(|rate| score_at_least(&config.completion_bands, rate.as_decimal()))
        .unwrap_or(0);

    (rating_points + acceptance_points + completion_points).min(config.cap)
}

pub fn kyc_completeness_score(documents: &[KycDocument], config: &KycScoreConfig) -> Score {
    if documents.is_empty() {
        return config.none_submitted;
    }

    let approved = |doc_type: DocumentType| {
        documents
            .iter()
            .any(|d| d.doc_type == doc_type && d.status == DocumentStatus::Approved)
    };
    let id = approved(DocumentType::NationalId);
    let license = approved(DocumentType::DriversLicense);
    let selfie = approved(DocumentType::Selfie);

    if id && license && selfie {
        config.all_approved
    } else if id && license {
        config.id_and_license
    } else if id {
        config.id_only
    } else if documents.iter().any(|d| d.status == DocumentStatus::Pending) {
        config.any_pending
    } else {
        config.none_submitted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScoringConfig;
    use crate::decimal::Rate;
    use crate::types::{PaymentMethod, ScheduleStatus};
    use chrono::{Duration, TimeZone, Utc};
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn entry(week: u32, due: NaiveDate) -> ScheduleEntry {
        ScheduleEntry {
            id: Uuid::new_v4(),
            loan_id: Uuid::nil(),
            week_number: week,
            due_date: due,
            amount_due: Money::from_major(1_000),
            amount_paid: Money::ZERO,
            status: ScheduleStatus::Pending,
            paid_at: None,
        }
    }

    fn payment_for(entry: &ScheduleEntry, status: PaymentStatus, days_after_due: i64) -> Payment {
        let settled = Utc
            .from_utc_datetime(&entry.due_date.and_hms_opt(12, 0, 0).unwrap())
            + Duration::days(days_after_due);
        Payment {
            id: Uuid::new_v4(),
            loan_id: entry.loan_id,
            borrower_id: Uuid::nil(),
            amount: Money::from_major(1_000),
            method: PaymentMethod::MobileMoney,
            status,
            schedule_entry_id: Some(entry.id),
            allocations: Vec::new(),
            unallocated: Money::ZERO,
            provider_ref: None,
            provider_transaction_id: None,
            failure_reason: None,
            refund_reason: None,
            initiated_at: settled,
            processed_at: Some(settled),
            refunded_at: None,
        }
    }

    fn loan(status: LoanStatus, principal: i64, paid: i64) -> Loan {
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        Loan {
            id: Uuid::new_v4(),
            borrower_id: Uuid::nil(),
            principal: Money::from_major(principal),
            interest_rate: Rate::from_percentage(15),
            term_weeks: 10,
            total_repayment: Money::from_major(principal),
            weekly_payment: Money::from_major(principal / 10),
            amount_paid: Money::from_major(paid),
            credit_balance: Money::ZERO,
            status,
            purpose: "fuel".to_string(),
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
        }
    }

    fn document(doc_type: DocumentType, status: DocumentStatus) -> KycDocument {
        KycDocument {
            id: Uuid::new_v4(),
            borrower_id: Uuid::nil(),
            doc_type,
            status,
            submitted_at: Utc::now(),
            reviewed_at: None,
            rejection_reason: None,
        }
    }

    #[test]
    fn test_classification_boundaries() {
        let due = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
        let e = entry(1, due);
        let classify = |status, days| classify_payment(&payment_for(&e, status, days), due, 7);

        assert_eq!(classify(PaymentStatus::Success, -3), Some(Timeliness::OnTime));
        assert_eq!(classify(PaymentStatus::Success, 0), Some(Timeliness::OnTime));
        assert_eq!(classify(PaymentStatus::Success, 1), Some(Timeliness::Late));
        assert_eq!(classify(PaymentStatus::Success, 7), Some(Timeliness::Late));
        assert_eq!(classify(PaymentStatus::Success, 8), Some(Timeliness::Missed));
        assert_eq!(classify(PaymentStatus::Failed, 0), Some(Timeliness::Missed));
        assert_eq!(classify(PaymentStatus::Pending, 0), None);
        assert_eq!(classify(PaymentStatus::Refunded, 0), None);
    }

    #[test]
    fn test_nineteen_on_time_one_late_scores_900() {
        let config = ScoringConfig::default();
        let start = NaiveDate::from_ymd_opt(2026, 1, 5).unwrap();
        let schedule: Vec<ScheduleEntry> = (1..=20)
            .map(|w| entry(w, start + Duration::days(7 * w as i64)))
            .collect();

        let mut payments: Vec<Payment> = schedule[..19]
            .iter()
            .map(|e| payment_for(e, PaymentStatus::Success, 0))
            .collect();
        // exactly on the 7-day boundary counts as late, not missed
        payments.push(payment_for(&schedule[19], PaymentStatus::Success, 7));

        let counts = tally_payments(&payments, &schedule, 7);
        assert_eq!(counts.on_time, 19);
        assert_eq!(counts.late, 1);
        assert_eq!(counts.on_time_percentage(), Some(dec!(95)));
        assert_eq!(payment_history_score(&payments, &schedule, &config.payment_history), 900);
    }

    #[test]
    fn test_payment_history_bands() {
        let config = ScoringConfig::default().payment_history;
        let start = NaiveDate::from_ymd_opt(2026, 1, 5).unwrap();
        let schedule: Vec<ScheduleEntry> = (1..=10)
            .map(|w| entry(w, start + Duration::days(7 * w as i64)))
            .collect();

        let mixed = |on_time: usize| -> Vec<Payment> {
            schedule
                .iter()
                .enumerate()
                .map(|(i, e)| {
                    if i < on_time {
                        payment_for(e, PaymentStatus::Success, 0)
                    } else {
                        payment_for(e, PaymentStatus::Failed, 0)
                    }
                })
                .collect()
        };

        assert_eq!(payment_history_score(&mixed(10), &schedule, &config), 1000);
        assert_eq!(payment_history_score(&mixed(9), &schedule, &config), 800);
        assert_eq!(payment_history_score(&mixed(8), &schedule, &config), 600);
        assert_eq!(payment_history_score(&mixed(7), &schedule, &config), 400);
        assert_eq!(payment_history_score(&mixed(6), &schedule, &config), 200);
    }

    #[test]
    fn test_payment_history_neutral_without_classified_payments() {
        let config = ScoringConfig::default().payment_history;
        let due = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
        let e = entry(1, due);
        let mut untied = payment_for(&e, PaymentStatus::Success, 0);
        untied.schedule_entry_id = None;
        let pending = payment_for(&e, PaymentStatus::Pending, 0);

        assert_eq!(payment_history_score(&[], &[], &config), 500);
        assert_eq!(payment_history_score(&[untied, pending], &[e], &config), 500);
    }

    #[test]
    fn test_utilization_bands() {
        let config = ScoringConfig::default().utilization;

        assert_eq!(loan_utilization_score(&[], &config), 800);
        // closed loans are not utilization
        assert_eq!(
            loan_utilization_score(&[loan(LoanStatus::Completed, 100_000, 0)], &config),
            800
        );
        assert_eq!(
            loan_utilization_score(&[loan(LoanStatus::Active, 100_000, 75_000)], &config),
            1000
        );
        assert_eq!(
            loan_utilization_score(&[loan(LoanStatus::Active, 100_000, 50_000)], &config),
            800
        );
        assert_eq!(
            loan_utilization_score(&[loan(LoanStatus::Active, 100_000, 30_000)], &config),
            600
        );
        assert_eq!(
            loan_utilization_score(&[loan(LoanStatus::Active, 100_000, 0)], &config),
            400
        );
    }

    #[test]
    fn test_utilization_sums_across_active_loans() {
        let loans = vec![
            loan(LoanStatus::Active, 100_000, 100_000),
            loan(LoanStatus::Active, 100_000, 0),
            loan(LoanStatus::Pending, 500_000, 0),
        ];
        assert_eq!(utilization_percentage(&loans), Some(dec!(50)));
    }

    #[test]
    fn test_utilization_over_leverage() {
        let config = ScoringConfig::default().utilization;
        let mut over = loan(LoanStatus::Active, 100_000, 0);
        over.amount_paid = Money::from_major(-10_000);
        assert_eq!(loan_utilization_score(&[over], &config), 200);
    }

    #[test]
    fn test_account_age_bands() {
        let config = ScoringConfig::default().account_age;
        assert_eq!(account_age_score(0, &config), 200);
        assert_eq!(account_age_score(89, &config), 200);
        assert_eq!(account_age_score(90, &config), 400);
        assert_eq!(account_age_score(180, &config), 600);
        assert_eq!(account_age_score(365, &config), 800);
        assert_eq!(account_age_score(729, &config), 800);
        assert_eq!(account_age_score(730, &config), 1000);
    }

    #[test]
    fn test_driving_performance() {
        let config = ScoringConfig::default().driving;
        assert_eq!(driving_performance_score(None, &config), 500);

        let strong = DriverPerformance {
            avg_rating: dec!(4.9),
            acceptance_rate: Rate::from_decimal(dec!(0.95)),
            completed_trips: 980,
            total_trips: 1000,
        };
        assert_eq!(driving_performance_score(Some(&strong), &config), 1000);

        let middling = DriverPerformance {
            avg_rating: dec!(4.6),
            acceptance_rate: Rate::from_decimal(dec!(0.75)),
            completed_trips: 85,
            total_trips: 100,
        };
        assert_eq!(driving_performance_score(Some(&middling), &config), 300 + 150 + 150);

        let no_trips = DriverPerformance {
            avg_rating: dec!(3.0),
            acceptance_rate: Rate::ZERO,
            completed_trips: 0,
            total_trips: 0,
        };
        assert_eq!(driving_performance_score(Some(&no_trips), &config), 0);
    }

    #[test]
    fn test_kyc_completeness() {
        use DocumentStatus::*;
        use DocumentType::*;
        let config = ScoringConfig::default().kyc;

        assert_eq!(kyc_completeness_score(&[], &config), 0);
        let all = [
            document(NationalId, Approved),
            document(DriversLicense, Approved),
            document(Selfie, Approved),
        ];
        assert_eq!(kyc_completeness_score(&all, &config), 1000);

        let id_license = [
            document(NationalId, Approved),
            document(DriversLicense, Approved),
            document(Selfie, Pending),
        ];
        assert_eq!(kyc_completeness_score(&id_license, &config), 700);

        let id_only = [document(NationalId, Approved), document(Selfie, Rejected)];
        assert_eq!(kyc_completeness_score(&id_only, &config), 600);

        let pending = [document(DriversLicense, Approved), document(NationalId, Pending)];
        assert_eq!(kyc_completeness_score(&pending, &config), 300);

        let rejected = [document(NationalId, Rejected)];
        assert_eq!(kyc_completeness_score(&rejected, &config), 0);
    }
}
