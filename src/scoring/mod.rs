pub mod components;

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::config::{EngineConfig, RatingTable, ScoreWeights, ScoringConfig};
use crate::state::{Borrower, KycDocument, Loan, Payment, ScheduleEntry};
use crate::telemetry::DriverPerformance;
use crate::types::{CreditRating, Score, MAX_SCORE};

pub use components::{
    account_age_score, classify_payment, driving_performance_score, kyc_completeness_score,
    loan_utilization_score, payment_history_score, tally_payments, utilization_percentage,
    Timeliness, TimelinessCounts,
};

/// the five sub-scores, each 0-1000
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreComponents {
    pub payment_history: Score,
    pub loan_utilization: Score,
    pub account_age: Score,
    pub driving_performance: Score,
    pub kyc_completeness: Score,
}

impl ScoreComponents {
    /// every component set to the same value
    pub fn uniform(score: Score) -> Self {
        Self {
            payment_history: score,
            loan_utilization: score,
            account_age: score,
            driving_performance: score,
            kyc_completeness: score,
        }
    }
}

/// `round(sum of weight * component)`, clamped to the score range
pub fn weighted_total(components: &ScoreComponents, weights: &ScoreWeights) -> Score {
    let sum = weights.payment_history * Decimal::from(components.payment_history)
        + weights.loan_utilization * Decimal::from(components.loan_utilization)
        + weights.account_age * Decimal::from(components.account_age)
        + weights.driving_performance * Decimal::from(components.driving_performance)
        + weights.kyc_completeness * Decimal::from(components.kyc_completeness);

    sum.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_u16()
        .unwrap_or(0)
        .min(MAX_SCORE)
}

/// everything the scorer reads about one borrower
#[derive(Debug, Clone)]
pub struct BorrowerHistory {
    pub borrower: Borrower,
    pub loans: Vec<Loan>,
    /// schedule entries across all of the borrower's loans
    pub schedule: Vec<ScheduleEntry>,
    pub payments: Vec<Payment>,
    pub documents: Vec<KycDocument>,
    /// `None` when telemetry is unavailable or the driver is unmatched
    pub driving: Option<DriverPerformance>,
}

/// scorer output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub total: Score,
    pub rating: CreditRating,
    pub components: ScoreComponents,
}

/// weighted multi-factor credit scorer
#[derive(Debug, Clone)]
pub struct CreditScorer {
    scoring: ScoringConfig,
    ratings: RatingTable,
}

impl CreditScorer {
    pub fn new(scoring: ScoringConfig, ratings: RatingTable) -> Self {
        Self { scoring, ratings }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.scoring.clone(), config.ratings.clone())
    }

    /// compute each component for a borrower as of `now`
    pub fn components(&self, history: &BorrowerHistory, now: DateTime<Utc>) -> ScoreComponents {
        ScoreComponents {
            payment_history: payment_history_score(
                &history.payments,
                &history.schedule,
                &self.scoring.payment_history,
            ),
            loan_utilization: loan_utilization_score(&history.loans, &self.scoring.utilization),
            account_age: account_age_score(
                history.borrower.account_age_days(now),
                &self.scoring.account_age,
            ),
            driving_performance: driving_performance_score(
                history.driving.as_ref(),
                &self.scoring.driving,
            ),
            kyc_completeness: kyc_completeness_score(&history.documents, &self.scoring.kyc),
        }
    }

    /// total, rating and components
    pub fn score(&self, history: &BorrowerHistory, now: DateTime<Utc>) -> ScoreBreakdown {
        let components = self.components(history, now);
        let total = weighted_total(&components, &self.scoring.weights);
        ScoreBreakdown {
            total,
            rating: self.ratings.rating_for(total),
            components,
        }
    }

    /// breakdown written for a newly registered borrower
    pub fn seed(&self) -> ScoreBreakdown {
        let seed = self.scoring.seed_score;
        ScoreBreakdown {
            total: seed,
            rating: self.ratings.rating_for(seed),
            components: ScoreComponents::uniform(seed),
        }
    }

    pub fn rating_for(&self, score: Score) -> CreditRating {
        self.ratings.rating_for(score)
    }
}
