use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::decimal::{Money, Rate};
use crate::errors::{EngineError, Result};
use crate::types::{CreditRating, Score, MAX_SCORE};

/// engine configuration; every policy constant the algorithms read lives here
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub currency: String,
    pub scoring: ScoringConfig,
    pub ratings: RatingTable,
    pub eligibility: EligibilityPolicy,
    pub limits: LoanLimits,
    pub telemetry: TelemetryMode,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            currency: "KES".to_string(),
            scoring: ScoringConfig::default(),
            ratings: RatingTable::default(),
            eligibility: EligibilityPolicy::default(),
            limits: LoanLimits::default(),
            telemetry: TelemetryMode::InMemory,
        }
    }
}

impl EngineConfig {
    /// parse from json; omitted sections fall back to defaults
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: EngineConfig =
            serde_json::from_str(json).map_err(|e| EngineError::InvalidConfiguration {
                message: e.to_string(),
            })?;
        config.validate()?;
        Ok(config)
    }

    /// check internal consistency of the policy tables
    pub fn validate(&self) -> Result<()> {
        if self.currency.trim().is_empty() {
            return Err(invalid("currency must not be empty"));
        }
        self.scoring.validate()?;
        self.ratings.validate()?;
        self.limits.validate()?;
        Ok(())
    }
}

fn invalid(message: impl Into<String>) -> EngineError {
    EngineError::InvalidConfiguration {
        message: message.into(),
    }
}

/// a threshold and the sub-score awarded when the threshold is met
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreBand {
    pub threshold: Decimal,
    pub score: Score,
}

impl ScoreBand {
    pub fn new(threshold: Decimal, score: Score) -> Self {
        Self { threshold, score }
    }
}

/// first band (ordered by descending threshold) whose threshold `value` reaches
pub fn score_at_least(bands: &[ScoreBand], value: Decimal) -> Option<Score> {
    bands.iter().find(|b| value >= b.threshold).map(|b| b.score)
}

/// first band (ordered by ascending threshold) whose threshold `value` stays within
pub fn score_at_most(bands: &[ScoreBand], value: Decimal) -> Option<Score> {
    bands.iter().find(|b| value <= b.threshold).map(|b| b.score)
}

fn validate_bands(name: &str, bands: &[ScoreBand], descending: bool) -> Result<()> {
    for band in bands {
        if band.score > MAX_SCORE {
            return Err(invalid(format!("{name}: band score {} exceeds {MAX_SCORE}", band.score)));
        }
    }
    let ordered = bands.windows(2).all(|w| {
        if descending {
            w[0].threshold > w[1].threshold
        } else {
            w[0].threshold < w[1].threshold
        }
    });
    if !ordered {
        let order = if descending { "descending" } else { "ascending" };
        return Err(invalid(format!("{name}: thresholds must be strictly {order}")));
    }
    Ok(())
}

fn validate_score(name: &str, score: Score) -> Result<()> {
    if score > MAX_SCORE {
        return Err(invalid(format!("{name}: {score} exceeds {MAX_SCORE}")));
    }
    Ok(())
}

/// component weights; must sum to exactly 1
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreWeights {
    pub payment_history: Decimal,
    pub loan_utilization: Decimal,
    pub account_age: Decimal,
    pub driving_performance: Decimal,
    pub kyc_completeness: Decimal,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            payment_history: dec!(0.35),
            loan_utilization: dec!(0.30),
            account_age: dec!(0.15),
            driving_performance: dec!(0.10),
            kyc_completeness: dec!(0.10),
        }
    }
}

impl ScoreWeights {
    pub fn total(&self) -> Decimal {
        self.payment_history
            + self.loan_utilization
            + self.account_age
            + self.driving_performance
            + self.kyc_completeness
    }
}

/// scoring configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub weights: ScoreWeights,
    pub payment_history: PaymentHistoryConfig,
    pub utilization: UtilizationConfig,
    pub account_age: AccountAgeConfig,
    pub driving: DrivingConfig,
    pub kyc: KycScoreConfig,
    /// score and rating written for a freshly registered borrower
    pub seed_score: Score,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            weights: ScoreWeights::default(),
            payment_history: PaymentHistoryConfig::default(),
            utilization: UtilizationConfig::default(),
            account_age: AccountAgeConfig::default(),
            driving: DrivingConfig::default(),
            kyc: KycScoreConfig::default(),
            seed_score: 500,
        }
    }
}

impl ScoringConfig {
    pub fn validate(&self) -> Result<()> {
        let weights = [
            self.weights.payment_history,
            self.weights.loan_utilization,
            self.weights.account_age,
            self.weights.driving_performance,
            self.weights.kyc_completeness,
        ];
        if weights.iter().any(|w| w.is_sign_negative()) {
            return Err(invalid("score weights must not be negative"));
        }
        if self.weights.total() != Decimal::ONE {
            return Err(invalid(format!(
                "score weights must sum to 1, got {}",
                self.weights.total()
            )));
        }

        let ph = &self.payment_history;
        validate_bands("payment_history.bands", &ph.bands, true)?;
        validate_score("payment_history.floor_score", ph.floor_score)?;
        validate_score("payment_history.no_history_score", ph.no_history_score)?;
        if ph.late_grace_days < 0 {
            return Err(invalid("payment_history.late_grace_days must not be negative"));
        }

        let ut = &self.utilization;
        validate_bands("utilization.bands", &ut.bands, false)?;
        validate_score("utilization.no_active_loans_score", ut.no_active_loans_score)?;
        validate_score("utilization.over_limit_score", ut.over_limit_score)?;

        validate_bands("account_age.bands", &self.account_age.bands, true)?;
        validate_score("account_age.floor_score", self.account_age.floor_score)?;

        let dr = &self.driving;
        validate_bands("driving.rating_bands", &dr.rating_bands, true)?;
        validate_bands("driving.acceptance_bands", &dr.acceptance_bands, true)?;
        validate_bands("driving.completion_bands", &dr.completion_bands, true)?;
        validate_score("driving.cap", dr.cap)?;
        validate_score("driving.neutral_score", dr.neutral_score)?;

        let kyc = &self.kyc;
        for (name, score) in [
            ("kyc.all_approved", kyc.all_approved),
            ("kyc.id_and_license", kyc.id_and_license),
            ("kyc.id_only", kyc.id_only),
            ("kyc.any_pending", kyc.any_pending),
            ("kyc.none_submitted", kyc.none_submitted),
        ] {
            validate_score(name, score)?;
        }

        validate_score("seed_score", self.seed_score)
    }
}

/// payment history scoring by on-time percentage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentHistoryConfig {
    /// days after the due date still counted as late rather than missed
    pub late_grace_days: i64,
    /// on-time percentage bands, descending
    pub bands: Vec<ScoreBand>,
    pub floor_score: Score,
    /// neutral prior when nothing has been classified yet
    pub no_history_score: Score,
}

impl Default for PaymentHistoryConfig {
    fn default() -> Self {
        Self {
            late_grace_days: 7,
            bands: vec![
                ScoreBand::new(dec!(100), 1000),
                ScoreBand::new(dec!(95), 900),
                ScoreBand::new(dec!(90), 800),
                ScoreBand::new(dec!(80), 600),
                ScoreBand::new(dec!(70), 400),
            ],
            floor_score: 200,
            no_history_score: 500,
        }
    }
}

/// loan utilization scoring by outstanding-principal percentage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UtilizationConfig {
    pub no_active_loans_score: Score,
    /// utilization percentage ceilings, ascending
    pub bands: Vec<ScoreBand>,
    /// above every ceiling (over-leveraged)
    pub over_limit_score: Score,
}

impl Default for UtilizationConfig {
    fn default() -> Self {
        Self {
            no_active_loans_score: 800,
            bands: vec![
                ScoreBand::new(dec!(25), 1000),
                ScoreBand::new(dec!(50), 800),
                ScoreBand::new(dec!(75), 600),
                ScoreBand::new(dec!(100), 400),
            ],
            over_limit_score: 200,
        }
    }
}

/// account age scoring by days since registration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountAgeConfig {
    pub bands: Vec<ScoreBand>,
    pub floor_score: Score,
}

impl Default for AccountAgeConfig {
    fn default() -> Self {
        Self {
            bands: vec![
                ScoreBand::new(dec!(730), 1000),
                ScoreBand::new(dec!(365), 800),
                ScoreBand::new(dec!(180), 600),
                ScoreBand::new(dec!(90), 400),
            ],
            floor_score: 200,
        }
    }
}

/// driving performance scoring from telemetry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DrivingConfig {
    /// average passenger rating (0-5) bands, up to 400 points
    pub rating_bands: Vec<ScoreBand>,
    /// acceptance rate (fraction) bands, up to 300 points
    pub acceptance_bands: Vec<ScoreBand>,
    /// completion rate (fraction) bands, up to 300 points
    pub completion_bands: Vec<ScoreBand>,
    pub cap: Score,
    /// used when telemetry is unavailable or the driver is unmatched
    pub neutral_score: Score,
}

impl Default for DrivingConfig {
    fn default() -> Self {
        Self {
            rating_bands: vec![
                ScoreBand::new(dec!(4.8), 400),
                ScoreBand::new(dec!(4.5), 300),
                ScoreBand::new(dec!(4.0), 200),
                ScoreBand::new(dec!(3.5), 100),
            ],
            acceptance_bands: vec![
                ScoreBand::new(dec!(0.90), 300),
                ScoreBand::new(dec!(0.80), 225),
                ScoreBand::new(dec!(0.70), 150),
                ScoreBand::new(dec!(0.50), 75),
            ],
            completion_bands: vec![
                ScoreBand::new(dec!(0.95), 300),
                ScoreBand::new(dec!(0.90), 225),
                ScoreBand::new(dec!(0.80), 150),
                ScoreBand::new(dec!(0.60), 75),
            ],
            cap: 1000,
            neutral_score: 500,
        }
    }
}

/// kyc completeness scores
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KycScoreConfig {
    pub all_approved: Score,
    pub id_and_license: Score,
    pub id_only: Score,
    pub any_pending: Score,
    pub none_submitted: Score,
}

impl Default for KycScoreConfig {
    fn default() -> Self {
        Self {
            all_approved: 1000,
            id_and_license: 700,
            id_only: 600,
            any_pending: 300,
            none_submitted: 0,
        }
    }
}

/// loan terms unlocked by a rating
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatingTier {
    pub rating: CreditRating,
    /// inclusive lower bound
    pub min_score: Score,
    pub max_loan_amount: Money,
    /// `None` when the rating cannot borrow
    pub interest_rate: Option<Rate>,
}

/// rating thresholds and per-rating loan terms, best rating first
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatingTable {
    pub tiers: Vec<RatingTier>,
}

impl Default for RatingTable {
    fn default() -> Self {
        let tier = |rating, min_score, max: i64, rate: Option<u32>| RatingTier {
            rating,
            min_score,
            max_loan_amount: Money::from_major(max),
            interest_rate: rate.map(Rate::from_percentage),
        };
        Self {
            tiers: vec![
                tier(CreditRating::A, 800, 2_000_000, Some(12)),
                tier(CreditRating::B, 650, 1_500_000, Some(15)),
                tier(CreditRating::C, 500, 1_000_000, Some(18)),
                tier(CreditRating::D, 350, 500_000, Some(24)),
                tier(CreditRating::E, 0, 0, None),
            ],
        }
    }
}

impl RatingTable {
    /// map a score to its letter rating
    pub fn rating_for(&self, score: Score) -> CreditRating {
        self.tiers
            .iter()
            .find(|t| score >= t.min_score)
            .map(|t| t.rating)
            .unwrap_or(CreditRating::E)
    }

    /// loan terms for a rating
    pub fn terms(&self, rating: CreditRating) -> Option<&RatingTier> {
        self.tiers.iter().find(|t| t.rating == rating)
    }

    /// rating-derived maximum loan amount; zero when the rating is unlisted
    pub fn max_loan_amount(&self, rating: CreditRating) -> Money {
        self.terms(rating)
            .map(|t| t.max_loan_amount)
            .unwrap_or(Money::ZERO)
    }

    /// rating-derived annual interest rate
    pub fn interest_rate(&self, rating: CreditRating) -> Option<Rate> {
        self.terms(rating).and_then(|t| t.interest_rate)
    }

    pub fn validate(&self) -> Result<()> {
        if self.tiers.is_empty() {
            return Err(invalid("rating table must not be empty"));
        }
        let ordered = self.tiers.windows(2).all(|w| {
            w[0].min_score > w[1].min_score && w[0].rating < w[1].rating
        });
        if !ordered {
            return Err(invalid(
                "rating tiers must be listed best first with strictly descending thresholds",
            ));
        }
        if self.tiers.last().map(|t| t.min_score) != Some(0) {
            return Err(invalid("lowest rating tier must start at score 0"));
        }
        for tier in &self.tiers {
            validate_score("ratings.min_score", tier.min_score)?;
            if tier.max_loan_amount.is_negative() {
                return Err(invalid(format!("rating {} has a negative max amount", tier.rating)));
            }
            if tier.interest_rate.map(|r| r.is_negative()).unwrap_or(false) {
                return Err(invalid(format!("rating {} has a negative rate", tier.rating)));
            }
        }
        Ok(())
    }
}

/// eligibility policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EligibilityPolicy {
    pub min_credit_score: Score,
    pub min_account_age_days: i64,
    pub max_active_loans: usize,
    /// how far back a defaulted loan disqualifies; `None` means forever
    pub default_lookback_days: Option<u32>,
}

impl Default for EligibilityPolicy {
    fn default() -> Self {
        Self {
            min_credit_score: 350,
            min_account_age_days: 30,
            max_active_loans: 1,
            default_lookback_days: None,
        }
    }
}

/// input bounds for loan applications and approval overrides
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoanLimits {
    pub min_principal: Money,
    pub min_term_weeks: u32,
    pub max_term_weeks: u32,
}

impl Default for LoanLimits {
    fn default() -> Self {
        Self {
            min_principal: Money::from_major(10_000),
            min_term_weeks: 1,
            max_term_weeks: 52,
        }
    }
}

impl LoanLimits {
    pub fn validate(&self) -> Result<()> {
        if !self.min_principal.is_positive() {
            return Err(invalid("limits.min_principal must be positive"));
        }
        if self.min_term_weeks == 0 || self.min_term_weeks > self.max_term_weeks {
            return Err(invalid("limits: term bounds must satisfy 1 <= min <= max"));
        }
        Ok(())
    }

    /// check a requested principal and term against the bounds
    pub fn check(&self, principal: Money, term_weeks: u32) -> Result<()> {
        if principal < self.min_principal {
            return Err(EngineError::validation(format!(
                "amount {} is below the minimum {}",
                principal, self.min_principal
            )));
        }
        if term_weeks < self.min_term_weeks || term_weeks > self.max_term_weeks {
            return Err(EngineError::validation(format!(
                "term of {} weeks is outside {}..={}",
                term_weeks, self.min_term_weeks, self.max_term_weeks
            )));
        }
        Ok(())
    }
}

/// which telemetry implementation to wire up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TelemetryMode {
    /// in-process fixture data
    InMemory,
    /// normalized reads from a live trip feed
    Feed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.scoring.weights.total(), Decimal::ONE);
    }

    #[test]
    fn test_rating_thresholds() {
        let table = RatingTable::default();
        assert_eq!(table.rating_for(1000), CreditRating::A);
        assert_eq!(table.rating_for(800), CreditRating::A);
        assert_eq!(table.rating_for(799), CreditRating::B);
        assert_eq!(table.rating_for(650), CreditRating::B);
        assert_eq!(table.rating_for(500), CreditRating::C);
        assert_eq!(table.rating_for(350), CreditRating::D);
        assert_eq!(table.rating_for(349), CreditRating::E);
        assert_eq!(table.rating_for(0), CreditRating::E);
    }

    #[test]
    fn test_rating_is_monotonic_in_score() {
        let table = RatingTable::default();
        let mut previous = table.rating_for(0);
        for score in 1..=MAX_SCORE {
            let rating = table.rating_for(score);
            // a higher score never yields a worse letter
            assert!(rating <= previous, "score {score} rated {rating} after {previous}");
            previous = rating;
        }
    }

    #[test]
    fn test_rating_terms() {
        let table = RatingTable::default();
        assert_eq!(table.max_loan_amount(CreditRating::B), Money::from_major(1_500_000));
        assert_eq!(table.interest_rate(CreditRating::B), Some(Rate::from_percentage(15)));
        assert_eq!(table.max_loan_amount(CreditRating::E), Money::ZERO);
        assert_eq!(table.interest_rate(CreditRating::E), None);
    }

    #[test]
    fn test_weights_must_sum_to_one() {
        let mut config = EngineConfig::default();
        config.scoring.weights.kyc_completeness = dec!(0.20);
        let err = config.validate().unwrap_err();
        assert!(matches!(err, EngineError::InvalidConfiguration { .. }));
    }

    #[test]
    fn test_unordered_bands_rejected() {
        let mut config = EngineConfig::default();
        config.scoring.account_age.bands.swap(0, 1);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let json = r#"{
            "currency": "UGX",
            "eligibility": {
                "min_credit_score": 400,
                "min_account_age_days": 60,
                "max_active_loans": 2,
                "default_lookback_days": 365
            }
        }"#;
        let config = EngineConfig::from_json_str(json).unwrap();
        assert_eq!(config.currency, "UGX");
        assert_eq!(config.eligibility.max_active_loans, 2);
        assert_eq!(config.eligibility.default_lookback_days, Some(365));
        assert_eq!(config.limits, LoanLimits::default());
    }

    #[test]
    fn test_malformed_json_is_configuration_error() {
        let err = EngineConfig::from_json_str("{ not json").unwrap_err();
        assert!(matches!(err, EngineError::InvalidConfiguration { .. }));
    }

    #[test]
    fn test_band_lookup() {
        let bands = PaymentHistoryConfig::default().bands;
        assert_eq!(score_at_least(&bands, dec!(100)), Some(1000));
        assert_eq!(score_at_least(&bands, dec!(95)), Some(900));
        assert_eq!(score_at_least(&bands, dec!(69.9)), None);

        let ceilings = UtilizationConfig::default().bands;
        assert_eq!(score_at_most(&ceilings, dec!(25)), Some(1000));
        assert_eq!(score_at_most(&ceilings, dec!(25.01)), Some(800));
        assert_eq!(score_at_most(&ceilings, dec!(100.5)), None);
    }

    #[test]
    fn test_loan_limits_check() {
        let limits = LoanLimits::default();
        assert!(limits.check(Money::from_major(500_000), 26).is_ok());
        assert!(limits.check(Money::from_major(9_999), 26).is_err());
        assert!(limits.check(Money::from_major(500_000), 0).is_err());
        assert!(limits.check(Money::from_major(500_000), 53).is_err());
    }
}
