use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{EligibilityPolicy, EngineConfig, RatingTable};
use crate::decimal::{Money, Rate};
use crate::errors::EngineError;
use crate::state::{Borrower, Loan};
use crate::types::{AccountStatus, CreditRating, KycStatus, LoanId, LoanStatus, Score};

/// one failed eligibility rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum IneligibilityReason {
    KycNotVerified { status: KycStatus },
    ScoreTooLow { score: Score, minimum: Score },
    AccountTooNew { age_days: i64, minimum_days: i64 },
    TooManyActiveLoans { active: usize, maximum: usize },
    PriorDefault { loan_id: LoanId },
    AccountNotActive { status: AccountStatus },
    /// application-time only: pending or approved loans also count
    OpenLoanLimit { open: usize, maximum: usize },
    /// application-time only
    AmountAboveMaximum { requested: Money, maximum: Money },
}

impl IneligibilityReason {
    pub fn summary(&self) -> String {
        match self {
            IneligibilityReason::KycNotVerified { status } => {
                format!("kyc must be verified (currently {status})")
            }
            IneligibilityReason::ScoreTooLow { score, minimum } => {
                format!("credit score {score} is below the minimum {minimum}")
            }
            IneligibilityReason::AccountTooNew {
                age_days,
                minimum_days,
            } => format!("account is {age_days} days old, at least {minimum_days} required"),
            IneligibilityReason::TooManyActiveLoans { active, maximum } => {
                format!("{active} active loan(s), at most {maximum} allowed")
            }
            IneligibilityReason::PriorDefault { loan_id } => {
                format!("loan {loan_id} was defaulted")
            }
            IneligibilityReason::AccountNotActive { status } => {
                format!("account is {status}")
            }
            IneligibilityReason::OpenLoanLimit { open, maximum } => {
                format!("{open} open loan(s), at most {maximum} allowed")
            }
            IneligibilityReason::AmountAboveMaximum { requested, maximum } => {
                format!("requested {requested} exceeds the maximum {maximum}")
            }
        }
    }
}

/// result of evaluating every eligibility rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EligibilityDecision {
    pub eligible: bool,
    pub reasons: Vec<IneligibilityReason>,
    pub rating: CreditRating,
    pub max_loan_amount: Money,
    /// `None` for ratings that carry no offer
    pub interest_rate: Option<Rate>,
}

impl EligibilityDecision {
    pub fn reason_summaries(&self) -> Vec<String> {
        self.reasons.iter().map(IneligibilityReason::summary).collect()
    }

    /// `PolicyViolation` listing every reason
    pub fn into_violation(self) -> EngineError {
        EngineError::PolicyViolation {
            reasons: self.reason_summaries(),
        }
    }
}

/// applies the eligibility policy to a borrower and their loans
#[derive(Debug, Clone)]
pub struct EligibilityEvaluator {
    policy: EligibilityPolicy,
    ratings: RatingTable,
}

impl EligibilityEvaluator {
    pub fn new(policy: EligibilityPolicy, ratings: RatingTable) -> Self {
        Self { policy, ratings }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.eligibility.clone(), config.ratings.clone())
    }

    pub fn policy(&self) -> &EligibilityPolicy {
        &self.policy
    }

    /// every rule is checked; no short circuit
    pub fn evaluate(&self, borrower: &Borrower, loans: &[Loan], now: DateTime<Utc>) -> EligibilityDecision {
        let mut reasons = Vec::new();

        if borrower.kyc_status != KycStatus::Verified {
            reasons.push(IneligibilityReason::KycNotVerified {
                status: borrower.kyc_status,
            });
        }

        if borrower.credit_score < self.policy.min_credit_score {
            reasons.push(IneligibilityReason::ScoreTooLow {
                score: borrower.credit_score,
                minimum: self.policy.min_credit_score,
            });
        }

        let age_days = borrower.account_age_days(now);
        if age_days < self.policy.min_account_age_days {
            reasons.push(IneligibilityReason::AccountTooNew {
                age_days,
                minimum_days: self.policy.min_account_age_days,
            });
        }

        let active = loans
            .iter()
            .filter(|l| l.status == LoanStatus::Active)
            .count();
        if active >= self.policy.max_active_loans {
            reasons.push(IneligibilityReason::TooManyActiveLoans {
                active,
                maximum: self.policy.max_active_loans,
            });
        }

        if let Some(loan) = loans.iter().find(|l| self.disqualifying_default(l, now)) {
            reasons.push(IneligibilityReason::PriorDefault { loan_id: loan.id });
        }

        if borrower.account_status != AccountStatus::Active {
            reasons.push(IneligibilityReason::AccountNotActive {
                status: borrower.account_status,
            });
        }

        let rating = borrower.credit_rating;
        EligibilityDecision {
            eligible: reasons.is_empty(),
            reasons,
            rating,
            max_loan_amount: self.ratings.max_loan_amount(rating),
            interest_rate: self.ratings.interest_rate(rating),
        }
    }

    fn disqualifying_default(&self, loan: &Loan, now: DateTime<Utc>) -> bool {
        if loan.status != LoanStatus::Defaulted {
            return false;
        }
        match self.policy.default_lookback_days {
            None => true,
            Some(days) => {
                let defaulted_at = loan.closed_at.unwrap_or(loan.updated_at);
                now - defaulted_at < Duration::days(i64::from(days))
            }
        }
    }
}
