use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::decimal::{Money, Rate};
use crate::errors::{EngineError, Result};

const WEEKS_PER_YEAR: Decimal = dec!(52);

/// repayment terms for a principal, rate and term
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Amortization {
    pub principal: Money,
    pub interest_rate: Rate,
    pub term_weeks: u32,
    pub interest_amount: Money,
    pub total_repayment: Money,
    pub weekly_payment: Money,
}

/// simple interest prorated by term
///
/// interest = principal x annual rate x (weeks / 52), not reducing balance.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoanAmortizer;

impl LoanAmortizer {
    pub fn new() -> Self {
        Self
    }

    pub fn compute(&self, principal: Money, annual_rate: Rate, term_weeks: u32) -> Result<Amortization> {
        if term_weeks == 0 {
            return Err(EngineError::validation("term must be at least one week"));
        }
        if !principal.is_positive() {
            return Err(EngineError::validation(format!(
                "principal must be positive, got {principal}"
            )));
        }
        if annual_rate.is_negative() {
            return Err(EngineError::validation(format!(
                "interest rate must not be negative, got {annual_rate}"
            )));
        }

        let weeks = Decimal::from(term_weeks);
        let interest_amount = Money::from_decimal(
            principal.as_decimal() * annual_rate.as_decimal() * weeks / WEEKS_PER_YEAR,
        );
        let total_repayment = principal + interest_amount;
        let weekly_payment = total_repayment / weeks;

        Ok(Amortization {
            principal,
            interest_rate: annual_rate,
            term_weeks,
            interest_amount,
            total_repayment,
            weekly_payment,
        })
    }
}
