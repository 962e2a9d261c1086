pub mod amortization;
pub mod lifecycle;
pub mod schedule;

use serde::{Deserialize, Serialize};

use crate::decimal::Money;

pub use amortization::{Amortization, LoanAmortizer};
pub use lifecycle::{LoanEvent, PaymentEvent};
pub use schedule::ScheduleGenerator;

/// borrower's loan request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoanApplication {
    pub amount: Money,
    pub term_weeks: u32,
    pub purpose: String,
}

impl LoanApplication {
    pub fn new(amount: Money, term_weeks: u32, purpose: impl Into<String>) -> Self {
        Self {
            amount,
            term_weeks,
            purpose: purpose.into(),
        }
    }
}
