use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::decimal::Money;
use crate::errors::{EngineError, Result};

const SERVICE: &str = "payment rail";

/// checkout request handed to the rail
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckoutRequest {
    pub amount: Money,
    pub currency: String,
    pub payer_ref: String,
    pub description: String,
    /// echoed back in the terminal [`RailEvent`]
    pub client_reference: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkout {
    pub provider_ref: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RailStatus {
    Success,
    Failed,
}

/// normalized terminal status reported asynchronously by the rail
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RailEvent {
    pub transaction_id: String,
    pub status: RailStatus,
    pub amount: Money,
    pub currency: String,
    pub client_reference: String,
}

/// mobile money / bank checkout provider
pub trait PaymentRail: Send + Sync {
    fn initiate_checkout(&self, request: &CheckoutRequest) -> Result<Checkout>;
}

impl<T: PaymentRail + ?Sized> PaymentRail for Arc<T> {
    fn initiate_checkout(&self, request: &CheckoutRequest) -> Result<Checkout> {
        (**self).initiate_checkout(request)
    }
}

/// in-process rail that records checkouts and can settle them on demand
#[derive(Debug, Default)]
pub struct InMemoryPaymentRail {
    checkouts: Mutex<Vec<(String, CheckoutRequest)>>,
    sequence: AtomicU64,
    offline: AtomicBool,
}

impl InMemoryPaymentRail {
    pub fn new() -> Self {
        Self::default()
    }

    /// simulate the provider being unreachable
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn checkouts(&self) -> Vec<CheckoutRequest> {
        self.checkouts
            .lock()
            .map(|c| c.iter().map(|(_, r)| r.clone()).collect())
            .unwrap_or_default()
    }

    /// terminal event for a recorded checkout, as the provider would report it
    pub fn settle(&self, client_reference: &str, status: RailStatus) -> Option<RailEvent> {
        let checkouts = self.checkouts.lock().ok()?;
        let (provider_ref, request) = checkouts
            .iter()
            .find(|(_, r)| r.client_reference == client_reference)?;
        Some(RailEvent {
            transaction_id: format!("txn-{provider_ref}"),
            status,
            amount: request.amount,
            currency: request.currency.clone(),
            client_reference: request.client_reference.clone(),
        })
    }
}

impl PaymentRail for InMemoryPaymentRail {
    fn initiate_checkout(&self, request: &CheckoutRequest) -> Result<Checkout> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(EngineError::ExternalDependency {
                service: SERVICE,
                message: "checkout endpoint unreachable".to_string(),
            });
        }
        if !request.amount.is_positive() {
            return Err(EngineError::validation("checkout amount must be positive"));
        }
        let n = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let provider_ref = format!("chk-{n:06}");
        let mut checkouts = self.checkouts.lock().map_err(|_| EngineError::ExternalDependency {
            service: SERVICE,
            message: "checkout log poisoned".to_string(),
        })?;
        checkouts.push((provider_ref.clone(), request.clone()));
        Ok(Checkout { provider_ref })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(reference: &str) -> CheckoutRequest {
        CheckoutRequest {
            amount: Money::from_major(1_250),
            currency: "KES".to_string(),
            payer_ref: "254700000001".to_string(),
            description: "loan repayment".to_string(),
            client_reference: reference.to_string(),
        }
    }

    #[test]
    fn test_checkout_and_settle() {
        let rail = InMemoryPaymentRail::new();
        let checkout = rail.initiate_checkout(&request("pay-1")).unwrap();
        assert_eq!(checkout.provider_ref, "chk-000001");

        let event = rail.settle("pay-1", RailStatus::Success).unwrap();
        assert_eq!(event.transaction_id, "txn-chk-000001");
        assert_eq!(event.amount, Money::from_major(1_250));
        assert_eq!(event.client_reference, "pay-1");
        assert!(rail.settle("pay-2", RailStatus::Failed).is_none());
    }

    #[test]
    fn test_offline_rail() {
        let rail = InMemoryPaymentRail::new();
        rail.set_offline(true);
        let err = rail.initiate_checkout(&request("pay-1")).unwrap_err();
        assert!(err.is_retryable());
        assert!(rail.checkouts().is_empty());
    }
}
