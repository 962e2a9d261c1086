use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::config::TelemetryMode;
use crate::decimal::Rate;
use crate::errors::{EngineError, Result};

const SERVICE: &str = "telemetry";

/// normalized driving metrics, the only telemetry shape scoring sees
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverPerformance {
    /// average passenger rating, 0-5
    pub avg_rating: Decimal,
    /// share of offered trips accepted, 0-1
    pub acceptance_rate: Rate,
    pub completed_trips: u32,
    pub total_trips: u32,
}

impl DriverPerformance {
    /// completed / total trips; `None` without trips
    pub fn completion_rate(&self) -> Option<Rate> {
        if self.total_trips == 0 {
            return None;
        }
        let completed = self.completed_trips.min(self.total_trips);
        Some(Rate::from_decimal(
            Decimal::from(completed) / Decimal::from(self.total_trips),
        ))
    }

    fn check(&self) -> Result<()> {
        let acceptance = self.acceptance_rate.as_decimal();
        if acceptance < Decimal::ZERO || acceptance > Decimal::ONE {
            return Err(EngineError::ExternalDependency {
                service: SERVICE,
                message: format!("acceptance rate {acceptance} outside 0..=1"),
            });
        }
        if self.avg_rating < Decimal::ZERO || self.avg_rating > Decimal::from(5) {
            return Err(EngineError::ExternalDependency {
                service: SERVICE,
                message: format!("average rating {} outside 0..=5", self.avg_rating),
            });
        }
        Ok(())
    }
}

/// source of driving performance for a borrower's external reference
pub trait TelemetryProvider: Send + Sync {
    /// `Ok(None)` when the driver is unknown to the provider
    fn performance(&self, external_ref: &str) -> Result<Option<DriverPerformance>>;
}

impl<T: TelemetryProvider + ?Sized> TelemetryProvider for std::sync::Arc<T> {
    fn performance(&self, external_ref: &str) -> Result<Option<DriverPerformance>> {
        (**self).performance(external_ref)
    }
}

/// fetch performance, degrading to `None` on any provider failure
pub fn lookup_performance(
    provider: &dyn TelemetryProvider,
    external_ref: &str,
) -> Option<DriverPerformance> {
    let result = provider
        .performance(external_ref)
        .and_then(|perf| match perf {
            Some(p) => p.check().map(|_| Some(p)),
            None => Ok(None),
        });

    match result {
        Ok(Some(perf)) => Some(perf),
        Ok(None) => {
            tracing::debug!(external_ref, "no telemetry for driver, using neutral score");
            None
        }
        Err(err) => {
            tracing::warn!(external_ref, error = %err, "telemetry lookup failed, using neutral score");
            None
        }
    }
}

/// in-process telemetry table
#[derive(Debug, Default)]
pub struct InMemoryTelemetry {
    records: RwLock<HashMap<String, DriverPerformance>>,
    unavailable: AtomicBool,
}

impl InMemoryTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_driver(self, external_ref: impl Into<String>, performance: DriverPerformance) -> Self {
        self.set_driver(external_ref, performance);
        self
    }

    pub fn set_driver(&self, external_ref: impl Into<String>, performance: DriverPerformance) {
        if let Ok(mut records) = self.records.write() {
            records.insert(external_ref.into(), performance);
        }
    }

    /// simulate a provider outage
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }
}

impl TelemetryProvider for InMemoryTelemetry {
    fn performance(&self, external_ref: &str) -> Result<Option<DriverPerformance>> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(EngineError::ExternalDependency {
                service: SERVICE,
                message: "provider offline".to_string(),
            });
        }
        let records = self.records.read().map_err(|_| EngineError::ExternalDependency {
            service: SERVICE,
            message: "telemetry table poisoned".to_string(),
        })?;
        Ok(records.get(external_ref).cloned())
    }
}

/// raw per-driver counters as a fleet feed reports them
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TripSummary {
    pub avg_rating: Decimal,
    pub offers_received: u32,
    pub offers_accepted: u32,
    pub trips_started: u32,
    pub trips_completed: u32,
}

/// live fleet performance feed
pub trait DriverFeed: Send + Sync {
    fn trip_summary(&self, external_ref: &str) -> Result<Option<TripSummary>>;
}

/// telemetry provider normalizing a [`DriverFeed`]
pub struct TripFeedTelemetry {
    feed: Box<dyn DriverFeed>,
}

impl TripFeedTelemetry {
    pub fn new(feed: Box<dyn DriverFeed>) -> Self {
        Self { feed }
    }

    fn normalize(summary: TripSummary) -> DriverPerformance {
        let acceptance_rate = if summary.offers_received == 0 {
            Rate::ZERO
        } else {
            let accepted = summary.offers_accepted.min(summary.offers_received);
            Rate::from_decimal(Decimal::from(accepted) / Decimal::from(summary.offers_received))
        };
        DriverPerformance {
            avg_rating: summary.avg_rating,
            acceptance_rate,
            completed_trips: summary.trips_completed,
            total_trips: summary.trips_started,
        }
    }
}

impl TelemetryProvider for TripFeedTelemetry {
    fn performance(&self, external_ref: &str) -> Result<Option<DriverPerformance>> {
        Ok(self.feed.trip_summary(external_ref)?.map(Self::normalize))
    }
}

/// build the provider selected by configuration
pub fn telemetry_from_config(
    mode: TelemetryMode,
    feed: Option<Box<dyn DriverFeed>>,
) -> Result<Box<dyn TelemetryProvider>> {
    match (mode, feed) {
        (TelemetryMode::InMemory, _) => Ok(Box::new(InMemoryTelemetry::new())),
        (TelemetryMode::Feed, Some(feed)) => Ok(Box::new(TripFeedTelemetry::new(feed))),
        (TelemetryMode::Feed, None) => Err(EngineError::InvalidConfiguration {
            message: "telemetry mode Feed requires a driver feed".to_string(),
        }),
    }
}
