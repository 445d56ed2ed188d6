//! Vehicle Data Aggregation
//!
//! Folds decoded responses into one latest-known-values snapshot and publishes
//! it on a watch channel after every accepted reading.

use crate::error::ValidationError;
use crate::snapshot::{estimate_gear, Field, VehicleSnapshot};
use crate::validator::{ValidationConfig, Validator};
use obd_protocol::DecodedResponse;
use tokio::sync::watch;
use tracing::{debug, warn};

/// Owner of the [`VehicleSnapshot`]
pub struct VehicleDataAggregator {
    snapshot: VehicleSnapshot,
    validator: Validator,
    tx: watch::Sender<VehicleSnapshot>,
}

impl VehicleDataAggregator {
    /// Create an aggregator with an empty snapshot
    pub fn new(config: ValidationConfig) -> Self {
        let (tx, _) = watch::channel(VehicleSnapshot::default());
        Self {
            snapshot: VehicleSnapshot::default(),
            validator: Validator::new(config),
            tx,
        }
    }

    /// Subscribe to snapshot changes
    pub fn subscribe(&self) -> watch::Receiver<VehicleSnapshot> {
        self.tx.subscribe()
    }

    /// Current snapshot
    pub fn snapshot(&self) -> &VehicleSnapshot {
        &self.snapshot
    }

    /// Fold a decoded response into the snapshot
    ///
    /// Returns whether the response fed a watched field. Responses without a value
    /// or for parameters no field watches leave the snapshot untouched.
    pub fn ingest(&mut self, response: &DecodedResponse) -> bool {
        let Some(value) = response.value else {
            return false;
        };
        let Some(field) = Field::for_parameter(&response.parameter) else {
            debug!("PID {} is not aggregated", response.parameter.id);
            return false;
        };

        *self.snapshot.slot(field) = Some(value);
        self.snapshot.timestamp_ms = response.timestamp_ms;
        self.sanitize();

        self.tx.send_replace(self.snapshot.clone());
        true
    }

    /// Reset every out-of-bounds field to unknown, returning what was dropped
    ///
    /// The gear is re-derived from what survives.
    pub fn sanitize(&mut self) -> Vec<ValidationError> {
        let mut dropped = Vec::new();
        for field in Field::ALL {
            let Some(value) = self.snapshot.get(field) else {
                continue;
            };
            if let Err(err) = self.validator.validate(field, value) {
                warn!("Discarding reading: {}", err);
                *self.snapshot.slot(field) = None;
                dropped.push(err);
            }
        }
        self.snapshot.gear = estimate_gear(self.snapshot.rpm, self.snapshot.speed);
        dropped
    }

    /// Forget every value
    pub fn reset(&mut self) {
        self.snapshot = VehicleSnapshot::default();
        // subscribers are only woken if something was actually forgotten
        self.tx.send_if_modified(|published| {
            if published.is_empty() {
                return false;
            }
            *published = VehicleSnapshot::default();
            true
        });
    }
}

impl Default for VehicleDataAggregator {
    fn default() -> Self {
        Self::new(ValidationConfig::default())
    }
}
