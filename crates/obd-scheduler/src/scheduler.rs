//! Poll Scheduler
//!
//! Round-robin over the watched parameters. Each cycle serves every parameter
//! once; priority only decides the order inside a cycle. A selected parameter
//! leaves the cycle and comes back for the next one once its reply (or timeout)
//! has been resolved, so a timed-out parameter is retried naturally.

use obd_protocol::{Parameter, SupportMap};
use std::sync::Arc;
use tracing::{debug, info};

/// A parameter in the working set
#[derive(Debug, Clone)]
pub struct ScheduledParameter {
    /// The parameter to poll
    pub parameter: Arc<Parameter>,
    /// Catalog position, breaks priority ties
    pub order: usize,
}

impl ScheduledParameter {
    /// Create a scheduled parameter
    pub fn new(parameter: Arc<Parameter>, order: usize) -> Self {
        Self { parameter, order }
    }

    fn sort_key(&self) -> (u32, usize) {
        (self.parameter.priority, self.order)
    }
}

/// Working set of watched parameters
#[derive(Debug, Default)]
pub struct PollScheduler {
    /// Not yet served this cycle
    current: Vec<ScheduledParameter>,
    /// Served this cycle, waiting for the next
    resolved: Vec<ScheduledParameter>,
    /// Selected and awaiting resolution
    outstanding: Option<ScheduledParameter>,
    enabled: bool,
}

impl PollScheduler {
    /// Create an empty, disabled scheduler
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the working set
    pub fn load(&mut self, parameters: impl IntoIterator<Item = ScheduledParameter>) {
        self.current = parameters.into_iter().collect();
        self.resolved.clear();
        self.outstanding = None;
        info!("Poll working set loaded with {} parameters", self.current.len());
    }

    /// Allow ticks to select parameters
    pub fn enable(&mut self) {
        if !self.enabled {
            info!("Polling started");
        }
        self.enabled = true;
    }

    /// Stop selecting; the outstanding parameter still resolves
    pub fn disable(&mut self) {
        if self.enabled {
            info!("Polling stopped");
        }
        self.enabled = false;
    }

    /// Check if polling is enabled
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Parameter awaiting resolution, if any
    pub fn outstanding(&self) -> Option<&Arc<Parameter>> {
        self.outstanding.as_ref().map(|s| &s.parameter)
    }

    /// Select the next parameter to poll
    ///
    /// `None` when disabled, when a selection is still outstanding, or when no
    /// parameter of the working set is supported. Unsupported parameters are
    /// skipped to the next cycle without being sent; when that empties the cycle,
    /// selection continues in the next one.
    pub fn next(&mut self, support: &SupportMap) -> Option<Arc<Parameter>> {
        if !self.enabled || self.outstanding.is_some() {
            return None;
        }

        let mut rotated = false;
        loop {
            if self.current.is_empty() {
                // a second rotation would only revisit what was just skipped
                if rotated || self.resolved.is_empty() {
                    return None;
                }
                std::mem::swap(&mut self.current, &mut self.resolved);
                rotated = true;
            }

            let first = self
                .current
                .iter()
                .enumerate()
                .min_by_key(|(_, s)| s.sort_key())
                .map(|(i, _)| i)?;
            let candidate = self.current.remove(first);
            if !support.is_supported(&candidate.parameter.id) {
                debug!("Skipping unsupported PID {}", candidate.parameter.id);
                self.resolved.push(candidate);
                continue;
            }

            let parameter = Arc::clone(&candidate.parameter);
            self.outstanding = Some(candidate);
            return Some(parameter);
        }
    }

    /// Return the outstanding parameter to the next cycle
    pub fn resolve(&mut self) -> Option<Arc<Parameter>> {
        let scheduled = self.outstanding.take()?;
        let parameter = Arc::clone(&scheduled.parameter);
        self.resolved.push(scheduled);
        Some(parameter)
    }

    /// Drop the working set and disable polling
    pub fn clear(&mut self) {
        self.current.clear();
        self.resolved.clear();
        self.outstanding = None;
        self.enabled = false;
    }

    /// Number of parameters in the working set
    pub fn len(&self) -> usize {
        self.current.len() + self.resolved.len() + usize::from(self.outstanding.is_some())
    }

    /// Check if the working set is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
