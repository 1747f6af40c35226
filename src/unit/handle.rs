use crate::foundation::core::{BandSpecification, UnitId};
use crate::foundation::error::{BandError, BandResult};
use crate::unit::protocol::UnitCommand;
use crate::unit::spawner::UnitEndpoint;

/// Orchestrator-owned bookkeeping for one compute unit.
///
/// `ready` flips false -> true exactly once. `progress` always lies in `[0, 1]` and is reset at
/// the beginning of every run. The endpoint never leaves the handle.
#[derive(Debug)]
pub struct UnitHandle<E> {
    id: UnitId,
    ready: bool,
    progress: f64,
    band: BandSpecification,
    endpoint: E,
}

impl<E: UnitEndpoint> UnitHandle<E> {
    pub(crate) fn new(id: UnitId, band: BandSpecification, endpoint: E) -> Self {
        Self {
            id,
            ready: false,
            progress: 0.0,
            band,
            endpoint,
        }
    }

    /// Unit identity.
    pub fn id(&self) -> UnitId {
        self.id
    }

    /// Whether the unit has reported readiness.
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Last progress reported in the current run.
    pub fn progress(&self) -> f64 {
        self.progress
    }

    /// Band specification of the current run (geometry only before the first run).
    pub fn band(&self) -> &BandSpecification {
        &self.band
    }

    pub(crate) fn mark_ready(&mut self) -> BandResult<()> {
        if self.ready {
            return Err(BandError::malformed(format!(
                "unit {} reported readiness twice",
                self.id
            )));
        }
        self.ready = true;
        Ok(())
    }

    pub(crate) fn record_progress(&mut self, progress: f64) -> BandResult<()> {
        if !(0.0..=1.0).contains(&progress) {
            return Err(BandError::malformed(format!(
                "unit {} reported progress {progress} outside [0, 1]",
                self.id
            )));
        }
        if progress < self.progress {
            tracing::debug!(
                unit = %self.id,
                previous = self.progress,
                progress,
                "unit progress regressed; relaying as reported"
            );
        }
        self.progress = progress;
        Ok(())
    }

    pub(crate) fn begin_run(&mut self, band: BandSpecification) {
        self.band = band;
        self.progress = 0.0;
    }

    pub(crate) fn send(&mut self, command: UnitCommand) -> BandResult<()> {
        self.endpoint.send(command)
    }
}

#[cfg(test)]
#[path = "../../tests/unit/unit/handle.rs"]
mod tests;
