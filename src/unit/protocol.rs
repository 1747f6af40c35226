use crate::foundation::core::{BandSpecification, OutputBuffer, RunId, UnitId};

/// Command sent from the orchestrator to one compute unit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UnitCommand {
    /// Sent once right after spawn. The unit answers with [`UnitEvent::Ready`].
    Init {
        /// Identity assigned to the unit.
        id: UnitId,
        /// Band geometry (no sampling parameters yet).
        spec: BandSpecification,
    },
    /// Begin rendering a run. May be sent again for later runs on the same unit.
    Start {
        /// Generation the unit must echo in its progress events.
        run: RunId,
        /// Authoritative band specification for this run, including the shared seed.
        spec: BandSpecification,
    },
}

/// Event sent from a compute unit back to the orchestrator.
///
/// All units share one inbound channel, which preserves per-unit emission order.
#[derive(Debug)]
pub enum UnitEvent {
    /// The unit finished initializing.
    Ready {
        /// Reporting unit.
        id: UnitId,
    },
    /// Progressive output for the unit's band.
    Progress {
        /// Reporting unit.
        id: UnitId,
        /// Run the output belongs to.
        run: RunId,
        /// Completion fraction in `[0, 1]`, non-decreasing within a run.
        progress: f64,
        /// Current band pixels. Ownership moves to the orchestrator.
        buffer: OutputBuffer,
    },
    /// The unit failed. Always fatal for the orchestration.
    Fault {
        /// Reporting unit.
        id: UnitId,
        /// Human-readable cause.
        message: String,
    },
}

impl UnitEvent {
    /// Unit that emitted the event.
    pub fn unit(&self) -> UnitId {
        match self {
            Self::Ready { id } | Self::Progress { id, .. } | Self::Fault { id, .. } => *id,
        }
    }
}
