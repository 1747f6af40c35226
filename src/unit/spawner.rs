use std::sync::mpsc;

use crate::foundation::core::UnitId;
use crate::foundation::error::BandResult;
use crate::unit::protocol::{UnitCommand, UnitEvent};

/// Sending half of the shared inbound event channel handed to every unit.
pub type EventSender = mpsc::Sender<UnitEvent>;

/// Orchestrator-side endpoint of one compute unit.
pub trait UnitEndpoint {
    /// Deliver a command to the unit.
    fn send(&mut self, command: UnitCommand) -> BandResult<()>;
}

/// Creates compute units.
///
/// How a unit is bootstrapped (thread, process, remote worker) is entirely up to the
/// implementation; the orchestrator only sees the returned endpoint and the events the unit
/// pushes into `events`.
pub trait UnitSpawner {
    /// Endpoint type produced for each unit.
    type Endpoint: UnitEndpoint;

    /// Spawn the unit `id`, wiring its events into `events`.
    fn spawn(&mut self, id: UnitId, events: EventSender) -> BandResult<Self::Endpoint>;
}
