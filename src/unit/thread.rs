use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, mpsc};

use crate::foundation::core::{BandSpecification, OutputBuffer, RunId, UnitId};
use crate::foundation::error::{BandError, BandResult};
use crate::unit::protocol::{UnitCommand, UnitEvent};
use crate::unit::spawner::{EventSender, UnitEndpoint, UnitSpawner};

/// The render capability executed inside a compute unit.
///
/// `render` receives the authoritative specification for one run and calls `emit` zero or more
/// times with a non-decreasing progress fraction and a freshly allocated band buffer
/// (see [`OutputBuffer`] for the layout). Returning an error, or panicking, faults the unit.
pub trait BandRenderer: Send + Sync + 'static {
    /// Render the band described by `spec`.
    fn render(
        &self,
        spec: &BandSpecification,
        emit: &mut dyn FnMut(f64, OutputBuffer),
    ) -> BandResult<()>;
}

/// Spawns each compute unit as a dedicated OS thread running a shared [`BandRenderer`].
pub struct ThreadSpawner<R> {
    renderer: Arc<R>,
    name_prefix: String,
}

impl<R: BandRenderer> ThreadSpawner<R> {
    /// Create a spawner whose units all run `renderer`.
    pub fn new(renderer: R) -> Self {
        Self::from_arc(Arc::new(renderer))
    }

    /// Create a spawner sharing an existing renderer.
    pub fn from_arc(renderer: Arc<R>) -> Self {
        Self {
            renderer,
            name_prefix: "bandtrace-unit".to_string(),
        }
    }

    /// Override the thread name prefix (`<prefix>-<id>`).
    pub fn with_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.name_prefix = prefix.into();
        self
    }
}

impl<R: BandRenderer> UnitSpawner for ThreadSpawner<R> {
    type Endpoint = ThreadEndpoint;

    fn spawn(&mut self, id: UnitId, events: EventSender) -> BandResult<ThreadEndpoint> {
        let (tx, rx) = mpsc::channel::<UnitCommand>();
        let renderer = Arc::clone(&self.renderer);
        std::thread::Builder::new()
            .name(format!("{}-{id}", self.name_prefix))
            .spawn(move || unit_main(id, renderer.as_ref(), rx, events))
            .map_err(|e| BandError::spawn_failure(id, format!("failed to spawn thread: {e}")))?;
        Ok(ThreadEndpoint { id, commands: tx })
    }
}

/// Command endpoint of a thread-backed unit.
///
/// Dropping it disconnects the unit's command channel; the thread exits once it is idle. A run
/// in flight is never interrupted.
#[derive(Debug)]
pub struct ThreadEndpoint {
    id: UnitId,
    commands: mpsc::Sender<UnitCommand>,
}

impl UnitEndpoint for ThreadEndpoint {
    fn send(&mut self, command: UnitCommand) -> BandResult<()> {
        self.commands
            .send(command)
            .map_err(|_| BandError::unit_fault(self.id, "unit thread is no longer accepting commands"))
    }
}

/// Why a unit stops processing commands.
enum Stop {
    /// The orchestrator dropped the event channel; exit quietly.
    Disconnected,
    /// Report a fault, then exit.
    Fault(String),
}

fn unit_main<R: BandRenderer + ?Sized>(
    id: UnitId,
    renderer: &R,
    commands: mpsc::Receiver<UnitCommand>,
    events: EventSender,
) {
    let mut initialized = false;

    while let Ok(command) = commands.recv() {
        let outcome = match command {
            UnitCommand::Init { id: assigned, spec } => {
                if assigned != id {
                    Err(Stop::Fault(format!("init addressed to unit {assigned}")))
                } else if let Err(e) = spec.validate() {
                    Err(Stop::Fault(e.to_string()))
                } else {
                    initialized = true;
                    tracing::debug!(unit = %id, rows = ?spec.rows(), "unit initialized");
                    send_event(&events, UnitEvent::Ready { id })
                }
            }
            UnitCommand::Start { run, spec } if initialized => {
                run_band(id, run, renderer, &spec, &events)
            }
            UnitCommand::Start { .. } => {
                Err(Stop::Fault("start received before init".to_string()))
            }
        };

        match outcome {
            Ok(()) => {}
            Err(Stop::Disconnected) => return,
            Err(Stop::Fault(message)) => {
                tracing::error!(unit = %id, %message, "unit faulted");
                let _ = events.send(UnitEvent::Fault { id, message });
                return;
            }
        }
    }

    tracing::debug!(unit = %id, "command channel closed; unit exiting");
}

fn send_event(events: &EventSender, event: UnitEvent) -> Result<(), Stop> {
    events.send(event).map_err(|_| Stop::Disconnected)
}

fn run_band<R: BandRenderer + ?Sized>(
    id: UnitId,
    run: RunId,
    renderer: &R,
    spec: &BandSpecification,
    events: &EventSender,
) -> Result<(), Stop> {
    spec.validate().map_err(|e| Stop::Fault(e.to_string()))?;

    if spec.is_empty() {
        return send_event(
            events,
            UnitEvent::Progress {
                id,
                run,
                progress: 1.0,
                buffer: OutputBuffer::default(),
            },
        );
    }

    let mut disconnected = false;
    let mut emit = |progress: f64, buffer: OutputBuffer| {
        if disconnected {
            return;
        }
        let event = UnitEvent::Progress {
            id,
            run,
            progress,
            buffer,
        };
        disconnected = events.send(event).is_err();
    };

    let result = panic::catch_unwind(AssertUnwindSafe(|| renderer.render(spec, &mut emit)));
    match result {
        Ok(Ok(())) if disconnected => Err(Stop::Disconnected),
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(Stop::Fault(e.to_string())),
        Err(payload) => Err(Stop::Fault(panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("renderer panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("renderer panicked: {s}")
    } else {
        "renderer panicked".to_string()
    }
}

#[cfg(test)]
#[path = "../../tests/unit/unit/thread.rs"]
mod tests;
