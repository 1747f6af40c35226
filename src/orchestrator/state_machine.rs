use std::sync::mpsc;

use crate::foundation::core::{BandSpecification, ImageSize, OutputBuffer, RunId, UnitId};
use crate::foundation::error::{BandError, BandResult};
use crate::layout::partition::band_specifications;
use crate::orchestrator::opts::{JobOptions, OrchestratorOpts};
use crate::unit::handle::UnitHandle;
use crate::unit::protocol::{UnitCommand, UnitEvent};
use crate::unit::spawner::UnitSpawner;

/// Lifecycle of an [`Orchestrator`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OrchestratorState {
    /// No units exist yet.
    Uninitialized,
    /// Units are spawned; waiting for every one of them to report readiness.
    Initializing,
    /// Every unit is ready; waiting for `start`.
    Ready,
    /// A run is in flight.
    Running,
    /// Every unit reported full progress for the current run.
    Complete,
    /// A fatal error ended the orchestration.
    Faulted,
}

/// One relayed unit emission.
#[derive(Debug)]
pub struct ProgressUpdate {
    /// Unit that produced the buffer.
    pub unit: UnitId,
    /// Run the buffer belongs to.
    pub run: RunId,
    /// Unweighted mean of every unit's progress, in `[0, 1]`.
    pub aggregate_progress: f64,
    /// Progress the unit itself reported, passed through unaltered.
    pub unit_progress: f64,
    /// Band pixels, moved from the unit without copying.
    pub buffer: OutputBuffer,
    /// Where the buffer belongs in the full image.
    pub band: BandSpecification,
}

/// Event surfaced to the caller.
#[derive(Debug)]
pub enum OrchestratorEvent {
    /// Every unit is initialized. Emitted exactly once per orchestrator.
    Ready,
    /// A unit emitted progress and output.
    Progress(ProgressUpdate),
    /// Every unit reached full progress for the current run.
    Complete,
}

/// Owns a pool of compute units and runs the initialize, barrier, run, aggregate protocol.
///
/// The orchestrator is single-threaded and owns its handle table exclusively; units only talk
/// to it through the shared inbound event channel. Reaction to an event
/// ([`Orchestrator::handle_event`]) never blocks; the pump methods are thin wrappers that take
/// the next event from the channel.
///
/// There is no cancellation, no readiness timeout and no fault isolation: any unit error is
/// fatal, and a unit that never reports readiness stalls [`Orchestrator::wait_ready`].
pub struct Orchestrator<S: UnitSpawner> {
    spawner: S,
    opts: OrchestratorOpts,
    state: OrchestratorState,
    handles: Vec<UnitHandle<S::Endpoint>>,
    expected_units: usize,
    image: Option<ImageSize>,
    run: RunId,
    complete_pending: bool,
    events: Option<mpsc::Receiver<UnitEvent>>,
}

impl<S: UnitSpawner> Orchestrator<S> {
    /// Create an uninitialized orchestrator.
    pub fn new(spawner: S, opts: OrchestratorOpts) -> Self {
        Self {
            spawner,
            opts,
            state: OrchestratorState::Uninitialized,
            handles: Vec::new(),
            expected_units: 0,
            image: None,
            run: RunId::default(),
            complete_pending: false,
            events: None,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> OrchestratorState {
        self.state
    }

    /// Number of spawned units.
    pub fn unit_count(&self) -> usize {
        self.handles.len()
    }

    /// Image size given to `initialize`, if any.
    pub fn image_size(&self) -> Option<ImageSize> {
        self.image
    }

    /// Current run generation (`RunId(0)` before the first `start`).
    pub fn run(&self) -> RunId {
        self.run
    }

    /// Options this orchestrator was created with.
    pub fn opts(&self) -> &OrchestratorOpts {
        &self.opts
    }

    /// Band specification of `unit` for the current run.
    pub fn band(&self, unit: UnitId) -> Option<&BandSpecification> {
        self.handles.get(unit.index()).map(|h| h.band())
    }

    /// Band specifications of every unit, in unit order.
    pub fn bands(&self) -> impl Iterator<Item = &BandSpecification> + '_ {
        self.handles.iter().map(|h| h.band())
    }

    /// Last progress reported by `unit` in the current run.
    pub fn unit_progress(&self, unit: UnitId) -> Option<f64> {
        self.handles.get(unit.index()).map(|h| h.progress())
    }

    /// Unweighted mean of every unit's progress (0 when no unit exists).
    pub fn aggregate_progress(&self) -> f64 {
        if self.handles.is_empty() {
            return 0.0;
        }
        let sum: f64 = self.handles.iter().map(|h| h.progress()).sum();
        sum / self.handles.len() as f64
    }

    /// Spawn the unit pool for an image of `size`.
    ///
    /// The number of units comes from the configured policy applied to `concurrency_hint`.
    /// Every unit receives its band geometry immediately. If any unit fails to spawn, every
    /// unit spawned so far is dropped and the orchestrator becomes [`OrchestratorState::Faulted`].
    #[tracing::instrument(skip(self), fields(policy = %self.opts.policy))]
    pub fn initialize(&mut self, concurrency_hint: u32, size: ImageSize) -> BandResult<()> {
        if self.state != OrchestratorState::Uninitialized {
            return Err(BandError::validation(
                "initialize may only be called once per orchestrator",
            ));
        }

        let unit_count = self.opts.policy.unit_count(concurrency_hint);
        let specs = band_specifications(size, unit_count)?;

        self.state = OrchestratorState::Initializing;
        self.image = Some(size);
        self.expected_units = specs.len();

        let (tx, rx) = mpsc::channel::<UnitEvent>();
        for (i, spec) in specs.into_iter().enumerate() {
            let id = UnitId(i as u32);
            if let Err(e) = self.spawn_unit(id, spec, tx.clone()) {
                tracing::error!(unit = %id, error = %e, "spawn failed; tearing down unit pool");
                self.tear_down();
                return Err(e);
            }
        }
        // Only units hold senders from here on, so a fully exited pool disconnects the channel.
        drop(tx);
        self.events = Some(rx);

        tracing::info!(units = unit_count, width = size.width, height = size.height, "unit pool spawned");
        Ok(())
    }

    fn spawn_unit(
        &mut self,
        id: UnitId,
        spec: BandSpecification,
        events: mpsc::Sender<UnitEvent>,
    ) -> BandResult<()> {
        let endpoint = self.spawner.spawn(id, events).map_err(|e| match e {
            BandError::SpawnFailure { .. } => e,
            other => BandError::spawn_failure(id, other.to_string()),
        })?;
        let mut handle = UnitHandle::new(id, spec.clone(), endpoint);
        handle
            .send(UnitCommand::Init { id, spec })
            .map_err(|e| BandError::spawn_failure(id, e.to_string()))?;
        self.handles.push(handle);
        Ok(())
    }

    /// Block until the readiness barrier releases.
    ///
    /// Returns immediately when the pool is already ready (or running).
    pub fn wait_ready(&mut self) -> BandResult<()> {
        while self.state == OrchestratorState::Initializing {
            if let OrchestratorEvent::Ready = self.next_event()? {
                return Ok(());
            }
        }
        match self.state {
            OrchestratorState::Ready | OrchestratorState::Running | OrchestratorState::Complete => {
                Ok(())
            }
            OrchestratorState::Faulted => Err(BandError::Halted),
            _ => Err(BandError::validation("wait_ready requires an initialized orchestrator")),
        }
    }

    /// Begin a new run on every unit.
    ///
    /// One seed is drawn per call (unless `job` pins it) and sent identically to every unit.
    /// Starting again while a run is in flight reuses the pool; late events from the superseded
    /// run are discarded.
    #[tracing::instrument(skip(self))]
    pub fn start(&mut self, job: &JobOptions) -> BandResult<RunId> {
        match self.state {
            OrchestratorState::Ready | OrchestratorState::Running | OrchestratorState::Complete => {}
            OrchestratorState::Faulted => return Err(BandError::Halted),
            state => {
                return Err(BandError::validation(format!(
                    "start requires a ready orchestrator (state is {state:?})"
                )));
            }
        }
        job.validate()?;

        let seed = job.draw_seed();
        let run = RunId(self.run.0 + 1);
        self.run = run;
        self.complete_pending = false;

        for handle in &mut self.handles {
            let spec = handle
                .band()
                .with_sampling(job.samples_per_pixel, Some(seed));
            handle.begin_run(spec.clone());
            if let Err(e) = handle.send(UnitCommand::Start { run, spec }) {
                tracing::error!(unit = %handle.id(), error = %e, "failed to start unit");
                self.state = OrchestratorState::Faulted;
                return Err(e);
            }
        }

        self.state = OrchestratorState::Running;
        tracing::info!(%run, seed, units = self.handles.len(), "run started");
        Ok(run)
    }

    /// React to one unit event.
    ///
    /// Returns the caller-facing event it produced, if any. Errors are fatal: the orchestrator
    /// moves to [`OrchestratorState::Faulted`] and every later call returns
    /// [`BandError::Halted`]. When the event completes the run, the state becomes
    /// [`OrchestratorState::Complete`] and the pump methods emit [`OrchestratorEvent::Complete`]
    /// right after the returned progress event.
    pub fn handle_event(&mut self, event: UnitEvent) -> BandResult<Option<OrchestratorEvent>> {
        if self.state == OrchestratorState::Faulted {
            return Err(BandError::Halted);
        }
        let initializing = self.state == OrchestratorState::Initializing;
        let result = self.react(event);
        if let Err(e) = &result {
            tracing::error!(error = %e, "orchestration faulted");
            if initializing {
                self.tear_down();
            } else {
                self.state = OrchestratorState::Faulted;
            }
        }
        result
    }

    /// Drop every unit endpoint and the event channel; no partial pool outlives a failed
    /// initialization.
    fn tear_down(&mut self) {
        self.handles.clear();
        self.events = None;
        self.state = OrchestratorState::Faulted;
    }

    fn react(&mut self, event: UnitEvent) -> BandResult<Option<OrchestratorEvent>> {
        match event {
            UnitEvent::Ready { id } => self.on_ready(id),
            UnitEvent::Progress {
                id,
                run,
                progress,
                buffer,
            } => self.on_progress(id, run, progress, buffer),
            UnitEvent::Fault { id, message } => Err(match self.state {
                OrchestratorState::Initializing => BandError::spawn_failure(id, message),
                _ => BandError::unit_fault(id, message),
            }),
        }
    }

    fn on_ready(&mut self, id: UnitId) -> BandResult<Option<OrchestratorEvent>> {
        if self.state != OrchestratorState::Initializing {
            return Err(BandError::malformed(format!(
                "unit {id} reported readiness outside initialization (state is {:?})",
                self.state
            )));
        }
        self.handle_mut(id)?.mark_ready()?;
        tracing::debug!(unit = %id, "unit ready");

        if self.all_ready() {
            self.state = OrchestratorState::Ready;
            tracing::info!(units = self.handles.len(), "all units ready");
            return Ok(Some(OrchestratorEvent::Ready));
        }
        Ok(None)
    }

    fn all_ready(&self) -> bool {
        self.handles.len() == self.expected_units && self.handles.iter().all(|h| h.is_ready())
    }

    fn on_progress(
        &mut self,
        id: UnitId,
        run: RunId,
        progress: f64,
        buffer: OutputBuffer,
    ) -> BandResult<Option<OrchestratorEvent>> {
        if !matches!(
            self.state,
            OrchestratorState::Running | OrchestratorState::Complete
        ) {
            return Err(BandError::malformed(format!(
                "unit {id} reported progress before any run started (state is {:?})",
                self.state
            )));
        }
        if run > self.run {
            return Err(BandError::malformed(format!(
                "unit {id} reported progress for unknown run {run}"
            )));
        }
        if run < self.run {
            tracing::warn!(unit = %id, %run, current = %self.run, "discarding event from superseded run");
            return Ok(None);
        }

        let handle = self.handle_mut(id)?;
        let expected_len = handle.band().rgba_len();
        if buffer.len() != expected_len {
            return Err(BandError::malformed(format!(
                "unit {id} emitted {} bytes, band needs {expected_len}",
                buffer.len()
            )));
        }
        handle.record_progress(progress)?;
        let band = handle.band().clone();

        let aggregate_progress = self.aggregate_progress();
        tracing::debug!(unit = %id, progress, aggregate_progress, "unit progress");

        if self.state == OrchestratorState::Running && self.handles.iter().all(|h| h.progress() >= 1.0)
        {
            self.state = OrchestratorState::Complete;
            self.complete_pending = true;
            tracing::info!(%run, "run complete");
        }

        Ok(Some(OrchestratorEvent::Progress(ProgressUpdate {
            unit: id,
            run,
            aggregate_progress,
            unit_progress: progress,
            buffer,
            band,
        })))
    }

    fn handle_mut(&mut self, id: UnitId) -> BandResult<&mut UnitHandle<S::Endpoint>> {
        self.handles
            .get_mut(id.index())
            .ok_or_else(|| BandError::malformed(format!("event from unknown unit {id}")))
    }

    /// Block until the next caller-facing event.
    pub fn next_event(&mut self) -> BandResult<OrchestratorEvent> {
        loop {
            if let Some(event) = self.take_pending()? {
                return Ok(event);
            }
            let received = self.receiver()?.recv();
            let event = match received {
                Ok(event) => event,
                Err(mpsc::RecvError) => return Err(self.disconnected()),
            };
            if let Some(out) = self.handle_event(event)? {
                return Ok(out);
            }
        }
    }

    /// Process every queued unit event without blocking; return the first caller-facing event.
    pub fn try_next_event(&mut self) -> BandResult<Option<OrchestratorEvent>> {
        loop {
            if let Some(event) = self.take_pending()? {
                return Ok(Some(event));
            }
            let received = self.receiver()?.try_recv();
            let event = match received {
                Ok(event) => event,
                Err(mpsc::TryRecvError::Empty) => return Ok(None),
                Err(mpsc::TryRecvError::Disconnected) => return Err(self.disconnected()),
            };
            if let Some(out) = self.handle_event(event)? {
                return Ok(Some(out));
            }
        }
    }

    /// Iterate the current run's progress updates until the run completes.
    ///
    /// The iterator yields at most one error and then ends. Called before
    /// [`Orchestrator::start`], it yields a validation error instead of waiting on idle units.
    pub fn progress_updates(&mut self) -> ProgressUpdates<'_, S> {
        ProgressUpdates {
            orchestrator: self,
            done: false,
        }
    }

    fn take_pending(&mut self) -> BandResult<Option<OrchestratorEvent>> {
        if self.state == OrchestratorState::Faulted {
            return Err(BandError::Halted);
        }
        if self.complete_pending {
            self.complete_pending = false;
            return Ok(Some(OrchestratorEvent::Complete));
        }
        Ok(None)
    }

    fn receiver(&self) -> BandResult<&mpsc::Receiver<UnitEvent>> {
        self.events
            .as_ref()
            .ok_or_else(|| BandError::validation("orchestrator is not initialized"))
    }

    fn disconnected(&mut self) -> BandError {
        self.state = OrchestratorState::Faulted;
        tracing::error!("every compute unit disconnected");
        BandError::Other(anyhow::anyhow!(
            "every compute unit disconnected without reporting a fault"
        ))
    }
}

/// Iterator over the progress updates of one run; see [`Orchestrator::progress_updates`].
pub struct ProgressUpdates<'a, S: UnitSpawner> {
    orchestrator: &'a mut Orchestrator<S>,
    done: bool,
}

impl<S: UnitSpawner> Iterator for ProgressUpdates<'_, S> {
    type Item = BandResult<ProgressUpdate>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            let orchestrator = &*self.orchestrator;
            if matches!(
                orchestrator.state,
                OrchestratorState::Uninitialized
                    | OrchestratorState::Initializing
                    | OrchestratorState::Ready
            ) {
                self.done = true;
                return Some(Err(BandError::validation(format!(
                    "progress updates require a started run (state is {:?})",
                    orchestrator.state
                ))));
            }
            if orchestrator.state == OrchestratorState::Complete && !orchestrator.complete_pending {
                // Completion was already consumed elsewhere; units are idle.
                self.done = true;
                break;
            }
            match self.orchestrator.next_event() {
                Ok(OrchestratorEvent::Progress(update)) => return Some(Ok(update)),
                Ok(OrchestratorEvent::Complete | OrchestratorEvent::Ready) => self.done = true,
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
        None
    }
}

#[cfg(test)]
#[path = "../../tests/unit/orchestrator/state_machine.rs"]
mod tests;
