//! bandtrace splits an image into horizontal bands and renders each band on its own compute
//! unit, relaying progress and band pixels back to a single caller.
//!
//! # Protocol overview
//!
//! 1. **Initialize**: [`Orchestrator::initialize`] asks the [`UnitCountPolicy`] how many units to
//!    spawn, partitions the image rows ([`partition`]) and sends every unit its band geometry.
//! 2. **Barrier**: every unit reports readiness; the orchestrator emits exactly one
//!    [`OrchestratorEvent::Ready`] once the last one arrives.
//! 3. **Run**: [`Orchestrator::start`] draws one seed for the run and sends each unit its full
//!    [`BandSpecification`].
//! 4. **Aggregate**: each unit emission becomes one [`OrchestratorEvent::Progress`] carrying the
//!    mean progress of all units, the band buffer (moved, never copied) and the band placement.
//!
//! Design constraints:
//!
//! - **No unsafe**: `unsafe` is forbidden in this crate.
//! - **Fail fast**: any unit fault or protocol violation ends the orchestration.
//! - **Owned state**: the handle table belongs to one [`Orchestrator`]; there are no globals, so
//!   independent orchestrations can coexist.
//! - **Band-scoped buffers**: a relayed [`OutputBuffer`] covers only its own band; use
//!   [`FrameCompositor`] to assemble the full frame.
#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod foundation;
mod layout;
mod orchestrator;
mod render;
mod unit;

pub use foundation::core::{Band, BandSpecification, ImageSize, OutputBuffer, RunId, UnitId};
pub use foundation::error::{BandError, BandResult};
pub use layout::partition::{band_specifications, partition};
pub use orchestrator::opts::{JobOptions, OrchestratorOpts, RenderJob, available_concurrency};
pub use orchestrator::state_machine::{
    Orchestrator, OrchestratorEvent, OrchestratorState, ProgressUpdate, ProgressUpdates,
};
pub use orchestrator::policy::UnitCountPolicy;
pub use render::composite::FrameCompositor;
pub use render::gradient::{DEFAULT_SAMPLES_PER_PIXEL, GradientSphereRenderer};
pub use unit::protocol::{UnitCommand, UnitEvent};
pub use unit::spawner::{EventSender, UnitEndpoint, UnitSpawner};
pub use unit::thread::{BandRenderer, ThreadEndpoint, ThreadSpawner};
