use std::io::Read;

use crate::foundation::core::ImageSize;
use crate::foundation::error::{BandError, BandResult};
use crate::orchestrator::policy::UnitCountPolicy;

/// Options fixed for the lifetime of an [`crate::Orchestrator`].
#[derive(Clone, Debug, Default, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct OrchestratorOpts {
    /// How many compute units to spawn for a concurrency hint.
    pub policy: UnitCountPolicy,
}

/// Per-run options passed to [`crate::Orchestrator::start`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct JobOptions {
    /// Quality parameter forwarded to every unit. `None` lets the renderer pick.
    pub samples_per_pixel: Option<u32>,
    /// Pin the run seed. `None` draws a fresh seed for every run.
    pub seed: Option<u64>,
}

impl JobOptions {
    /// Reject option values no renderer can honor.
    pub fn validate(&self) -> BandResult<()> {
        if self.samples_per_pixel == Some(0) {
            return Err(BandError::validation("samples_per_pixel must be >= 1"));
        }
        Ok(())
    }

    /// Seed for one run: the pinned seed, or a freshly drawn one.
    pub fn draw_seed(&self) -> u64 {
        self.seed.unwrap_or_else(rand::random)
    }
}

/// A complete render request, as loaded from a JSON job file.
///
/// ```json
/// { "width": 320, "height": 180, "concurrency": 8,
///   "orchestrator": { "policy": "oversample" },
///   "job": { "samples_per_pixel": 16, "seed": 7 } }
/// ```
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct RenderJob {
    /// Output width in pixels.
    pub width: u32,
    /// Output height in pixels.
    pub height: u32,
    /// Concurrency hint. `None` uses the machine's available parallelism.
    #[serde(default)]
    pub concurrency: Option<u32>,
    /// Orchestrator options.
    #[serde(default)]
    pub orchestrator: OrchestratorOpts,
    /// Per-run options.
    #[serde(default)]
    pub job: JobOptions,
}

impl RenderJob {
    /// Parse and validate a job description.
    pub fn from_reader(reader: impl Read) -> BandResult<Self> {
        let job: Self =
            serde_json::from_reader(reader).map_err(|e| BandError::serde(e.to_string()))?;
        job.validate()?;
        Ok(job)
    }

    /// Validate dimensions and run options.
    pub fn validate(&self) -> BandResult<()> {
        self.image_size()?;
        if self.concurrency == Some(0) {
            return Err(BandError::validation("concurrency must be >= 1 when set"));
        }
        self.job.validate()
    }

    /// Output image size.
    pub fn image_size(&self) -> BandResult<ImageSize> {
        ImageSize::new(self.width, self.height)
    }

    /// Concurrency hint, defaulting to the machine's available parallelism.
    pub fn concurrency_hint(&self) -> u32 {
        self.concurrency.unwrap_or_else(available_concurrency)
    }
}

/// Number of hardware threads available to this process (at least 1).
pub fn available_concurrency() -> u32 {
    std::thread::available_parallelism()
        .map(|n| u32::try_from(n.get()).unwrap_or(u32::MAX))
        .unwrap_or(1)
}

#[cfg(test)]
#[path = "../../tests/unit/orchestrator/opts.rs"]
mod tests;
