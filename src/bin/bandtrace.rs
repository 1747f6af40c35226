use std::{
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
    time::Instant,
};

use anyhow::Context as _;
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "bandtrace", version)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Render the reference scene across parallel band units and write a PNG.
    Render(RenderArgs),
    /// Print the band partition a render would use, as JSON.
    Bands(BandsArgs),
}

#[derive(Args, Debug)]
struct JobArgs {
    /// JSON job file. Explicit flags override its values.
    #[arg(long)]
    job: Option<PathBuf>,

    /// Output width in pixels.
    #[arg(long)]
    width: Option<u32>,

    /// Output height in pixels.
    #[arg(long)]
    height: Option<u32>,

    /// Concurrency hint (defaults to available parallelism).
    #[arg(long)]
    concurrency: Option<u32>,

    /// Unit count policy applied to the concurrency hint.
    #[arg(long, value_enum)]
    policy: Option<PolicyChoice>,
}

#[derive(Parser, Debug)]
struct RenderArgs {
    #[command(flatten)]
    job: JobArgs,

    /// Samples per pixel.
    #[arg(long)]
    spp: Option<u32>,

    /// Pin the run seed (random per run otherwise).
    #[arg(long)]
    seed: Option<u64>,

    /// Output PNG path.
    #[arg(long)]
    out: PathBuf,
}

#[derive(Parser, Debug)]
struct BandsArgs {
    #[command(flatten)]
    job: JobArgs,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum PolicyChoice {
    ReserveTwo,
    MatchHint,
    Oversample,
}

impl PolicyChoice {
    fn policy(self) -> bandtrace::UnitCountPolicy {
        match self {
            Self::ReserveTwo => bandtrace::UnitCountPolicy::reserve_two(),
            Self::MatchHint => bandtrace::UnitCountPolicy::match_hint(),
            Self::Oversample => bandtrace::UnitCountPolicy::oversample(),
        }
    }
}

const DEFAULT_WIDTH: u32 = 320;
const DEFAULT_HEIGHT: u32 = 180;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.cmd {
        Command::Render(args) => cmd_render(args),
        Command::Bands(args) => cmd_bands(args),
    }
}

fn read_job_json(path: &Path) -> anyhow::Result<bandtrace::RenderJob> {
    let f = File::open(path).with_context(|| format!("open job '{}'", path.display()))?;
    let job = bandtrace::RenderJob::from_reader(BufReader::new(f))
        .with_context(|| format!("parse job '{}'", path.display()))?;
    Ok(job)
}

fn resolve_job(args: &JobArgs) -> anyhow::Result<bandtrace::RenderJob> {
    let mut job = match &args.job {
        Some(path) => read_job_json(path)?,
        None => bandtrace::RenderJob {
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            concurrency: None,
            orchestrator: bandtrace::OrchestratorOpts::default(),
            job: bandtrace::JobOptions::default(),
        },
    };
    if let Some(width) = args.width {
        job.width = width;
    }
    if let Some(height) = args.height {
        job.height = height;
    }
    if let Some(concurrency) = args.concurrency {
        job.concurrency = Some(concurrency);
    }
    if let Some(policy) = args.policy {
        job.orchestrator.policy = policy.policy();
    }
    job.validate()?;
    Ok(job)
}

fn cmd_render(args: RenderArgs) -> anyhow::Result<()> {
    let mut job = resolve_job(&args.job)?;
    if args.spp.is_some() {
        job.job.samples_per_pixel = args.spp;
    }
    if args.seed.is_some() {
        job.job.seed = args.seed;
    }
    job.validate()?;

    let size = job.image_size()?;
    let spawner = bandtrace::ThreadSpawner::new(bandtrace::GradientSphereRenderer::new());
    let mut orchestrator = bandtrace::Orchestrator::new(spawner, job.orchestrator.clone());

    let started = Instant::now();
    orchestrator.initialize(job.concurrency_hint(), size)?;
    orchestrator.wait_ready()?;
    tracing::info!(
        units = orchestrator.unit_count(),
        policy = %orchestrator.opts().policy,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "units ready"
    );

    let run = orchestrator.start(&job.job)?;
    let mut frame = bandtrace::FrameCompositor::new(size);
    let mut last_logged = 0.0;
    for update in orchestrator.progress_updates() {
        let update = update.with_context(|| format!("run {run} failed"))?;
        frame.place(&update.band, &update.buffer)?;
        if update.aggregate_progress - last_logged >= 0.1 || update.aggregate_progress >= 1.0 {
            last_logged = update.aggregate_progress;
            tracing::info!(
                progress = %format!("{:.0}%", update.aggregate_progress * 100.0),
                "rendering"
            );
        }
    }

    if let Some(parent) = args.out.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create output dir '{}'", parent.display()))?;
    }
    frame
        .into_image()?
        .save_with_format(&args.out, image::ImageFormat::Png)
        .with_context(|| format!("write png '{}'", args.out.display()))?;

    tracing::info!(
        elapsed_ms = started.elapsed().as_millis() as u64,
        "wrote {}",
        args.out.display()
    );
    Ok(())
}

fn cmd_bands(args: BandsArgs) -> anyhow::Result<()> {
    let job = resolve_job(&args.job)?;
    let hint = job.concurrency_hint();
    let units = job.orchestrator.policy.unit_count(hint);
    let bands = bandtrace::band_specifications(job.image_size()?, units)?;

    let out = serde_json::json!({
        "policy": job.orchestrator.policy.name(),
        "concurrency": hint,
        "units": units,
        "bands": bands,
    });
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}
