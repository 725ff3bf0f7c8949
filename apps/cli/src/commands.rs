//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;
use url::Url;

use cadmesh_artifacts::ArtifactStore;
use cadmesh_core::service::{EstimateRequest, SubmitRequest};
use cadmesh_core::{JobManager, PipelineService, Reply};
use cadmesh_engine::{EngineAdapter, FakeMeshEngine, HttpMeshEngine, MeshEngine};
use cadmesh_intake::{Classifier, Normalizer};
use cadmesh_shared::{
    AppConfig, EngineKind, JobConfig, JobStatus, OutputFormat, Quality, init_config, load_config,
};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// CadMesh: turn CAD files into 3D meshes.
#[derive(Parser)]
#[command(
    name = "cadmesh",
    version,
    about = "Classify, normalize and convert CAD drawings, documents and solids into 3D meshes.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Override the configured engine implementation.
    #[arg(long, global = true)]
    pub engine: Option<EngineChoice>,

    /// Override the configured engine base URL.
    #[arg(long, global = true, env = "MESH_ENGINE_URL")]
    pub engine_url: Option<Url>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Engine implementation selectable from the command line.
#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub(crate) enum EngineChoice {
    Http,
    Fake,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Report the format, family and size of each file.
    Classify {
        /// Files to classify.
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Copy files into the upload store, classifying each first.
    Upload {
        /// Files to ingest.
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Estimate processing time for a batch of files.
    Estimate {
        /// Files (or bare file names) to estimate.
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Print the full response as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Normalize inputs and generate a mesh, waiting for the job to finish.
    Generate {
        /// Input files.
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Model identifier (defaults to a fresh UUID).
        #[arg(short, long)]
        model_id: Option<String>,

        /// Output mesh format.
        #[arg(short, long)]
        format: Option<OutputFormatArg>,

        /// Overall quality level.
        #[arg(short, long)]
        quality: Option<QualityArg>,

        /// Extra generation options as a JSON object.
        #[arg(long)]
        options: Option<String>,

        /// Print the final job status as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Resolve a generated model file by name.
    Fetch {
        /// Bare filename inside the models directory.
        filename: String,

        /// Copy the model here instead of printing its path.
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Check that the pipeline can be assembled from the current config.
    Health,

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub(crate) enum OutputFormatArg {
    Glb,
    Gltf,
    Obj,
    Stl,
}

impl From<OutputFormatArg> for OutputFormat {
    fn from(value: OutputFormatArg) -> Self {
        match value {
            OutputFormatArg::Glb => Self::Glb,
            OutputFormatArg::Gltf => Self::Gltf,
            OutputFormatArg::Obj => Self::Obj,
            OutputFormatArg::Stl => Self::Stl,
        }
    }
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub(crate) enum QualityArg {
    Low,
    Medium,
    High,
}

impl From<QualityArg> for Quality {
    fn from(value: QualityArg) -> Self {
        match value {
            QualityArg::Low => Self::Low,
            QualityArg::Medium => Self::Medium,
            QualityArg::High => Self::High,
        }
    }
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "cadmesh=info,cadmesh_core=info,cadmesh_intake=info,cadmesh_engine=info",
        1 => "cadmesh=debug,cadmesh_core=debug,cadmesh_intake=debug,cadmesh_engine=debug",
        _ => "cadmesh=trace,cadmesh_core=trace,cadmesh_intake=trace,cadmesh_engine=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let overrides = Overrides {
        engine: cli.engine,
        engine_url: cli.engine_url,
    };

    match cli.command {
        Command::Classify { files } => cmd_classify(&files),
        Command::Upload { files } => cmd_upload(&overrides, &files),
        Command::Estimate { files, json } => cmd_estimate(&overrides, files, json),
        Command::Generate {
            files,
            model_id,
            format,
            quality,
            options,
            json,
        } => {
            let options = options
                .map(|raw| serde_json::from_str(&raw))
                .transpose()
                .map_err(|e| eyre!("--options is not valid JSON: {e}"))?;
            let request = SubmitRequest {
                input_files: files,
                model_id,
                output_format: format.map(Into::into),
                quality: quality.map(Into::into),
                options,
            };
            cmd_generate(&overrides, request, json).await
        }
        Command::Fetch { filename, out } => cmd_fetch(&overrides, &filename, out.as_deref()),
        Command::Health => cmd_health(&overrides),
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(&overrides),
        },
    }
}

/// Command-line settings layered over the loaded config.
struct Overrides {
    engine: Option<EngineChoice>,
    engine_url: Option<Url>,
}

impl Overrides {
    fn apply(&self, config: &mut AppConfig) {
        match self.engine {
            Some(EngineChoice::Http) => config.engine.kind = EngineKind::Http,
            Some(EngineChoice::Fake) => config.engine.kind = EngineKind::Fake,
            None => {}
        }
        if let Some(url) = &self.engine_url {
            config.engine.base_url = url.clone();
        }
    }
}

fn resolved_config(overrides: &Overrides) -> Result<AppConfig> {
    let mut config = load_config()?;
    overrides.apply(&mut config);
    Ok(config)
}

/// Assemble the full pipeline from config.
fn build_service(config: &AppConfig) -> Result<PipelineService> {
    let store = ArtifactStore::new(&config.storage);
    store.ensure_dirs()?;

    let engine: Arc<dyn MeshEngine> = match config.engine.kind {
        EngineKind::Http => Arc::new(HttpMeshEngine::from_config(config)?),
        EngineKind::Fake => Arc::new(
            FakeMeshEngine::succeeding()
                .with_delay(Duration::from_secs(2))
                .with_progress([25, 50, 75]),
        ),
    };
    let adapter = EngineAdapter::new(engine, store.clone());
    let engine_name = adapter.engine_name().to_string();

    let jobs = JobManager::new(adapter, JobConfig::from(config));
    let normalizer = Normalizer::from_config(store.clone(), &config.tools);
    let classifier = Classifier::with_limit(config.limits.max_file_size);

    info!(
        engine = %engine_name,
        max_file_size = config.limits.max_file_size,
        max_concurrent_jobs = config.limits.max_concurrent_jobs,
        "pipeline assembled"
    );
    Ok(PipelineService::new(
        classifier,
        normalizer,
        jobs,
        store,
        engine_name,
    ))
}

/// Turn an error reply into a CLI error carrying its code.
fn accept<T: serde::Serialize>(reply: Reply<T>) -> Result<T> {
    let status = reply.status();
    reply.into_result().map_err(|body| {
        let mut message = format!("{} ({}, status {status})", body.error, body.code);
        for detail in &body.details {
            message.push_str(&format!("\n  {}: {}", detail.file, detail.reason));
        }
        eyre!(message)
    })
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

fn cmd_classify(files: &[PathBuf]) -> Result<()> {
    let config = load_config()?;
    let classifier = Classifier::with_limit(config.limits.max_file_size);

    let mut rejected = 0usize;
    for file in files {
        match classifier.classify(file) {
            Ok(c) => println!(
                "  {:<40} {:<5} {:<17} {:>8.2} MB",
                file.display(),
                c.format,
                serde_json::to_value(c.family)?
                    .as_str()
                    .unwrap_or_default(),
                c.size_mb
            ),
            Err(e) => {
                rejected += 1;
                println!("  {:<40} rejected: {e}", file.display());
            }
        }
    }

    if rejected == files.len() {
        return Err(eyre!("no supported files"));
    }
    Ok(())
}

fn cmd_upload(overrides: &Overrides, files: &[PathBuf]) -> Result<()> {
    let config = resolved_config(overrides)?;
    let service = build_service(&config)?;

    let mut failed = 0usize;
    for file in files {
        let name = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| eyre!("{} has no file name", file.display()))?;
        let bytes =
            std::fs::read(file).map_err(|e| eyre!("failed to read {}: {e}", file.display()))?;

        match accept(service.upload(&name, &bytes)) {
            Ok(stored) => println!("  {:<40} {:<5} {}", name, stored.format, stored.path.display()),
            Err(e) => {
                failed += 1;
                println!("  {name:<40} rejected: {e}");
            }
        }
    }

    if failed == files.len() {
        return Err(eyre!("no files uploaded"));
    }
    Ok(())
}

fn cmd_estimate(overrides: &Overrides, files: Vec<PathBuf>, json: bool) -> Result<()> {
    let config = resolved_config(overrides)?;
    let service = build_service(&config)?;
    let reply = service.estimate_batch(EstimateRequest { files });

    if json {
        println!("{}", serde_json::to_string_pretty(&reply.to_json())?);
        return Ok(());
    }

    let body = accept(reply)?;
    println!();
    println!("  Estimated time: {}s", body.estimated_time);
    println!("  Files:          {}", body.total_files);
    println!("  Types:          {}", body.file_types.join(", "));
    for rec in &body.recommendations {
        println!("  - {rec}");
    }
    for r in &body.rejected {
        println!("  skipped {}: {}", r.file, r.reason);
    }
    println!();
    Ok(())
}

async fn cmd_generate(overrides: &Overrides, request: SubmitRequest, json: bool) -> Result<()> {
    let config = resolved_config(overrides)?;
    let service = build_service(&config)?;

    let submitted = accept(service.submit(request).await)?;
    for r in &submitted.rejected {
        eprintln!("  skipped {}: {}", r.file, r.reason);
    }
    info!(job_id = %submitted.job_id, model_id = %submitted.model_id, "waiting for job");

    let bar = ProgressBar::new(100);
    bar.set_style(
        ProgressStyle::with_template("{spinner:.cyan} [{bar:30.cyan/blue}] {pos:>3}% {msg}")?
            .progress_chars("=> ")
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
    );
    bar.enable_steady_tick(Duration::from_millis(80));

    let job_id = submitted.job_id.to_string();
    let status = loop {
        let status = accept(service.status(&job_id))?;
        bar.set_position(u64::from(status.progress));
        bar.set_message(status.status.to_string());
        if status.status.is_terminal() {
            break status;
        }
        tokio::time::sleep(Duration::from_millis(250)).await;
    };
    bar.finish_and_clear();

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
    }

    match (status.status, &status.result) {
        (JobStatus::Completed, Some(result)) => {
            if !json {
                println!();
                println!("  Mesh generated!");
                println!("  Job:      {}", status.job_id);
                println!("  Model:    {}", status.model_id);
                println!("  Artifact: {}", result.artifact_location);
                println!("  Vertices: {}", result.vertex_count);
                println!("  Faces:    {}", result.face_count);
                if let Some(texture) = result.texture_dimensions {
                    println!("  Texture:  {texture}");
                }
                println!("  Time:     {:.1}s", result.processing_duration_seconds);
                println!();
            }
            Ok(())
        }
        _ => Err(eyre!(
            "job {} failed: {}",
            status.job_id,
            status.error.as_deref().unwrap_or("unknown error")
        )),
    }
}

fn cmd_fetch(overrides: &Overrides, filename: &str, out: Option<&Path>) -> Result<()> {
    let config = resolved_config(overrides)?;
    let service = build_service(&config)?;
    let found = accept(service.fetch_artifact(filename))?;

    match out {
        Some(dest) => {
            let bytes = std::fs::copy(&found.path, dest).map_err(|e| {
                eyre!("failed to copy {} to {}: {e}", found.path.display(), dest.display())
            })?;
            info!(filename, bytes, dest = %dest.display(), "model fetched");
        }
        None => println!("{}", found.path.display()),
    }
    Ok(())
}

fn cmd_health(overrides: &Overrides) -> Result<()> {
    let config = resolved_config(overrides)?;
    let service = build_service(&config)?;
    println!(
        "{}",
        serde_json::to_string_pretty(&service.health().to_json())?
    );
    Ok(())
}

fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(overrides: &Overrides) -> Result<()> {
    let config = resolved_config(overrides)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}
