use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use novel_relay::config::Config;
use novel_relay::models::Glossary;
use novel_relay::source::{ChapterSources, LocalVolumeStore};
use novel_relay::translator::{ChatBackend, OpenAiBackend, SegmentTranslator};
use novel_relay::workspace::{JobDescriptor, Worker, WorkerReport, WorkspaceError, WorkspaceRegistry};

#[derive(Parser)]
#[command(
    name = "novel-relay",
    version,
    about = "Segment-level novel translation with self-hosted LLM workers",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (TOML); environment variables are used when absent
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format (text, json)
    #[arg(long, global = true, default_value = "text")]
    log_format: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Translate the chapters selected by a job descriptor
    Translate {
        /// Job descriptor, e.g. "sakura/local/my-volume?level=normal"
        descriptor: String,

        /// Display name of the job
        #[arg(short, long)]
        name: Option<String>,

        /// Number of concurrent workers
        #[arg(short, long)]
        workers: Option<usize>,
    },

    /// Import a directory of .txt chapters as a local volume
    Import {
        /// Volume id to create
        volume_id: String,

        /// Directory holding one .txt file per chapter
        #[arg(short, long)]
        input: PathBuf,

        /// Glossary file (JSON object of source term -> target term)
        #[arg(short, long)]
        glossary: Option<PathBuf>,
    },

    /// List backend models and show whether uploads would be accepted
    Models,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing/logging
    setup_tracing(&cli.log_format, cli.verbose)?;

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Translate {
            descriptor,
            name,
            workers,
        } => {
            translate(config, descriptor, name, workers).await?;
        }
        Commands::Import {
            volume_id,
            input,
            glossary,
        } => {
            import(&config, volume_id, input, glossary).await?;
        }
        Commands::Models => {
            models(&config).await?;
        }
    }

    Ok(())
}

fn setup_tracing(format: &str, verbose: bool) -> Result<()> {
    let env_filter = if verbose {
        tracing_subscriber::EnvFilter::new("novel_relay=debug,info")
    } else {
        tracing_subscriber::EnvFilter::new("novel_relay=info,warn")
    };

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    let config = match path {
        Some(path) => Config::from_file(path)?,
        None => Config::from_env()?,
    };
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn build_backend(config: &Config) -> Result<Arc<dyn ChatBackend>> {
    let backend = OpenAiBackend::with_retry(config.translator.http(), config.retry.clone())
        .context("Failed to create translator backend")?;
    Ok(Arc::new(backend))
}

async fn build_translator(config: &Config, backend: Arc<dyn ChatBackend>) -> SegmentTranslator {
    let mut translator = SegmentTranslator::new(backend, config.translator.settings())
        .with_policy(config.upload_policy());
    translator.init().await;
    translator
}

async fn translate(
    mut config: Config,
    descriptor: String,
    name: Option<String>,
    workers: Option<usize>,
) -> Result<()> {
    let descriptor: JobDescriptor = descriptor
        .parse()
        .with_context(|| format!("Invalid job descriptor: {descriptor}"))?;
    if descriptor.backend != config.translator.backend {
        tracing::info!(
            configured = %config.translator.backend,
            backend = %descriptor.backend,
            "Using the descriptor's backend"
        );
        config.translator.backend = descriptor.backend;
    }
    let workers = workers.unwrap_or(config.workspace.workers).max(1);
    let job_key = descriptor.to_string();
    tracing::info!(job = %job_key, workers, "Starting translate command");

    let store = LocalVolumeStore::new(&config.workspace.volumes_dir);
    let registry = WorkspaceRegistry::new(ChapterSources::new().with_local(Arc::new(store)))
        .with_segmentor(config.translator.backend, config.translator.segmentor());
    let backend = build_backend(&config)?;

    let cancel = CancellationToken::new();
    let mut set = JoinSet::new();
    for i in 0..workers {
        let translator = build_translator(&config, backend.clone()).await;
        let worker = Worker::new(format!("worker-{}", i + 1), translator, registry.clone());
        let cancel = cancel.clone();
        set.spawn(async move { worker.run(cancel).await });
    }

    let name = name.unwrap_or_else(|| descriptor.source.label_prefix());
    if !registry.add_job(descriptor, name).await {
        tracing::warn!(job = %job_key, "Job already active");
    }

    let mut totals = WorkerReport::default();
    let mut first_error: Option<WorkspaceError> = None;
    let mut record = |joined: Result<Result<WorkerReport, WorkspaceError>, tokio::task::JoinError>| {
        match joined {
            Ok(Ok(report)) => {
                totals.translated += report.translated;
                totals.failed += report.failed;
            }
            Ok(Err(e)) => {
                tracing::error!(error = %e, "Worker stopped with error");
                first_error.get_or_insert(e);
            }
            Err(e) => tracing::error!(error = %e, "Worker task panicked"),
        }
    };

    loop {
        tokio::select! {
            _ = registry.wait_until_idle(&cancel) => {
                tracing::info!("All jobs finished");
                break;
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::warn!("Interrupted, stopping workers");
                break;
            }
            joined = set.join_next() => match joined {
                Some(joined) => record(joined),
                None => {
                    tracing::warn!("No workers left");
                    break;
                }
            },
        }
    }

    cancel.cancel();
    while let Some(joined) = set.join_next().await {
        record(joined);
    }

    for entry in registry.records().await {
        println!(
            "{}: {}/{} chapters translated, {} failed{}",
            entry.description,
            entry.finished,
            entry.total,
            entry.failed,
            entry
                .error
                .map(|e| format!(" ({e})"))
                .unwrap_or_default()
        );
    }
    for job in registry.jobs().await {
        let stats = job.stats();
        println!(
            "{}: unfinished, {}/{} segments translated",
            job.name, stats.success_segments, stats.total_segments
        );
    }
    println!(
        "Segments translated: {}, failed: {}",
        totals.translated, totals.failed
    );

    if let Some(e) = first_error {
        if registry.jobs().await.iter().any(|j| j.key() == job_key) {
            return Err(e).context("Translation did not complete");
        }
    }

    tracing::info!("novel-relay completed successfully");
    Ok(())
}

async fn import(
    config: &Config,
    volume_id: String,
    input: PathBuf,
    glossary: Option<PathBuf>,
) -> Result<()> {
    tracing::info!(volume_id = %volume_id, input = %input.display(), "Starting import command");

    let mut files = Vec::new();
    let mut entries = tokio::fs::read_dir(&input)
        .await
        .with_context(|| format!("Failed to read directory: {}", input.display()))?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().is_some_and(|ext| ext == "txt") {
            files.push(path);
        }
    }
    files.sort();

    let mut chapters = Vec::with_capacity(files.len());
    for path in files {
        let Some(chapter_id) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        let content = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read chapter: {}", path.display()))?;
        let paragraphs = content.lines().map(str::to_string).collect();
        chapters.push((chapter_id.to_string(), paragraphs));
    }

    let glossary: Glossary = match glossary {
        Some(path) => {
            let content = tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("Failed to read glossary: {}", path.display()))?;
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse glossary: {}", path.display()))?
        }
        None => Glossary::new(),
    };

    let count = chapters.len();
    let store = LocalVolumeStore::new(&config.workspace.volumes_dir);
    store
        .create_volume(
            &volume_id,
            &uuid::Uuid::new_v4().to_string(),
            glossary,
            chapters,
        )
        .await?;

    println!("Imported {count} chapters into volume '{volume_id}'");
    Ok(())
}

async fn models(config: &Config) -> Result<()> {
    tracing::info!(endpoint = %config.translator.endpoint, "Starting models command");

    let backend = build_backend(config)?;
    let models = backend
        .list_models()
        .await
        .context("Failed to list backend models")?;
    if models.is_empty() {
        println!("Backend reported no models");
    }
    for model in &models {
        println!("{}", model.id);
    }

    let translator = build_translator(config, backend).await;
    let decision = translator.allow_upload();
    println!(
        "Upload {}: {}",
        if decision.allowed { "allowed" } else { "blocked" },
        decision.reason
    );
    Ok(())
}
