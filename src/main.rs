use std::path::PathBuf;

use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use tracing::{info, warn};

use image_reconciler::config::{self, RunConfig};
use image_reconciler::context::RunContext;
use image_reconciler::image::ImageReference;
use image_reconciler::logging::{self, LogFormat};
use image_reconciler::reconcile::{Reconciler, create_default_registries};

#[derive(Parser)]
#[command(name = "image-reconciler")]
#[command(
    version,
    about = "Check deployed container images for newer builds and plan stale tag cleanup"
)]
struct Cli {
    /// Run configuration (JSON). Defaults to the user config file when present.
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = LogFormat::Compact)]
    log_format: LogFormat,

    /// Write logs to this file instead of stderr
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Deployed image references, e.g. ghcr.io/team/app:1.2.0
    #[arg(required = true)]
    images: Vec<String>,
}

fn load_config(path: Option<PathBuf>) -> anyhow::Result<RunConfig> {
    match path {
        Some(path) => config::load(&path)
            .with_context(|| format!("failed to load config from {}", path.display())),
        None => {
            let path = config::default_config_path();
            if path.exists() {
                config::load(&path)
                    .with_context(|| format!("failed to load config from {}", path.display()))
            } else {
                Ok(RunConfig::default())
            }
        }
    }
}

async fn run(cli: Cli, config: RunConfig) -> anyhow::Result<()> {
    let images: Vec<ImageReference> = cli
        .images
        .iter()
        .filter_map(|raw| match raw.parse() {
            Ok(image) => Some(image),
            Err(e) => {
                warn!("Ignoring image reference: {}", e);
                None
            }
        })
        .collect();

    let (ctx, cancel) = RunContext::from_config(&config, Utc::now());
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling outstanding registry calls");
            cancel.cancel();
        }
    });

    let registries = create_default_registries(&config.registries);
    let reconciler = Reconciler::new(config, registries);
    let report = reconciler.run(&images, &ctx).await;

    println!("{}", serde_json::to_string_pretty(&report)?);
    info!("Reconciliation finished");
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _guard = logging::init(cli.log_format, cli.log_file.as_deref())?;
    let config = load_config(cli.config.clone())?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(run(cli, config))
}
