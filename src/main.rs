use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use screenshot_uploader::config::{self, Config, StorageMode};
use screenshot_uploader::database;
use screenshot_uploader::security::InputValidator;
use screenshot_uploader::uploader::{
    ApiTransport, HttpApiClient, MultipartStorage, SignedUrlStorage, StorageBackend,
};
use screenshot_uploader::{DropZone, PendingFile, ScreenshotUploader, UploadTarget};

#[derive(Parser)]
#[command(
    name = "screenshot-uploader",
    version,
    about = "Upload screenshots to experiment variations"
)]
struct Cli {
    /// Config file (defaults to the user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Upload one or more screenshots to a variation
    Upload {
        #[arg(long)]
        experiment: String,
        #[arg(long)]
        variation: u32,
        /// Number of variations the experiment has
        #[arg(long, default_value_t = u32::MAX)]
        variations: u32,
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Verify the configured database connection
    DbCheck,
    /// Write a default config file, backing up any existing one
    InitConfig,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Command::InitConfig = cli.command {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
        match config::reset_config(cli.config.as_deref()) {
            Ok(_) => std::process::exit(0),
            Err(e) => {
                log::error!("Failed to write configuration: {}", e);
                std::process::exit(2);
            }
        }
    }

    let config = match config::load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(2);
        }
    };

    // Initialize logging
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(config.log_level.as_str()),
    )
    .init();

    let result = match cli.command {
        Command::Upload {
            experiment,
            variation,
            variations,
            files,
        } => upload(&config, UploadTarget::new(experiment, variation), variations, files).await,
        Command::DbCheck => db_check(&config).await,
        Command::InitConfig => Ok(0),
    };

    match result {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            log::error!("{:#}", e);
            std::process::exit(2);
        }
    }
}

async fn db_check(config: &Config) -> anyhow::Result<i32> {
    let params = config
        .database
        .as_ref()
        .context("No database section in configuration")?;

    database::check_connection(params)
        .await
        .with_context(|| format!("Database check failed for {}", params.redacted_url()))?;

    println!("Database connection OK: {}", params.redacted_url());
    Ok(0)
}

fn build_uploader(config: &Config) -> anyhow::Result<ScreenshotUploader> {
    let api: Arc<dyn ApiTransport> = Arc::new(HttpApiClient::new(
        &config.api_base_url,
        config.api_token.clone(),
        config.request_timeout(),
    )?);

    let storage: Arc<dyn StorageBackend> = match config.storage_mode {
        StorageMode::SignedUrl => Arc::new(SignedUrlStorage::new(
            api.clone(),
            config.request_timeout(),
        )?),
        StorageMode::Multipart => {
            let endpoint = config
                .upload_endpoint
                .as_deref()
                .context("upload_endpoint is required for multipart storage")?;
            Arc::new(MultipartStorage::new(
                endpoint,
                config.api_token.clone(),
                config.request_timeout(),
            )?)
        }
    };

    Ok(ScreenshotUploader::new(storage, api).with_call_timeout(config.call_timeout()))
}

async fn upload(
    config: &Config,
    target: UploadTarget,
    variation_count: u32,
    paths: Vec<PathBuf>,
) -> anyhow::Result<i32> {
    InputValidator::validate_target(&target, variation_count)?;

    let mut files = Vec::with_capacity(paths.len());
    let mut rejected = 0;
    for path in &paths {
        let file = match PendingFile::from_path(path).await {
            Ok(file) => file,
            Err(e) => {
                log::error!("Skipping {}: {}", path.display(), e);
                rejected += 1;
                continue;
            }
        };

        match InputValidator::validate_pending_file(&file, config.max_file_size_bytes()) {
            Ok(()) => files.push(file),
            Err(e) => {
                log::error!("Skipping {}: {}", path.display(), e);
                rejected += 1;
            }
        }
    }

    if files.is_empty() {
        anyhow::bail!("No valid files to upload");
    }

    let uploader = Arc::new(build_uploader(config)?);
    let zone = DropZone::new(uploader, target, |variation, screenshot| {
        match serde_json::to_string(&screenshot) {
            Ok(json) => println!("variation {}: {}", variation, json),
            Err(e) => log::warn!("Failed to serialize result: {}", e),
        }
    });

    let mut busy = zone.busy_watch();
    let busy_logger = tokio::spawn(async move {
        while busy.changed().await.is_ok() {
            let in_flight = *busy.borrow_and_update();
            log::debug!("In flight: {}", in_flight);
            if in_flight == 0 {
                log::info!("All uploads settled");
            }
        }
    });

    let submission = zone.on_files_dropped(files)?;
    let report = submission.settle().await;
    busy_logger.abort();

    for failure in zone.drain_failures() {
        eprintln!(
            "failed: {} ({:?}): {}",
            failure.file_name, failure.kind, failure.error
        );
    }

    println!(
        "{} uploaded, {} failed, {} skipped",
        report.successful_uploads.len(),
        report.failed_uploads.len(),
        rejected
    );

    Ok(if report.has_failures() || rejected > 0 { 1 } else { 0 })
}
