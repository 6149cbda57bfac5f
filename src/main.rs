use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use kitcheck::archive::{self, ExtractLimits};
use kitcheck::core::db::InventoryDb;
use kitcheck::detection::{DetectParams, DetectorPool};
use kitcheck::media::MediaStore;
use kitcheck::service::{BatchCheckResponse, CheckResponse};
use kitcheck::{BatchOrchestrator, CheckService, ImageInput, Settings, build_standard_pipeline};

#[derive(Parser)]
#[command(name = "kitcheck")]
#[command(about = "Check photographed tool kits against their expected inventory")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Path to config file (TOML)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Save debug outputs to directory (must be empty)
    #[arg(long, global = true, value_name = "DIR")]
    debug_out: Option<PathBuf>,

    /// Override the inventory database path
    #[arg(long, global = true, value_name = "FILE")]
    database: Option<PathBuf>,

    /// Override the detector model path
    #[arg(long, global = true, value_name = "FILE")]
    model: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Check a single image against a toolkit
    Check {
        #[arg(value_name = "IMAGE")]
        image_path: PathBuf,
        #[arg(long)]
        toolkit: i64,
        /// Confidence threshold applied to every class
        #[arg(long)]
        confidence: Option<f32>,
        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },
    /// Check images and .zip / .tar / .tar.zst archives as one batch
    Batch {
        #[arg(value_name = "INPUT", required = true)]
        inputs: Vec<PathBuf>,
        #[arg(long)]
        toolkit: i64,
        #[arg(long)]
        confidence: Option<f32>,
        /// Maximum number of images checked concurrently
        #[arg(long)]
        workers: Option<usize>,
        #[arg(long)]
        json: bool,
    },
    /// Start the HTTP server
    Serve {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
    },
    /// Create the default tool catalog in an empty database
    Seed,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { cli.log_level.as_str() };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with_target(true)
        .init();

    let mut settings = Settings::load(cli.config.as_deref())?;
    if let Some(database) = &cli.database {
        settings.database_path = database.clone();
    }
    if let Some(model) = &cli.model {
        settings.detector.model_path = model.clone();
    }

    match cli.command {
        Command::Check {
            image_path,
            toolkit,
            confidence,
            json,
        } => {
            let service = build_service(&settings, cli.debug_out).await?;
            let bytes = std::fs::read(&image_path)?;
            let response = service
                .check_image(bytes, &display_name(&image_path), toolkit, confidence)
                .await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&response)?);
            } else {
                print_check(&response);
            }
            service.db().close().await;
        }
        Command::Batch {
            inputs,
            toolkit,
            confidence,
            workers,
            json,
        } => {
            if let Some(workers) = workers {
                settings.batch.workers = workers.max(1);
            }
            let service = build_service(&settings, cli.debug_out).await?;
            let images = collect_inputs(&inputs, settings.extract_limits())?;
            let response = service.check_batch(images, toolkit, confidence).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&response)?);
            } else {
                print_batch(&response);
            }
            service.db().close().await;
        }
        Command::Serve { host, port } => {
            if let Some(host) = host {
                settings.server.host = host;
            }
            if let Some(port) = port {
                settings.server.port = port;
            }
            let service = build_service(&settings, cli.debug_out).await?;
            kitcheck::server::serve(service, &settings.server).await?;
        }
        Command::Seed => {
            let db = open_db(&settings.database_path).await?;
            match db.seed_default_catalog().await? {
                Some(toolkit_id) => println!("Created default toolkit {}", toolkit_id),
                None => println!("Database already has toolkits, nothing seeded"),
            }
            db.close().await;
        }
    }

    Ok(())
}

async fn open_db(path: &Path) -> anyhow::Result<InventoryDb> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    InventoryDb::open(path).await
}

async fn build_service(settings: &Settings, debug_out: Option<PathBuf>) -> anyhow::Result<CheckService> {
    let db = open_db(&settings.database_path).await?;
    let media = Arc::new(MediaStore::open(&settings.media_dir)?);

    let detector = Arc::new(DetectorPool::load(&settings.detector));
    let mut pipeline = build_standard_pipeline(detector, DetectParams::from(&settings.detector));
    if let Some(dir) = debug_out {
        pipeline = pipeline.with_debug(dir)?;
    }

    let orchestrator = BatchOrchestrator::new(Arc::new(pipeline))
        .with_workers(settings.batch.workers)
        .with_item_timeout(settings.batch.item_timeout_secs.map(Duration::from_secs));

    Ok(CheckService::new(db, orchestrator, media, settings.threshold_map()?)
        .with_extract_limits(settings.extract_limits()))
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn is_archive(path: &Path) -> bool {
    let name = path.to_string_lossy().to_ascii_lowercase();
    name.ends_with(".zip") || name.ends_with(".tar") || name.ends_with(".tar.zst") || name.ends_with(".tzst")
}

/// Expand archives in place so the batch keeps command-line order
fn collect_inputs(paths: &[PathBuf], limits: ExtractLimits) -> anyhow::Result<Vec<ImageInput>> {
    let mut images = Vec::new();
    for path in paths {
        let bytes = std::fs::read(path)?;
        if is_archive(path) {
            images.extend(archive::extract_images_with_limits(&bytes, limits)?);
        } else {
            images.push(ImageInput::new(display_name(path), bytes));
        }
    }
    Ok(images)
}

fn print_check(response: &CheckResponse) {
    println!("\n=== Toolkit Check ===");
    println!("Found tools: {}", response.found_tools.len());
    for tool in &response.found_tools {
        println!("  {} ({})", tool.name, tool.serial_number);
    }
    println!("Detected classes: {:?}", response.raw_class_ids);
    println!("Inference time: {:.1} ms", response.inference_time_ms);
    println!("Processed image: {}", response.processed_image_url);
    if response.manual_review {
        println!("Manual review required");
    } else {
        println!("Toolkit complete");
    }
}

fn print_batch(response: &BatchCheckResponse) {
    println!("\n=== Batch Check ===");
    println!(
        "Images: {} successful, {} failed",
        response.successful_images, response.failed_images
    );
    for result in &response.results {
        match &result.error_message {
            Some(error) => println!("  {}: FAILED ({})", result.filename, error),
            None => println!(
                "  {}: {} tools found{}",
                result.filename,
                result.found_tools.len(),
                if result.manual_review { ", manual review" } else { "" }
            ),
        }
    }
}
