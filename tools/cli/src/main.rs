//! davsync CLI - directory synchronization over WebDAV.
//!
//! Reads a TOML configuration file (creating a template on first run),
//! connects to the WebDAV server, and runs one push or pull pass between
//! a local directory and the remote tree.

mod console;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use serde::{Deserialize, Serialize};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use console::ConsoleProgress;
use davsync_common::RelPath;
use davsync_engine::{Direction, NoopSink, ProgressSink, SyncConfig, SyncEngine};
use davsync_storage::{RemoteStore, WebdavStore};

#[derive(Parser)]
#[command(name = "davsync")]
#[command(about = "Synchronize a local directory with a WebDAV server")]
#[command(version)]
struct Cli {
    /// Path to the configuration file.
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Sync direction: "push" (local -> remote) or "pull" (remote -> local).
    #[arg(short, long)]
    mode: Option<String>,

    /// Delete destination entries that no longer exist on the source.
    #[arg(long)]
    mirror_deletes: bool,

    /// Log plain lines instead of drawing per-file progress bars.
    #[arg(long)]
    no_progress: bool,

    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,
}

/// On-disk configuration. Every field has a default so a partial file is
/// valid and the generated template is complete.
#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
struct FileConfig {
    /// WebDAV endpoint, e.g. "http://localhost:5244/dav".
    webdav_url: String,
    webdav_username: String,
    webdav_password: String,
    /// Directory on the server to sync against, relative to the endpoint.
    remote_root: String,

    /// Local directory to sync, created if missing.
    local_dir: PathBuf,

    /// "push" (local -> remote) or "pull" (remote -> local).
    mode: Direction,
    /// Delete destination entries absent from the source.
    mirror_deletes: bool,
    /// Compare file content instead of timestamps (reserved).
    compare_content: bool,

    max_concurrent: usize,
    max_retries: u32,
    retry_delay_secs: u64,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            webdav_url: "http://localhost:5244/dav".to_string(),
            webdav_username: "guest".to_string(),
            webdav_password: "guest".to_string(),
            remote_root: String::new(),
            local_dir: PathBuf::from("./sync"),
            mode: Direction::Pull,
            mirror_deletes: false,
            compare_content: false,
            max_concurrent: 5,
            max_retries: 3,
            retry_delay_secs: 2,
        }
    }
}

/// Load the configuration, or write a template and return `None` so the
/// user can fill in credentials before the first real run.
fn load_or_init(path: &Path) -> Result<Option<FileConfig>> {
    if !path.exists() {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }
        let template = toml::to_string_pretty(&FileConfig::default())
            .context("Failed to serialize default configuration")?;
        std::fs::write(path, template)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        eprintln!(
            "Created default configuration at {}. Edit it and run again.",
            path.display()
        );
        return Ok(None);
    }

    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let config: FileConfig =
        toml::from_str(&raw).with_context(|| format!("Failed to parse {}", path.display()))?;
    Ok(Some(config))
}

fn parse_mode(mode: &str) -> Result<Direction> {
    match mode {
        "push" => Ok(Direction::Push),
        "pull" => Ok(Direction::Pull),
        other => anyhow::bail!("Invalid mode '{other}'. Use: push or pull"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let Some(mut config) = load_or_init(&cli.config)? else {
        std::process::exit(1);
    };

    // Command line flags override the file.
    if let Some(mode) = &cli.mode {
        config.mode = parse_mode(mode)?;
    }
    if cli.mirror_deletes {
        config.mirror_deletes = true;
    }

    info!(
        "mode: {} ({})",
        config.mode,
        match config.mode {
            Direction::Push => "local -> WebDAV",
            Direction::Pull => "WebDAV -> local",
        }
    );
    if config.mirror_deletes {
        info!("mirror deletes enabled: destination extras will be removed");
    }

    tokio::fs::create_dir_all(&config.local_dir)
        .await
        .with_context(|| format!("Failed to create {}", config.local_dir.display()))?;

    let remote_root = (!config.remote_root.is_empty()).then_some(config.remote_root.as_str());
    let store = WebdavStore::new(
        &config.webdav_url,
        &config.webdav_username,
        &config.webdav_password,
        remote_root,
    )
    .context("Failed to configure WebDAV client")?;

    // Probe the connection before walking anything.
    store
        .exists(&RelPath::root())
        .await
        .with_context(|| format!("Cannot reach WebDAV server at {}", config.webdav_url))?;

    let sink: Arc<dyn ProgressSink> = if cli.no_progress {
        Arc::new(NoopSink)
    } else {
        Arc::new(ConsoleProgress::new())
    };

    let sync_config = SyncConfig {
        direction: config.mode,
        mirror_deletes: config.mirror_deletes,
        compare_content: config.compare_content,
        max_concurrent: config.max_concurrent,
        max_retries: config.max_retries,
        retry_base_delay: Duration::from_secs(config.retry_delay_secs),
    };
    let engine = SyncEngine::new(
        sync_config,
        Arc::new(store) as Arc<dyn RemoteStore>,
        config.local_dir.clone(),
        sink,
    )
    .context("Invalid sync configuration")?;

    let report = engine.run().await.context("Sync failed")?;

    println!(
        "Done: {} transferred, {} unchanged, {} deleted, {} directories created in {:.1?}",
        report.files_transferred,
        report.files_skipped,
        report.files_deleted,
        report.dirs_created,
        report.duration
    );

    if !report.is_clean() {
        anyhow::bail!(
            "{} error(s) during sync, first: {}",
            report.errors.len(),
            report.first_error().unwrap_or("unknown")
        );
    }
    Ok(())
}
