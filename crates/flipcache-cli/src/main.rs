//! flipcache - pre-cache a presentation site for offline use.
//!
//! A command-line host for the flipcache worker: it installs the offline
//! cache with live progress, runs single requests through the worker, and
//! inspects or clears the stores on disk.

use std::io;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use flipcache_core::utils::{format_bytes, truncate_string};
use flipcache_core::{
    CacheStorage, CacheVersion, Clients, Config, HttpFetcher, InstallOutcome, InstallStatus,
    Request, ServiceWorker,
};

// ============================================================================
// Constants
// ============================================================================

/// Maximum URL width in `status` and `fetch` output
const MAX_URL_DISPLAY: usize = 100;

const USAGE: &str = "\
Usage: flipcache <command>

Commands:
  init                 Write the current configuration to the config file
  install              Pre-cache the site and activate the new cache version
  fetch <path-or-url>  Run one request through the active worker
  status               List cache stores and their contents
  manifest             Print the resolved pre-cache manifest
  sync                 Run background sync
  clear                Delete every cache store
  help                 Show this message

Environment:
  FLIPCACHE_ORIGIN     Override the site origin
  FLIPCACHE_CACHE_DIR  Override where cache stores live
  RUST_LOG             Log filter (default: info)";

/// Initialize the tracing subscriber for logging
fn init_tracing() {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let args: Vec<String> = std::env::args().collect();
    let command = args.get(1).map(String::as_str).unwrap_or("help");
    if matches!(command, "help" | "--help" | "-h") {
        println!("{}", USAGE);
        return Ok(());
    }

    init_tracing();
    let config = Config::load().context("Failed to load configuration")?;

    match command {
        "init" => init(&config),
        "install" => install(&config).await,
        "fetch" => {
            let target = args
                .get(2)
                .ok_or_else(|| anyhow::anyhow!("Missing argument: flipcache fetch <path-or-url>"))?;
            fetch(&config, target).await
        }
        "status" => status(&config).await,
        "manifest" => manifest(&config),
        "sync" => sync(&config).await,
        "clear" => clear(&config).await,
        other => {
            eprintln!("Unknown command: {}\n\n{}", other, USAGE);
            std::process::exit(2);
        }
    }
}

fn storage(config: &Config) -> Result<CacheStorage> {
    Ok(CacheStorage::disk(config.cache_dir()?))
}

fn build_worker(config: &Config, clients: Clients) -> Result<ServiceWorker> {
    let options = config.worker_options()?;
    let fetcher = HttpFetcher::new(&options.scope, config.request_timeout())
        .context("Failed to create HTTP client")?;
    ServiceWorker::new(options, storage(config)?, Arc::new(fetcher), clients)
        .context("Invalid worker configuration")
}

/// Write the effective configuration out so it can be edited.
fn init(config: &Config) -> Result<()> {
    let path = Config::config_path()?;
    if path.exists() {
        anyhow::bail!("Config file {} already exists", path.display());
    }
    config.save().context("Failed to save configuration")?;
    println!("Wrote {}", path.display());
    Ok(())
}

/// Install and activate, printing progress the way the page would show it.
async fn install(config: &Config) -> Result<()> {
    let clients = Clients::new();
    let mut page = clients.connect();
    let page_id = page.id();
    let mut worker = build_worker(config, clients.clone())?;

    info!(store = %worker.version(), origin = %worker.scope(), "Installing offline cache");

    let printer = tokio::spawn(async move {
        let mut status = InstallStatus::default();
        while let Some(message) = page.recv().await {
            status.apply(&message);
            eprintln!("{}", status);
        }
        status
    });

    let report = worker.run_lifecycle().await;
    clients.disconnect(page_id);
    let status = printer.await.context("Progress printer failed")?;
    let report = report?;

    match report.install {
        InstallOutcome::Completed(install) => {
            println!(
                "Cached {}/{} files in {} batches into {}",
                install.cached,
                install.total,
                install.batches,
                worker.cache_name()
            );
            if !install.is_complete() {
                println!("{} files are not available offline:", install.failed.len());
                for url in &install.failed {
                    println!("  {}", truncate_string(url.as_str(), MAX_URL_DISPLAY));
                }
            }
        }
        InstallOutcome::Aborted { reason } => {
            anyhow::bail!("Install aborted: {}", reason);
        }
    }

    if let Some(activate) = report.activate {
        for name in &activate.deleted {
            println!("Deleted old cache {}", name);
        }
        for name in &activate.failed {
            println!("Could not delete old cache {}", name);
        }
    }

    if !status.is_ready() {
        eprintln!("Warning: no completion message was received");
    }
    Ok(())
}

/// Run one request through an already-installed worker.
async fn fetch(config: &Config, target: &str) -> Result<()> {
    let mut worker = build_worker(config, Clients::new())?;
    if !worker.resume().await? {
        anyhow::bail!(
            "Cache {} is not installed. Run `flipcache install` first.",
            worker.cache_name()
        );
    }

    let url = worker
        .scope()
        .join(target)
        .with_context(|| format!("Invalid path or URL {:?}", target))?;
    let request = Request::infer(url);

    let response = worker.handle_fetch(&request).await;
    worker.settle().await;

    match response {
        Some(response) => {
            println!(
                "{} {} ({}, {}{})",
                response.status,
                truncate_string(response.url.as_str(), MAX_URL_DISPLAY),
                if response.from_cache { "cache" } else { "network" },
                format_bytes(response.body.len() as u64),
                response
                    .content_type()
                    .map(|ct| format!(", {}", ct))
                    .unwrap_or_default(),
            );
            Ok(())
        }
        None => anyhow::bail!("Network error: {} is unavailable offline", request.url),
    }
}

async fn status(config: &Config) -> Result<()> {
    let storage = storage(config)?;
    let current = config.version();
    let names = storage.keys().await?;

    if names.is_empty() {
        println!("No cache stores in {}", config.cache_dir()?.display());
        return Ok(());
    }

    for name in names {
        let cache = storage.open(&name).await?;
        let entries = cache.entries().await?;
        let newest = entries
            .iter()
            .max_by_key(|entry| entry.cached_at)
            .map(|entry| entry.age_display())
            .unwrap_or_else(|| "never".to_string());

        let label = if current.is_current(&name) {
            " (current)".to_string()
        } else {
            match CacheVersion::parse(&name) {
                Some(version) if version.prefix == current.prefix => {
                    format!(" (stale, v{})", version.version)
                }
                _ => " (stale)".to_string(),
            }
        };

        println!(
            "{}{}  {} entries, last cached {}",
            name,
            label,
            entries.len(),
            newest
        );
    }
    Ok(())
}

fn manifest(config: &Config) -> Result<()> {
    let worker = build_worker(config, Clients::new())?;
    let urls = worker.manifest_urls();
    for url in urls {
        println!("{}", url);
    }
    eprintln!("{} entries", urls.len());
    Ok(())
}

async fn sync(config: &Config) -> Result<()> {
    let mut worker = build_worker(config, Clients::new())?;
    if !worker.resume().await? {
        anyhow::bail!(
            "Cache {} is not installed. Run `flipcache install` first.",
            worker.cache_name()
        );
    }
    let stored = worker.sync(&config.sync_tag).await?;
    println!("Synced {}/{} URLs", stored, config.sync_urls.len());
    Ok(())
}

async fn clear(config: &Config) -> Result<()> {
    let storage = storage(config)?;
    let names = storage.keys().await?;
    for name in &names {
        storage.delete(name).await?;
        println!("Deleted {}", name);
    }
    if names.is_empty() {
        println!("Nothing to delete");
    }
    Ok(())
}
