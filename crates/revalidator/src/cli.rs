//! Exposes the command line application.
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use revalidator_cache::ResultCache;
use revalidator_cache::metrics;

use crate::config::Config;
use crate::logging;

/// Revalidator commands.
#[derive(Debug, Subcommand)]
enum Command {
    /// Remove every entry owned by the configured cache.
    Clear,
}

/// Command line interface parser.
#[derive(Debug, Parser)]
#[command(bin_name = "revalidator", version, about)]
struct Cli {
    /// Path to your configuration file.
    #[arg(long, short, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

impl Cli {
    /// Returns the path to the configuration file.
    fn config(&self) -> Option<&Path> {
        self.config.as_deref()
    }
}

/// Runs the main application.
pub fn execute() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::get(cli.config()).context("failed loading config")?;

    let _sentry = sentry::init(sentry::ClientOptions {
        dsn: config.sentry_dsn.clone(),
        release: sentry::release_name!(),
        ..Default::default()
    });

    // SAFETY: We are still single-threaded here, the runtime is only started below.
    unsafe { logging::init_logging(&config) };

    if let Some(ref statsd) = config.metrics.statsd {
        let mut tags = config.metrics.custom_tags.clone();
        if let Some(hostname_tag) = config.metrics.hostname_tag.clone() {
            if let Some(hostname) = hostname::get().ok().and_then(|s| s.into_string().ok()) {
                tags.insert(hostname_tag, hostname);
            }
        }
        metrics::configure_statsd(&config.metrics.prefix, statsd, tags)
            .context("failed to configure statsd")?;
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("revalidator")
        .enable_all()
        .build()
        .context("failed to start the runtime")?;

    match cli.command {
        Command::Clear => runtime.block_on(clear(&config))?,
    }

    Ok(())
}

/// Clears the configured cache, printing the number of removed entries.
async fn clear(config: &Config) -> Result<()> {
    let cache = ResultCache::from_config(&config.cache).context("failed to open the cache store")?;
    let cleared = cache.clear().await.context("failed to clear the cache")?;

    tracing::info!("Cleared {} entries from {:?}", cleared, config.cache.store);
    println!("{cleared}");
    Ok(())
}
