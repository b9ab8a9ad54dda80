//! # busscriptsd: busscripts daemon
//!
//! Composition root that wires all adapters together and runs the daemon.
//!
//! ## Responsibilities
//! - Parse configuration (CLI args, env vars, config file)
//! - Initialise logging
//! - Build the runtime and connect it to the broker
//! - Load scripts once retained state has settled
//! - Exit on a script change (hot reload) or on SIGINT/SIGTERM
//!
//! ## Dependency rule
//! This is the **only** crate that depends on all other crates.
//! It is the wiring layer; no domain logic belongs here.

mod config;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use busscripts_adapter_mqtt::MqttBus;
use busscripts_adapter_rhai::RhaiCompiler;
use busscripts_adapter_watch::{DEFAULT_DEBOUNCE, SourceWatcher};
use busscripts_app::host::IsolationHost;
use busscripts_app::ports::{BusPublisher, ScriptCompiler};
use busscripts_app::runtime::Runtime;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::config::{Cli, Config};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = match Config::load(&cli) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("busscriptsd: {:#}", anyhow::Error::new(err));
            return ExitCode::FAILURE;
        }
    };
    init_logging(&config);

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!("busscriptsd failed: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_directive()));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn run(config: Config) -> anyhow::Result<()> {
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        url = %config.mqtt.url,
        name = %config.mqtt.name,
        "busscriptsd starting"
    );

    let bus = MqttBus::new(config.mqtt.clone()).context("invalid broker configuration")?;
    let publisher: Arc<dyn BusPublisher> = Arc::new(bus.publisher());
    let runtime = Arc::new(Runtime::new(config.runtime_settings(), publisher));
    let _sun = runtime.start();
    let (_bus, settled) = bus.spawn(Arc::clone(&runtime));

    tokio::select! {
        result = settled => result.context("bus task stopped before warm-up finished")?,
        () = shutdown_signal() => {
            tracing::info!("shutdown requested before scripts were loaded");
            return Ok(());
        }
    }

    let sources = config.sources();
    let host = IsolationHost::new(Arc::clone(&runtime), RhaiCompiler::new());
    if sources.is_empty() {
        tracing::info!("no script sources configured, mirroring state only");
    } else {
        let report = host.load_all(&sources);
        tracing::info!(
            loaded = report.loaded.len(),
            failed = report.failed.len(),
            "scripts loaded"
        );
    }

    let mut watcher = if config.scripts.watch && !sources.is_empty() {
        let compiler = *host.compiler();
        let watcher = SourceWatcher::start(
            &sources.dirs,
            &sources.files,
            DEFAULT_DEBOUNCE,
            move |path| compiler.recognizes(path),
        )
        .context("failed to watch script sources")?;
        Some(watcher)
    } else {
        None
    };

    tokio::select! {
        Some(path) = next_change(&mut watcher) => {
            tracing::info!(path = %path.display(), "change detected, exiting");
        }
        () = shutdown_signal() => {
            tracing::info!("shutdown requested");
        }
    }
    Ok(())
}

async fn next_change(watcher: &mut Option<SourceWatcher>) -> Option<PathBuf> {
    match watcher {
        Some(watcher) => watcher.changed().await,
        None => std::future::pending().await,
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::warn!(%err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::warn!(%err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
