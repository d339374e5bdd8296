//! fswatcher - Rate-limited file system watch daemon
//!
//! Registers the watchers declared in the settings file and streams their
//! deliveries to stdout as JSON lines until interrupted.

use std::{
    env::args,
    io::{stderr, stdout},
    sync::Arc,
};

use {
    anyhow::{Result, anyhow},
    tokio::{signal::ctrl_c, spawn},
    tracing::{error, info, warn},
    tracing_subscriber::{EnvFilter, fmt},
};

use fswatcher::{
    bridge::{JsonLineWriter, pump},
    config::SettingsManager,
    error::{ErrorReporter, ResultExt},
    watch::{ChannelSink, WatchRegistry},
};

/// Main entry point for the fswatcher daemon.
///
/// Loads settings, registers every declared watcher, pumps deliveries to
/// stdout, and stops all watchers on Ctrl-C.
#[tokio::main]
async fn main() -> Result<()> {
    let settings_manager = match args().nth(1).as_deref() {
        Some("--config") => {
            let path = args()
                .nth(2)
                .ok_or_else(|| anyhow!("--config requires a path"))?;
            SettingsManager::with_config_path(path)
        }
        Some(other) => return Err(anyhow!("Unknown argument '{other}'")),
        None => SettingsManager::new(),
    }
    .add_context("Failed to load settings")?;
    let settings = settings_manager.get_settings().clone();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&settings.log_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    fmt()
        .with_env_filter(filter)
        .with_writer(stderr)
        .init();

    info!(
        "Loaded {} watcher(s) from {:?}",
        settings.watchers.len(),
        settings_manager.get_config_path()
    );

    let (sink, receiver) = ChannelSink::unbounded();
    let registry = WatchRegistry::with_current_runtime(Arc::new(sink.clone()))
        .add_context("Failed to create watch registry")?;

    let defaults = settings.watch_defaults();
    for options in &settings.watchers {
        if let Err(e) = registry
            .register_options(options, &defaults)
            .add_contextf(format_args!(
                "Failed to register watcher '{}'",
                options.source_identifier
            ))
        {
            ErrorReporter::warn(&e, "startup");
        }
    }
    if registry.is_empty() {
        warn!("No watchers are active; waiting for Ctrl-C");
    }

    let pretty = settings.pretty_json;
    let bridge = spawn(async move {
        let mut writer = JsonLineWriter::new(stdout(), pretty);
        pump(receiver, &mut writer).await
    });

    ctrl_c().await.add_context("Failed to listen for Ctrl-C")?;
    info!("Shutting down");

    registry.stop_all();
    sink.close();

    match bridge.await {
        Ok(Ok(written)) => info!("Wrote {} record(s)", written),
        Ok(Err(e)) => {
            ErrorReporter::error(&e, "event bridge");
            return Err(e);
        }
        Err(e) => error!("Event bridge task failed: {}", e),
    }

    Ok(())
}
