#![forbid(unsafe_code)]

//! `maestro-term` — terminal session lifecycle manager binary.
//!
//! Bootstraps configuration, the PTY process host, and the session
//! registry; reconciles persisted sessions against the live process
//! table; then runs the remote sync channel and orphan reaper until a
//! shutdown signal arrives.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use maestro_term::config::GlobalConfig;
use maestro_term::host::pty::PtyHost;
use maestro_term::host::ProcessHost;
use maestro_term::persistence::state::PersistedStateV1;
use maestro_term::persistence::store::StateStore;
use maestro_term::registry::{self, RegistrySettings};
use maestro_term::remote::api::MaestroClient;
use maestro_term::remote::dedup::SpawnDedup;
use maestro_term::remote::reaper;
use maestro_term::remote::sync::{self, SyncSettings};
use maestro_term::{reconcile, AppError, Result};

const HOST_EVENT_CAPACITY: usize = 256;

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "maestro-term", about = "Terminal session lifecycle manager", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: PathBuf,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Delete persisted state before starting.
    #[arg(long)]
    clear_data: bool,

    /// Override the data directory from the config file.
    #[arg(long)]
    data_dir: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("maestro-term bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let mut config = GlobalConfig::load_from_path(&args.config)?;
    if let Some(data_dir) = args.data_dir {
        config.data_dir = data_dir;
    }
    let config = Arc::new(config);
    info!(data_dir = %config.data_dir.display(), "configuration loaded");

    // ── Persistence ─────────────────────────────────────
    let store = StateStore::new(&config.data_dir)?;
    if args.clear_data {
        store.clear()?;
        info!("persisted state cleared");
    }
    let persisted = match store.load() {
        Ok(state) => state.unwrap_or_else(PersistedStateV1::empty),
        Err(err) => {
            error!(%err, "failed to load persisted state; starting empty");
            PersistedStateV1::empty()
        }
    };

    // ── Process host + registry ─────────────────────────
    let ct = CancellationToken::new();
    let (pty_host, host_events) = PtyHost::new(HOST_EVENT_CAPACITY);
    let host: Arc<dyn ProcessHost> = Arc::new(pty_host.clone());

    let settings = RegistrySettings {
        resize_suppress: config.resize_suppress(),
        default_idle: config.default_idle(),
        save_debounce: config.save_debounce(),
        layout_debounce: config.layout_debounce(),
        ..RegistrySettings::default()
    };
    let (registry, registry_events, registry_task) =
        registry::spawn(Arc::clone(&host), Arc::clone(&store), settings, ct.clone());
    let pump_task = registry.pump_host_events(host_events, ct.clone());

    // ── Reconcile persisted sessions against the process table ──
    let report = reconcile::run(&host, &registry, &persisted).await?;
    info!(?report, "startup restore finished");

    // ── Remote orchestration ────────────────────────────
    let mut remote_tasks = Vec::new();
    if config.maestro.enabled {
        let api = Arc::new(MaestroClient::new(config.maestro.base_url.clone())?);
        let dedup = SpawnDedup::new();
        let sync_settings = SyncSettings {
            initial_backoff: config.initial_backoff(),
            max_backoff: config.max_backoff(),
        };
        let (_sync_handle, sync_task) = sync::spawn_sync(
            Arc::clone(&api),
            registry.clone(),
            Arc::clone(&host),
            dedup,
            sync_settings,
            ct.clone(),
        );
        remote_tasks.push(sync_task);
        remote_tasks.push(sync::spawn_mirror(
            Arc::clone(&api),
            registry_events,
            ct.clone(),
        ));
        remote_tasks.push(reaper::spawn_reaper(
            api,
            registry.clone(),
            config.reap_interval(),
            ct.clone(),
        ));
        info!("remote sync started");
    } else {
        drop(registry_events);
        info!("maestro disabled; running local-only");
    }

    info!("maestro-term ready");

    // ── Wait for shutdown signal ────────────────────────
    shutdown_signal().await;
    info!("shutdown signal received");

    // Stop the registry first so pending saves flush and sessions are
    // closed or detached before background tasks are torn down.
    if let Err(err) = registry.shutdown(config.keep_sessions_on_exit).await {
        error!(%err, "registry shutdown failed");
    }
    ct.cancel();
    pty_host.shutdown(config.keep_sessions_on_exit);

    let _ = registry_task.await;
    let _ = pump_task.await;
    for task in remote_tasks {
        let _ = task.await;
    }
    info!("maestro-term shut down");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                tracing::warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
