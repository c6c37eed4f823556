use std::collections::BTreeMap;
use std::io::Write;

use anyhow::{Context, bail};
use satchel::SessionManager;
use satchel::config::{SessionConfig, SessionStoreConfig, SessionStoreTypeConfig};
use satchel::lifecycle::GcOutcome;
use satchel::scheduler::spawn_gc_task;
use satchel::session::id::SessionId;
use satchel::session::store::RecordStore;
use tracing::info;

use crate::args::{GcArgs, SessionArgs, StoreArgs, WatchArgs};

pub fn load_config(StoreArgs { config, store_dir }: &StoreArgs) -> anyhow::Result<SessionConfig> {
    let mut session_config = match config {
        Some(path) => SessionConfig::from_file(path)
            .with_context(|| format!("unable to load configuration from {}", path.display()))?,
        None => SessionConfig::default(),
    };
    if let Some(path) = store_dir {
        session_config.store = SessionStoreConfig::builder()
            .store_type(SessionStoreTypeConfig::File { path: path.clone() })
            .build();
    }

    Ok(session_config)
}

pub fn build_manager(args: &StoreArgs) -> anyhow::Result<SessionManager> {
    let config = load_config(args)?;
    SessionManager::from_config(config).context("unable to open session store")
}

pub async fn handle_gc(
    manager: &SessionManager,
    GcArgs { maintenance }: GcArgs,
    out: &mut impl Write,
) -> anyhow::Result<()> {
    manager.set_maintenance_mode(maintenance);
    let outcome = manager
        .run_garbage_collection()
        .await
        .context("unable to collect expired sessions")?;

    match outcome {
        GcOutcome::Collected(removed) => writeln!(out, "removed {removed} expired sessions")?,
        GcOutcome::SkippedMaintenance => writeln!(out, "skipped: maintenance mode")?,
        GcOutcome::AlreadyRunning => writeln!(out, "skipped: already running")?,
    }
    Ok(())
}

pub async fn handle_watch(
    manager: &SessionManager,
    WatchArgs { interval }: WatchArgs,
) -> anyhow::Result<()> {
    let interval = interval.unwrap_or(manager.config().gc.interval);
    let task = spawn_gc_task(manager, interval).context("unable to schedule garbage collection")?;

    tokio::signal::ctrl_c()
        .await
        .context("unable to listen for shutdown signal")?;
    info!("Received shutdown signal");
    task.stop().await;

    Ok(())
}

pub async fn handle_show(
    manager: &SessionManager,
    SessionArgs { id }: SessionArgs,
    out: &mut impl Write,
) -> anyhow::Result<()> {
    let id = parse_id(&id)?;
    let Some(data) = manager
        .store()
        .read(&id)
        .await
        .context("unable to read session")?
    else {
        bail!("session {} not found", id.redacted());
    };

    let data: BTreeMap<_, _> = data.into_iter().collect();
    serde_json::to_writer_pretty(&mut *out, &data)?;
    writeln!(out)?;
    Ok(())
}

pub async fn handle_destroy(
    manager: &SessionManager,
    SessionArgs { id }: SessionArgs,
) -> anyhow::Result<()> {
    let id = parse_id(&id)?;
    manager
        .destroy(&id)
        .await
        .context("unable to destroy session")?;
    info!(session_id = id.redacted(), "Destroyed session");

    Ok(())
}

pub async fn handle_count(manager: &SessionManager, out: &mut impl Write) -> anyhow::Result<()> {
    let count = manager
        .store()
        .count()
        .await
        .context("unable to count sessions")?;
    writeln!(out, "{count}")?;

    Ok(())
}

fn parse_id(id: &str) -> anyhow::Result<SessionId> {
    SessionId::parse(id).context("invalid session id")
}
