//! # Dripsend — lease-coordinated batch notification sender
//!
//! Walks a sheet-backed contact list and sends one notification per row at
//! a fixed pace, while a shared lease document keeps at most one operator
//! dispatching at a time. A second operator can request a cooperative
//! handoff; the current owner finishes its in-flight row and releases.
//!
//! Usage:
//!   dripsend run                 # claim the lease and dispatch
//!   dripsend run --dry-run       # local fixture data, log-only sends
//!   dripsend status              # show lease + row summary
//!   dripsend handoff             # ask the current owner to stop, wait
//!   dripsend release --force     # manually reset a stranded lease
//!   dripsend preview             # list rows and statuses

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, bail};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use dripsend_core::DripsendConfig;
use dripsend_core::traits::{LeaseStore, Notifier, RowStore};
use dripsend_dispatch::{
    DispatchSession, Dispatcher, LeaseMachine, LeaseState, PollerSet, StartDecision, session,
};
use dripsend_core::config::NotifyChannel;
use dripsend_notify::{EmailNotifier, LogNotifier, WebhookNotifier};
use dripsend_store::{HttpLeaseStore, MemoryLeaseStore, MemoryRowStore, SheetsRowStore, sample_rows};

#[derive(Parser)]
#[command(
    name = "dripsend",
    version,
    about = "📮 Dripsend — lease-coordinated batch notification sender"
)]
struct Cli {
    /// Config file path (default: ~/.dripsend/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Claim the lease and dispatch the pending rows.
    Run {
        /// Use local fixture rows and log-only sends.
        #[arg(long)]
        dry_run: bool,
        /// Override the configured inter-row delay (seconds).
        #[arg(long)]
        delay: Option<u64>,
        /// If someone else is dispatching, request a handoff and wait
        /// instead of exiting.
        #[arg(long)]
        takeover: bool,
    },
    /// Show the shared lease and a row summary.
    Status,
    /// Ask the current owner to stop, then wait until takeover is possible.
    Handoff,
    /// Reset the shared lease.
    Release {
        /// Reset even if an owner appears active.
        #[arg(long)]
        force: bool,
    },
    /// List rows with their statuses.
    Preview,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "dripsend=debug"
    } else {
        "dripsend=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    let config = match &cli.config {
        Some(path) => DripsendConfig::load_from(path)?,
        None => DripsendConfig::load()?,
    };
    config.validate()?;

    match cli.command {
        Command::Run {
            dry_run,
            delay,
            takeover,
        } => run(config, dry_run, delay, takeover).await,
        Command::Status => status(config).await,
        Command::Handoff => handoff(config).await,
        Command::Release { force } => release(config, force).await,
        Command::Preview => preview(config).await,
    }
}

fn lease_store(config: &DripsendConfig) -> Arc<dyn LeaseStore> {
    Arc::new(HttpLeaseStore::new(config.lease.clone()))
}

fn row_store(config: &DripsendConfig) -> Arc<dyn RowStore> {
    Arc::new(SheetsRowStore::new(config.sheet.clone()))
}

async fn run(
    mut config: DripsendConfig,
    dry_run: bool,
    delay: Option<u64>,
    takeover: bool,
) -> Result<()> {
    if let Some(delay) = delay {
        config.dispatch.delay_seconds = delay;
        config.validate()?;
    }

    let (rows, lease, notifier): (Arc<dyn RowStore>, Arc<dyn LeaseStore>, Arc<dyn Notifier>) =
        if dry_run {
            tracing::info!("🧪 Dry run: fixture rows, log-only notifier");
            (
                Arc::new(MemoryRowStore::new(sample_rows(8))),
                Arc::new(MemoryLeaseStore::new()),
                Arc::new(LogNotifier::new(config.smtp.clone())),
            )
        } else {
            let notifier: Arc<dyn Notifier> = match config.notify.channel {
                NotifyChannel::Email => Arc::new(EmailNotifier::new(config.smtp.clone())?),
                NotifyChannel::Webhook => Arc::new(WebhookNotifier::new(config.notify.clone())),
            };
            (row_store(&config), lease_store(&config), notifier)
        };

    let machine = Arc::new(LeaseMachine::new(lease, config.dispatch.clone()));

    match machine.request_start().await? {
        StartDecision::Started => {}
        StartDecision::Busy { owner_id } => {
            if !takeover {
                bail!(
                    "'{owner_id}' is currently dispatching; rerun with --takeover to request a handoff"
                );
            }
            wait_for_takeover(&machine, &config).await?;
            match machine.request_start().await? {
                StartDecision::Started => {}
                StartDecision::Busy { owner_id } => {
                    bail!("lease re-claimed by '{owner_id}' before we could start")
                }
            }
        }
    }

    let shared = session::shared(DispatchSession::new(
        machine.session_id(),
        config.dispatch.delay_seconds,
    ));

    let mut pollers = PollerSet::new();
    pollers.spawn_status_poller(
        machine.clone(),
        Duration::from_secs(config.dispatch.status_poll_secs),
    );
    pollers.spawn_ack_poller(
        machine.clone(),
        Duration::from_secs(config.dispatch.ack_poll_secs),
    );
    pollers.spawn_row_refresh(
        rows.clone(),
        shared.clone(),
        Duration::from_secs(config.dispatch.row_refresh_secs),
    );

    // Best-effort release on abrupt exit; delivery is not guaranteed, which
    // is exactly why `release --force` exists.
    let exit_machine = machine.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("🛑 Interrupted; attempting a final lease release");
            let _ = exit_machine.release().await;
            std::process::exit(130);
        }
    });

    let dispatcher = Dispatcher::new(rows, notifier, machine, shared, config.dispatch.clone());
    let report = dispatcher.run(pollers).await?;
    println!("{report}");
    Ok(())
}

/// Request a handoff and poll until the current owner releases.
async fn wait_for_takeover(machine: &Arc<LeaseMachine>, config: &DripsendConfig) -> Result<()> {
    machine.send_handoff_request().await?;

    // One early probe so a promptly-released lease is noticed without
    // waiting out a full poll period.
    tokio::time::sleep(Duration::from_secs(config.dispatch.handoff_probe_secs)).await;
    machine.refresh().await?;

    while machine.state() != LeaseState::CanTakeOver {
        tracing::info!("⏳ Waiting for the current owner to finish its in-flight row...");
        tokio::time::sleep(Duration::from_secs(config.dispatch.status_poll_secs)).await;
        if let Err(e) = machine.refresh().await {
            tracing::warn!("⚠️ Lease poll failed (will retry): {e}");
        }
    }
    Ok(())
}

async fn status(config: DripsendConfig) -> Result<()> {
    let lease = lease_store(&config).read_lease().await?;
    if lease.is_running {
        let age = chrono::Utc::now() - lease.started_at;
        println!(
            "Lease: held by '{}' for {}m (delay {}s{})",
            lease.owner_id,
            age.num_minutes(),
            lease.delay_seconds,
            if lease.acknowledged {
                ", handoff requested"
            } else {
                ""
            }
        );
    } else {
        println!("Lease: free");
    }

    let rows = row_store(&config).list_rows().await?;
    let (mut success, mut fail, mut processing, mut pending) = (0, 0, 0, 0);
    for row in &rows {
        match row.status {
            dripsend_core::RowStatus::Success => success += 1,
            dripsend_core::RowStatus::Fail => fail += 1,
            dripsend_core::RowStatus::Processing => processing += 1,
            dripsend_core::RowStatus::Pending => pending += 1,
        }
    }
    println!(
        "Rows: {} total — {success} success, {fail} fail, {processing} processing, {pending} pending",
        rows.len()
    );
    Ok(())
}

async fn handoff(config: DripsendConfig) -> Result<()> {
    let store = lease_store(&config);
    let lease = store.read_lease().await?;
    if !lease.is_running {
        println!("Nobody is dispatching; the lease is free.");
        return Ok(());
    }
    println!("Requesting handoff from '{}'...", lease.owner_id);

    let machine = Arc::new(LeaseMachine::new(store, config.dispatch.clone()));
    // Align the machine with what we just observed.
    match machine.request_start().await? {
        StartDecision::Busy { .. } => {}
        StartDecision::Started => {
            // Owner released between our read and the claim; hand it back.
            machine.release().await?;
            println!("Owner already released; the lease is free.");
            return Ok(());
        }
    }
    wait_for_takeover(&machine, &config).await?;
    println!("Owner released. Run `dripsend run` to take over.");
    Ok(())
}

async fn release(config: DripsendConfig, force: bool) -> Result<()> {
    let store = lease_store(&config);
    let lease = store.read_lease().await?;
    if lease.is_running && !force {
        bail!(
            "'{}' appears to be dispatching (since {}); use --force to reset anyway",
            lease.owner_id,
            lease.started_at
        );
    }
    let machine = LeaseMachine::new(store, config.dispatch.clone());
    machine.force_release().await?;
    println!("Lease reset.");
    Ok(())
}

async fn preview(config: DripsendConfig) -> Result<()> {
    let rows = row_store(&config).list_rows().await?;
    for (i, row) in rows.iter().enumerate() {
        println!(
            "{i:>4}  {:<24} {:<14} {:<28} {} {} {}  [{}]",
            row.contact, row.phone, row.email, row.make, row.model, row.reg, row.status
        );
    }
    println!("{} rows", rows.len());
    Ok(())
}
