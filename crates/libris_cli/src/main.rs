//! `libris` worker and operator CLI.
//!
//! # Responsibility
//! - Host the delivery worker pool and the periodic overdue sweeper.
//! - Expose one-shot operator commands (migrate, sweep, deliver, requeue).
//!
//! # Invariants
//! - Every worker owns its own SQLite connection and transport.
//! - Blocking SQLite and HTTP work runs on tokio's blocking pool only.
//! - Ctrl-C stops new batches; in-flight batches finish before exit.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use libris_core::db::migrations::latest_version;
use libris_core::db::Connection;
use libris_core::repo::notification_repo::NotificationListQuery;
use libris_core::transport::telegram::TelegramTransport;
use libris_core::{
    init_logging, open_db_with_retry, Clock, DeliveryEngine, LibrisConfig, MessageTransport,
    NotificationDispatcher, NotificationStatus, OverdueSweeper, SqliteLedgerRepository,
    SqliteNotificationRepository, SweepReport, SystemClock, TransportError,
};
use log::{error, info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "libris", version, about = "Lending library borrowing core worker")]
struct Cli {
    /// TOML config file; defaults plus environment when omitted.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Apply schema migrations and exit.
    Migrate,
    /// Run delivery workers and the overdue sweeper until Ctrl-C.
    Serve,
    /// Run one overdue sweep.
    Sweep {
        /// Sweep as of this date (YYYY-MM-DD) instead of today.
        #[arg(long)]
        today: Option<NaiveDate>,
    },
    /// Attempt due notifications once.
    Deliver {
        #[arg(long)]
        limit: Option<u32>,
    },
    /// Give a FAILED notification a fresh attempt budget.
    Requeue { notification_id: Uuid },
    /// List FAILED notifications.
    Failed {
        #[arg(long, default_value_t = 50)]
        limit: u32,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = match cli.config.as_deref() {
        Some(path) => LibrisConfig::load(path)
            .with_context(|| format!("loading config `{}`", path.display()))?,
        None => LibrisConfig::from_env().context("loading default config")?,
    };
    init_logging(&config.logging).map_err(anyhow::Error::msg)?;

    match cli.command {
        Command::Migrate => {
            open_database(&config)?;
            println!("schema_version={}", latest_version());
        }
        Command::Serve => {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .context("building tokio runtime")?;
            runtime.block_on(serve(Arc::new(config)))?;
        }
        Command::Sweep { today } => {
            let report = run_sweep(&config, today)?;
            println!(
                "scanned={} queued={} already_sent={} in_flight={}",
                report.scanned, report.queued, report.already_sent, report.in_flight
            );
        }
        Command::Deliver { limit } => {
            let conn = open_database(&config)?;
            let engine = delivery_engine(&conn, &config)?;
            let reports = engine.run_due(limit.unwrap_or(config.delivery.batch_size))?;
            for report in &reports {
                println!("{} {:?}", report.notification_id, report.outcome);
            }
            println!("attempted={}", reports.len());
        }
        Command::Requeue { notification_id } => {
            let conn = open_database(&config)?;
            delivery_engine(&conn, &config)?.requeue(notification_id)?;
            println!("requeued={notification_id}");
        }
        Command::Failed { limit } => {
            let conn = open_database(&config)?;
            let engine = delivery_engine(&conn, &config)?;
            let failed = engine.list_notifications(&NotificationListQuery {
                status: Some(NotificationStatus::Failed),
                limit: Some(limit),
                ..NotificationListQuery::default()
            })?;
            for notification in &failed {
                println!(
                    "{} type={} borrowing_id={} error={}",
                    notification.id,
                    notification.kind,
                    notification
                        .borrowing_id
                        .map(|id| id.to_string())
                        .unwrap_or_else(|| "-".to_string()),
                    notification.error_message.as_deref().unwrap_or("-")
                );
            }
        }
    }
    Ok(())
}

async fn serve(config: Arc<LibrisConfig>) -> Result<()> {
    {
        let config = Arc::clone(&config);
        tokio::task::spawn_blocking(move || open_database(&config).map(drop)).await??;
    }

    let (stop_tx, stop_rx) = watch::channel(false);
    let mut workers = Vec::with_capacity(config.delivery.workers);
    for worker in 0..config.delivery.workers {
        let config = Arc::clone(&config);
        let stop = stop_rx.clone();
        workers.push(tokio::task::spawn_blocking(move || {
            delivery_worker(worker, &config, &stop)
        }));
    }
    let sweeper = tokio::spawn(sweeper_loop(Arc::clone(&config), stop_rx));

    info!(
        "event=serve_start module=cli status=ok workers={} sweep_interval_secs={}",
        config.delivery.workers, config.sweeper.interval_secs
    );

    tokio::signal::ctrl_c()
        .await
        .context("waiting for Ctrl-C")?;
    info!("event=serve_stop module=cli status=start");
    stop_tx.send_replace(true);

    for handle in workers {
        if let Err(err) = handle.await? {
            error!("event=delivery_worker module=cli status=error error={err:#}");
        }
    }
    sweeper.await??;

    info!("event=serve_stop module=cli status=ok");
    Ok(())
}

fn delivery_worker(worker: usize, config: &LibrisConfig, stop: &watch::Receiver<bool>) -> Result<()> {
    let conn = open_database(config)?;
    let engine = delivery_engine(&conn, config)?;
    let batch_size = config.delivery.batch_size;
    info!("event=delivery_worker module=cli status=start worker={worker}");

    while !*stop.borrow() {
        match engine.run_due(batch_size) {
            Ok(reports) if !reports.is_empty() => continue,
            Ok(_) => {}
            Err(err) => {
                error!("event=delivery_batch module=cli status=error worker={worker} error={err}")
            }
        }
        std::thread::sleep(config.delivery.poll_interval());
    }

    info!("event=delivery_worker module=cli status=ok worker={worker}");
    Ok(())
}

async fn sweeper_loop(config: Arc<LibrisConfig>, mut stop: watch::Receiver<bool>) -> Result<()> {
    let mut ticker = tokio::time::interval(config.sweeper.interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = stop.changed() => return Ok(()),
            _ = ticker.tick() => {
                let config = Arc::clone(&config);
                if let Err(err) = tokio::task::spawn_blocking(move || run_sweep(&config, None)).await? {
                    error!("event=overdue_sweep module=cli status=error error={err:#}");
                }
            }
        }
    }
}

fn run_sweep(config: &LibrisConfig, today: Option<NaiveDate>) -> Result<SweepReport> {
    let conn = open_database(config)?;
    let dispatcher = NotificationDispatcher::new(
        SqliteNotificationRepository::new(&conn),
        SystemClock,
        config.delivery.max_attempts,
    );
    let sweeper = OverdueSweeper::new(SqliteLedgerRepository::new(&conn), &dispatcher);
    let today = today.unwrap_or_else(|| SystemClock.today());
    Ok(sweeper.sweep_overdue(today)?)
}

type Engine<'conn> = DeliveryEngine<
    SqliteNotificationRepository<'conn>,
    SqliteLedgerRepository<'conn>,
    Box<dyn MessageTransport>,
    SystemClock,
>;

fn delivery_engine<'conn>(conn: &'conn Connection, config: &LibrisConfig) -> Result<Engine<'conn>> {
    Ok(DeliveryEngine::new(
        SqliteNotificationRepository::new(conn),
        SqliteLedgerRepository::new(conn),
        build_transport(config)?,
        SystemClock,
        config.delivery_options(),
    ))
}

fn build_transport(config: &LibrisConfig) -> Result<Box<dyn MessageTransport>> {
    if config.telegram.admin_chat_ids.is_empty() {
        warn!("event=transport_init module=cli status=skip reason=no_admin_chat_ids");
        return Ok(Box::new(DisabledTransport));
    }
    let transport = TelegramTransport::new(
        &config.telegram.api_base,
        &config.telegram.bot_token,
        config.delivery.send_timeout(),
    )
    .context("building telegram transport")?;
    Ok(Box::new(transport))
}

fn open_database(config: &LibrisConfig) -> Result<Connection> {
    let database = &config.database;
    open_db_with_retry(
        &database.path,
        database.connect_attempts,
        Duration::from_millis(database.connect_retry_ms),
    )
    .with_context(|| format!("opening database `{}`", database.path.display()))
}

/// Stand-in when no admin recipients are configured; never called.
struct DisabledTransport;

impl MessageTransport for DisabledTransport {
    fn send(&self, _recipient: &str, _text: &str) -> Result<(), TransportError> {
        Err(TransportError::Config(
            "no admin recipients configured".to_string(),
        ))
    }
}
