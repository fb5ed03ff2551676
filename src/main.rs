//! Payment Observer
//!
//! ```text
//! ┌──────────┐    ┌──────────┐    ┌───────────┐    ┌────────────┐
//! │ Horizon  │───▶│ Observer │───▶│ Recorder  │───▶│ Checkpoint │
//! │ payments │    │  (FSM)   │    │ (PG rows) │    │ (PG row)   │
//! └──────────┘    └──────────┘    └───────────┘    └────────────┘
//! ```
//!
//! Usage:
//!   payment_observer [--env <name>]
//!   payment_observer --env <name> --reset-checkpoint <cursor>
//!   payment_observer --env <name> --clear-checkpoint
//!
//! Reset/clear are administrative and must not run while an observer is active.

use std::sync::Arc;

use anyhow::Context;
use payment_observer::config::AppConfig;
use payment_observer::db::Database;
use payment_observer::observer::{
    Backoff, CheckpointStore, Cursor, HorizonLedger, PaymentRecorder, PgCheckpointStore,
    StreamObserver,
};

fn get_env() -> String {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if (args[i] == "--env" || args[i] == "-e") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }
    "dev".to_string()
}

enum AdminCommand {
    Reset(Cursor),
    Clear,
}

fn get_admin_command() -> anyhow::Result<Option<AdminCommand>> {
    let args: Vec<String> = std::env::args().collect();
    if args.iter().any(|a| a == "--clear-checkpoint") {
        return Ok(Some(AdminCommand::Clear));
    }
    for i in 0..args.len() {
        if args[i] == "--reset-checkpoint" {
            let cursor = args
                .get(i + 1)
                .context("--reset-checkpoint needs a cursor")?;
            return Ok(Some(AdminCommand::Reset(Cursor::new(cursor.clone()))));
        }
    }
    Ok(None)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = get_env();
    let app_config = AppConfig::load(&env).with_context(|| format!("loading {} config", env))?;
    let _log_guard = payment_observer::logging::init_logging(&app_config);

    tracing::info!(
        env = %env,
        version = env!("CARGO_PKG_VERSION"),
        git = env!("GIT_HASH"),
        "Starting payment observer"
    );

    let db = Database::connect_with_retry(&app_config.postgres_url, 10, Backoff::default())
        .await
        .context("connecting to PostgreSQL")?;
    db.health_check().await.context("PostgreSQL health check")?;

    let store = Arc::new(PgCheckpointStore::new(db.pool().clone()));
    store.ensure_schema().await.context("creating checkpoint table")?;

    if let Some(command) = get_admin_command()? {
        match command {
            AdminCommand::Reset(cursor) => store.reset(Some(&cursor)).await?,
            AdminCommand::Clear => store.reset(None).await?,
        }
        return Ok(());
    }

    if let Some(record) = store.load_record().await? {
        tracing::info!(
            cursor = %record.cursor,
            updated_at = ?record.updated_at,
            "Found checkpoint"
        );
    }

    let recorder = Arc::new(PaymentRecorder::new(
        db.pool().clone(),
        app_config.ledger.account.clone(),
    ));
    recorder
        .ensure_schema()
        .await
        .context("creating payments table")?;

    let ledger = Arc::new(HorizonLedger::new(app_config.ledger.to_horizon_config())?);

    let observer = Arc::new(StreamObserver::new(
        store,
        ledger,
        recorder,
        app_config.observer.to_observer_config(),
    ));

    let shutdown = observer.shutdown_signal();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Ctrl-C received, stopping after the event in flight");
            shutdown.request_shutdown();
        }
    });

    match observer.run().await {
        Ok(()) => {
            tracing::info!("Payment observer exited cleanly");
            Ok(())
        }
        Err(e) => {
            tracing::error!(state = %observer.state(), error = %e, "Payment observer halted, manual restart required");
            Err(e.into())
        }
    }
}
