//! Processing pipeline seam
//!
//! Turns one ledger event into domain side effects. The observer delivers
//! at least once, so every implementation must tolerate redelivery of the
//! same event.

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::{debug, info};

use super::error::ProcessingError;
use super::ledger::PaymentEvent;

#[async_trait]
pub trait ProcessingPipeline: Send + Sync {
    /// Apply the event's side effects
    ///
    /// # Idempotency
    /// A second call with the same event must leave the same end state.
    async fn handle(&self, event: &PaymentEvent) -> Result<(), ProcessingError>;
}

/// Records incoming payments to one account in `observed_payments_tb`
///
/// Redelivery is absorbed by `ON CONFLICT (event_id) DO NOTHING`.
pub struct PaymentRecorder {
    pool: PgPool,
    account: String,
}

impl PaymentRecorder {
    pub fn new(pool: PgPool, account: impl Into<String>) -> Self {
        Self {
            pool,
            account: account.into(),
        }
    }

    pub async fn ensure_schema(&self) -> Result<(), ProcessingError> {
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS observed_payments_tb (
                   event_id TEXT PRIMARY KEY,
                   paging_token TEXT NOT NULL,
                   tx_hash TEXT NOT NULL,
                   kind TEXT NOT NULL,
                   from_account TEXT NOT NULL,
                   to_account TEXT NOT NULL,
                   asset TEXT NOT NULL,
                   amount NUMERIC(30, 7) NOT NULL,
                   ledger_time TIMESTAMPTZ NOT NULL,
                   recorded_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
               )"#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Whether this recorder cares about the event
    fn is_incoming(&self, event: &PaymentEvent) -> bool {
        event.kind.is_transfer() && event.transaction_successful && event.to == self.account
    }
}

#[async_trait]
impl ProcessingPipeline for PaymentRecorder {
    async fn handle(&self, event: &PaymentEvent) -> Result<(), ProcessingError> {
        if !self.is_incoming(event) {
            debug!(
                event_id = %event.id,
                kind = event.kind.as_str(),
                "Skipping event not addressed to watched account"
            );
            return Ok(());
        }

        let result = sqlx::query(
            r#"INSERT INTO observed_payments_tb
               (event_id, paging_token, tx_hash, kind, from_account, to_account, asset, amount, ledger_time)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
               ON CONFLICT (event_id) DO NOTHING"#,
        )
        .bind(&event.id)
        .bind(event.cursor.as_str())
        .bind(&event.transaction_hash)
        .bind(event.kind.as_str())
        .bind(&event.from)
        .bind(&event.to)
        .bind(event.asset.to_string())
        .bind(event.amount)
        .bind(event.created_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            info!(
                event_id = %event.id,
                amount = %event.amount,
                asset = %event.asset,
                from = %event.from,
                tx = %event.transaction_hash,
                "Recorded incoming payment"
            );
        } else {
            debug!(event_id = %event.id, "Payment already recorded (redelivery)");
        }

        Ok(())
    }
}
