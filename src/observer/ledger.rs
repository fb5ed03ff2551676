//! Ledger client seam
//!
//! The observer needs two things from the ledger: the cursor of its newest
//! event, and an ordered stream of events starting strictly after a cursor.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use rust_decimal::Decimal;
use std::fmt;

use super::cursor::Cursor;
use super::error::StreamError;

/// Ordered, fallible event stream. Errors end the session; the observer
/// re-opens after its last checkpoint.
pub type EventStream = BoxStream<'static, Result<PaymentEvent, StreamError>>;

#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Open a stream positioned strictly after `after`.
    async fn open_stream(&self, after: &Cursor) -> Result<EventStream, StreamError>;

    /// Cursor of the newest event. Streaming after it yields only events
    /// that arrive later, and re-opening after it never skips any.
    async fn head(&self) -> Result<Cursor, StreamError>;
}

/// Ledger operation type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentKind {
    Payment,
    PathPaymentStrictSend,
    PathPaymentStrictReceive,
    CreateAccount,
    /// Any other operation; delivered so the checkpoint can move past it
    Other(String),
}

impl PaymentKind {
    pub fn from_type(op_type: &str) -> Self {
        match op_type {
            "payment" => PaymentKind::Payment,
            "path_payment_strict_send" => PaymentKind::PathPaymentStrictSend,
            "path_payment_strict_receive" | "path_payment" => PaymentKind::PathPaymentStrictReceive,
            "create_account" => PaymentKind::CreateAccount,
            other => PaymentKind::Other(other.to_string()),
        }
    }

    /// Moves value from `from` to `to`
    pub fn is_transfer(&self) -> bool {
        !matches!(self, PaymentKind::Other(_))
    }

    pub fn as_str(&self) -> &str {
        match self {
            PaymentKind::Payment => "payment",
            PaymentKind::PathPaymentStrictSend => "path_payment_strict_send",
            PaymentKind::PathPaymentStrictReceive => "path_payment_strict_receive",
            PaymentKind::CreateAccount => "create_account",
            PaymentKind::Other(s) => s,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Asset {
    Native,
    Credit { code: String, issuer: String },
}

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Asset::Native => write!(f, "native"),
            Asset::Credit { code, issuer } => write!(f, "{}:{}", code, issuer),
        }
    }
}

/// One ledger event, carrying its own resume position
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentEvent {
    /// Ledger operation id, stable across redelivery
    pub id: String,
    pub cursor: Cursor,
    pub kind: PaymentKind,
    pub transaction_hash: String,
    pub from: String,
    pub to: String,
    pub asset: Asset,
    pub amount: Decimal,
    pub transaction_successful: bool,
    pub created_at: DateTime<Utc>,
}

impl PaymentEvent {
    /// Plain native payment, mostly for tests and fixtures
    pub fn payment(
        id: impl Into<String>,
        cursor: Cursor,
        from: impl Into<String>,
        to: impl Into<String>,
        amount: Decimal,
    ) -> Self {
        Self {
            id: id.into(),
            cursor,
            kind: PaymentKind::Payment,
            transaction_hash: String::new(),
            from: from.into(),
            to: to.into(),
            asset: Asset::Native,
            amount,
            transaction_successful: true,
            created_at: Utc::now(),
        }
    }
}
