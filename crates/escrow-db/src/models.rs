//! Database row types. These map directly to SQLite rows and stay distinct
//! from the escrow-types API models to keep the DB layer independent.

use anyhow::{Result, anyhow};
use chrono::{DateTime, SecondsFormat, Utc};

pub struct UserRow {
    pub id: String,
    pub username: String,
    pub email: String,
    pub password: String,
    pub role: String,
    pub created_at: String,
}

#[derive(Clone)]
pub struct TransactionRow {
    pub id: String,
    pub buyer_id: String,
    pub seller_id: String,
    pub amount_cents: i64,
    pub description: String,
    pub status: String,
    pub created_at: String,
}

pub struct AdminTransactionRow {
    pub transaction: TransactionRow,
    pub buyer_username: Option<String>,
    pub seller_username: Option<String>,
}

pub struct ResetTokenRow {
    pub id: String,
    pub user_id: String,
    pub otp_hash: String,
    pub expires_at: String,
    pub used: bool,
    pub created_at: String,
}

pub struct StatsRow {
    pub users_by_role: Vec<(String, i64)>,
    pub transactions_by_status: Vec<(String, i64)>,
    pub total_amount_cents: i64,
}

/// Timestamps are stored as fixed-width RFC 3339 UTC text so that string
/// comparison and `ORDER BY` agree with chronological order.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| anyhow!("Corrupt timestamp '{}': {}", raw, e))
}
