//! Order domain types — the durable record of one purchase attempt and the
//! delivery status of its side effects.

use chrono::Utc;
use rand::{distributions::Alphanumeric, Rng};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{FromRow, Row};

use crate::identity::ClientIdentity;

/// Lifecycle of a purchase attempt. Transitions move forward only:
/// `Initialized` into one of the terminal states, never back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Initialized,
    Success,
    Failed,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initialized => "initialized",
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "initialized" => Some(Self::Initialized),
            "success" => Some(Self::Success),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Both outcomes are terminal; only `Initialized` may still move.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed)
    }
}

/// Delivery status of one outbound channel for one order.
///
/// `sent`, once true, never reverts; `tries` counts every attempt whether it
/// succeeded or not and caps automatic retries.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DispatchRecord {
    pub sent: bool,
    pub tries: i64,
    pub last_attempt_at: Option<i64>,
    pub response: Option<String>,
    pub error: Option<String>,
}

/// One row of the `orders` table, with the per-channel dispatch columns
/// folded into [`DispatchRecord`] values.
#[derive(Debug, Clone, Serialize)]
pub struct Order {
    pub reference: String,
    pub email: String,
    pub name: Option<String>,
    pub phone: Option<String>,
    /// Minor currency units (kobo/cents). Set once at initialization and
    /// compared, never recomputed, against what the gateway reports.
    pub amount: i64,
    pub currency: String,
    pub client_ip: Option<String>,
    pub user_agent: Option<String>,
    pub click_id: Option<String>,
    pub browser_id: Option<String>,
    pub clickthrough_id: Option<String>,
    pub country: String,
    pub status: OrderStatus,
    pub verified_at: Option<i64>,
    pub access_token: Option<String>,
    pub token_expires_at: Option<i64>,
    pub attribution: DispatchRecord,
    pub notify_order: DispatchRecord,
    pub notify_contact: DispatchRecord,
    pub created_at: i64,
}

/// Everything known about an order at creation time.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub reference: String,
    pub email: String,
    pub amount: i64,
    pub currency: String,
    pub country: String,
    pub identity: ClientIdentity,
    pub created_at: i64,
}

/// Generate an order reference: time-based prefix plus a random suffix.
/// Opaque to clients; reused by the attribution API as the dedup id.
pub fn new_reference() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(char::from)
        .collect();
    format!("ord_{}_{}", Utc::now().timestamp(), suffix.to_lowercase())
}

fn dispatch_record(row: &SqliteRow, prefix: &str) -> Result<DispatchRecord, sqlx::Error> {
    Ok(DispatchRecord {
        sent: row.try_get(format!("{prefix}_sent").as_str())?,
        tries: row.try_get(format!("{prefix}_tries").as_str())?,
        last_attempt_at: row.try_get(format!("{prefix}_last_attempt_at").as_str())?,
        response: row.try_get(format!("{prefix}_response").as_str())?,
        error: row.try_get(format!("{prefix}_error").as_str())?,
    })
}

impl<'r> FromRow<'r, SqliteRow> for Order {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        let status_str: String = row.try_get("status")?;
        let status = OrderStatus::parse(&status_str).ok_or_else(|| sqlx::Error::ColumnDecode {
            index: "status".to_string(),
            source: format!("unknown order status: {status_str}").into(),
        })?;

        Ok(Order {
            reference: row.try_get("reference")?,
            email: row.try_get("email")?,
            name: row.try_get("name")?,
            phone: row.try_get("phone")?,
            amount: row.try_get("amount")?,
            currency: row.try_get("currency")?,
            client_ip: row.try_get("client_ip")?,
            user_agent: row.try_get("user_agent")?,
            click_id: row.try_get("click_id")?,
            browser_id: row.try_get("browser_id")?,
            clickthrough_id: row.try_get("clickthrough_id")?,
            country: row.try_get("country")?,
            status,
            verified_at: row.try_get("verified_at")?,
            access_token: row.try_get("access_token")?,
            token_expires_at: row.try_get("token_expires_at")?,
            attribution: dispatch_record(row, "attribution")?,
            notify_order: dispatch_record(row, "notify_order")?,
            notify_contact: dispatch_record(row, "notify_contact")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trip() {
        for status in [
            OrderStatus::Initialized,
            OrderStatus::Success,
            OrderStatus::Failed,
        ] {
            assert_eq!(OrderStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(OrderStatus::parse("paid"), None);
    }

    #[test]
    fn only_initialized_may_move() {
        assert!(!OrderStatus::Initialized.is_terminal());
        assert!(OrderStatus::Success.is_terminal());
        assert!(OrderStatus::Failed.is_terminal());
    }

    #[test]
    fn references_are_unique_and_prefixed() {
        let a = new_reference();
        let b = new_reference();
        assert!(a.starts_with("ord_"));
        assert_ne!(a, b);
        // time component + 8-char suffix
        let suffix = a.rsplit('_').next().unwrap();
        assert_eq!(suffix.len(), 8);
    }
}
