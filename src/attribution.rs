//! Conversion event reporting to the attribution API.
//!
//! Personal identifiers are normalized and SHA-256 hashed before they leave
//! the process; browser identifiers and network metadata pass through as-is.
//! The order reference doubles as the event's dedup id, so resending the
//! same order can never double-count a purchase.

use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::errors::{CheckoutError, Result};
use crate::order::Order;

// ─────────────────────────────────────────────────────────
// Identifier normalization
// ─────────────────────────────────────────────────────────

/// Trim, lowercase, and hash an identifier. Blank input hashes to nothing.
pub fn hash_identifier(value: &str) -> Option<String> {
    let normalized = value.trim().to_lowercase();
    if normalized.is_empty() {
        return None;
    }
    Some(hex::encode(Sha256::digest(normalized.as_bytes())))
}

/// Phone numbers keep digits only (country code included, no `+`).
pub fn hash_phone(value: &str) -> Option<String> {
    let digits: String = value.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return None;
    }
    Some(hex::encode(Sha256::digest(digits.as_bytes())))
}

// ─────────────────────────────────────────────────────────
// Event payload
// ─────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct UserData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub em: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ph: Option<String>,
    #[serde(rename = "fn", skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_ip_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_user_agent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fbc: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fbp: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CustomData {
    pub currency: String,
    /// Major currency units; orders store minor units.
    pub value: f64,
}

#[derive(Debug, Serialize)]
pub struct PurchaseEvent {
    pub event_name: &'static str,
    pub event_time: i64,
    /// Dedup id — the order reference, stable across retries.
    pub event_id: String,
    pub action_source: &'static str,
    pub user_data: UserData,
    pub custom_data: CustomData,
}

#[derive(Debug, Serialize)]
struct EventEnvelope {
    data: Vec<PurchaseEvent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    test_event_code: Option<String>,
}

/// Build the Purchase event for a paid order.
///
/// At least one hashed personal identifier must survive normalization, or
/// the API would accept the event and then silently fail to match it.
pub fn build_event(order: &Order, now: i64) -> Result<PurchaseEvent> {
    let em = hash_identifier(&order.email);
    let ph = order.phone.as_deref().and_then(hash_phone);
    if em.is_none() && ph.is_none() {
        return Err(CheckoutError::Validation(
            "attribution event needs at least one personal identifier".to_string(),
        ));
    }

    let first_name = order
        .name
        .as_deref()
        .and_then(|n| n.split_whitespace().next())
        .and_then(hash_identifier);

    Ok(PurchaseEvent {
        event_name: "Purchase",
        event_time: order.verified_at.unwrap_or(now),
        event_id: order.reference.clone(),
        action_source: "website",
        user_data: UserData {
            em,
            ph,
            first_name,
            country: hash_identifier(&order.country),
            client_ip_address: order.client_ip.clone(),
            client_user_agent: order.user_agent.clone(),
            fbc: order.click_id.clone(),
            fbp: order.browser_id.clone(),
        },
        custom_data: CustomData {
            currency: order.currency.clone(),
            value: order.amount as f64 / 100.0,
        },
    })
}

// ─────────────────────────────────────────────────────────
// Delivery
// ─────────────────────────────────────────────────────────

/// Send one event. Returns the raw response body so callers can persist it
/// alongside the dispatch record.
pub async fn send_event(
    client: &Client,
    api_url: &str,
    pixel_id: &str,
    access_token: &str,
    test_event_code: Option<&str>,
    event: PurchaseEvent,
) -> Result<String> {
    let envelope = EventEnvelope {
        data: vec![event],
        test_event_code: test_event_code.map(|c| c.to_string()),
    };

    let response = client
        .post(format!("{api_url}/{pixel_id}/events"))
        .query(&[("access_token", access_token)])
        .json(&envelope)
        .send()
        .await?;

    let status = response.status().as_u16();
    let body = response.text().await?;
    evaluate_response(status, &body)?;
    debug!(status, "attribution event accepted");
    Ok(body)
}

/// Decide whether a response actually recorded the event. The API can
/// answer 200 and still reject it, so the body is inspected too.
pub fn evaluate_response(status: u16, body: &str) -> Result<()> {
    if !(200..300).contains(&status) {
        return Err(CheckoutError::Dispatch(format!(
            "attribution API returned {status}: {}",
            snippet(body)
        )));
    }

    let Ok(parsed) = serde_json::from_str::<Value>(body) else {
        return Ok(());
    };

    if let Some(error) = parsed.get("error") {
        return Err(CheckoutError::Dispatch(format!(
            "attribution API error: {error}"
        )));
    }
    if let Some(messages) = parsed.get("messages").and_then(Value::as_array) {
        if !messages.is_empty() {
            return Err(CheckoutError::Dispatch(format!(
                "attribution API flagged the event: {}",
                snippet(body)
            )));
        }
    }
    if let Some(received) = parsed.get("events_received").and_then(Value::as_i64) {
        if received < 1 {
            return Err(CheckoutError::Dispatch(
                "attribution API received zero events".to_string(),
            ));
        }
    }
    Ok(())
}

fn snippet(body: &str) -> &str {
    match body.char_indices().nth(300) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}
