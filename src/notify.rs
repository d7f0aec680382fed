//! Operator notifications — short plain-text messages to a chat channel
//! when an order is paid and when the buyer leaves contact details.

use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::errors::{CheckoutError, Result};
use crate::order::Order;

#[derive(Debug, Deserialize)]
struct NotifyResponse {
    ok: bool,
    description: Option<String>,
}

pub fn order_message(order: &Order) -> String {
    format!(
        "Paid order {}\nAmount: {:.2} {}\nEmail: {}\nCountry: {}",
        order.reference,
        order.amount as f64 / 100.0,
        order.currency,
        order.email,
        order.country.to_uppercase(),
    )
}

pub fn contact_message(order: &Order) -> String {
    format!(
        "Contact details for {}\nName: {}\nPhone: {}\nEmail: {}",
        order.reference,
        order.name.as_deref().unwrap_or("-"),
        order.phone.as_deref().unwrap_or("-"),
        order.email,
    )
}

/// Deliver one message. Returns the raw response body for the dispatch
/// record.
pub async fn send_message(
    client: &Client,
    api_url: &str,
    bot_token: &str,
    chat_id: &str,
    text: &str,
) -> Result<String> {
    let response = client
        .post(format!("{api_url}/bot{bot_token}/sendMessage"))
        .json(&serde_json::json!({ "chat_id": chat_id, "text": text }))
        .send()
        .await?;

    let status = response.status().as_u16();
    let body = response.text().await?;
    evaluate_response(status, &body)?;
    debug!(status, "notification delivered");
    Ok(body)
}

/// The API reports failures both via HTTP status and via an `ok` flag in
/// the body; either one fails the dispatch.
pub fn evaluate_response(status: u16, body: &str) -> Result<()> {
    if !(200..300).contains(&status) {
        return Err(CheckoutError::Dispatch(format!(
            "notify API returned {status}: {body}"
        )));
    }
    if let Ok(parsed) = serde_json::from_str::<NotifyResponse>(body) {
        if !parsed.ok {
            return Err(CheckoutError::Dispatch(format!(
                "notify API rejected the message: {}",
                parsed.description.unwrap_or_default()
            )));
        }
    }
    Ok(())
}
