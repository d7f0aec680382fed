//! Payment gateway client — transaction initialization, verification, and
//! webhook authenticity.
//!
//! All amounts cross this boundary in minor units (kobo). The gateway's
//! word on an amount is compared against ours, never substituted for it.

use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use sha2::Sha512;
use tracing::debug;

use crate::errors::{CheckoutError, Result};

/// Header carrying the webhook body signature.
pub const SIGNATURE_HEADER: &str = "x-paystack-signature";

/// The only webhook event that marks an order paid.
pub const CHARGE_SUCCESS: &str = "charge.success";

type HmacSha512 = Hmac<Sha512>;

// ─────────────────────────────────────────────────────────
// Wire shapes
// ─────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct InitializeRequest {
    pub email: String,
    pub amount: i64,
    pub currency: String,
    pub reference: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub callback_url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct GatewayEnvelope<T> {
    pub status: bool,
    pub message: Option<String>,
    pub data: Option<T>,
}

#[derive(Debug, Deserialize)]
pub struct InitData {
    pub authorization_url: String,
    pub access_code: Option<String>,
    pub reference: String,
}

#[derive(Debug, Deserialize)]
pub struct VerifyData {
    /// Gateway-side transaction state: `success`, `failed`, `abandoned`,
    /// `reversed`, or a still-pending value.
    pub status: String,
    pub amount: i64,
}

#[derive(Debug, Deserialize)]
pub struct WebhookEvent {
    pub event: String,
    pub data: WebhookData,
}

#[derive(Debug, Deserialize)]
pub struct WebhookData {
    pub reference: String,
    pub amount: i64,
}

/// Gateway states that will never become a payment.
pub fn is_terminal_failure(status: &str) -> bool {
    matches!(status, "failed" | "abandoned" | "reversed")
}

// ─────────────────────────────────────────────────────────
// HTTP calls
// ─────────────────────────────────────────────────────────

/// Create a transaction and get the hosted payment page URL.
pub async fn initialize_transaction(
    client: &Client,
    api_url: &str,
    secret: &str,
    request: &InitializeRequest,
) -> Result<InitData> {
    let response = client
        .post(format!("{api_url}/transaction/initialize"))
        .bearer_auth(secret)
        .json(request)
        .send()
        .await
        .map_err(|e| CheckoutError::Gateway(format!("initialize request failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        return Err(CheckoutError::Gateway(format!(
            "initialize returned {status}"
        )));
    }

    let envelope: GatewayEnvelope<InitData> = response
        .json()
        .await
        .map_err(|e| CheckoutError::Gateway(format!("initialize response unreadable: {e}")))?;
    let data = unwrap_envelope(envelope, "initialize")?;
    debug!(reference = %data.reference, "transaction initialized");
    Ok(data)
}

/// Ask the gateway for the authoritative state of a transaction.
pub async fn verify_transaction(
    client: &Client,
    api_url: &str,
    secret: &str,
    reference: &str,
) -> Result<VerifyData> {
    let response = client
        .get(format!("{api_url}/transaction/verify/{reference}"))
        .bearer_auth(secret)
        .send()
        .await
        .map_err(|e| CheckoutError::Gateway(format!("verify request failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        return Err(CheckoutError::Gateway(format!("verify returned {status}")));
    }

    let envelope: GatewayEnvelope<VerifyData> = response
        .json()
        .await
        .map_err(|e| CheckoutError::Gateway(format!("verify response unreadable: {e}")))?;
    let data = unwrap_envelope(envelope, "verify")?;
    debug!(reference, status = %data.status, "transaction verified");
    Ok(data)
}

fn unwrap_envelope<T>(envelope: GatewayEnvelope<T>, call: &str) -> Result<T> {
    if !envelope.status {
        return Err(CheckoutError::Gateway(format!(
            "{call} rejected: {}",
            envelope.message.unwrap_or_default()
        )));
    }
    envelope
        .data
        .ok_or_else(|| CheckoutError::Gateway(format!("{call} returned no data")))
}

// ─────────────────────────────────────────────────────────
// Webhook authenticity
// ─────────────────────────────────────────────────────────

/// Verify the HMAC-SHA512 signature the gateway computes over the raw
/// webhook body. Comparison happens on decoded bytes in constant time.
pub fn verify_signature(secret: &str, body: &[u8], signature: &str) -> bool {
    let Ok(expected) = hex::decode(signature.trim()) else {
        return false;
    };
    let Ok(mut mac) = HmacSha512::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(secret: &str, body: &[u8]) -> String {
        let mut mac = HmacSha512::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        hex::encode(mac.finalize().into_bytes())
    }

    #[test]
    fn accepts_a_correctly_signed_body() {
        let body = br#"{"event":"charge.success"}"#;
        let signature = sign("sk_test_secret", body);
        assert!(verify_signature("sk_test_secret", body, &signature));
    }

    #[test]
    fn rejects_tampered_body_and_wrong_secret() {
        let body = br#"{"event":"charge.success","data":{"amount":1000}}"#;
        let signature = sign("sk_test_secret", body);
        assert!(!verify_signature(
            "sk_test_secret",
            br#"{"event":"charge.success","data":{"amount":9000}}"#,
            &signature
        ));
        assert!(!verify_signature("sk_live_other", body, &signature));
    }

    #[test]
    fn rejects_garbage_signatures() {
        assert!(!verify_signature("secret", b"body", "not-hex"));
        assert!(!verify_signature("secret", b"body", ""));
        assert!(!verify_signature("secret", b"body", "deadbeef"));
    }

    #[test]
    fn terminal_failures_cover_gateway_vocabulary() {
        for s in ["failed", "abandoned", "reversed"] {
            assert!(is_terminal_failure(s));
        }
        for s in ["success", "pending", "ongoing", "processing", "queued"] {
            assert!(!is_terminal_failure(s));
        }
    }

    #[test]
    fn webhook_event_parses_from_gateway_json() {
        let body = r#"{
            "event": "charge.success",
            "data": {
                "reference": "ord_1700000000_abcd1234",
                "amount": 150000,
                "status": "success",
                "channel": "card"
            }
        }"#;
        let event: WebhookEvent = serde_json::from_str(body).unwrap();
        assert_eq!(event.event, CHARGE_SUCCESS);
        assert_eq!(event.data.reference, "ord_1700000000_abcd1234");
        assert_eq!(event.data.amount, 150_000);
    }

    #[test]
    fn envelope_failure_becomes_gateway_error() {
        let envelope: GatewayEnvelope<InitData> = serde_json::from_str(
            r#"{"status": false, "message": "Invalid key"}"#,
        )
        .unwrap();
        let err = unwrap_envelope(envelope, "initialize").unwrap_err();
        assert!(matches!(err, CheckoutError::Gateway(_)));
        assert!(err.to_string().contains("Invalid key"));
    }
}
