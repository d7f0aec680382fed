//! Short-lived access tokens gating the post-payment confirmation step.

use crate::errors::{CheckoutError, Result};
use crate::order::{Order, OrderStatus};

/// Tokens stay valid for fifteen minutes after (re)issue.
pub const TOKEN_TTL_SECS: i64 = 15 * 60;

/// Mint a fresh 128-bit token and its expiry. Issuing again for the same
/// order replaces the previous token outright.
pub fn issue(now: i64) -> (String, i64) {
    let token = hex::encode(rand::random::<[u8; 16]>());
    (token, now + TOKEN_TTL_SECS)
}

/// Check a presented token against the order it claims to unlock.
///
/// Ordering matters for the error codes: an unpaid order reports `NotPaid`
/// even if the token would also be wrong, and a mismatched token reports
/// `InvalidToken` even if the stored one has expired.
pub fn validate(order: &Order, presented: &str, now: i64) -> Result<()> {
    if order.status != OrderStatus::Success {
        return Err(CheckoutError::NotPaid);
    }
    match order.access_token.as_deref() {
        Some(stored) if stored == presented => {}
        _ => return Err(CheckoutError::InvalidToken),
    }
    match order.token_expires_at {
        Some(expires_at) if now < expires_at => Ok(()),
        _ => Err(CheckoutError::ExpiredToken),
    }
}
