//! Application configuration loaded from environment variables.
//!
//! Assembled once at startup and passed into each component; core logic
//! never reads the environment directly.

use crate::errors::{CheckoutError, Result};

#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the SQLite database file
    pub database_url: String,
    /// Port for the REST API server
    pub api_port: u16,

    /// Product price in minor currency units (kobo/cents); the server is
    /// authoritative, clients never submit an amount
    pub product_amount: i64,
    /// ISO currency code sent to the gateway and the attribution API
    pub currency: String,
    /// Two-letter country code attached to every order
    pub default_country: String,
    /// Where a confirmed customer is sent to collect the product
    pub delivery_url: String,

    /// Payment gateway REST endpoint
    pub gateway_api_url: String,
    /// Gateway secret key: authorizes API calls and keys the webhook HMAC
    pub gateway_secret: String,
    /// Where the gateway sends the browser after payment; falls back to the
    /// gateway's dashboard setting when unset
    pub gateway_callback_url: Option<String>,
    /// Browser redirect target after a verified payment
    pub success_redirect: String,
    /// Browser redirect target when verification did not succeed
    pub failure_redirect: String,

    /// Attribution (conversions) API endpoint, versioned base URL
    pub attribution_api_url: String,
    /// Attribution pixel / dataset id
    pub pixel_id: String,
    /// Attribution API access token
    pub attribution_token: String,
    /// When set, routes every event to the platform's test view
    pub test_event_code: Option<String>,

    /// Notification bot API endpoint
    pub notify_api_url: String,
    /// Notification bot token
    pub notify_bot_token: String,
    /// Chat the operator notifications go to
    pub notify_chat_id: String,

    /// How often (in seconds) the sweeper retries undelivered dispatches
    pub sweep_interval_secs: u64,
    /// Attempts per order before the sweeper gives up on it
    pub dispatch_max_tries: i64,
    /// Orders retried per sweeper pass
    pub sweep_batch_size: i64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Config {
            database_url: env_var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite:./checkout.db".to_string()),
            api_port: parse_var("API_PORT", "3000")?,

            product_amount: env_var("PRODUCT_AMOUNT")
                .map_err(|_| {
                    CheckoutError::Config(
                        "PRODUCT_AMOUNT environment variable is required (minor units)"
                            .to_string(),
                    )
                })?
                .parse()
                .map_err(|_| CheckoutError::Config("Invalid PRODUCT_AMOUNT".to_string()))?,
            currency: env_var("CURRENCY").unwrap_or_else(|_| "NGN".to_string()),
            default_country: env_var("DEFAULT_COUNTRY").unwrap_or_else(|_| "ng".to_string()),
            delivery_url: required("DELIVERY_URL")?,

            gateway_api_url: env_var("GATEWAY_API_URL")
                .unwrap_or_else(|_| "https://api.paystack.co".to_string()),
            gateway_secret: required("GATEWAY_SECRET_KEY")?,
            gateway_callback_url: env_var("GATEWAY_CALLBACK_URL").ok(),
            success_redirect: env_var("SUCCESS_REDIRECT")
                .unwrap_or_else(|_| "/thank-you.html".to_string()),
            failure_redirect: env_var("FAILURE_REDIRECT")
                .unwrap_or_else(|_| "/payment-failed.html".to_string()),

            attribution_api_url: env_var("ATTRIBUTION_API_URL")
                .unwrap_or_else(|_| "https://graph.facebook.com/v18.0".to_string()),
            pixel_id: required("PIXEL_ID")?,
            attribution_token: required("ATTRIBUTION_ACCESS_TOKEN")?,
            test_event_code: env_var("TEST_EVENT_CODE").ok().filter(|v| !v.is_empty()),

            notify_api_url: env_var("NOTIFY_API_URL")
                .unwrap_or_else(|_| "https://api.telegram.org".to_string()),
            notify_bot_token: required("NOTIFY_BOT_TOKEN")?,
            notify_chat_id: required("NOTIFY_CHAT_ID")?,

            sweep_interval_secs: parse_var("SWEEP_INTERVAL_SECS", "60")?,
            dispatch_max_tries: parse_var("DISPATCH_MAX_TRIES", "5")?,
            sweep_batch_size: parse_var("SWEEP_BATCH_SIZE", "10")?,
        })
    }
}

fn env_var(key: &str) -> Result<String> {
    std::env::var(key).map_err(|_| CheckoutError::Config(format!("Missing env var: {key}")))
}

fn required(key: &str) -> Result<String> {
    env_var(key).map_err(|_| {
        CheckoutError::Config(format!("{key} environment variable is required"))
    })
}

fn parse_var<T: std::str::FromStr>(key: &str, default: &str) -> Result<T> {
    env_var(key)
        .unwrap_or_else(|_| default.to_string())
        .parse()
        .map_err(|_| CheckoutError::Config(format!("Invalid {key}")))
}
