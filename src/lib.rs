//! Checkout completion service.
//!
//! Takes a buyer from "pay now" to a delivered product: initializes the
//! payment with the gateway, confirms the charge via callback verification
//! and signed webhooks, gates the download behind a short-lived token, and
//! reports the conversion to the attribution API with operator
//! notifications on the side. A background sweeper retries whatever did
//! not go out on the first attempt.

pub mod api;
pub mod attribution;
pub mod config;
pub mod db;
pub mod dispatch;
pub mod errors;
pub mod gateway;
pub mod identity;
pub mod notify;
pub mod order;
pub mod sweeper;
pub mod token;

use reqwest::Client;
use sqlx::SqlitePool;

use config::Config;

/// Shared state handed to every handler and background task.
pub struct AppState {
    pub config: Config,
    pub pool: SqlitePool,
    pub client: Client,
}
