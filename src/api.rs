//! Axum REST API handlers.
//!
//! Browser-facing routes answer with redirects, machine-facing routes with
//! JSON. The webhook route reads the raw body because its signature is
//! computed over the exact bytes the gateway sent.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{ConnectInfo, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Redirect},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};
use validator::ValidateEmail;

use crate::config::Config;
use crate::errors::{CheckoutError, Result};
use crate::gateway::{self, InitializeRequest, WebhookEvent};
use crate::{db, dispatch, identity, order, token, AppState};

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/checkout", post(create_checkout))
        .route("/api/checkout/callback", get(checkout_callback))
        .route("/api/webhook", post(gateway_webhook))
        .route("/api/confirm", post(confirm_order))
        .route("/api/confirm/contact", post(collect_contact))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ─────────────────────────────────────────────────────────
// Request / response shapes
// ─────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CheckoutRequest {
    pub email: String,
    /// Clickthrough parameter from the landing URL, if one was present.
    pub fbclid: Option<String>,
    /// Browser cookie values forwarded by the storefront script.
    pub fbp: Option<String>,
    pub fbc: Option<String>,
}

#[derive(Serialize)]
pub struct CheckoutResponse {
    pub reference: String,
    pub authorization_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_code: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CallbackParams {
    pub reference: Option<String>,
    /// The gateway sends the reference under this name on some flows.
    pub trxref: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ConfirmRequest {
    pub reference: String,
    pub token: String,
}

#[derive(Serialize)]
pub struct ConfirmResponse {
    pub reference: String,
    pub delivery_url: String,
}

#[derive(Debug, Deserialize)]
pub struct ContactRequest {
    pub reference: String,
    pub token: String,
    pub phone: String,
    pub name: Option<String>,
}

#[derive(Serialize)]
pub struct ContactResponse {
    pub reference: String,
    pub saved: bool,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

// ─────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────

/// `GET /health`
pub async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// `POST /api/checkout`
///
/// Create an order and hand back the gateway's hosted payment page URL.
pub async fn create_checkout(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    connect: Option<ConnectInfo<SocketAddr>>,
    Json(request): Json<CheckoutRequest>,
) -> Result<impl IntoResponse> {
    let email = request.email.trim().to_string();
    if !email.as_str().validate_email() {
        return Err(CheckoutError::Validation(
            "a valid email address is required".to_string(),
        ));
    }

    let now = Utc::now().timestamp();
    let reference = order::new_reference();
    let identity = identity::correlate(
        &headers,
        connect.map(|ConnectInfo(addr)| addr),
        request.fbclid,
        request.fbp,
        request.fbc,
        now,
    );

    let init = gateway::initialize_transaction(
        &state.client,
        &state.config.gateway_api_url,
        &state.config.gateway_secret,
        &InitializeRequest {
            email: email.clone(),
            amount: state.config.product_amount,
            currency: state.config.currency.clone(),
            reference: reference.clone(),
            callback_url: state.config.gateway_callback_url.clone(),
        },
    )
    .await?;

    db::create_order(
        &state.pool,
        &order::NewOrder {
            reference: reference.clone(),
            email,
            amount: state.config.product_amount,
            currency: state.config.currency.clone(),
            country: state.config.default_country.clone(),
            identity,
            created_at: now,
        },
    )
    .await?;

    info!(reference, "checkout initialized");
    Ok((
        StatusCode::CREATED,
        Json(CheckoutResponse {
            reference,
            authorization_url: init.authorization_url,
            access_code: init.access_code,
        }),
    ))
}

/// `GET /api/checkout/callback`
///
/// Landing point for the browser returning from the payment page. Always
/// redirects; the gateway's word is fetched server-side before anything
/// is trusted.
pub async fn checkout_callback(
    State(state): State<Arc<AppState>>,
    Query(params): Query<CallbackParams>,
) -> Redirect {
    let reference = params
        .reference
        .or(params.trxref)
        .unwrap_or_default();
    if reference.is_empty() {
        warn!("callback arrived without a reference");
        return Redirect::to(&state.config.failure_redirect);
    }

    match settle_callback(&state, &reference).await {
        Ok(redirect) => redirect,
        Err(e) => {
            warn!(reference, "callback settlement failed: {e}");
            Redirect::to(&failure_url(&state.config, &reference))
        }
    }
}

async fn settle_callback(state: &AppState, reference: &str) -> Result<Redirect> {
    let order = db::find_order(&state.pool, reference)
        .await?
        .ok_or_else(|| CheckoutError::NotFound(reference.to_string()))?;

    match order.status {
        order::OrderStatus::Failed => Ok(Redirect::to(&failure_url(&state.config, reference))),
        order::OrderStatus::Success => {
            // Revisiting the callback for a paid order reissues the token.
            let now = Utc::now().timestamp();
            let (access_token, expires_at) = token::issue(now);
            db::set_access_token(&state.pool, reference, &access_token, expires_at).await?;
            Ok(Redirect::to(&success_url(
                &state.config,
                reference,
                &access_token,
            )))
        }
        order::OrderStatus::Initialized => {
            let verify = gateway::verify_transaction(
                &state.client,
                &state.config.gateway_api_url,
                &state.config.gateway_secret,
                reference,
            )
            .await?;

            if verify.status == "success" {
                if verify.amount != order.amount {
                    let mismatch = CheckoutError::AmountMismatch {
                        reference: reference.to_string(),
                        expected: order.amount,
                        actual: verify.amount,
                    };
                    error!("verification rejected: {mismatch}");
                    return Ok(Redirect::to(&failure_url(&state.config, reference)));
                }

                let now = Utc::now().timestamp();
                // The webhook may have settled this order already; the token
                // is still minted here, on the verified browser path.
                if db::mark_success(&state.pool, reference, now).await? {
                    info!(reference, "order paid via callback verification");
                }
                let (access_token, expires_at) = token::issue(now);
                db::set_access_token(&state.pool, reference, &access_token, expires_at).await?;
                Ok(Redirect::to(&success_url(
                    &state.config,
                    reference,
                    &access_token,
                )))
            } else if gateway::is_terminal_failure(&verify.status) {
                db::mark_failed(&state.pool, reference).await?;
                info!(reference, status = %verify.status, "order failed at the gateway");
                Ok(Redirect::to(&failure_url(&state.config, reference)))
            } else {
                info!(reference, status = %verify.status, "payment still pending at callback");
                Ok(Redirect::to(&failure_url(&state.config, reference)))
            }
        }
    }
}

/// `POST /api/webhook`
///
/// Server-to-server notification from the gateway. Unsigned or badly
/// signed requests are rejected; everything authentic is acknowledged
/// with 200 so the gateway stops redelivering, even when the payload
/// gives us nothing to do.
pub async fn gateway_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse> {
    let signature = headers
        .get(gateway::SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or(CheckoutError::Authenticity)?;
    if !gateway::verify_signature(&state.config.gateway_secret, &body, signature) {
        return Err(CheckoutError::Authenticity);
    }

    let ack = Json(serde_json::json!({ "received": true }));

    let event: WebhookEvent = match serde_json::from_slice(&body) {
        Ok(event) => event,
        Err(e) => {
            warn!("signed webhook body did not parse: {e}");
            return Ok(ack);
        }
    };
    if event.event != gateway::CHARGE_SUCCESS {
        debug!(event = %event.event, "ignoring webhook event");
        return Ok(ack);
    }

    let reference = event.data.reference;
    let Some(order) = db::find_order(&state.pool, &reference).await? else {
        warn!(reference, "webhook for unknown order");
        return Ok(ack);
    };
    if order.status.is_terminal() {
        debug!(reference, "webhook replay for a settled order");
        return Ok(ack);
    }
    if event.data.amount != order.amount {
        let mismatch = CheckoutError::AmountMismatch {
            reference: reference.clone(),
            expected: order.amount,
            actual: event.data.amount,
        };
        error!("webhook rejected: {mismatch}");
        return Ok(ack);
    }

    let now = Utc::now().timestamp();
    if db::mark_success(&state.pool, &reference, now).await? {
        info!(reference, "order paid via webhook");
    }
    Ok(ack)
}

/// `POST /api/confirm`
///
/// Called by the thank-you page with the reference and token from the
/// success redirect. Triggers dispatch and reveals the delivery URL.
pub async fn confirm_order(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ConfirmRequest>,
) -> Result<Json<ConfirmResponse>> {
    let order = db::find_order(&state.pool, &request.reference)
        .await?
        .ok_or_else(|| CheckoutError::NotFound(request.reference.clone()))?;
    token::validate(&order, &request.token, Utc::now().timestamp())?;

    dispatch::deliver_order(&state, &order).await;

    Ok(Json(ConfirmResponse {
        reference: order.reference,
        delivery_url: state.config.delivery_url.clone(),
    }))
}

/// `POST /api/confirm/contact`
///
/// Optional post-purchase step where the buyer leaves a phone number and
/// name. Guarded by the same token as the confirmation itself.
pub async fn collect_contact(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ContactRequest>,
) -> Result<Json<ContactResponse>> {
    let order = db::find_order(&state.pool, &request.reference)
        .await?
        .ok_or_else(|| CheckoutError::NotFound(request.reference.clone()))?;
    token::validate(&order, &request.token, Utc::now().timestamp())?;

    let phone = request.phone.trim();
    let digits = phone.chars().filter(|c| c.is_ascii_digit()).count();
    if digits < 7 {
        return Err(CheckoutError::Validation(
            "a valid phone number is required".to_string(),
        ));
    }
    let name = request
        .name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty());

    db::update_contact(&state.pool, &order.reference, name, phone).await?;
    if let Some(updated) = db::find_order(&state.pool, &order.reference).await? {
        dispatch::send_contact_notification(&state, &updated).await;
    }

    Ok(Json(ContactResponse {
        reference: order.reference,
        saved: true,
    }))
}

fn success_url(config: &Config, reference: &str, token: &str) -> String {
    let sep = query_separator(&config.success_redirect);
    format!(
        "{}{sep}reference={reference}&token={token}",
        config.success_redirect
    )
}

fn failure_url(config: &Config, reference: &str) -> String {
    let sep = query_separator(&config.failure_redirect);
    format!("{}{sep}reference={reference}", config.failure_redirect)
}

// Configured redirect targets may already carry a query string.
fn query_separator(base: &str) -> char {
    if base.contains('?') {
        '&'
    } else {
        '?'
    }
}
