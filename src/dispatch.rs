//! Dispatch engine — pushes the side effects of a paid order to the
//! outside world and keeps the per-channel bookkeeping honest.
//!
//! Dispatch never fails the request that triggered it. Every attempt is
//! recorded, success makes a channel permanently `sent`, and whatever did
//! not go out stays visible to the retry sweeper.

use chrono::Utc;
use tracing::{error, info, warn};

use crate::db::{self, Channel};
use crate::errors::CheckoutError;
use crate::order::Order;
use crate::{attribution, notify, AppState};

/// Run every undelivered channel for a paid order: the attribution event
/// and the operator notification. Returns whether the attribution event
/// went out during this call.
pub async fn deliver_order(state: &AppState, order: &Order) -> bool {
    let delivered = send_attribution(state, order).await;
    send_order_notification(state, order).await;
    delivered
}

/// Send the conversion event unless this order already got one through.
pub async fn send_attribution(state: &AppState, order: &Order) -> bool {
    if order.attribution.sent {
        return false;
    }
    let now = Utc::now().timestamp();

    let event = match attribution::build_event(order, now) {
        Ok(event) => event,
        Err(e) => {
            warn!(reference = %order.reference, "attribution event not built: {e}");
            record_failure(state, Channel::Attribution, &order.reference, now, &e).await;
            return false;
        }
    };

    let result = attribution::send_event(
        &state.client,
        &state.config.attribution_api_url,
        &state.config.pixel_id,
        &state.config.attribution_token,
        state.config.test_event_code.as_deref(),
        event,
    )
    .await;

    match result {
        Ok(body) => {
            record_success(state, Channel::Attribution, &order.reference, now, &body).await;
            info!(reference = %order.reference, "attribution event delivered");
            true
        }
        Err(e) => {
            warn!(reference = %order.reference, "attribution dispatch failed: {e}");
            record_failure(state, Channel::Attribution, &order.reference, now, &e).await;
            false
        }
    }
}

/// Tell the operator channel about a paid order, once.
pub async fn send_order_notification(state: &AppState, order: &Order) -> bool {
    if order.notify_order.sent {
        return false;
    }
    send_notification(state, Channel::NotifyOrder, order, notify::order_message(order)).await
}

/// Forward freshly collected contact details, once.
pub async fn send_contact_notification(state: &AppState, order: &Order) -> bool {
    if order.notify_contact.sent {
        return false;
    }
    send_notification(
        state,
        Channel::NotifyContact,
        order,
        notify::contact_message(order),
    )
    .await
}

async fn send_notification(
    state: &AppState,
    channel: Channel,
    order: &Order,
    text: String,
) -> bool {
    let now = Utc::now().timestamp();
    let result = notify::send_message(
        &state.client,
        &state.config.notify_api_url,
        &state.config.notify_bot_token,
        &state.config.notify_chat_id,
        &text,
    )
    .await;

    match result {
        Ok(body) => {
            record_success(state, channel, &order.reference, now, &body).await;
            info!(reference = %order.reference, ?channel, "notification delivered");
            true
        }
        Err(e) => {
            warn!(reference = %order.reference, ?channel, "notification failed: {e}");
            record_failure(state, channel, &order.reference, now, &e).await;
            false
        }
    }
}

async fn record_success(state: &AppState, channel: Channel, reference: &str, now: i64, body: &str) {
    if let Err(e) =
        db::record_dispatch_success(&state.pool, channel, reference, now, body).await
    {
        error!(reference, ?channel, "failed to record dispatch success: {e}");
    }
}

async fn record_failure(
    state: &AppState,
    channel: Channel,
    reference: &str,
    now: i64,
    err: &CheckoutError,
) {
    if let Err(e) =
        db::record_dispatch_failure(&state.pool, channel, reference, now, &err.to_string()).await
    {
        error!(reference, ?channel, "failed to record dispatch failure: {e}");
    }
}
