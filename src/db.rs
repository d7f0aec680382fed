//! Database layer — migrations, order persistence, and dispatch bookkeeping.

use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::info;

use crate::errors::{CheckoutError, Result};
use crate::order::{NewOrder, Order};

/// Establish a SQLite connection pool and run pending migrations.
pub async fn init_pool(database_url: &str) -> Result<SqlitePool> {
    let url = if database_url.starts_with("sqlite:") {
        database_url.to_string()
    } else {
        format!("sqlite:{database_url}")
    };

    let options = SqliteConnectOptions::from_str(&url)?.create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Database migrations applied");
    Ok(pool)
}

// ─────────────────────────────────────────────────────────
// Order writes
// ─────────────────────────────────────────────────────────

/// Insert a freshly initialized order. A reference collision is surfaced
/// as [`CheckoutError::DuplicateReference`] instead of a bare driver error.
pub async fn create_order(pool: &SqlitePool, order: &NewOrder) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO orders
            (reference, email, amount, currency, client_ip, user_agent,
             click_id, browser_id, clickthrough_id, country, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
        "#,
    )
    .bind(&order.reference)
    .bind(&order.email)
    .bind(order.amount)
    .bind(&order.currency)
    .bind(&order.identity.client_ip)
    .bind(&order.identity.user_agent)
    .bind(&order.identity.click_id)
    .bind(&order.identity.browser_id)
    .bind(&order.identity.clickthrough_id)
    .bind(&order.country)
    .bind(order.created_at)
    .execute(pool)
    .await
    .map_err(|e| match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            CheckoutError::DuplicateReference(order.reference.clone())
        }
        _ => e.into(),
    })?;
    Ok(())
}

/// Move an order from `initialized` to `success`. Returns whether this call
/// performed the transition; a terminal order is left untouched.
pub async fn mark_success(pool: &SqlitePool, reference: &str, verified_at: i64) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE orders
        SET    status = 'success', verified_at = ?2
        WHERE  reference = ?1 AND status = 'initialized'
        "#,
    )
    .bind(reference)
    .bind(verified_at)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Move an order from `initialized` to `failed`, with the same guard.
pub async fn mark_failed(pool: &SqlitePool, reference: &str) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE orders
        SET    status = 'failed'
        WHERE  reference = ?1 AND status = 'initialized'
        "#,
    )
    .bind(reference)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Store a newly minted access token, replacing any previous one.
pub async fn set_access_token(
    pool: &SqlitePool,
    reference: &str,
    token: &str,
    expires_at: i64,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE orders
        SET    access_token = ?2, token_expires_at = ?3
        WHERE  reference = ?1
        "#,
    )
    .bind(reference)
    .bind(token)
    .bind(expires_at)
    .execute(pool)
    .await?;
    Ok(())
}

/// Save post-purchase contact details. A missing name keeps whatever was
/// already stored.
pub async fn update_contact(
    pool: &SqlitePool,
    reference: &str,
    name: Option<&str>,
    phone: &str,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE orders
        SET    name = COALESCE(?2, name), phone = ?3
        WHERE  reference = ?1
        "#,
    )
    .bind(reference)
    .bind(name)
    .bind(phone)
    .execute(pool)
    .await?;
    Ok(())
}

// ─────────────────────────────────────────────────────────
// Dispatch bookkeeping
// ─────────────────────────────────────────────────────────

/// The three outbound channels, named by their column prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Attribution,
    NotifyOrder,
    NotifyContact,
}

impl Channel {
    fn column_prefix(&self) -> &'static str {
        match self {
            Self::Attribution => "attribution",
            Self::NotifyOrder => "notify_order",
            Self::NotifyContact => "notify_contact",
        }
    }
}

/// Record a delivered dispatch: marks the channel sent, counts the attempt,
/// keeps the response, and clears any stale error.
pub async fn record_dispatch_success(
    pool: &SqlitePool,
    channel: Channel,
    reference: &str,
    now: i64,
    response: &str,
) -> Result<()> {
    let p = channel.column_prefix();
    let sql = format!(
        "UPDATE orders \
         SET {p}_sent = 1, {p}_tries = {p}_tries + 1, {p}_last_attempt_at = ?2, \
             {p}_response = ?3, {p}_error = NULL \
         WHERE reference = ?1"
    );
    sqlx::query(&sql)
        .bind(reference)
        .bind(now)
        .bind(response)
        .execute(pool)
        .await?;
    Ok(())
}

/// Record a failed attempt. Never touches the sent flag, so a channel that
/// was ever delivered stays delivered.
pub async fn record_dispatch_failure(
    pool: &SqlitePool,
    channel: Channel,
    reference: &str,
    now: i64,
    error: &str,
) -> Result<()> {
    let p = channel.column_prefix();
    let sql = format!(
        "UPDATE orders \
         SET {p}_tries = {p}_tries + 1, {p}_last_attempt_at = ?2, {p}_error = ?3 \
         WHERE reference = ?1"
    );
    sqlx::query(&sql)
        .bind(reference)
        .bind(now)
        .bind(error)
        .execute(pool)
        .await?;
    Ok(())
}

// ─────────────────────────────────────────────────────────
// Reads
// ─────────────────────────────────────────────────────────

pub async fn find_order(pool: &SqlitePool, reference: &str) -> Result<Option<Order>> {
    let order = sqlx::query_as::<_, Order>("SELECT * FROM orders WHERE reference = ?1")
        .bind(reference)
        .fetch_optional(pool)
        .await?;
    Ok(order)
}

/// Paid orders whose attribution event has not gone out and which still
/// have retry budget, oldest first.
pub async fn sweepable_orders(
    pool: &SqlitePool,
    max_tries: i64,
    limit: i64,
) -> Result<Vec<Order>> {
    let orders = sqlx::query_as::<_, Order>(
        r#"
        SELECT *
        FROM   orders
        WHERE  status = 'success'
          AND  attribution_sent = 0
          AND  attribution_tries < ?1
        ORDER  BY created_at ASC
        LIMIT  ?2
        "#,
    )
    .bind(max_tries)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(orders)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::ClientIdentity;
    use crate::order::OrderStatus;

    async fn test_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        pool
    }

    fn new_order(reference: &str) -> NewOrder {
        NewOrder {
            reference: reference.to_string(),
            email: "buyer@example.com".into(),
            amount: 150_000,
            currency: "NGN".into(),
            country: "ng".into(),
            identity: ClientIdentity {
                client_ip: Some("203.0.113.9".into()),
                user_agent: Some("Mozilla/5.0".into()),
                click_id: Some("fb.1.1700000000.IwAR2xyz".into()),
                browser_id: Some("fb.1.1700000000.1234567890".into()),
                clickthrough_id: Some("IwAR2xyz".into()),
            },
            created_at: 1_700_000_000,
        }
    }

    #[tokio::test]
    async fn created_orders_read_back_whole() {
        let pool = test_pool().await;
        create_order(&pool, &new_order("ord_1")).await.unwrap();

        let order = find_order(&pool, "ord_1").await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::Initialized);
        assert_eq!(order.amount, 150_000);
        assert_eq!(order.client_ip.as_deref(), Some("203.0.113.9"));
        assert_eq!(order.browser_id.as_deref(), Some("fb.1.1700000000.1234567890"));
        assert!(!order.attribution.sent);
        assert_eq!(order.attribution.tries, 0);
        assert!(find_order(&pool, "ord_missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_references_are_rejected() {
        let pool = test_pool().await;
        create_order(&pool, &new_order("ord_1")).await.unwrap();
        let err = create_order(&pool, &new_order("ord_1")).await.unwrap_err();
        assert!(matches!(err, CheckoutError::DuplicateReference(_)));
    }

    #[tokio::test]
    async fn success_transition_fires_exactly_once() {
        let pool = test_pool().await;
        create_order(&pool, &new_order("ord_1")).await.unwrap();

        assert!(mark_success(&pool, "ord_1", 1_700_000_100).await.unwrap());
        assert!(!mark_success(&pool, "ord_1", 1_700_000_200).await.unwrap());

        let order = find_order(&pool, "ord_1").await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::Success);
        assert_eq!(order.verified_at, Some(1_700_000_100));
    }

    #[tokio::test]
    async fn terminal_states_are_sticky() {
        let pool = test_pool().await;
        create_order(&pool, &new_order("ord_1")).await.unwrap();

        assert!(mark_failed(&pool, "ord_1").await.unwrap());
        assert!(!mark_success(&pool, "ord_1", 1_700_000_100).await.unwrap());
        assert!(!mark_failed(&pool, "ord_1").await.unwrap());

        let order = find_order(&pool, "ord_1").await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::Failed);
    }

    #[tokio::test]
    async fn dispatch_records_accumulate_and_sent_sticks() {
        let pool = test_pool().await;
        create_order(&pool, &new_order("ord_1")).await.unwrap();

        record_dispatch_failure(&pool, Channel::Attribution, "ord_1", 10, "timeout")
            .await
            .unwrap();
        let order = find_order(&pool, "ord_1").await.unwrap().unwrap();
        assert!(!order.attribution.sent);
        assert_eq!(order.attribution.tries, 1);
        assert_eq!(order.attribution.error.as_deref(), Some("timeout"));

        record_dispatch_success(&pool, Channel::Attribution, "ord_1", 20, r#"{"ok":1}"#)
            .await
            .unwrap();
        let order = find_order(&pool, "ord_1").await.unwrap().unwrap();
        assert!(order.attribution.sent);
        assert_eq!(order.attribution.tries, 2);
        assert_eq!(order.attribution.last_attempt_at, Some(20));
        assert_eq!(order.attribution.error, None);
        assert_eq!(order.attribution.response.as_deref(), Some(r#"{"ok":1}"#));

        // Other channels untouched.
        assert!(!order.notify_order.sent);
        assert_eq!(order.notify_order.tries, 0);
    }

    #[tokio::test]
    async fn sweep_selects_only_paid_unsent_with_budget() {
        let pool = test_pool().await;
        for r in ["ord_a", "ord_b", "ord_c", "ord_d"] {
            create_order(&pool, &new_order(r)).await.unwrap();
        }
        // ord_a: paid, never attempted — selected.
        mark_success(&pool, "ord_a", 100).await.unwrap();
        // ord_b: paid but already delivered — skipped.
        mark_success(&pool, "ord_b", 100).await.unwrap();
        record_dispatch_success(&pool, Channel::Attribution, "ord_b", 110, "{}")
            .await
            .unwrap();
        // ord_c: paid with exhausted budget — skipped.
        mark_success(&pool, "ord_c", 100).await.unwrap();
        for i in 0..5 {
            record_dispatch_failure(&pool, Channel::Attribution, "ord_c", 110 + i, "boom")
                .await
                .unwrap();
        }
        // ord_d: unpaid — skipped.

        let due = sweepable_orders(&pool, 5, 10).await.unwrap();
        let refs: Vec<&str> = due.iter().map(|o| o.reference.as_str()).collect();
        assert_eq!(refs, ["ord_a"]);
    }

    #[tokio::test]
    async fn sweep_honors_the_batch_limit() {
        let pool = test_pool().await;
        for i in 0..4 {
            let mut order = new_order(&format!("ord_{i}"));
            order.created_at = 1_700_000_000 + i;
            create_order(&pool, &order).await.unwrap();
            mark_success(&pool, &order.reference, 100).await.unwrap();
        }
        let due = sweepable_orders(&pool, 5, 2).await.unwrap();
        assert_eq!(due.len(), 2);
        assert_eq!(due[0].reference, "ord_0");
        assert_eq!(due[1].reference, "ord_1");
    }

    #[tokio::test]
    async fn contact_update_keeps_existing_name_when_absent() {
        let pool = test_pool().await;
        create_order(&pool, &new_order("ord_1")).await.unwrap();

        update_contact(&pool, "ord_1", Some("Ada Obi"), "+2348012345678")
            .await
            .unwrap();
        update_contact(&pool, "ord_1", None, "+2348099999999")
            .await
            .unwrap();

        let order = find_order(&pool, "ord_1").await.unwrap().unwrap();
        assert_eq!(order.name.as_deref(), Some("Ada Obi"));
        assert_eq!(order.phone.as_deref(), Some("+2348099999999"));
    }
}
