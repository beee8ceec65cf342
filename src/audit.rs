use serde_json::Value;
use uuid::Uuid;

use crate::{db::DbPool, error::AppResult};

/// Actions the order workflow records. Kept closed so the audit trail
/// stays queryable.
#[derive(Debug, Clone, Copy)]
pub enum AuditAction {
    OrderCreated,
    CheckoutInitiated,
    PaymentConfirmed,
    CartUpdated,
    CartItemRemoved,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::OrderCreated => "order_created",
            AuditAction::CheckoutInitiated => "checkout_initiated",
            AuditAction::PaymentConfirmed => "payment_confirmed",
            AuditAction::CartUpdated => "cart_updated",
            AuditAction::CartItemRemoved => "cart_item_removed",
        }
    }
}

pub async fn log_audit(
    pool: &DbPool,
    user_id: Option<Uuid>,
    action: AuditAction,
    resource: Option<&str>,
    metadata: Option<Value>,
) -> AppResult<()> {
    sqlx::query(
        r#"
        INSERT INTO audit_logs (id, user_id, action, resource, metadata)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(user_id)
    .bind(action.as_str())
    .bind(resource)
    .bind(metadata)
    .execute(pool)
    .await?;

    Ok(())
}
