//! Payment confirmation. Both delivery paths (gateway webhook and client
//! polling) converge on [`confirm_payment`], a single conditional state
//! transition, so the paid transition and the stock decrement happen at
//! most once per order no matter how many times either path fires.

use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, Condition, EntityTrait, QueryFilter};
use uuid::Uuid;

use crate::{
    audit::{AuditAction, log_audit},
    dto::orders::{OrderStatusResponse, VerifyPaymentResponse},
    error::{AppError, AppResult},
    middleware::auth::AuthUser,
    models::{OrderStatus, PaymentStatus},
    paystack::WebhookEvent,
    response::{ApiResponse, Meta},
    services::order_service::{find_owned_order, order_item_from_entity},
    state::AppState,
    entity::{
        order_items::{Column as OrderItemCol, Entity as OrderItems},
        orders::{Column as OrderCol, Entity as Orders},
        products::{Column as ProdCol, Entity as Products},
    },
};

/// Apply the paid transition if the order is still pending. Returns whether
/// this call performed the transition.
///
/// The pending check and the write are one conditional UPDATE, so two
/// concurrent confirmations cannot both observe "pending": exactly one
/// reports a changed row and goes on to decrement stock.
pub async fn confirm_payment(state: &AppState, order_id: Uuid) -> AppResult<bool> {
    let result = Orders::update_many()
        .col_expr(OrderCol::PaymentStatus, Expr::value(PaymentStatus::Paid.as_str()))
        .col_expr(OrderCol::Status, Expr::value(OrderStatus::Processing.as_str()))
        .col_expr(OrderCol::IsConfirmed, Expr::value(true))
        .col_expr(OrderCol::TrackingNumber, Expr::value(generate_tracking_number()))
        .col_expr(OrderCol::PaidAt, Expr::value(Utc::now()))
        .col_expr(OrderCol::UpdatedAt, Expr::value(Utc::now()))
        .filter(
            Condition::all()
                .add(OrderCol::Id.eq(order_id))
                .add(OrderCol::PaymentStatus.eq(PaymentStatus::Pending.as_str())),
        )
        .exec(&state.orm)
        .await?;

    if result.rows_affected == 0 {
        tracing::debug!(%order_id, "payment already confirmed, skipping");
        return Ok(false);
    }

    // Only the call that won the conditional update gets here, so each
    // item's stock is decremented exactly once per order. Decrements are
    // per-product atomic and clamp at zero; no cross-product transaction.
    let items = OrderItems::find()
        .filter(OrderItemCol::OrderId.eq(order_id))
        .all(&state.orm)
        .await?;

    for item in &items {
        Products::update_many()
            .col_expr(
                ProdCol::Stock,
                Expr::cust_with_values("GREATEST(stock - ?, 0)", [item.quantity]),
            )
            .filter(ProdCol::Id.eq(item.product_id))
            .exec(&state.orm)
            .await?;
    }

    tracing::info!(%order_id, "payment confirmed, order moved to processing");
    Ok(true)
}

/// Webhook body handling, called after the signature has been verified.
/// Unknown events and permanently-missing orders are acknowledged without
/// error so the gateway stops retrying.
pub async fn apply_webhook_event(state: &AppState, body: &[u8]) -> AppResult<()> {
    let event: WebhookEvent = serde_json::from_slice(body)
        .map_err(|e| AppError::BadRequest(format!("invalid webhook payload: {e}")))?;

    if event.event != "charge.success" {
        tracing::debug!(event = %event.event, "ignoring webhook event");
        return Ok(());
    }

    let Some(metadata) = event.data.metadata else {
        tracing::warn!(reference = %event.data.reference, "charge.success without metadata");
        return Ok(());
    };

    let order = Orders::find_by_id(metadata.order_id).one(&state.orm).await?;
    let Some(order) = order else {
        tracing::warn!(
            order_id = %metadata.order_id,
            reference = %event.data.reference,
            "webhook for unknown order"
        );
        return Ok(());
    };

    if confirm_payment(state, order.id).await? {
        if let Err(err) = log_audit(
            &state.pool,
            Some(metadata.user_id),
            AuditAction::PaymentConfirmed,
            Some("orders"),
            Some(serde_json::json!({
                "order_id": order.id,
                "reference": event.data.reference,
                "source": "webhook",
            })),
        )
        .await
        {
            tracing::warn!(error = %err, "audit log failed");
        }
    }

    Ok(())
}

/// Polling path: report the order's state, verifying a pending payment with
/// the gateway first. A gateway error never fails the request and never
/// marks the payment failed; the caller just sees the last known state.
pub async fn check_order_status(
    state: &AppState,
    user: &AuthUser,
    order_id: Uuid,
) -> AppResult<ApiResponse<OrderStatusResponse>> {
    let mut order = find_owned_order(state, user, order_id).await?;

    if order.payment_status == PaymentStatus::Pending.as_str()
        && !order.payment_reference.is_empty()
    {
        match state.gateway.verify_transaction(&order.payment_reference).await {
            Ok(verified) if verified.success => {
                if confirm_payment(state, order.id).await? {
                    if let Err(err) = log_audit(
                        &state.pool,
                        Some(user.user_id),
                        AuditAction::PaymentConfirmed,
                        Some("orders"),
                        Some(serde_json::json!({
                            "order_id": order.id,
                            "reference": order.payment_reference,
                            "source": "status_poll",
                        })),
                    )
                    .await
                    {
                        tracing::warn!(error = %err, "audit log failed");
                    }
                }
                order = find_owned_order(state, user, order_id).await?;
            }
            Ok(_) => {
                tracing::debug!(order_id = %order.id, "gateway reports charge not successful yet");
            }
            Err(err) => {
                tracing::warn!(order_id = %order.id, error = %err, "payment verification failed, returning current state");
            }
        }
    }

    let items = OrderItems::find()
        .filter(OrderItemCol::OrderId.eq(order.id))
        .all(&state.orm)
        .await?
        .into_iter()
        .map(order_item_from_entity)
        .collect();

    let status = OrderStatus::parse(&order.status)
        .ok_or_else(|| AppError::Internal(anyhow::anyhow!("unknown order status {}", order.status)))?;
    let payment_status = PaymentStatus::parse(&order.payment_status).ok_or_else(|| {
        AppError::Internal(anyhow::anyhow!("unknown payment status {}", order.payment_status))
    })?;

    Ok(ApiResponse::success(
        "OK",
        OrderStatusResponse {
            order_id: order.id,
            order_number: order.order_number,
            status,
            payment_status,
            total_amount: order.total_amount,
            tracking_number: order.tracking_number,
            items,
        },
        Some(Meta::empty()),
    ))
}

/// Verify path: resolve a gateway reference to an order and confirm it.
/// Unlike the polling path, a gateway-reported failure surfaces to the
/// caller since they explicitly asked about this reference.
pub async fn verify_payment(
    state: &AppState,
    user: &AuthUser,
    reference: &str,
) -> AppResult<ApiResponse<VerifyPaymentResponse>> {
    if reference.is_empty() {
        return Err(AppError::BadRequest("Reference parameter is required".into()));
    }

    let verified = state.gateway.verify_transaction(reference).await?;
    if !verified.success {
        return Err(AppError::BadRequest(format!(
            "Payment verification failed for reference {reference}"
        )));
    }

    let metadata = verified
        .metadata
        .ok_or_else(|| AppError::BadRequest("verified transaction carries no order metadata".into()))?;

    let order = find_owned_order(state, user, metadata.order_id).await?;

    if confirm_payment(state, order.id).await? {
        if let Err(err) = log_audit(
            &state.pool,
            Some(user.user_id),
            AuditAction::PaymentConfirmed,
            Some("orders"),
            Some(serde_json::json!({
                "order_id": order.id,
                "reference": reference,
                "source": "verify",
            })),
        )
        .await
        {
            tracing::warn!(error = %err, "audit log failed");
        }
    }

    Ok(ApiResponse::success(
        "Payment verified successfully",
        VerifyPaymentResponse {
            order_id: order.id,
            payment_status: PaymentStatus::Paid,
            reference: reference.to_string(),
        },
        Some(Meta::empty()),
    ))
}

fn generate_tracking_number() -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!("TRK-{}", &id[..10].to_uppercase())
}
