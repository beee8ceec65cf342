//! Checkout Initiator: re-validates stock, attaches addresses, opens a
//! payment session at the gateway and moves the order to awaiting payment.
//!
//! The awaiting-payment transition and the attempt counter are persisted
//! only after the gateway initialize succeeds, so a failed attempt leaves
//! the stored order in (draft, pending) and a retry starts clean.

use chrono::Utc;
use sea_orm::ActiveValue::NotSet;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, IntoActiveModel, QueryFilter, Set};

use crate::{
    audit::{AuditAction, log_audit},
    dto::orders::{CheckoutRequest, CheckoutResponse},
    error::{AppError, AppResult, OutOfStockItem},
    middleware::auth::AuthUser,
    models::{Address, OrderStatus, PaymentMethod, PaymentStatus},
    paystack::{InitializeRequest, TransactionMetadata},
    response::{ApiResponse, Meta},
    services::order_service::find_owned_order,
    state::AppState,
    entity::{
        addresses::{ActiveModel as AddressActive, Column as AddrCol, Entity as Addresses},
        order_items::{Column as OrderItemCol, Entity as OrderItems},
        products::{Column as ProdCol, Entity as Products},
        users::Entity as Users,
    },
};

pub async fn checkout(
    state: &AppState,
    user: &AuthUser,
    payload: CheckoutRequest,
) -> AppResult<ApiResponse<CheckoutResponse>> {
    let payment_method = PaymentMethod::parse(&payload.payment_method).ok_or_else(|| {
        AppError::BadRequest("Invalid payment method. Must be CARD or BANK_TRANSFER".into())
    })?;

    let mut order = find_owned_order(state, user, payload.order_id).await?;

    if order.payment_status != PaymentStatus::Pending.as_str() {
        return Err(AppError::BadRequest("Order already paid".into()));
    }

    // Stock may have moved since the draft was created.
    let items = OrderItems::find()
        .filter(OrderItemCol::OrderId.eq(order.id))
        .all(&state.orm)
        .await?;

    let mut out_of_stock: Vec<OutOfStockItem> = Vec::new();
    for item in &items {
        let product = Products::find()
            .filter(ProdCol::Id.eq(item.product_id))
            .one(&state.orm)
            .await?
            .ok_or(AppError::NotFound)?;

        if product.stock < item.quantity {
            out_of_stock.push(OutOfStockItem {
                product_id: product.id,
                product_name: product.name,
                requested_quantity: item.quantity,
                available_stock: product.stock,
            });
        }
    }
    if !out_of_stock.is_empty() {
        return Err(AppError::OutOfStock(out_of_stock));
    }

    // An abandoned earlier attempt may have left the order mid-checkout;
    // reset it so this attempt starts from a draft.
    if order.status != OrderStatus::Draft.as_str() {
        let mut active = order.into_active_model();
        active.status = Set(OrderStatus::Draft.as_str().into());
        active.payment_status = Set(PaymentStatus::Pending.as_str().into());
        active.payment_method = Set(None);
        active.updated_at = Set(Utc::now().into());
        order = active.update(&state.orm).await?;
    }

    if order.total_amount <= 0 {
        return Err(AppError::BadRequest("Order total amount is missing".into()));
    }

    upsert_address(state, user, &payload.shipping_address).await?;
    upsert_address(state, user, &payload.billing_address).await?;

    let attempt_number = order.payment_attempts + 1;
    let attempt_reference = format!("{}-{}", order.payment_reference, attempt_number);

    let callback_url = format!(
        "{}/orders/confirmation?orderId={}",
        state.config.frontend_origin.trim_end_matches('/'),
        order.id
    );

    // Amounts are stored in minor units already, so no rounding here.
    let session = state
        .gateway
        .initialize_transaction(InitializeRequest {
            email: payload.email,
            amount: order.total_amount,
            reference: attempt_reference,
            callback_url,
            metadata: TransactionMetadata {
                order_id: order.id,
                user_id: user.user_id,
                attempt_id: attempt_number,
            },
            channels: payment_method.channels(),
        })
        .await?;

    let order_id = order.id;
    let mut active = order.into_active_model();
    active.shipping_address = Set(Some(address_json(&payload.shipping_address)?));
    active.billing_address = Set(Some(address_json(&payload.billing_address)?));
    active.payment_method = Set(Some(payment_method.as_str().into()));
    active.notes = Set(payload.notes);
    active.status = Set(OrderStatus::AwaitingPayment.as_str().into());
    active.payment_attempts = Set(attempt_number);
    active.payment_reference = Set(session.reference.clone());
    active.updated_at = Set(Utc::now().into());
    active.update(&state.orm).await?;

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id),
        AuditAction::CheckoutInitiated,
        Some("orders"),
        Some(serde_json::json!({
            "order_id": order_id,
            "attempt": attempt_number,
            "reference": session.reference,
        })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Checkout initialized",
        CheckoutResponse {
            payment_url: session.authorization_url,
            reference: session.reference,
            payment_method,
            attempt_number,
        },
        Some(Meta::empty()),
    ))
}

/// Save the address on the user's list unless a saved address already has
/// the same street. Other fields are not compared.
async fn upsert_address(state: &AppState, user: &AuthUser, address: &Address) -> AppResult<()> {
    Users::find_by_id(user.user_id)
        .one(&state.orm)
        .await?
        .ok_or(AppError::NotFound)?;

    let existing = Addresses::find()
        .filter(AddrCol::UserId.eq(user.user_id))
        .filter(AddrCol::Street.eq(address.street.clone()))
        .one(&state.orm)
        .await?;

    if existing.is_none() {
        AddressActive {
            id: Set(uuid::Uuid::new_v4()),
            user_id: Set(user.user_id),
            street: Set(address.street.clone()),
            city: Set(address.city.clone()),
            state: Set(address.state.clone()),
            country: Set(address.country.clone()),
            postal_code: Set(address.postal_code.clone()),
            created_at: NotSet,
        }
        .insert(&state.orm)
        .await?;
    }

    Ok(())
}

fn address_json(address: &Address) -> AppResult<serde_json::Value> {
    serde_json::to_value(address)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("address serialization: {e}")))
}
