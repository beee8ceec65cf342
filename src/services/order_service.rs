//! Order Builder: validates a submitted item list against the catalog and
//! persists a draft order, clearing the originating cart.

use chrono::Utc;
use rand::{Rng, distributions::Alphanumeric};
use sea_orm::ActiveValue::NotSet;
use sea_orm::sea_query::LockType;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, QuerySelect, Set, TransactionTrait,
};
use uuid::Uuid;

use crate::{
    audit::{AuditAction, log_audit},
    dto::orders::{CreateOrderRequest, CreatedOrder, OrderList, OrderWithItems},
    error::{AppError, AppResult},
    middleware::auth::AuthUser,
    models::{Order, OrderItem, OrderStatus, PaymentMethod, PaymentStatus},
    response::{ApiResponse, Meta},
    routes::params::{OrderListQuery, SortOrder},
    state::AppState,
    entity::{
        cart_items::{Column as CartCol, Entity as CartItems},
        order_items::{
            ActiveModel as OrderItemActive, Column as OrderItemCol, Entity as OrderItems,
            Model as OrderItemModel,
        },
        orders::{ActiveModel as OrderActive, Column as OrderCol, Entity as Orders, Model as OrderModel},
        products::{Column as ProdCol, Entity as Products},
    },
};

pub async fn create_order(
    state: &AppState,
    user: &AuthUser,
    payload: CreateOrderRequest,
) -> AppResult<ApiResponse<CreatedOrder>> {
    if payload.items.is_empty() {
        return Err(AppError::BadRequest(
            "Invalid order data. At least one item required.".into(),
        ));
    }

    let txn = state.orm.begin().await?;

    // Validate products and snapshot unit prices under row locks so stock
    // seen here cannot shrink before the order row lands.
    let mut computed_total: i64 = 0;
    let mut validated: Vec<(Uuid, i32, i64)> = Vec::new();
    for item in &payload.items {
        if item.quantity <= 0 {
            return Err(AppError::BadRequest("quantity must be greater than 0".into()));
        }
        let product = Products::find()
            .filter(ProdCol::Id.eq(item.product_id))
            .lock(LockType::Update)
            .one(&txn)
            .await?
            .ok_or(AppError::NotFound)?;

        if product.stock < item.quantity {
            return Err(AppError::BadRequest(format!(
                "Insufficient stock for product {}. Available: {}",
                product.name, product.stock
            )));
        }

        computed_total += product.price * (item.quantity as i64);
        validated.push((product.id, item.quantity, product.price));
    }

    // The client total is advisory only; the catalog is authoritative.
    if computed_total != payload.total_amount {
        return Err(AppError::BadRequest(format!(
            "Total amount does not match the sum of item prices. Expected {computed_total}"
        )));
    }

    let order_id = Uuid::new_v4();
    let order = OrderActive {
        id: Set(order_id),
        order_number: Set(build_order_number(order_id)),
        user_id: Set(user.user_id),
        total_amount: Set(computed_total),
        status: Set(OrderStatus::Draft.as_str().into()),
        payment_status: Set(PaymentStatus::Pending.as_str().into()),
        payment_method: Set(None),
        payment_reference: Set(generate_payment_reference(user.user_id)),
        shipping_address: Set(None),
        billing_address: Set(None),
        notes: Set(None),
        tracking_number: Set(None),
        payment_attempts: Set(0),
        is_confirmed: Set(false),
        paid_at: Set(None),
        created_at: NotSet,
        updated_at: NotSet,
    }
    .insert(&txn)
    .await?;

    let mut order_items: Vec<OrderItem> = Vec::new();
    for (product_id, quantity, price) in validated {
        let item = OrderItemActive {
            id: Set(Uuid::new_v4()),
            order_id: Set(order.id),
            product_id: Set(product_id),
            quantity: Set(quantity),
            price: Set(price),
            created_at: NotSet,
        }
        .insert(&txn)
        .await?;
        order_items.push(order_item_from_entity(item));
    }

    // The cart fed this order; emptying it is not undone by later
    // checkout failures.
    CartItems::delete_many()
        .filter(CartCol::UserId.eq(user.user_id))
        .exec(&txn)
        .await?;

    txn.commit().await?;

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id),
        AuditAction::OrderCreated,
        Some("orders"),
        Some(serde_json::json!({ "order_id": order.id })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Order created successfully",
        CreatedOrder {
            order_id: order.id,
            order_number: order.order_number,
            items: order_items,
            total_amount: order.total_amount,
        },
        Some(Meta::empty()),
    ))
}

pub async fn list_orders(
    state: &AppState,
    user: &AuthUser,
    query: OrderListQuery,
) -> AppResult<ApiResponse<OrderList>> {
    let (page, limit, offset) = query.pagination.normalize();
    let mut condition = Condition::all().add(OrderCol::UserId.eq(user.user_id));
    if let Some(status) = query.status.as_ref().filter(|s| !s.is_empty()) {
        condition = condition.add(OrderCol::Status.eq(status.clone()));
    }

    let sort_order = query.sort_order.unwrap_or(SortOrder::Desc);

    let mut finder = Orders::find().filter(condition);
    finder = match sort_order {
        SortOrder::Asc => finder.order_by_asc(OrderCol::CreatedAt),
        SortOrder::Desc => finder.order_by_desc(OrderCol::CreatedAt),
    };

    let total = finder.clone().count(&state.orm).await? as i64;

    let orders = finder
        .limit(limit as u64)
        .offset(offset as u64)
        .all(&state.orm)
        .await?
        .into_iter()
        .map(order_from_entity)
        .collect::<AppResult<Vec<Order>>>()?;

    let meta = Meta::new(page, limit, total);
    Ok(ApiResponse::success(
        "Ok",
        OrderList { items: orders },
        Some(meta),
    ))
}

pub async fn get_order(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<OrderWithItems>> {
    let order = find_owned_order(state, user, id).await?;

    let items = OrderItems::find()
        .filter(OrderItemCol::OrderId.eq(order.id))
        .all(&state.orm)
        .await?
        .into_iter()
        .map(order_item_from_entity)
        .collect();

    Ok(ApiResponse::success(
        "OK",
        OrderWithItems {
            order: order_from_entity(order)?,
            items,
        },
        Some(Meta::empty()),
    ))
}

/// Compound (id, owner) lookup; a foreign order is indistinguishable from
/// a missing one.
pub(crate) async fn find_owned_order(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<OrderModel> {
    Orders::find()
        .filter(
            Condition::all()
                .add(OrderCol::UserId.eq(user.user_id))
                .add(OrderCol::Id.eq(id)),
        )
        .one(&state.orm)
        .await?
        .ok_or(AppError::NotFound)
}

pub(crate) fn order_from_entity(model: OrderModel) -> AppResult<Order> {
    let status = OrderStatus::parse(&model.status)
        .ok_or_else(|| AppError::Internal(anyhow::anyhow!("unknown order status {}", model.status)))?;
    let payment_status = PaymentStatus::parse(&model.payment_status).ok_or_else(|| {
        AppError::Internal(anyhow::anyhow!(
            "unknown payment status {}",
            model.payment_status
        ))
    })?;
    let payment_method = match model.payment_method.as_deref() {
        Some(m) => Some(PaymentMethod::parse(m).ok_or_else(|| {
            AppError::Internal(anyhow::anyhow!("unknown payment method {m}"))
        })?),
        None => None,
    };

    Ok(Order {
        id: model.id,
        order_number: model.order_number,
        user_id: model.user_id,
        total_amount: model.total_amount,
        status,
        payment_status,
        payment_method,
        payment_reference: model.payment_reference,
        shipping_address: model
            .shipping_address
            .and_then(|v| serde_json::from_value(v).ok()),
        billing_address: model
            .billing_address
            .and_then(|v| serde_json::from_value(v).ok()),
        notes: model.notes,
        tracking_number: model.tracking_number,
        payment_attempts: model.payment_attempts,
        is_confirmed: model.is_confirmed,
        paid_at: model.paid_at.map(|dt| dt.with_timezone(&Utc)),
        created_at: model.created_at.with_timezone(&Utc),
        updated_at: model.updated_at.with_timezone(&Utc),
    })
}

pub(crate) fn order_item_from_entity(model: OrderItemModel) -> OrderItem {
    OrderItem {
        id: model.id,
        order_id: model.order_id,
        product_id: model.product_id,
        quantity: model.quantity,
        price: model.price,
        created_at: model.created_at.with_timezone(&Utc),
    }
}

fn build_order_number(order_id: Uuid) -> String {
    let date = Utc::now().format("%Y%m%d");
    let suffix = order_id.simple().to_string();
    format!("ORD-{}-{}", date, &suffix[..8])
}

/// Base gateway reference: owner, creation time and a random suffix. A
/// unique index on the column backs this up in case of collision.
pub(crate) fn generate_payment_reference(user_id: Uuid) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(char::from)
        .collect();
    format!(
        "{}-{}-{}",
        user_id.simple(),
        Utc::now().timestamp_millis(),
        suffix
    )
}
