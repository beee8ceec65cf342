//! Cart collaborator surface. The Order Builder consumes and clears these
//! rows; the endpoints here just maintain them.

use chrono::Utc;
use sea_orm::ActiveValue::NotSet;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, EntityTrait, IntoActiveModel, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect, Set,
};
use uuid::Uuid;

use crate::{
    audit::{AuditAction, log_audit},
    dto::cart::{AddToCartRequest, CartItemDto, CartList},
    error::{AppError, AppResult},
    middleware::auth::AuthUser,
    models::{CartItem, Product},
    response::{ApiResponse, Meta},
    routes::params::Pagination,
    state::AppState,
    entity::{
        cart_items::{
            ActiveModel as CartItemActive, Column as CartCol, Entity as CartItems,
            Model as CartItemModel,
        },
        products::{Column as ProdCol, Entity as Products},
    },
};

pub async fn list_cart(
    state: &AppState,
    user: &AuthUser,
    pagination: Pagination,
) -> AppResult<ApiResponse<CartList>> {
    let (page, limit, offset) = pagination.normalize();

    let rows = CartItems::find()
        .find_also_related(Products)
        .filter(CartCol::UserId.eq(user.user_id))
        .order_by_desc(CartCol::CreatedAt)
        .limit(limit as u64)
        .offset(offset as u64)
        .all(&state.orm)
        .await?;

    let total = CartItems::find()
        .filter(CartCol::UserId.eq(user.user_id))
        .count(&state.orm)
        .await? as i64;

    let items = rows
        .into_iter()
        .filter_map(|(item, product)| {
            product.map(|p| CartItemDto {
                id: item.id,
                product: Product {
                    id: p.id,
                    name: p.name,
                    description: p.description,
                    price: p.price,
                    stock: p.stock,
                    created_at: p.created_at.with_timezone(&Utc),
                },
                quantity: item.quantity,
            })
        })
        .collect();

    let meta = Meta::new(page, limit, total);
    Ok(ApiResponse::success("OK", CartList { items }, Some(meta)))
}

pub async fn add_to_cart(
    state: &AppState,
    user: &AuthUser,
    payload: AddToCartRequest,
) -> AppResult<ApiResponse<CartItem>> {
    if payload.quantity <= 0 {
        return Err(AppError::BadRequest(
            "quantity must be greater than 0".to_string(),
        ));
    }

    let product = Products::find()
        .filter(ProdCol::Id.eq(payload.product_id))
        .one(&state.orm)
        .await?;
    if product.is_none() {
        return Err(AppError::BadRequest("product not found".to_string()));
    }

    let existing = CartItems::find()
        .filter(
            Condition::all()
                .add(CartCol::UserId.eq(user.user_id))
                .add(CartCol::ProductId.eq(payload.product_id)),
        )
        .one(&state.orm)
        .await?;

    let cart_item = if let Some(item) = existing {
        let mut active = item.into_active_model();
        active.quantity = Set(payload.quantity);
        active.update(&state.orm).await?
    } else {
        CartItemActive {
            id: Set(Uuid::new_v4()),
            user_id: Set(user.user_id),
            product_id: Set(payload.product_id),
            quantity: Set(payload.quantity),
            created_at: NotSet,
        }
        .insert(&state.orm)
        .await?
    };

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id),
        AuditAction::CartUpdated,
        Some("cart_items"),
        Some(serde_json::json!({ "product_id": payload.product_id, "quantity": payload.quantity })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success("OK", cart_item_from_entity(cart_item), None))
}

pub async fn remove_from_cart(
    state: &AppState,
    user: &AuthUser,
    product_id: Uuid,
) -> AppResult<ApiResponse<serde_json::Value>> {
    let result = CartItems::delete_many()
        .filter(
            Condition::all()
                .add(CartCol::UserId.eq(user.user_id))
                .add(CartCol::ProductId.eq(product_id)),
        )
        .exec(&state.orm)
        .await?;

    if result.rows_affected == 0 {
        return Err(AppError::NotFound);
    }

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id),
        AuditAction::CartItemRemoved,
        Some("cart_items"),
        Some(serde_json::json!({ "product_id": product_id })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Removed from cart",
        serde_json::json!({}),
        Some(Meta::empty()),
    ))
}

fn cart_item_from_entity(model: CartItemModel) -> CartItem {
    CartItem {
        id: model.id,
        product_id: model.product_id,
        user_id: model.user_id,
        quantity: model.quantity,
        created_at: model.created_at.with_timezone(&Utc),
    }
}
