use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post, put},
};
use uuid::Uuid;

use crate::{
    dto::orders::{
        CheckoutRequest, CheckoutResponse, CreateOrderRequest, CreatedOrder, OrderList,
        OrderStatusResponse, OrderWithItems, VerifyPaymentResponse,
    },
    error::AppResult,
    middleware::auth::AuthUser,
    response::ApiResponse,
    routes::params::OrderListQuery,
    services::{checkout_service, order_service, payment_service},
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_orders))
        .route("/create", post(create_order))
        .route("/checkout", put(checkout))
        .route("/status/{id}", get(order_status))
        .route("/verify/{reference}", get(verify_payment))
        .route("/{id}", get(get_order))
}

#[utoipa::path(
    post,
    path = "/api/orders/create",
    request_body = CreateOrderRequest,
    responses(
        (status = 201, description = "Draft order created", body = ApiResponse<CreatedOrder>),
        (status = 400, description = "Invalid items or total"),
        (status = 404, description = "Product not found"),
    ),
    security(("bearer_auth" = [])),
    tag = "Orders"
)]
pub async fn create_order(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<CreateOrderRequest>,
) -> AppResult<(StatusCode, Json<ApiResponse<CreatedOrder>>)> {
    let response = order_service::create_order(&state, &user, payload).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

#[utoipa::path(
    put,
    path = "/api/orders/checkout",
    request_body = CheckoutRequest,
    responses(
        (status = 200, description = "Payment session opened", body = ApiResponse<CheckoutResponse>),
        (status = 400, description = "Invalid payment method, missing total, or gateway refusal"),
        (status = 404, description = "Order not found"),
        (status = 409, description = "Items out of stock"),
    ),
    security(("bearer_auth" = [])),
    tag = "Orders"
)]
pub async fn checkout(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<CheckoutRequest>,
) -> AppResult<Json<ApiResponse<CheckoutResponse>>> {
    let response = checkout_service::checkout(&state, &user, payload).await?;
    Ok(Json(response))
}

#[utoipa::path(
    get,
    path = "/api/orders/status/{id}",
    params(("id" = Uuid, Path, description = "Order ID")),
    responses(
        (status = 200, description = "Current order state, verified against the gateway when pending", body = ApiResponse<OrderStatusResponse>),
        (status = 404, description = "Order not found"),
    ),
    security(("bearer_auth" = [])),
    tag = "Orders"
)]
pub async fn order_status(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<OrderStatusResponse>>> {
    let response = payment_service::check_order_status(&state, &user, id).await?;
    Ok(Json(response))
}

#[utoipa::path(
    get,
    path = "/api/orders/verify/{reference}",
    params(("reference" = String, Path, description = "Gateway payment reference")),
    responses(
        (status = 200, description = "Payment verified and order confirmed", body = ApiResponse<VerifyPaymentResponse>),
        (status = 400, description = "Gateway reports the charge unsuccessful"),
        (status = 404, description = "Order not found"),
    ),
    security(("bearer_auth" = [])),
    tag = "Orders"
)]
pub async fn verify_payment(
    State(state): State<AppState>,
    user: AuthUser,
    Path(reference): Path<String>,
) -> AppResult<Json<ApiResponse<VerifyPaymentResponse>>> {
    let response = payment_service::verify_payment(&state, &user, &reference).await?;
    Ok(Json(response))
}

#[utoipa::path(
    get,
    path = "/api/orders",
    params(
        ("page" = Option<i64>, Query, description = "Page number, default 1"),
        ("per_page" = Option<i64>, Query, description = "Items per page, default 20"),
        ("status" = Option<String>, Query, description = "Filter by order status"),
    ),
    responses(
        (status = 200, description = "List the caller's orders", body = ApiResponse<OrderList>)
    ),
    security(("bearer_auth" = [])),
    tag = "Orders"
)]
pub async fn list_orders(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<OrderListQuery>,
) -> AppResult<Json<ApiResponse<OrderList>>> {
    let response = order_service::list_orders(&state, &user, query).await?;
    Ok(Json(response))
}

#[utoipa::path(
    get,
    path = "/api/orders/{id}",
    params(("id" = Uuid, Path, description = "Order ID")),
    responses(
        (status = 200, description = "Order with its items", body = ApiResponse<OrderWithItems>),
        (status = 404, description = "Order not found"),
    ),
    security(("bearer_auth" = [])),
    tag = "Orders"
)]
pub async fn get_order(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<OrderWithItems>>> {
    let response = order_service::get_order(&state, &user, id).await?;
    Ok(Json(response))
}
