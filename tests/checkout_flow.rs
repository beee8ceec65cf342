mod common;

use std::sync::{Arc, atomic::Ordering};

use axum::{body::Bytes, extract::State, http::HeaderMap, http::StatusCode};
use sea_orm::{ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter};
use uuid::Uuid;

use common::{StubGateway, WEBHOOK_SIGNATURE, create_product, create_user, setup_state, test_address};
use storefront_api::{
    dto::orders::{CheckoutRequest, CreateOrderItem, CreateOrderRequest},
    entity::{
        cart_items::{Column as CartCol, Entity as CartItems},
        orders::{Column as OrderCol, Entity as Orders},
        products::Entity as Products,
    },
    error::AppError,
    middleware::auth::AuthUser,
    models::{OrderStatus, PaymentStatus},
    routes::webhook::{SIGNATURE_HEADER, payment_webhook},
    services::{cart_service, checkout_service, order_service},
    dto::cart::AddToCartRequest,
};

fn auth(user_id: Uuid) -> AuthUser {
    AuthUser {
        user_id,
        role: "user".into(),
    }
}

fn webhook_body(order_id: Uuid, user_id: Uuid, reference: &str, event: &str) -> Bytes {
    let body = serde_json::json!({
        "event": event,
        "data": {
            "reference": reference,
            "metadata": {
                "orderId": order_id,
                "userId": user_id,
                "attemptId": 1,
            }
        }
    });
    Bytes::from(serde_json::to_vec(&body).unwrap())
}

fn signed_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(SIGNATURE_HEADER, WEBHOOK_SIGNATURE.parse().unwrap());
    headers
}

// Full journey: cart -> draft order -> checkout -> webhook confirmation.
// Re-delivering the webhook must not decrement stock a second time.
#[tokio::test]
async fn create_checkout_webhook_flow() -> anyhow::Result<()> {
    let gateway = Arc::new(StubGateway::default());
    let Some(state) = setup_state(gateway.clone()).await? else {
        return Ok(());
    };

    let user_id = create_user(&state).await?;
    let user = auth(user_id);
    // price 50, stock 5, ordering 2 => total 100
    let product_id = create_product(&state, 50, 5).await?;

    cart_service::add_to_cart(
        &state,
        &user,
        AddToCartRequest {
            product_id,
            quantity: 2,
        },
    )
    .await?;

    let created = order_service::create_order(
        &state,
        &user,
        CreateOrderRequest {
            items: vec![CreateOrderItem {
                product_id,
                quantity: 2,
            }],
            total_amount: 100,
        },
    )
    .await?
    .data
    .unwrap();
    assert_eq!(created.total_amount, 100);
    assert_eq!(created.items.len(), 1);
    assert_eq!(created.items[0].price, 50);

    // Creating the order emptied the cart.
    let cart_count = CartItems::find()
        .filter(CartCol::UserId.eq(user_id))
        .count(&state.orm)
        .await?;
    assert_eq!(cart_count, 0);

    let order = Orders::find_by_id(created.order_id)
        .one(&state.orm)
        .await?
        .unwrap();
    assert_eq!(order.status, OrderStatus::Draft.as_str());
    assert_eq!(order.payment_status, PaymentStatus::Pending.as_str());

    let checkout = checkout_service::checkout(
        &state,
        &user,
        CheckoutRequest {
            order_id: created.order_id,
            shipping_address: test_address("12 Marina Road"),
            billing_address: test_address("12 Marina Road"),
            payment_method: "CARD".into(),
            email: "shopper@example.com".into(),
            notes: Some("leave at the door".into()),
        },
    )
    .await?
    .data
    .unwrap();
    assert_eq!(checkout.attempt_number, 1);
    assert!(checkout.payment_url.contains(&checkout.reference));

    let order = Orders::find_by_id(created.order_id)
        .one(&state.orm)
        .await?
        .unwrap();
    assert_eq!(order.status, OrderStatus::AwaitingPayment.as_str());
    assert_eq!(order.payment_reference, checkout.reference);

    // A mangled signature is rejected and changes nothing.
    let body = webhook_body(created.order_id, user_id, &checkout.reference, "charge.success");
    let mut bad_headers = HeaderMap::new();
    bad_headers.insert(SIGNATURE_HEADER, "deadbeef".parse().unwrap());
    let (status, _) = payment_webhook(State(state.clone()), bad_headers, body.clone()).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let order = Orders::find_by_id(created.order_id)
        .one(&state.orm)
        .await?
        .unwrap();
    assert_eq!(order.payment_status, PaymentStatus::Pending.as_str());

    // Properly signed charge.success confirms the order and decrements stock.
    let (status, _) = payment_webhook(State(state.clone()), signed_headers(), body.clone()).await;
    assert_eq!(status, StatusCode::OK);

    let order = Orders::find_by_id(created.order_id)
        .one(&state.orm)
        .await?
        .unwrap();
    assert_eq!(order.payment_status, PaymentStatus::Paid.as_str());
    assert_eq!(order.status, OrderStatus::Processing.as_str());
    assert!(order.is_confirmed);
    assert!(order.tracking_number.is_some());
    assert!(order.paid_at.is_some());

    let product = Products::find_by_id(product_id)
        .one(&state.orm)
        .await?
        .unwrap();
    assert_eq!(product.stock, 3);

    // Gateway retries are acknowledged but must be no-ops.
    let (status, _) = payment_webhook(State(state.clone()), signed_headers(), body).await;
    assert_eq!(status, StatusCode::OK);
    let product = Products::find_by_id(product_id)
        .one(&state.orm)
        .await?
        .unwrap();
    assert_eq!(product.stock, 3, "duplicate webhook must not double-decrement");

    Ok(())
}

#[tokio::test]
async fn create_order_rejects_insufficient_stock_and_bad_total() -> anyhow::Result<()> {
    let gateway = Arc::new(StubGateway::default());
    let Some(state) = setup_state(gateway).await? else {
        return Ok(());
    };

    let user_id = create_user(&state).await?;
    let user = auth(user_id);
    let product_id = create_product(&state, 50, 1).await?;

    let result = order_service::create_order(
        &state,
        &user,
        CreateOrderRequest {
            items: vec![CreateOrderItem {
                product_id,
                quantity: 3,
            }],
            total_amount: 150,
        },
    )
    .await;
    assert!(matches!(result, Err(AppError::BadRequest(_))));

    // Client totals that disagree with the catalog are rejected too.
    let result = order_service::create_order(
        &state,
        &user,
        CreateOrderRequest {
            items: vec![CreateOrderItem {
                product_id,
                quantity: 1,
            }],
            total_amount: 999,
        },
    )
    .await;
    assert!(matches!(result, Err(AppError::BadRequest(_))));

    let order_count = Orders::find()
        .filter(OrderCol::UserId.eq(user_id))
        .count(&state.orm)
        .await?;
    assert_eq!(order_count, 0, "failed validation must persist no order");

    Ok(())
}

#[tokio::test]
async fn checkout_is_scoped_to_the_order_owner() -> anyhow::Result<()> {
    let gateway = Arc::new(StubGateway::default());
    let Some(state) = setup_state(gateway).await? else {
        return Ok(());
    };

    let owner_id = create_user(&state).await?;
    let stranger_id = create_user(&state).await?;
    let product_id = create_product(&state, 100, 10).await?;

    let created = order_service::create_order(
        &state,
        &auth(owner_id),
        CreateOrderRequest {
            items: vec![CreateOrderItem {
                product_id,
                quantity: 1,
            }],
            total_amount: 100,
        },
    )
    .await?
    .data
    .unwrap();

    let result = checkout_service::checkout(
        &state,
        &auth(stranger_id),
        CheckoutRequest {
            order_id: created.order_id,
            shipping_address: test_address("5 Broad Street"),
            billing_address: test_address("5 Broad Street"),
            payment_method: "CARD".into(),
            email: "stranger@example.com".into(),
            notes: None,
        },
    )
    .await;
    assert!(matches!(result, Err(AppError::NotFound)));

    let order = Orders::find_by_id(created.order_id)
        .one(&state.orm)
        .await?
        .unwrap();
    assert_eq!(order.status, OrderStatus::Draft.as_str());
    assert_eq!(order.payment_attempts, 0);

    Ok(())
}

#[tokio::test]
async fn checkout_retries_after_failed_gateway_init() -> anyhow::Result<()> {
    let gateway = Arc::new(StubGateway::default());
    let Some(state) = setup_state(gateway.clone()).await? else {
        return Ok(());
    };

    let user_id = create_user(&state).await?;
    let user = auth(user_id);
    let product_id = create_product(&state, 200, 4).await?;

    let created = order_service::create_order(
        &state,
        &user,
        CreateOrderRequest {
            items: vec![CreateOrderItem {
                product_id,
                quantity: 1,
            }],
            total_amount: 200,
        },
    )
    .await?
    .data
    .unwrap();

    let request = || CheckoutRequest {
        order_id: created.order_id,
        shipping_address: test_address("1 Retry Lane"),
        billing_address: test_address("1 Retry Lane"),
        payment_method: "BANK_TRANSFER".into(),
        email: "shopper@example.com".into(),
        notes: None,
    };

    gateway.fail_next_init.store(true, Ordering::SeqCst);
    let result = checkout_service::checkout(&state, &user, request()).await;
    assert!(matches!(result, Err(AppError::Gateway(_))));

    // A failed initialize leaves the order retryable.
    let order = Orders::find_by_id(created.order_id)
        .one(&state.orm)
        .await?
        .unwrap();
    assert_eq!(order.status, OrderStatus::Draft.as_str());
    assert_eq!(order.payment_status, PaymentStatus::Pending.as_str());
    assert_eq!(order.payment_attempts, 0);

    let checkout = checkout_service::checkout(&state, &user, request())
        .await?
        .data
        .unwrap();
    assert_eq!(checkout.attempt_number, 1);

    let order = Orders::find_by_id(created.order_id)
        .one(&state.orm)
        .await?
        .unwrap();
    assert_eq!(order.status, OrderStatus::AwaitingPayment.as_str());
    assert_eq!(order.payment_attempts, 1);

    Ok(())
}

#[tokio::test]
async fn checkout_reports_items_that_went_out_of_stock() -> anyhow::Result<()> {
    let gateway = Arc::new(StubGateway::default());
    let Some(state) = setup_state(gateway).await? else {
        return Ok(());
    };

    let user_id = create_user(&state).await?;
    let user = auth(user_id);
    let product_id = create_product(&state, 50, 2).await?;

    let created = order_service::create_order(
        &state,
        &user,
        CreateOrderRequest {
            items: vec![CreateOrderItem {
                product_id,
                quantity: 2,
            }],
            total_amount: 100,
        },
    )
    .await?
    .data
    .unwrap();

    // Someone else drains the shelf between draft and checkout.
    use sea_orm::sea_query::Expr;
    use storefront_api::entity::products::Column as ProdCol;
    Products::update_many()
        .col_expr(ProdCol::Stock, Expr::value(1))
        .filter(ProdCol::Id.eq(product_id))
        .exec(&state.orm)
        .await?;

    let result = checkout_service::checkout(
        &state,
        &user,
        CheckoutRequest {
            order_id: created.order_id,
            shipping_address: test_address("9 Depot Close"),
            billing_address: test_address("9 Depot Close"),
            payment_method: "CARD".into(),
            email: "shopper@example.com".into(),
            notes: None,
        },
    )
    .await;

    match result {
        Err(AppError::OutOfStock(items)) => {
            assert_eq!(items.len(), 1);
            assert_eq!(items[0].product_id, product_id);
            assert_eq!(items[0].requested_quantity, 2);
            assert_eq!(items[0].available_stock, 1);
        }
        other => panic!("expected OutOfStock, got {other:?}"),
    }

    // The draft is untouched and retryable once stock returns.
    let order = Orders::find_by_id(created.order_id)
        .one(&state.orm)
        .await?
        .unwrap();
    assert_eq!(order.status, OrderStatus::Draft.as_str());

    Ok(())
}
