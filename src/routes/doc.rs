use utoipa::{
    Modify, OpenApi,
    openapi::{
        self,
        OpenApi as OpenApiSpec,
        security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    },
};
use utoipa_scalar::{Scalar, Servable};

use crate::{
    dto::{
        cart::{CartItemDto, CartList},
        orders::{
            CheckoutRequest, CheckoutResponse, CreateOrderItem, CreateOrderRequest, CreatedOrder,
            OrderList, OrderStatusResponse, OrderWithItems, VerifyPaymentResponse,
        },
    },
    error::OutOfStockItem,
    models::{Address, CartItem, Order, OrderItem, OrderStatus, PaymentMethod, PaymentStatus, Product, User},
    response::{ApiResponse, Meta},
    routes::{cart, health, orders, params, webhook},
};

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health_check,
        cart::cart_list,
        cart::add_to_cart,
        cart::remove_from_cart,
        orders::create_order,
        orders::checkout,
        orders::order_status,
        orders::verify_payment,
        orders::list_orders,
        orders::get_order,
        webhook::payment_webhook,
    ),
    components(
        schemas(
            User,
            Product,
            CartItem,
            Order,
            OrderItem,
            OrderStatus,
            PaymentStatus,
            PaymentMethod,
            Address,
            OutOfStockItem,
            CartList,
            CartItemDto,
            CreateOrderItem,
            CreateOrderRequest,
            CreatedOrder,
            CheckoutRequest,
            CheckoutResponse,
            OrderStatusResponse,
            VerifyPaymentResponse,
            OrderList,
            OrderWithItems,
            params::Pagination,
            params::OrderListQuery,
            Meta,
            ApiResponse<CreatedOrder>,
            ApiResponse<CheckoutResponse>,
            ApiResponse<OrderStatusResponse>,
            ApiResponse<OrderWithItems>,
            ApiResponse<OrderList>
        )
    ),
    security(
        ("bearer_auth" = [])
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Health", description = "Health check endpoint"),
        (name = "Cart", description = "Cart endpoints"),
        (name = "Orders", description = "Order and checkout endpoints"),
        (name = "Webhooks", description = "Payment gateway callbacks"),
    )
)]
pub struct ApiDoc;

pub fn scalar_docs() -> Scalar<OpenApiSpec> {
    Scalar::with_url("/docs", ApiDoc::openapi())
}
