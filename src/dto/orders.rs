use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::models::{Address, Order, OrderItem, OrderStatus, PaymentMethod, PaymentStatus};

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateOrderItem {
    pub product_id: Uuid,
    pub quantity: i32,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateOrderRequest {
    pub items: Vec<CreateOrderItem>,
    /// Client-computed total in minor units; recomputed and checked server-side.
    pub total_amount: i64,
}

/// Minimal projection returned after order creation.
#[derive(Debug, Serialize, ToSchema)]
pub struct CreatedOrder {
    pub order_id: Uuid,
    pub order_number: String,
    pub items: Vec<OrderItem>,
    pub total_amount: i64,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CheckoutRequest {
    pub order_id: Uuid,
    pub shipping_address: Address,
    pub billing_address: Address,
    /// `CARD` or `BANK_TRANSFER`.
    pub payment_method: String,
    pub email: String,
    pub notes: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CheckoutResponse {
    pub payment_url: String,
    pub reference: String,
    pub payment_method: PaymentMethod,
    pub attempt_number: i32,
}

/// Order state snapshot for the polling endpoint.
#[derive(Debug, Serialize, ToSchema)]
pub struct OrderStatusResponse {
    pub order_id: Uuid,
    pub order_number: String,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub total_amount: i64,
    pub tracking_number: Option<String>,
    pub items: Vec<OrderItem>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct VerifyPaymentResponse {
    pub order_id: Uuid,
    pub payment_status: PaymentStatus,
    pub reference: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OrderWithItems {
    pub order: Order,
    pub items: Vec<OrderItem>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OrderList {
    pub items: Vec<Order>,
}
