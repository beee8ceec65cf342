//! Gateway-facing webhook endpoint. Everything after a valid signature is
//! acknowledged with 200 — the gateway retries non-2xx responses forever,
//! and re-delivery of an already-processed event must stay a no-op.

use axum::{
    Router,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::post,
};

use crate::{services::payment_service, state::AppState};

pub const SIGNATURE_HEADER: &str = "x-paystack-signature";

pub fn router() -> Router<AppState> {
    Router::new().route("/payment", post(payment_webhook))
}

#[utoipa::path(
    post,
    path = "/api/webhook/payment",
    request_body = String,
    responses(
        (status = 200, description = "Event acknowledged"),
        (status = 401, description = "Missing or invalid signature"),
    ),
    tag = "Webhooks"
)]
pub async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, &'static str) {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());

    let Some(signature) = signature else {
        tracing::warn!("webhook without signature header");
        return (StatusCode::UNAUTHORIZED, "Invalid signature");
    };

    if !state.gateway.verify_webhook_signature(&body, signature) {
        tracing::warn!("webhook signature verification failed");
        return (StatusCode::UNAUTHORIZED, "Invalid signature");
    }

    // Signature checked out; from here on the gateway always gets a 200.
    if let Err(err) = payment_service::apply_webhook_event(&state, &body).await {
        tracing::error!(error = %err, "webhook processing failed");
    }

    (StatusCode::OK, "Webhook received")
}
