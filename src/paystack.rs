//! Paystack client: transaction initialize/verify plus webhook signature
//! verification. The service layer only sees the [`PaymentGateway`] trait so
//! tests can substitute a stub.

use std::time::Duration;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha512;
use uuid::Uuid;

use crate::error::{AppError, AppResult};

type HmacSha512 = Hmac<Sha512>;

/// Metadata attached to every gateway transaction so webhooks and verify
/// responses can be correlated back to an order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionMetadata {
    #[serde(rename = "orderId")]
    pub order_id: Uuid,
    #[serde(rename = "userId")]
    pub user_id: Uuid,
    #[serde(rename = "attemptId")]
    pub attempt_id: i32,
}

#[derive(Debug, Clone, Serialize)]
pub struct InitializeRequest {
    pub email: String,
    /// Amount in minor currency units.
    pub amount: i64,
    pub reference: String,
    pub callback_url: String,
    pub metadata: TransactionMetadata,
    pub channels: Vec<String>,
}

/// What checkout needs back from a successful initialize.
#[derive(Debug, Clone)]
pub struct PaymentSession {
    pub authorization_url: String,
    pub reference: String,
}

#[derive(Debug, Clone)]
pub struct VerifiedTransaction {
    /// True only when the gateway reports the charge as successful.
    pub success: bool,
    pub reference: String,
    pub metadata: Option<TransactionMetadata>,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn initialize_transaction(&self, req: InitializeRequest) -> AppResult<PaymentSession>;

    async fn verify_transaction(&self, reference: &str) -> AppResult<VerifiedTransaction>;

    /// Check the provider signature over the raw webhook body.
    fn verify_webhook_signature(&self, body: &[u8], signature_hex: &str) -> bool;
}

pub struct Paystack {
    http: reqwest::Client,
    base_url: String,
    secret_key: String,
}

#[derive(Debug, Deserialize)]
struct InitializeResponse {
    status: bool,
    data: Option<InitializeData>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct InitializeData {
    authorization_url: String,
    reference: String,
}

#[derive(Debug, Deserialize)]
struct VerifyResponse {
    status: bool,
    data: Option<VerifyData>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VerifyData {
    status: String,
    reference: String,
    metadata: Option<TransactionMetadata>,
}

impl Paystack {
    pub fn new(base_url: &str, secret_key: &str) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("reqwest client");
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            secret_key: secret_key.to_string(),
        }
    }
}

#[async_trait]
impl PaymentGateway for Paystack {
    async fn initialize_transaction(&self, req: InitializeRequest) -> AppResult<PaymentSession> {
        let url = format!("{}/transaction/initialize", self.base_url);
        let response: InitializeResponse = self
            .http
            .post(&url)
            .bearer_auth(&self.secret_key)
            .json(&req)
            .send()
            .await?
            .json()
            .await?;

        if !response.status {
            return Err(AppError::Gateway(
                response
                    .message
                    .unwrap_or_else(|| "Failed to initialize payment".to_string()),
            ));
        }
        let data = response
            .data
            .ok_or_else(|| AppError::Gateway("initialize response missing data".to_string()))?;

        Ok(PaymentSession {
            authorization_url: data.authorization_url,
            reference: data.reference,
        })
    }

    async fn verify_transaction(&self, reference: &str) -> AppResult<VerifiedTransaction> {
        let url = format!("{}/transaction/verify/{}", self.base_url, reference);
        let response: VerifyResponse = self
            .http
            .get(&url)
            .bearer_auth(&self.secret_key)
            .send()
            .await?
            .json()
            .await?;

        if !response.status {
            return Err(AppError::Gateway(
                response
                    .message
                    .unwrap_or_else(|| "Payment verification failed".to_string()),
            ));
        }
        let data = response
            .data
            .ok_or_else(|| AppError::Gateway("verify response missing data".to_string()))?;

        Ok(VerifiedTransaction {
            success: data.status == "success",
            reference: data.reference,
            metadata: data.metadata,
        })
    }

    fn verify_webhook_signature(&self, body: &[u8], signature_hex: &str) -> bool {
        let Ok(signature) = hex::decode(signature_hex) else {
            return false;
        };
        let mut mac = HmacSha512::new_from_slice(self.secret_key.as_bytes())
            .expect("hmac accepts any key length");
        mac.update(body);
        // verify_slice is constant-time.
        mac.verify_slice(&signature).is_ok()
    }
}

/// Webhook payload shapes pushed by the gateway.
#[derive(Debug, Deserialize)]
pub struct WebhookEvent {
    pub event: String,
    pub data: WebhookData,
}

#[derive(Debug, Deserialize)]
pub struct WebhookData {
    pub reference: String,
    pub metadata: Option<TransactionMetadata>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(secret: &str, body: &[u8]) -> String {
        let mut mac = HmacSha512::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        hex::encode(mac.finalize().into_bytes())
    }

    #[test]
    fn webhook_signature_accepts_matching_hmac() {
        let gateway = Paystack::new("https://api.paystack.co", "sk_test_secret");
        let body = br#"{"event":"charge.success"}"#;
        let signature = sign("sk_test_secret", body);
        assert!(gateway.verify_webhook_signature(body, &signature));
    }

    #[test]
    fn webhook_signature_rejects_wrong_key_or_body() {
        let gateway = Paystack::new("https://api.paystack.co", "sk_test_secret");
        let body = br#"{"event":"charge.success"}"#;
        let wrong_key = sign("sk_other_secret", body);
        assert!(!gateway.verify_webhook_signature(body, &wrong_key));

        let signature = sign("sk_test_secret", body);
        assert!(!gateway.verify_webhook_signature(br#"{"event":"charge.failed"}"#, &signature));
        assert!(!gateway.verify_webhook_signature(body, "not-hex"));
    }

    #[test]
    fn webhook_event_parses_gateway_payload() {
        let raw = r#"{
            "event": "charge.success",
            "data": {
                "reference": "ref-123",
                "metadata": {
                    "orderId": "7f0b0f38-3b35-4f25-9f3e-64a41a8a1c16",
                    "userId": "f3b7cf0e-8f1e-4e77-9f7a-0f3a3f2a1b2c",
                    "attemptId": 2
                }
            }
        }"#;
        let event: WebhookEvent = serde_json::from_str(raw).unwrap();
        assert_eq!(event.event, "charge.success");
        let metadata = event.data.metadata.unwrap();
        assert_eq!(metadata.attempt_id, 2);
    }
}
