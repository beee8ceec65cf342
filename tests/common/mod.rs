use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, AtomicU32, Ordering},
};

use async_trait::async_trait;
use sea_orm::ActiveValue::NotSet;
use sea_orm::{ActiveModelTrait, Set};
use uuid::Uuid;

use storefront_api::{
    config::AppConfig,
    db::{create_orm_conn, create_pool, run_migrations},
    entity::{products::ActiveModel as ProductActive, users::ActiveModel as UserActive},
    error::{AppError, AppResult},
    models::Address,
    paystack::{InitializeRequest, PaymentGateway, PaymentSession, VerifiedTransaction},
    state::AppState,
};

pub const WEBHOOK_SIGNATURE: &str = "stub-signature";

/// In-memory gateway double. Initialize echoes the attempt reference back
/// (as the real provider does) and remembers the request so verify can
/// return its metadata.
#[derive(Default)]
pub struct StubGateway {
    pub fail_next_init: AtomicBool,
    pub last_init: Mutex<Option<InitializeRequest>>,
    pub verify_calls: AtomicU32,
}

#[async_trait]
impl PaymentGateway for StubGateway {
    async fn initialize_transaction(&self, req: InitializeRequest) -> AppResult<PaymentSession> {
        if self.fail_next_init.swap(false, Ordering::SeqCst) {
            return Err(AppError::Gateway("Failed to initialize payment".into()));
        }
        let session = PaymentSession {
            authorization_url: format!("https://gateway.test/pay/{}", req.reference),
            reference: req.reference.clone(),
        };
        *self.last_init.lock().unwrap() = Some(req);
        Ok(session)
    }

    async fn verify_transaction(&self, reference: &str) -> AppResult<VerifiedTransaction> {
        self.verify_calls.fetch_add(1, Ordering::SeqCst);
        let last = self.last_init.lock().unwrap();
        match last.as_ref() {
            Some(req) if req.reference == reference => Ok(VerifiedTransaction {
                success: true,
                reference: reference.to_string(),
                metadata: Some(req.metadata.clone()),
            }),
            _ => Err(AppError::Gateway("transaction not found".into())),
        }
    }

    fn verify_webhook_signature(&self, _body: &[u8], signature_hex: &str) -> bool {
        signature_hex == WEBHOOK_SIGNATURE
    }
}

/// Returns None (skipping the test) when no database is configured.
pub async fn setup_state(gateway: Arc<StubGateway>) -> anyhow::Result<Option<AppState>> {
    let database_url = match std::env::var("TEST_DATABASE_URL")
        .or_else(|_| std::env::var("DATABASE_URL"))
    {
        Ok(url) => url,
        Err(_) => {
            eprintln!(
                "Skipping test: set TEST_DATABASE_URL or DATABASE_URL to run integration flow tests."
            );
            return Ok(None);
        }
    };

    let pool = create_pool(&database_url).await?;
    let orm = create_orm_conn(&database_url).await?;
    run_migrations(&orm).await?;

    let config = AppConfig {
        database_url,
        host: "127.0.0.1".into(),
        port: 0,
        paystack_secret_key: "sk_test_stub".into(),
        paystack_base_url: "https://gateway.test".into(),
        frontend_origin: "https://shop.test".into(),
    };

    Ok(Some(AppState {
        pool,
        orm,
        gateway,
        config,
    }))
}

pub async fn create_user(state: &AppState) -> anyhow::Result<Uuid> {
    let user = UserActive {
        id: Set(Uuid::new_v4()),
        email: Set(format!("user-{}@example.com", Uuid::new_v4().simple())),
        role: Set("user".into()),
        created_at: NotSet,
    }
    .insert(&state.orm)
    .await?;
    Ok(user.id)
}

pub async fn create_product(state: &AppState, price: i64, stock: i32) -> anyhow::Result<Uuid> {
    let product = ProductActive {
        id: Set(Uuid::new_v4()),
        name: Set(format!("Widget {}", Uuid::new_v4().simple())),
        description: Set(Some("A product for testing".into())),
        price: Set(price),
        stock: Set(stock),
        created_at: NotSet,
    }
    .insert(&state.orm)
    .await?;
    Ok(product.id)
}

pub fn test_address(street: &str) -> Address {
    Address {
        street: street.to_string(),
        city: "Lagos".to_string(),
        state: "LA".to_string(),
        country: "NG".to_string(),
        postal_code: Some("100001".to_string()),
    }
}
