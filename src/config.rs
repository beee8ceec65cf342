use std::env;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub host: String,
    pub port: u16,
    /// Shared secret for gateway calls and webhook signature checks.
    pub paystack_secret_key: String,
    pub paystack_base_url: String,
    /// Base URL the gateway redirects back to after payment.
    pub frontend_origin: String,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = env::var("DATABASE_URL")?;
        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .ok()
            .and_then(|p| p.parse::<u16>().ok())
            .unwrap_or(3000);
        let paystack_secret_key = env::var("PAYSTACK_SECRET_KEY")?;
        let paystack_base_url = env::var("PAYSTACK_BASE_URL")
            .unwrap_or_else(|_| "https://api.paystack.co".to_string());
        let frontend_origin =
            env::var("FRONTEND_ORIGIN").unwrap_or_else(|_| "http://localhost:3000".to_string());
        Ok(Self {
            database_url,
            host,
            port,
            paystack_secret_key,
            paystack_base_url,
            frontend_origin,
        })
    }
}
