use anyhow::anyhow;

use crate::models::plan::Plan;

#[derive(Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub jwt_secret: String,
    pub llm_api_key: String,
    pub llm_api_base: Option<String>,
    pub llm_model: String,
    pub stripe_secret_key: String,
    pub stripe_webhook_secret: String,
    pub stripe_price_pro: String,
    pub stripe_price_premium: String,
    pub stripe_price_enterprise: String,
    pub app_url: String,
    pub host: String,
    pub port: u16,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        let database_url = required("DATABASE_URL")?;
        let jwt_secret = required("JWT_SECRET")?;
        let llm_api_key = required("LLM_API_KEY")?;
        let llm_api_base = std::env::var("LLM_API_BASE").ok();
        let llm_model = std::env::var("LLM_MODEL").unwrap_or_else(|_| "gpt-4o".to_string());
        let stripe_secret_key = required("STRIPE_SECRET_KEY")?;
        let stripe_webhook_secret = required("STRIPE_WEBHOOK_SECRET")?;
        let stripe_price_pro = required("STRIPE_PRICE_PRO")?;
        let stripe_price_premium = required("STRIPE_PRICE_PREMIUM")?;
        let stripe_price_enterprise = required("STRIPE_PRICE_ENTERPRISE")?;
        let app_url = required("APP_URL")?;
        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = std::env::var("PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse::<u16>()
            .map_err(|_| anyhow!("PORT is not a valid port number"))?;

        Ok(AppConfig {
            database_url,
            jwt_secret,
            llm_api_key,
            llm_api_base,
            llm_model,
            stripe_secret_key,
            stripe_webhook_secret,
            stripe_price_pro,
            stripe_price_premium,
            stripe_price_enterprise,
            app_url,
            host,
            port,
        })
    }

    /// Stripe price id backing a paid plan. FREE has no price.
    pub fn price_id(&self, plan: Plan) -> Option<&str> {
        match plan {
            Plan::Free => None,
            Plan::Pro => Some(&self.stripe_price_pro),
            Plan::Premium => Some(&self.stripe_price_premium),
            Plan::Enterprise => Some(&self.stripe_price_enterprise),
        }
    }
}

fn required(key: &str) -> Result<String, anyhow::Error> {
    std::env::var(key).map_err(|_| anyhow!("{} not found", key))
}
