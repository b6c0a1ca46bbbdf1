use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{get, web, App, HttpServer};
use async_openai::config::OpenAIConfig;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;
use tracing_subscriber::EnvFilter;
use utoipa::OpenApi;
use utoipa_scalar::{Scalar, Servable};

mod config;
mod entitlement;
mod error;
mod middleware;
mod models;
mod routes;
mod types;

pub use config::AppConfig;

use middleware::auth::Authentication;
use models::message::Role;
use models::plan::{Plan, SubscriptionStatus};
use routes::{auth, chat, pay, webhook};

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub stripe_client: stripe::Client,
    pub llm_client: async_openai::Client<OpenAIConfig>,
    pub config: Arc<AppConfig>,
}

#[derive(OpenApi)]
#[openapi(components(schemas(
    Plan,
    SubscriptionStatus,
    Role,
    types::RegisterRequest,
    types::LoginRequest,
    types::AuthResponse,
    types::UserProfile,
    types::ChatTurn,
    types::SendMessageRequest,
    types::SendMessageResponse,
    types::UsageSnapshot,
    types::UsageResponse,
    types::ConversationSummary,
    types::HistoryResponse,
    types::ConversationTurn,
    types::ConversationResponse,
    types::CheckoutRequest,
    types::BillingUrlResponse,
)))]
struct ApiDoc;

#[get("/")]
async fn index() -> &'static str {
    "OK"
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Arc::new(AppConfig::from_env()?);

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await?;
    sqlx::migrate!("./migrations").run(&pool).await?;

    let stripe_client = stripe::Client::new(config.stripe_secret_key.clone());

    let mut llm_config = OpenAIConfig::new().with_api_key(config.llm_api_key.clone());
    if let Some(api_base) = &config.llm_api_base {
        llm_config = llm_config.with_api_base(api_base.clone());
    }
    let llm_client = async_openai::Client::with_config(llm_config);

    let app_state = web::Data::new(AppState {
        pool,
        stripe_client,
        llm_client,
        config: config.clone(),
    });

    let bind_addr = (config.host.clone(), config.port);
    info!("Listening on {}:{}", bind_addr.0, bind_addr.1);

    HttpServer::new(move || {
        let cors = Cors::default()
            .allowed_origin(&config.app_url)
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .wrap(cors)
            .wrap(Authentication {
                app_config: config.clone(),
            })
            .app_data(app_state.clone())
            .service(index)
            .service(
                web::scope("/auth")
                    .service(auth::register)
                    .service(auth::login)
                    .service(auth::me),
            )
            .service(
                web::scope("/chat")
                    .service(chat::get_usage)
                    .service(chat::get_history)
                    .service(chat::get_conversation)
                    .service(chat::send_message),
            )
            .service(
                web::scope("/pay")
                    .service(pay::checkout)
                    .service(pay::portal),
            )
            .service(web::scope("/webhooks").service(webhook::stripe_webhook))
            .service(Scalar::with_url("/scalar", ApiDoc::openapi()))
    })
    .bind(bind_addr)?
    .run()
    .await?;

    Ok(())
}
