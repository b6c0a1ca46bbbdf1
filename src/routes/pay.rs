use std::collections::HashMap;

use actix_web::{post, web, Error};
use stripe::{
    BillingPortalSession, CheckoutSession, CheckoutSessionMode, CreateBillingPortalSession,
    CreateCheckoutSession, CreateCheckoutSessionLineItems, CreateCustomer, Customer, CustomerId,
};
use tracing::{error, info};

use crate::error::ApiError;
use crate::middleware::auth::AuthenticatedUser;
use crate::models::plan::Plan;
use crate::models::User;
use crate::types::{BillingUrlResponse, CheckoutRequest};
use crate::AppState;

/// Creates a subscription checkout session for a paid plan, bootstrapping
/// the Stripe customer on first use. The session carries the user id and
/// target plan as metadata so the webhook can apply the entitlement.
#[post("/checkout")]
pub async fn checkout(
    app_state: web::Data<AppState>,
    authenticated_user: AuthenticatedUser,
    web::Json(request): web::Json<CheckoutRequest>,
) -> Result<web::Json<BillingUrlResponse>, Error> {
    let user = User::get_by_id(&app_state.pool, authenticated_user.user_id)
        .await
        .map_err(ApiError::from)?
        .ok_or(ApiError::NotFound("User"))?;

    let plan = request.plan;
    let price_id = app_state
        .config
        .price_id(plan)
        .ok_or_else(|| ApiError::BadRequest("The FREE plan has no checkout".to_string()))?
        .to_string();

    info!("Checkout request for {} to plan {}", user.email, plan);

    let customer_id = ensure_stripe_customer(&app_state, &user).await?;

    let line_item = CreateCheckoutSessionLineItems {
        price: Some(price_id),
        quantity: Some(1),
        ..Default::default()
    };

    let metadata: HashMap<String, String> = HashMap::from([
        ("user_id".to_string(), user.id.to_string()),
        ("plan".to_string(), plan.to_string()),
    ]);

    let success_url = format!("{}/account?success=true", app_state.config.app_url);
    let cancel_url = format!("{}/account?canceled=true", app_state.config.app_url);

    let create_checkout_session = CreateCheckoutSession {
        customer: Some(customer_id),
        line_items: vec![line_item].into(),
        mode: CheckoutSessionMode::Subscription.into(),
        success_url: Some(success_url.as_str()),
        cancel_url: Some(cancel_url.as_str()),
        metadata: Some(metadata),
        ..Default::default()
    };

    let session = CheckoutSession::create(&app_state.stripe_client, create_checkout_session)
        .await
        .map_err(|e| {
            error!("Failed to create checkout session: {:?}", e);
            ApiError::Internal(e.into())
        })?;

    let url = session
        .url
        .ok_or_else(|| ApiError::Internal(anyhow::anyhow!("Checkout session has no URL")))?;

    info!("Created checkout session for {}", user.email);
    Ok(web::Json(BillingUrlResponse { url }))
}

/// Creates a billing-portal session so a subscribed user can manage their
/// subscription at the provider.
#[post("/portal")]
pub async fn portal(
    app_state: web::Data<AppState>,
    authenticated_user: AuthenticatedUser,
) -> Result<web::Json<BillingUrlResponse>, Error> {
    let user = User::get_by_id(&app_state.pool, authenticated_user.user_id)
        .await
        .map_err(ApiError::from)?
        .ok_or(ApiError::NotFound("User"))?;

    let customer_id = user
        .stripe_customer_id
        .as_deref()
        .ok_or_else(|| ApiError::BadRequest("No active subscription".to_string()))?
        .parse::<CustomerId>()
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("Bad stored customer id: {}", e)))?;

    let return_url = format!("{}/account", app_state.config.app_url);
    let mut create_portal_session = CreateBillingPortalSession::new(customer_id);
    create_portal_session.return_url = Some(return_url.as_str());

    let session = BillingPortalSession::create(&app_state.stripe_client, create_portal_session)
        .await
        .map_err(|e| {
            error!("Failed to create billing portal session: {:?}", e);
            ApiError::Internal(e.into())
        })?;

    info!("Created billing portal session for {}", user.email);
    Ok(web::Json(BillingUrlResponse { url: session.url }))
}

/// Returns the user's Stripe customer id, creating and persisting the
/// customer on first checkout.
async fn ensure_stripe_customer(
    app_state: &AppState,
    user: &User,
) -> Result<CustomerId, ApiError> {
    if let Some(existing) = user.stripe_customer_id.as_deref() {
        return existing
            .parse::<CustomerId>()
            .map_err(|e| ApiError::Internal(anyhow::anyhow!("Bad stored customer id: {}", e)));
    }

    let customer = Customer::create(
        &app_state.stripe_client,
        CreateCustomer {
            email: Some(user.email.as_str()),
            metadata: Some(HashMap::from([(
                "user_id".to_string(),
                user.id.to_string(),
            )])),
            ..Default::default()
        },
    )
    .await
    .map_err(|e| {
        error!("Failed to create Stripe customer: {:?}", e);
        ApiError::Internal(e.into())
    })?;

    User::set_stripe_customer(&app_state.pool, user.id, customer.id.as_str()).await?;

    info!("Created Stripe customer for {}", user.email);
    Ok(customer.id)
}
