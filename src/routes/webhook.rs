use actix_web::{post, web, HttpRequest, HttpResponse};
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde_json::json;
use sha2::Sha256;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::entitlement::{self, BillingEvent};
use crate::error::ApiError;
use crate::models::plan::Plan;
use crate::models::{User, WebhookEvent};
use crate::types::{
    expandable_id, CheckoutSessionObject, InvoiceObject, StripeEvent, SubscriptionObject,
};
use crate::AppState;

type HmacSha256 = Hmac<Sha256>;

/// Signatures older than this are rejected to limit replay.
const MAX_SIGNATURE_AGE_SECS: i64 = 300;

/// Entry point for billing lifecycle events. The signature is verified over
/// the raw body before anything else runs; processed event ids are recorded
/// so provider redeliveries converge without reapplying effects.
#[post("/stripe")]
pub async fn stripe_webhook(
    app_state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Bytes,
) -> Result<HttpResponse, actix_web::Error> {
    let signature = req
        .headers()
        .get("stripe-signature")
        .ok_or(ApiError::InvalidSignature)?
        .to_str()
        .map_err(|_| ApiError::InvalidSignature)?;

    let body_str = std::str::from_utf8(&body)
        .map_err(|_| ApiError::BadRequest("Invalid body encoding".to_string()))?;

    verify_signature(
        &app_state.config.stripe_webhook_secret,
        signature,
        body_str,
        Utc::now().timestamp(),
    )?;

    // Signature checked, safe to look at the payload.
    let event: StripeEvent = serde_json::from_slice(&body)
        .map_err(|_| ApiError::BadRequest("Invalid event payload".to_string()))?;

    let mut tx = app_state.pool.begin().await.map_err(ApiError::from)?;

    let first_delivery = WebhookEvent::record_if_new(&mut *tx, &event.id, &event.kind)
        .await
        .map_err(ApiError::from)?;
    if !first_delivery {
        debug!("Replayed webhook event {} acknowledged", event.id);
        tx.commit().await.map_err(ApiError::from)?;
        return Ok(ack());
    }

    match dispatch(&app_state, &mut *tx, &event).await {
        Ok(()) => {
            tx.commit().await.map_err(ApiError::from)?;
            Ok(ack())
        }
        Err(e) => {
            // Rolls back the ledger row too, so the provider retry gets a
            // clean attempt.
            error!("Error processing webhook event {}: {:?}", event.id, e);
            Err(e.into())
        }
    }
}

async fn dispatch(
    app_state: &AppState,
    conn: &mut sqlx::PgConnection,
    event: &StripeEvent,
) -> Result<(), ApiError> {
    match event.kind.as_str() {
        "checkout.session.completed" => {
            let session: CheckoutSessionObject = serde_json::from_value(event.data.object.clone())
                .map_err(|_| ApiError::BadRequest("Malformed checkout session".to_string()))?;

            let (Some(user_id), Some(plan)) = (
                session.metadata.get("user_id"),
                session.metadata.get("plan"),
            ) else {
                warn!("Checkout session without user metadata, ignoring");
                return Ok(());
            };
            let Ok(user_id) = user_id.parse::<Uuid>() else {
                warn!("Checkout session with unparsable user id, ignoring");
                return Ok(());
            };
            let Some(user) = User::get_by_id(&app_state.pool, user_id).await? else {
                warn!("Checkout completed for unknown user {}", user_id);
                return Ok(());
            };

            let billing_event = BillingEvent::CheckoutCompleted {
                plan: Plan::from(plan.clone()),
                subscription_id: session
                    .subscription
                    .as_ref()
                    .and_then(expandable_id)
                    .map(str::to_string),
            };
            apply_transition(conn, &user, &billing_event).await?;
            info!("Checkout completed for user {}, plan {}", user.id, plan);
            Ok(())
        }

        "customer.subscription.updated" => {
            let subscription: SubscriptionObject = serde_json::from_value(event.data.object.clone())
                .map_err(|_| ApiError::BadRequest("Malformed subscription".to_string()))?;

            let billing_event = BillingEvent::SubscriptionUpdated {
                provider_active: subscription.status == "active",
            };
            with_customer(conn, &subscription.customer, |user| (user, billing_event)).await
        }

        "customer.subscription.deleted" => {
            let subscription: SubscriptionObject = serde_json::from_value(event.data.object.clone())
                .map_err(|_| ApiError::BadRequest("Malformed subscription".to_string()))?;

            with_customer(conn, &subscription.customer, |user| {
                (user, BillingEvent::SubscriptionCanceled)
            })
            .await
        }

        "invoice.payment_succeeded" => {
            let invoice: InvoiceObject = serde_json::from_value(event.data.object.clone())
                .map_err(|_| ApiError::BadRequest("Malformed invoice".to_string()))?;

            with_customer(conn, &invoice.customer, |user| {
                (user, BillingEvent::PaymentSucceeded)
            })
            .await
        }

        "invoice.payment_failed" => {
            let invoice: InvoiceObject = serde_json::from_value(event.data.object.clone())
                .map_err(|_| ApiError::BadRequest("Malformed invoice".to_string()))?;

            with_customer(conn, &invoice.customer, |user| {
                (user, BillingEvent::PaymentFailed)
            })
            .await
        }

        other => {
            debug!("Ignoring webhook event kind {}", other);
            Ok(())
        }
    }
}

/// Resolves the user behind a customer reference and applies the event. An
/// unknown customer is acknowledged without effect: there is no corrective
/// action to take, and failing would make the provider retry forever.
async fn with_customer(
    conn: &mut sqlx::PgConnection,
    customer: &serde_json::Value,
    event_for: impl FnOnce(User) -> (User, BillingEvent),
) -> Result<(), ApiError> {
    let Some(customer_id) = expandable_id(customer) else {
        warn!("Billing event without customer reference, ignoring");
        return Ok(());
    };

    let Some(user) = User::get_by_stripe_customer(&mut *conn, customer_id).await? else {
        warn!("Billing event for unknown customer {}, ignoring", customer_id);
        return Ok(());
    };

    let (user, billing_event) = event_for(user);
    apply_transition(conn, &user, &billing_event).await
}

async fn apply_transition(
    conn: &mut sqlx::PgConnection,
    user: &User,
    event: &BillingEvent,
) -> Result<(), ApiError> {
    match entitlement::transition(user.subscription_status, event) {
        Some(change) => {
            entitlement::apply(&mut *conn, user.id, &change).await?;
            info!("Applied {:?} for user {}", event, user.id);
        }
        None => {
            debug!(
                "Event {:?} does not apply to user {} in status {:?}",
                event, user.id, user.subscription_status
            );
        }
    }
    Ok(())
}

fn ack() -> HttpResponse {
    HttpResponse::Ok().json(json!({ "received": true }))
}

/// Verifies a `t=...,v1=...` signature header: HMAC-SHA256 over
/// `"{timestamp}.{body}"` with the shared webhook secret, rejecting stale
/// timestamps to limit replay.
fn verify_signature(
    secret: &str,
    signature_header: &str,
    body: &str,
    now_unix: i64,
) -> Result<(), ApiError> {
    let mut timestamp: Option<&str> = None;
    let mut signature: Option<&str> = None;
    for part in signature_header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = Some(value),
            Some(("v1", value)) => signature = Some(value),
            _ => {}
        }
    }

    let (Some(timestamp), Some(signature)) = (timestamp, signature) else {
        return Err(ApiError::InvalidSignature);
    };

    let issued = timestamp
        .parse::<i64>()
        .map_err(|_| ApiError::InvalidSignature)?;
    if issued + MAX_SIGNATURE_AGE_SECS < now_unix {
        return Err(ApiError::InvalidSignature);
    }

    let signature_bytes = hex::decode(signature).map_err(|_| ApiError::InvalidSignature)?;

    let message = format!("{}.{}", timestamp, body);
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| ApiError::Internal(anyhow::anyhow!("HMAC initialization error")))?;
    mac.update(message.as_bytes());

    mac.verify_slice(&signature_bytes)
        .map_err(|_| ApiError::InvalidSignature)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test_secret";
    const BODY: &str = r#"{"id":"evt_1","type":"invoice.payment_succeeded"}"#;

    fn sign(secret: &str, timestamp: i64, body: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(format!("{}.{}", timestamp, body).as_bytes());
        format!("t={},v1={}", timestamp, hex::encode(mac.finalize().into_bytes()))
    }

    #[test]
    fn valid_signature_is_accepted() {
        let now = 1_700_000_000;
        let header = sign(SECRET, now, BODY);
        assert!(verify_signature(SECRET, &header, BODY, now).is_ok());
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let now = 1_700_000_000;
        let header = sign("whsec_other", now, BODY);
        assert!(matches!(
            verify_signature(SECRET, &header, BODY, now),
            Err(ApiError::InvalidSignature)
        ));
    }

    #[test]
    fn tampered_body_is_rejected() {
        let now = 1_700_000_000;
        let header = sign(SECRET, now, BODY);
        let tampered = BODY.replace("evt_1", "evt_2");
        assert!(verify_signature(SECRET, &header, &tampered, now).is_err());
    }

    #[test]
    fn stale_timestamp_is_rejected() {
        let issued = 1_700_000_000;
        let header = sign(SECRET, issued, BODY);
        let now = issued + MAX_SIGNATURE_AGE_SECS + 1;
        assert!(verify_signature(SECRET, &header, BODY, now).is_err());
    }

    #[test]
    fn malformed_header_is_rejected() {
        let now = 1_700_000_000;
        assert!(verify_signature(SECRET, "v1=abc", BODY, now).is_err());
        assert!(verify_signature(SECRET, "t=123", BODY, now).is_err());
        assert!(verify_signature(SECRET, "", BODY, now).is_err());
        assert!(verify_signature(SECRET, "t=123,v1=nothex", BODY, now).is_err());
    }

    #[test]
    fn extra_header_parts_are_tolerated() {
        let now = 1_700_000_000;
        let header = format!("{},v0=deadbeef", sign(SECRET, now, BODY));
        assert!(verify_signature(SECRET, &header, BODY, now).is_ok());
    }
}
