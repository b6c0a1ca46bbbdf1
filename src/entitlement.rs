//! Translates billing-provider lifecycle events into authoritative user
//! entitlement state: plan, message limit, usage counter and subscription
//! status. `transition` is the single transition table; `apply` writes the
//! resulting change in one statement so plan and limit never drift apart.

use sqlx::PgConnection;
use tracing::debug;
use uuid::Uuid;

use crate::models::plan::{Plan, SubscriptionStatus};

/// Billing lifecycle events this service reacts to, already resolved to a
/// target user by the webhook layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BillingEvent {
    /// A checkout for `plan` finished; carries the new subscription id.
    CheckoutCompleted {
        plan: Plan,
        subscription_id: Option<String>,
    },
    /// The provider reported a subscription status change.
    SubscriptionUpdated { provider_active: bool },
    /// The subscription was deleted at the provider.
    SubscriptionCanceled,
    /// A renewal invoice was paid.
    PaymentSucceeded,
    /// A renewal invoice failed to collect.
    PaymentFailed,
}

/// The delta an event produces on a user record. `plan_and_limit` is a pair
/// on purpose: a plan write without the matching limit write is a defect
/// state.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct EntitlementChange {
    pub plan_and_limit: Option<(Plan, i32)>,
    pub reset_usage: bool,
    pub status: Option<SubscriptionStatus>,
    pub subscription_id: Option<String>,
}

/// The transition table over `subscription_status`. Returns `None` when the
/// event does not apply from the current state.
///
/// Invoice events are ignored from CANCELED: a canceled subscription is only
/// revived by a new checkout. A `subscription.updated` after a cancellation
/// still wins (last-delivered-wins, see DESIGN.md).
pub fn transition(
    current: Option<SubscriptionStatus>,
    event: &BillingEvent,
) -> Option<EntitlementChange> {
    match event {
        BillingEvent::CheckoutCompleted {
            plan,
            subscription_id,
        } => Some(EntitlementChange {
            plan_and_limit: Some((*plan, plan.message_limit())),
            reset_usage: true,
            status: Some(SubscriptionStatus::Active),
            subscription_id: subscription_id.clone(),
        }),

        BillingEvent::SubscriptionUpdated { provider_active } => Some(EntitlementChange {
            status: Some(if *provider_active {
                SubscriptionStatus::Active
            } else {
                SubscriptionStatus::Inactive
            }),
            ..Default::default()
        }),

        BillingEvent::SubscriptionCanceled => Some(EntitlementChange {
            plan_and_limit: Some((Plan::Free, Plan::Free.message_limit())),
            reset_usage: false,
            status: Some(SubscriptionStatus::Canceled),
            subscription_id: None,
        }),

        BillingEvent::PaymentSucceeded => match current {
            Some(SubscriptionStatus::Canceled) => None,
            _ => Some(EntitlementChange {
                reset_usage: true,
                status: Some(SubscriptionStatus::Active),
                ..Default::default()
            }),
        },

        BillingEvent::PaymentFailed => match current {
            Some(SubscriptionStatus::Canceled) => None,
            _ => Some(EntitlementChange {
                status: Some(SubscriptionStatus::PastDue),
                ..Default::default()
            }),
        },
    }
}

/// Writes an entitlement change to the user record in a single statement.
pub async fn apply(
    conn: &mut PgConnection,
    user_id: Uuid,
    change: &EntitlementChange,
) -> Result<(), sqlx::Error> {
    let (plan, limit) = match change.plan_and_limit {
        Some((plan, limit)) => (Some(plan.as_str()), Some(limit)),
        None => (None, None),
    };

    sqlx::query(
        r#"
        UPDATE users
        SET plan = COALESCE($2::text, plan),
            messages_limit = COALESCE($3::int, messages_limit),
            messages_used = CASE WHEN $4 THEN 0 ELSE messages_used END,
            subscription_status = COALESCE($5::subscription_status_enum, subscription_status),
            stripe_subscription_id = COALESCE($6::text, stripe_subscription_id),
            updated_at = now()
        WHERE id = $1
        "#,
    )
    .bind(user_id)
    .bind(plan)
    .bind(limit)
    .bind(change.reset_usage)
    .bind(change.status)
    .bind(change.subscription_id.as_deref())
    .execute(conn)
    .await?;

    debug!("Entitlement change applied for user {}: {:?}", user_id, change);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checkout(plan: Plan) -> BillingEvent {
        BillingEvent::CheckoutCompleted {
            plan,
            subscription_id: Some("sub_123".to_string()),
        }
    }

    #[test]
    fn checkout_sets_plan_limit_and_resets_regardless_of_prior_state() {
        for prior in [
            None,
            Some(SubscriptionStatus::Active),
            Some(SubscriptionStatus::Inactive),
            Some(SubscriptionStatus::Canceled),
            Some(SubscriptionStatus::PastDue),
        ] {
            let change = transition(prior, &checkout(Plan::Pro)).expect("checkout always applies");
            assert_eq!(change.plan_and_limit, Some((Plan::Pro, 500)));
            assert!(change.reset_usage);
            assert_eq!(change.status, Some(SubscriptionStatus::Active));
            assert_eq!(change.subscription_id.as_deref(), Some("sub_123"));
        }
    }

    #[test]
    fn checkout_limit_follows_the_plan_table() {
        let change = transition(None, &checkout(Plan::Premium)).unwrap();
        assert_eq!(change.plan_and_limit, Some((Plan::Premium, 2000)));

        let change = transition(None, &checkout(Plan::Enterprise)).unwrap();
        assert_eq!(change.plan_and_limit, Some((Plan::Enterprise, 10000)));
    }

    #[test]
    fn cancellation_forces_free_and_keeps_usage() {
        for prior in [
            Some(SubscriptionStatus::Active),
            Some(SubscriptionStatus::PastDue),
        ] {
            let change = transition(prior, &BillingEvent::SubscriptionCanceled).unwrap();
            assert_eq!(change.plan_and_limit, Some((Plan::Free, 50)));
            assert!(!change.reset_usage);
            assert_eq!(change.status, Some(SubscriptionStatus::Canceled));
        }
    }

    #[test]
    fn renewal_resets_usage_and_reactivates() {
        let change = transition(
            Some(SubscriptionStatus::Active),
            &BillingEvent::PaymentSucceeded,
        )
        .unwrap();
        assert!(change.reset_usage);
        assert_eq!(change.status, Some(SubscriptionStatus::Active));
        assert_eq!(change.plan_and_limit, None);

        // A paid invoice also recovers a past-due subscription.
        let change = transition(
            Some(SubscriptionStatus::PastDue),
            &BillingEvent::PaymentSucceeded,
        )
        .unwrap();
        assert_eq!(change.status, Some(SubscriptionStatus::Active));
    }

    #[test]
    fn invoice_events_do_not_revive_a_canceled_subscription() {
        assert_eq!(
            transition(
                Some(SubscriptionStatus::Canceled),
                &BillingEvent::PaymentSucceeded
            ),
            None
        );
        assert_eq!(
            transition(
                Some(SubscriptionStatus::Canceled),
                &BillingEvent::PaymentFailed
            ),
            None
        );
    }

    #[test]
    fn failed_payment_marks_past_due_without_touching_plan() {
        let change = transition(
            Some(SubscriptionStatus::Active),
            &BillingEvent::PaymentFailed,
        )
        .unwrap();
        assert_eq!(change.status, Some(SubscriptionStatus::PastDue));
        assert_eq!(change.plan_and_limit, None);
        assert!(!change.reset_usage);
    }

    #[test]
    fn provider_status_report_maps_to_active_or_inactive() {
        let change = transition(
            Some(SubscriptionStatus::PastDue),
            &BillingEvent::SubscriptionUpdated {
                provider_active: true,
            },
        )
        .unwrap();
        assert_eq!(change.status, Some(SubscriptionStatus::Active));

        let change = transition(
            Some(SubscriptionStatus::Active),
            &BillingEvent::SubscriptionUpdated {
                provider_active: false,
            },
        )
        .unwrap();
        assert_eq!(change.status, Some(SubscriptionStatus::Inactive));
    }
}
