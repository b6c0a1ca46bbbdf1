use serde::{Deserialize, Serialize};
use sqlx::Type;
use utoipa::ToSchema;

/// Subscription tier. Stored as TEXT; unrecognized values decode as FREE so
/// the quota gate always resolves to a valid limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum Plan {
    Free,
    Pro,
    Premium,
    Enterprise,
}

impl Plan {
    /// Monthly message quota per plan. The single source of truth consulted
    /// by both the chat quota gate and the billing event handlers.
    pub fn message_limit(self) -> i32 {
        match self {
            Plan::Free => 50,
            Plan::Pro => 500,
            Plan::Premium => 2000,
            Plan::Enterprise => 10000,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Plan::Free => "FREE",
            Plan::Pro => "PRO",
            Plan::Premium => "PREMIUM",
            Plan::Enterprise => "ENTERPRISE",
        }
    }
}

impl From<String> for Plan {
    fn from(value: String) -> Self {
        match value.as_str() {
            "PRO" => Plan::Pro,
            "PREMIUM" => Plan::Premium,
            "ENTERPRISE" => Plan::Enterprise,
            _ => Plan::Free,
        }
    }
}

impl std::fmt::Display for Plan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type, ToSchema)]
#[sqlx(type_name = "subscription_status_enum", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubscriptionStatus {
    Active,
    Inactive,
    Canceled,
    PastDue,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_table_matches_tiers() {
        assert_eq!(Plan::Free.message_limit(), 50);
        assert_eq!(Plan::Pro.message_limit(), 500);
        assert_eq!(Plan::Premium.message_limit(), 2000);
        assert_eq!(Plan::Enterprise.message_limit(), 10000);
    }

    #[test]
    fn unrecognized_plan_falls_back_to_free() {
        assert_eq!(Plan::from("PLATINUM".to_string()), Plan::Free);
        assert_eq!(Plan::from("".to_string()), Plan::Free);
        assert_eq!(Plan::from("pro".to_string()), Plan::Free);
        assert_eq!(Plan::from("PRO".to_string()), Plan::Pro);
    }

    #[test]
    fn plan_round_trips_through_text() {
        for plan in [Plan::Free, Plan::Pro, Plan::Premium, Plan::Enterprise] {
            assert_eq!(Plan::from(plan.as_str().to_string()), plan);
        }
    }
}
