use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::models::plan::Plan;

#[derive(Deserialize, ToSchema)]
pub struct CheckoutRequest {
    pub plan: Plan,
}

/// Redirect target for both checkout and billing-portal sessions.
#[derive(Serialize, ToSchema)]
pub struct BillingUrlResponse {
    pub url: String,
}
