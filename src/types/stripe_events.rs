use std::collections::HashMap;

use serde::Deserialize;
use serde_json::Value;

/// Envelope of a Stripe webhook delivery. Only the fields this service
/// dispatches on are modeled; the object payload stays raw JSON until the
/// event kind is known.
#[derive(Debug, Deserialize)]
pub struct StripeEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub data: StripeEventData,
}

#[derive(Debug, Deserialize)]
pub struct StripeEventData {
    pub object: Value,
}

#[derive(Debug, Deserialize)]
pub struct CheckoutSessionObject {
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    pub subscription: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub struct SubscriptionObject {
    pub customer: Value,
    pub status: String,
}

#[derive(Debug, Deserialize)]
pub struct InvoiceObject {
    pub customer: Value,
}

/// Stripe expandable references arrive either as a bare id string or as the
/// expanded object carrying an `id` field.
pub fn expandable_id(value: &Value) -> Option<&str> {
    value
        .as_str()
        .or_else(|| value.get("id").and_then(Value::as_str))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn expandable_id_handles_both_shapes() {
        assert_eq!(expandable_id(&json!("cus_123")), Some("cus_123"));
        assert_eq!(expandable_id(&json!({"id": "cus_123"})), Some("cus_123"));
        assert_eq!(expandable_id(&json!(null)), None);
        assert_eq!(expandable_id(&json!({"object": "customer"})), None);
    }

    #[test]
    fn event_envelope_parses() {
        let body = json!({
            "id": "evt_1",
            "type": "invoice.payment_succeeded",
            "data": { "object": { "customer": "cus_123" } }
        })
        .to_string();

        let event: StripeEvent = serde_json::from_str(&body).unwrap();
        assert_eq!(event.id, "evt_1");
        assert_eq!(event.kind, "invoice.payment_succeeded");

        let invoice: InvoiceObject = serde_json::from_value(event.data.object).unwrap();
        assert_eq!(expandable_id(&invoice.customer), Some("cus_123"));
    }

    #[test]
    fn checkout_object_defaults_missing_metadata() {
        let object = json!({ "subscription": "sub_9", "customer": "cus_9" });
        let session: CheckoutSessionObject = serde_json::from_value(object).unwrap();
        assert!(session.metadata.is_empty());
        assert_eq!(session.subscription.as_ref().and_then(expandable_id), Some("sub_9"));
    }
}
