use chrono::Utc;
use sqlx::PgConnection;

/// Ledger of processed billing events. Payment providers deliver webhooks
/// at-least-once; an id already present here means the event was applied
/// and a redelivery must be acknowledged without re-processing.
pub struct WebhookEvent;

impl WebhookEvent {
    /// Records an event id. Returns false when the id was already recorded.
    pub async fn record_if_new(
        conn: &mut PgConnection,
        id: &str,
        kind: &str,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            INSERT INTO webhook_events (id, kind, processed_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(id)
        .bind(kind)
        .bind(Utc::now())
        .execute(conn)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}
