use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgConnection, PgPool};
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Title for a new conversation: the first user turn, truncated.
pub fn derive_title(first_user_message: Option<&str>) -> String {
    match first_user_message {
        Some(content) if !content.trim().is_empty() => content.chars().take(50).collect(),
        _ => "New conversation".to_string(),
    }
}

impl Default for Conversation {
    fn default() -> Self {
        Conversation {
            id: Uuid::new_v4(),
            user_id: Uuid::nil(),
            title: String::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }
}

impl Conversation {
    /// Returns the caller's conversation for `conversation_id` if it exists,
    /// otherwise creates a new one titled after the first user turn.
    pub async fn get_or_create(
        conn: &mut PgConnection,
        user_id: Uuid,
        conversation_id: Option<Uuid>,
        title: &str,
    ) -> Result<Self, sqlx::Error> {
        if let Some(conversation_id) = conversation_id {
            if let Some(conversation) = sqlx::query_as::<_, Conversation>(
                "SELECT * FROM conversations WHERE id = $1 AND user_id = $2",
            )
            .bind(conversation_id)
            .bind(user_id)
            .fetch_optional(&mut *conn)
            .await?
            {
                debug!("Conversation found: {}", conversation.id);
                return Ok(conversation);
            }
        }

        let conversation = Conversation {
            user_id,
            title: title.to_string(),
            ..Default::default()
        };
        let conversation = sqlx::query_as::<_, Conversation>(
            r#"
            INSERT INTO conversations (id, user_id, title, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(conversation.id)
        .bind(conversation.user_id)
        .bind(&conversation.title)
        .bind(conversation.created_at)
        .bind(conversation.updated_at)
        .fetch_one(&mut *conn)
        .await?;

        debug!("Conversation created: {}", conversation.id);
        Ok(conversation)
    }

    /// The 50 most recent conversations for a user, newest first.
    pub async fn list_for_user(pool: &PgPool, user_id: Uuid) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Conversation>(
            r#"
            SELECT * FROM conversations
            WHERE user_id = $1
            ORDER BY created_at DESC
            LIMIT 50
            "#,
        )
        .bind(user_id)
        .fetch_all(pool)
        .await
    }

    pub async fn get_for_user(
        pool: &PgPool,
        conversation_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Conversation>(
            "SELECT * FROM conversations WHERE id = $1 AND user_id = $2",
        )
        .bind(conversation_id)
        .bind(user_id)
        .fetch_optional(pool)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn title_truncates_to_fifty_chars() {
        let long = "x".repeat(80);
        let title = derive_title(Some(&long));
        assert_eq!(title.chars().count(), 50);

        assert_eq!(derive_title(Some("short question")), "short question");
    }

    #[test]
    fn title_defaults_when_no_user_turn() {
        assert_eq!(derive_title(None), "New conversation");
        assert_eq!(derive_title(Some("   ")), "New conversation");
    }

    #[test]
    fn title_truncation_respects_char_boundaries() {
        let accented = "á".repeat(60);
        let title = derive_title(Some(&accented));
        assert_eq!(title.chars().count(), 50);
    }
}
