use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgConnection, PgPool};
use tracing::debug;
use uuid::Uuid;

use crate::models::plan::{Plan, SubscriptionStatus};

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub name: String,
    #[sqlx(try_from = "String")]
    pub plan: Plan,
    pub messages_used: i32,
    pub messages_limit: i32,
    pub tokens_used: i64,
    pub stripe_customer_id: Option<String>,
    pub stripe_subscription_id: Option<String>,
    pub subscription_status: Option<SubscriptionStatus>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_login_at: Option<DateTime<Utc>>,
}

/// Post-increment usage numbers returned by a successful quota reservation.
#[derive(Debug, Clone, FromRow)]
pub struct ReservedUsage {
    pub messages_used: i32,
    pub messages_limit: i32,
    #[sqlx(try_from = "String")]
    pub plan: Plan,
}

impl User {
    /// True while the user still has quota for one more message under the
    /// current plan limit.
    pub fn has_quota(&self) -> bool {
        self.messages_used < self.messages_limit
    }

    pub async fn create(
        pool: &PgPool,
        email: &str,
        password_hash: &str,
        name: &str,
    ) -> Result<Self, sqlx::Error> {
        let user = User {
            email: email.to_string(),
            password_hash: password_hash.to_string(),
            name: name.to_string(),
            ..Default::default()
        };

        let user = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (id, email, password_hash, name, plan, messages_used,
                               messages_limit, tokens_used, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING *
            "#,
        )
        .bind(user.id)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.name)
        .bind(user.plan.as_str())
        .bind(user.messages_used)
        .bind(user.messages_limit)
        .bind(user.tokens_used)
        .bind(user.created_at)
        .bind(user.updated_at)
        .fetch_one(pool)
        .await?;

        debug!("User created: {}", user.email);
        Ok(user)
    }

    pub async fn get_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    pub async fn get_by_email(pool: &PgPool, email: &str) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE email = $1")
            .bind(email)
            .fetch_optional(pool)
            .await
    }

    pub async fn get_by_stripe_customer(
        conn: &mut PgConnection,
        customer_id: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE stripe_customer_id = $1")
            .bind(customer_id)
            .fetch_optional(conn)
            .await
    }

    pub async fn record_login(pool: &PgPool, id: Uuid) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE users SET last_login_at = $1, updated_at = $1 WHERE id = $2")
            .bind(Utc::now())
            .bind(id)
            .execute(pool)
            .await?;
        Ok(())
    }

    pub async fn set_stripe_customer(
        pool: &PgPool,
        id: Uuid,
        customer_id: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE users SET stripe_customer_id = $1, updated_at = $2 WHERE id = $3")
            .bind(customer_id)
            .bind(Utc::now())
            .bind(id)
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Claims one message of quota in a single guarded statement. Returns
    /// `None` when the counter has already reached the limit, so two
    /// concurrent requests can never both pass the gate.
    pub async fn reserve_message(
        pool: &PgPool,
        id: Uuid,
    ) -> Result<Option<ReservedUsage>, sqlx::Error> {
        sqlx::query_as::<_, ReservedUsage>(
            r#"
            UPDATE users
            SET messages_used = messages_used + 1, updated_at = $1
            WHERE id = $2 AND messages_used < messages_limit
            RETURNING messages_used, messages_limit, plan
            "#,
        )
        .bind(Utc::now())
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    /// Undoes a reservation after a failed model call or persistence error,
    /// so failed requests are never charged.
    pub async fn release_message(pool: &PgPool, id: Uuid) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE users
            SET messages_used = GREATEST(messages_used - 1, 0), updated_at = $1
            WHERE id = $2
            "#,
        )
        .bind(Utc::now())
        .bind(id)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Accumulates the token counts of one completed request.
    pub async fn record_tokens(
        conn: &mut PgConnection,
        id: Uuid,
        tokens: i64,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE users SET tokens_used = tokens_used + $1, updated_at = $2 WHERE id = $3")
            .bind(tokens)
            .bind(Utc::now())
            .bind(id)
            .execute(conn)
            .await?;
        Ok(())
    }
}

impl Default for User {
    fn default() -> Self {
        User {
            id: Uuid::new_v4(),
            email: String::new(),
            password_hash: String::new(),
            name: String::new(),
            plan: Plan::Free,
            messages_used: 0,
            messages_limit: Plan::Free.message_limit(),
            tokens_used: 0,
            stripe_customer_id: None,
            stripe_subscription_id: None,
            subscription_status: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            last_login_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_users_start_on_free_with_empty_counter() {
        let user = User::default();
        assert_eq!(user.plan, Plan::Free);
        assert_eq!(user.messages_used, 0);
        assert_eq!(user.messages_limit, 50);
        assert!(user.subscription_status.is_none());
        assert!(user.has_quota());
    }

    #[test]
    fn quota_rejects_exactly_at_limit() {
        let user = User {
            messages_used: 49,
            messages_limit: 50,
            ..Default::default()
        };
        assert!(user.has_quota());

        let user = User {
            messages_used: 50,
            messages_limit: 50,
            ..Default::default()
        };
        assert!(!user.has_quota());

        // An already-overshot counter stays rejected.
        let user = User {
            messages_used: 51,
            messages_limit: 50,
            ..Default::default()
        };
        assert!(!user.has_quota());
    }
}
