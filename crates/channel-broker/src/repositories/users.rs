//! PostgreSQL account and session-token repository.

use crate::errors::BrokerError;
use crate::models::User;
use crate::repositories::{finish, UsersRepository};
use async_trait::async_trait;
use sqlx::{PgPool, Row};
use std::time::Instant;
use tracing::instrument;

/// Account repository backed by PostgreSQL.
#[derive(Clone)]
pub struct PgUsersRepository {
    pool: PgPool,
}

impl PgUsersRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UsersRepository for PgUsersRepository {
    #[instrument(skip_all, name = "broker.repo.find_user_by_token")]
    async fn find_user_by_token(&self, token_id: &str) -> Result<Option<User>, BrokerError> {
        let start = Instant::now();

        let result = sqlx::query(
            r#"
            SELECT u.email, u.name
            FROM session_tokens t
            JOIN users u ON u.email = t.email
            WHERE t.token_id = $1
            "#,
        )
        .bind(token_id)
        .fetch_optional(&self.pool)
        .await;

        Ok(finish("find_user_by_token", start, result)?.map(|row| User {
            email: row.get("email"),
            name: row.get("name"),
        }))
    }

    #[instrument(skip_all, name = "broker.repo.update_name")]
    async fn update_name(&self, email: &str, name: &str) -> Result<User, BrokerError> {
        let start = Instant::now();

        let result = sqlx::query(
            r#"
            UPDATE users
            SET name = $2
            WHERE email = $1
            RETURNING email, name
            "#,
        )
        .bind(email)
        .bind(name)
        .fetch_optional(&self.pool)
        .await;

        match finish("update_name", start, result)? {
            Some(row) => Ok(User {
                email: row.get("email"),
                name: row.get("name"),
            }),
            None => Err(BrokerError::NotFound("User not found".to_string())),
        }
    }

    #[instrument(skip_all, name = "broker.repo.list_tokens")]
    async fn list_tokens(&self, email: &str) -> Result<Vec<String>, BrokerError> {
        let start = Instant::now();

        let result = sqlx::query(
            r#"
            SELECT token_id
            FROM session_tokens
            WHERE email = $1
            ORDER BY created_at ASC, token_id ASC
            "#,
        )
        .bind(email)
        .fetch_all(&self.pool)
        .await;

        Ok(finish("list_tokens", start, result)?
            .into_iter()
            .map(|row| row.get("token_id"))
            .collect())
    }

    #[instrument(skip_all, name = "broker.repo.delete_token")]
    async fn delete_token(&self, email: &str, token_id: &str) -> Result<bool, BrokerError> {
        let start = Instant::now();

        let result = sqlx::query(
            r#"
            DELETE FROM session_tokens
            WHERE email = $1 AND token_id = $2
            "#,
        )
        .bind(email)
        .bind(token_id)
        .execute(&self.pool)
        .await;

        Ok(finish("delete_token", start, result)?.rows_affected() > 0)
    }

    #[instrument(skip_all, name = "broker.repo.delete_all_tokens")]
    async fn delete_all_tokens(&self, email: &str) -> Result<u64, BrokerError> {
        let start = Instant::now();

        let result = sqlx::query("DELETE FROM session_tokens WHERE email = $1")
            .bind(email)
            .execute(&self.pool)
            .await;

        Ok(finish("delete_all_tokens", start, result)?.rows_affected())
    }
}
