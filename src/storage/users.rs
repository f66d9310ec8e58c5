use tracing::Instrument;

use super::schema::Database;
use super::types::{DatabaseError, User};

impl Database {
    // ========================================================================
    // User Operations
    // ========================================================================

    pub async fn create_user(&self, username: &str) -> Result<User, DatabaseError> {
        let username = username.trim();
        if username.is_empty() {
            return Err(DatabaseError::InvalidInput("username cannot be empty".to_string()));
        }

        let user: User = sqlx::query_as(
            "INSERT INTO users (username, created_at) VALUES (?, ?) RETURNING id, username, created_at",
        )
        .bind(username)
        .bind(self.now())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| DatabaseError::query(format!("unable to create user {:?}", username), e))?;
        Ok(user)
    }

    pub async fn user_by_id(&self, user_id: i64) -> Result<Option<User>, DatabaseError> {
        sqlx::query_as("SELECT id, username, created_at FROM users WHERE id = ?")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| DatabaseError::query(format!("unable to fetch user #{}", user_id), e))
    }

    pub async fn users(&self) -> Result<Vec<User>, DatabaseError> {
        sqlx::query_as("SELECT id, username, created_at FROM users ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| DatabaseError::query("unable to fetch users", e))
    }

    /// Delete a user; everything the user owns goes with it.
    pub async fn remove_user(&self, user_id: i64) -> Result<(), DatabaseError> {
        let result = sqlx::query("DELETE FROM users WHERE id = ?")
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(|e| DatabaseError::query(format!("unable to remove user #{}", user_id), e))?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::NothingUpdated);
        }
        tracing::info!(user_id, "Removed user");
        Ok(())
    }

    /// Schedule removal of a user without waiting for it.
    ///
    /// Feeds are removed one at a time first so large accounts never hold
    /// the write lock for one long cascade.
    pub fn remove_user_async(&self, user_id: i64) {
        let worker = self.clone();
        let span = tracing::debug_span!("remove_user", user_id);
        let task = async move {
            let result = worker.sweep_and_remove_user(user_id).await;
            if let Err(e) = &result {
                tracing::error!(user_id, error = %e, "Unable to remove user");
            }
            result
        };
        self.spawner.spawn("remove_user", Box::pin(task.instrument(span)));
    }

    async fn sweep_and_remove_user(&self, user_id: i64) -> Result<(), DatabaseError> {
        let feed_ids: Vec<i64> = sqlx::query_scalar("SELECT id FROM feeds WHERE user_id = ?")
            .bind(user_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                DatabaseError::query(format!("unable to list feeds of user #{}", user_id), e)
            })?;

        for feed_id in &feed_ids {
            self.remove_feed(user_id, *feed_id).await?;
        }
        tracing::debug!(user_id, feeds = feed_ids.len(), "Removed user feeds");

        self.remove_user(user_id).await
    }
}
