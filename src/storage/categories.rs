use super::schema::Database;
use super::types::{Category, DatabaseError};

impl Database {
    // ========================================================================
    // Category Operations
    // ========================================================================

    /// Trim whitespace and control characters; reject empty titles.
    fn clean_category_title(title: &str) -> Result<String, DatabaseError> {
        let cleaned: String = title.chars().filter(|c| !c.is_control()).collect();
        let trimmed = cleaned.trim();
        if trimmed.is_empty() {
            return Err(DatabaseError::InvalidInput(
                "category title cannot be empty".to_string(),
            ));
        }
        Ok(trimmed.to_owned())
    }

    /// Create a category for a user.
    ///
    /// # Errors
    ///
    /// `DatabaseError::Conflict` when the user already has a category with
    /// this title.
    pub async fn create_category(
        &self,
        user_id: i64,
        title: &str,
        hide_globally: bool,
    ) -> Result<Category, DatabaseError> {
        let title = Self::clean_category_title(title)?;

        sqlx::query_as(
            r#"
            INSERT INTO categories (user_id, title, hide_globally)
            VALUES (?, ?, ?)
            RETURNING id, user_id, title, hide_globally
            "#,
        )
        .bind(user_id)
        .bind(&title)
        .bind(hide_globally)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| DatabaseError::query(format!("unable to create category {:?}", title), e))
    }

    pub async fn category_by_id(
        &self,
        user_id: i64,
        category_id: i64,
    ) -> Result<Option<Category>, DatabaseError> {
        sqlx::query_as(
            "SELECT id, user_id, title, hide_globally FROM categories WHERE user_id = ? AND id = ?",
        )
        .bind(user_id)
        .bind(category_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| DatabaseError::query(format!("unable to fetch category #{}", category_id), e))
    }

    /// All categories of a user, ordered by title.
    pub async fn categories(&self, user_id: i64) -> Result<Vec<Category>, DatabaseError> {
        sqlx::query_as(
            "SELECT id, user_id, title, hide_globally FROM categories \
             WHERE user_id = ? ORDER BY title COLLATE NOCASE",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| DatabaseError::query("unable to fetch categories", e))
    }

    pub async fn set_category_hide_globally(
        &self,
        user_id: i64,
        category_id: i64,
        hide: bool,
    ) -> Result<(), DatabaseError> {
        let result =
            sqlx::query("UPDATE categories SET hide_globally = ? WHERE user_id = ? AND id = ?")
                .bind(hide)
                .bind(user_id)
                .bind(category_id)
                .execute(&self.pool)
                .await
                .map_err(|e| {
                    DatabaseError::query(format!("unable to update category #{}", category_id), e)
                })?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::NothingUpdated);
        }
        Ok(())
    }

    /// Delete a category together with its feeds and their entries.
    pub async fn remove_category(&self, user_id: i64, category_id: i64) -> Result<(), DatabaseError> {
        let result = sqlx::query("DELETE FROM categories WHERE user_id = ? AND id = ?")
            .bind(user_id)
            .bind(category_id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                DatabaseError::query(format!("unable to remove category #{}", category_id), e)
            })?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::NothingUpdated);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::test_support::{candidate, seed_feed, test_db};
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_create_category_trims_title() {
        let db = test_db().await;
        let user = db.create_user("alice").await.unwrap();
        let category = db.create_category(user.id, "  Tech\u{1b} ", false).await.unwrap();
        assert_eq!(category.title, "Tech");
        assert_eq!(db.category_by_id(user.id, category.id).await.unwrap(), Some(category));
    }

    #[tokio::test]
    async fn test_empty_title_rejected() {
        let db = test_db().await;
        let user = db.create_user("alice").await.unwrap();
        let err = db.create_category(user.id, " \t ", false).await.unwrap_err();
        assert!(matches!(err, DatabaseError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_duplicate_title_per_user_is_conflict() {
        let db = test_db().await;
        let alice = db.create_user("alice").await.unwrap();
        let bob = db.create_user("bob").await.unwrap();
        db.create_category(alice.id, "News", false).await.unwrap();
        db.create_category(bob.id, "News", false).await.unwrap();

        let err = db.create_category(alice.id, "News", false).await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_categories_listed_by_title() {
        let db = test_db().await;
        let user = db.create_user("alice").await.unwrap();
        db.create_category(user.id, "zeta", false).await.unwrap();
        db.create_category(user.id, "Alpha", true).await.unwrap();

        let titles: Vec<String> = db
            .categories(user.id)
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.title)
            .collect();
        assert_eq!(titles, vec!["Alpha", "zeta"]);
    }

    #[tokio::test]
    async fn test_remove_category_cascades_to_feeds_and_entries() {
        let db = test_db().await;
        let (user_id, feed_id) = seed_feed(&db).await;
        db.refresh_feed_entries(user_id, feed_id, &[candidate("a")], false).await.unwrap();
        let category_id = db.feed_by_id(user_id, feed_id).await.unwrap().unwrap().category_id;

        db.remove_category(user_id, category_id).await.unwrap();
        assert!(db.feed_by_id(user_id, feed_id).await.unwrap().is_none());
        assert_eq!(db.count_all_entries().await.unwrap().total, 0);
    }

    #[tokio::test]
    async fn test_hide_globally_on_foreign_category() {
        let db = test_db().await;
        let (user_id, feed_id) = seed_feed(&db).await;
        let category_id = db.feed_by_id(user_id, feed_id).await.unwrap().unwrap().category_id;
        let err = db.set_category_hide_globally(user_id + 1, category_id, true).await.unwrap_err();
        assert!(err.is_nothing_updated());
    }
}
