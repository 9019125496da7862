//! SQLite access for users and their derived storage aggregates.

use crate::models::user::{SizeHistoryRow, User, UserRef};
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::sync::Arc;

#[derive(Clone)]
pub struct UserRepository {
    pub db: Arc<SqlitePool>,
}

impl UserRepository {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    pub async fn find_by_login_name(&self, login_name: &str) -> sqlx::Result<Option<User>> {
        sqlx::query_as::<_, User>(
            "SELECT id, login_name, site_updated_at, home_directory_size_bytes,
                    home_directory_size_bytes_updated_at
             FROM users WHERE login_name = ?",
        )
        .bind(login_name)
        .fetch_optional(&*self.db)
        .await
    }

    pub async fn list_user_refs(&self) -> sqlx::Result<Vec<UserRef>> {
        sqlx::query_as::<_, UserRef>("SELECT id, login_name FROM users ORDER BY id")
            .fetch_all(&*self.db)
            .await
    }

    /// Bump `site_updated_at` and today's edit counter.
    pub async fn record_site_edit(&self, user_id: i64) -> sqlx::Result<()> {
        let now = Utc::now();
        sqlx::query("UPDATE users SET site_updated_at = ? WHERE id = ?")
            .bind(now)
            .bind(user_id)
            .execute(&*self.db)
            .await?;

        sqlx::query(
            "INSERT INTO edit_daily_stats (user_id, date, edit_count)
             VALUES (?, ?, 1)
             ON CONFLICT(user_id, date) DO UPDATE SET
                 edit_count = edit_daily_stats.edit_count + 1",
        )
        .bind(user_id)
        .bind(now.date_naive())
        .execute(&*self.db)
        .await?;
        Ok(())
    }

    /// Write the aggregate and append the matching history row atomically.
    pub async fn store_home_directory_size(
        &self,
        user_id: i64,
        size_bytes: i64,
        recorded_at: DateTime<Utc>,
    ) -> sqlx::Result<()> {
        let mut tx = self.db.begin().await?;
        sqlx::query(
            "UPDATE users SET home_directory_size_bytes = ?,
                              home_directory_size_bytes_updated_at = ?
             WHERE id = ?",
        )
        .bind(size_bytes)
        .bind(recorded_at)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO home_directory_size_history (user_id, size_bytes, recorded_at)
             VALUES (?, ?, ?)",
        )
        .bind(user_id)
        .bind(size_bytes)
        .bind(recorded_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await
    }

    /// Most recent snapshots first.
    pub async fn size_history(&self, user_id: i64, limit: i64) -> sqlx::Result<Vec<SizeHistoryRow>> {
        sqlx::query_as::<_, SizeHistoryRow>(
            "SELECT user_id, size_bytes, recorded_at
             FROM home_directory_size_history
             WHERE user_id = ?
             ORDER BY recorded_at DESC, id DESC
             LIMIT ?",
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&*self.db)
        .await
    }

    pub async fn edit_count_on(&self, user_id: i64, date: chrono::NaiveDate) -> sqlx::Result<i64> {
        sqlx::query_scalar::<_, i64>(
            "SELECT COALESCE(SUM(edit_count), 0) FROM edit_daily_stats WHERE user_id = ? AND date = ?",
        )
        .bind(user_id)
        .bind(date)
        .fetch_one(&*self.db)
        .await
    }

    /// Insert a bare user row. Account creation proper belongs to the auth layer.
    pub async fn insert_user(&self, login_name: &str, password_hash: &str) -> sqlx::Result<i64> {
        let result = sqlx::query("INSERT INTO users (login_name, password_hash) VALUES (?, ?)")
            .bind(login_name)
            .bind(password_hash)
            .execute(&*self.db)
            .await?;
        Ok(result.last_insert_rowid())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::db;
    use sqlx::sqlite::SqlitePoolOptions;

    /// Fresh in-memory database with the schema applied.
    pub(crate) async fn test_repository() -> UserRepository {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let db = Arc::new(pool);
        db::run_migrations(&db).await.unwrap();
        UserRepository::new(db)
    }

    #[tokio::test]
    async fn finds_users_by_login_name() {
        let repo = test_repository().await;
        let id = repo.insert_user("alice", "hash").await.unwrap();
        let user = repo.find_by_login_name("alice").await.unwrap().unwrap();
        assert_eq!(user.id, id);
        assert!(user.site_updated_at.is_none());
        assert!(repo.find_by_login_name("bob").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn site_edits_count_per_day() {
        let repo = test_repository().await;
        let id = repo.insert_user("alice", "hash").await.unwrap();
        repo.record_site_edit(id).await.unwrap();
        repo.record_site_edit(id).await.unwrap();

        let today = Utc::now().date_naive();
        assert_eq!(repo.edit_count_on(id, today).await.unwrap(), 2);
        let user = repo.find_by_login_name("alice").await.unwrap().unwrap();
        assert!(user.site_updated_at.is_some());
    }

    #[tokio::test]
    async fn size_updates_append_history() {
        let repo = test_repository().await;
        let id = repo.insert_user("alice", "hash").await.unwrap();
        let first = Utc::now() - chrono::Duration::days(1);
        repo.store_home_directory_size(id, 100, first).await.unwrap();
        repo.store_home_directory_size(id, 250, Utc::now()).await.unwrap();

        let user = repo.find_by_login_name("alice").await.unwrap().unwrap();
        assert_eq!(user.home_directory_size_bytes, Some(250));

        let history = repo.size_history(id, 10).await.unwrap();
        let sizes: Vec<i64> = history.iter().map(|row| row.size_bytes).collect();
        assert_eq!(sizes, vec![250, 100]);
    }
}
