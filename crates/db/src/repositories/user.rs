use chrono::Utc;
use sqlx::{sqlite::SqliteRow, Row};

use super::{parse_timestamp, RepositoryError, UserRecord, UserRepository};
use crate::DbPool;

pub struct SqlUserRepository {
    pool: DbPool,
}

impl SqlUserRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl UserRepository for SqlUserRepository {
    async fn find_by_phone(&self, phone: &str) -> Result<Option<UserRecord>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, phone, name, tier, created_at FROM users WHERE phone = ?",
        )
        .bind(phone)
        .fetch_optional(&self.pool)
        .await?;

        row.map(user_from_row).transpose()
    }

    async fn get_or_create(
        &self,
        phone: &str,
        name: Option<&str>,
    ) -> Result<UserRecord, RepositoryError> {
        let now = Utc::now().to_rfc3339();
        // A concurrent insert for the same phone loses silently and reads the winner.
        sqlx::query(
            "INSERT INTO users (phone, name, tier, created_at, updated_at)
             VALUES (?, ?, 'basic', ?, ?)
             ON CONFLICT(phone) DO NOTHING",
        )
        .bind(phone)
        .bind(name)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        self.find_by_phone(phone)
            .await?
            .ok_or_else(|| RepositoryError::NotFound(format!("user with phone `{phone}`")))
    }
}

fn user_from_row(row: SqliteRow) -> Result<UserRecord, RepositoryError> {
    Ok(UserRecord {
        id: row.try_get("id")?,
        phone: row.try_get("phone")?,
        name: row.try_get("name")?,
        tier: row.try_get("tier")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}

#[cfg(test)]
mod tests {
    use super::SqlUserRepository;
    use crate::repositories::UserRepository;
    use crate::{connect_with_settings, migrations};

    #[tokio::test]
    async fn get_or_create_is_idempotent_per_phone() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        let repo = SqlUserRepository::new(pool);

        let created = repo.get_or_create("5215512345678", Some("Ana")).await.expect("create");
        let again = repo.get_or_create("5215512345678", None).await.expect("fetch");

        assert_eq!(created.id, again.id);
        assert_eq!(again.name.as_deref(), Some("Ana"));
        assert_eq!(again.tier, "basic");
        assert!(repo.find_by_phone("000").await.expect("lookup").is_none());
    }
}
