//! Handle database requests.

use sqlx::{PgPool, Pool, Postgres};

use crate::error::Result;
use crate::user::{LocalUser, NewUser, UserStore};

#[derive(Clone)]
pub struct PgUserStore {
    pool: Pool<Postgres>,
}

impl PgUserStore {
    /// Create a new [`PgUserStore`].
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl UserStore for PgUserStore {
    /// Find current user using `username` field.
    async fn find_by_username(
        &self,
        username: &str,
    ) -> Result<Option<LocalUser>> {
        let user = sqlx::query_as::<_, LocalUser>(
            r"SELECT username, name, email, is_admin, directory_managed, created_at
                FROM users WHERE username = $1",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    /// Insert [`NewUser`] into database.
    async fn create(&self, user: &NewUser) -> Result<()> {
        sqlx::query(
            r"INSERT INTO users (username, name, email, is_admin, directory_managed)
                VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(&user.username)
        .bind(&user.name)
        .bind(&user.email)
        .bind(user.is_admin)
        .bind(user.directory_managed)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
