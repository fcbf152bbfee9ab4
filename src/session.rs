//! Session establishment for authenticated users.

use rand::RngCore;
use sqlx::{PgPool, Pool, Postgres};

use crate::error::Result;
use crate::user::LocalUser;

const TOKEN_LENGTH: usize = 32;

/// Opens or refreshes a session for a local user.
pub trait SessionStore {
    async fn refresh(&self, user: &LocalUser) -> Result<()>;
}

/// Opaque session tokens saved on database.
#[derive(Clone)]
pub struct PgSessionStore {
    pool: Pool<Postgres>,
}

impl PgSessionStore {
    /// Create a new [`PgSessionStore`].
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl SessionStore for PgSessionStore {
    async fn refresh(&self, user: &LocalUser) -> Result<()> {
        let mut bytes = [0u8; TOKEN_LENGTH];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        let token = hex::encode(bytes);

        sqlx::query(r"INSERT INTO sessions (token, username) VALUES ($1, $2)")
            .bind(&token)
            .bind(&user.username)
            .execute(&self.pool)
            .await?;

        tracing::debug!(username = %user.username, "session refreshed");

        Ok(())
    }
}
