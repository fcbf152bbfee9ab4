mod postgres;

pub use postgres::*;

use serde::{Deserialize, Serialize};

use crate::directory::DirectoryRecord;
use crate::error::Result;

/// User as saved on database.
#[derive(
    Clone, Debug, Default, PartialEq, Serialize, Deserialize, sqlx::FromRow,
)]
pub struct LocalUser {
    pub username: String,
    pub name: String,
    pub email: String,
    pub is_admin: bool,
    /// Whether this account is owned by the directory. Locally managed
    /// accounts are never authenticated through the directory path.
    pub directory_managed: bool,
    pub created_at: chrono::NaiveDate,
}

/// Fields of a user about to be created.
#[derive(Clone, Debug, PartialEq)]
pub struct NewUser {
    pub username: String,
    pub name: String,
    pub email: String,
    pub is_admin: bool,
    pub directory_managed: bool,
}

impl NewUser {
    /// A directory-provisioned, non-administrator account.
    pub fn from_directory(record: &DirectoryRecord) -> Self {
        Self {
            username: record.username.clone(),
            name: record.name.clone(),
            email: record.email.clone(),
            is_admin: false,
            directory_managed: true,
        }
    }
}

/// Storage for local user accounts.
pub trait UserStore {
    async fn find_by_username(
        &self,
        username: &str,
    ) -> Result<Option<LocalUser>>;

    async fn create(&self, user: &NewUser) -> Result<()>;
}
