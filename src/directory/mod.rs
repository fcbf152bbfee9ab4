//! Directory lookup and credential verification.

pub mod ldap;

use serde::Serialize;
use thiserror::Error;

pub use ldap::{LdapConfig, LdapDirectory};

/// Errors raised while talking to the directory server.
#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("`{0}` must contain the `{{username}}` placeholder")]
    Placeholder(&'static str),

    #[error("bind mode `service` requires `bind_dn` and `bind_password`")]
    ServiceCredentials,

    #[error("bind mode `user` requires `user_dn_template`")]
    UserTemplate,

    #[error(transparent)]
    Ldap(#[from] ldap3::LdapError),
}

/// Entry found on the directory, normalized to the attributes this service
/// cares about. Missing attributes fall back to an empty string.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct DirectoryRecord {
    pub username: String,
    pub name: String,
    pub email: String,
}

/// A user directory able to verify credentials and resolve identities.
///
/// `Ok(None)` means "not found or not authenticated" and is deliberately
/// indistinguishable from a wrong password; `Err` means the directory
/// itself could not be reached or queried.
pub trait Directory {
    /// Find the entry matching `username` and verify `password` against it
    /// by re-binding as the entry's own DN.
    async fn verify_credentials(
        &self,
        username: &str,
        password: &str,
    ) -> Result<Option<DirectoryRecord>, DirectoryError>;

    /// Resolve a directory identity by username and/or email, without a
    /// password. The record's username comes from the identity attribute,
    /// falling back to `username` when one was given.
    async fn find_identity(
        &self,
        username: Option<&str>,
        email: Option<&str>,
    ) -> Result<Option<DirectoryRecord>, DirectoryError>;
}
