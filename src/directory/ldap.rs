//! LDAP-backed [`Directory`] implementation.
//!
//! Every call opens its own connection, drives it, and unbinds at the end;
//! nothing is pooled and nothing is shared between concurrent calls.

use std::collections::HashMap;
use std::time::Duration;

use ldap3::{
    Ldap, LdapConnAsync, LdapConnSettings, Scope, SearchEntry, dn_escape,
    ldap_escape,
};

use crate::config;
use crate::directory::{Directory, DirectoryError, DirectoryRecord};

const PLACEHOLDER: &str = "{username}";

/// Identity used by the search connection.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum BindMode {
    /// Null credentials.
    #[default]
    Anonymous,
    /// Fixed credentials; the end-user's are ignored.
    Service { dn: String, password: String },
    /// The end-user's own DN, built from a template.
    User { dn_template: String },
}

/// Validated LDAP settings.
#[derive(Clone, Debug)]
pub struct LdapConfig {
    addr: String,
    bind: BindMode,
    starttls: bool,
    verify_certificates: bool,
    base_dn: String,
    user_filter: String,
    name_attribute: String,
    mail_attribute: String,
    identity_attribute: String,
    timeout: Duration,
}

impl LdapConfig {
    /// Create a new [`LdapConfig`] from the `ldap` configuration section.
    pub fn new(settings: &config::Ldap) -> Result<Self, DirectoryError> {
        if !settings.user_filter.contains(PLACEHOLDER) {
            return Err(DirectoryError::Placeholder("user_filter"));
        }

        let bind = match settings.bind_mode.as_str() {
            "service" | "proxy" => match (&settings.bind_dn, &settings.bind_password) {
                (Some(dn), Some(password)) => BindMode::Service {
                    dn: dn.clone(),
                    password: password.clone(),
                },
                _ => return Err(DirectoryError::ServiceCredentials),
            },
            "user" => {
                let template = settings
                    .user_dn_template
                    .as_ref()
                    .ok_or(DirectoryError::UserTemplate)?;
                if !template.contains(PLACEHOLDER) {
                    return Err(DirectoryError::Placeholder("user_dn_template"));
                }
                BindMode::User {
                    dn_template: template.clone(),
                }
            },
            // Anything else, including an absent mode, searches anonymously.
            _ => BindMode::Anonymous,
        };

        Ok(Self {
            addr: settings.address.clone(),
            bind,
            starttls: settings.starttls,
            verify_certificates: settings.verify_certificates,
            base_dn: settings.base_dn.clone(),
            user_filter: settings.user_filter.clone(),
            name_attribute: settings.name_attribute.clone(),
            mail_attribute: settings.mail_attribute.clone(),
            identity_attribute: settings.identity_attribute.clone(),
            timeout: Duration::from_secs(settings.timeout),
        })
    }

    /// Search filter for a single username, with filter metacharacters
    /// escaped before substitution.
    fn user_filter_for(&self, username: &str) -> String {
        self.user_filter
            .replace(PLACEHOLDER, &ldap_escape(username))
    }

    /// Bind DN for `user` mode.
    fn user_bind_dn(&self, template: &str, username: &str) -> String {
        template.replace(PLACEHOLDER, &dn_escape(username))
    }

    /// Filter for the identity lookup path. `None` when neither a username
    /// nor an email was given.
    fn identity_filter(
        &self,
        username: Option<&str>,
        email: Option<&str>,
    ) -> Option<String> {
        match (username, email) {
            (Some(username), Some(email)) => Some(format!(
                "(&{}({}={}))",
                self.user_filter_for(username),
                self.mail_attribute,
                ldap_escape(email),
            )),
            (Some(username), None) => Some(self.user_filter_for(username)),
            (None, Some(email)) => Some(format!(
                "({}={})",
                self.mail_attribute,
                ldap_escape(email),
            )),
            (None, None) => None,
        }
    }

    /// Normalize a found entry for the authentication path.
    fn record(
        &self,
        attrs: &HashMap<String, Vec<String>>,
        username: &str,
    ) -> DirectoryRecord {
        DirectoryRecord {
            username: username.to_owned(),
            name: first_attr(attrs, &self.name_attribute).unwrap_or_default(),
            email: first_attr(attrs, &self.mail_attribute).unwrap_or_default(),
        }
    }

    /// Normalize a found entry for the identity lookup path.
    ///
    /// Resolving by email alone requires the identity attribute to be
    /// present; its absence means the attribute is misconfigured.
    fn identity(
        &self,
        attrs: &HashMap<String, Vec<String>>,
        username: Option<&str>,
    ) -> Option<DirectoryRecord> {
        let id = first_attr(attrs, &self.identity_attribute);
        let username = match (id, username) {
            (Some(id), _) => id,
            (None, Some(username)) => username.to_owned(),
            (None, None) => return None,
        };

        Some(DirectoryRecord {
            username,
            name: first_attr(attrs, &self.name_attribute).unwrap_or_default(),
            email: first_attr(attrs, &self.mail_attribute).unwrap_or_default(),
        })
    }
}

fn first_attr(
    attrs: &HashMap<String, Vec<String>>,
    name: &str,
) -> Option<String> {
    attrs.get(name).and_then(|values| values.first()).cloned()
}

/// LDAP manager to create connections.
#[derive(Clone, Debug)]
pub struct LdapDirectory {
    config: LdapConfig,
}

impl LdapDirectory {
    /// Create a new [`LdapDirectory`].
    pub fn new(config: LdapConfig) -> Self {
        Self { config }
    }

    async fn connect(&self) -> Result<Ldap, DirectoryError> {
        let mut settings = LdapConnSettings::new()
            .set_conn_timeout(self.config.timeout)
            .set_starttls(self.config.starttls);
        if !self.config.verify_certificates {
            settings = settings.set_no_tls_verify(true);
        }

        let (conn, ldap) =
            LdapConnAsync::with_settings(settings, &self.config.addr).await?;
        ldap3::drive!(conn);

        Ok(ldap)
    }

    /// Bind the search connection as the configured identity.
    ///
    /// `Ok(false)` means the server refused the credentials; transport
    /// failures are returned as errors.
    async fn bind_for_search(
        &self,
        ldap: &mut Ldap,
        username: &str,
        password: &str,
    ) -> Result<bool, DirectoryError> {
        let result = match &self.config.bind {
            BindMode::User { dn_template } => {
                let dn = self.config.user_bind_dn(dn_template, username);
                ldap.with_timeout(self.config.timeout)
                    .simple_bind(&dn, password)
                    .await?
            },
            BindMode::Service { dn, password } => {
                ldap.with_timeout(self.config.timeout)
                    .simple_bind(dn, password)
                    .await?
            },
            BindMode::Anonymous => {
                ldap.with_timeout(self.config.timeout)
                    .simple_bind("", "")
                    .await?
            },
        };

        Ok(result.success().is_ok())
    }

    /// Bind as the administrative search identity for lookups without a
    /// password: the service account when one is configured, anonymously
    /// otherwise.
    async fn bind_for_lookup(
        &self,
        ldap: &mut Ldap,
    ) -> Result<bool, DirectoryError> {
        let result = match &self.config.bind {
            BindMode::Service { dn, password } => {
                ldap.with_timeout(self.config.timeout)
                    .simple_bind(dn, password)
                    .await?
            },
            _ => {
                ldap.with_timeout(self.config.timeout)
                    .simple_bind("", "")
                    .await?
            },
        };

        Ok(result.success().is_ok())
    }

    async fn search_one(
        &self,
        ldap: &mut Ldap,
        filter: &str,
        attrs: &[&str],
    ) -> Result<Option<SearchEntry>, DirectoryError> {
        let (mut entries, _) = ldap
            .with_timeout(self.config.timeout)
            .search(&self.config.base_dn, Scope::Subtree, filter, attrs)
            .await?
            .success()?;

        if entries.len() != 1 {
            return Ok(None);
        }

        Ok(Some(SearchEntry::construct(entries.remove(0))))
    }
}

impl Directory for LdapDirectory {
    async fn verify_credentials(
        &self,
        username: &str,
        password: &str,
    ) -> Result<Option<DirectoryRecord>, DirectoryError> {
        // An empty password would be an unauthenticated bind, which servers
        // accept without checking anything.
        if password.is_empty() {
            return Ok(None);
        }

        let mut ldap = self.connect().await?;

        if !self.bind_for_search(&mut ldap, username, password).await? {
            let _ = ldap.unbind().await;
            return Ok(None);
        }

        let filter = self.config.user_filter_for(username);
        let attrs = [
            self.config.name_attribute.as_str(),
            self.config.mail_attribute.as_str(),
        ];
        let entry = match self.search_one(&mut ldap, &filter, &attrs).await {
            Ok(Some(entry)) => entry,
            Ok(None) => {
                let _ = ldap.unbind().await;
                return Ok(None);
            },
            Err(err) => {
                let _ = ldap.unbind().await;
                return Err(err);
            },
        };

        // The first bind only granted permission to search; binding as the
        // found entry's own DN is the actual credential check.
        let verified = match ldap
            .with_timeout(self.config.timeout)
            .simple_bind(&entry.dn, password)
            .await
        {
            Ok(result) => result.success().is_ok(),
            Err(err) => {
                let _ = ldap.unbind().await;
                return Err(err.into());
            },
        };
        let _ = ldap.unbind().await;

        if !verified {
            return Ok(None);
        }

        Ok(Some(self.config.record(&entry.attrs, username)))
    }

    async fn find_identity(
        &self,
        username: Option<&str>,
        email: Option<&str>,
    ) -> Result<Option<DirectoryRecord>, DirectoryError> {
        let Some(filter) = self.config.identity_filter(username, email) else {
            return Ok(None);
        };

        let mut ldap = self.connect().await?;

        if !self.bind_for_lookup(&mut ldap).await? {
            let _ = ldap.unbind().await;
            return Ok(None);
        }

        let attrs = [
            self.config.identity_attribute.as_str(),
            self.config.name_attribute.as_str(),
            self.config.mail_attribute.as_str(),
        ];
        let result = self.search_one(&mut ldap, &filter, &attrs).await;
        let _ = ldap.unbind().await;

        Ok(result?.and_then(|entry| self.config.identity(&entry.attrs, username)))
    }
}
