//! Configuration manager for wicket.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use url::Url;

const DEFAULT_CONFIG_PATH: &str = "config.yaml";
const VERSION: &str = env!("CARGO_PKG_VERSION");

fn default_true() -> bool {
    true
}

fn default_user_filter() -> String {
    "(uid={username})".to_owned()
}

fn default_name_attribute() -> String {
    "cn".to_owned()
}

fn default_mail_attribute() -> String {
    "mail".to_owned()
}

fn default_identity_attribute() -> String {
    "uid".to_owned()
}

fn default_timeout() -> u64 {
    1
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Configuration {
    /// Instance name.
    pub name: String,
    /// Domain name of current instance.
    pub url: String,
    #[serde(default)]
    version: String,
    #[serde(skip)]
    path: PathBuf,
    /// Related to PostgreSQL configuration.
    #[serde(skip_serializing)]
    pub postgres: Option<Postgres>,
    /// Related to LDAP3 configuration.
    #[serde(skip_serializing)]
    pub ldap: Option<Ldap>,
    /// Related to AMQP event publishing.
    #[serde(skip_serializing)]
    pub events: Option<Events>,
}

/// PostgreSQL configuration.
#[derive(Debug, Default, PartialEq, Clone, Serialize, Deserialize)]
pub struct Postgres {
    /// Hostname:(?port) for PostgreSQL instance.
    pub address: String,
    /// Database name.
    pub database: Option<String>,
    /// Username credential to connect.
    pub username: Option<String>,
    /// Password credential to connect.
    pub password: Option<String>,
    /// Maximum pool connections.
    pub pool_size: Option<u32>,
}

/// LDAP configuration.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ldap {
    /// URL for LDAP instance, e.g. `ldap://localhost:389`.
    pub address: String,
    /// How the search connection identifies itself: `anonymous`, `service`
    /// or `user`. Unrecognized values fall back to `anonymous`.
    #[serde(default)]
    pub bind_mode: String,
    /// Fixed DN credential for `service` mode.
    pub bind_dn: Option<String>,
    /// Password credential for `service` mode.
    pub bind_password: Option<String>,
    /// DN template for `user` mode, with a `{username}` placeholder.
    pub user_dn_template: Option<String>,
    /// Negotiate StartTLS after connecting.
    #[serde(default)]
    pub starttls: bool,
    /// Verify the server certificate.
    #[serde(default = "default_true")]
    pub verify_certificates: bool,
    /// DN under which user entries are searched.
    pub base_dn: String,
    /// Search filter template with a `{username}` placeholder.
    #[serde(default = "default_user_filter")]
    pub user_filter: String,
    /// Attribute holding the full name.
    #[serde(default = "default_name_attribute")]
    pub name_attribute: String,
    /// Attribute holding the email address.
    #[serde(default = "default_mail_attribute")]
    pub mail_attribute: String,
    /// Attribute holding the stable external identifier.
    #[serde(default = "default_identity_attribute")]
    pub identity_attribute: String,
    /// Compare usernames case-sensitively.
    #[serde(default)]
    pub case_sensitive: bool,
    /// Create missing local accounts on first login.
    #[serde(default = "default_true")]
    pub create_accounts: bool,
    /// Network timeout, in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

/// AMQP event publishing configuration.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Events {
    /// Hostname:(?port) for AMQP instance.
    pub address: String,
    /// AMQP default vhost.
    pub vhost: Option<String>,
    /// AMQP username to access queue.
    pub username: String,
    /// AMQP password to access queue.
    pub password: String,
    /// Max channel connections.
    pub pool: Option<u16>,
    /// Queue name to publish authentication events.
    pub queue: String,
}

impl Configuration {
    pub fn path(mut self, path: PathBuf) -> Self {
        self.path = path;
        self
    }

    /// Normalizes a URL string by ensuring it starts with a valid scheme
    /// (`http` or `https`).
    fn normalize_url(&self, url: &str) -> Result<String, url::ParseError> {
        let url_with_scheme =
            if url.starts_with("http://") || url.starts_with("https://") {
                url.to_string()
            } else {
                format!("https://{url}")
            };

        let parsed_url = Url::parse(&url_with_scheme)?;
        Ok(parsed_url.to_string())
    }

    /// Reads the `config.yaml` file from the specified path or the default
    /// location.
    pub fn read(self) -> Result<Arc<Self>, url::ParseError> {
        let file_path = if self.path.is_file() {
            &self.path
        } else {
            &Path::new(DEFAULT_CONFIG_PATH).to_path_buf()
        };

        match File::open(file_path) {
            Ok(file) => {
                let mut config: Configuration =
                    match serde_yaml::from_reader(file) {
                        Ok(config) => config,
                        Err(err) => {
                            return Ok(Arc::new(self.error(err)));
                        },
                    };

                // set app version.
                config.version = VERSION.to_owned();

                // normalize URLs.
                config.url = self.normalize_url(&config.url)?;

                Ok(Arc::new(config))
            },
            Err(err) => Ok(Arc::new(self.error(err))),
        }
    }

    /// Return a default configuration as fallback.
    fn error(&self, err: impl std::error::Error) -> Self {
        tracing::error!(error = %err, "`config.yaml` file not found");
        Self {
            version: VERSION.to_owned(),
            ..Default::default()
        }
    }
}
