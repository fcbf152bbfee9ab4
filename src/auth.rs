//! Authentication against the directory, and provisioning of the matching
//! local account.

use crate::directory::Directory;
use crate::events::{Event, EventSink};
use crate::session::SessionStore;
use crate::user::{LocalUser, NewUser, UserStore};

/// Backend name carried on emitted events.
pub const BACKEND: &str = "ldap";

/// Orchestration policy, read from the `ldap` configuration section.
#[derive(Clone, Copy, Debug, Default)]
pub struct Options {
    /// Compare usernames case-sensitively.
    pub case_sensitive: bool,
    /// Create missing local accounts on first login.
    pub create_accounts: bool,
}

impl Options {
    fn normalize(&self, username: &str) -> String {
        if self.case_sensitive {
            username.to_owned()
        } else {
            username.to_lowercase()
        }
    }
}

/// Authenticates directory users and opens their sessions.
///
/// Every failure collapses to `false` here; only operator-actionable causes
/// are logged, and a wrong password is never distinguishable from an
/// unknown user.
#[derive(Clone, Debug)]
pub struct DirectoryAuthenticator<D, U, S, E> {
    directory: D,
    users: U,
    sessions: S,
    events: E,
    options: Options,
}

impl<D, U, S, E> DirectoryAuthenticator<D, U, S, E>
where
    D: Directory,
    U: UserStore,
    S: SessionStore,
    E: EventSink,
{
    /// Create a new [`DirectoryAuthenticator`].
    pub fn new(
        directory: D,
        users: U,
        sessions: S,
        events: E,
        options: Options,
    ) -> Self {
        Self {
            directory,
            users,
            sessions,
            events,
            options,
        }
    }

    /// Verify `password` against the directory and open a session for the
    /// matching local account, creating it first when allowed.
    pub async fn authenticate(&self, username: &str, password: &str) -> bool {
        let username = self.options.normalize(username);

        let record = match self
            .directory
            .verify_credentials(&username, password)
            .await
        {
            Ok(Some(record)) => record,
            Ok(None) => return false,
            Err(err) => {
                tracing::warn!(error = %err, "directory unreachable");
                return false;
            },
        };

        let user = match self.users.find_by_username(&username).await {
            Ok(user) => user,
            Err(err) => {
                tracing::error!(error = %err, "user lookup failed");
                return false;
            },
        };

        match user {
            Some(user) if !user.directory_managed => {
                tracing::warn!(
                    %username,
                    "refusing to shadow a locally managed account"
                );
                false
            },
            Some(user) => self.open_session(user).await,
            None if self.options.create_accounts => {
                if let Err(err) =
                    self.users.create(&NewUser::from_directory(&record)).await
                {
                    tracing::error!(%username, error = %err, "account creation failed");
                    return false;
                }

                match self.users.find_by_username(&username).await {
                    Ok(Some(user)) => self.open_session(user).await,
                    Ok(None) => false,
                    Err(err) => {
                        tracing::error!(error = %err, "user lookup failed");
                        false
                    },
                }
            },
            None => {
                tracing::info!(
                    %username,
                    "account creation is disabled, refusing login"
                );
                false
            },
        }
    }

    /// Resolve a directory identity by username and/or email, without
    /// authenticating a password.
    pub async fn lookup_identity(
        &self,
        username: Option<&str>,
        email: Option<&str>,
    ) -> Option<crate::directory::DirectoryRecord> {
        match self.directory.find_identity(username, email).await {
            Ok(identity) => identity,
            Err(err) => {
                tracing::warn!(error = %err, "directory unreachable");
                None
            },
        }
    }

    async fn open_session(&self, user: LocalUser) -> bool {
        if let Err(err) = self.sessions.refresh(&user).await {
            tracing::error!(
                username = %user.username,
                error = %err,
                "session refresh failed"
            );
            return false;
        }

        self.events
            .dispatch(Event::AuthenticationSucceeded, &user.username)
            .await;

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::{DirectoryError, DirectoryRecord};
    use crate::error::Result;

    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct FakeDirectory {
        // username -> (password, record)
        entries: HashMap<String, (String, DirectoryRecord)>,
        unreachable: bool,
    }

    impl FakeDirectory {
        fn with_user(username: &str, password: &str, name: &str, email: &str) -> Self {
            let record = DirectoryRecord {
                username: username.to_owned(),
                name: name.to_owned(),
                email: email.to_owned(),
            };
            Self {
                entries: HashMap::from([(
                    username.to_owned(),
                    (password.to_owned(), record),
                )]),
                unreachable: false,
            }
        }

        fn unreachable() -> Self {
            Self {
                unreachable: true,
                ..Default::default()
            }
        }
    }

    impl Directory for FakeDirectory {
        async fn verify_credentials(
            &self,
            username: &str,
            password: &str,
        ) -> std::result::Result<Option<DirectoryRecord>, DirectoryError> {
            if self.unreachable {
                return Err(DirectoryError::Ldap(ldap3::LdapError::Io {
                    source: std::io::Error::other("connection refused"),
                }));
            }

            Ok(self.entries.get(username).and_then(|(expected, record)| {
                (expected == password).then(|| record.clone())
            }))
        }

        async fn find_identity(
            &self,
            username: Option<&str>,
            _email: Option<&str>,
        ) -> std::result::Result<Option<DirectoryRecord>, DirectoryError> {
            Ok(username
                .and_then(|username| self.entries.get(username))
                .map(|(_, record)| record.clone()))
        }
    }

    #[derive(Clone, Default)]
    struct FakeUsers {
        rows: Arc<Mutex<HashMap<String, LocalUser>>>,
        creates: Arc<Mutex<u32>>,
        reject_creates: bool,
    }

    impl FakeUsers {
        fn with_user(username: &str, directory_managed: bool) -> Self {
            let users = Self::default();
            users.rows.lock().unwrap().insert(
                username.to_owned(),
                LocalUser {
                    username: username.to_owned(),
                    directory_managed,
                    ..Default::default()
                },
            );
            users
        }
    }

    impl UserStore for FakeUsers {
        async fn find_by_username(
            &self,
            username: &str,
        ) -> Result<Option<LocalUser>> {
            Ok(self.rows.lock().unwrap().get(username).cloned())
        }

        async fn create(&self, user: &NewUser) -> Result<()> {
            if self.reject_creates {
                return Err(crate::error::ServerError::Unauthorized);
            }

            *self.creates.lock().unwrap() += 1;
            self.rows.lock().unwrap().insert(
                user.username.clone(),
                LocalUser {
                    username: user.username.clone(),
                    name: user.name.clone(),
                    email: user.email.clone(),
                    is_admin: user.is_admin,
                    directory_managed: user.directory_managed,
                    created_at: chrono::NaiveDate::default(),
                },
            );
            Ok(())
        }
    }

    #[derive(Clone, Default)]
    struct FakeSessions {
        refreshed: Arc<Mutex<Vec<String>>>,
    }

    impl SessionStore for FakeSessions {
        async fn refresh(&self, user: &LocalUser) -> Result<()> {
            self.refreshed.lock().unwrap().push(user.username.clone());
            Ok(())
        }
    }

    #[derive(Clone, Default)]
    struct FakeEvents {
        dispatched: Arc<Mutex<Vec<(Event, String)>>>,
    }

    impl EventSink for FakeEvents {
        async fn dispatch(&self, event: Event, user: &str) {
            self.dispatched
                .lock()
                .unwrap()
                .push((event, user.to_owned()));
        }
    }

    fn authenticator(
        directory: FakeDirectory,
        users: FakeUsers,
        options: Options,
    ) -> (
        DirectoryAuthenticator<FakeDirectory, FakeUsers, FakeSessions, FakeEvents>,
        FakeSessions,
        FakeEvents,
    ) {
        let sessions = FakeSessions::default();
        let events = FakeEvents::default();
        let auth = DirectoryAuthenticator::new(
            directory,
            users,
            sessions.clone(),
            events.clone(),
            options,
        );
        (auth, sessions, events)
    }

    fn creating() -> Options {
        Options {
            case_sensitive: false,
            create_accounts: true,
        }
    }

    #[tokio::test]
    async fn first_login_provisions_local_account() {
        let directory =
            FakeDirectory::with_user("bob", "secret", "Bob X", "bob@x.com");
        let users = FakeUsers::default();
        let (auth, sessions, events) =
            authenticator(directory, users.clone(), creating());

        assert!(auth.authenticate("BOB", "secret").await);

        let rows = users.rows.lock().unwrap();
        assert_eq!(rows.len(), 1);
        let bob = rows.get("bob").unwrap();
        assert!(bob.directory_managed);
        assert!(!bob.is_admin);
        assert_eq!(bob.name, "Bob X");
        assert_eq!(bob.email, "bob@x.com");

        assert_eq!(*sessions.refreshed.lock().unwrap(), vec!["bob"]);
        assert_eq!(
            *events.dispatched.lock().unwrap(),
            vec![(Event::AuthenticationSucceeded, "bob".to_owned())]
        );
    }

    #[tokio::test]
    async fn second_login_reuses_local_account() {
        let directory =
            FakeDirectory::with_user("bob", "secret", "Bob X", "bob@x.com");
        let users = FakeUsers::with_user("bob", true);
        let (auth, sessions, _) =
            authenticator(directory, users.clone(), creating());

        assert!(auth.authenticate("bob", "secret").await);

        assert_eq!(*users.creates.lock().unwrap(), 0);
        assert_eq!(*sessions.refreshed.lock().unwrap(), vec!["bob"]);
    }

    #[tokio::test]
    async fn locally_managed_account_is_never_shadowed() {
        let directory =
            FakeDirectory::with_user("bob", "secret", "Bob X", "bob@x.com");
        let users = FakeUsers::with_user("bob", false);
        let (auth, sessions, events) =
            authenticator(directory, users.clone(), creating());

        assert!(!auth.authenticate("bob", "secret").await);

        // The existing row is left untouched and nothing else happens.
        let rows = users.rows.lock().unwrap();
        assert_eq!(rows.len(), 1);
        assert!(!rows.get("bob").unwrap().directory_managed);
        assert!(sessions.refreshed.lock().unwrap().is_empty());
        assert!(events.dispatched.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn valid_credentials_fail_when_creation_is_disabled() {
        let directory =
            FakeDirectory::with_user("bob", "secret", "Bob X", "bob@x.com");
        let users = FakeUsers::default();
        let options = Options {
            case_sensitive: false,
            create_accounts: false,
        };
        let (auth, sessions, _) =
            authenticator(directory, users.clone(), options);

        assert!(!auth.authenticate("bob", "secret").await);
        assert!(users.rows.lock().unwrap().is_empty());
        assert!(sessions.refreshed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn creation_failure_refuses_login() {
        let directory =
            FakeDirectory::with_user("bob", "secret", "Bob X", "bob@x.com");
        let users = FakeUsers {
            reject_creates: true,
            ..Default::default()
        };
        let (auth, sessions, _) = authenticator(directory, users, creating());

        assert!(!auth.authenticate("bob", "secret").await);
        assert!(sessions.refreshed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn wrong_password_is_refused() {
        let directory =
            FakeDirectory::with_user("bob", "secret", "Bob X", "bob@x.com");
        let (auth, sessions, _) =
            authenticator(directory, FakeUsers::default(), creating());

        assert!(!auth.authenticate("bob", "wrong").await);
        assert!(sessions.refreshed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unreachable_directory_fails_closed() {
        let (auth, sessions, events) = authenticator(
            FakeDirectory::unreachable(),
            FakeUsers::default(),
            creating(),
        );

        assert!(!auth.authenticate("bob", "secret").await);
        assert!(sessions.refreshed.lock().unwrap().is_empty());
        assert!(events.dispatched.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn usernames_are_lowercased_by_default() {
        let directory =
            FakeDirectory::with_user("alice", "secret", "Alice", "alice@x.com");
        let users = FakeUsers::default();
        let (auth, _, _) = authenticator(directory, users.clone(), creating());

        assert!(auth.authenticate("Alice", "secret").await);
        assert!(auth.authenticate("ALICE", "secret").await);
        assert_eq!(users.rows.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn case_sensitive_mode_preserves_username() {
        let directory =
            FakeDirectory::with_user("alice", "secret", "Alice", "alice@x.com");
        let options = Options {
            case_sensitive: true,
            create_accounts: true,
        };
        let (auth, _, _) =
            authenticator(directory, FakeUsers::default(), options);

        assert!(!auth.authenticate("Alice", "secret").await);
        assert!(auth.authenticate("alice", "secret").await);
    }

    #[tokio::test]
    async fn identity_lookup_forwards_directory_results() {
        let (auth, _, _) = authenticator(
            FakeDirectory::default(),
            FakeUsers::default(),
            creating(),
        );

        assert!(auth.lookup_identity(Some("bob"), None).await.is_none());

        let directory =
            FakeDirectory::with_user("bob", "secret", "Bob X", "bob@x.com");
        let (auth, _, _) =
            authenticator(directory, FakeUsers::default(), creating());
        let identity = auth.lookup_identity(Some("bob"), None).await.unwrap();
        assert_eq!(identity.email, "bob@x.com");
    }
}
