//! Credentials needed to talk to the build server.
//!
//! Persisting credentials and the login handshake live elsewhere; this
//! module only describes what the sender needs and where it gets it from.

use std::fmt;

use serde::Deserialize;

/// Environment variable holding the build server URL.
pub const SERVER_ENV: &str = "REMOTE_RUN_SERVER";
/// Environment variable holding the user name.
pub const USER_ENV: &str = "REMOTE_RUN_USER";
/// Environment variable holding the password or access token.
pub const PASSWORD_ENV: &str = "REMOTE_RUN_PASSWORD";
/// Environment variable holding the server-side user id.
pub const USER_ID_ENV: &str = "REMOTE_RUN_USER_ID";

/// Server URL plus the identity used for uploads and triggers.
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct Credentials {
    pub server_url: String,
    pub username: String,
    pub password: String,
    /// Server-side user id recorded as the owner of uploaded changes.
    pub user_id: String,
}

impl Credentials {
    pub fn new(server_url: &str, username: &str, password: &str, user_id: &str) -> Self {
        Credentials {
            server_url: server_url.trim_end_matches('/').to_string(),
            username: username.to_string(),
            password: password.to_string(),
            user_id: user_id.to_string(),
        }
    }

    /// All fields are present.
    pub fn is_valid(&self) -> bool {
        !self.server_url.trim().is_empty()
            && !self.username.trim().is_empty()
            && !self.password.is_empty()
            && !self.user_id.trim().is_empty()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("server_url", &self.server_url)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("user_id", &self.user_id)
            .finish()
    }
}

/// Source of credentials, consulted once per send.
pub trait CredentialStore: Send + Sync {
    fn credentials(&self) -> Option<Credentials>;
}

/// Fixed credentials, or none at all.
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials(Option<Credentials>);

impl StaticCredentials {
    pub fn new(credentials: Credentials) -> Self {
        Self(Some(credentials))
    }

    pub fn empty() -> Self {
        Self(None)
    }
}

impl CredentialStore for StaticCredentials {
    fn credentials(&self) -> Option<Credentials> {
        self.0.clone()
    }
}

/// Reads the `REMOTE_RUN_*` variables on every lookup.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvCredentialStore;

impl CredentialStore for EnvCredentialStore {
    fn credentials(&self) -> Option<Credentials> {
        let server_url = std::env::var(SERVER_ENV).ok()?;
        let username = std::env::var(USER_ENV).ok()?;
        let password = std::env::var(PASSWORD_ENV).ok()?;
        let user_id = std::env::var(USER_ID_ENV).ok()?;
        Some(Credentials::new(&server_url, &username, &password, &user_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_trims_trailing_slash() {
        let creds = Credentials::new("https://ci.example.com/", "dev", "pw", "7");
        assert_eq!(creds.server_url, "https://ci.example.com");
        assert!(creds.is_valid());
    }

    #[test]
    fn test_blank_fields_are_invalid() {
        assert!(!Credentials::new("https://ci", "", "pw", "7").is_valid());
        assert!(!Credentials::new("https://ci", "dev", "", "7").is_valid());
        assert!(!Credentials::new("", "dev", "pw", "7").is_valid());
        assert!(!Credentials::new("https://ci", "dev", "pw", " ").is_valid());
    }

    #[test]
    fn test_debug_redacts_password() {
        let creds = Credentials::new("https://ci", "dev", "hunter2", "7");
        let dbg = format!("{creds:?}");
        assert!(!dbg.contains("hunter2"));
        assert!(dbg.contains("redacted"));
    }

    #[test]
    fn test_static_store() {
        assert!(StaticCredentials::empty().credentials().is_none());
        let store = StaticCredentials::new(Credentials::new("https://ci", "dev", "pw", "7"));
        assert_eq!(store.credentials().unwrap().username, "dev");
    }
}
