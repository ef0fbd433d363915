//! Build server connection settings.

use std::fmt;
use std::time::Duration;

use remote_run_core::credentials::{PASSWORD_ENV, SERVER_ENV, USER_ENV, USER_ID_ENV};
use remote_run_core::{CredentialStore, Credentials};
use serde::{Deserialize, Serialize};

/// Server used when `REMOTE_RUN_SERVER` is unset.
pub const DEFAULT_SERVER_URL: &str = "http://localhost:8111";
/// Per-request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Build server configuration
#[derive(Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Base URL of the build server
    pub server_url: String,
    pub username: Option<String>,
    /// Password or access token
    pub password: Option<String>,
    /// Server-side user id owning uploaded changes
    pub user_id: Option<String>,
    pub user_agent: String,
    pub timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            server_url: std::env::var(SERVER_ENV)
                .unwrap_or_else(|_| DEFAULT_SERVER_URL.to_string()),
            username: std::env::var(USER_ENV).ok(),
            password: std::env::var(PASSWORD_ENV).ok(),
            user_id: std::env::var(USER_ID_ENV).ok(),
            user_agent: default_user_agent(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl ServerConfig {
    /// Create a new config from environment variables
    pub fn from_env() -> Self {
        Self::default()
    }

    /// Config for a specific server, without credentials
    pub fn new(server_url: &str) -> Self {
        ServerConfig {
            server_url: server_url.trim_end_matches('/').to_string(),
            username: None,
            password: None,
            user_id: None,
            user_agent: default_user_agent(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }

    pub fn with_credentials(mut self, username: &str, password: &str, user_id: &str) -> Self {
        self.username = Some(username.to_string());
        self.password = Some(password.to_string());
        self.user_id = Some(user_id.to_string());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_secs = timeout.as_secs();
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl CredentialStore for ServerConfig {
    /// Credentials, once every field is set.
    fn credentials(&self) -> Option<Credentials> {
        Some(Credentials::new(
            &self.server_url,
            self.username.as_deref()?,
            self.password.as_deref()?,
            self.user_id.as_deref()?,
        ))
    }
}

impl fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConfig")
            .field("server_url", &self.server_url)
            .field("username", &self.username)
            .field("has_password", &self.password.is_some())
            .field("user_id", &self.user_id)
            .field("user_agent", &self.user_agent)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

fn default_user_agent() -> String {
    format!("remote-run/{}", env!("CARGO_PKG_VERSION"))
}
