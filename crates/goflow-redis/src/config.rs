//! Redis connection settings.

use std::time::Duration;

/// Configuration for the Redis connection backing a list store.
#[derive(Debug, Clone)]
pub struct RedisConfig {
    /// Redis connection URL (e.g., "redis://127.0.0.1:6379/")
    pub url: String,
    /// Optional username for Redis authentication
    pub username: Option<String>,
    /// Optional password for Redis authentication
    pub password: Option<String>,
    /// How long to wait for a connection to be established
    pub connection_timeout: Duration,
    /// Prepended to every list key. Empty by default, so the queues live at
    /// `tasks` and `results` exactly.
    pub key_prefix: String,
}

impl RedisConfig {
    /// Create a new Redis configuration with the given URL.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            username: None,
            password: None,
            connection_timeout: Duration::from_secs(5),
            key_prefix: String::new(),
        }
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// Namespace the list keys, e.g. `"staging:"` gives `staging:tasks`.
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// Build the connection URL, adding the scheme and credentials when missing.
    pub(crate) fn build_connection_url(&self) -> String {
        let (scheme, rest) = match self.url.split_once("://") {
            Some((scheme, rest)) => (scheme, rest),
            None => ("redis", self.url.as_str()),
        };

        let mut url = format!("{scheme}://");
        if !rest.contains('@') {
            match (&self.username, &self.password) {
                (Some(user), Some(pass)) => url.push_str(&format!("{user}:{pass}@")),
                (Some(user), None) => url.push_str(&format!("{user}@")),
                (None, Some(pass)) => url.push_str(&format!(":{pass}@")),
                (None, None) => {}
            }
        }
        url.push_str(rest);

        if !url.ends_with('/') && !rest.contains('/') {
            url.push('/');
        }
        url
    }
}
