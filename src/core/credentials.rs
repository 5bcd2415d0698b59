/// Database credential resolution.
///
/// Loads only need a database name, a user and a password. Where they come
/// from (the site configuration, CLI flags, or the web application's own
/// configuration read through wp-cli) is hidden behind [`CredentialSource`].

use async_trait::async_trait;
use tracing::info;

use crate::core::error::{Error, Result};
use crate::core::executor::Executor;
use crate::core::transport::Transport;

#[derive(Clone, PartialEq, Eq)]
pub struct DbCredentials {
    pub name: String,
    pub user: String,
    pub password: String,
}

impl std::fmt::Debug for DbCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbCredentials")
            .field("name", &self.name)
            .field("user", &self.user)
            .field("password", &"****")
            .finish()
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CredentialSource: Send + Sync {
    async fn resolve(&self) -> Result<DbCredentials>;
}

/// Credentials known up front (site configuration or command-line flags).
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials {
    pub name: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
}

impl StaticCredentials {
    pub fn new(
        name: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            name: Some(name.into()),
            user: Some(user.into()),
            password: Some(password.into()),
        }
    }
}

#[async_trait]
impl CredentialSource for StaticCredentials {
    async fn resolve(&self) -> Result<DbCredentials> {
        match (&self.name, &self.user, &self.password) {
            (Some(name), Some(user), Some(password)) => Ok(DbCredentials {
                name: name.clone(),
                user: user.clone(),
                password: password.clone(),
            }),
            _ => Err(Error::Credentials(
                "database name, user and password are all required".to_string(),
            )),
        }
    }
}

/// Reads `DB_NAME`, `DB_USER` and `DB_PASSWORD` from `wp-config.php` with
/// wp-cli, inside the WordPress container the transport is bound to.
pub struct WpCliCredentials<'a> {
    transport: &'a dyn Transport,
}

impl<'a> WpCliCredentials<'a> {
    pub fn new(transport: &'a dyn Transport) -> Self {
        Self { transport }
    }

    async fn get(&self, key: &str) -> Result<String> {
        let executor = Executor::new(self.transport);
        executor
            .capture_text(&format!("wp --allow-root config get {}", key))
            .await
            .map_err(|e| Error::Credentials(format!("wp-cli could not read {}: {}", key, e)))
    }
}

#[async_trait]
impl CredentialSource for WpCliCredentials<'_> {
    async fn resolve(&self) -> Result<DbCredentials> {
        info!(target_container = %self.transport.target(), "Reading database settings with wp-cli");

        let credentials = DbCredentials {
            name: self.get("DB_NAME").await?,
            user: self.get("DB_USER").await?,
            password: self.get("DB_PASSWORD").await?,
        };

        info!(
            database = %credentials.name,
            user = %credentials.user,
            "Database settings extracted"
        );
        Ok(credentials)
    }
}
