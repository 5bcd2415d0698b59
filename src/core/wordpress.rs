/// WordPress adaptation after a local load
///
/// Points a freshly loaded site at the local stack: filesystem access,
/// `wp-content` ownership and permissions, the database host, and every
/// occurrence of the production URL.

use tracing::{debug, info, info_span, Instrument, Span};

use crate::core::command::shell_quote;
use crate::core::error::{Error, Result};
use crate::core::executor::Executor;
use crate::core::transport::Transport;
use crate::utils::{WEB_SERVER_USER, WP_CONFIG_FILE, WP_CONTENT_DIR};

const WP_CLI: &str = "wp --allow-root";

pub struct WordPressAdapter<'a> {
    transport: &'a dyn Transport,
    old_url: String,
    new_url: String,
    db_host: String,
    span: Span,
}

impl<'a> WordPressAdapter<'a> {
    pub fn new(
        transport: &'a dyn Transport,
        old_url: impl Into<String>,
        new_url: impl Into<String>,
        db_host: impl Into<String>,
    ) -> Self {
        let new_url = new_url.into();
        let span = info_span!("wordpress", new_url = %new_url);
        Self {
            transport,
            old_url: old_url.into(),
            new_url,
            db_host: db_host.into(),
            span,
        }
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    fn executor(&self) -> Executor<'a> {
        Executor::new(self.transport)
    }

    async fn wp(&self, args: &str) -> Result<String> {
        self.executor().capture_text(&format!("{} {}", WP_CLI, args)).await
    }

    pub async fn setup(&self) -> Result<()> {
        async {
            info!(
                old_url = %self.old_url,
                new_url = %self.new_url,
                "Adapting WordPress for the local stack"
            );

            self.configure_filesystem().await?;

            self.executor().run(&db_host_command(&self.db_host)).await?;
            info!(db_host = %self.db_host, "DB_HOST updated");

            let url = shell_quote(&self.new_url);
            self.wp(&format!("option update siteurl {}", url)).await?;
            self.wp(&format!("option update home {}", url)).await?;
            info!("siteurl and home updated");

            self.wp(&format!(
                "search-replace {} {} --all-tables --skip-columns=guid",
                shell_quote(&self.old_url),
                url
            ))
            .await?;
            info!("search-replace complete");
            Ok(())
        }
        .instrument(self.span.clone())
        .await
    }

    /// `siteurl` and `home` must both read back as the new URL.
    pub async fn verify(&self) -> Result<()> {
        async {
            let siteurl = self.wp("option get siteurl").await?;
            let home = self.wp("option get home").await?;
            debug!(siteurl = %siteurl, home = %home, "Read back site URLs");

            if siteurl != self.new_url || home != self.new_url {
                return Err(Error::Verification(format!(
                    "URLs do not match {}: siteurl={}, home={}",
                    self.new_url, siteurl, home
                )));
            }
            info!("Site URLs verified");
            Ok(())
        }
        .instrument(self.span.clone())
        .await
    }

    async fn configure_filesystem(&self) -> Result<()> {
        // wp-cli exits non-zero when the constant is not defined
        match self.wp("config get FS_METHOD").await {
            Ok(method) if !method.is_empty() => {
                info!(fs_method = %method, "FS_METHOD already set");
            }
            _ => {
                self.executor().run(&fs_method_command()).await?;
                info!("FS_METHOD set to direct");
            }
        }

        for command in permission_commands() {
            self.executor().run(&command).await?;
        }
        info!(owner = WEB_SERVER_USER, "wp-content ownership and permissions fixed");
        Ok(())
    }
}

fn fs_method_command() -> String {
    format!(
        "sed -i \"/That's all, stop editing/i define( 'FS_METHOD', 'direct' );\" {}",
        WP_CONFIG_FILE
    )
}

fn db_host_command(db_host: &str) -> String {
    format!(
        "sed -i \"s/define( 'DB_HOST', '[^']*' );/define( 'DB_HOST', '{}' );/\" {}",
        db_host, WP_CONFIG_FILE
    )
}

/// Owner `www-data`, directories 755, upload directories 777, files 644.
fn permission_commands() -> Vec<String> {
    vec![
        format!("chown -R {user}:{user} {dir}", user = WEB_SERVER_USER, dir = WP_CONTENT_DIR),
        format!("find {} -type d ! -path '*/uploads*' -exec chmod 755 {{}} \\;", WP_CONTENT_DIR),
        format!("find {}/uploads -type d -exec chmod 777 {{}} \\;", WP_CONTENT_DIR),
        format!("find {} -type f -exec chmod 644 {{}} \\;", WP_CONTENT_DIR),
    ]
}
