/// CLI argument parsing

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use backup_site::core::credentials::StaticCredentials;
use backup_site::core::docker::{
    DEFAULT_CONTAINER_PATH, DEFAULT_DATABASE_CONTAINER, DEFAULT_WORDPRESS_CONTAINER,
};
use backup_site::utils::DEFAULT_CONFIG_FILE;

// Build timestamp injected at compile time
pub const VERSION_WITH_BUILD: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (built: ",
    env!("BUILD_TIMESTAMP"),
    ")"
);

#[derive(Parser)]
#[command(name = "backup-site")]
#[command(author, version = VERSION_WITH_BUILD, about, long_about = None)]
pub struct Cli {
    /// Debug logging (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Print results as JSON
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show version information
    Version,

    /// Configuration management
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },

    /// SSH key setup and connectivity
    Ssh {
        #[command(subcommand)]
        command: SshCommands,
    },

    /// Back up remote files or database to local files
    Backup {
        #[command(subcommand)]
        command: BackupCommands,
    },

    /// Restore local backups onto the remote server
    Restore {
        #[command(subcommand)]
        command: RestoreCommands,
    },

    /// Load backups into the local Docker stack
    Load {
        #[command(subcommand)]
        command: LoadCommands,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Write an example site configuration
    Init {
        /// Output file
        #[arg(default_value = DEFAULT_CONFIG_FILE)]
        output: PathBuf,

        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },

    /// Validate a site configuration and print a summary
    Validate {
        config: PathBuf,

        /// Show the database password
        #[arg(long)]
        show_secrets: bool,
    },
}

#[derive(Subcommand)]
pub enum SshCommands {
    /// Print SSH key setup instructions
    SetupGuide,

    /// Check that the configured key can log in
    Test {
        config: PathBuf,

        #[command(flatten)]
        connection: ConnectionArgs,
    },
}

#[derive(Subcommand)]
pub enum BackupCommands {
    /// Archive the remote files into a local .tar.gz
    Files {
        config: PathBuf,

        /// Output archive (default: <destination>/<prefix>_<timestamp>.tar.gz)
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[command(flatten)]
        connection: ConnectionArgs,
    },

    /// Dump the remote database into a local .sql[.gz]
    Database {
        config: PathBuf,

        /// Output dump (default: <destination>/<prefix>_database_<timestamp>.sql.gz)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Write a plain .sql dump
        #[arg(long)]
        no_compress: bool,

        /// Keep SSL on the database connection
        #[arg(long)]
        ssl: bool,

        #[command(flatten)]
        connection: ConnectionArgs,
    },
}

#[derive(Subcommand)]
pub enum RestoreCommands {
    /// Extract a local archive into the remote files directory
    Files {
        config: PathBuf,
        archive: PathBuf,

        #[command(flatten)]
        connection: ConnectionArgs,
    },

    /// Load a local dump into the remote database
    Database {
        config: PathBuf,
        dump: PathBuf,

        #[command(flatten)]
        connection: ConnectionArgs,
    },
}

#[derive(Subcommand)]
pub enum LoadCommands {
    /// Extract an archive into the WordPress container
    Files {
        archive: PathBuf,

        /// WordPress container
        #[arg(short, long, default_value = DEFAULT_WORDPRESS_CONTAINER)]
        container: String,

        /// Destination inside the container
        #[arg(short, long, default_value = DEFAULT_CONTAINER_PATH)]
        path: String,
    },

    /// Load a dump into the database container
    Database {
        dump: PathBuf,

        /// Database container
        #[arg(short, long, default_value = DEFAULT_DATABASE_CONTAINER)]
        container: String,

        /// WordPress container whose wp-config.php holds the credentials
        #[arg(short, long, default_value = DEFAULT_WORDPRESS_CONTAINER)]
        wordpress_container: String,

        /// Database name (wp-cli is skipped when name, user and password are all given)
        #[arg(short = 'd', long)]
        db_name: Option<String>,

        /// Database user
        #[arg(short = 'u', long)]
        db_user: Option<String>,

        /// Database password
        #[arg(short = 'p', long)]
        db_password: Option<String>,
    },

    /// Adapt the loaded WordPress site to the local URL
    #[command(alias = "adapt-urls")]
    Setup {
        /// Production URL, e.g. https://www.example.com
        #[arg(short, long)]
        old_url: String,

        /// Local URL, e.g. http://localhost:8080
        #[arg(short, long)]
        new_url: String,

        /// WordPress container
        #[arg(short, long, default_value = DEFAULT_WORDPRESS_CONTAINER)]
        container: String,

        /// Database host written to wp-config.php
        #[arg(long, default_value = DEFAULT_DATABASE_CONTAINER)]
        db_host: String,
    },
}

#[derive(Args, Clone)]
pub struct ConnectionArgs {
    /// Passphrase of the private key
    #[arg(long, env = "BACKUP_SITE_SSH_PASSPHRASE", hide_env_values = true)]
    pub passphrase: Option<String>,

    /// Time allowed to establish the SSH connection
    #[arg(long, default_value = "30s", value_parser = humantime::parse_duration)]
    pub connect_timeout: Duration,
}

/// Credentials given on the command line, used instead of wp-cli only when
/// all three are present.
pub fn explicit_credentials(
    name: Option<String>,
    user: Option<String>,
    password: Option<String>,
) -> Option<StaticCredentials> {
    match (name, user, password) {
        (Some(name), Some(user), Some(password)) => {
            Some(StaticCredentials::new(name, user, password))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_load_database_defaults() {
        let cli = Cli::parse_from(["backup-site", "load", "database", "dump.sql.gz"]);
        match cli.command {
            Commands::Load {
                command:
                    LoadCommands::Database {
                        container,
                        wordpress_container,
                        db_name,
                        db_user,
                        db_password,
                        ..
                    },
            } => {
                assert_eq!(container, "backup-test-mysql");
                assert_eq!(wordpress_container, "backup-test-wordpress");
                assert!(explicit_credentials(db_name, db_user, db_password).is_none());
            }
            _ => panic!("unexpected command"),
        }
    }

    #[test]
    fn test_load_database_explicit_credentials() {
        let cli = Cli::parse_from([
            "backup-site", "load", "database", "dump.sql", "-d", "shop", "-u", "shop_user", "-p",
            "pw",
        ]);
        match cli.command {
            Commands::Load {
                command: LoadCommands::Database { db_name, db_user, db_password, .. },
            } => {
                let flags = explicit_credentials(db_name, db_user, db_password).unwrap();
                assert_eq!(flags.name.as_deref(), Some("shop"));
                assert_eq!(flags.password.as_deref(), Some("pw"));
            }
            _ => panic!("unexpected command"),
        }

        // a partial set still goes through wp-cli
        assert!(explicit_credentials(Some("shop".into()), None, Some("pw".into())).is_none());
    }

    #[test]
    fn test_setup_short_flags_and_alias() {
        let cli = Cli::parse_from([
            "backup-site",
            "load",
            "adapt-urls",
            "-o",
            "https://www.example.com",
            "-n",
            "http://localhost:8080",
        ]);
        match cli.command {
            Commands::Load {
                command: LoadCommands::Setup { old_url, new_url, container, db_host },
            } => {
                assert_eq!(old_url, "https://www.example.com");
                assert_eq!(new_url, "http://localhost:8080");
                assert_eq!(container, "backup-test-wordpress");
                assert_eq!(db_host, "backup-test-mysql");
            }
            _ => panic!("unexpected command"),
        }
    }

    #[test]
    fn test_connect_timeout_parsing() {
        let cli = Cli::parse_from([
            "backup-site",
            "-v",
            "backup",
            "database",
            "site.yaml",
            "--connect-timeout",
            "1m",
            "--no-compress",
        ]);
        assert!(cli.verbose);
        match cli.command {
            Commands::Backup {
                command: BackupCommands::Database { connection, no_compress, ssl, .. },
            } => {
                assert_eq!(connection.connect_timeout, Duration::from_secs(60));
                assert!(no_compress);
                assert!(!ssl);
            }
            _ => panic!("unexpected command"),
        }
    }
}
