mod cli;

use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::Local;
use clap::Parser;
use colored::Colorize;
use indicatif::ProgressBar;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use backup_site::core::command::SqlClient;
use backup_site::core::config::write_example;
use backup_site::core::credentials::{CredentialSource, WpCliCredentials};
use backup_site::core::{
    ContainerTransport, DatabaseBackup, DatabaseLoad, FileBackup, FileRestore, SiteConfig,
    SshTransport, TransferResult, WordPressAdapter,
};
use backup_site::utils::{
    archive_file_name, dump_file_name, format_bytes, format_duration, DEFAULT_DB_ROOT_PASSWORD,
};
use cli::{
    explicit_credentials, BackupCommands, Cli, Commands, ConfigCommands, ConnectionArgs,
    LoadCommands, RestoreCommands, SshCommands, VERSION_WITH_BUILD,
};

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if cli.verbose { "debug" } else { "info" }));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    if let Err(e) = run(cli).await {
        eprintln!("{} {:#}", "✗".red().bold(), e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let json = cli.json;

    match cli.command {
        Commands::Version => {
            println!("backup-site {}", VERSION_WITH_BUILD);
            Ok(())
        }
        Commands::Config { command } => handle_config(command),
        Commands::Ssh { command } => handle_ssh(command).await,
        Commands::Backup { command } => handle_backup(command, json).await,
        Commands::Restore { command } => handle_restore(command, json).await,
        Commands::Load { command } => handle_load(command, json).await,
    }
}

fn handle_config(command: ConfigCommands) -> Result<()> {
    match command {
        ConfigCommands::Init { output, force } => {
            write_example(&output, force)?;
            println!("{} Example configuration written to {}", "✓".green(), output.display());
            println!("\nNext steps:");
            println!("  1. Edit {} with your server and database details", output.display());
            println!("  2. backup-site config validate {}", output.display());
            println!("  3. backup-site ssh test {}", output.display());
        }
        ConfigCommands::Validate { config, show_secrets } => {
            let site = load_config(&config)?;
            println!("{} Configuration is valid\n", "✓".green());

            for (section, entries) in site.summary(show_secrets) {
                println!("{}", section.bold());
                for (key, value) in entries {
                    println!("  {:<18} {}", key, value);
                }
            }
        }
    }

    Ok(())
}

async fn handle_ssh(command: SshCommands) -> Result<()> {
    match command {
        SshCommands::SetupGuide => print_setup_guide(),
        SshCommands::Test { config, connection } => {
            let site = load_config(&config)?;
            println!(
                "Testing SSH connection to {}@{}:{}...",
                site.ssh.user, site.ssh.host, site.ssh.port
            );

            let transport = connect(&site, &connection).await?;
            let outcome = transport.probe().await;
            close(transport).await;

            let output = outcome.context("Remote command failed")?;
            println!("{} {}", "✓".green(), output);
        }
    }

    Ok(())
}

async fn handle_backup(command: BackupCommands, json: bool) -> Result<()> {
    let started = Instant::now();

    match command {
        BackupCommands::Files { config, output, connection } => {
            let site = load_config(&config)?;
            let output = output.unwrap_or_else(|| {
                archive_file_name(&site.backup.destination, &site.backup.prefix, Local::now())
            });

            let transport = connect(&site, &connection).await?;
            let progress = spinner(&format!("Archiving {}...", site.files.remote_path), json);
            let outcome = FileBackup::new(&transport, &site.files).backup_to_file(&output).await;
            progress.finish_and_clear();
            close(transport).await;

            report(&outcome.context("File backup failed")?, started, json)
        }
        BackupCommands::Database { config, output, no_compress, ssl, connection } => {
            let site = load_config(&config)?;
            let compress = site.compress_dumps() && !no_compress;
            let output = output.unwrap_or_else(|| {
                let backup = &site.backup;
                dump_file_name(&backup.destination, &backup.prefix, compress, Local::now())
            });

            let transport = connect(&site, &connection).await?;
            let progress = spinner(&format!("Dumping database {}...", site.database.name), json);
            let outcome = DatabaseBackup::new(&transport, &site.database)
                .compressed(compress)
                .with_ssl(ssl)
                .backup_to_file(&output)
                .await;
            progress.finish_and_clear();
            close(transport).await;

            report(&outcome.context("Database backup failed")?, started, json)
        }
    }
}

async fn handle_restore(command: RestoreCommands, json: bool) -> Result<()> {
    let started = Instant::now();

    match command {
        RestoreCommands::Files { config, archive, connection } => {
            let site = load_config(&config)?;

            let transport = connect(&site, &connection).await?;
            let progress = spinner(&format!("Restoring into {}...", site.files.remote_path), json);
            let outcome = FileRestore::new(&transport, site.files.remote_path.clone())
                .restore_from_file(&archive)
                .await;
            progress.finish_and_clear();
            close(transport).await;

            report(&outcome.context("File restore failed")?, started, json)
        }
        RestoreCommands::Database { config, dump, connection } => {
            let site = load_config(&config)?;
            let credentials = site.database_credentials();
            let client = SqlClient::Mysql {
                host: site.database.host.clone(),
                port: site.database.port,
            };

            let transport = connect(&site, &connection).await?;
            let progress = spinner(&format!("Loading into {}...", site.database.name), json);
            let outcome = DatabaseLoad::new(&transport, client, &credentials)
                .load_from_file(&dump)
                .await;
            progress.finish_and_clear();
            close(transport).await;

            report(&outcome.context("Database restore failed")?, started, json)
        }
    }
}

async fn handle_load(command: LoadCommands, json: bool) -> Result<()> {
    let started = Instant::now();

    match command {
        LoadCommands::Files { archive, container, path } => {
            let transport = ContainerTransport::connect(&container)?;

            let progress = spinner(&format!("Extracting into {}:{}...", container, path), json);
            let outcome = FileRestore::new(&transport, path).restore_from_file(&archive).await;
            progress.finish_and_clear();

            report(&outcome.context("Loading files into the container failed")?, started, json)
        }
        LoadCommands::Database {
            dump,
            container,
            wordpress_container,
            db_name,
            db_user,
            db_password,
        } => {
            let database = ContainerTransport::connect(&container)?;
            let wordpress = database.sibling(wordpress_container);

            let flags = explicit_credentials(db_name, db_user, db_password);
            let wp_cli = WpCliCredentials::new(&wordpress);
            let source: &dyn CredentialSource = match &flags {
                Some(flags) => flags,
                None => &wp_cli,
            };

            let progress =
                spinner(&format!("Loading {} into {}...", dump.display(), container), json);
            let outcome = DatabaseLoad::new(&database, SqlClient::Mariadb, source)
                .provisioning(DEFAULT_DB_ROOT_PASSWORD)
                .load_from_file(&dump)
                .await;
            progress.finish_and_clear();

            let result = outcome.context("Loading the database into the container failed")?;
            report(&result, started, json)
        }
        LoadCommands::Setup { old_url, new_url, container, db_host } => {
            let transport = ContainerTransport::connect(&container)?;
            let wp_version = transport
                .exec_args(&["wp", "--allow-root", "--version"])
                .await
                .with_context(|| format!("wp-cli is not available in {}", container))?;
            if !json {
                println!("Using {} in {}", wp_version, container);
            }

            let adapter =
                WordPressAdapter::new(&transport, old_url.as_str(), new_url.as_str(), db_host);
            let progress = spinner("Adapting WordPress...", json);
            let outcome = match adapter.setup().await {
                Ok(()) => adapter.verify().await,
                Err(e) => Err(e),
            };
            progress.finish_and_clear();
            outcome.context("WordPress setup failed")?;

            let result = TransferResult::success(
                format!("WordPress in {} now answers on {} (was {})", container, new_url, old_url),
                0,
            );
            report(&result, started, json)
        }
    }
}

fn load_config(path: &Path) -> Result<SiteConfig> {
    SiteConfig::load(path).with_context(|| format!("Cannot load configuration {}", path.display()))
}

async fn connect(site: &SiteConfig, connection: &ConnectionArgs) -> Result<SshTransport> {
    let params = site.ssh_params(connection.passphrase.clone(), connection.connect_timeout);
    SshTransport::connect(&params)
        .await
        .with_context(|| {
            format!("SSH connection to {}@{}:{} failed", params.user, params.host, params.port)
        })
}

async fn close(transport: SshTransport) {
    if let Err(e) = transport.close().await {
        warn!(error = %e, "SSH disconnect failed");
    }
}

fn spinner(message: &str, json: bool) -> ProgressBar {
    if json {
        return ProgressBar::hidden();
    }
    let progress = ProgressBar::new_spinner();
    progress.set_message(message.to_string());
    progress.enable_steady_tick(Duration::from_millis(120));
    progress
}

fn report(result: &TransferResult, started: Instant, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(result)?);
        return Ok(());
    }

    println!("{} {}", "✓".green(), result.message);
    if result.bytes_transferred > 0 {
        println!("  Size: {}", format_bytes(result.bytes_transferred));
    }
    println!("  Time: {}", format_duration(started.elapsed().as_secs()));
    Ok(())
}

fn print_setup_guide() {
    println!("{}\n", "SSH key setup".bold());
    println!("1. Generate a dedicated key pair:");
    println!("     ssh-keygen -t ed25519 -f ~/.ssh/backup_site -C \"backup-site\"");
    println!("\n2. Install the public key on the server:");
    println!("     ssh-copy-id -i ~/.ssh/backup_site.pub user@host");
    println!("   or append ~/.ssh/backup_site.pub to ~/.ssh/authorized_keys on the server.");
    println!("\n3. Restrict the private key:");
    println!("     chmod 600 ~/.ssh/backup_site");
    println!("\n4. Reference it in the site configuration:");
    println!("     ssh:");
    println!("       private_key_path: ~/.ssh/backup_site");
    println!("       public_key_path: ~/.ssh/backup_site.pub");
    println!("\n5. Check the connection:");
    println!("     backup-site ssh test site.yaml");
    println!("\nEncrypted keys: pass --passphrase or set BACKUP_SITE_SSH_PASSPHRASE.");
}
