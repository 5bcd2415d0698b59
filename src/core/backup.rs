/// Backup of remote site files and database
///
/// Both backups stream the remote command's stdout straight into the sink:
/// a filtered `tar` archive for files, `mysqldump` (optionally gzipped) for
/// the database. Nothing is buffered on the remote side.

use std::path::Path;

use tracing::{info, info_span, Instrument, Span};

use crate::core::command::{ArchiveCommand, DumpCommand};
use crate::core::config::{DatabaseConfig, FilesConfig};
use crate::core::credentials::DbCredentials;
use crate::core::error::Result;
use crate::core::executor::{Executor, TransferResult};
use crate::core::transport::Transport;
use crate::utils::{format_bytes, MYSQLDUMP_DEPRECATION_MARKER};

pub struct FileBackup<'a> {
    transport: &'a dyn Transport,
    files: &'a FilesConfig,
    span: Span,
}

impl<'a> FileBackup<'a> {
    pub fn new(transport: &'a dyn Transport, files: &'a FilesConfig) -> Self {
        let span = info_span!("file_backup", remote_path = %files.remote_path);
        Self { transport, files, span }
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn command(&self) -> String {
        ArchiveCommand {
            remote_path: &self.files.remote_path,
            include_patterns: &self.files.include_patterns,
            exclude_patterns: &self.files.exclude_patterns,
        }
        .render()
    }

    /// Archive the remote tree into a local `.tar.gz`.
    pub async fn backup_to_file(&self, output: &Path) -> Result<TransferResult> {
        async {
            info!(
                output = %output.display(),
                on = %self.transport.target(),
                "Archiving remote files"
            );
            let written = Executor::new(self.transport)
                .capture_to_file(&self.command(), output)
                .await?;

            info!(size = %format_bytes(written), "Archive written");
            Ok(TransferResult::success(
                format!("Files archived to {}", output.display()),
                written,
            ))
        }
        .instrument(self.span.clone())
        .await
    }

    /// Archive the remote tree into memory.
    pub async fn backup_to_buffer(&self) -> Result<(TransferResult, Vec<u8>)> {
        async {
            info!(on = %self.transport.target(), "Archiving remote files into memory");
            let archive = Executor::new(self.transport).capture(&self.command()).await?;

            let result = TransferResult::success("Files archived in memory", archive.len() as u64);
            Ok((result, archive))
        }
        .instrument(self.span.clone())
        .await
    }
}

pub struct DatabaseBackup<'a> {
    transport: &'a dyn Transport,
    database: &'a DatabaseConfig,
    compress: bool,
    ssl: bool,
    span: Span,
}

impl<'a> DatabaseBackup<'a> {
    /// Dumps are gzipped and taken without SSL unless told otherwise.
    pub fn new(transport: &'a dyn Transport, database: &'a DatabaseConfig) -> Self {
        let span = info_span!("database_backup", database = %database.name);
        Self {
            transport,
            database,
            compress: true,
            ssl: false,
            span,
        }
    }

    pub fn compressed(mut self, compress: bool) -> Self {
        self.compress = compress;
        self
    }

    pub fn with_ssl(mut self, ssl: bool) -> Self {
        self.ssl = ssl;
        self
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    fn credentials(&self) -> DbCredentials {
        DbCredentials {
            name: self.database.name.clone(),
            user: self.database.user.clone(),
            password: self.database.password.clone(),
        }
    }

    pub fn command(&self) -> String {
        DumpCommand {
            host: &self.database.host,
            port: self.database.port,
            credentials: &self.credentials(),
            compress: self.compress,
            ssl: self.ssl,
        }
        .render()
    }

    fn executor(&self) -> Executor<'a> {
        Executor::new(self.transport)
            .ignoring_warning(MYSQLDUMP_DEPRECATION_MARKER)
            .redacting(&self.database.password)
    }

    /// Dump the database into a local `.sql` or `.sql.gz` file.
    pub async fn backup_to_file(&self, output: &Path) -> Result<TransferResult> {
        async {
            info!(output = %output.display(), compress = self.compress, "Dumping database");
            let written = self.executor().capture_to_file(&self.command(), output).await?;

            info!(size = %format_bytes(written), "Dump written");
            Ok(TransferResult::success(
                format!("Database {} dumped to {}", self.database.name, output.display()),
                written,
            ))
        }
        .instrument(self.span.clone())
        .await
    }

    /// Dump the database into memory.
    pub async fn backup_to_buffer(&self) -> Result<(TransferResult, Vec<u8>)> {
        async {
            info!(compress = self.compress, "Dumping database into memory");
            let dump = self.executor().capture(&self.command()).await?;

            let result = TransferResult::success(
                format!("Database {} dumped in memory", self.database.name),
                dump.len() as u64,
            );
            Ok((result, dump))
        }
        .instrument(self.span.clone())
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::Error;
    use crate::core::transport::testing::{Script, ScriptedTransport};

    fn files() -> FilesConfig {
        FilesConfig {
            remote_path: "/var/www/html".to_string(),
            include_patterns: vec!["wp-content".to_string()],
            exclude_patterns: vec!["cache".to_string()],
        }
    }

    fn database() -> DatabaseConfig {
        DatabaseConfig {
            host: "localhost".to_string(),
            port: 3306,
            name: "shop".to_string(),
            user: "shop_user".to_string(),
            password: "p@ss word".to_string(),
        }
    }

    #[tokio::test]
    async fn test_file_backup_to_file() {
        let transport = ScriptedTransport::new(vec![Script::chunks(&[b"AAAA", b"BBBB", b""])]);
        let files = files();
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("backups").join("site.tar.gz");

        let result = FileBackup::new(&transport, &files)
            .backup_to_file(&output)
            .await
            .unwrap();

        assert!(result.succeeded);
        assert_eq!(result.bytes_transferred, 8);
        assert_eq!(std::fs::read(&output).unwrap(), b"AAAABBBB");
        assert_eq!(
            transport.commands(),
            vec!["cd /var/www/html && find . -type f ! -path '*cache*' \\( -path '*wp-content*' \\) | tar -czf - -T -"]
        );
    }

    #[tokio::test]
    async fn test_file_backup_to_buffer() {
        let transport = ScriptedTransport::new(vec![Script::chunks(&[b"tar", b"ball"])]);
        let files = files();

        let (result, archive) = FileBackup::new(&transport, &files)
            .backup_to_buffer()
            .await
            .unwrap();

        assert_eq!(archive, b"tarball");
        assert_eq!(result.bytes_transferred, archive.len() as u64);
    }

    #[tokio::test]
    async fn test_file_backup_failure_surfaces_stderr() {
        let transport = ScriptedTransport::new(vec![Script::failure(
            2,
            "cd: /var/www/html: No such file or directory",
        )]);
        let files = files();
        let dir = tempfile::tempdir().unwrap();

        let err = FileBackup::new(&transport, &files)
            .backup_to_file(&dir.path().join("x.tar.gz"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("No such file or directory"));
    }

    #[tokio::test]
    async fn test_database_backup_tolerates_deprecation_notice() {
        let script = Script::output(b"\x1f\x8bdump").with_stderr(
            "mysqldump: Deprecated program name. It will be removed in a future release, \
             use '/usr/bin/mariadb-dump' instead",
        );
        let transport = ScriptedTransport::new(vec![script]);
        let database = database();
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("db.sql.gz");

        let result = DatabaseBackup::new(&transport, &database)
            .backup_to_file(&output)
            .await
            .unwrap();

        assert_eq!(result.bytes_transferred, 6);
        let command = &transport.commands()[0];
        assert!(command.contains("-p'p@ss word'"));
        assert!(command.contains("--ssl=0"));
        assert!(command.ends_with("shop | gzip"));
    }

    #[tokio::test]
    async fn test_database_backup_uncompressed_with_ssl() {
        let transport = ScriptedTransport::new(vec![Script::output(b"-- MariaDB dump")]);
        let database = database();

        let (_, dump) = DatabaseBackup::new(&transport, &database)
            .compressed(false)
            .with_ssl(true)
            .backup_to_buffer()
            .await
            .unwrap();

        assert_eq!(dump, b"-- MariaDB dump");
        let command = &transport.commands()[0];
        assert!(!command.contains("gzip"));
        assert!(!command.contains("--ssl=0"));
    }

    #[tokio::test]
    async fn test_database_backup_error_hides_password() {
        let transport =
            ScriptedTransport::new(vec![Script::failure(2, "Access denied for user 'shop_user'")]);
        let database = database();

        let err = DatabaseBackup::new(&transport, &database)
            .backup_to_buffer()
            .await
            .unwrap_err();

        match err {
            Error::CommandFailed { command, stderr, .. } => {
                assert!(!command.contains("p@ss word"));
                assert!(stderr.contains("Access denied"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
