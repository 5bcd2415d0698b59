/// Restore of file archives into a target directory
///
/// The archive is staged under `/tmp`, extracted with `tar -xzf` and the
/// staged copy removed. The same operation serves SSH restores and loads
/// into the local WordPress container.

use std::path::Path;

use tracing::{info, info_span, Instrument, Span};

use crate::core::command::extract_command;
use crate::core::error::{Error, Result};
use crate::core::executor::{Executor, TransferResult};
use crate::core::staging::{Artifact, Stager};
use crate::core::transport::Transport;
use crate::utils::{format_bytes, RESTORE_STREAM_NAME};

pub struct FileRestore<'a> {
    transport: &'a dyn Transport,
    destination: String,
    span: Span,
}

impl<'a> FileRestore<'a> {
    pub fn new(transport: &'a dyn Transport, destination: impl Into<String>) -> Self {
        let destination = destination.into();
        let span = info_span!("file_restore", destination = %destination);
        Self {
            transport,
            destination,
            span,
        }
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Stage a local `.tar.gz` and extract it into the destination.
    pub async fn restore_from_file(&self, archive: &Path) -> Result<TransferResult> {
        async {
            if !archive.exists() {
                return Err(Error::NotFound(archive.to_path_buf()));
            }
            let size = std::fs::metadata(archive)
                .map_err(|e| Error::io(format!("reading {}", archive.display()), e))?
                .len();

            info!(
                archive = %archive.display(),
                size = %format_bytes(size),
                on = %self.transport.target(),
                "Restoring archive"
            );
            self.extract(Artifact::File(archive)).await?;

            Ok(TransferResult::success(
                format!("Archive extracted into {}", self.destination),
                size,
            ))
        }
        .instrument(self.span.clone())
        .await
    }

    /// Stage an in-memory archive as `/tmp/restore_stream.tar.gz` and extract it.
    pub async fn restore_from_bytes(&self, archive: &[u8]) -> Result<TransferResult> {
        async {
            info!(
                size = %format_bytes(archive.len() as u64),
                on = %self.transport.target(),
                "Restoring archive from memory"
            );
            self.extract(Artifact::Bytes {
                data: archive,
                name: RESTORE_STREAM_NAME,
            })
            .await?;

            Ok(TransferResult::success(
                format!("Archive extracted into {}", self.destination),
                archive.len() as u64,
            ))
        }
        .instrument(self.span.clone())
        .await
    }

    async fn extract(&self, artifact: Artifact<'_>) -> Result<()> {
        let executor = Executor::new(self.transport);
        Stager::new(self.transport)
            .run(&executor, artifact, |staged| extract_command(staged, &self.destination))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::transport::testing::{Script, ScriptedTransport};
    use std::io::Write;

    #[tokio::test]
    async fn test_restore_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("backup_20240131_142501.tar.gz");
        std::fs::File::create(&archive).unwrap().write_all(b"0123456789").unwrap();

        let transport = ScriptedTransport::new(vec![]);
        let result = FileRestore::new(&transport, "/var/www/html")
            .restore_from_file(&archive)
            .await
            .unwrap();

        assert_eq!(result.bytes_transferred, 10);
        assert_eq!(transport.staged()[0].0, "/tmp/backup_20240131_142501.tar.gz");
        assert_eq!(
            transport.commands(),
            vec![
                "tar -xzf /tmp/backup_20240131_142501.tar.gz -C /var/www/html",
                "rm -f /tmp/backup_20240131_142501.tar.gz",
            ]
        );
    }

    #[tokio::test]
    async fn test_missing_archive_runs_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let transport = ScriptedTransport::new(vec![]);

        let err = FileRestore::new(&transport, "/srv")
            .restore_from_file(&dir.path().join("absent.tar.gz"))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::NotFound(_)));
        assert!(transport.commands().is_empty());
        assert!(transport.staged().is_empty());
    }

    #[tokio::test]
    async fn test_restore_from_bytes() {
        let transport = ScriptedTransport::new(vec![]);
        FileRestore::new(&transport, "/srv/site")
            .restore_from_bytes(b"archive-bytes")
            .await
            .unwrap();

        assert_eq!(
            transport.staged(),
            vec![("/tmp/restore_stream.tar.gz".to_string(), b"archive-bytes".to_vec())]
        );
        assert_eq!(transport.commands()[0], "tar -xzf /tmp/restore_stream.tar.gz -C /srv/site");
    }

    #[tokio::test]
    async fn test_extraction_failure_keeps_staged_copy() {
        let transport =
            ScriptedTransport::new(vec![Script::failure(2, "gzip: stdin: not in gzip format")]);
        let err = FileRestore::new(&transport, "/srv")
            .restore_from_bytes(b"plain text")
            .await
            .unwrap_err();

        assert!(err.to_string().contains("not in gzip format"));
        // no rm after a failed extraction
        assert_eq!(transport.commands().len(), 1);
    }
}
