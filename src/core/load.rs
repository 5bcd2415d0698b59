/// Loading of SQL dumps into a database
///
/// Serves both the remote restore (`mysql` over TCP on the SSH host) and the
/// local container load (`mariadb` inside the database container, with the
/// database and user provisioned first).

use std::path::Path;

use tracing::{info, info_span, Instrument, Span};

use crate::core::command::{is_compressed, provision_command, LoadCommand, SqlClient};
use crate::core::credentials::{CredentialSource, DbCredentials};
use crate::core::error::{Error, Result};
use crate::core::executor::{Executor, TransferResult};
use crate::core::staging::{Artifact, Stager};
use crate::core::transport::Transport;
use crate::utils::{format_bytes, DUMP_EXTENSION, GZIP_EXTENSION, LOAD_STREAM_STEM};

pub struct DatabaseLoad<'a> {
    transport: &'a dyn Transport,
    client: SqlClient,
    credentials: &'a dyn CredentialSource,
    root_password: Option<String>,
    span: Span,
}

impl<'a> DatabaseLoad<'a> {
    pub fn new(
        transport: &'a dyn Transport,
        client: SqlClient,
        credentials: &'a dyn CredentialSource,
    ) -> Self {
        let span = info_span!("database_load", on = %transport.target());
        Self {
            transport,
            client,
            credentials,
            root_password: None,
            span,
        }
    }

    /// Create the database and grant the user access as root before loading.
    pub fn provisioning(mut self, root_password: impl Into<String>) -> Self {
        self.root_password = Some(root_password.into());
        self
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Load a local `.sql` or `.sql.gz` dump. Compression is decided by the
    /// `.gz` suffix alone.
    pub async fn load_from_file(&self, dump: &Path) -> Result<TransferResult> {
        async {
            if !dump.exists() {
                return Err(Error::NotFound(dump.to_path_buf()));
            }
            let size = std::fs::metadata(dump)
                .map_err(|e| Error::io(format!("reading {}", dump.display()), e))?
                .len();

            let credentials = self.prepare().await?;
            info!(
                dump = %dump.display(),
                size = %format_bytes(size),
                database = %credentials.name,
                "Loading dump"
            );
            self.load(&credentials, Artifact::File(dump), is_compressed(dump)).await?;

            Ok(TransferResult::success(
                format!("Dump loaded into {}", credentials.name),
                size,
            ))
        }
        .instrument(self.span.clone())
        .await
    }

    /// Load an in-memory dump, staged as `/tmp/load_stream.sql[.gz]`.
    pub async fn load_from_bytes(&self, dump: &[u8], compressed: bool) -> Result<TransferResult> {
        async {
            let credentials = self.prepare().await?;
            let mut name = format!("{}.{}", LOAD_STREAM_STEM, DUMP_EXTENSION);
            if compressed {
                name = format!("{}.{}", name, GZIP_EXTENSION);
            }

            info!(
                size = %format_bytes(dump.len() as u64),
                database = %credentials.name,
                "Loading dump from memory"
            );
            self.load(&credentials, Artifact::Bytes { data: dump, name: &name }, compressed)
                .await?;

            Ok(TransferResult::success(
                format!("Dump loaded into {}", credentials.name),
                dump.len() as u64,
            ))
        }
        .instrument(self.span.clone())
        .await
    }

    async fn prepare(&self) -> Result<DbCredentials> {
        let credentials = self.credentials.resolve().await?;

        if let Some(root_password) = &self.root_password {
            info!(
                database = %credentials.name,
                user = %credentials.user,
                "Provisioning database and user"
            );
            Executor::new(self.transport)
                .redacting(root_password)
                .redacting(&credentials.password)
                .run(&provision_command(root_password, &credentials))
                .await?;
        }

        Ok(credentials)
    }

    async fn load(
        &self,
        credentials: &DbCredentials,
        artifact: Artifact<'_>,
        compressed: bool,
    ) -> Result<()> {
        let executor = Executor::new(self.transport).redacting(&credentials.password);
        Stager::new(self.transport)
            .run(&executor, artifact, |staged| {
                LoadCommand {
                    client: &self.client,
                    credentials,
                    dump_file: staged,
                    compressed,
                }
                .render()
            })
            .await?;
        Ok(())
    }
}
