/// Run one command over a transport and materialize its output.
///
/// Output is copied chunk by chunk into a sink, so memory stays bounded by
/// the chunk size whatever the payload. Once stdout is exhausted the stderr
/// text and exit status decide the outcome. Nothing is retried.

use std::path::Path;

use serde::Serialize;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

use crate::core::command::redact;
use crate::core::error::{Error, Result};
use crate::core::transport::{Completion, Transport};

/// Default read size for streamed output: 64 KiB.
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Outcome of a public operation, handed to the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferResult {
    pub succeeded: bool,
    pub message: String,
    pub bytes_transferred: u64,
}

impl TransferResult {
    pub fn success(message: impl Into<String>, bytes_transferred: u64) -> Self {
        Self {
            succeeded: true,
            message: message.into(),
            bytes_transferred,
        }
    }
}

pub struct Executor<'a> {
    transport: &'a dyn Transport,
    chunk_size: usize,
    benign_stderr: Option<&'static str>,
    secrets: Vec<String>,
}

impl<'a> Executor<'a> {
    pub fn new(transport: &'a dyn Transport) -> Self {
        Self {
            transport,
            chunk_size: DEFAULT_CHUNK_SIZE,
            benign_stderr: None,
            secrets: Vec::new(),
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Stderr lines containing `marker` are known noise and are not logged.
    pub fn ignoring_warning(mut self, marker: &'static str) -> Self {
        self.benign_stderr = Some(marker);
        self
    }

    /// Mask `password` in logs and error values. May be called repeatedly.
    pub fn redacting(mut self, password: &str) -> Self {
        self.secrets.push(password.to_string());
        self
    }

    fn shown(&self, command: &str) -> String {
        self.secrets
            .iter()
            .fold(command.to_string(), |shown, secret| redact(&shown, secret))
    }

    /// Copy the command's stdout into `sink` and verify how it ended.
    ///
    /// Returns the number of bytes written. On a non-zero exit status the
    /// bytes already written stay in the sink and the error carries stderr.
    pub async fn stream_to<W>(&self, command: &str, sink: &mut W) -> Result<u64>
    where
        W: AsyncWrite + Unpin + Send,
    {
        debug!(command = %self.shown(command), on = %self.transport.target(), "Executing");

        let mut execution = self.transport.execute(command).await?;
        let mut buffer = vec![0u8; self.chunk_size];
        let mut total: u64 = 0;

        loop {
            let n = execution.read(&mut buffer).await?;
            if n == 0 {
                break;
            }
            sink.write_all(&buffer[..n])
                .await
                .map_err(|e| Error::io("writing command output", e))?;
            total += n as u64;
        }
        sink.flush()
            .await
            .map_err(|e| Error::io("flushing command output", e))?;

        let completion = execution.finish().await?;
        self.verify(command, completion)?;

        Ok(total)
    }

    /// Stream the command's stdout into a local file, creating its parent
    /// directory first.
    pub async fn capture_to_file(&self, command: &str, output: &Path) -> Result<u64> {
        if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::io(format!("creating {}", parent.display()), e))?;
        }

        let mut file = tokio::fs::File::create(output)
            .await
            .map_err(|e| Error::io(format!("creating {}", output.display()), e))?;
        let written = self.stream_to(command, &mut file).await?;
        drop(file);

        if !output.exists() {
            return Err(Error::MissingOutput(output.to_path_buf()));
        }
        Ok(written)
    }

    /// Stream the command's stdout into memory.
    pub async fn capture(&self, command: &str) -> Result<Vec<u8>> {
        let mut buffer = Vec::new();
        self.stream_to(command, &mut buffer).await?;
        Ok(buffer)
    }

    /// Stdout as trimmed text, for commands that print a single value.
    pub async fn capture_text(&self, command: &str) -> Result<String> {
        let bytes = self.capture(command).await?;
        Ok(String::from_utf8_lossy(&bytes).trim().to_string())
    }

    /// Run a command whose stdout is not needed.
    pub async fn run(&self, command: &str) -> Result<Completion> {
        debug!(command = %self.shown(command), on = %self.transport.target(), "Executing");

        let mut execution = self.transport.execute(command).await?;
        let mut buffer = vec![0u8; self.chunk_size];
        while execution.read(&mut buffer).await? > 0 {}

        let completion = execution.finish().await?;
        self.verify(command, completion)
    }

    fn verify(&self, command: &str, completion: Completion) -> Result<Completion> {
        let stderr = completion.stderr.trim();

        let noteworthy: Vec<&str> = stderr
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter(|line| self.benign_stderr.map_or(true, |marker| !line.contains(marker)))
            .collect();
        if !noteworthy.is_empty() {
            warn!(stderr = %noteworthy.join("\n"), "Command wrote to stderr");
        }

        if !completion.success() {
            return Err(Error::CommandFailed {
                command: self.shown(command),
                status: completion.status,
                stderr: stderr.to_string(),
            });
        }

        Ok(Completion {
            status: completion.status,
            stderr: stderr.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::transport::testing::{Script, ScriptedTransport};

    #[tokio::test]
    async fn test_chunks_land_in_order() {
        let transport = ScriptedTransport::new(vec![Script::chunks(&[b"AAAA", b"BBBB", b""])]);
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("out.bin");

        let written = Executor::new(&transport)
            .capture_to_file("cat something", &output)
            .await
            .unwrap();

        assert_eq!(written, 8);
        assert_eq!(std::fs::read(&output).unwrap(), b"AAAABBBB");
    }

    #[tokio::test]
    async fn test_many_chunks_concatenate() {
        let chunks: Vec<Vec<u8>> = (0..50u8).map(|i| vec![i; (i as usize % 7) + 1]).collect();
        let expected: Vec<u8> = chunks.concat();
        let script = Script {
            chunks: chunks.clone(),
            ..Script::default()
        };
        let transport = ScriptedTransport::new(vec![script]);

        let captured = Executor::new(&transport)
            .with_chunk_size(3)
            .capture("producer")
            .await
            .unwrap();

        assert_eq!(captured, expected);
    }

    #[tokio::test]
    async fn test_small_chunk_size_splits_reads() {
        let transport = ScriptedTransport::new(vec![Script::output(b"0123456789")]);
        let mut sink = Vec::new();
        let written = Executor::new(&transport)
            .with_chunk_size(4)
            .stream_to("producer", &mut sink)
            .await
            .unwrap();

        assert_eq!(written, 10);
        assert_eq!(sink, b"0123456789");
    }

    #[tokio::test]
    async fn test_nonzero_status_fails_with_stderr() {
        let transport = ScriptedTransport::new(vec![Script::failure(1, "boom")]);
        let err = Executor::new(&transport).capture("false").await.unwrap_err();

        match &err {
            Error::CommandFailed { status, stderr, .. } => {
                assert_eq!(*status, 1);
                assert_eq!(stderr, "boom");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(err.to_string().contains("boom"));
    }

    #[tokio::test]
    async fn test_failure_after_partial_output() {
        let script = Script::chunks(&[b"partial"]).with_stderr("disk full").with_status(2);
        let transport = ScriptedTransport::new(vec![script]);
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("nested").join("half.tar.gz");

        let err = Executor::new(&transport)
            .capture_to_file("tar", &output)
            .await
            .unwrap_err();

        assert!(err.to_string().contains("disk full"));
        // partial output is left for the caller to deal with
        assert_eq!(std::fs::read(&output).unwrap(), b"partial");
    }

    #[tokio::test]
    async fn test_creates_parent_directories() {
        let transport = ScriptedTransport::new(vec![Script::output(b"x")]);
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("a").join("b").join("c.sql");

        Executor::new(&transport)
            .capture_to_file("dump", &output)
            .await
            .unwrap();
        assert!(output.exists());
    }

    #[tokio::test]
    async fn test_empty_output_still_creates_file() {
        let transport = ScriptedTransport::new(vec![Script::ok()]);
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("empty.tar.gz");

        let written = Executor::new(&transport)
            .capture_to_file("true", &output)
            .await
            .unwrap();
        assert_eq!(written, 0);
        assert!(output.exists());
    }

    #[tokio::test]
    async fn test_benign_warning_does_not_fail() {
        let script = Script::output(b"-- dump")
            .with_stderr("mysqldump: Deprecated program name. Use mariadb-dump");
        let transport = ScriptedTransport::new(vec![script]);

        let out = Executor::new(&transport)
            .ignoring_warning("Deprecated program name")
            .capture("mysqldump")
            .await
            .unwrap();
        assert_eq!(out, b"-- dump");
    }

    #[tokio::test]
    async fn test_error_redacts_password() {
        let transport = ScriptedTransport::new(vec![Script::failure(1, "Access denied")]);
        let err = Executor::new(&transport)
            .redacting("hunter2")
            .run("mysql -u root -phunter2 db < /tmp/db.sql")
            .await
            .unwrap_err();

        match err {
            Error::CommandFailed { command, .. } => {
                assert!(!command.contains("hunter2"));
                assert!(command.contains("-p****"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_capture_text_trims() {
        let transport = ScriptedTransport::new(vec![Script::output(b"  http://localhost:8080\n")]);
        let text = Executor::new(&transport).capture_text("wp option get home").await.unwrap();
        assert_eq!(text, "http://localhost:8080");
    }
}
