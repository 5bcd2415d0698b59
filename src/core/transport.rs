/// Transport seam between operations and the place commands run
///
/// A [`Transport`] is either an authenticated SSH session or a Docker
/// container. Operations render a shell string, run it, read its stdout and
/// look at how it ended; that is all this trait exposes.

use std::path::Path;

use async_trait::async_trait;

use crate::core::error::Result;

/// How a command ended, once its stdout has been consumed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub status: i64,
    pub stderr: String,
}

impl Completion {
    pub fn success(&self) -> bool {
        self.status == 0
    }
}

/// One running command.
#[async_trait]
pub trait Execution: Send {
    /// Read the next stdout bytes into `buf`. `Ok(0)` means end-of-stream.
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Drain stderr and wait for the exit status.
    async fn finish(&mut self) -> Result<Completion>;
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Human-readable target, e.g. `deploy@example.org:22` or `container wp`.
    fn target(&self) -> String;

    async fn execute(&self, command: &str) -> Result<Box<dyn Execution>>;

    /// Copy a local file to `remote`, overwriting it.
    async fn put_file(&self, local: &Path, remote: &str) -> Result<()>;

    /// Write an in-memory buffer to `remote`, overwriting it.
    async fn put_bytes(&self, data: &[u8], remote: &str) -> Result<()>;
}

/// Stdout frame held between `read` calls, handed out in caller-sized
/// slices.
#[derive(Debug, Default)]
pub struct OutputBuffer {
    pending: Vec<u8>,
    offset: usize,
}

impl OutputBuffer {
    /// Queue a frame behind whatever is still unread.
    pub fn push(&mut self, data: &[u8]) {
        if self.is_empty() {
            self.pending.clear();
            self.offset = 0;
        }
        self.pending.extend_from_slice(data);
    }

    /// Copy as much as fits into `buf`; 0 when nothing is pending.
    pub fn take(&mut self, buf: &mut [u8]) -> usize {
        let n = (self.pending.len() - self.offset).min(buf.len());
        buf[..n].copy_from_slice(&self.pending[self.offset..self.offset + n]);
        self.offset += n;
        n
    }

    pub fn is_empty(&self) -> bool {
        self.offset >= self.pending.len()
    }
}
