/// Staging of local artifacts next to the command that consumes them.
///
/// The artifact is copied to `/tmp/<basename>` on the target, the consumer
/// command runs against that path, and the copy is removed afterwards.
/// Removal is best effort: a failing `rm` is logged, never raised. When the
/// consumer command itself fails the error propagates straight away and the
/// staged copy is left in place.

use std::path::Path;

use tracing::{debug, warn};

use crate::core::command::{cleanup_command, staging_path, STAGING_DIR};
use crate::core::error::Result;
use crate::core::executor::Executor;
use crate::core::transport::{Completion, Transport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageState {
    Idle,
    Staged,
    Executed,
    CleanedUp,
    Failed,
}

/// What gets staged.
#[derive(Debug, Clone, Copy)]
pub enum Artifact<'a> {
    File(&'a Path),
    Bytes { data: &'a [u8], name: &'a str },
}

impl Artifact<'_> {
    pub fn remote_path(&self) -> String {
        match self {
            Artifact::File(path) => staging_path(path),
            Artifact::Bytes { name, .. } => format!("{}/{}", STAGING_DIR, name),
        }
    }
}

pub struct Stager<'a> {
    transport: &'a dyn Transport,
    state: StageState,
}

impl<'a> Stager<'a> {
    pub fn new(transport: &'a dyn Transport) -> Self {
        Self {
            transport,
            state: StageState::Idle,
        }
    }

    pub fn state(&self) -> StageState {
        self.state
    }

    /// Stage `artifact`, run the command `build` renders for the staged path,
    /// then remove the staged copy.
    pub async fn run<F>(
        &mut self,
        executor: &Executor<'_>,
        artifact: Artifact<'_>,
        build: F,
    ) -> Result<Completion>
    where
        F: FnOnce(&str) -> String,
    {
        let remote = artifact.remote_path();

        debug!(remote = %remote, on = %self.transport.target(), "Staging artifact");
        let staged = match artifact {
            Artifact::File(local) => self.transport.put_file(local, &remote).await,
            Artifact::Bytes { data, .. } => self.transport.put_bytes(data, &remote).await,
        };
        if let Err(e) = staged {
            self.state = StageState::Failed;
            return Err(e);
        }
        self.state = StageState::Staged;

        let completion = match executor.run(&build(&remote)).await {
            Ok(completion) => completion,
            Err(e) => {
                self.state = StageState::Failed;
                return Err(e);
            }
        };
        self.state = StageState::Executed;

        debug!(remote = %remote, "Removing staged artifact");
        match Executor::new(self.transport).run(&cleanup_command(&remote)).await {
            Ok(_) => self.state = StageState::CleanedUp,
            Err(e) => warn!(remote = %remote, error = %e, "Could not remove staged artifact"),
        }

        Ok(completion)
    }
}
