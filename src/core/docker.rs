/// Docker container transport
///
/// Runs shell commands inside a local container through the exec API and
/// copies staged files in as single-entry tar uploads.

use std::io::Write;
use std::path::Path;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use bollard::container::{LogOutput, UploadToContainerOptions};
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::Docker;
use futures::{Stream, StreamExt};
use tracing::debug;

use crate::core::error::{Error, Result};
use crate::core::transport::{Completion, Execution, OutputBuffer, Transport};

/// Default WordPress container of the local development stack.
pub const DEFAULT_WORDPRESS_CONTAINER: &str = "backup-test-wordpress";
/// Default MySQL/MariaDB container of the local development stack.
pub const DEFAULT_DATABASE_CONTAINER: &str = "backup-test-mysql";
/// Default document root inside the WordPress container.
pub const DEFAULT_CONTAINER_PATH: &str = "/var/www/html";

const EXIT_CODE_POLLS: usize = 100;
const EXIT_CODE_POLL_INTERVAL: Duration = Duration::from_millis(50);

type ExecFrame = std::result::Result<LogOutput, bollard::errors::Error>;
type ExecOutput = Pin<Box<dyn Stream<Item = ExecFrame> + Send>>;

#[derive(Clone)]
pub struct ContainerTransport {
    docker: Docker,
    container: String,
}

impl ContainerTransport {
    /// Connect to the local Docker daemon and bind to one container.
    pub fn connect(container: impl Into<String>) -> Result<Self> {
        let docker = Docker::connect_with_local_defaults().map_err(|e| {
            Error::Transport(format!(
                "Failed to connect to Docker daemon. Is Docker running? {}",
                e
            ))
        })?;
        Ok(Self::with_client(docker, container))
    }

    /// Bind an existing client to another container.
    pub fn with_client(docker: Docker, container: impl Into<String>) -> Self {
        Self {
            docker,
            container: container.into(),
        }
    }

    pub fn container(&self) -> &str {
        &self.container
    }

    /// Run an argv directly (no shell) and return its trimmed stdout.
    pub async fn exec_args(&self, argv: &[&str]) -> Result<String> {
        let exec = self
            .docker
            .create_exec(
                &self.container,
                CreateExecOptions {
                    cmd: Some(argv.iter().map(|arg| arg.to_string()).collect()),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| Error::Transport(format!("docker exec in {}: {}", self.container, e)))?;

        let StartExecResults::Attached { mut output, .. } =
            self.docker.start_exec(&exec.id, None).await.map_err(Error::transport)?
        else {
            return Err(Error::Transport(format!(
                "docker exec in {} started detached",
                self.container
            )));
        };

        let mut frames = FrameState::default();
        let mut stdout = Vec::new();
        let mut chunk = [0u8; 8192];
        while !frames.exhausted {
            let frame = output.next().await.transpose().map_err(Error::transport)?;
            frames.absorb(frame);
            loop {
                let n = frames.stdout.take(&mut chunk);
                if n == 0 {
                    break;
                }
                stdout.extend_from_slice(&chunk[..n]);
            }
        }

        let status = exit_code(&self.docker, &exec.id).await?;
        if status != 0 {
            return Err(Error::CommandFailed {
                command: argv.join(" "),
                status,
                stderr: String::from_utf8_lossy(&frames.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&stdout).trim().to_string())
    }

    /// Same daemon connection, different container.
    pub fn sibling(&self, container: impl Into<String>) -> Self {
        Self::with_client(self.docker.clone(), container)
    }
}

#[async_trait]
impl Transport for ContainerTransport {
    fn target(&self) -> String {
        format!("container {}", self.container)
    }

    async fn execute(&self, command: &str) -> Result<Box<dyn Execution>> {
        let exec = self
            .docker
            .create_exec(
                &self.container,
                CreateExecOptions {
                    cmd: Some(vec!["bash".to_string(), "-c".to_string(), command.to_string()]),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| Error::Transport(format!("docker exec in {}: {}", self.container, e)))?;

        match self.docker.start_exec(&exec.id, None).await.map_err(Error::transport)? {
            StartExecResults::Attached { output, .. } => Ok(Box::new(ContainerExecution {
                docker: self.docker.clone(),
                exec_id: exec.id,
                output,
                frames: FrameState::default(),
            })),
            StartExecResults::Detached => Err(Error::Transport(format!(
                "docker exec in {} started detached",
                self.container
            ))),
        }
    }

    async fn put_file(&self, local: &Path, remote: &str) -> Result<()> {
        let (directory, name) = split_remote(remote)?;
        let archive = pack_single(local, name)
            .map_err(|e| Error::io(format!("packing {}", local.display()), e))?;

        debug!(
            container = %self.container,
            remote = %remote,
            bytes = archive.len(),
            "Uploading to container"
        );
        self.docker
            .upload_to_container(
                &self.container,
                Some(UploadToContainerOptions {
                    path: directory.to_string(),
                    ..Default::default()
                }),
                archive.into(),
            )
            .await
            .map_err(|e| {
                Error::Transport(format!("copy into {}:{}: {}", self.container, remote, e))
            })
    }

    async fn put_bytes(&self, data: &[u8], remote: &str) -> Result<()> {
        let mut spool = tempfile::NamedTempFile::new()
            .map_err(|e| Error::io("creating local spool file", e))?;
        spool
            .write_all(data)
            .and_then(|_| spool.flush())
            .map_err(|e| Error::io("writing local spool file", e))?;

        self.put_file(spool.path(), remote).await
    }
}

/// Stdout and stderr split out of an attached exec stream.
#[derive(Default)]
struct FrameState {
    stdout: OutputBuffer,
    stderr: Vec<u8>,
    exhausted: bool,
}

impl FrameState {
    /// `None` marks the end of the stream.
    fn absorb(&mut self, frame: Option<LogOutput>) {
        match frame {
            Some(LogOutput::StdOut { message }) | Some(LogOutput::Console { message }) => {
                self.stdout.push(&message)
            }
            Some(LogOutput::StdErr { message }) => self.stderr.extend_from_slice(&message),
            Some(LogOutput::StdIn { .. }) => {}
            None => self.exhausted = true,
        }
    }
}

struct ContainerExecution {
    docker: Docker,
    exec_id: String,
    output: ExecOutput,
    frames: FrameState,
}

impl ContainerExecution {
    async fn next_frame(&mut self) -> Result<()> {
        let frame = self.output.next().await.transpose().map_err(Error::transport)?;
        self.frames.absorb(frame);
        Ok(())
    }
}

#[async_trait]
impl Execution for ContainerExecution {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        loop {
            if !self.frames.stdout.is_empty() {
                return Ok(self.frames.stdout.take(buf));
            }
            if self.frames.exhausted {
                return Ok(0);
            }
            self.next_frame().await?;
        }
    }

    async fn finish(&mut self) -> Result<Completion> {
        while !self.frames.exhausted {
            self.next_frame().await?;
        }

        Ok(Completion {
            status: exit_code(&self.docker, &self.exec_id).await?,
            stderr: String::from_utf8_lossy(&self.frames.stderr).into_owned(),
        })
    }
}

/// Wait for the daemon to record the exec's exit code once its stream closed.
async fn exit_code(docker: &Docker, exec_id: &str) -> Result<i64> {
    for _ in 0..EXIT_CODE_POLLS {
        let inspect = docker.inspect_exec(exec_id).await.map_err(Error::transport)?;
        if let Some(code) = settled_exit_code(inspect.running, inspect.exit_code) {
            return Ok(code);
        }
        tokio::time::sleep(EXIT_CODE_POLL_INTERVAL).await;
    }

    Err(Error::Transport(format!(
        "exit code of exec {} unavailable after {}",
        exec_id,
        humantime::format_duration(EXIT_CODE_POLL_INTERVAL * EXIT_CODE_POLLS as u32)
    )))
}

/// The daemon can report the exec as stopped before it records the code.
fn settled_exit_code(running: Option<bool>, exit_code: Option<i64>) -> Option<i64> {
    match running {
        Some(true) => None,
        _ => exit_code,
    }
}

/// `/tmp/dump.sql.gz` -> (`/tmp`, `dump.sql.gz`)
fn split_remote(remote: &str) -> Result<(&str, &str)> {
    match remote.rsplit_once('/') {
        Some((directory, name)) if !name.is_empty() => {
            Ok((if directory.is_empty() { "/" } else { directory }, name))
        }
        _ => Err(Error::Config(format!("not an absolute file path: {}", remote))),
    }
}

/// Tar archive holding `local` under `name`, as the upload API expects.
fn pack_single(local: &Path, name: &str) -> std::io::Result<Vec<u8>> {
    let mut builder = tar::Builder::new(Vec::new());
    builder.append_path_with_name(local, name)?;
    builder.into_inner()
}
