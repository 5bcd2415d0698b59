/// SSH transport
///
/// Runs commands over an authenticated russh session and writes staged files
/// through an SFTP channel opened on the same connection.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::client::{self, Handle, Msg};
use russh::{Channel, ChannelMsg, Disconnect};
use russh_keys::key;
use russh_sftp::client::SftpSession;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::core::error::{Error, Result};
use crate::core::transport::{Completion, Execution, OutputBuffer, Transport};
use crate::utils::expand_tilde;

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

const PROBE_COMMAND: &str = "echo 'SSH connection successful'";

#[derive(Debug, Clone)]
pub struct SshParams {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub private_key: PathBuf,
    pub passphrase: Option<String>,
    pub connect_timeout: Duration,
}

struct HostKeyLogger {
    host: String,
}

#[async_trait]
impl client::Handler for HostKeyLogger {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &key::PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        debug!(
            host = %self.host,
            fingerprint = %server_public_key.fingerprint(),
            "Accepting server host key"
        );
        Ok(true)
    }
}

pub struct SshTransport {
    session: Handle<HostKeyLogger>,
    host: String,
    port: u16,
    user: String,
}

impl SshTransport {
    /// Connect and authenticate with the configured private key.
    ///
    /// Only connection establishment is time-bounded.
    pub async fn connect(params: &SshParams) -> Result<Self> {
        let key_path = prepare_private_key(&params.private_key)?;
        let key_pair = russh_keys::load_secret_key(&key_path, params.passphrase.as_deref())
            .map_err(|e| {
                Error::Transport(format!("cannot load private key {}: {}", key_path.display(), e))
            })?;

        info!(host = %params.host, port = params.port, user = %params.user, "Connecting");

        let config = Arc::new(client::Config::default());
        let handler = HostKeyLogger {
            host: params.host.clone(),
        };
        let connecting = client::connect(config, (params.host.as_str(), params.port), handler);
        let mut session = tokio::time::timeout(params.connect_timeout, connecting)
            .await
            .map_err(|_| {
                Error::Transport(format!(
                    "timed out after {} connecting to {}:{}",
                    humantime::format_duration(params.connect_timeout),
                    params.host,
                    params.port
                ))
            })?
            .map_err(Error::transport)?;

        let authenticated = session
            .authenticate_publickey(params.user.clone(), Arc::new(key_pair))
            .await
            .map_err(Error::transport)?;
        if !authenticated {
            return Err(Error::Auth {
                user: params.user.clone(),
                host: params.host.clone(),
            });
        }

        info!(host = %params.host, "SSH session established");
        Ok(Self {
            session,
            host: params.host.clone(),
            port: params.port,
            user: params.user.clone(),
        })
    }

    /// Run a trivial command and return what it printed.
    pub async fn probe(&self) -> Result<String> {
        crate::core::executor::Executor::new(self)
            .capture_text(PROBE_COMMAND)
            .await
    }

    pub async fn close(self) -> Result<()> {
        self.session
            .disconnect(Disconnect::ByApplication, "", "en")
            .await
            .map_err(Error::transport)
    }

    async fn sftp(&self) -> Result<SftpSession> {
        let channel = self
            .session
            .channel_open_session()
            .await
            .map_err(Error::transport)?;
        channel
            .request_subsystem(true, "sftp")
            .await
            .map_err(Error::transport)?;
        SftpSession::new(channel.into_stream())
            .await
            .map_err(Error::transport)
    }
}

#[async_trait]
impl Transport for SshTransport {
    fn target(&self) -> String {
        format!("{}@{}:{}", self.user, self.host, self.port)
    }

    async fn execute(&self, command: &str) -> Result<Box<dyn Execution>> {
        let channel = self
            .session
            .channel_open_session()
            .await
            .map_err(Error::transport)?;
        channel
            .exec(true, command)
            .await
            .map_err(Error::transport)?;

        Ok(Box::new(SshExecution {
            channel,
            state: ChannelState::default(),
        }))
    }

    async fn put_file(&self, local: &Path, remote: &str) -> Result<()> {
        let mut source = tokio::fs::File::open(local)
            .await
            .map_err(|e| Error::io(format!("opening {}", local.display()), e))?;

        let sftp = self.sftp().await?;
        let mut destination = sftp.create(remote).await.map_err(Error::transport)?;
        let copied = tokio::io::copy(&mut source, &mut destination)
            .await
            .map_err(|e| Error::io(format!("uploading to {}", remote), e))?;
        destination
            .shutdown()
            .await
            .map_err(|e| Error::io(format!("closing {}", remote), e))?;

        debug!(remote = %remote, bytes = copied, "Uploaded over SFTP");
        Ok(())
    }

    async fn put_bytes(&self, data: &[u8], remote: &str) -> Result<()> {
        let sftp = self.sftp().await?;
        let mut destination = sftp.create(remote).await.map_err(Error::transport)?;
        destination
            .write_all(data)
            .await
            .map_err(|e| Error::io(format!("uploading to {}", remote), e))?;
        destination
            .shutdown()
            .await
            .map_err(|e| Error::io(format!("closing {}", remote), e))?;

        debug!(remote = %remote, bytes = data.len(), "Uploaded over SFTP");
        Ok(())
    }
}

struct SshExecution {
    channel: Channel<Msg>,
    state: ChannelState,
}

/// Bookkeeping shared by stdout reads and the final drain.
#[derive(Default)]
struct ChannelState {
    stdout: OutputBuffer,
    stderr: Vec<u8>,
    status: Option<i64>,
    eof: bool,
    closed: bool,
}

impl ChannelState {
    /// `keep_stdout` is false once the reader stopped; late stdout is dropped.
    fn absorb(&mut self, msg: Option<ChannelMsg>, keep_stdout: bool) {
        match msg {
            Some(ChannelMsg::Data { data }) => {
                if keep_stdout {
                    self.stdout.push(&data);
                }
            }
            // ext 1 is SSH_EXTENDED_DATA_STDERR
            Some(ChannelMsg::ExtendedData { data, ext: 1 }) => {
                self.stderr.extend_from_slice(&data);
            }
            Some(ChannelMsg::ExitStatus { exit_status }) => {
                self.status = Some(i64::from(exit_status));
            }
            Some(ChannelMsg::ExitSignal { signal_name, .. }) => {
                self.stderr
                    .extend_from_slice(format!("killed by signal {:?}", signal_name).as_bytes());
                self.status.get_or_insert(-1);
            }
            Some(ChannelMsg::Eof) => self.eof = true,
            Some(ChannelMsg::Close) | None => {
                self.eof = true;
                self.closed = true;
            }
            Some(_) => {}
        }
    }
}

#[async_trait]
impl Execution for SshExecution {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        loop {
            if !self.state.stdout.is_empty() {
                return Ok(self.state.stdout.take(buf));
            }
            if self.state.eof {
                return Ok(0);
            }
            let msg = self.channel.wait().await;
            self.state.absorb(msg, true);
        }
    }

    async fn finish(&mut self) -> Result<Completion> {
        while !self.state.closed {
            let msg = self.channel.wait().await;
            self.state.absorb(msg, false);
        }

        let status = match self.state.status {
            Some(status) => status,
            None => {
                warn!("Channel closed without an exit status");
                -1
            }
        };

        Ok(Completion {
            status,
            stderr: String::from_utf8_lossy(&self.state.stderr).into_owned(),
        })
    }
}

/// Resolve `~`, check the key exists and tighten group/other permission
/// bits to `0600` when they are set.
pub fn prepare_private_key(path: &Path) -> Result<PathBuf> {
    let path = expand_tilde(path);
    if !path.exists() {
        return Err(Error::NotFound(path));
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;

        let metadata = std::fs::metadata(&path)
            .map_err(|e| Error::io(format!("reading {}", path.display()), e))?;
        let mode = metadata.permissions().mode();
        if mode & 0o077 != 0 {
            warn!(
                key = %path.display(),
                mode = %format!("{:o}", mode & 0o777),
                "Private key permissions are too open, tightening to 600"
            );
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))
                .map_err(|e| Error::io(format!("restricting {}", path.display()), e))?;
        }
    }

    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use russh::CryptoVec;

    fn data(bytes: &[u8]) -> Option<ChannelMsg> {
        Some(ChannelMsg::Data {
            data: CryptoVec::from_slice(bytes),
        })
    }

    #[test]
    fn test_channel_state_splits_streams() {
        let mut state = ChannelState::default();
        state.absorb(data(b"-- MySQL dump"), true);
        state.absorb(
            Some(ChannelMsg::ExtendedData {
                data: CryptoVec::from_slice(b"Warning: using a password\n"),
                ext: 1,
            }),
            true,
        );
        state.absorb(Some(ChannelMsg::ExitStatus { exit_status: 0 }), true);
        state.absorb(Some(ChannelMsg::Eof), true);

        let mut buf = [0u8; 5];
        let mut seen = Vec::new();
        loop {
            let n = state.stdout.take(&mut buf);
            if n == 0 {
                break;
            }
            seen.extend_from_slice(&buf[..n]);
        }
        assert_eq!(seen, b"-- MySQL dump");
        assert_eq!(state.stderr, b"Warning: using a password\n");
        assert_eq!(state.status, Some(0));
        assert!(state.eof);
        assert!(!state.closed);

        state.absorb(Some(ChannelMsg::Close), true);
        assert!(state.closed);
    }

    #[test]
    fn test_channel_state_drops_late_stdout() {
        let mut state = ChannelState::default();
        state.absorb(data(b"late"), false);
        state.absorb(Some(ChannelMsg::ExitStatus { exit_status: 2 }), false);
        state.absorb(None, false);

        assert!(state.stdout.is_empty());
        assert_eq!(state.status, Some(2));
        assert!(state.eof && state.closed);
    }

    #[test]
    fn test_channel_state_ignores_other_extended_data() {
        let mut state = ChannelState::default();
        state.absorb(
            Some(ChannelMsg::ExtendedData {
                data: CryptoVec::from_slice(b"noise"),
                ext: 2,
            }),
            true,
        );
        assert!(state.stderr.is_empty());
        assert!(state.stdout.is_empty());
    }

    #[test]
    fn test_missing_key_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = prepare_private_key(&dir.path().join("id_missing")).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[cfg(unix)]
    #[test]
    fn test_open_key_permissions_are_tightened() {
        use std::os::unix::fs::PermissionsExt;

        let key = tempfile::NamedTempFile::new().unwrap();
        std::fs::set_permissions(key.path(), std::fs::Permissions::from_mode(0o644)).unwrap();

        let path = prepare_private_key(key.path()).unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[cfg(unix)]
    #[test]
    fn test_private_key_left_alone() {
        use std::os::unix::fs::PermissionsExt;

        let key = tempfile::NamedTempFile::new().unwrap();
        std::fs::set_permissions(key.path(), std::fs::Permissions::from_mode(0o400)).unwrap();

        prepare_private_key(key.path()).unwrap();

        let mode = std::fs::metadata(key.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o400);
    }
}
