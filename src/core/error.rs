/// Error types shared by every backup, restore and load operation

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("command failed with exit status {status}: {stderr}")]
    CommandFailed {
        command: String,
        status: i64,
        stderr: String,
    },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("authentication rejected for {user}@{host}")]
    Auth { user: String, host: String },

    #[error("output file {} was not created", .0.display())]
    MissingOutput(PathBuf),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("database credentials unavailable: {0}")]
    Credentials(String),

    #[error("verification failed: {0}")]
    Verification(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Error::Io {
            context: context.into(),
            source,
        }
    }

    pub fn transport(err: impl std::fmt::Display) -> Self {
        Error::Transport(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_failed_carries_stderr() {
        let err = Error::CommandFailed {
            command: "tar -xzf /tmp/a.tar.gz -C /srv".to_string(),
            status: 2,
            stderr: "boom".to_string(),
        };
        let text = err.to_string();
        assert!(text.contains("boom"));
        assert!(text.contains('2'));
    }

    #[test]
    fn test_io_context() {
        let err = Error::io(
            "writing backups/x.tar.gz",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert_eq!(err.to_string(), "writing backups/x.tar.gz: denied");
    }
}
