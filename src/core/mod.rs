pub mod backup;
pub mod command;
pub mod config;
pub mod credentials;
pub mod docker;
pub mod error;
pub mod executor;
pub mod load;
pub mod restore;
pub mod ssh;
pub mod staging;
pub mod transport;
pub mod wordpress;

pub use backup::{DatabaseBackup, FileBackup};
pub use config::SiteConfig;
pub use docker::ContainerTransport;
pub use error::{Error, Result};
pub use executor::{Executor, TransferResult};
pub use load::DatabaseLoad;
pub use restore::FileRestore;
pub use ssh::SshTransport;
pub use transport::Transport;
pub use wordpress::WordPressAdapter;
