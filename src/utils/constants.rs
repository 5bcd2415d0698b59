/// Defaults shared by the CLI and the core operations

/// Site configuration written by `config init` when no path is given
pub const DEFAULT_CONFIG_FILE: &str = "site.yaml";

/// Prefix of environment variables overriding configuration values
pub const ENV_PREFIX: &str = "BACKUP_SITE_";

/// Nesting delimiter in override variable names (`SECTION__FIELD`)
pub const ENV_NESTING: &str = "__";

pub const DEFAULT_SSH_PORT: u16 = 22;
pub const DEFAULT_DB_PORT: u16 = 3306;
pub const DEFAULT_BACKUP_DESTINATION: &str = "backups";
pub const DEFAULT_BACKUP_PREFIX: &str = "backup";
pub const DEFAULT_RETENTION_DAYS: u32 = 30;
pub const MAX_RETENTION_DAYS: u32 = 3650;
pub const MAX_PREFIX_LEN: usize = 50;

/// Compression methods accepted in `backup.compression`
pub const COMPRESSION_METHODS: &[&str] = &["gzip", "bzip2", "xz", "none"];

/// Root password of the local database container, used to provision
/// the application database and user before a load
pub const DEFAULT_DB_ROOT_PASSWORD: &str = "root";

/// Noise printed by MariaDB's `mysqldump` alias on every run
pub const MYSQLDUMP_DEPRECATION_MARKER: &str = "Deprecated program name";

/// Staged name for archives restored from memory
pub const RESTORE_STREAM_NAME: &str = "restore_stream.tar.gz";
/// Staged name stem for dumps loaded from memory
pub const LOAD_STREAM_STEM: &str = "load_stream";

pub const ARCHIVE_EXTENSION: &str = "tar.gz";
pub const DUMP_EXTENSION: &str = "sql";
pub const GZIP_EXTENSION: &str = "gz";
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Document root of the WordPress image
pub const WP_CONTENT_DIR: &str = "/var/www/html/wp-content";
pub const WP_CONFIG_FILE: &str = "/var/www/html/wp-config.php";
pub const WEB_SERVER_USER: &str = "www-data";
