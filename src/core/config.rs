/// Site configuration
///
/// Reads a YAML site file, applies `BACKUP_SITE_<SECTION>__<FIELD>`
/// environment overrides (a `.env` file is honoured), then validates.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};

use crate::core::credentials::StaticCredentials;
use crate::core::error::{Error, Result};
use crate::core::ssh::SshParams;
use crate::utils::{
    expand_tilde, mask_sensitive, COMPRESSION_METHODS, DEFAULT_BACKUP_DESTINATION,
    DEFAULT_BACKUP_PREFIX, DEFAULT_DB_PORT, DEFAULT_RETENTION_DAYS, DEFAULT_SSH_PORT, ENV_NESTING,
    ENV_PREFIX, MAX_PREFIX_LEN,
    MAX_RETENTION_DAYS,
};

/// Template written by `config init`
pub const EXAMPLE_CONFIG: &str = include_str!("../../example-site.yaml");

const REQUIRED_SITE_FIELDS: &[&str] = &["name", "provider", "app_type"];

/// Fields overridden from the environment as integers rather than strings
const NUMERIC_FIELDS: &[&str] = &["port", "retention_days"];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteConfig {
    pub site: BTreeMap<String, String>,
    pub ssh: SshConfig,
    pub files: FilesConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub backup: BackupConfig,
    #[serde(default)]
    pub options: Option<BTreeMap<String, Value>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SshConfig {
    pub host: String,
    pub user: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    pub private_key_path: PathBuf,
    #[serde(default)]
    pub public_key_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilesConfig {
    pub remote_path: String,
    #[serde(default)]
    pub include_patterns: Vec<String>,
    /// Takes priority over `include_patterns`
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub host: String,
    #[serde(default = "default_db_port")]
    pub port: u16,
    pub name: String,
    pub user: String,
    pub password: String,
}

impl std::fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("name", &self.name)
            .field("user", &self.user)
            .field("password", &"****")
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupConfig {
    #[serde(default = "default_destination")]
    pub destination: PathBuf,
    #[serde(default = "default_compression")]
    pub compression: String,
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
    #[serde(default = "default_prefix")]
    pub prefix: String,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            destination: default_destination(),
            compression: default_compression(),
            retention_days: default_retention_days(),
            prefix: default_prefix(),
        }
    }
}

fn default_ssh_port() -> u16 {
    DEFAULT_SSH_PORT
}

fn default_db_port() -> u16 {
    DEFAULT_DB_PORT
}

fn default_destination() -> PathBuf {
    PathBuf::from(DEFAULT_BACKUP_DESTINATION)
}

fn default_compression() -> String {
    "gzip".to_string()
}

fn default_retention_days() -> u32 {
    DEFAULT_RETENTION_DAYS
}

fn default_prefix() -> String {
    DEFAULT_BACKUP_PREFIX.to_string()
}

impl SiteConfig {
    /// Load a site file with overrides from `.env` and the process environment
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        dotenv::dotenv().ok();
        Self::load_with_env(path, std::env::vars())
    }

    /// Load a site file with an explicit set of override variables
    pub fn load_with_env<P, I>(path: P, vars: I) -> Result<Self>
    where
        P: AsRef<Path>,
        I: IntoIterator<Item = (String, String)>,
    {
        let path = path.as_ref();
        if !path.exists() {
            return Err(Error::NotFound(path.to_path_buf()));
        }
        let content = fs::read_to_string(path)
            .map_err(|e| Error::io(format!("reading {}", path.display()), e))?;

        let mut config = Self::parse_with_env(&content, vars)?;

        let errors = config.validate();
        if !errors.is_empty() {
            return Err(Error::Config(errors.join("; ")));
        }

        config.resolve_paths()?;
        Ok(config)
    }

    /// Parse YAML and apply overrides without validating
    pub fn parse_with_env<I>(content: &str, vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut document: Value = serde_yaml::from_str(content)
            .map_err(|e| Error::Config(format!("YAML syntax error: {}", e)))?;
        if document.is_null() {
            document = Value::Mapping(Mapping::new());
        }

        for (key, value) in vars {
            apply_override(&mut document, &key, &value);
        }

        serde_yaml::from_value(document).map_err(|e| Error::Config(e.to_string()))
    }

    /// Validate configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        let missing: Vec<&str> = REQUIRED_SITE_FIELDS
            .iter()
            .copied()
            .filter(|field| !self.site.contains_key(*field))
            .collect();
        if !missing.is_empty() {
            errors.push(format!("site section must contain: {}", missing.join(", ")));
        }

        let private_key = expand_tilde(&self.ssh.private_key_path);
        if !private_key.exists() {
            errors.push(format!("ssh.private_key_path {} does not exist", private_key.display()));
        }
        if let Some(public_key) = &self.ssh.public_key_path {
            let public_key = expand_tilde(public_key);
            if !public_key.exists() {
                errors.push(format!("ssh.public_key_path {} does not exist", public_key.display()));
            }
        }

        if !self.files.remote_path.starts_with('/') {
            errors.push(format!(
                "files.remote_path must be absolute, got {}",
                self.files.remote_path
            ));
        }

        if !COMPRESSION_METHODS.contains(&self.backup.compression.as_str()) {
            errors.push(format!(
                "backup.compression must be one of {}, got {}",
                COMPRESSION_METHODS.join(", "),
                self.backup.compression
            ));
        }

        if self.backup.retention_days < 1 || self.backup.retention_days > MAX_RETENTION_DAYS {
            errors.push(format!(
                "backup.retention_days must be between 1 and {}",
                MAX_RETENTION_DAYS
            ));
        }

        let prefix_len = self.backup.prefix.chars().count();
        if prefix_len == 0 || prefix_len > MAX_PREFIX_LEN {
            errors.push(format!(
                "backup.prefix must be 1 to {} characters",
                MAX_PREFIX_LEN
            ));
        }

        errors
    }

    /// Expand `~` in key paths and create the backup destination
    fn resolve_paths(&mut self) -> Result<()> {
        self.ssh.private_key_path = expand_tilde(&self.ssh.private_key_path);
        self.ssh.public_key_path = self.ssh.public_key_path.as_deref().map(expand_tilde);

        let destination = expand_tilde(&self.backup.destination);
        fs::create_dir_all(&destination)
            .map_err(|e| Error::io(format!("creating {}", destination.display()), e))?;
        self.backup.destination = destination;
        Ok(())
    }

    /// Dumps are gzipped unless compression is switched off
    pub fn compress_dumps(&self) -> bool {
        self.backup.compression != "none"
    }

    pub fn ssh_params(&self, passphrase: Option<String>, connect_timeout: Duration) -> SshParams {
        SshParams {
            host: self.ssh.host.clone(),
            port: self.ssh.port,
            user: self.ssh.user.clone(),
            private_key: self.ssh.private_key_path.clone(),
            passphrase,
            connect_timeout,
        }
    }

    pub fn database_credentials(&self) -> StaticCredentials {
        StaticCredentials::new(
            self.database.name.clone(),
            self.database.user.clone(),
            self.database.password.clone(),
        )
    }

    /// Section-by-section view for display, password masked unless asked
    pub fn summary(&self, show_secrets: bool) -> Vec<(&'static str, Vec<(String, String)>)> {
        let password = if show_secrets {
            self.database.password.clone()
        } else {
            mask_sensitive(&self.database.password, 2)
        };

        let mut sections = vec![
            (
                "site",
                self.site.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            ),
            (
                "ssh",
                vec![
                    ("host".to_string(), self.ssh.host.clone()),
                    ("user".to_string(), self.ssh.user.clone()),
                    ("port".to_string(), self.ssh.port.to_string()),
                    (
                        "private_key_path".to_string(),
                        self.ssh.private_key_path.display().to_string(),
                    ),
                ],
            ),
            (
                "files",
                vec![
                    ("remote_path".to_string(), self.files.remote_path.clone()),
                    ("include_patterns".to_string(), self.files.include_patterns.join(", ")),
                    ("exclude_patterns".to_string(), self.files.exclude_patterns.join(", ")),
                ],
            ),
            (
                "database",
                vec![
                    ("host".to_string(), self.database.host.clone()),
                    ("port".to_string(), self.database.port.to_string()),
                    ("name".to_string(), self.database.name.clone()),
                    ("user".to_string(), self.database.user.clone()),
                    ("password".to_string(), password),
                ],
            ),
            (
                "backup",
                vec![
                    ("destination".to_string(), self.backup.destination.display().to_string()),
                    ("compression".to_string(), self.backup.compression.clone()),
                    ("retention_days".to_string(), self.backup.retention_days.to_string()),
                    ("prefix".to_string(), self.backup.prefix.clone()),
                ],
            ),
        ];

        if let Some(options) = &self.options {
            sections.push((
                "options",
                options
                    .iter()
                    .map(|(k, v)| (k.clone(), yaml_scalar(v)))
                    .collect(),
            ));
        }

        sections
    }
}

/// Write the bundled example configuration, refusing to overwrite unless forced
pub fn write_example(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        return Err(Error::Config(format!(
            "{} already exists (use --force to overwrite)",
            path.display()
        )));
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .map_err(|e| Error::io(format!("creating {}", parent.display()), e))?;
    }
    fs::write(path, EXAMPLE_CONFIG).map_err(|e| Error::io(format!("writing {}", path.display()), e))
}

/// `BACKUP_SITE_DATABASE__PASSWORD=x` sets `database.password`
fn apply_override(document: &mut Value, key: &str, raw: &str) {
    let Some(rest) = key.strip_prefix(ENV_PREFIX) else {
        return;
    };
    let Some((section, field)) = rest.split_once(ENV_NESTING) else {
        return;
    };
    let (section, field) = (section.to_lowercase(), field.to_lowercase());
    if section.is_empty() || field.is_empty() {
        return;
    }

    let Value::Mapping(root) = document else {
        return;
    };
    let section = Value::String(section);
    if !matches!(root.get(&section), Some(Value::Mapping(_))) {
        root.insert(section.clone(), Value::Mapping(Mapping::new()));
    }
    let Some(Value::Mapping(section_map)) = root.get_mut(&section) else {
        return;
    };

    let value = match raw.parse::<u64>() {
        Ok(number) if NUMERIC_FIELDS.contains(&field.as_str()) => Value::Number(number.into()),
        _ => Value::String(raw.to_string()),
    };
    section_map.insert(Value::String(field), value);
}

fn yaml_scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Null => String::new(),
        other => serde_yaml::to_string(other)
            .map(|s| s.trim().to_string())
            .unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn site_yaml(key: &Path, destination: &Path) -> String {
        format!(
            r#"site:
  name: shop
  provider: ovh
  app_type: wordpress
ssh:
  host: example.org
  user: deploy
  private_key_path: {}
files:
  remote_path: /var/www/html
  exclude_patterns: ["cache"]
database:
  host: localhost
  name: shop
  user: shop_user
  password: hunter22
backup:
  destination: {}
  prefix: shop
"#,
            key.display(),
            destination.display()
        )
    }

    fn no_env() -> Vec<(String, String)> {
        Vec::new()
    }

    #[test]
    fn test_load_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let key = NamedTempFile::new().unwrap();
        let destination = dir.path().join("out");
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", site_yaml(key.path(), &destination)).unwrap();

        let config = SiteConfig::load_with_env(file.path(), no_env()).unwrap();

        assert_eq!(config.ssh.port, 22);
        assert_eq!(config.database.port, 3306);
        assert_eq!(config.backup.compression, "gzip");
        assert_eq!(config.backup.retention_days, 30);
        assert!(config.files.include_patterns.is_empty());
        assert!(config.compress_dumps());
        assert!(destination.is_dir());
    }

    #[test]
    fn test_env_overrides_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let key = NamedTempFile::new().unwrap();
        let content = site_yaml(key.path(), &dir.path().join("out"));

        let vars = vec![
            ("BACKUP_SITE_DATABASE__PASSWORD".to_string(), "12345".to_string()),
            ("BACKUP_SITE_SSH__PORT".to_string(), "2222".to_string()),
            ("BACKUP_SITE_BACKUP__COMPRESSION".to_string(), "none".to_string()),
            ("UNRELATED".to_string(), "x".to_string()),
        ];
        let config = SiteConfig::parse_with_env(&content, vars).unwrap();

        assert_eq!(config.database.password, "12345");
        assert_eq!(config.ssh.port, 2222);
        assert!(!config.compress_dumps());
    }

    #[test]
    fn test_validation_collects_errors() {
        let dir = tempfile::tempdir().unwrap();
        let content = site_yaml(&dir.path().join("missing_key"), &dir.path().join("out"))
            .replace("  app_type: wordpress\n", "")
            .replace("remote_path: /var/www/html", "remote_path: www")
            .replace("prefix: shop", "prefix: shop\n  compression: zip\n  retention_days: 0");

        let config = SiteConfig::parse_with_env(&content, no_env()).unwrap();
        let errors = config.validate();

        assert_eq!(errors.len(), 5);
        assert!(errors[0].contains("app_type"));
        assert!(errors[1].contains("private_key_path"));
        assert!(errors[2].contains("absolute"));
        assert!(errors[3].contains("compression"));
        assert!(errors[4].contains("retention_days"));
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = SiteConfig::load_with_env(dir.path().join("site.yaml"), no_env()).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn test_summary_masks_password() {
        let dir = tempfile::tempdir().unwrap();
        let key = NamedTempFile::new().unwrap();
        let config =
            SiteConfig::parse_with_env(&site_yaml(key.path(), dir.path()), no_env()).unwrap();

        let database = |show| {
            config
                .summary(show)
                .into_iter()
                .find(|(name, _)| *name == "database")
                .unwrap()
                .1
        };
        assert!(!database(false).iter().any(|(_, v)| v == "hunter22"));
        assert!(database(true).iter().any(|(_, v)| v == "hunter22"));
        assert!(!format!("{:?}", config.database).contains("hunter22"));
    }

    #[test]
    fn test_example_config_parses() {
        let config = SiteConfig::parse_with_env(EXAMPLE_CONFIG, no_env()).unwrap();
        assert!(config.site.contains_key("name"));
        assert!(config.files.remote_path.starts_with('/'));
    }

    #[test]
    fn test_write_example_refuses_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("site.yaml");

        write_example(&path, false).unwrap();
        assert!(write_example(&path, false).is_err());
        write_example(&path, true).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), EXAMPLE_CONFIG);
    }
}
