/// Remote command rendering
///
/// Every function here is pure: it turns a descriptor into the single shell
/// string handed to the remote shell (or to `bash -c` inside a container).
/// Paths are shell-quoted; nothing is executed.

use std::path::Path;

use crate::core::credentials::DbCredentials;

/// Streaming pipe used for compressed dumps and archives.
pub const COMPRESS_PIPE: &str = "| gzip";

/// Remote directory used for staged artifacts.
pub const STAGING_DIR: &str = "/tmp";

/// Descriptor for a filtered file archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveCommand<'a> {
    pub remote_path: &'a str,
    pub include_patterns: &'a [String],
    pub exclude_patterns: &'a [String],
}

impl ArchiveCommand<'_> {
    /// `find` lists regular files, exclusions are applied first, then the
    /// optional inclusion disjunction, and `tar` reads the names from stdin so
    /// that GNU and BusyBox tar both work.
    pub fn render(&self) -> String {
        let mut cmd = format!("cd {} && find . -type f", shell_quote(self.remote_path));

        for pattern in self.exclude_patterns {
            cmd.push_str(&format!(" ! -path '*{}*'", pattern));
        }

        if !self.include_patterns.is_empty() {
            let conditions = self
                .include_patterns
                .iter()
                .map(|pattern| format!("-path '*{}*'", pattern))
                .collect::<Vec<_>>()
                .join(" -o ");
            cmd.push_str(&format!(" \\( {} \\)", conditions));
        }

        cmd.push_str(" | tar -czf - -T -");
        cmd
    }
}

/// Descriptor for a `mysqldump` invocation.
#[derive(Debug, Clone)]
pub struct DumpCommand<'a> {
    pub host: &'a str,
    pub port: u16,
    pub credentials: &'a DbCredentials,
    pub compress: bool,
    pub ssl: bool,
}

impl DumpCommand<'_> {
    pub fn render(&self) -> String {
        let mut parts = vec![
            "mysqldump".to_string(),
            format!("-h {}", self.host),
            format!("-P {}", self.port),
            format!("-u {}", self.credentials.user),
            format!("-p{}", shell_quote(&self.credentials.password)),
        ];

        if !self.ssl {
            parts.push("--ssl=0".to_string());
        }

        parts.extend(
            [
                "--routines",
                "--triggers",
                "--events",
                "--complete-insert",
                "--extended-insert",
                "--disable-keys",
                "--quick",
            ]
            .iter()
            .map(|flag| flag.to_string()),
        );
        parts.push(self.credentials.name.clone());

        if self.compress {
            parts.push(COMPRESS_PIPE.to_string());
        }

        parts.join(" ")
    }
}

/// Database client used to load a dump.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlClient {
    /// `mysql` reaching a server over TCP (remote hosts).
    Mysql { host: String, port: u16 },
    /// `mariadb` talking to the local server (database containers).
    Mariadb,
}

impl SqlClient {
    fn invocation(&self, credentials: &DbCredentials) -> String {
        let password = shell_quote(&credentials.password);
        match self {
            SqlClient::Mysql { host, port } => format!(
                "mysql -h {} -P {} -u {} -p{} {}",
                host, port, credentials.user, password, credentials.name
            ),
            SqlClient::Mariadb => format!(
                "mariadb -u {} -p{} {}",
                credentials.user, password, credentials.name
            ),
        }
    }
}

/// Descriptor for feeding a staged dump into a database client.
#[derive(Debug, Clone)]
pub struct LoadCommand<'a> {
    pub client: &'a SqlClient,
    pub credentials: &'a DbCredentials,
    pub dump_file: &'a str,
    pub compressed: bool,
}

impl LoadCommand<'_> {
    pub fn render(&self) -> String {
        let client = self.client.invocation(self.credentials);
        let dump_file = shell_quote(self.dump_file);
        if self.compressed {
            format!("gunzip < {} | {}", dump_file, client)
        } else {
            format!("{} < {}", client, dump_file)
        }
    }
}

/// `tar` extraction of a staged archive into `destination`.
pub fn extract_command(archive: &str, destination: &str) -> String {
    format!("tar -xzf {} -C {}", shell_quote(archive), shell_quote(destination))
}

/// Removal of a staged artifact.
pub fn cleanup_command(path: &str) -> String {
    format!("rm -f {}", shell_quote(path))
}

/// Predictable staging path for a local artifact: `/tmp/<basename>`.
pub fn staging_path(local: &Path) -> String {
    let name = local
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "artifact".to_string());
    format!("{}/{}", STAGING_DIR, name)
}

/// Dumps are detected as compressed purely by their `.gz` suffix.
pub fn is_compressed(path: &Path) -> bool {
    path.extension().map(|ext| ext == "gz").unwrap_or(false)
}

/// SQL creating the database and granting the application user access.
pub fn provision_sql(credentials: &DbCredentials) -> String {
    format!(
        "CREATE DATABASE IF NOT EXISTS {name}; \
         GRANT ALL PRIVILEGES ON {name}.* TO '{user}'@'%' {grant}; \
         FLUSH PRIVILEGES;",
        name = credentials.name,
        user = credentials.user,
        grant = identified_by(&credentials.password),
    )
}

fn identified_by(password: &str) -> String {
    format!("IDENTIFIED BY '{}'", password.replace('\'', "''"))
}

/// Root-level `mariadb -e` running [`provision_sql`] inside a database
/// container.
pub fn provision_command(root_password: &str, credentials: &DbCredentials) -> String {
    format!(
        "mariadb -u root -p{} -e {}",
        shell_quote(root_password),
        shell_quote(&provision_sql(credentials))
    )
}

/// Quote `value` for a POSIX shell, leaving plain words untouched.
pub fn shell_quote(value: &str) -> String {
    let plain = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_-.,:/@%+=".contains(c));
    if plain {
        value.to_string()
    } else {
        format!("'{}'", escape_single_quotes(value))
    }
}

/// Hide an inline `-p<password>` and the `IDENTIFIED BY` clause of the
/// provisioning SQL before a command is logged. Other text is left as is.
pub fn redact(command: &str, password: &str) -> String {
    if password.is_empty() {
        return command.to_string();
    }
    let grant = identified_by(password);
    let masked = identified_by("****");
    command
        .replace(&format!("-p{}", shell_quote(password)), "-p****")
        .replace(&escape_single_quotes(&grant), &escape_single_quotes(&masked))
        .replace(&grant, &masked)
}

/// Body of a single-quoted shell word.
fn escape_single_quotes(value: &str) -> String {
    value.replace('\'', "'\\''")
}
