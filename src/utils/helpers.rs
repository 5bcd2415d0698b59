/// Helper utilities for the backup-site CLI

use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};

use crate::utils::constants::{ARCHIVE_EXTENSION, DUMP_EXTENSION, GZIP_EXTENSION, TIMESTAMP_FORMAT};

/// Expand a leading `~` to the user's home directory
pub fn expand_tilde(path: &Path) -> PathBuf {
    let Ok(rest) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };
    match dirs::home_dir() {
        Some(home) => home.join(rest),
        None => path.to_path_buf(),
    }
}

/// Timestamp used in generated file names, e.g. `20240131_142501`
pub fn file_timestamp(now: DateTime<Local>) -> String {
    now.format(TIMESTAMP_FORMAT).to_string()
}

/// `<dir>/<prefix>_<timestamp>.tar.gz`
pub fn archive_file_name(dir: &Path, prefix: &str, now: DateTime<Local>) -> PathBuf {
    dir.join(format!("{}_{}.{}", prefix, file_timestamp(now), ARCHIVE_EXTENSION))
}

/// `<dir>/<prefix>_database_<timestamp>.sql[.gz]`
pub fn dump_file_name(dir: &Path, prefix: &str, compressed: bool, now: DateTime<Local>) -> PathBuf {
    let mut name = format!("{}_database_{}.{}", prefix, file_timestamp(now), DUMP_EXTENSION);
    if compressed {
        name.push('.');
        name.push_str(GZIP_EXTENSION);
    }
    dir.join(name)
}

/// Format bytes to human-readable size
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    if unit_index == 0 {
        format!("{} {}", bytes, UNITS[unit_index])
    } else {
        format!("{:.2} {}", size, UNITS[unit_index])
    }
}

/// Format elapsed seconds to human-readable string
pub fn format_duration(seconds: u64) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;

    if hours > 0 {
        format!("{}h {}m", hours, minutes)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, secs)
    } else {
        format!("{}s", secs)
    }
}

/// Mask sensitive data (show only first and last N characters)
pub fn mask_sensitive(value: &str, visible_chars: usize) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() <= visible_chars * 2 {
        "*".repeat(chars.len())
    } else {
        let start: String = chars[..visible_chars].iter().collect();
        let end: String = chars[chars.len() - visible_chars..].iter().collect();
        format!("{}...{}", start, end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fixed_time() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 1, 31, 14, 25, 1).unwrap()
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(1024), "1.00 KB");
        assert_eq!(format_bytes(1048576), "1.00 MB");
        assert_eq!(format_bytes(1073741824), "1.00 GB");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(30), "30s");
        assert_eq!(format_duration(90), "1m 30s");
        assert_eq!(format_duration(3661), "1h 1m");
    }

    #[test]
    fn test_mask_sensitive() {
        assert_eq!(mask_sensitive("5e7f294e4c92a9aa661fae8d347d832d", 4), "5e7f...832d");
        assert_eq!(mask_sensitive("short", 4), "*****");
    }

    #[test]
    fn test_expand_tilde() {
        assert_eq!(expand_tilde(Path::new("/etc/hosts")), PathBuf::from("/etc/hosts"));
        assert_eq!(expand_tilde(Path::new("keys/id")), PathBuf::from("keys/id"));
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_tilde(Path::new("~/.ssh/id_rsa")), home.join(".ssh/id_rsa"));
        }
    }

    #[test]
    fn test_generated_file_names() {
        let dir = Path::new("backups");
        assert_eq!(
            archive_file_name(dir, "shop", fixed_time()),
            PathBuf::from("backups/shop_20240131_142501.tar.gz")
        );
        assert_eq!(
            dump_file_name(dir, "shop", true, fixed_time()),
            PathBuf::from("backups/shop_database_20240131_142501.sql.gz")
        );
        assert_eq!(
            dump_file_name(dir, "shop", false, fixed_time()),
            PathBuf::from("backups/shop_database_20240131_142501.sql")
        );
    }
}
