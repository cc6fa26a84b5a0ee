// src/path.rs

//! Path validation for untrusted names
//!
//! Two kinds of names arrive from the network: archive entry paths and
//! package ids (which become directory names under the output root). Both
//! are checked here before they touch the filesystem.

use crate::archive::{MARKER_FILE, STAGING_DIR};
use crate::error::{Error, Result};
use crate::lock::InstanceLock;
use std::path::PathBuf;

/// Characters that are never valid in a file name on any supported platform
const ILLEGAL_CHARS: &[char] = &['"', '*', ':', '<', '>', '?', '|'];

/// Device names reserved by Windows, with or without an extension
const RESERVED_NAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

fn has_illegal_char(name: &str) -> bool {
    name.chars().any(|c| c.is_control() || ILLEGAL_CHARS.contains(&c))
}

/// Normalize an archive entry name into a relative path
///
/// Both `/` and `\` separate components. `.` components are dropped and
/// `..` pops the previous component; the entry is rejected with
/// [`Error::UnsafeEntryName`] when it is absolute, when a `..` would climb
/// above the archive root, when it contains characters illegal on the
/// target filesystem, or when nothing is left after normalization.
///
/// # Examples
///
/// ```
/// use levelsync::path::sanitize_entry_path;
/// use std::path::PathBuf;
///
/// assert_eq!(sanitize_entry_path("a/b/c.txt").unwrap(), PathBuf::from("a/b/c.txt"));
/// assert_eq!(sanitize_entry_path("a/./x/../b").unwrap(), PathBuf::from("a/b"));
///
/// assert!(sanitize_entry_path("../../etc/passwd").is_err());
/// assert!(sanitize_entry_path("C:\\Windows\\x").is_err());
/// assert!(sanitize_entry_path("/etc/passwd").is_err());
/// ```
pub fn sanitize_entry_path(name: &str) -> Result<PathBuf> {
    let unsafe_name = || Error::UnsafeEntryName(name.to_string());

    if has_illegal_char(name) || name.starts_with(['/', '\\']) {
        return Err(unsafe_name());
    }

    let mut components: Vec<&str> = Vec::new();
    for component in name.split(['/', '\\']) {
        match component {
            "" | "." => {}
            ".." => {
                if components.pop().is_none() {
                    return Err(unsafe_name());
                }
            }
            normal => components.push(normal),
        }
    }

    if components.is_empty() {
        return Err(unsafe_name());
    }

    Ok(components.iter().collect())
}

/// Check that a package id is usable as a single directory name
///
/// Rejects path separators, control and reserved characters, `.` and `..`,
/// Windows device names, names ending in a dot or space, and the names of
/// the marker, staging directory and lock file kept in the output root.
///
/// # Examples
///
/// ```
/// use levelsync::path::validate_package_id;
///
/// assert!(validate_package_id("a1B2c3").is_ok());
/// assert!(validate_package_id("../x").is_err());
/// assert!(validate_package_id("nul.txt").is_err());
/// assert!(validate_package_id(".levelsync.lock").is_err());
/// ```
pub fn validate_package_id(id: &str) -> Result<()> {
    let invalid = |reason: &str| Err(Error::InvalidPath(format!("'{}': {}", id, reason)));

    if id.is_empty() {
        return invalid("empty name");
    }
    if id == "." || id == ".." {
        return invalid("relative directory name");
    }
    if id.contains(['/', '\\']) {
        return invalid("contains a path separator");
    }
    if has_illegal_char(id) {
        return invalid("contains a reserved character");
    }
    if id.ends_with(['.', ' ']) {
        return invalid("ends with a dot or space");
    }

    let own = [MARKER_FILE, STAGING_DIR, InstanceLock::FILE_NAME];
    if own.iter().any(|name| name.eq_ignore_ascii_case(id)) {
        return invalid("reserved for levelsync");
    }

    let stem = id.split('.').next().unwrap_or(id).trim_end();
    if RESERVED_NAMES.iter().any(|reserved| reserved.eq_ignore_ascii_case(stem)) {
        return invalid("reserved device name");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_path_normal() {
        assert_eq!(sanitize_entry_path("a/b/c.txt").unwrap(), PathBuf::from("a/b/c.txt"));
        assert_eq!(sanitize_entry_path("level.rdlevel").unwrap(), PathBuf::from("level.rdlevel"));
        assert_eq!(sanitize_entry_path("dir/").unwrap(), PathBuf::from("dir"));
    }

    #[test]
    fn test_entry_path_backslash_separators() {
        assert_eq!(sanitize_entry_path("a\\b\\c.png").unwrap(), PathBuf::from("a/b/c.png"));
    }

    #[test]
    fn test_entry_path_dot_components() {
        assert_eq!(sanitize_entry_path("./a/./b").unwrap(), PathBuf::from("a/b"));
        assert_eq!(sanitize_entry_path("a/x/../b").unwrap(), PathBuf::from("a/b"));
    }

    #[test]
    fn test_entry_path_traversal_rejected() {
        assert!(matches!(
            sanitize_entry_path("../../etc/passwd"),
            Err(Error::UnsafeEntryName(name)) if name == "../../etc/passwd"
        ));
        assert!(sanitize_entry_path("..").is_err());
        assert!(sanitize_entry_path("a/../../b").is_err());
        assert!(sanitize_entry_path("..\\windows").is_err());
    }

    #[test]
    fn test_entry_path_absolute_rejected() {
        assert!(sanitize_entry_path("/etc/passwd").is_err());
        assert!(sanitize_entry_path("\\\\server\\share").is_err());
        assert!(sanitize_entry_path("C:\\Windows\\x").is_err());
        assert!(sanitize_entry_path("C:/Windows/x").is_err());
    }

    #[test]
    fn test_entry_path_illegal_chars_rejected() {
        assert!(sanitize_entry_path("a\0b").is_err());
        assert!(sanitize_entry_path("a\nb").is_err());
        assert!(sanitize_entry_path("what?.txt").is_err());
        assert!(sanitize_entry_path("a|b").is_err());
        assert!(sanitize_entry_path("\"quoted\"").is_err());
    }

    #[test]
    fn test_entry_path_empty_rejected() {
        assert!(sanitize_entry_path("").is_err());
        assert!(sanitize_entry_path("./").is_err());
        assert!(sanitize_entry_path("a/..").is_err());
    }

    #[test]
    fn test_package_id_valid() {
        assert!(validate_package_id("ZVdLPXhe7AD").is_ok());
        assert!(validate_package_id("some level").is_ok());
        assert!(validate_package_id(".hidden").is_ok());
        assert!(validate_package_id("console").is_ok());
    }

    #[test]
    fn test_package_id_invalid() {
        assert!(validate_package_id("").is_err());
        assert!(validate_package_id(".").is_err());
        assert!(validate_package_id("..").is_err());
        assert!(validate_package_id("a/b").is_err());
        assert!(validate_package_id("a\\b").is_err());
        assert!(validate_package_id("a\tb").is_err());
        assert!(validate_package_id("a:b").is_err());
        assert!(validate_package_id("trailing.").is_err());
        assert!(validate_package_id("trailing ").is_err());
    }

    #[test]
    fn test_package_id_reserved_device_names() {
        assert!(validate_package_id("CON").is_err());
        assert!(validate_package_id("con").is_err());
        assert!(validate_package_id("Com1").is_err());
        assert!(validate_package_id("LPT9.zip").is_err());
        assert!(validate_package_id("aux .txt").is_err());
    }

    #[test]
    fn test_package_id_tool_names_rejected() {
        for id in [".levelsync", ".levelsync.tmp", ".levelsync.lock", ".LevelSync.TMP"] {
            assert!(
                matches!(validate_package_id(id), Err(Error::InvalidPath(ref m)) if m.contains("reserved for levelsync")),
                "{id} accepted"
            );
        }
        assert!(validate_package_id(".levelsync2").is_ok());
    }
}
