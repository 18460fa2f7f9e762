//! Filesystem utility functions
//!
//! This module provides utility functions for filesystem operations.

use std::fs;
use std::path::Path;

use super::error::{DevproxyError, Result};

/// Check if a file exists
pub fn check_file_exists(path: &Path) -> Result<()> {
    if !path.exists() {
        return Err(DevproxyError::Config(format!("File does not exist: {:?}", path)));
    }

    if !path.is_file() {
        return Err(DevproxyError::Config(format!("Path is not a file: {:?}", path)));
    }

    Ok(())
}

/// Read file content
pub fn read_file(path: &Path) -> Result<Vec<u8>> {
    check_file_exists(path)?;
    fs::read(path).map_err(DevproxyError::Io)
}

/// Write a file with mode `0600` (owner read/write only).
///
/// Used for the CA and leaf private keys. Creates parent directories if
/// needed. On non-Unix targets the permission bits are a no-op.
pub fn write_private_file(path: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, contents)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_check_file_exists() {
        let path = PathBuf::from("Cargo.toml");
        let result = check_file_exists(&path);
        assert!(result.is_ok(), "Should be able to check an existing file");

        let path = PathBuf::from("non_existent_file.txt");
        let result = check_file_exists(&path);
        assert!(result.is_err(), "Should fail when checking a non-existent file");
    }

    #[test]
    fn test_write_private_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("key.pem");
        write_private_file(&path, b"secret").unwrap();

        let content = read_file(&path).unwrap();
        assert_eq!(content, b"secret");

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
            assert_eq!(mode, 0o600);
        }
    }
}
