//! Vault fixture builders for tests
//!
//! Provides functions to create temporary source roots populated with
//! markdown notes for integration testing.

use assert_fs::TempDir;
use std::fs;
use std::path::Path;

/// Create an empty temporary vault.
///
/// The directory is cleaned up when the `TempDir` drops.
pub fn temp_vault() -> TempDir {
    TempDir::new().expect("failed to create temp vault")
}

/// Create a vault populated with the given (relative path, content) notes.
///
/// # Example
///
/// ```rust
/// use roux_test_helpers::vault::vault_with_files;
///
/// let vault = vault_with_files(&[
///     ("a.md", "links to [[b]]"),
///     ("notes/b.md", "---\ntitle: B\n---\nbody"),
/// ]);
/// assert!(vault.path().join("notes/b.md").exists());
/// ```
pub fn vault_with_files(files: &[(&str, &str)]) -> TempDir {
    let vault = temp_vault();
    for (rel, content) in files {
        write_note(vault.path(), rel, content);
    }
    vault
}

/// Write one note into an existing vault, creating parent directories.
pub fn write_note(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("failed to create note directory");
    }
    fs::write(&path, content).expect("failed to write note");
}
