//! Lexical checks for paths that must stay on the encrypted mount.

use camino::{Utf8Component, Utf8Path};

use crate::ConfigError;

/// Rejects relative paths and paths with `..` components.
pub fn ensure_absolute(name: &'static str, path: &Utf8Path) -> Result<(), ConfigError> {
    if !path.is_absolute() {
        return Err(ConfigError::RelativePath {
            name,
            path: path.to_path_buf(),
        });
    }
    if path
        .components()
        .any(|component| component == Utf8Component::ParentDir)
    {
        return Err(ConfigError::ParentTraversal {
            name,
            path: path.to_path_buf(),
        });
    }
    Ok(())
}

/// Ensures `path` is an absolute, traversal-free path under `root`.
///
/// The check is purely lexical: symlinks are not resolved, so the secure
/// root itself must not be reachable through a link planted elsewhere.
pub fn ensure_within(
    name: &'static str,
    path: &Utf8Path,
    root: &Utf8Path,
) -> Result<(), ConfigError> {
    ensure_absolute(name, path)?;
    if path.starts_with(root) {
        Ok(())
    } else {
        Err(ConfigError::OutsideSecureRoot {
            name,
            path: path.to_path_buf(),
            root: root.to_path_buf(),
        })
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("/app/wallet/mysql-keys/server-key.pem")]
    #[case("/app/wallet")]
    fn accepts_paths_under_root(#[case] path: &str) {
        ensure_within("key", Utf8Path::new(path), Utf8Path::new("/app/wallet"))
            .expect("path should be accepted");
    }

    #[rstest]
    #[case("/tmp/server-key.pem")]
    #[case("/app/wallet-other/key.pem")]
    fn rejects_paths_outside_root(#[case] path: &str) {
        let error = ensure_within("key", Utf8Path::new(path), Utf8Path::new("/app/wallet"))
            .expect_err("path should be rejected");
        assert!(matches!(error, ConfigError::OutsideSecureRoot { .. }));
    }

    #[test]
    fn rejects_traversal_even_when_prefix_matches() {
        let error = ensure_within(
            "data",
            Utf8Path::new("/app/wallet/../etc"),
            Utf8Path::new("/app/wallet"),
        )
        .expect_err("traversal should be rejected");
        assert!(matches!(error, ConfigError::ParentTraversal { .. }));
    }

    #[test]
    fn rejects_relative_paths() {
        let error = ensure_within("data", Utf8Path::new("mysql-data"), Utf8Path::new("/app"))
            .expect_err("relative path should be rejected");
        assert!(matches!(error, ConfigError::RelativePath { .. }));
    }
}
