//! Credential removal persisted back to the configuration file.
//!
//! When the engine drops a credential, the pool in memory and the pool on
//! disk have to agree, otherwise the next run starts with a known-bad
//! credential again.

use std::{
    fs::{self, File, OpenOptions},
    io,
    path::PathBuf,
};

use postrider_common::{CredentialKey, collab::PoolStore};

use crate::config::Config;

/// Rewrites the configuration file without removed credentials.
///
/// Takes the same lock, temp file, and rename path as the engine's
/// preference store, so concurrent writers never leave a torn file behind.
#[derive(Debug)]
pub struct FilePoolStore {
    path: PathBuf,
}

impl FilePoolStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn lock_handle(&self) -> io::Result<File> {
        OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(self.sibling(".lock_"))
    }

    fn sibling(&self, prefix: &str) -> PathBuf {
        let name = self.path.file_name().map_or_else(
            || format!("{prefix}config"),
            |name| format!("{prefix}{}", name.to_string_lossy()),
        );
        self.path.with_file_name(name)
    }
}

impl PoolStore for FilePoolStore {
    fn remove(&self, key: &CredentialKey) -> io::Result<()> {
        let lock = self.lock_handle()?;
        fs2::FileExt::lock_exclusive(&lock)?;

        let raw = fs::read_to_string(&self.path)?;
        let mut config: Config = toml::from_str(&raw)
            .map_err(|error| io::Error::new(io::ErrorKind::InvalidData, error))?;

        let before = config.credentials.len();
        config
            .credentials
            .retain(|credential| credential.key() != *key);
        if config.credentials.len() == before {
            return Ok(());
        }

        let serialized = toml::to_string_pretty(&config)
            .map_err(|error| io::Error::new(io::ErrorKind::InvalidData, error))?;
        let tmp = self.sibling(".tmp_");
        fs::write(&tmp, serialized)?;
        fs::rename(&tmp, &self.path)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    const TWO_CREDENTIALS: &str = r#"
        [engine]
        retry_limit = 7

        [[credential]]
        host = "smtp.example.com"
        username = "mailer"
        password = "pw"
        from_address = "mailer@example.com"

        [[credential]]
        host = "smtp.backup.example"
        username = "fallback"
        password = "pw2"
        from_address = "mailer@example.com"
    "#;

    #[test]
    fn test_remove_rewrites_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("postrider.toml");
        fs::write(&path, TWO_CREDENTIALS).unwrap();

        let store = FilePoolStore::new(&path);
        store
            .remove(&CredentialKey::new("smtp.example.com", "mailer"))
            .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.credentials.len(), 1);
        assert_eq!(config.credentials[0].username, "fallback");
        assert_eq!(config.engine.retry_limit, 7);
    }

    #[test]
    fn test_remove_unknown_key_changes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("postrider.toml");
        fs::write(&path, TWO_CREDENTIALS).unwrap();

        let store = FilePoolStore::new(&path);
        store
            .remove(&CredentialKey::new("absent.example", "nobody"))
            .unwrap();

        let raw = fs::read_to_string(&path).unwrap();
        assert_eq!(raw, TWO_CREDENTIALS);
    }

    #[test]
    fn test_remove_on_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilePoolStore::new(dir.path().join("gone.toml"));

        let error = store
            .remove(&CredentialKey::new("smtp.example.com", "mailer"))
            .unwrap_err();
        assert_eq!(error.kind(), io::ErrorKind::NotFound);
    }
}
