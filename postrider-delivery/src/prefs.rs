//! Durable endpoint preferences.
//!
//! Once a send succeeds, the engine remembers which encryption mode worked
//! for that host and port. Later runs skip the negotiation walk entirely
//! and connect the way that worked last time.
//!
//! The store is a small TOML file keyed by `host:port`. Writes go through
//! a read-merge-write cycle under an advisory lock on a `.lock_` sibling,
//! then replace the file atomically via a `.tmp_` sibling rename, so
//! several sender processes can share one preference file without
//! clobbering each other. The lock lives on a sidecar because renaming
//! over the data file itself would orphan any lock held on it.

use std::{
    collections::BTreeMap,
    fs::{self, File, OpenOptions},
    io,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use postrider_common::Encryption;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// What worked for one `host:port`, and when it was learned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointPreference {
    pub encryption: Encryption,
    pub updated_at: DateTime<Utc>,
}

/// File-backed map of learned endpoint preferences.
#[derive(Debug)]
pub struct PreferenceStore {
    path: PathBuf,
    cache: parking_lot::Mutex<Option<BTreeMap<String, EndpointPreference>>>,
}

impl PreferenceStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cache: parking_lot::Mutex::new(None),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn preference_key(host: &str, port: u16) -> String {
        format!("{host}:{port}")
    }

    /// The encryption mode that last worked for `host:port`, if any.
    pub fn get(&self, host: &str, port: u16) -> Option<Encryption> {
        let key = Self::preference_key(host, port);
        let mut cache = self.cache.lock();

        self.ensure_loaded(&mut cache)
            .get(&key)
            .map(|preference| preference.encryption)
    }

    /// All learned preferences, sorted by key.
    pub fn entries(&self) -> Vec<(String, EndpointPreference)> {
        let mut cache = self.cache.lock();

        self.ensure_loaded(&mut cache)
            .iter()
            .map(|(key, preference)| (key.clone(), *preference))
            .collect()
    }

    /// Records that `encryption` worked for `host:port`.
    ///
    /// Returns `Ok(true)` when the file was rewritten, `Ok(false)` when the
    /// stored preference already matched and the write was skipped.
    pub fn set(&self, host: &str, port: u16, encryption: Encryption) -> Result<bool> {
        let key = Self::preference_key(host, port);

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        // The advisory lock must never be held while taking the cache
        // mutex; readers take them in the opposite order.
        let (entries, changed) = {
            let lock = self.lock_handle()?;
            fs2::FileExt::lock_exclusive(&lock)?;

            // Merge with whatever another process wrote meanwhile.
            let mut entries: BTreeMap<String, EndpointPreference> =
                match fs::read_to_string(&self.path) {
                    Ok(raw) => toml::from_str(&raw).unwrap_or_else(|error| {
                        tracing::warn!(
                            path = %self.path.display(),
                            %error,
                            "Preference file is corrupt, rebuilding it"
                        );
                        BTreeMap::new()
                    }),
                    Err(error) if error.kind() == io::ErrorKind::NotFound => BTreeMap::new(),
                    Err(error) => return Err(error.into()),
                };

            let unchanged = entries
                .get(&key)
                .is_some_and(|preference| preference.encryption == encryption);

            if unchanged {
                (entries, false)
            } else {
                entries.insert(
                    key,
                    EndpointPreference {
                        encryption,
                        updated_at: Utc::now(),
                    },
                );

                let serialized = toml::to_string_pretty(&entries)?;
                let tmp_path = self.tmp_path();
                fs::write(&tmp_path, serialized)?;
                fs::rename(&tmp_path, &self.path)?;

                (entries, true)
            }
            // Dropping `lock` releases the advisory lock.
        };

        *self.cache.lock() = Some(entries);
        Ok(changed)
    }

    /// Drops the in-memory cache so the next read hits the disk again.
    pub fn refresh(&self) {
        *self.cache.lock() = None;
    }

    fn ensure_loaded<'cache>(
        &self,
        cache: &'cache mut Option<BTreeMap<String, EndpointPreference>>,
    ) -> &'cache BTreeMap<String, EndpointPreference> {
        if cache.is_none() {
            let loaded = self.read_from_disk().unwrap_or_else(|error| {
                tracing::warn!(
                    path = %self.path.display(),
                    %error,
                    "Could not read endpoint preferences, starting empty"
                );
                BTreeMap::new()
            });
            *cache = Some(loaded);
        }

        cache.get_or_insert_with(BTreeMap::new)
    }

    fn read_from_disk(&self) -> Result<BTreeMap<String, EndpointPreference>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }

        let lock = self.lock_handle()?;
        fs2::FileExt::lock_shared(&lock)?;
        let raw = fs::read_to_string(&self.path);
        drop(lock);

        match raw {
            Ok(raw) => Ok(toml::from_str(&raw)?),
            Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(error) => Err(error.into()),
        }
    }

    fn lock_handle(&self) -> io::Result<File> {
        OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(self.lock_path())
    }

    fn lock_path(&self) -> PathBuf {
        self.sibling(".lock_")
    }

    fn tmp_path(&self) -> PathBuf {
        self.sibling(".tmp_")
    }

    fn sibling(&self, prefix: &str) -> PathBuf {
        let name = self.path.file_name().map_or_else(
            || format!("{prefix}preferences"),
            |name| format!("{prefix}{}", name.to_string_lossy()),
        );
        self.path.with_file_name(name)
    }
}
