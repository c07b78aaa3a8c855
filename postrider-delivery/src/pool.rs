//! The ordered pool of submission credentials.

use postrider_common::{Credential, CredentialKey};

/// Holds the configured credentials and tracks which one is current.
///
/// The pool itself is dumb: selection policy lives in
/// [`crate::rotation`], health in [`crate::health::HealthTracker`].
#[derive(Debug, Clone)]
pub(crate) struct CredentialPool {
    credentials: Vec<Credential>,
    current: usize,
}

impl CredentialPool {
    pub(crate) const fn new(credentials: Vec<Credential>) -> Self {
        Self {
            credentials,
            current: 0,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.credentials.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.credentials.is_empty()
    }

    pub(crate) const fn current_index(&self) -> usize {
        self.current
    }

    pub(crate) fn current(&self) -> Option<&Credential> {
        self.credentials.get(self.current)
    }

    pub(crate) fn get(&self, index: usize) -> Option<&Credential> {
        self.credentials.get(index)
    }

    pub(crate) fn iter(&self) -> std::slice::Iter<'_, Credential> {
        self.credentials.iter()
    }

    pub(crate) fn position(&self, key: &CredentialKey) -> Option<usize> {
        self.credentials
            .iter()
            .position(|credential| credential.key() == *key)
    }

    /// Points the pool at `index`, wrapping out-of-range values.
    pub(crate) fn set_current(&mut self, index: usize) {
        if self.credentials.is_empty() {
            self.current = 0;
        } else {
            self.current = index % self.credentials.len();
        }
    }

    /// Removes the credential matching `key`.
    ///
    /// The current cursor keeps pointing at the same credential where
    /// possible; if the current credential itself was removed, the cursor
    /// lands on its successor (wrapping to the front).
    pub(crate) fn remove(&mut self, key: &CredentialKey) -> Option<Credential> {
        let index = self.position(key)?;
        let removed = self.credentials.remove(index);

        if index < self.current {
            self.current -= 1;
        } else if self.current >= self.credentials.len() {
            self.current = 0;
        }

        Some(removed)
    }
}
