//! Endpoint negotiation: the candidate ladder and per-credential overrides.
//!
//! A credential names one endpoint in its configuration, but relays are
//! routinely reachable on several ports with different encryption modes.
//! When the configured endpoint keeps failing, the engine walks a fixed
//! ladder of well-known submission endpoints instead of giving up.

use std::fmt;

use ahash::AHashMap;
use postrider_common::{Credential, CredentialKey, Encryption};

/// One way to reach a relay: a port and an encryption mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EndpointCandidate {
    pub port: u16,
    pub encryption: Encryption,
}

impl fmt::Display for EndpointCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.port, self.encryption)
    }
}

/// Well-known submission endpoints, in the order they are worth trying
/// once the configured one has failed.
const LADDER: [EndpointCandidate; 8] = [
    EndpointCandidate {
        port: 465,
        encryption: Encryption::Implicit,
    },
    EndpointCandidate {
        port: 587,
        encryption: Encryption::StartTls,
    },
    EndpointCandidate {
        port: 587,
        encryption: Encryption::None,
    },
    EndpointCandidate {
        port: 25,
        encryption: Encryption::None,
    },
    EndpointCandidate {
        port: 2525,
        encryption: Encryption::StartTls,
    },
    EndpointCandidate {
        port: 2525,
        encryption: Encryption::None,
    },
    EndpointCandidate {
        port: 26,
        encryption: Encryption::None,
    },
    EndpointCandidate {
        port: 8025,
        encryption: Encryption::None,
    },
];

/// Full candidate list for a credential: the configured endpoint first,
/// then the ladder, without duplicates.
pub(crate) fn candidates_for(credential: &Credential) -> Vec<EndpointCandidate> {
    let configured = EndpointCandidate {
        port: credential.port,
        encryption: credential.encryption,
    };

    let mut candidates = Vec::with_capacity(LADDER.len() + 1);
    candidates.push(configured);
    for candidate in LADDER {
        if !candidates.contains(&candidate) {
            candidates.push(candidate);
        }
    }

    candidates
}

/// Per-credential negotiation state.
///
/// The cursor remembers how far down the ladder a credential has walked;
/// the override names the candidate the next attempt should use instead
/// of the configured endpoint. Rotating away from a credential drops its
/// override but keeps the cursor, so coming back resumes the walk instead
/// of retrying endpoints that already failed. A successful send clears
/// both, because from then on the learned preference store carries the
/// discovery.
#[derive(Debug, Default)]
pub(crate) struct Negotiator {
    overrides: AHashMap<CredentialKey, EndpointCandidate>,
    cursors: AHashMap<CredentialKey, usize>,
}

impl Negotiator {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn override_for(&self, key: &CredentialKey) -> Option<EndpointCandidate> {
        self.overrides.get(key).copied()
    }

    /// Advances to the next untried candidate and makes it the override.
    /// Returns `None` once the ladder is exhausted.
    pub(crate) fn next_candidate(&mut self, credential: &Credential) -> Option<EndpointCandidate> {
        let candidates = candidates_for(credential);
        let key = credential.key();

        let cursor = self.cursors.entry(key.clone()).or_insert(0);
        *cursor += 1;
        let candidate = candidates.get(*cursor).copied()?;

        self.overrides.insert(key, candidate);
        Some(candidate)
    }

    /// Shortcut for a relay that rejected STARTTLS: propose the closest
    /// endpoint that avoids the handshake, preferring the same port
    /// without TLS when the failure happened on 587.
    ///
    /// `already_tried` lets the caller veto candidates this send has
    /// already burned. The ladder cursor jumps forward to the chosen
    /// candidate so ordinary negotiation continues past the shortcut.
    pub(crate) fn starttls_fallback(
        &mut self,
        credential: &Credential,
        current: EndpointCandidate,
        mut already_tried: impl FnMut(EndpointCandidate) -> bool,
    ) -> Option<EndpointCandidate> {
        let plain_587 = EndpointCandidate {
            port: 587,
            encryption: Encryption::None,
        };
        let implicit_465 = EndpointCandidate {
            port: 465,
            encryption: Encryption::Implicit,
        };

        let pair = if current.port == 587 {
            [plain_587, implicit_465]
        } else {
            [implicit_465, plain_587]
        };

        let choice = pair.into_iter().find(|candidate| !already_tried(*candidate))?;

        let key = credential.key();
        let candidates = candidates_for(credential);
        if let Some(position) = candidates.iter().position(|candidate| *candidate == choice) {
            let cursor = self.cursors.entry(key.clone()).or_insert(0);
            *cursor = (*cursor).max(position);
        }
        self.overrides.insert(key, choice);

        Some(choice)
    }

    /// How many ladder candidates this credential has not reached yet.
    pub(crate) fn remaining(&self, credential: &Credential) -> usize {
        let total = candidates_for(credential).len();
        let cursor = self.cursors.get(&credential.key()).copied().unwrap_or(0);

        total.saturating_sub(cursor + 1)
    }

    /// Drops the override but keeps the ladder cursor. Used when rotating
    /// away from a credential mid-send.
    pub(crate) fn clear_override(&mut self, key: &CredentialKey) {
        self.overrides.remove(key);
    }

    /// Forgets everything about a credential. Used on removal and after a
    /// successful send.
    pub(crate) fn clear(&mut self, key: &CredentialKey) {
        self.overrides.remove(key);
        self.cursors.remove(key);
    }
}
