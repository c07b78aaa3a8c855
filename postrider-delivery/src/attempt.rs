//! Book-keeping for a single send call.

use ahash::AHashSet;
use postrider_common::{CredentialKey, Encryption};

/// Tracks one delivery's retry budget and everything already tried, so the
/// send loop itself stays free of counters.
///
/// The budget starts at `max(retry_limit, pool size)`, which guarantees
/// every pooled credential gets at least one attempt. It can be widened
/// exactly once, when the first pass over the pool failed everywhere but
/// untried endpoint candidates remain.
#[derive(Debug)]
pub(crate) struct SendAttempt {
    attempts: u32,
    max_attempts: u32,
    tried_credentials: AHashSet<CredentialKey>,
    tried_endpoints: AHashSet<(CredentialKey, u16, Encryption)>,
    tls_relaxed: bool,
    starttls_fallback_used: bool,
    widened: bool,
}

impl SendAttempt {
    pub(crate) fn new(retry_limit: u32, pool_len: usize) -> Self {
        let pool_len = u32::try_from(pool_len).unwrap_or(u32::MAX);

        Self {
            attempts: 0,
            max_attempts: retry_limit.max(pool_len),
            tried_credentials: AHashSet::new(),
            tried_endpoints: AHashSet::new(),
            tls_relaxed: false,
            starttls_fallback_used: false,
            widened: false,
        }
    }

    /// Counts a new attempt and returns its 1-based number.
    pub(crate) fn begin(&mut self) -> u32 {
        self.attempts += 1;
        self.attempts
    }

    pub(crate) const fn attempts(&self) -> u32 {
        self.attempts
    }

    pub(crate) const fn exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }

    pub(crate) fn record_endpoint(&mut self, key: &CredentialKey, port: u16, encryption: Encryption) {
        self.tried_credentials.insert(key.clone());
        self.tried_endpoints.insert((key.clone(), port, encryption));
    }

    pub(crate) fn endpoint_tried(&self, key: &CredentialKey, port: u16, encryption: Encryption) -> bool {
        self.tried_endpoints.contains(&(key.clone(), port, encryption))
    }

    /// Lets an endpoint be retried after the certificate policy changed.
    pub(crate) fn forget_endpoint(&mut self, key: &CredentialKey, port: u16, encryption: Encryption) {
        self.tried_endpoints.remove(&(key.clone(), port, encryption));
    }

    pub(crate) fn credential_tried(&self, key: &CredentialKey) -> bool {
        self.tried_credentials.contains(key)
    }

    /// True once every pooled credential has been attempted at least once.
    pub(crate) fn first_pass_done(&self, pool_len: usize) -> bool {
        self.tried_credentials.len() >= pool_len
    }

    pub(crate) const fn tls_relaxed(&self) -> bool {
        self.tls_relaxed
    }

    /// Switches certificate validation off for the rest of this send.
    /// Returns false if it was already off.
    pub(crate) fn relax_tls(&mut self) -> bool {
        if self.tls_relaxed {
            return false;
        }
        self.tls_relaxed = true;
        true
    }

    /// Marks the STARTTLS fallback as spent. Returns false if it was
    /// already used during this send.
    pub(crate) fn use_starttls_fallback(&mut self) -> bool {
        if self.starttls_fallback_used {
            return false;
        }
        self.starttls_fallback_used = true;
        true
    }

    /// Grows the budget by `extra` attempts, once.
    pub(crate) fn widen(&mut self, extra: u32) -> bool {
        if self.widened || extra == 0 {
            return false;
        }
        self.widened = true;
        self.max_attempts = self.max_attempts.saturating_add(extra);
        true
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_budget_covers_the_whole_pool() {
        assert_eq!(SendAttempt::new(5, 3).max_attempts, 5);
        assert_eq!(SendAttempt::new(2, 7).max_attempts, 7);
    }

    #[test]
    fn test_exhaustion() {
        let mut attempt = SendAttempt::new(2, 1);

        assert!(!attempt.exhausted());
        attempt.begin();
        assert!(!attempt.exhausted());
        attempt.begin();
        assert!(attempt.exhausted());
    }

    #[test]
    fn test_endpoint_tracking() {
        let mut attempt = SendAttempt::new(5, 1);
        let key = CredentialKey::new("smtp.example.com", "mailer");

        attempt.record_endpoint(&key, 587, Encryption::StartTls);

        assert!(attempt.endpoint_tried(&key, 587, Encryption::StartTls));
        assert!(!attempt.endpoint_tried(&key, 587, Encryption::None));
        assert!(!attempt.endpoint_tried(&key, 465, Encryption::Implicit));
        assert!(attempt.credential_tried(&key));
        assert!(attempt.first_pass_done(1));
        assert!(!attempt.first_pass_done(2));
    }

    #[test]
    fn test_forget_endpoint_allows_a_retry() {
        let mut attempt = SendAttempt::new(5, 1);
        let key = CredentialKey::new("smtp.example.com", "mailer");

        attempt.record_endpoint(&key, 465, Encryption::Implicit);
        attempt.forget_endpoint(&key, 465, Encryption::Implicit);

        assert!(!attempt.endpoint_tried(&key, 465, Encryption::Implicit));
        // The credential itself stays tried
        assert!(attempt.credential_tried(&key));
    }

    #[test]
    fn test_widen_applies_once() {
        let mut attempt = SendAttempt::new(3, 1);

        assert!(attempt.widen(4));
        assert_eq!(attempt.max_attempts, 7);
        assert!(!attempt.widen(4));
        assert_eq!(attempt.max_attempts, 7);
    }

    #[test]
    fn test_widen_by_zero_is_spurious() {
        let mut attempt = SendAttempt::new(3, 1);

        assert!(!attempt.widen(0));
        assert!(attempt.widen(2));
    }

    #[test]
    fn test_one_shot_flags() {
        let mut attempt = SendAttempt::new(3, 1);

        assert!(!attempt.tls_relaxed());
        assert!(attempt.relax_tls());
        assert!(!attempt.relax_tls());
        assert!(attempt.tls_relaxed());

        assert!(attempt.use_starttls_fallback());
        assert!(!attempt.use_starttls_fallback());
    }
}
