//! Per-credential health: cooldowns, suspicion, and running statistics.
//!
//! Failures never remove a credential here (only authentication rejections
//! do that, in the engine). Instead a credential accumulates suspicion and
//! cooldowns, and the rotation strategies steer traffic away until it
//! recovers.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use dashmap::DashMap;
use postrider_common::CredentialKey;

use crate::config::EngineConfig;

/// Suspicion never grows past this, so one good streak can always talk a
/// credential back down.
const SUSPICION_CEILING: u8 = 10;

/// Tunables lifted out of [`EngineConfig`].
#[derive(Debug, Clone, Copy)]
pub(crate) struct HealthPolicy {
    pub(crate) cooldown_base: Duration,
    pub(crate) cooldown_max: Duration,
    pub(crate) suspicion_threshold: u8,
    pub(crate) advisory_streak: u32,
}

impl From<&EngineConfig> for HealthPolicy {
    fn from(config: &EngineConfig) -> Self {
        Self {
            cooldown_base: config.cooldown_base(),
            cooldown_max: config.cooldown_max(),
            suspicion_threshold: config.suspicion_threshold,
            advisory_streak: config.advisory_streak,
        }
    }
}

/// Mutable health state for one credential.
#[derive(Debug, Default)]
struct CredentialHealthData {
    cooldown_until: Option<Instant>,
    suspicion: u8,
    connection_streak: u32,
    advisory_sent: bool,
    sent: u64,
    succeeded: u64,
    total_latency: Duration,
}

impl CredentialHealthData {
    fn is_cooling(&self) -> bool {
        self.cooldown_until
            .is_some_and(|until| Instant::now() < until)
    }

    /// Starts or escalates a cooldown and returns its length.
    ///
    /// A fresh cooldown lasts `cooldown_base`. Cooling a credential that is
    /// already cooling doubles the remaining time, capped at
    /// `cooldown_max`. An existing cooldown is never shortened.
    fn begin_cooldown(&mut self, policy: &HealthPolicy) -> Duration {
        let now = Instant::now();

        let length = match self.cooldown_until.filter(|until| *until > now) {
            None => policy.cooldown_base,
            Some(until) => {
                let remaining = until.duration_since(now);
                remaining
                    .checked_mul(2)
                    .unwrap_or(policy.cooldown_max)
                    .min(policy.cooldown_max)
            }
        };

        let target = now + length;
        if self.cooldown_until.is_none_or(|until| target > until) {
            self.cooldown_until = Some(target);
        }

        length
    }

    /// Raises suspicion by one and returns the new level plus whether the
    /// threshold was crossed by this raise.
    fn raise_suspicion(&mut self, policy: &HealthPolicy) -> (u8, bool) {
        let before = self.suspicion;
        self.suspicion = self.suspicion.saturating_add(1).min(SUSPICION_CEILING);

        let crossed =
            self.suspicion >= policy.suspicion_threshold && before < policy.suspicion_threshold;
        (self.suspicion, crossed)
    }

    fn record_success(&mut self, latency: Duration) {
        self.sent += 1;
        self.succeeded += 1;
        self.total_latency += latency;
        // Success clears the streak and decays suspicion, but an active
        // cooldown still runs its course.
        self.suspicion = self.suspicion.saturating_sub(1);
        self.connection_streak = 0;
        self.advisory_sent = false;
    }

    fn record_failure(&mut self) {
        self.sent += 1;
    }

    #[allow(clippy::cast_precision_loss)]
    fn success_rate(&self) -> f64 {
        if self.sent == 0 {
            0.0
        } else {
            self.succeeded as f64 / self.sent as f64
        }
    }

    fn snapshot(&self) -> HealthSnapshot {
        let average_latency = u32::try_from(self.succeeded)
            .ok()
            .filter(|count| *count > 0)
            .map(|count| self.total_latency / count);

        HealthSnapshot {
            cooling_for: self
                .cooldown_until
                .and_then(|until| until.checked_duration_since(Instant::now())),
            suspicion: self.suspicion,
            sent: self.sent,
            succeeded: self.succeeded,
            average_latency,
        }
    }
}

/// Point-in-time view of one credential's health.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthSnapshot {
    /// Remaining cooldown, if one is active.
    pub cooling_for: Option<Duration>,
    pub suspicion: u8,
    pub sent: u64,
    pub succeeded: u64,
    pub average_latency: Option<Duration>,
}

/// Thread-safe health registry keyed by credential.
#[derive(Debug)]
pub(crate) struct HealthTracker {
    policy: HealthPolicy,
    entries: DashMap<CredentialKey, Arc<parking_lot::Mutex<CredentialHealthData>>>,
}

impl HealthTracker {
    pub(crate) fn new(policy: HealthPolicy) -> Self {
        Self {
            policy,
            entries: DashMap::new(),
        }
    }

    fn get_entry(&self, key: &CredentialKey) -> Arc<parking_lot::Mutex<CredentialHealthData>> {
        self.entries
            .entry(key.clone())
            .or_insert_with(|| Arc::new(parking_lot::Mutex::new(CredentialHealthData::default())))
            .clone()
    }

    pub(crate) fn is_cooling(&self, key: &CredentialKey) -> bool {
        let entry = self.get_entry(key);
        let guard = entry.lock();
        guard.is_cooling()
    }

    /// Starts or escalates a cooldown and returns its length.
    pub(crate) fn begin_cooldown(&self, key: &CredentialKey) -> Duration {
        let entry = self.get_entry(key);
        let mut guard = entry.lock();
        let length = guard.begin_cooldown(&self.policy);

        tracing::warn!(
            credential = %key,
            cooldown_secs = length.as_secs(),
            "Credential entering COOLDOWN - rotating away until it recovers"
        );

        length
    }

    /// Raises suspicion by one, forcing a cooldown when the configured
    /// threshold is crossed. Returns the new suspicion level.
    pub(crate) fn raise_suspicion(&self, key: &CredentialKey) -> u8 {
        let entry = self.get_entry(key);
        let mut guard = entry.lock();
        let (level, crossed) = guard.raise_suspicion(&self.policy);

        if crossed {
            let length = guard.begin_cooldown(&self.policy);
            tracing::warn!(
                credential = %key,
                suspicion = level,
                threshold = self.policy.suspicion_threshold,
                cooldown_secs = length.as_secs(),
                "Suspicion threshold crossed - credential forced into cooldown"
            );
        }

        level
    }

    pub(crate) fn record_success(&self, key: &CredentialKey, latency: Duration) {
        let entry = self.get_entry(key);
        let mut guard = entry.lock();
        guard.record_success(latency);
    }

    pub(crate) fn record_failure(&self, key: &CredentialKey) {
        let entry = self.get_entry(key);
        let mut guard = entry.lock();
        guard.record_failure();
    }

    /// Counts another consecutive connection failure and returns the streak.
    pub(crate) fn bump_connection_streak(&self, key: &CredentialKey) -> u32 {
        let entry = self.get_entry(key);
        let mut guard = entry.lock();
        guard.connection_streak += 1;
        guard.connection_streak
    }

    /// True exactly once per losing streak, when it reaches the configured
    /// length. The flag rearms after the next success.
    pub(crate) fn advisory_due(&self, key: &CredentialKey) -> bool {
        let entry = self.get_entry(key);
        let mut guard = entry.lock();

        if guard.connection_streak >= self.policy.advisory_streak && !guard.advisory_sent {
            guard.advisory_sent = true;
            true
        } else {
            false
        }
    }

    /// Selection weight for weighted-random rotation.
    pub(crate) fn success_weight(&self, key: &CredentialKey) -> f64 {
        let entry = self.get_entry(key);
        let guard = entry.lock();
        (1.0 + guard.success_rate()).max(0.5)
    }

    pub(crate) fn snapshot(&self, key: &CredentialKey) -> HealthSnapshot {
        let entry = self.get_entry(key);
        let guard = entry.lock();
        guard.snapshot()
    }

    pub(crate) fn remove(&self, key: &CredentialKey) {
        self.entries.remove(key);
    }
}
