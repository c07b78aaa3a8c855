//! The delivery engine.
//!
//! One engine owns a pool of submission credentials and everything needed
//! to push a message through one of them: pooled SMTP sessions, endpoint
//! negotiation, learned preferences, health tracking, and the bounded
//! retry loop that ties them together.
//!
//! Failures are a normal part of operation here. Every failed attempt is
//! classified and mapped to a recovery (rotate, fall back to another
//! endpoint, relax certificate checks, cool the credential down, or drop
//! it), and the caller only ever sees whether the message made it out.

use std::{path::PathBuf, sync::Arc, time::Instant};

use ahash::AHashMap;
use postrider_common::{
    Credential, CredentialKey, Encryption,
    collab::{
        DeliveryLog, Notice, Notifier, NullDeliveryLog, NullNotifier, NullPoolStore, PoolStore,
    },
    internal,
    tracing::warn,
};
use postrider_smtp::{ClientError, MessageBuilder};

use crate::{
    attempt::SendAttempt,
    classify::{Classifier, FailureClass, SubstringClassifier},
    config::EngineConfig,
    health::HealthTracker,
    negotiate::{EndpointCandidate, Negotiator},
    pool::CredentialPool,
    prefs::{EndpointPreference, PreferenceStore},
    rotation::{self, RotationStrategy},
    session::{EffectiveEndpoint, SessionPool},
    sign::{self, Signer},
    template,
};

/// One email to deliver.
#[derive(Debug, Clone, Default)]
pub struct SendRequest {
    pub to: String,
    pub subject: String,
    pub body: String,
    pub reply_to: Option<String>,
    pub campaign: Option<String>,
    pub attachments: Vec<PathBuf>,
    pub html: bool,
}

impl SendRequest {
    pub fn new(to: impl Into<String>, subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            to: to.into(),
            subject: subject.into(),
            body: body.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn reply_to(mut self, address: impl Into<String>) -> Self {
        self.reply_to = Some(address.into());
        self
    }

    #[must_use]
    pub fn campaign(mut self, id: impl Into<String>) -> Self {
        self.campaign = Some(id.into());
        self
    }

    #[must_use]
    pub fn attachment(mut self, path: impl Into<PathBuf>) -> Self {
        self.attachments.push(path.into());
        self
    }

    #[must_use]
    pub const fn html(mut self, html: bool) -> Self {
        self.html = html;
        self
    }
}

/// Per-credential counters reported by [`DeliveryEngine::stats`].
#[derive(Debug, Clone)]
pub struct CredentialStats {
    pub host: String,
    pub username: String,
    pub sent: u64,
    pub succeeded: u64,
    pub suspicion: u8,
    pub cooling_for: Option<std::time::Duration>,
    pub average_latency: Option<std::time::Duration>,
}

/// Counters for the current sending batch.
#[derive(Debug, Clone)]
pub struct EngineStats {
    pub batch_size: u64,
    pub batch_success: u64,
    pub current: usize,
    pub credentials: Vec<CredentialStats>,
}

impl EngineStats {
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn success_rate(&self) -> f64 {
        if self.batch_size == 0 {
            0.0
        } else {
            self.batch_success as f64 / self.batch_size as f64
        }
    }
}

pub struct DeliveryEngine {
    config: EngineConfig,
    pool: CredentialPool,
    sessions: SessionPool,
    negotiator: Negotiator,
    prefs: PreferenceStore,
    health: HealthTracker,
    classifier: Box<dyn Classifier>,
    log: Arc<dyn DeliveryLog>,
    notifier: Arc<dyn Notifier>,
    store: Arc<dyn PoolStore>,
    signers: AHashMap<CredentialKey, Option<Signer>>,
    sent_since_rotation: u32,
    batch_size: u64,
    batch_success: u64,
}

impl DeliveryEngine {
    #[must_use]
    pub fn new(credentials: Vec<Credential>, config: EngineConfig) -> Self {
        let health = HealthTracker::new((&config).into());
        let sessions = SessionPool::new(config.timeouts, config.helo_domain.clone());
        let prefs = PreferenceStore::new(config.preference_path.clone());

        Self {
            pool: CredentialPool::new(credentials),
            sessions,
            negotiator: Negotiator::new(),
            prefs,
            health,
            classifier: Box::new(SubstringClassifier),
            log: Arc::new(NullDeliveryLog),
            notifier: Arc::new(NullNotifier),
            store: Arc::new(NullPoolStore),
            signers: AHashMap::new(),
            sent_since_rotation: 0,
            batch_size: 0,
            batch_success: 0,
            config,
        }
    }

    #[must_use]
    pub fn with_log(mut self, log: Arc<dyn DeliveryLog>) -> Self {
        self.log = log;
        self
    }

    #[must_use]
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    #[must_use]
    pub fn with_pool_store(mut self, store: Arc<dyn PoolStore>) -> Self {
        self.store = store;
        self
    }

    #[must_use]
    pub fn with_classifier(mut self, classifier: Box<dyn Classifier>) -> Self {
        self.classifier = classifier;
        self
    }

    /// Delivers one message, retrying across endpoints and credentials.
    ///
    /// Every failure is handled internally; the return value is the only
    /// verdict. The attempt budget starts at the configured retry limit
    /// (at least one attempt per pooled credential) and can grow once to
    /// cover endpoint candidates discovered along the way.
    pub async fn send(&mut self, request: &SendRequest) -> bool {
        if self.pool.is_empty() {
            warn!("No credentials in the pool, cannot send to {}", request.to);
            return false;
        }

        self.batch_size += 1;

        let subject = template::expand(&request.subject, &request.to);
        let body = template::expand(&request.body, &request.to);

        let mut attempt = SendAttempt::new(self.config.retry_limit, self.pool.len());
        let mut last_error = String::from("no attempt was made");

        while !attempt.exhausted() && !self.pool.is_empty() {
            let number = attempt.begin();

            self.sidestep_cooldown();

            let Some(credential) = self.pool.current().cloned() else {
                break;
            };
            let key = credential.key();
            let endpoint = self.effective_endpoint(&credential, attempt.tls_relaxed());

            if attempt.endpoint_tried(&key, endpoint.port, endpoint.encryption) {
                // This exact endpoint already failed during this send;
                // advance the ladder or move to another credential.
                if self.negotiator.next_candidate(&credential).is_none() {
                    self.rotate();
                }
                continue;
            }
            attempt.record_endpoint(&key, endpoint.port, endpoint.encryption);

            internal!(
                "Attempt {number} for {} via {credential} at {endpoint}",
                request.to
            );

            let started = Instant::now();
            match self
                .transmit(&credential, endpoint, request, &subject, &body)
                .await
            {
                Ok(()) => {
                    let latency = started.elapsed();
                    self.health.record_success(&key, latency);
                    self.batch_success += 1;

                    self.remember_endpoint(&credential, endpoint);
                    self.negotiator.clear(&key);

                    self.log.record(&format!(
                        "sent to {} via {credential} at {endpoint} in {}ms",
                        request.to,
                        latency.as_millis()
                    ));

                    self.count_send_and_maybe_rotate();
                    return true;
                }
                Err(error) => {
                    self.sessions.discard(&key);
                    self.health.record_failure(&key);

                    let detail = error.to_string();
                    let class = self.classifier.classify(&detail);
                    last_error.clone_from(&detail);

                    self.log.record(&format!(
                        "attempt {number} for {} via {credential} at {endpoint} failed ({class}): {detail}",
                        request.to
                    ));
                    internal!("Attempt {number} via {credential} failed ({class}): {detail}");

                    if !self.recover(&mut attempt, &credential, endpoint, class).await {
                        break;
                    }
                }
            }
        }

        self.log.record(&format!(
            "giving up on {} after {} attempts: {last_error}",
            request.to,
            attempt.attempts()
        ));
        self.notifier.notify(&Notice::SendFailure {
            recipient: request.to.clone(),
            attempts: attempt.attempts(),
            summary: last_error,
        });
        false
    }

    /// Probes the current credential's endpoint without sending anything.
    ///
    /// Certificate validation is relaxed for the probe, since the point is
    /// to find out whether the relay is reachable at all. A relay that
    /// turns out not to speak STARTTLS is probed once more without it, and
    /// the working mode is persisted either way.
    pub async fn test_connection(&mut self) -> bool {
        let Some(credential) = self.pool.current().cloned() else {
            warn!("No credentials in the pool, nothing to probe");
            return false;
        };

        let mut endpoint = self.effective_endpoint(&credential, true);

        match self.sessions.probe(&credential, endpoint).await {
            Ok(()) => {
                self.remember_endpoint(&credential, endpoint);
                true
            }
            Err(error) => {
                let detail = error.to_string();
                let class = self.classifier.classify(&detail);
                internal!("Probe of {credential} at {endpoint} failed ({class}): {detail}");

                if class == FailureClass::StarttlsUnsupported
                    && endpoint.encryption == Encryption::StartTls
                {
                    endpoint.encryption = Encryption::None;
                    if self.sessions.probe(&credential, endpoint).await.is_ok() {
                        self.remember_endpoint(&credential, endpoint);
                        return true;
                    }
                }

                false
            }
        }
    }

    pub fn set_rotation_strategy(&mut self, strategy: RotationStrategy) {
        self.config.strategy = strategy;
    }

    pub fn set_emails_per_rotation(&mut self, count: u32) {
        self.config.emails_per_rotation = count.max(1);
    }

    /// Steps to the next healthy credential in pool order.
    pub fn rotate_to_next(&mut self) -> Option<&Credential> {
        if self.pool.is_empty() {
            return None;
        }

        let eligible = self.eligible_weights();
        let next = rotation::select_next(
            RotationStrategy::RoundRobin,
            self.pool.current_index(),
            self.pool.len(),
            &eligible,
            &mut rand::rng(),
        );
        self.move_current_to(next);
        self.pool.current()
    }

    /// Jumps to a random healthy credential.
    pub fn select_random(&mut self) -> Option<&Credential> {
        if self.pool.is_empty() {
            return None;
        }

        let eligible = self.eligible_weights();
        let next = rotation::select_next(
            RotationStrategy::Random,
            self.pool.current_index(),
            self.pool.len(),
            &eligible,
            &mut rand::rng(),
        );
        self.move_current_to(next);
        self.pool.current()
    }

    /// Raises suspicion on the current credential, cooling it down when
    /// the configured threshold is crossed. Returns the new level.
    pub fn flag_current_suspicious(&mut self) -> u8 {
        match self.pool.current() {
            Some(credential) => self.health.raise_suspicion(&credential.key()),
            None => 0,
        }
    }

    #[must_use]
    pub fn credential_count(&self) -> usize {
        self.pool.len()
    }

    #[must_use]
    pub fn current_credential(&self) -> Option<&Credential> {
        self.pool.current()
    }

    #[must_use]
    pub fn stats(&self) -> EngineStats {
        let credentials = self
            .pool
            .iter()
            .map(|credential| {
                let snapshot = self.health.snapshot(&credential.key());
                CredentialStats {
                    host: credential.host.clone(),
                    username: credential.username.clone(),
                    sent: snapshot.sent,
                    succeeded: snapshot.succeeded,
                    suspicion: snapshot.suspicion,
                    cooling_for: snapshot.cooling_for,
                    average_latency: snapshot.average_latency,
                }
            })
            .collect();

        EngineStats {
            batch_size: self.batch_size,
            batch_success: self.batch_success,
            current: self.pool.current_index(),
            credentials,
        }
    }

    /// Learned endpoint preferences, sorted by `host:port`.
    #[must_use]
    pub fn preferences(&self) -> Vec<(String, EndpointPreference)> {
        self.prefs.entries()
    }

    /// Builds and transmits the message over a pooled session.
    async fn transmit(
        &mut self,
        credential: &Credential,
        endpoint: EffectiveEndpoint,
        request: &SendRequest,
        subject: &str,
        body: &str,
    ) -> Result<(), ClientError> {
        let message = Self::compose(credential, request, subject, body).await?;
        let message = match self.signer_for(credential) {
            Some(signer) => sign::sign_message(signer, &message).unwrap_or(message),
            None => message,
        };

        let client = self.sessions.acquire(credential, endpoint).await?;
        client.mail_from(&credential.from_address).await?;
        client.rcpt_to(&request.to).await?;
        client.data().await?;
        client.send_body(&message).await?;

        Ok(())
    }

    async fn compose(
        credential: &Credential,
        request: &SendRequest,
        subject: &str,
        body: &str,
    ) -> Result<String, ClientError> {
        let mut builder = MessageBuilder::new()
            .from(&credential.from_address)
            .to(&request.to)
            .subject(subject)
            .body(body)
            .html(request.html);

        if let Some(name) = &credential.from_name {
            builder = builder.from_name(name);
        }
        if let Some(reply_to) = &request.reply_to {
            builder = builder.reply_to(reply_to);
        }

        let unsubscribe = request
            .reply_to
            .as_deref()
            .unwrap_or(&credential.from_address);
        builder = builder.header(
            "List-Unsubscribe",
            format!("<mailto:{unsubscribe}?subject=unsubscribe>"),
        );

        if let Some(campaign) = &request.campaign {
            builder = builder.header("X-Campaign", campaign);
        }

        if let Some(domain) = credential.from_domain() {
            builder = builder.message_id(domain);
        }

        for path in &request.attachments {
            builder = builder.attach_file(path).await?;
        }

        builder.build()
    }

    fn signer_for(&mut self, credential: &Credential) -> Option<&Signer> {
        self.signers
            .entry(credential.key())
            .or_insert_with(|| sign::build_signer(credential, &self.config.key_dir))
            .as_ref()
    }

    /// Maps a classified failure to its recovery. Returns `false` only
    /// when the pool is drained and the send cannot continue.
    async fn recover(
        &mut self,
        attempt: &mut SendAttempt,
        credential: &Credential,
        endpoint: EffectiveEndpoint,
        class: FailureClass,
    ) -> bool {
        let key = credential.key();

        match class {
            FailureClass::AuthRejected => {
                self.drop_credential(&key, "authentication rejected");
                return !self.pool.is_empty();
            }
            FailureClass::StarttlsUnsupported => {
                if attempt.use_starttls_fallback() {
                    let current = EndpointCandidate {
                        port: endpoint.port,
                        encryption: endpoint.encryption,
                    };
                    let fallback =
                        self.negotiator
                            .starttls_fallback(credential, current, |candidate| {
                                attempt.endpoint_tried(
                                    &key,
                                    candidate.port,
                                    candidate.encryption,
                                )
                            });

                    if let Some(candidate) = fallback {
                        internal!("Relay rejected STARTTLS, retrying at {candidate}");
                        return true;
                    }
                }
            }
            FailureClass::CertificateFailure => {
                if !attempt.tls_relaxed() && attempt.first_pass_done(self.pool.len()) {
                    attempt.relax_tls();
                    attempt.forget_endpoint(&key, endpoint.port, endpoint.encryption);
                    internal!(
                        "Certificate validation failed everywhere, retrying without it for this send"
                    );
                    return true;
                }
            }
            FailureClass::Blacklisted | FailureClass::RotateWorthy => {
                self.health.raise_suspicion(&key);
                self.health.begin_cooldown(&key);
            }
            FailureClass::ConnectionFailure => {
                self.health.begin_cooldown(&key);
                let streak = self.health.bump_connection_streak(&key);
                if self.health.advisory_due(&key) {
                    self.notifier.notify(&Notice::ConnectionAdvisory {
                        host: credential.host.clone(),
                        username: credential.username.clone(),
                        streak,
                    });
                }
            }
            FailureClass::Unknown => {}
        }

        self.advance(attempt, credential).await;
        true
    }

    /// Picks where the next attempt goes: an untried credential first,
    /// then further down the current credential's endpoint ladder, then a
    /// plain rotation with backoff.
    async fn advance(&mut self, attempt: &mut SendAttempt, credential: &Credential) {
        let untried: Vec<usize> = self
            .pool
            .iter()
            .enumerate()
            .filter(|(_, candidate)| !attempt.credential_tried(&candidate.key()))
            .map(|(index, _)| index)
            .collect();

        if let Some(&index) = untried
            .iter()
            .find(|&&index| {
                self.pool
                    .get(index)
                    .is_some_and(|candidate| !self.health.is_cooling(&candidate.key()))
            })
            .or_else(|| untried.first())
        {
            self.move_current_to(index);
            tokio::time::sleep(self.config.rotate_delay()).await;
            return;
        }

        // Every credential has been tried once; let the endpoint ladders
        // finish by widening the budget, exactly once per send.
        let remaining: u32 = self
            .pool
            .iter()
            .map(|candidate| u32::try_from(self.negotiator.remaining(candidate)).unwrap_or(0))
            .sum();
        if attempt.widen(remaining) {
            internal!("Widening the retry budget by {remaining} untried endpoint candidates");
        }

        if self.negotiator.next_candidate(credential).is_some() {
            return;
        }

        self.rotate();

        let exponent = attempt.attempts().min(10);
        let backoff = self
            .config
            .backoff_step()
            .saturating_mul(2u32.saturating_pow(exponent))
            .min(self.config.backoff_cap());
        tokio::time::sleep(backoff).await;
    }

    /// Moves off a cooling credential when a healthy alternative exists.
    /// With the whole pool cooling, sending continues in plain order.
    fn sidestep_cooldown(&mut self) {
        if self.pool.len() < 2 {
            return;
        }
        let Some(current) = self.pool.current() else {
            return;
        };
        if !self.health.is_cooling(&current.key()) {
            return;
        }

        let eligible = self.eligible_weights();
        if eligible.is_empty() {
            return;
        }

        let next = rotation::select_next(
            self.config.strategy,
            self.pool.current_index(),
            self.pool.len(),
            &eligible,
            &mut rand::rng(),
        );
        self.move_current_to(next);
    }

    /// The endpoint the next attempt should use: a live negotiation
    /// override wins, then a learned preference for the configured port,
    /// then the configuration itself.
    fn effective_endpoint(&self, credential: &Credential, relax: bool) -> EffectiveEndpoint {
        let relax_certificates = relax || self.config.certificates.accept_invalid_certs;

        let candidate = self
            .negotiator
            .override_for(&credential.key())
            .unwrap_or_else(|| {
                let encryption = self
                    .prefs
                    .get(&credential.host, credential.port)
                    .unwrap_or(credential.encryption);
                EndpointCandidate {
                    port: credential.port,
                    encryption,
                }
            });

        EffectiveEndpoint {
            port: candidate.port,
            encryption: candidate.encryption,
            relax_certificates,
        }
    }

    fn remember_endpoint(&mut self, credential: &Credential, endpoint: EffectiveEndpoint) {
        if let Err(error) = self
            .prefs
            .set(&credential.host, endpoint.port, endpoint.encryption)
        {
            warn!(%error, "Could not persist endpoint preference");
        }
    }

    fn eligible_weights(&self) -> Vec<(usize, f64)> {
        self.pool
            .iter()
            .enumerate()
            .filter_map(|(index, credential)| {
                let key = credential.key();
                if self.health.is_cooling(&key) {
                    None
                } else {
                    Some((index, self.health.success_weight(&key)))
                }
            })
            .collect()
    }

    /// Rotates with the configured strategy.
    fn rotate(&mut self) {
        if self.pool.len() < 2 {
            return;
        }

        let eligible = self.eligible_weights();
        let next = rotation::select_next(
            self.config.strategy,
            self.pool.current_index(),
            self.pool.len(),
            &eligible,
            &mut rand::rng(),
        );
        self.move_current_to(next);
    }

    fn move_current_to(&mut self, index: usize) {
        if index == self.pool.current_index() {
            return;
        }
        if let Some(old) = self.pool.current() {
            self.negotiator.clear_override(&old.key());
        }
        self.pool.set_current(index);
        self.sent_since_rotation = 0;
    }

    fn count_send_and_maybe_rotate(&mut self) {
        self.sent_since_rotation += 1;
        if self.sent_since_rotation >= self.config.emails_per_rotation.max(1) {
            self.sent_since_rotation = 0;
            self.rotate();
        }
    }

    fn drop_credential(&mut self, key: &CredentialKey, reason: &str) {
        let Some(removed) = self.pool.remove(key) else {
            return;
        };

        self.sessions.discard(key);
        self.negotiator.clear(key);
        self.health.remove(key);
        self.signers.remove(key);

        if let Err(error) = self.store.remove(key) {
            warn!(%error, credential = %removed, "Could not remove credential from the backing store");
        }

        self.notifier.notify(&Notice::CredentialRemoved {
            host: removed.host.clone(),
            username: removed.username.clone(),
            reason: reason.to_string(),
        });
        warn!(credential = %removed, reason, "Removed credential from the pool");
    }
}
