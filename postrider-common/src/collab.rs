//! Collaborator seams for applications embedding the delivery engine.
//!
//! The engine reports progress and pool changes through these traits rather
//! than returning rich errors, so a host can surface them in whatever UI or
//! log pipeline it has. All of them default to no-op implementations.

use crate::config::CredentialKey;

/// Sink for per-attempt delivery transcript lines.
pub trait DeliveryLog: Send + Sync {
    fn record(&self, line: &str);
}

/// Receiver for notices that may deserve operator attention.
pub trait Notifier: Send + Sync {
    fn notify(&self, notice: &Notice);
}

/// Persistence hook invoked when the engine drops a credential from its
/// pool, so the backing configuration can drop it too.
pub trait PoolStore: Send + Sync {
    fn remove(&self, key: &CredentialKey) -> std::io::Result<()>;
}

/// Operator-facing notices emitted by the delivery engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// An endpoint has failed to connect several times in a row.
    ConnectionAdvisory {
        host: String,
        username: String,
        streak: u32,
    },

    /// A credential was removed from the pool.
    CredentialRemoved {
        host: String,
        username: String,
        reason: String,
    },

    /// A send gave up after exhausting its attempt budget.
    SendFailure {
        recipient: String,
        attempts: u32,
        summary: String,
    },
}

impl std::fmt::Display for Notice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ConnectionAdvisory {
                host,
                username,
                streak,
            } => write!(
                f,
                "{username}@{host} failed to connect {streak} times in a row; check the host and port"
            ),
            Self::CredentialRemoved {
                host,
                username,
                reason,
            } => write!(f, "removed {username}@{host} from the pool: {reason}"),
            Self::SendFailure {
                recipient,
                attempts,
                summary,
            } => write!(f, "giving up on {recipient} after {attempts} attempts: {summary}"),
        }
    }
}

/// Discards every transcript line.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullDeliveryLog;

impl DeliveryLog for NullDeliveryLog {
    fn record(&self, _line: &str) {}
}

/// Forwards transcript lines to the tracing subscriber at INFO.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLog;

impl DeliveryLog for TracingLog {
    fn record(&self, line: &str) {
        tracing::info!("{line}");
    }
}

/// Swallows every notice.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullNotifier;

impl Notifier for NullNotifier {
    fn notify(&self, _notice: &Notice) {}
}

/// Accepts removals without persisting them anywhere.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullPoolStore;

impl PoolStore for NullPoolStore {
    fn remove(&self, _key: &CredentialKey) -> std::io::Result<()> {
        Ok(())
    }
}
