//! Outbound delivery through a pool of SMTP submission credentials.
//!
//! The [`DeliveryEngine`] owns the pool and everything around it: live
//! session reuse, endpoint negotiation with durable preferences, failure
//! classification, health tracking with cooldowns, and credential
//! rotation. Callers hand it a [`SendRequest`] and get back a plain
//! verdict; every failure along the way is handled internally.

mod attempt;
mod classify;
mod config;
mod engine;
mod error;
mod health;
mod negotiate;
mod pool;
mod prefs;
mod rotation;
mod session;
mod sign;
mod template;

pub use classify::{Classifier, FailureClass, SubstringClassifier};
pub use config::EngineConfig;
pub use engine::{CredentialStats, DeliveryEngine, EngineStats, SendRequest};
pub use error::{EngineError, Result};
pub use prefs::{EndpointPreference, PreferenceStore};
pub use rotation::RotationStrategy;
