//! Admission trait consumed by the transport layer.

use async_trait::async_trait;

use super::identity::RequestIdentity;
use super::limiter::Outcome;

/// A single admit/deny answer plus the values the transport echoes back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdmissionDecision {
    pub admitted: bool,
    /// Identity key the decision was made for, e.g. `IP_10.0.0.1`
    pub identity: String,
    /// Count reported by the governing limiter
    pub count: u64,
    /// Why the limiter answered the way it did
    pub outcome: Outcome,
}

/// Trait for admission control implementations.
///
/// The HTTP middleware only depends on this, so tests can substitute a
/// fixed answer and the limiter stack can change without touching transport.
#[async_trait]
pub trait AdmissionControl: Send + Sync {
    /// Decide whether the request described by `request` may proceed.
    async fn decide(&self, request: &RequestIdentity) -> AdmissionDecision;
}
