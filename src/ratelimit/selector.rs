//! Composition of limiters into a single admission decision.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, trace};

use super::backend::{AdmissionControl, AdmissionDecision};
use super::identity::{Dimension, IdentityKey, RequestIdentity};
use super::limiter::SlidingWindowLimiter;
use crate::clock::Clock;
use crate::config::LimitSettings;
use crate::store::CounterStore;

/// Picks the limiter that governs a request and delegates to it.
///
/// Limiters are consulted in priority order; the first one that can derive
/// a key for the request wins. When none can, the last limiter is used as a
/// catch-all with its dimension's "unknown" key.
#[derive(Debug)]
pub struct LimiterSelector {
    limiters: Vec<SlidingWindowLimiter>,
}

impl LimiterSelector {
    /// Create a selector from `preferred` limiters in priority order,
    /// followed by the `catch_all` limiter used when none of them applies.
    pub fn new(preferred: Vec<SlidingWindowLimiter>, catch_all: SlidingWindowLimiter) -> Self {
        let mut limiters = preferred;
        limiters.push(catch_all);
        Self { limiters }
    }

    /// The standard stack: token limiter first, IP limiter as catch-all.
    pub fn token_then_ip(
        settings: &LimitSettings,
        store: Arc<dyn CounterStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self::new(
            vec![SlidingWindowLimiter::new(
                Dimension::Token,
                settings.token,
                Arc::clone(&store),
                Arc::clone(&clock),
            )],
            SlidingWindowLimiter::new(Dimension::Ip, settings.ip, store, clock),
        )
    }

    pub fn limiters(&self) -> &[SlidingWindowLimiter] {
        &self.limiters
    }

    /// Choose the governing limiter and the key it should check.
    fn select(&self, request: &RequestIdentity) -> (&SlidingWindowLimiter, IdentityKey) {
        for limiter in &self.limiters {
            if let Some(key) = limiter.dimension().derive(request) {
                return (limiter, key);
            }
        }

        // `new` always appends the catch-all, so the list is never empty.
        let fallback = &self.limiters[self.limiters.len() - 1];
        (fallback, fallback.dimension().unknown())
    }

    /// Decide for one request.
    pub async fn decide(&self, request: &RequestIdentity) -> AdmissionDecision {
        let (limiter, key) = self.select(request);

        trace!(dimension = %limiter.dimension(), key = %key, "Selected limiter");

        let decision = limiter.allow_request(&key).await;

        if !decision.admitted() {
            debug!(
                dimension = %limiter.dimension(),
                key = %key,
                outcome = ?decision.outcome,
                count = decision.count,
                "Request rejected"
            );
        }

        AdmissionDecision {
            admitted: decision.admitted(),
            identity: key.into_string(),
            count: decision.count,
            outcome: decision.outcome,
        }
    }
}

#[async_trait]
impl AdmissionControl for LimiterSelector {
    async fn decide(&self, request: &RequestIdentity) -> AdmissionDecision {
        LimiterSelector::decide(self, request).await
    }
}
