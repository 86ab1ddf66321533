//! Rate limiting logic: identity keys, sliding-window limiters and the
//! selector that composes them.

mod backend;
mod identity;
mod limiter;
mod selector;

pub use backend::{AdmissionControl, AdmissionDecision};
pub use identity::{Dimension, IdentityKey, RequestIdentity, API_KEY_HEADER, BLOCK_SUFFIX};
pub use limiter::{Decision, LimitConfig, Outcome, SlidingWindowLimiter};
pub use selector::LimiterSelector;
