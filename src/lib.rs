//! Turnstile - Sliding-Window Request Admission
//!
//! This crate decides, per incoming HTTP request, whether to forward it or
//! answer `429 Too Many Requests`. Each client identity (API token, or IP
//! address when no token is sent) gets a sliding window of recent events and
//! a block period once that window overflows. All counts live in a shared
//! ordered counter store, normally Redis, so any number of processes can
//! enforce the same limits.

pub mod clock;
pub mod config;
pub mod error;
pub mod http;
pub mod ratelimit;
pub mod store;
