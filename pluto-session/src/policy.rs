//! Invalidation policy
//!
//! Decides whether a failed `/auth/me` or `/auth/refresh` call ends the session.

use pluto_core::InvalidationMode;

use crate::error::ApiError;

pub trait InvalidationPolicy: Send + Sync {
    /// Return true to log the session out after `failure`
    fn should_invalidate(&self, failure: &ApiError) -> bool;

    fn name(&self) -> &'static str;
}

/// An unverifiable token is treated as no token. A transient outage logs the
/// user out just like a 401 does.
#[derive(Debug, Clone, Copy, Default)]
pub struct FailClosed;

impl InvalidationPolicy for FailClosed {
    fn should_invalidate(&self, _failure: &ApiError) -> bool {
        true
    }

    fn name(&self) -> &'static str {
        "fail_closed"
    }
}

/// Only an explicit 401/403 ends the session; network and server errors keep it.
#[derive(Debug, Clone, Copy, Default)]
pub struct RejectionsOnly;

impl InvalidationPolicy for RejectionsOnly {
    fn should_invalidate(&self, failure: &ApiError) -> bool {
        failure.is_rejection()
    }

    fn name(&self) -> &'static str {
        "rejections_only"
    }
}

pub fn policy_for(mode: InvalidationMode) -> Box<dyn InvalidationPolicy> {
    match mode {
        InvalidationMode::FailClosed => Box::new(FailClosed),
        InvalidationMode::RejectionsOnly => Box::new(RejectionsOnly),
    }
}
