//! Lease TTL policy.
//!
//! Three sources can contribute a TTL: a per-role override, the backend's
//! `config/lease` entry, and the system defaults from [`LeaseLimits`]. The
//! first one that is set wins. The same precedence is re-applied on renewal,
//! bounded by the effective maximum lifetime of the lease.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{Error, Result};
use crate::secrets::duration::canonical;

/// Storage key of the per-backend lease policy.
pub const LEASE_CONFIG_KEY: &str = "config/lease";

/// Backend-wide lease policy stored at `config/lease`.
///
/// A zero duration means "not set" and defers to the system defaults.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseConfig {
    #[serde(with = "canonical", default)]
    pub ttl: Duration,
    #[serde(with = "canonical", default)]
    pub ttl_max: Duration,
}

/// System-wide lease defaults applied when neither the role nor the backend
/// configures a TTL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaseLimits {
    pub default_ttl: Duration,
    pub max_ttl: Duration,
}

impl Default for LeaseLimits {
    fn default() -> Self {
        let month = Duration::from_secs(32 * 24 * 3600);
        Self { default_ttl: month, max_ttl: month }
    }
}

/// Timing state of an outstanding lease as seen by a renew callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaseTerms {
    pub issue_time: DateTime<Utc>,
    /// TTL granted by the most recent issue or renewal.
    pub ttl: Duration,
    /// Increment explicitly requested by the caller, if any.
    pub increment: Option<Duration>,
}

/// Resolve the TTL of a newly issued secret.
///
/// Precedence: non-zero role override, then non-zero backend `ttl`, then the
/// system default.
pub fn resolve_ttl(
    role_override: Option<Duration>,
    backend: Option<&LeaseConfig>,
    system: &LeaseLimits,
) -> Duration {
    if let Some(ttl) = role_override.filter(|ttl| !ttl.is_zero()) {
        return ttl;
    }
    match backend {
        Some(config) if !config.ttl.is_zero() => config.ttl,
        _ => system.default_ttl,
    }
}

/// Upper bound on the total lifetime of a lease.
///
/// The backend's `ttl_max` applies only when set and not above the system
/// maximum.
pub fn effective_max_ttl(backend: Option<&LeaseConfig>, system: &LeaseLimits) -> Duration {
    match backend {
        Some(config) if !config.ttl_max.is_zero() && config.ttl_max <= system.max_ttl => {
            config.ttl_max
        }
        _ => system.max_ttl,
    }
}

/// TTL a credential with a self-contained expiry is signed with.
///
/// The resolved TTL never exceeds the lease's maximum lifetime, so the
/// credential expires no later than the lease that tracks it.
pub fn bounded_ttl(
    role_override: Option<Duration>,
    backend: Option<&LeaseConfig>,
    system: &LeaseLimits,
) -> Duration {
    resolve_ttl(role_override, backend, system).min(effective_max_ttl(backend, system))
}

/// Compute the TTL granted by a renewal.
///
/// An explicit increment that would carry the lease past its maximum lifetime
/// fails with [`Error::MaxTtlExceeded`]. Without an increment, the resolved
/// TTL is clamped to whatever lifetime remains.
pub fn extend(
    terms: &LeaseTerms,
    backend: Option<&LeaseConfig>,
    system: &LeaseLimits,
    now: DateTime<Utc>,
) -> Result<Duration> {
    let max_ttl = effective_max_ttl(backend, system);
    let elapsed = (now - terms.issue_time).to_std().unwrap_or(Duration::ZERO);
    let requested = terms.increment.filter(|inc| !inc.is_zero());

    let remaining = max_ttl.saturating_sub(elapsed);
    if remaining.is_zero() {
        return Err(Error::MaxTtlExceeded {
            requested: requested.unwrap_or(terms.ttl),
            remaining,
        });
    }

    match requested {
        Some(increment) if increment > remaining => {
            Err(Error::MaxTtlExceeded { requested: increment, remaining })
        }
        Some(increment) => Ok(increment),
        None => Ok(resolve_ttl(None, backend, system).min(remaining)),
    }
}
