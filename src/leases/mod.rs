//! # Lease Manager
//!
//! Owns every secret a backend hands out. Each secret becomes a lease with an
//! id, a TTL and a maximum lifetime; renew and revoke go back to the backend
//! that issued it. Lease records are persisted under `sys/leases/` so a
//! restart does not orphan credentials.
//!
//! Public secret data is returned to the caller once and never persisted.

pub mod reaper;

pub use reaper::spawn_reaper;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn, Instrument};
use uuid::Uuid;

use crate::backends::LogicalBackend;
use crate::errors::{Error, Result};
use crate::framework::Request;
use crate::secrets::duration::canonical;
use crate::secrets::lease::effective_max_ttl;
use crate::secrets::{IssuedSecret, LeaseLimits, LeaseTerms, RevocationState};
use crate::storage::config_store::read_lease_config;
use crate::storage::{Storage, StorageEntry, StorageView};

/// Storage prefix of lease records.
pub const LEASE_PREFIX: &str = "sys/leases/";
/// Storage prefix under which each mount gets its own view.
pub const MOUNT_STORAGE_PREFIX: &str = "logical/";
/// Revocations in flight during one tidy pass.
pub const TIDY_CONCURRENCY: usize = 8;

/// Persisted lease record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaseEntry {
    pub lease_id: String,
    pub mount: String,
    pub path: String,
    pub issue_time: DateTime<Utc>,
    pub expire_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_renewal: Option<DateTime<Utc>>,
    /// TTL granted by the last issue or renewal.
    #[serde(with = "canonical")]
    pub ttl: Duration,
    pub state: RevocationState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub secret: IssuedSecret,
}

impl LeaseEntry {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expire_time <= now
    }
}

/// Response returned to callers of [`LeaseManager::handle`] and [`LeaseManager::renew`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LeasedResponse {
    pub lease_id: String,
    /// Seconds.
    pub lease_duration: u64,
    pub renewable: bool,
    pub data: Map<String, Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

/// Lease metadata without any secret material.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LeaseInfo {
    pub id: String,
    pub issue_time: DateTime<Utc>,
    pub expire_time: DateTime<Utc>,
    pub last_renewal: Option<DateTime<Utc>>,
    /// Seconds left until expiry.
    pub ttl: u64,
    pub renewable: bool,
    pub state: RevocationState,
    pub last_error: Option<String>,
}

/// Outcome of one [`LeaseManager::tidy_expired`] pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TidyReport {
    pub revoked: usize,
    pub failed: usize,
}

struct Mount {
    backend: Arc<dyn LogicalBackend>,
    storage: StorageView,
}

pub struct LeaseManager {
    storage: Arc<dyn Storage>,
    mounts: HashMap<String, Mount>,
    limits: LeaseLimits,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl std::fmt::Debug for LeaseManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut mounts: Vec<&String> = self.mounts.keys().collect();
        mounts.sort();
        f.debug_struct("LeaseManager")
            .field("mounts", &mounts)
            .field("limits", &self.limits)
            .finish()
    }
}

fn normalize_mount(path: &str) -> String {
    path.trim_matches('/').to_string()
}

fn lease_key(lease_id: &str) -> String {
    format!("{}{}", LEASE_PREFIX, lease_id)
}

impl LeaseManager {
    pub fn new(storage: Arc<dyn Storage>, limits: LeaseLimits) -> Self {
        Self { storage, mounts: HashMap::new(), limits, locks: DashMap::new() }
    }

    pub fn limits(&self) -> &LeaseLimits {
        &self.limits
    }

    /// Mount `backend` at `path`. Its storage lives under `logical/<path>/`.
    pub fn mount(&mut self, path: &str, backend: Arc<dyn LogicalBackend>) -> Result<()> {
        let path = normalize_mount(path);
        if path.is_empty() || path.contains('/') || path == "sys" {
            return Err(Error::validation_field(format!("invalid mount path '{}'", path), "path"));
        }
        if self.mounts.contains_key(&path) {
            return Err(Error::validation_field(format!("path '{}' is already in use", path), "path"));
        }

        let storage = StorageView::new(self.storage.clone(), format!("{}{}/", MOUNT_STORAGE_PREFIX, path));
        info!(mount = %path, backend_type = %backend.backend_type(), "backend mounted");
        self.mounts.insert(path, Mount { backend, storage });
        Ok(())
    }

    /// Mounted paths in lexicographic order.
    pub fn mounts(&self) -> Vec<String> {
        let mut mounts: Vec<String> = self.mounts.keys().cloned().collect();
        mounts.sort();
        mounts
    }

    fn mount_for(&self, path: &str) -> Result<&Mount> {
        self.mounts.get(path).ok_or_else(|| Error::not_found("mount", path))
    }

    fn lock_for(&self, lease_id: &str) -> Arc<Mutex<()>> {
        self.locks.entry(lease_id.to_string()).or_default().clone()
    }

    async fn load(&self, lease_id: &str) -> Result<Option<LeaseEntry>> {
        match self.storage.get(&lease_key(lease_id)).await? {
            Some(entry) => entry.decode_json().map(Some),
            None => Ok(None),
        }
    }

    async fn persist(&self, lease: &LeaseEntry) -> Result<()> {
        self.storage.put(StorageEntry::json(lease_key(&lease.lease_id), lease)?).await
    }

    /// Route a request to the backend mounted at `mount`.
    ///
    /// A response carrying a secret is registered as a lease before it is
    /// returned.
    pub async fn handle(&self, mount: &str, request: Request) -> Result<Option<LeasedResponse>> {
        let mount_path = normalize_mount(mount);
        let target = self.mount_for(&mount_path)?;
        let relative_path = request.path.trim_matches('/').to_string();
        let span = crate::backend_span!(request.operation, mount_path, relative_path);
        self.dispatch(&mount_path, &relative_path, target, request).instrument(span).await
    }

    async fn dispatch(
        &self,
        mount_path: &str,
        relative_path: &str,
        target: &Mount,
        request: Request,
    ) -> Result<Option<LeasedResponse>> {
        let Some(response) = target.backend.handle_request(&target.storage, request).await? else {
            return Ok(None);
        };

        let Some(secret) = response.secret else {
            return Ok(Some(LeasedResponse {
                data: response.data,
                warnings: response.warnings,
                ..Default::default()
            }));
        };

        let lease = self.register(mount_path, relative_path, target, secret).await?;
        Ok(Some(LeasedResponse {
            lease_id: lease.lease_id,
            lease_duration: lease.ttl.as_secs(),
            renewable: lease.secret.renewable,
            data: response.data,
            warnings: response.warnings,
        }))
    }

    async fn register(
        &self,
        mount: &str,
        path: &str,
        target: &Mount,
        mut secret: IssuedSecret,
    ) -> Result<LeaseEntry> {
        let backend_config = read_lease_config(&target.storage).await?;
        let max_ttl = effective_max_ttl(backend_config.as_ref(), &self.limits);
        let requested = if secret.ttl.is_zero() { self.limits.default_ttl } else { secret.ttl };
        let ttl = requested.min(max_ttl);

        let now = Utc::now();
        secret.data.clear();
        let lease = LeaseEntry {
            lease_id: format!("{}/{}/{}", mount, path, Uuid::new_v4()),
            mount: mount.to_string(),
            path: path.to_string(),
            issue_time: now,
            expire_time: now + to_chrono(ttl)?,
            last_renewal: None,
            ttl,
            state: RevocationState::Active,
            last_error: None,
            secret,
        };
        self.persist(&lease).await?;
        debug!(lease_id = %lease.lease_id, ttl_secs = ttl.as_secs(), "lease registered");
        Ok(lease)
    }

    /// Extend a lease through its backend's renew callback.
    pub async fn renew(&self, lease_id: &str, increment: Option<Duration>) -> Result<LeasedResponse> {
        let lock = self.lock_for(lease_id);
        let _held = lock.lock().await;
        self.renew_locked(lease_id, increment)
            .instrument(crate::lease_span!("renew", lease_id))
            .await
    }

    async fn renew_locked(&self, lease_id: &str, increment: Option<Duration>) -> Result<LeasedResponse> {
        let mut lease = self.load(lease_id).await?.ok_or_else(|| Error::not_found("lease", lease_id))?;
        let now = Utc::now();
        if lease.state != RevocationState::Active {
            return Err(Error::validation(format!("lease is {} and cannot be renewed", lease.state)));
        }
        if lease.is_expired(now) {
            return Err(Error::validation("lease expired"));
        }
        if !lease.secret.renewable {
            return Err(Error::validation("lease is not renewable"));
        }

        let target = self.mount_for(&lease.mount)?;
        let terms = LeaseTerms { issue_time: lease.issue_time, ttl: lease.ttl, increment };
        let ttl = target.backend.renew(&target.storage, &lease.secret, &terms).await?;

        lease.ttl = ttl;
        lease.expire_time = now + to_chrono(ttl)?;
        lease.last_renewal = Some(now);
        self.persist(&lease).await?;
        info!(ttl_secs = ttl.as_secs(), "lease renewed");

        Ok(LeasedResponse {
            lease_id: lease.lease_id,
            lease_duration: ttl.as_secs(),
            renewable: true,
            ..Default::default()
        })
    }

    /// Revoke a lease through its backend.
    ///
    /// Unknown lease ids succeed. The record is deleted only once the backend
    /// reports success or that the target is already gone; any other failure
    /// leaves it in `revoke_failed` for a later retry.
    pub async fn revoke(&self, lease_id: &str) -> Result<()> {
        let lock = self.lock_for(lease_id);
        let _held = lock.lock().await;
        self.revoke_locked(lease_id)
            .instrument(crate::lease_span!("revoke", lease_id))
            .await
    }

    async fn revoke_locked(&self, lease_id: &str) -> Result<()> {
        let Some(mut lease) = self.load(lease_id).await? else {
            debug!("lease already gone");
            return Ok(());
        };

        // Left over from a revoke that was interrupted before it finished.
        if lease.state == RevocationState::Revoking {
            lease.state = RevocationState::RevokeFailed;
        }
        if !lease.state.begin()? {
            self.storage.delete(&lease_key(lease_id)).await?;
            return Ok(());
        }
        self.persist(&lease).await?;

        let target = self.mount_for(&lease.mount)?;
        let outcome = match target.backend.revoke(&target.storage, &lease.secret).await {
            Err(e) if e.is_already_absent() => Ok(()),
            other => other,
        };

        match outcome {
            Ok(()) => {
                lease.state.finish(true);
                self.storage.delete(&lease_key(lease_id)).await?;
                self.locks.remove(lease_id);
                info!("lease revoked");
                Ok(())
            }
            Err(e) => {
                lease.state.finish(false);
                lease.last_error = Some(e.to_string());
                self.persist(&lease).await?;
                error!(error = %e, "lease revocation failed");
                Err(e)
            }
        }
    }

    /// Revoke every lease whose id starts with `prefix`.
    ///
    /// All matching leases are attempted; the first failure is returned after
    /// the rest have run.
    pub async fn revoke_prefix(&self, prefix: &str) -> Result<usize> {
        let prefix = prefix.trim_start_matches('/');
        let mut revoked = 0;
        let mut first_error = None;
        for lease_id in self.lease_ids(prefix).await? {
            match self.revoke(&lease_id).await {
                Ok(()) => revoked += 1,
                Err(e) => {
                    warn!(lease_id = %lease_id, error = %e, "prefix revocation left a lease behind");
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(revoked),
        }
    }

    /// Revoke expired leases and retry failed revocations.
    ///
    /// Up to [`TIDY_CONCURRENCY`] revocations run at once; the per-lease
    /// locks keep each one serialized against renew and manual revoke.
    pub async fn tidy_expired(&self) -> Result<TidyReport> {
        let now = Utc::now();
        let mut due = Vec::new();
        for lease_id in self.lease_ids("").await? {
            let Some(lease) = self.load(&lease_id).await? else {
                continue;
            };
            if lease.is_expired(now) || lease.state != RevocationState::Active {
                due.push(lease_id);
            }
        }

        let outcomes: Vec<(String, Result<()>)> = stream::iter(due)
            .map(|lease_id| async move {
                let outcome = self.revoke(&lease_id).await;
                (lease_id, outcome)
            })
            .buffer_unordered(TIDY_CONCURRENCY)
            .collect()
            .await;

        let mut report = TidyReport::default();
        for (lease_id, outcome) in outcomes {
            match outcome {
                Ok(()) => report.revoked += 1,
                Err(e) => {
                    warn!(lease_id = %lease_id, error = %e, "expired lease could not be revoked");
                    report.failed += 1;
                }
            }
        }
        if report.revoked > 0 || report.failed > 0 {
            info!(revoked = report.revoked, failed = report.failed, "lease tidy completed");
        }
        Ok(report)
    }

    pub async fn lookup(&self, lease_id: &str) -> Result<LeaseInfo> {
        let lease = self.load(lease_id).await?.ok_or_else(|| Error::not_found("lease", lease_id))?;
        let remaining = (lease.expire_time - Utc::now()).num_seconds().max(0);
        Ok(LeaseInfo {
            id: lease.lease_id,
            issue_time: lease.issue_time,
            expire_time: lease.expire_time,
            last_renewal: lease.last_renewal,
            ttl: u64::try_from(remaining).unwrap_or_default(),
            renewable: lease.secret.renewable && lease.state == RevocationState::Active,
            state: lease.state,
            last_error: lease.last_error,
        })
    }

    /// Ids of all leases under `prefix`, sorted.
    pub async fn lease_ids(&self, prefix: &str) -> Result<Vec<String>> {
        // Lease ids nest like paths; walk the folders and filter the leaves.
        let (folder, partial) = match prefix.rfind('/') {
            Some(idx) => prefix.split_at(idx + 1),
            None => ("", prefix),
        };

        let mut ids = Vec::new();
        let mut pending = vec![folder.to_string()];
        while let Some(dir) = pending.pop() {
            for child in self.storage.list(&lease_key(&dir)).await? {
                let full = format!("{}{}", dir, child);
                if dir == folder && !child.starts_with(partial) {
                    continue;
                }
                if full.ends_with('/') {
                    pending.push(full);
                } else {
                    ids.push(full);
                }
            }
        }
        ids.sort();
        Ok(ids)
    }
}

fn to_chrono(ttl: Duration) -> Result<chrono::Duration> {
    chrono::Duration::from_std(ttl).map_err(|e| Error::validation(format!("ttl out of range: {}", e)))
}
