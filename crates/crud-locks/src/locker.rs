// SPDX-License-Identifier: LGPL-2.1-or-later
// Copyright (C) 2025 Shahzad A. Bhatti <bhatti@plexobject.com>
//
// This file is part of PlexSpaces.
//
// PlexSpaces is free software: you can redistribute it and/or modify
// it under the terms of the GNU Lesser General Public License as published by
// the Free Software Foundation, either version 2.1 of the License, or
// (at your option) any later version.
//
// PlexSpaces is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Lesser General Public License for more details.
//
// You should have received a copy of the GNU Lesser General Public License
// along with PlexSpaces. If not, see <https://www.gnu.org/licenses/>.

//! CRUD locker facade.
//!
//! ## State Machine (per resource)
//! `Unlocked` (no status record) -> `Locked(action, token)` -> `Unlocked`, on a
//! matching unlock or when the status TTL lapses.
//!
//! ## Transaction
//! Every lock and non-forced unlock runs as:
//! 1. take the mark (bounded wait, busy mark -> `NeedRetry`)
//! 2. read the status, check the permission table, write or delete the status,
//!    update the LRU set
//! 3. release the mark, whatever step 2 returned
//!
//! `NeedRetry` means the resource is contended, not broken. [`CrudLocker::lock_do`]
//! retries it until its wait budget runs out and then reports `Timeout`.

use crate::action::{CrudAction, LockStatus, PermissionTable};
use crate::error::RetryReason;
use crate::keys;
use crate::mark::{MarkOptions, Marker};
use crate::store::LockStore;
use crate::{LockError, LockResult};
use chrono::Utc;
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};
use ulid::Ulid;

/// Unlock attempts made by `lock_do` before leaving the status to its TTL.
const RELEASE_ATTEMPTS: u32 = 3;

/// Generate a fresh ownership token.
pub fn new_token() -> String {
    Ulid::new().to_string()
}

/// LRU score: seconds since the Unix epoch, microsecond precision.
fn lru_score() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

fn validate_ttl(ttl: Duration) -> LockResult<()> {
    if ttl.is_zero() {
        return Err(LockError::InvalidTtl("lock TTL must be greater than zero".to_string()));
    }
    Ok(())
}

/// Distributed CRUD lock over a shared [`LockStore`].
///
/// Holds no lock state of its own; every decision is made against the store,
/// so any number of lockers in any number of processes can share a namespace.
///
/// ## Example
/// ```rust
/// use plexspaces_crud_locks::{CrudAction, CrudLocker, MemoryLockStore};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let locker = CrudLocker::new("orders", Arc::new(MemoryLockStore::new()))?;
///
/// let total = locker
///     .lock_do("doc1", CrudAction::Update, Duration::from_secs(5), Duration::from_secs(1), |_status| async {
///         40 + 2
///     })
///     .await?;
/// assert_eq!(total, 42);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct CrudLocker {
    name: String,
    store: Arc<dyn LockStore>,
    marker: Marker,
    permissions: PermissionTable,
    options: MarkOptions,
}

impl CrudLocker {
    /// Create a locker with the default permission table and mark timings.
    pub fn new(name: impl Into<String>, store: Arc<dyn LockStore>) -> LockResult<Self> {
        Self::with_options(name, store, PermissionTable::default(), MarkOptions::default())
    }

    /// Create a locker with an explicit permission table and mark timings.
    pub fn with_options(
        name: impl Into<String>,
        store: Arc<dyn LockStore>,
        permissions: PermissionTable,
        options: MarkOptions,
    ) -> LockResult<Self> {
        let name = name.into();
        keys::validate_name(&name)?;
        if options.mark_ttl.is_zero() {
            return Err(LockError::ConfigError("mark TTL must be greater than zero".to_string()));
        }
        let marker = Marker::new(name.clone(), store.clone(), options.retry_interval);
        Ok(Self {
            name,
            store,
            marker,
            permissions,
            options,
        })
    }

    /// Lock namespace name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Permission table in force.
    pub fn permissions(&self) -> &PermissionTable {
        &self.permissions
    }

    /// Mark timings in force.
    pub fn options(&self) -> &MarkOptions {
        &self.options
    }

    /// Current status of `resource`, or `None` if it is unlocked.
    #[instrument(skip(self), fields(name = %self.name))]
    pub async fn get_status(&self, resource: &str) -> LockResult<Option<LockStatus>> {
        keys::validate_resource(resource)?;
        self.read_status(resource).await
    }

    /// Lock `resource` for `action` on behalf of `token`.
    ///
    /// ## Returns
    /// - `Ok(LockStatus)`: status written with `ttl`
    /// - `Err(LockError::NeedRetry)`: mark busy, or the current action does not
    ///   permit `action`
    /// - `Err(LockError::InvalidTtl)`: `ttl` is zero
    #[instrument(skip(self), fields(name = %self.name))]
    pub async fn lock(
        &self,
        resource: &str,
        action: CrudAction,
        token: &str,
        ttl: Duration,
    ) -> LockResult<LockStatus> {
        self.lock_within(resource, action, token, ttl, self.options.max_wait)
            .await
    }

    /// `lock`, waiting at most `mark_wait` for the mark.
    async fn lock_within(
        &self,
        resource: &str,
        action: CrudAction,
        token: &str,
        ttl: Duration,
        mark_wait: Duration,
    ) -> LockResult<LockStatus> {
        keys::validate_resource(resource)?;
        validate_ttl(ttl)?;

        let this = self;
        let result = self
            .with_mark(resource, token, mark_wait, move || async move {
                this.write_status(resource, action, token, ttl).await
            })
            .await;

        let outcome = match &result {
            Ok(_) => "acquired",
            Err(e) if e.is_retryable() => "retry",
            Err(_) => "error",
        };
        metrics::counter!(
            "plexspaces_crud_locks_lock_total",
            "backend" => self.store.backend_name(),
            "result" => outcome
        )
        .increment(1);
        match &result {
            Ok(_) => debug!(resource = %resource, action = %action, "Lock acquired"),
            Err(e) => debug!(resource = %resource, action = %action, error = %e, "Lock not acquired"),
        }
        result
    }

    /// Release `resource` if it is held for `action` by `token`.
    ///
    /// ## Behavior
    /// - `force = true`: delete the status unconditionally, without the mark
    /// - otherwise the status is removed only on an exact action and token
    ///   match; a mismatch is not an error
    ///
    /// ## Returns
    /// - `Ok(true)`: a status record was removed
    /// - `Ok(false)`: nothing removed (already unlocked or held by someone else)
    /// - `Err(LockError::NeedRetry)`: mark busy
    #[instrument(skip(self), fields(name = %self.name))]
    pub async fn unlock(
        &self,
        resource: &str,
        action: CrudAction,
        token: &str,
        force: bool,
    ) -> LockResult<bool> {
        keys::validate_resource(resource)?;
        let lock_key = keys::lock_key(&self.name, resource);

        let result = if force {
            let removed = self.store.delete(&lock_key).await?;
            warn!(resource = %resource, removed, "Forced unlock");
            Ok(removed)
        } else {
            let this = self;
            let lock_key = &lock_key;
            self.with_mark(resource, token, self.options.max_wait, move || async move {
                match this.read_status(resource).await? {
                    Some(current) if current.is_held_by(action, token) => this.store.delete(lock_key).await,
                    _ => Ok(false),
                }
            })
            .await
        };

        let outcome = match &result {
            Ok(true) => "released",
            Ok(false) => "not_held",
            Err(e) if e.is_retryable() => "retry",
            Err(_) => "error",
        };
        metrics::counter!(
            "plexspaces_crud_locks_unlock_total",
            "backend" => self.store.backend_name(),
            "result" => outcome
        )
        .increment(1);
        result
    }

    /// Lock `resource`, run `func`, then unlock.
    ///
    /// A fresh token is generated for the call. Contention is retried every
    /// `ttl / 4` (at least 1ms) so a waiter gets several chances within one
    /// lock lifetime. Waiting for the mark counts against `max_wait` too.
    /// `func` receives the status it runs under. A `max_wait` too large to
    /// add to the clock waits indefinitely.
    ///
    /// ## Returns
    /// - `Ok(T)`: output of `func`
    /// - `Err(LockError::Timeout)`: `max_wait` elapsed without acquiring the lock
    /// - other errors from the store, unchanged
    ///
    /// Unlock is attempted whether `func` returns or panics; a panic is
    /// resumed once the unlock is done. Unlock failures are logged and the
    /// status then lapses with its TTL.
    #[instrument(skip(self, func), fields(name = %self.name))]
    pub async fn lock_do<F, Fut, T>(
        &self,
        resource: &str,
        action: CrudAction,
        ttl: Duration,
        max_wait: Duration,
        func: F,
    ) -> LockResult<T>
    where
        F: FnOnce(LockStatus) -> Fut,
        Fut: Future<Output = T>,
    {
        keys::validate_resource(resource)?;
        validate_ttl(ttl)?;

        let token = new_token();
        let interval = (ttl / 4).max(Duration::from_millis(1));
        let start = Instant::now();
        let deadline = start.checked_add(max_wait);
        let mut attempts = 0u32;

        let status = loop {
            attempts += 1;
            let mark_wait = match deadline {
                Some(deadline) => self
                    .options
                    .max_wait
                    .min(deadline.saturating_duration_since(Instant::now())),
                None => self.options.max_wait,
            };
            match self.lock_within(resource, action, &token, ttl, mark_wait).await {
                Ok(status) => break status,
                Err(e) if e.is_retryable() => {
                    let now = Instant::now();
                    let remaining = deadline.map(|deadline| deadline.saturating_duration_since(now));
                    if remaining == Some(Duration::ZERO) {
                        let waited = now - start;
                        metrics::counter!(
                            "plexspaces_crud_locks_timeouts_total",
                            "backend" => self.store.backend_name()
                        )
                        .increment(1);
                        warn!(
                            resource = %resource,
                            action = %action,
                            attempts,
                            waited_ms = waited.as_millis() as u64,
                            "Timed out waiting for lock"
                        );
                        return Err(LockError::Timeout {
                            resource: resource.to_string(),
                            waited,
                        });
                    }
                    tokio::time::sleep(remaining.map_or(interval, |left| interval.min(left))).await;
                }
                Err(e) => {
                    // The status may have been written before the failure
                    self.release_quietly(resource, action, &token).await;
                    return Err(e);
                }
            }
        };

        metrics::histogram!(
            "plexspaces_crud_locks_lock_do_wait_seconds",
            "backend" => self.store.backend_name()
        )
        .record(start.elapsed().as_secs_f64());
        debug!(resource = %resource, action = %action, attempts, "Running under lock");

        let output = AssertUnwindSafe(async move { func(status).await })
            .catch_unwind()
            .await;
        self.release_quietly(resource, action, &token).await;
        match output {
            Ok(output) => Ok(output),
            Err(panic) => {
                warn!(resource = %resource, action = %action, "Critical section panicked; lock released");
                std::panic::resume_unwind(panic)
            }
        }
    }

    /// Bump `resource` to most recently used without locking it.
    #[instrument(skip(self), fields(name = %self.name))]
    pub async fn touch(&self, resource: &str) -> LockResult<()> {
        keys::validate_resource(resource)?;
        self.store
            .zadd(&keys::lru_key(&self.name), resource, lru_score())
            .await
    }

    /// Number of resources in the LRU set.
    pub async fn lru_count(&self) -> LockResult<u64> {
        self.store.zcard(&keys::lru_key(&self.name)).await
    }

    /// Up to `count` least recently used resources, oldest first.
    pub async fn lru_get_oldest(&self, count: usize) -> LockResult<Vec<String>> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let stop = isize::try_from(count - 1).unwrap_or(isize::MAX);
        self.store.zrange(&keys::lru_key(&self.name), 0, stop).await
    }

    /// Drop the whole LRU set for this namespace.
    #[instrument(skip(self), fields(name = %self.name))]
    pub async fn lru_reset(&self) -> LockResult<()> {
        self.store.delete(&keys::lru_key(&self.name)).await?;
        Ok(())
    }

    async fn read_status(&self, resource: &str) -> LockResult<Option<LockStatus>> {
        let lock_key = keys::lock_key(&self.name, resource);
        match self.store.get(&lock_key).await? {
            Some(json) => LockStatus::from_json(&json).map(Some),
            None => Ok(None),
        }
    }

    /// Body of `lock`; must run while holding the mark.
    async fn write_status(
        &self,
        resource: &str,
        action: CrudAction,
        token: &str,
        ttl: Duration,
    ) -> LockResult<LockStatus> {
        if let Some(current) = self.read_status(resource).await? {
            if !self.permissions.permits(current.action, action) {
                return Err(LockError::need_retry(
                    resource,
                    RetryReason::Conflict {
                        current: current.action,
                        requested: action,
                    },
                ));
            }
        }

        let status = LockStatus::new(token, action);
        self.store
            .set(&keys::lock_key(&self.name, resource), &status.to_json()?, ttl)
            .await?;

        let lru_key = keys::lru_key(&self.name);
        if action == CrudAction::Delete {
            self.store.zrem(&lru_key, resource).await?;
        } else {
            self.store.zadd(&lru_key, resource, lru_score()).await?;
        }
        Ok(status)
    }

    /// Run `op` while holding the mark for `resource`, releasing it afterwards
    /// whatever `op` returned.
    async fn with_mark<F, Fut, T>(
        &self,
        resource: &str,
        token: &str,
        mark_wait: Duration,
        op: F,
    ) -> LockResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = LockResult<T>>,
    {
        let acquired = self
            .marker
            .acquire(resource, token, self.options.mark_ttl, mark_wait)
            .await?;
        if !acquired {
            return Err(LockError::need_retry(resource, RetryReason::MarkBusy));
        }

        let result = op().await;

        // The mark lapses on its own TTL, so a failed release only delays others
        if let Err(e) = self
            .marker
            .release(resource, token, self.options.unmark_safe_time)
            .await
        {
            warn!(resource = %resource, error = %e, "Failed to release mark");
        }
        result
    }

    /// Best-effort unlock used by `lock_do`.
    async fn release_quietly(&self, resource: &str, action: CrudAction, token: &str) {
        for attempt in 1..=RELEASE_ATTEMPTS {
            match self.unlock(resource, action, token, false).await {
                Ok(_) => return,
                Err(e) if e.is_retryable() && attempt < RELEASE_ATTEMPTS => continue,
                Err(e) => {
                    warn!(
                        resource = %resource,
                        action = %action,
                        error = %e,
                        "Unlock failed; status will expire with its TTL"
                    );
                    return;
                }
            }
        }
    }
}
