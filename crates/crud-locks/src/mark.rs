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

//! Mark primitive: a short-lived advisory lock guarding the status
//! read-modify-write of one resource.
//!
//! ## Acquire
//! Repeated `SET crud_mark:<name>:<resource> <token> NX PX <mark_ttl>` at a
//! fixed sub-interval until it succeeds or `max_wait` elapses. Failing to
//! acquire is a normal outcome and is reported as `Ok(false)`.
//!
//! ## Release
//! 1. `PTTL` the mark. Absent: nothing to do.
//! 2. Remaining TTL below `unmark_safe_time`: leave it to expire. Deleting now
//!    could remove a mark another caller sets right after ours lapses.
//! 3. Otherwise `GET` the mark and `DEL` it only if it still holds our token.
//!
//! The safety margin depends on round-trip variance to the store. Too small a
//! margin reintroduces the race step 2 exists to close.

use crate::keys;
use crate::store::{KeyTtl, LockStore};
use crate::LockResult;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Timing knobs for the mark.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarkOptions {
    /// Lifetime of a mark; bounds how long a crashed holder blocks others
    pub mark_ttl: Duration,
    /// How long to keep trying to take the mark
    pub max_wait: Duration,
    /// Pause between attempts while the mark is busy
    pub retry_interval: Duration,
    /// Below this remaining TTL a mark is left to expire instead of deleted
    pub unmark_safe_time: Duration,
}

impl Default for MarkOptions {
    fn default() -> Self {
        Self {
            mark_ttl: Duration::from_millis(100),
            max_wait: Duration::from_millis(200),
            retry_interval: Duration::from_millis(2),
            unmark_safe_time: Duration::from_millis(1),
        }
    }
}

/// Acquires and releases marks for one lock namespace.
#[derive(Clone)]
pub struct Marker {
    name: String,
    store: Arc<dyn LockStore>,
    retry_interval: Duration,
}

impl Marker {
    /// Create a marker for the lock namespace `name`.
    pub fn new(name: impl Into<String>, store: Arc<dyn LockStore>, retry_interval: Duration) -> Self {
        Self {
            name: name.into(),
            store,
            retry_interval: retry_interval.max(Duration::from_millis(1)),
        }
    }

    /// Try to take the mark for `resource` within `max_wait`.
    ///
    /// At least one attempt is made even when `max_wait` is zero.
    pub async fn acquire(
        &self,
        resource: &str,
        token: &str,
        mark_ttl: Duration,
        max_wait: Duration,
    ) -> LockResult<bool> {
        let key = keys::mark_key(&self.name, resource);
        // None: max_wait too large to represent, keep trying
        let deadline = Instant::now().checked_add(max_wait);
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            if self.store.set_if_absent(&key, token, mark_ttl).await? {
                metrics::counter!(
                    "plexspaces_crud_locks_mark_acquire_total",
                    "backend" => self.store.backend_name(),
                    "result" => "acquired"
                )
                .increment(1);
                return Ok(true);
            }

            let now = Instant::now();
            let pause = match deadline {
                Some(deadline) if now >= deadline => break,
                Some(deadline) => self.retry_interval.min(deadline - now),
                None => self.retry_interval,
            };
            tokio::time::sleep(pause).await;
        }

        metrics::counter!(
            "plexspaces_crud_locks_mark_acquire_total",
            "backend" => self.store.backend_name(),
            "result" => "busy"
        )
        .increment(1);
        debug!(key = %key, attempts, "Mark busy");
        Ok(false)
    }

    /// Release the mark for `resource` if it is still ours and safe to delete.
    pub async fn release(&self, resource: &str, token: &str, unmark_safe_time: Duration) -> LockResult<()> {
        let key = keys::mark_key(&self.name, resource);

        match self.store.ttl(&key).await? {
            KeyTtl::Missing => return Ok(()),
            KeyTtl::Expires(remaining) if remaining < unmark_safe_time => {
                debug!(
                    key = %key,
                    remaining_ms = remaining.as_millis() as u64,
                    "Leaving mark to expire"
                );
                return Ok(());
            }
            KeyTtl::Expires(_) | KeyTtl::Persistent => {}
        }

        match self.store.get(&key).await? {
            Some(holder) if holder == token => {
                self.store.delete(&key).await?;
            }
            Some(_) => {
                warn!(key = %key, "Mark taken over by another caller; not deleting");
            }
            None => {}
        }
        Ok(())
    }
}
