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

//! In-memory lock store implementation (for testing).
//!
//! ## Purpose
//! Provides a HashMap-based [`LockStore`] for tests and single-process use.
//!
//! ## Features
//! - Millisecond TTLs with lazy expiry, driven by `tokio::time::Instant` so
//!   tests can pause and advance the clock
//! - Sorted sets with Redis ordering and index semantics
//! - Redis-like type checks (sorted-set commands on a string fail)
//!
//! ## Limitations
//! - Not persistent (data lost on restart)
//! - Not distributed (exclusion only holds within this process)

use crate::store::{KeyTtl, LockStore};
use crate::{LockError, LockResult};
use async_trait::async_trait;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

#[derive(Debug, Clone)]
enum Value {
    Str(String),
    Sorted(HashMap<String, f64>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    /// String entry expiring `ttl` from `now`. A TTL past the clock's range
    /// never expires.
    fn string(value: &str, now: Instant, ttl: Duration) -> Self {
        Self {
            value: Value::Str(value.to_string()),
            expires_at: now.checked_add(ttl),
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|exp| now >= exp)
    }
}

fn wrong_type(key: &str) -> LockError {
    LockError::BackendError(format!(
        "WRONGTYPE Operation against key '{}' holding the wrong kind of value",
        key
    ))
}

/// In-memory lock store.
///
/// ## Example
/// ```rust
/// use plexspaces_crud_locks::{LockStore, MemoryLockStore};
/// use std::time::Duration;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = MemoryLockStore::new();
/// assert!(store.set_if_absent("k", "v", Duration::from_millis(50)).await?);
/// assert!(!store.set_if_absent("k", "w", Duration::from_millis(50)).await?);
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Default)]
pub struct MemoryLockStore {
    data: Arc<RwLock<HashMap<String, Entry>>>,
}

impl MemoryLockStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop expired entries, returning how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut data = self.data.write().await;
        let before = data.len();
        data.retain(|_, entry| !entry.is_expired(now));
        before - data.len()
    }

    /// Number of live keys.
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        let data = self.data.read().await;
        data.values().filter(|entry| !entry.is_expired(now)).count()
    }

    /// True if the store holds no live keys.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn live<'a>(data: &'a HashMap<String, Entry>, key: &str, now: Instant) -> Option<&'a Entry> {
        data.get(key).filter(|entry| !entry.is_expired(now))
    }

    fn sorted_members(set: &HashMap<String, f64>) -> Vec<(&String, f64)> {
        let mut members: Vec<(&String, f64)> = set.iter().map(|(m, s)| (m, *s)).collect();
        members.sort_by(|a, b| match a.1.total_cmp(&b.1) {
            Ordering::Equal => a.0.as_bytes().cmp(b.0.as_bytes()),
            other => other,
        });
        members
    }
}

/// Resolve Redis `ZRANGE` indices against a set of `len` members.
fn resolve_range(len: usize, start: isize, stop: isize) -> Option<(usize, usize)> {
    if len == 0 {
        return None;
    }
    let len = len as isize;
    let start = if start < 0 { (start + len).max(0) } else { start };
    let stop = if stop < 0 { stop + len } else { stop.min(len - 1) };
    if start > stop || start >= len {
        return None;
    }
    Some((start as usize, stop as usize))
}

#[async_trait]
impl LockStore for MemoryLockStore {
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> LockResult<bool> {
        let now = Instant::now();
        let mut data = self.data.write().await;
        if Self::live(&data, key, now).is_some() {
            return Ok(false);
        }
        data.insert(key.to_string(), Entry::string(value, now, ttl));
        Ok(true)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> LockResult<()> {
        let now = Instant::now();
        let mut data = self.data.write().await;
        data.insert(key.to_string(), Entry::string(value, now, ttl));
        Ok(())
    }

    async fn get(&self, key: &str) -> LockResult<Option<String>> {
        let now = Instant::now();
        let data = self.data.read().await;
        match Self::live(&data, key, now) {
            None => Ok(None),
            Some(Entry { value: Value::Str(s), .. }) => Ok(Some(s.clone())),
            Some(_) => Err(wrong_type(key)),
        }
    }

    async fn ttl(&self, key: &str) -> LockResult<KeyTtl> {
        let now = Instant::now();
        let data = self.data.read().await;
        Ok(match Self::live(&data, key, now) {
            None => KeyTtl::Missing,
            Some(Entry { expires_at: None, .. }) => KeyTtl::Persistent,
            Some(Entry { expires_at: Some(exp), .. }) => {
                // PTTL truncates to whole milliseconds
                let remaining = exp.saturating_duration_since(now);
                KeyTtl::Expires(Duration::from_millis(remaining.as_millis() as u64))
            }
        })
    }

    async fn delete(&self, key: &str) -> LockResult<bool> {
        let now = Instant::now();
        let mut data = self.data.write().await;
        match data.remove(key) {
            Some(entry) => Ok(!entry.is_expired(now)),
            None => Ok(false),
        }
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> LockResult<()> {
        let now = Instant::now();
        let mut data = self.data.write().await;
        if data.get(key).is_some_and(|entry| entry.is_expired(now)) {
            data.remove(key);
        }
        let entry = data.entry(key.to_string()).or_insert_with(|| Entry {
            value: Value::Sorted(HashMap::new()),
            expires_at: None,
        });
        match &mut entry.value {
            Value::Sorted(set) => {
                set.insert(member.to_string(), score);
                Ok(())
            }
            Value::Str(_) => Err(wrong_type(key)),
        }
    }

    async fn zrem(&self, key: &str, member: &str) -> LockResult<()> {
        let now = Instant::now();
        let mut data = self.data.write().await;
        let now_empty = match data.get_mut(key) {
            None => return Ok(()),
            Some(entry) if entry.is_expired(now) => return Ok(()),
            Some(Entry { value: Value::Sorted(set), .. }) => {
                set.remove(member);
                set.is_empty()
            }
            Some(_) => return Err(wrong_type(key)),
        };
        // Redis drops a sorted set once its last member is removed
        if now_empty {
            data.remove(key);
        }
        Ok(())
    }

    async fn zcard(&self, key: &str) -> LockResult<u64> {
        let now = Instant::now();
        let data = self.data.read().await;
        match Self::live(&data, key, now) {
            None => Ok(0),
            Some(Entry { value: Value::Sorted(set), .. }) => Ok(set.len() as u64),
            Some(_) => Err(wrong_type(key)),
        }
    }

    async fn zrange(&self, key: &str, start: isize, stop: isize) -> LockResult<Vec<String>> {
        let now = Instant::now();
        let data = self.data.read().await;
        let set = match Self::live(&data, key, now) {
            None => return Ok(Vec::new()),
            Some(Entry { value: Value::Sorted(set), .. }) => set,
            Some(_) => return Err(wrong_type(key)),
        };
        let members = Self::sorted_members(set);
        Ok(match resolve_range(members.len(), start, stop) {
            Some((from, to)) => members[from..=to].iter().map(|(m, _)| m.to_string()).collect(),
            None => Vec::new(),
        })
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
