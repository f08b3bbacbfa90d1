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

//! Storage abstraction over the key-value primitives the locker needs.
//!
//! ## Required Primitives
//! - `SET key value [NX] PX ms`: conditional set with millisecond TTL
//! - `GET key`, `DEL key`
//! - `PTTL key`: remaining TTL, with sentinels for "absent" and "no TTL"
//! - Sorted set: `ZADD`, `ZREM`, `ZCARD`, `ZRANGE`
//!
//! Every call is atomic on its own; the locker composes them and relies on the
//! mark for read-modify-write sections.

use crate::LockResult;
use async_trait::async_trait;
use std::time::Duration;

/// Remaining lifetime of a key, as reported by `PTTL`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyTtl {
    /// Key does not exist (`PTTL` returned -2)
    Missing,
    /// Key exists without expiry (`PTTL` returned -1)
    Persistent,
    /// Key expires after the given duration
    Expires(Duration),
}

impl KeyTtl {
    /// Decode a raw `PTTL` reply.
    pub fn from_pttl(millis: i64) -> Self {
        match millis {
            -1 => KeyTtl::Persistent,
            ms if ms >= 0 => KeyTtl::Expires(Duration::from_millis(ms as u64)),
            _ => KeyTtl::Missing,
        }
    }
}

/// Key-value store backing the CRUD locker.
///
/// Implementations must make each method atomic with respect to concurrent
/// callers, across processes for distributed backends.
#[async_trait]
pub trait LockStore: Send + Sync {
    /// `SET key value NX PX ttl`. Returns true if the key was written.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> LockResult<bool>;

    /// `SET key value PX ttl`, overwriting any existing value.
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> LockResult<()>;

    /// `GET key`.
    async fn get(&self, key: &str) -> LockResult<Option<String>>;

    /// `PTTL key`.
    async fn ttl(&self, key: &str) -> LockResult<KeyTtl>;

    /// `DEL key`. Returns true if a key was removed.
    async fn delete(&self, key: &str) -> LockResult<bool>;

    /// `ZADD key score member`, inserting or updating the score.
    async fn zadd(&self, key: &str, member: &str, score: f64) -> LockResult<()>;

    /// `ZREM key member`.
    async fn zrem(&self, key: &str, member: &str) -> LockResult<()>;

    /// `ZCARD key`.
    async fn zcard(&self, key: &str) -> LockResult<u64>;

    /// `ZRANGE key start stop`: members by ascending score, inclusive
    /// bounds, negative indices counted from the end.
    async fn zrange(&self, key: &str, start: isize, stop: isize) -> LockResult<Vec<String>>;

    /// Short backend name for logs and metric labels.
    fn backend_name(&self) -> &'static str;
}

/// Milliseconds for `PX`, rounded up so that sub-millisecond TTLs still expire.
#[cfg_attr(not(feature = "redis-backend"), allow(dead_code))]
pub(crate) fn ttl_millis(ttl: Duration) -> u64 {
    let ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
    if Duration::from_millis(ms) < ttl {
        ms.saturating_add(1)
    } else {
        ms
    }
}
