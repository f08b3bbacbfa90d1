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

//! Redis-based lock store implementation.
//!
//! ## Purpose
//! Backs the CRUD locker with Redis so that exclusion holds across processes
//! and hosts. All synchronization comes from Redis itself: `SET NX PX` for the
//! mark, native key expiry for status records and sorted sets for LRU.
//!
//! ## Usage
//! ```rust,no_run
//! use plexspaces_crud_locks::{CrudLocker, RedisLockStore};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = RedisLockStore::new("redis://localhost:6379").await?;
//! let locker = CrudLocker::new("orders", Arc::new(store))?;
//! let status = locker.get_status("doc1").await?;
//! # Ok(())
//! # }
//! ```

use crate::store::{ttl_millis, KeyTtl, LockStore};
use crate::{LockError, LockResult};
use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands, Client};
use std::time::Duration;
use tracing::{debug, instrument};

/// Redis-backed [`LockStore`].
///
/// ## Design Decisions
/// - **ConnectionManager**: automatic reconnection, cheap to clone per call
/// - **No key prefixing**: key names are fixed so other deployments sharing
///   the Redis instance see the same records
#[derive(Clone)]
pub struct RedisLockStore {
    manager: ConnectionManager,
}

impl RedisLockStore {
    /// Connect to Redis.
    ///
    /// Example URLs:
    /// - `redis://127.0.0.1/`
    /// - `rediss://host:6379/`
    #[instrument(skip(url))]
    pub async fn new(url: &str) -> LockResult<Self> {
        let client = Client::open(url)
            .map_err(|e| LockError::BackendError(format!("failed to create redis client: {e}")))?;
        let manager = ConnectionManager::new(client)
            .await
            .map_err(|e| LockError::BackendError(format!("failed to connect redis: {e}")))?;
        debug!("Redis lock store connected");
        Ok(Self { manager })
    }
}

#[async_trait]
impl LockStore for RedisLockStore {
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> LockResult<bool> {
        let mut conn = self.manager.clone();
        // Reply is "OK" when written, nil when the key already exists
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await
            .map_err(|e| LockError::BackendError(format!("Redis SET NX failed: {}", e)))?;
        Ok(reply.is_some())
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> LockResult<()> {
        let mut conn = self.manager.clone();
        let _: () = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await
            .map_err(|e| LockError::BackendError(format!("Redis SET failed: {}", e)))?;
        Ok(())
    }

    async fn get(&self, key: &str) -> LockResult<Option<String>> {
        let mut conn = self.manager.clone();
        conn.get(key)
            .await
            .map_err(|e| LockError::BackendError(format!("Redis GET failed: {}", e)))
    }

    async fn ttl(&self, key: &str) -> LockResult<KeyTtl> {
        let mut conn = self.manager.clone();
        let millis: i64 = conn
            .pttl(key)
            .await
            .map_err(|e| LockError::BackendError(format!("Redis PTTL failed: {}", e)))?;
        Ok(KeyTtl::from_pttl(millis))
    }

    async fn delete(&self, key: &str) -> LockResult<bool> {
        let mut conn = self.manager.clone();
        let removed: i64 = conn
            .del(key)
            .await
            .map_err(|e| LockError::BackendError(format!("Redis DEL failed: {}", e)))?;
        Ok(removed > 0)
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> LockResult<()> {
        let mut conn = self.manager.clone();
        let _: () = conn
            .zadd(key, member, score)
            .await
            .map_err(|e| LockError::BackendError(format!("Redis ZADD failed: {}", e)))?;
        Ok(())
    }

    async fn zrem(&self, key: &str, member: &str) -> LockResult<()> {
        let mut conn = self.manager.clone();
        let _: () = conn
            .zrem(key, member)
            .await
            .map_err(|e| LockError::BackendError(format!("Redis ZREM failed: {}", e)))?;
        Ok(())
    }

    async fn zcard(&self, key: &str) -> LockResult<u64> {
        let mut conn = self.manager.clone();
        conn.zcard(key)
            .await
            .map_err(|e| LockError::BackendError(format!("Redis ZCARD failed: {}", e)))
    }

    async fn zrange(&self, key: &str, start: isize, stop: isize) -> LockResult<Vec<String>> {
        let mut conn = self.manager.clone();
        conn.zrange(key, start, stop)
            .await
            .map_err(|e| LockError::BackendError(format!("Redis ZRANGE failed: {}", e)))
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }
}

// ============================================================================
// TESTS (require a running Redis instance)
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    async fn create_test_store() -> RedisLockStore {
        RedisLockStore::new("redis://localhost:6379")
            .await
            .expect("Failed to connect to Redis (ensure Redis is running)")
    }

    fn unique_key(prefix: &str) -> String {
        format!("{}-{}", prefix, Ulid::new())
    }

    #[tokio::test]
    #[ignore] // Requires running Redis instance
    async fn test_set_if_absent() {
        let store = create_test_store().await;
        let key = unique_key("mark");

        assert!(store.set_if_absent(&key, "a", Duration::from_secs(5)).await.unwrap());
        assert!(!store.set_if_absent(&key, "b", Duration::from_secs(5)).await.unwrap());
        assert_eq!(store.get(&key).await.unwrap(), Some("a".to_string()));

        assert!(store.delete(&key).await.unwrap());
    }

    #[tokio::test]
    #[ignore]
    async fn test_pttl_sentinels() {
        let store = create_test_store().await;
        let key = unique_key("ttl");

        assert_eq!(store.ttl(&key).await.unwrap(), KeyTtl::Missing);
        store.set(&key, "v", Duration::from_secs(60)).await.unwrap();
        match store.ttl(&key).await.unwrap() {
            KeyTtl::Expires(remaining) => assert!(remaining <= Duration::from_secs(60)),
            other => panic!("unexpected ttl {:?}", other),
        }

        store.delete(&key).await.unwrap();
    }

    #[tokio::test]
    #[ignore]
    async fn test_sorted_set() {
        let store = create_test_store().await;
        let key = unique_key("lru");

        store.zadd(&key, "b", 2.0).await.unwrap();
        store.zadd(&key, "a", 1.0).await.unwrap();
        assert_eq!(store.zcard(&key).await.unwrap(), 2);
        assert_eq!(store.zrange(&key, 0, 0).await.unwrap(), vec!["a"]);

        store.zrem(&key, "a").await.unwrap();
        assert_eq!(store.zrange(&key, 0, -1).await.unwrap(), vec!["b"]);

        store.delete(&key).await.unwrap();
    }
}
