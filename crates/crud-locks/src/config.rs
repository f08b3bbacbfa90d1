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

//! Configuration support for the CRUD locker.
//!
//! ## Environment Variables
//!
//! ### Backend Selection
//! - `PLEXSPACES_CRUD_LOCKS_BACKEND`: Backend type (default: "in-memory")
//!   - "in-memory" | "memory" → MemoryLockStore
//!   - "redis" → RedisLockStore
//! - `PLEXSPACES_CRUD_LOCKS_REDIS_URL`: Redis server URL (default: "redis://localhost:6379")
//!
//! ### Locker
//! - `PLEXSPACES_CRUD_LOCKS_NAME`: Lock namespace (default: "default")
//! - `PLEXSPACES_CRUD_LOCKS_PERMISSIONS`: JSON permission table (default: reads share, all else exclusive)
//!
//! ### Mark Timing (milliseconds)
//! - `PLEXSPACES_CRUD_LOCKS_MARK_TTL_MS` (default: 100)
//! - `PLEXSPACES_CRUD_LOCKS_MARK_MAX_WAIT_MS` (default: 200)
//! - `PLEXSPACES_CRUD_LOCKS_MARK_RETRY_MS` (default: 2)
//! - `PLEXSPACES_CRUD_LOCKS_UNMARK_SAFE_MS` (default: 1). Must cover the
//!   round-trip variance to the store; too small a margin lets a release delete
//!   a mark that expired and was taken by another caller.
//!
//! ## Examples
//! ```bash
//! export PLEXSPACES_CRUD_LOCKS_BACKEND=redis
//! export PLEXSPACES_CRUD_LOCKS_REDIS_URL=redis://localhost:6379
//! export PLEXSPACES_CRUD_LOCKS_NAME=orders
//! cargo run
//! ```

use crate::mark::MarkOptions;
use crate::{CrudLocker, LockError, LockResult, LockStore, MemoryLockStore, PermissionTable};
use std::sync::Arc;
use std::time::Duration;

/// Backend type configuration.
#[derive(Clone, Debug)]
pub enum BackendType {
    /// In-memory backend (default, single process only)
    InMemory,
    /// Redis backend (requires redis-backend feature)
    Redis {
        /// Redis server URL
        url: String,
    },
}

#[allow(clippy::derivable_impls)]
impl Default for BackendType {
    fn default() -> Self {
        Self::InMemory
    }
}

/// CRUD locker configuration.
#[derive(Clone, Debug)]
pub struct LockerConfig {
    /// Lock namespace, the `<name>` in every key
    pub name: String,
    /// Store backend
    pub backend: BackendType,
    /// Mark timings
    pub mark: MarkOptions,
    /// Action compatibility matrix
    pub permissions: PermissionTable,
}

impl Default for LockerConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            backend: BackendType::InMemory,
            mark: MarkOptions::default(),
            permissions: PermissionTable::default(),
        }
    }
}

fn env_millis(var: &str, default: Duration) -> LockResult<Duration> {
    match std::env::var(var) {
        Ok(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Duration::from_millis)
            .map_err(|_| LockError::ConfigError(format!("{} must be milliseconds, got '{}'", var, raw))),
        Err(_) => Ok(default),
    }
}

impl LockerConfig {
    /// Create configuration with explicit name and backend, default timings.
    pub fn new(name: impl Into<String>, backend: BackendType) -> Self {
        Self {
            name: name.into(),
            backend,
            ..Self::default()
        }
    }

    /// Create configuration from environment variables.
    ///
    /// See module documentation for the complete list.
    pub fn from_env() -> LockResult<Self> {
        let backend_str = std::env::var("PLEXSPACES_CRUD_LOCKS_BACKEND")
            .unwrap_or_else(|_| "in-memory".to_string())
            .to_lowercase();

        let backend = match backend_str.as_str() {
            "in-memory" | "memory" => BackendType::InMemory,
            "redis" => {
                let url = std::env::var("PLEXSPACES_CRUD_LOCKS_REDIS_URL")
                    .unwrap_or_else(|_| "redis://localhost:6379".to_string());
                BackendType::Redis { url }
            }
            other => {
                return Err(LockError::ConfigError(format!(
                    "Unknown backend type: {}. Valid options: in-memory, redis",
                    other
                )));
            }
        };

        let name = std::env::var("PLEXSPACES_CRUD_LOCKS_NAME").unwrap_or_else(|_| "default".to_string());

        let defaults = MarkOptions::default();
        let mark = MarkOptions {
            mark_ttl: env_millis("PLEXSPACES_CRUD_LOCKS_MARK_TTL_MS", defaults.mark_ttl)?,
            max_wait: env_millis("PLEXSPACES_CRUD_LOCKS_MARK_MAX_WAIT_MS", defaults.max_wait)?,
            retry_interval: env_millis("PLEXSPACES_CRUD_LOCKS_MARK_RETRY_MS", defaults.retry_interval)?,
            unmark_safe_time: env_millis("PLEXSPACES_CRUD_LOCKS_UNMARK_SAFE_MS", defaults.unmark_safe_time)?,
        };

        let permissions = match std::env::var("PLEXSPACES_CRUD_LOCKS_PERMISSIONS") {
            Ok(json) => PermissionTable::from_json(&json)?,
            Err(_) => PermissionTable::default(),
        };

        Ok(Self {
            name,
            backend,
            mark,
            permissions,
        })
    }
}

/// Create the configured lock store.
pub async fn create_store_from_config(config: &LockerConfig) -> LockResult<Arc<dyn LockStore>> {
    match &config.backend {
        BackendType::InMemory => Ok(Arc::new(MemoryLockStore::new())),

        #[cfg(feature = "redis-backend")]
        BackendType::Redis { url } => {
            let store = crate::redis::RedisLockStore::new(url).await?;
            Ok(Arc::new(store))
        }

        #[cfg(not(feature = "redis-backend"))]
        BackendType::Redis { .. } => Err(LockError::ConfigError(
            "Redis backend requires 'redis-backend' feature".to_string(),
        )),
    }
}

/// Create a locker, and its store, from explicit configuration.
///
/// ## Examples
/// ```rust
/// use plexspaces_crud_locks::{create_locker_from_config, BackendType, LockerConfig};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let locker = create_locker_from_config(LockerConfig::new("orders", BackendType::InMemory)).await?;
/// assert_eq!(locker.name(), "orders");
/// # Ok(())
/// # }
/// ```
pub async fn create_locker_from_config(config: LockerConfig) -> LockResult<CrudLocker> {
    let store = create_store_from_config(&config).await?;
    CrudLocker::with_options(config.name, store, config.permissions, config.mark)
}

/// Create a locker from environment configuration.
pub async fn create_locker_from_env() -> LockResult<CrudLocker> {
    let config = LockerConfig::from_env()?;
    create_locker_from_config(config).await
}
