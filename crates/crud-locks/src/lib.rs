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

//! # PlexSpaces CRUD Locks
//!
//! ## Purpose
//! Serializes CRUD-style operations against external resources identified by a
//! string key, across processes, using a shared key-value store (Redis).
//!
//! ## Architecture
//! - **Mark**: a millisecond-TTL `SET NX` key that makes the status
//!   read-modify-write of one resource exclusive ([`mark`])
//! - **Status record**: JSON `{token, action}` under `crud_lock:<name>:<resource>`
//!   with a TTL ([`LockStatus`])
//! - **Permission table**: which actions may join the one holding a resource
//!   ([`PermissionTable`])
//! - **LRU set**: `crud_lru:<name>`, last-touch time per resource, kept for
//!   external eviction policies
//! - **Facade**: [`CrudLocker`] with `lock`, `unlock`, `lock_do`, `touch`,
//!   `get_status` and the LRU queries
//!
//! ## Design Decisions
//! - **No in-process locks**: all exclusion comes from the store's atomic
//!   primitives and key expiry, so abandoned callers only block until TTLs lapse
//! - **Contention is a value**: `LockError::NeedRetry` for direct callers,
//!   retried by `lock_do` until `LockError::Timeout`
//! - **Backend-agnostic**: [`LockStore`] trait with Redis and in-memory backends
//!
//! ## Backend Support
//! - **InMemory**: HashMap-based (always available, for testing)
//! - **Redis**: Distributed with native TTL (feature: `redis-backend`, default)
//!
//! ## Examples
//!
//! ### Direct lock / unlock
//! ```rust
//! use plexspaces_crud_locks::{new_token, CrudAction, CrudLocker, LockError, MemoryLockStore};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let locker = CrudLocker::new("documents", Arc::new(MemoryLockStore::new()))?;
//! let token = new_token();
//!
//! locker.lock("doc1", CrudAction::Update, &token, Duration::from_secs(1)).await?;
//!
//! // A second writer is told to come back later
//! let other = locker.lock("doc1", CrudAction::Update, &new_token(), Duration::from_secs(1)).await;
//! assert!(matches!(other, Err(LockError::NeedRetry { .. })));
//!
//! assert!(locker.unlock("doc1", CrudAction::Update, &token, false).await?);
//! # Ok(())
//! # }
//! ```

pub mod action;
pub mod config;
pub mod error;
pub mod keys;
pub mod locker;
pub mod mark;
pub mod memory;
pub mod store;

#[cfg(feature = "redis-backend")]
pub mod redis;

pub use action::{CrudAction, LockStatus, PermissionTable};
pub use config::{create_locker_from_config, create_locker_from_env, create_store_from_config, BackendType, LockerConfig};
pub use error::{LockError, LockResult, RetryReason};
pub use locker::{new_token, CrudLocker};
pub use mark::{MarkOptions, Marker};
pub use memory::MemoryLockStore;
pub use store::{KeyTtl, LockStore};

#[cfg(feature = "redis-backend")]
pub use crate::redis::RedisLockStore;
