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

//! Store key naming.
//!
//! These formats are shared with existing deployments and must not change:
//! - Lock: `crud_lock:<name>:<resource>`
//! - Mark: `crud_mark:<name>:<resource>`
//! - LRU set: `crud_lru:<name>`

use crate::{LockError, LockResult};

const LOCK_PREFIX: &str = "crud_lock";
const MARK_PREFIX: &str = "crud_mark";
const LRU_PREFIX: &str = "crud_lru";

/// Key of the status record for `resource`.
pub fn lock_key(name: &str, resource: &str) -> String {
    format!("{}:{}:{}", LOCK_PREFIX, name, resource)
}

/// Key of the mark guarding `resource`.
pub fn mark_key(name: &str, resource: &str) -> String {
    format!("{}:{}:{}", MARK_PREFIX, name, resource)
}

/// Key of the LRU sorted set for the lock namespace.
pub fn lru_key(name: &str) -> String {
    format!("{}:{}", LRU_PREFIX, name)
}

pub(crate) fn validate_name(name: &str) -> LockResult<()> {
    if name.is_empty() {
        return Err(LockError::InvalidKey("lock name must not be empty".to_string()));
    }
    Ok(())
}

pub(crate) fn validate_resource(resource: &str) -> LockResult<()> {
    if resource.is_empty() {
        return Err(LockError::InvalidKey("resource must not be empty".to_string()));
    }
    Ok(())
}
