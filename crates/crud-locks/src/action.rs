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

//! CRUD actions, the persisted status record and the permission table.
//!
//! ## Status Record
//! The status stored under `crud_lock:<name>:<resource>` is a JSON object with
//! exactly two fields:
//! ```json
//! {"token": "01HV6Q...", "action": "update"}
//! ```
//!
//! ## Permission Table
//! Maps the action currently holding a resource to the set of actions that may
//! proceed alongside it. An absent status permits every action. The default
//! table only lets concurrent reads share a resource:
//!
//! | current    | permitted  |
//! |------------|------------|
//! | `create`   | none       |
//! | `retrieve` | `retrieve` |
//! | `update`   | none       |
//! | `delete`   | none       |

use crate::{LockError, LockResult};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

/// Action a caller performs against the protected resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CrudAction {
    /// Create the resource
    Create,
    /// Read the resource
    Retrieve,
    /// Modify the resource
    Update,
    /// Remove the resource
    Delete,
}

impl CrudAction {
    /// All actions, in declaration order.
    pub const ALL: [CrudAction; 4] = [
        CrudAction::Create,
        CrudAction::Retrieve,
        CrudAction::Update,
        CrudAction::Delete,
    ];

    /// Wire name of the action.
    pub fn as_str(&self) -> &'static str {
        match self {
            CrudAction::Create => "create",
            CrudAction::Retrieve => "retrieve",
            CrudAction::Update => "update",
            CrudAction::Delete => "delete",
        }
    }
}

impl fmt::Display for CrudAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CrudAction {
    type Err = LockError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(CrudAction::Create),
            "retrieve" => Ok(CrudAction::Retrieve),
            "update" => Ok(CrudAction::Update),
            "delete" => Ok(CrudAction::Delete),
            other => Err(LockError::InvalidAction(other.to_string())),
        }
    }
}

/// Current holder of a resource, as persisted in the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockStatus {
    /// Opaque token proving ownership
    pub token: String,
    /// Action the holder is performing
    pub action: CrudAction,
}

impl LockStatus {
    /// Create a status record.
    pub fn new(token: impl Into<String>, action: CrudAction) -> Self {
        Self {
            token: token.into(),
            action,
        }
    }

    /// Encode as the JSON payload stored under the lock key.
    pub fn to_json(&self) -> LockResult<String> {
        serde_json::to_string(self).map_err(|e| LockError::SerializationError(e.to_string()))
    }

    /// Decode the JSON payload stored under the lock key.
    pub fn from_json(json: &str) -> LockResult<Self> {
        serde_json::from_str(json).map_err(|e| LockError::DeserializationError(e.to_string()))
    }

    /// True if this record was written by `token` for `action`.
    pub fn is_held_by(&self, action: CrudAction, token: &str) -> bool {
        self.action == action && self.token == token
    }
}

/// Compatibility matrix between the current action and a requested one.
///
/// Validated at construction: every [`CrudAction`] must have an entry, even if
/// the entry is empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    try_from = "HashMap<CrudAction, HashSet<CrudAction>>",
    into = "HashMap<CrudAction, HashSet<CrudAction>>"
)]
pub struct PermissionTable {
    allowed: HashMap<CrudAction, HashSet<CrudAction>>,
}

impl PermissionTable {
    /// Build a table from an explicit mapping.
    ///
    /// ## Errors
    /// - [`LockError::ConfigError`]: an action has no entry
    pub fn from_map(allowed: HashMap<CrudAction, HashSet<CrudAction>>) -> LockResult<Self> {
        for action in CrudAction::ALL {
            if !allowed.contains_key(&action) {
                return Err(LockError::ConfigError(format!(
                    "permission table has no entry for action '{}'",
                    action
                )));
            }
        }
        Ok(Self { allowed })
    }

    /// Parse a table from JSON, e.g.
    /// `{"create": [], "retrieve": ["retrieve"], "update": [], "delete": []}`.
    pub fn from_json(json: &str) -> LockResult<Self> {
        serde_json::from_str(json)
            .map_err(|e| LockError::ConfigError(format!("invalid permission table: {}", e)))
    }

    /// True if `requested` may proceed while `current` holds the resource.
    pub fn permits(&self, current: CrudAction, requested: CrudAction) -> bool {
        self.allowed
            .get(&current)
            .is_some_and(|next| next.contains(&requested))
    }
}

impl Default for PermissionTable {
    fn default() -> Self {
        let mut allowed = HashMap::new();
        allowed.insert(CrudAction::Create, HashSet::new());
        allowed.insert(CrudAction::Retrieve, HashSet::from([CrudAction::Retrieve]));
        allowed.insert(CrudAction::Update, HashSet::new());
        allowed.insert(CrudAction::Delete, HashSet::new());
        Self { allowed }
    }
}

impl TryFrom<HashMap<CrudAction, HashSet<CrudAction>>> for PermissionTable {
    type Error = LockError;

    fn try_from(allowed: HashMap<CrudAction, HashSet<CrudAction>>) -> Result<Self, Self::Error> {
        Self::from_map(allowed)
    }
}

impl From<PermissionTable> for HashMap<CrudAction, HashSet<CrudAction>> {
    fn from(table: PermissionTable) -> Self {
        table.allowed
    }
}
