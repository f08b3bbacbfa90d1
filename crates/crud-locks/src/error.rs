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

//! Error types for CRUD lock operations.

use crate::CrudAction;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Result type for CRUD lock operations.
pub type LockResult<T> = Result<T, LockError>;

/// Why a lock or unlock attempt must be retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryReason {
    /// Another caller holds the mark for this resource.
    MarkBusy,
    /// The current status does not permit the requested action.
    Conflict {
        /// Action currently holding the resource
        current: CrudAction,
        /// Action that was requested
        requested: CrudAction,
    },
}

impl fmt::Display for RetryReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryReason::MarkBusy => write!(f, "mark is held by another caller"),
            RetryReason::Conflict { current, requested } => {
                write!(f, "'{}' is not permitted while '{}' holds the resource", requested, current)
            }
        }
    }
}

/// Errors that can occur during CRUD lock operations.
#[derive(Error, Debug)]
pub enum LockError {
    /// Resource is contended; back off and try the whole operation again
    #[error("Need retry for resource '{resource}': {reason}")]
    NeedRetry {
        /// Resource key
        resource: String,
        /// What blocked the attempt
        reason: RetryReason,
    },

    /// Wait budget exhausted without acquiring the lock
    #[error("Timed out after {}ms waiting for resource '{resource}'", .waited.as_millis())]
    Timeout {
        /// Resource key
        resource: String,
        /// Time spent waiting
        waited: Duration,
    },

    /// Unknown action name
    #[error("Invalid action: {0}")]
    InvalidAction(String),

    /// TTL outside the range the store accepts
    #[error("Invalid TTL: {0}")]
    InvalidTtl(String),

    /// Invalid lock namespace or resource key
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// Backend error (network, wrong type, etc.)
    #[error("Backend error: {0}")]
    BackendError(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Deserialization error
    #[error("Deserialization error: {0}")]
    DeserializationError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl LockError {
    /// Returns true for contention that a caller is expected to retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LockError::NeedRetry { .. })
    }

    pub(crate) fn need_retry(resource: &str, reason: RetryReason) -> Self {
        LockError::NeedRetry {
            resource: resource.to_string(),
            reason,
        }
    }
}

impl From<serde_json::Error> for LockError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_data() || err.is_syntax() || err.is_eof() {
            LockError::DeserializationError(err.to_string())
        } else {
            LockError::SerializationError(err.to_string())
        }
    }
}
