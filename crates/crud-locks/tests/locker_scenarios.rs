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

//! CRUD locker integration tests against the in-memory store.
//!
//! These tests verify:
//! - The mark serializes status read-modify-write even for shared actions
//! - Mutual exclusion of writers under concurrent `lock_do`
//! - Shared access for compatible actions
//! - Token checks on unlock under concurrent attempts
//! - LRU bookkeeping across lock, delete and touch
//! - Several lockers sharing one store behave as one namespace

use async_trait::async_trait;
use plexspaces_crud_locks::{
    CrudAction, CrudLocker, KeyTtl, LockError, LockResult, LockStatus, LockStore, MarkOptions, MemoryLockStore,
    PermissionTable, RetryReason,
};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::time::{sleep, Duration};

fn shared_store() -> Arc<MemoryLockStore> {
    Arc::new(MemoryLockStore::new())
}

fn locker_on(store: &Arc<MemoryLockStore>, name: &str) -> CrudLocker {
    CrudLocker::new(name, store.clone()).unwrap()
}

/// Store wrapper that counts callers sitting between reading a status
/// record and writing it back.
#[derive(Default)]
struct SectionCountingStore {
    inner: MemoryLockStore,
    open: AtomicUsize,
    max_open: AtomicUsize,
}

fn is_status_key(key: &str) -> bool {
    key.starts_with("crud_lock:")
}

#[async_trait]
impl LockStore for SectionCountingStore {
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> LockResult<bool> {
        self.inner.set_if_absent(key, value, ttl).await
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> LockResult<()> {
        if is_status_key(key) {
            self.open.fetch_sub(1, Ordering::SeqCst);
        }
        self.inner.set(key, value, ttl).await
    }

    async fn get(&self, key: &str) -> LockResult<Option<String>> {
        let value = self.inner.get(key).await?;
        if is_status_key(key) {
            let now = self.open.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_open.fetch_max(now, Ordering::SeqCst);
            // Hold the section open long enough for overlaps to show
            sleep(Duration::from_millis(1)).await;
        }
        Ok(value)
    }

    async fn ttl(&self, key: &str) -> LockResult<KeyTtl> {
        self.inner.ttl(key).await
    }

    async fn delete(&self, key: &str) -> LockResult<bool> {
        self.inner.delete(key).await
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> LockResult<()> {
        self.inner.zadd(key, member, score).await
    }

    async fn zrem(&self, key: &str, member: &str) -> LockResult<()> {
        self.inner.zrem(key, member).await
    }

    async fn zcard(&self, key: &str) -> LockResult<u64> {
        self.inner.zcard(key).await
    }

    async fn zrange(&self, key: &str, start: isize, stop: isize) -> LockResult<Vec<String>> {
        self.inner.zrange(key, start, stop).await
    }

    fn backend_name(&self) -> &'static str {
        "counting"
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_mark_serializes_shared_locks() {
    let store = Arc::new(SectionCountingStore::default());
    let mut handles = vec![];

    for i in 0..16 {
        // Retrieve never conflicts with Retrieve; only the mark keeps these apart
        let locker = CrudLocker::new("sections", store.clone()).unwrap();
        handles.push(tokio::spawn(async move {
            let token = format!("reader-{}", i);
            loop {
                match locker
                    .lock("shared", CrudAction::Retrieve, &token, Duration::from_secs(5))
                    .await
                {
                    Ok(status) => return status,
                    Err(e) if e.is_retryable() => sleep(Duration::from_millis(1)).await,
                    Err(e) => panic!("unexpected lock error: {}", e),
                }
            }
        }));
    }

    for handle in handles {
        let status = handle.await.unwrap();
        assert_eq!(status.action, CrudAction::Retrieve);
    }

    assert_eq!(store.open.load(Ordering::SeqCst), 0);
    assert_eq!(store.max_open.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_writers_are_mutually_exclusive() {
    let store = shared_store();
    let inside = Arc::new(AtomicUsize::new(0));
    let max_inside = Arc::new(AtomicUsize::new(0));
    let completed = Arc::new(AtomicUsize::new(0));
    let mut handles = vec![];

    for _ in 0..8 {
        // One locker per task, as separate processes would have
        let locker = locker_on(&store, "exclusive");
        let inside = inside.clone();
        let max_inside = max_inside.clone();
        let completed = completed.clone();
        handles.push(tokio::spawn(async move {
            locker
                .lock_do(
                    "shared",
                    CrudAction::Update,
                    Duration::from_millis(200),
                    Duration::from_secs(10),
                    |_| async move {
                        let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                        max_inside.fetch_max(now, Ordering::SeqCst);
                        sleep(Duration::from_millis(5)).await;
                        inside.fetch_sub(1, Ordering::SeqCst);
                        completed.fetch_add(1, Ordering::SeqCst);
                    },
                )
                .await
        }));
    }

    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(completed.load(Ordering::SeqCst), 8);
    assert_eq!(max_inside.load(Ordering::SeqCst), 1);
    let locker = locker_on(&store, "exclusive");
    assert!(locker.get_status("shared").await.unwrap().is_none());
}

#[tokio::test]
async fn test_readers_share_resource() {
    let store = shared_store();
    let locker = locker_on(&store, "readers");
    let ttl = Duration::from_secs(5);

    let first = locker.lock("doc", CrudAction::Retrieve, "r1", ttl).await.unwrap();
    let second = locker.lock("doc", CrudAction::Retrieve, "r2", ttl).await.unwrap();
    assert_eq!(first.action, second.action);

    // Latest reader owns the record; a writer must wait
    assert_eq!(locker.get_status("doc").await.unwrap(), Some(LockStatus::new("r2", CrudAction::Retrieve)));
    let err = locker.lock("doc", CrudAction::Delete, "d1", ttl).await.unwrap_err();
    assert!(matches!(
        err,
        LockError::NeedRetry {
            reason: RetryReason::Conflict {
                current: CrudAction::Retrieve,
                requested: CrudAction::Delete
            },
            ..
        }
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_wrong_tokens_never_unlock() {
    let store = shared_store();
    let holder = locker_on(&store, "tokens");
    holder
        .lock("doc1", CrudAction::Update, "abc", Duration::from_secs(10))
        .await
        .unwrap();

    let mut handles = vec![];
    for i in 0..16 {
        let locker = locker_on(&store, "tokens");
        handles.push(tokio::spawn(async move {
            locker
                .unlock("doc1", CrudAction::Update, &format!("intruder-{}", i), false)
                .await
        }));
    }
    for handle in handles {
        match handle.await.unwrap() {
            Ok(removed) => assert!(!removed),
            Err(e) => assert!(e.is_retryable(), "unexpected error {e}"),
        }
    }

    assert_eq!(holder.get_status("doc1").await.unwrap().unwrap().token, "abc");
    assert!(holder.unlock("doc1", CrudAction::Update, "abc", false).await.unwrap());
    assert!(holder.get_status("doc1").await.unwrap().is_none());
}

#[tokio::test]
async fn test_document_scenario() {
    let store = shared_store();
    let locker = locker_on(&store, "docs");
    let ttl = Duration::from_millis(1000);

    locker.lock("doc1", CrudAction::Update, "abc", ttl).await.unwrap();
    let err = locker.lock("doc1", CrudAction::Update, "xyz", ttl).await.unwrap_err();
    assert!(err.is_retryable());

    assert!(!locker.unlock("doc1", CrudAction::Update, "wrong-token", false).await.unwrap());
    assert!(locker.get_status("doc1").await.unwrap().is_some());

    assert!(locker.unlock("doc1", CrudAction::Update, "abc", false).await.unwrap());
    assert!(locker.get_status("doc1").await.unwrap().is_none());
}

#[tokio::test]
async fn test_lock_do_timeout_scenario() {
    let store = shared_store();
    let locker = locker_on(&store, "docs");
    locker
        .lock("doc2", CrudAction::Delete, "deleter", Duration::from_secs(5))
        .await
        .unwrap();

    let started = std::time::Instant::now();
    let result = locker
        .lock_do(
            "doc2",
            CrudAction::Retrieve,
            Duration::from_millis(200),
            Duration::from_millis(50),
            |_| async { "read" },
        )
        .await;

    assert!(matches!(result, Err(LockError::Timeout { .. })));
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(50), "returned after {:?}", elapsed);
    assert!(elapsed < Duration::from_millis(500), "returned after {:?}", elapsed);
}

#[tokio::test]
async fn test_lru_recency_and_delete() {
    let store = shared_store();
    let locker = locker_on(&store, "lru");
    let ttl = Duration::from_secs(5);

    for (i, resource) in ["a", "b", "c"].iter().enumerate() {
        locker
            .lock(resource, CrudAction::Retrieve, &format!("t{}", i), ttl)
            .await
            .unwrap();
        sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(locker.lru_get_oldest(1).await.unwrap(), vec!["a"]);

    // Re-locking the oldest moves it to the back
    locker.lock("a", CrudAction::Retrieve, "t3", ttl).await.unwrap();
    assert_eq!(locker.lru_get_oldest(3).await.unwrap(), vec!["b", "c", "a"]);

    // touch without locking
    sleep(Duration::from_millis(5)).await;
    locker.touch("b").await.unwrap();
    assert_eq!(locker.lru_get_oldest(3).await.unwrap(), vec!["c", "a", "b"]);

    // Delete-lock drops the resource from the LRU set
    locker.lock("x", CrudAction::Delete, "d", ttl).await.unwrap();
    locker.unlock("a", CrudAction::Retrieve, "t3", false).await.unwrap();
    locker.lock("a", CrudAction::Delete, "d2", ttl).await.unwrap();
    assert_eq!(locker.lru_count().await.unwrap(), 2);
    assert_eq!(locker.lru_get_oldest(10).await.unwrap(), vec!["c", "b"]);
}

#[tokio::test]
async fn test_namespaces_are_isolated() {
    let store = shared_store();
    let orders = locker_on(&store, "orders");
    let invoices = locker_on(&store, "invoices");
    let ttl = Duration::from_secs(5);

    orders.lock("42", CrudAction::Update, "o", ttl).await.unwrap();
    invoices.lock("42", CrudAction::Update, "i", ttl).await.unwrap();

    assert_eq!(orders.lru_count().await.unwrap(), 1);
    assert_eq!(invoices.lru_count().await.unwrap(), 1);
    assert!(store.get("crud_lock:orders:42").await.unwrap().is_some());
    assert!(store.get("crud_lock:invoices:42").await.unwrap().is_some());
    assert_eq!(store.zcard("crud_lru:orders").await.unwrap(), 1);

    orders.lru_reset().await.unwrap();
    assert_eq!(orders.lru_count().await.unwrap(), 0);
    assert_eq!(invoices.lru_count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_custom_permission_table() {
    let mut allowed = HashMap::new();
    allowed.insert(CrudAction::Create, HashSet::new());
    allowed.insert(CrudAction::Retrieve, HashSet::from([CrudAction::Retrieve, CrudAction::Update]));
    allowed.insert(CrudAction::Update, HashSet::from([CrudAction::Retrieve]));
    allowed.insert(CrudAction::Delete, HashSet::new());
    let permissions = PermissionTable::from_map(allowed).unwrap();

    let store = shared_store();
    let locker = CrudLocker::with_options("custom", store.clone(), permissions, MarkOptions::default()).unwrap();
    let ttl = Duration::from_secs(5);

    locker.lock("doc", CrudAction::Retrieve, "r", ttl).await.unwrap();
    locker.lock("doc", CrudAction::Update, "u", ttl).await.unwrap();
    locker.lock("doc", CrudAction::Retrieve, "r2", ttl).await.unwrap();
    locker.lock("doc", CrudAction::Update, "u2", ttl).await.unwrap();
    assert!(locker.lock("doc", CrudAction::Create, "c", ttl).await.unwrap_err().is_retryable());
}

#[tokio::test]
async fn test_lock_do_propagates_func_output_and_releases() {
    let store = shared_store();
    let locker = locker_on(&store, "results");

    let result: Result<u32, String> = locker
        .lock_do("doc", CrudAction::Update, Duration::from_secs(1), Duration::from_secs(1), |_| async {
            Err("validation failed".to_string())
        })
        .await
        .unwrap();
    assert_eq!(result, Err("validation failed".to_string()));

    // Released even though the closure reported failure
    assert!(locker.get_status("doc").await.unwrap().is_none());
    assert!(store.get("crud_mark:results:doc").await.unwrap().is_none());
}
