// Copyright 2025 FastLabs Developers
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::convert::Infallible;
use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::time::Duration;

use respool::ResourceSource;
use respool::cached::Pool;
use respool::cached::PoolConfig;

/// A source handing out sequential ids, counting opens and closes.
struct CountingSource {
    opened: Arc<AtomicUsize>,
    closed: Arc<AtomicUsize>,
}

impl CountingSource {
    fn new() -> (Self, Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let opened = Arc::new(AtomicUsize::new(0));
        let closed = Arc::new(AtomicUsize::new(0));
        let source = Self {
            opened: opened.clone(),
            closed: closed.clone(),
        };
        (source, opened, closed)
    }
}

impl ResourceSource for CountingSource {
    type Resource = usize;
    type Error = Infallible;

    async fn open(&self) -> Result<Self::Resource, Self::Error> {
        Ok(self.opened.fetch_add(1, Ordering::SeqCst))
    }

    async fn close(&self, _resource: Self::Resource) -> Result<(), Self::Error> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// A source whose first open fails.
struct FailFirstSource {
    attempts: Arc<AtomicUsize>,
}

impl ResourceSource for FailFirstSource {
    type Resource = usize;
    type Error = &'static str;

    async fn open(&self) -> Result<Self::Resource, Self::Error> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        if attempt == 0 {
            Err("open failed")
        } else {
            Ok(attempt)
        }
    }

    async fn close(&self, _resource: Self::Resource) -> Result<(), Self::Error> {
        Ok(())
    }
}

#[tokio::test]
async fn test_starts_empty_and_opens_on_demand() {
    let (source, opened, _closed) = CountingSource::new();
    let pool = Pool::new(PoolConfig::new(4, Duration::from_secs(60)), source);
    assert_eq!(opened.load(Ordering::SeqCst), 0);
    assert_eq!(pool.status().idle_count, 0);

    let resource = pool.get().await.unwrap();
    assert_eq!(opened.load(Ordering::SeqCst), 1);

    pool.release(resource);
    assert_eq!(pool.status().idle_count, 1);
    assert_eq!(pool.get().await.unwrap(), resource, "idle resources are reused");
    assert_eq!(opened.load(Ordering::SeqCst), 1);
    pool.release(resource);
}

#[tokio::test(start_paused = true)]
async fn test_get_prefers_the_freshest_idle_resource() {
    let (source, _opened, _closed) = CountingSource::new();
    let pool = Pool::new(PoolConfig::new(4, Duration::from_secs(60)), source);

    let older = pool.get().await.unwrap();
    let younger = pool.get().await.unwrap();

    pool.release(older);
    tokio::time::sleep(Duration::from_millis(5)).await;
    pool.release(younger);

    assert_eq!(pool.get().await.unwrap(), younger);
    assert_eq!(pool.get().await.unwrap(), older);
    pool.release(older);
    pool.release(younger);
}

#[tokio::test(start_paused = true)]
async fn test_sweep_evicts_and_closes_idle_resources() {
    let (source, opened, closed) = CountingSource::new();
    let pool = Pool::new(PoolConfig::new(1, Duration::from_millis(10)), source);

    let resource = pool.get().await.unwrap();
    assert_eq!(resource, 0);
    pool.release(resource);

    tokio::time::sleep(Duration::from_millis(25)).await;
    assert_eq!(closed.load(Ordering::SeqCst), 1, "the sweep must close the evicted resource");
    assert_eq!(pool.status().idle_count, 0);

    // the pool is empty again; a get must synthesize a fresh resource
    let fresh = pool.get().await.unwrap();
    assert_eq!(fresh, 1);
    assert_eq!(opened.load(Ordering::SeqCst), 2);
    pool.release(fresh);
}

#[tokio::test(start_paused = true)]
async fn test_resources_idle_under_keep_alive_survive() {
    let (source, opened, closed) = CountingSource::new();
    let pool = Pool::new(PoolConfig::new(2, Duration::from_millis(100)), source);

    let resource = pool.get().await.unwrap();
    pool.release(resource);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(closed.load(Ordering::SeqCst), 0);
    assert_eq!(pool.get().await.unwrap(), resource);
    assert_eq!(opened.load(Ordering::SeqCst), 1);
    pool.release(resource);
}

#[tokio::test(start_paused = true)]
async fn test_sweep_rearms_on_the_oldest_survivor() {
    let (source, _opened, closed) = CountingSource::new();
    let pool = Pool::new(PoolConfig::new(4, Duration::from_millis(10)), source);

    let older = pool.get().await.unwrap();
    let younger = pool.get().await.unwrap();

    pool.release(older);
    tokio::time::sleep(Duration::from_millis(6)).await;
    pool.release(younger);

    // first pass at t=10ms takes only the older entry
    tokio::time::sleep(Duration::from_millis(6)).await;
    assert_eq!(closed.load(Ordering::SeqCst), 1);
    assert_eq!(pool.status().idle_count, 1);

    // the sweep re-armed for t=16ms, when the younger entry expires
    tokio::time::sleep(Duration::from_millis(6)).await;
    assert_eq!(closed.load(Ordering::SeqCst), 2);
    assert_eq!(pool.status().idle_count, 0);
}

#[tokio::test(start_paused = true)]
async fn test_try_get_returns_none_on_exhaustion() {
    let (source, _opened, _closed) = CountingSource::new();
    let pool = Pool::new(PoolConfig::new(1, Duration::from_secs(60)), source);

    let resource = pool.get().await.unwrap();
    assert_eq!(pool.try_get().await.unwrap(), None);

    pool.release(resource);
    assert_eq!(pool.try_get().await.unwrap(), Some(resource));
    pool.release(resource);
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_get_consumes_nothing() {
    let (source, _opened, _closed) = CountingSource::new();
    let pool = Pool::new(PoolConfig::new(1, Duration::from_secs(60)), source);

    let held = pool.get().await.unwrap();
    let timeout_result = tokio::time::timeout(Duration::from_millis(10), pool.get()).await;
    assert!(timeout_result.is_err(), "should have timed out");

    let status = pool.status();
    assert_eq!(status.wait_count, 0, "the cancelled waiter must not linger");
    assert_eq!(status.checked_out, 1);

    pool.release(held);
    assert_eq!(pool.try_get().await.unwrap(), Some(held));
    pool.release(held);
}

#[tokio::test]
async fn test_open_failure_propagates_and_frees_capacity() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let pool = Pool::new(
        PoolConfig::new(1, Duration::from_secs(60)),
        FailFirstSource {
            attempts: attempts.clone(),
        },
    );

    assert_eq!(pool.get().await.err(), Some("open failed"));
    let status = pool.status();
    assert_eq!(status.checked_out, 0, "a failed open must give its permit back");
    assert_eq!(status.wait_count, 0);

    let resource = pool.get().await.unwrap();
    assert_eq!(resource, 1);
    pool.release(resource);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_closes_everything_and_stops_the_sweep() {
    let (source, opened, closed) = CountingSource::new();
    let pool = Pool::new(PoolConfig::new(2, Duration::from_millis(10)), source);

    let first = pool.get().await.unwrap();
    let second = pool.get().await.unwrap();
    pool.release(first);
    pool.release(second);

    pool.shutdown().await.unwrap();
    assert_eq!(opened.load(Ordering::SeqCst), 2);
    assert_eq!(closed.load(Ordering::SeqCst), 2);

    assert_eq!(pool.try_get().await.unwrap(), None, "a drained pool hands out nothing");

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(closed.load(Ordering::SeqCst), 2);
}
