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

//! Cached elastic pools.
//!
//! A cached pool holds up to `max_size` resources but opens them on demand.
//! Idle resources are tracked with the instant of their last release, and a
//! background sweep closes any resource that has been idle for at least
//! `keep_alive`.
//!
//! [`Pool::get`] prefers the *most recently released* idle resource. Reusing
//! the youngest entry concentrates idleness on the remaining entries, which
//! maximizes the eviction opportunity for the rest; the pool shrinks to zero
//! under a calm load instead of keeping every resource lukewarm.
//!
//! The sweep is a single re-armed deadline, never a fixed-period timer: after
//! each pass it sleeps until the oldest remaining entry becomes evictable (or
//! one full `keep_alive` when the pool is idle-empty), so it neither
//! busy-polls nor fires late. [`Pool::new`] must therefore be called within a
//! tokio runtime.
//!
//! ## Examples
//!
//! ```
//! use std::convert::Infallible;
//! use std::time::Duration;
//!
//! use respool::ResourceSource;
//! use respool::cached::Pool;
//! use respool::cached::PoolConfig;
//!
//! struct Conns;
//!
//! impl ResourceSource for Conns {
//!     type Resource = u64;
//!     type Error = Infallible;
//!
//!     async fn open(&self) -> Result<Self::Resource, Self::Error> {
//!         Ok(42)
//!     }
//!
//!     async fn close(&self, _resource: Self::Resource) -> Result<(), Self::Error> {
//!         Ok(())
//!     }
//! }
//!
//! # #[tokio::main]
//! # async fn main() {
//! let pool = Pool::new(PoolConfig::new(16, Duration::from_secs(60)), Conns);
//! let conn = pool.get().await.unwrap();
//! assert_eq!(conn, 42);
//! pool.release(conn);
//! # }
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Weak;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::time::Duration;

use mea::semaphore::Semaphore;
use mea::semaphore::SemaphorePermit;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::ResourcePool;
use crate::ResourceSource;
use crate::mutex::Mutex;

/// The configuration of [`Pool`].
#[derive(Clone, Copy, Debug)]
#[non_exhaustive]
pub struct PoolConfig {
    /// Maximum size of the [`Pool`].
    pub max_size: usize,

    /// How long a resource may sit idle before the sweep closes it.
    pub keep_alive: Duration,
}

impl PoolConfig {
    /// Creates a new [`PoolConfig`].
    ///
    /// `keep_alive` must be positive; a zero keep-alive would turn the sweep
    /// into a hot loop.
    pub fn new(max_size: usize, keep_alive: Duration) -> Self {
        assert!(!keep_alive.is_zero(), "keep_alive must be positive");
        Self {
            max_size,
            keep_alive,
        }
    }
}

/// The current pool status.
///
/// See [`Pool::status`].
#[derive(Clone, Copy, Debug)]
#[non_exhaustive]
pub struct PoolStatus {
    /// The maximum size of the pool.
    pub max_size: usize,

    /// The number of idle resources in the pool.
    pub idle_count: usize,

    /// The number of resources currently checked out.
    pub checked_out: usize,

    /// The number of futures waiting for a resource.
    pub wait_count: usize,
}

/// An idle entry's position in both orderings.
///
/// Keys order by release instant first, so the minimum of the map is the
/// oldest entry (the sweep's next candidate) and the maximum is the youngest
/// (the reuse candidate). The sequence number breaks ties between releases
/// that land on the same instant, which coarse clocks and the paused test
/// clock both produce.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
struct IdleKey {
    released_at: Instant,
    seq: u64,
}

/// The set of idle resources, ordered by last release.
///
/// A release always inserts a *new* entry with a fresh stamp; entries are
/// never re-stamped in place. Every entry is reachable from both ends of the
/// same tree, so the freshness ordering and the age ordering cannot drift
/// apart; the one remaining way to lose or duplicate a resource is a key
/// collision, which is checked fatally on insert.
#[derive(Debug)]
struct IdleSet<T> {
    entries: BTreeMap<IdleKey, T>,
    seq: u64,
}

impl<T> IdleSet<T> {
    fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
            seq: 0,
        }
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    /// Removes and returns the most recently released entry.
    fn pop_freshest(&mut self) -> Option<T> {
        self.entries.pop_last().map(|(_, resource)| resource)
    }

    /// Inserts `resource` stamped with `released_at`.
    fn insert_stamped(&mut self, released_at: Instant, resource: T) {
        self.seq += 1;
        let key = IdleKey {
            released_at,
            seq: self.seq,
        };
        let clash = self.entries.insert(key, resource);
        assert!(
            clash.is_none(),
            "invariant broken: duplicate idle entry at {key:?}",
        );
    }

    /// Removes every entry that has been idle for at least `keep_alive`,
    /// oldest first.
    fn take_expired(&mut self, now: Instant, keep_alive: Duration) -> Vec<T> {
        let mut expired = Vec::new();
        while let Some((key, _)) = self.entries.first_key_value() {
            if key.released_at + keep_alive > now {
                break;
            }
            if let Some((_, resource)) = self.entries.pop_first() {
                expired.push(resource);
            }
        }
        expired
    }

    /// Returns when the oldest remaining entry becomes evictable.
    fn next_eviction_at(&self, keep_alive: Duration) -> Option<Instant> {
        self.entries
            .first_key_value()
            .map(|(key, _)| key.released_at + keep_alive)
    }

    fn drain(&mut self) -> Vec<T> {
        std::mem::take(&mut self.entries).into_values().collect()
    }
}

/// Generic elastic pool with keep-alive eviction.
///
/// See the [module level documentation](self) for more.
pub struct Pool<S: ResourceSource> {
    config: PoolConfig,
    source: S,

    /// A counter that tracks the sum of waiters + checked out resources.
    users: AtomicUsize,
    /// A semaphore that limits how many resources may be checked out at once.
    ///
    /// Idle entries hold no permit: the permit set alone decides admission,
    /// and the idle set is a reuse/eviction layer on top of it.
    permits: Semaphore,
    /// The idle resources, ordered by last release.
    idle: Mutex<IdleSet<S::Resource>>,
    /// The background sweep task, taken out on shutdown.
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl<S> std::fmt::Debug for Pool<S>
where
    S: ResourceSource,
    S::Resource: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("config", &self.config)
            .field("idle", &self.idle)
            .field("users", &self.users)
            .finish()
    }
}

impl<S: ResourceSource + 'static> Pool<S> {
    /// Creates a new [`Pool`] and spawns its sweep task.
    ///
    /// The pool starts empty; resources are opened on demand by `get` and
    /// `try_get`. Must be called within a tokio runtime.
    pub fn new(config: PoolConfig, source: S) -> Arc<Self> {
        let pool = Arc::new(Self {
            config,
            source,
            users: AtomicUsize::new(0),
            permits: Semaphore::new(config.max_size),
            idle: Mutex::new(IdleSet::new()),
            sweeper: Mutex::new(None),
        });

        let handle = tokio::spawn(sweep_loop(Arc::downgrade(&pool), config.keep_alive));
        *pool.sweeper.lock() = Some(handle);
        pool
    }

    /// Retrieves a resource from this [`Pool`], suspending until the pool has
    /// spare capacity.
    ///
    /// The freshest idle resource is reused when one exists; otherwise a new
    /// resource is opened. An `open` failure propagates to the caller with the
    /// reserved capacity given back. Dropping the returned future before it
    /// resolves abandons the wait without consuming capacity.
    pub async fn get(&self) -> Result<S::Resource, S::Error> {
        self.users.fetch_add(1, Ordering::Relaxed);

        // TODO(*) replace scopeguard with std DropGuard once stabilized
        //  https://github.com/rust-lang/rust/issues/144426
        let guard = scopeguard::guard((), |()| {
            self.users.fetch_sub(1, Ordering::Relaxed);
        });

        let permit = self.permits.acquire(1).await;
        let resource = self.obtain(permit).await?;

        scopeguard::ScopeGuard::into_inner(guard);
        Ok(resource)
    }

    /// Retrieves a resource if the pool has spare capacity right now.
    ///
    /// This method never waits for capacity, but it may suspend inside
    /// [`ResourceSource::open`] when no idle resource exists.
    pub async fn try_get(&self) -> Result<Option<S::Resource>, S::Error> {
        let Some(permit) = self.permits.try_acquire(1) else {
            return Ok(None);
        };

        self.users.fetch_add(1, Ordering::Relaxed);
        let guard = scopeguard::guard((), |()| {
            self.users.fetch_sub(1, Ordering::Relaxed);
        });

        let resource = self.obtain(permit).await?;

        scopeguard::ScopeGuard::into_inner(guard);
        Ok(Some(resource))
    }

    async fn obtain(&self, permit: SemaphorePermit<'_>) -> Result<S::Resource, S::Error> {
        if let Some(resource) = self.idle.lock().pop_freshest() {
            permit.forget();
            return Ok(resource);
        }

        // No idle entry, yet a permit was granted: fewer than `max_size`
        // resources exist, so open a fresh one. The permit stays attached to
        // the in-flight open; failure or cancellation releases it.
        let resource = self.source.open().await?;
        permit.forget();
        Ok(resource)
    }

    /// Returns a resource to this [`Pool`].
    ///
    /// The resource is stamped with the current instant and becomes the
    /// preferred reuse candidate. The caller must release exactly the
    /// resources it acquired; see [`ResourcePool::release`].
    pub fn release(&self, resource: S::Resource) {
        let mut idle = self.idle.lock();
        idle.insert_stamped(Instant::now(), resource);
        drop(idle);

        self.permits.release(1);
        self.users.fetch_sub(1, Ordering::Relaxed);
    }

    /// Cancels the sweep task, drains the pool, and closes every resource.
    ///
    /// This method suspends until all checked out resources have been
    /// released; the pool hands out no resources afterwards. Close failures
    /// are logged and do not stop the drain; the first error is returned once
    /// the drain completes.
    pub async fn shutdown(&self) -> Result<(), S::Error> {
        if let Some(sweeper) = self.sweeper.lock().take() {
            sweeper.abort();
        }

        let permit = self.permits.acquire(self.config.max_size).await;
        permit.forget();

        let drained = self.idle.lock().drain();
        tracing::debug!(count = drained.len(), "closing resources on pool shutdown");

        let mut first_err = None;
        for resource in drained {
            if let Err(err) = self.source.close(resource).await {
                tracing::warn!("failed to close a resource during pool shutdown");
                first_err.get_or_insert(err);
            }
        }
        match first_err {
            None => Ok(()),
            Some(err) => Err(err),
        }
    }

    /// Returns the current status of the pool.
    ///
    /// The numbers are sampled without a global lock and may be off for a pool
    /// under heavy load. They are meant for an overall insight.
    pub fn status(&self) -> PoolStatus {
        let idle_count = self.idle.lock().len();
        let users = self.users.load(Ordering::Relaxed);
        let checked_out = self.config.max_size - self.permits.available_permits();

        PoolStatus {
            max_size: self.config.max_size,
            idle_count,
            checked_out,
            wait_count: users.saturating_sub(checked_out),
        }
    }

    /// Runs one sweep pass and returns the next wake-up deadline.
    async fn sweep(&self) -> Instant {
        let now = Instant::now();
        let keep_alive = self.config.keep_alive;

        let (expired, next_deadline) = {
            let mut idle = self.idle.lock();
            let expired = idle.take_expired(now, keep_alive);
            let next_deadline = idle
                .next_eviction_at(keep_alive)
                .unwrap_or(now + keep_alive);
            (expired, next_deadline)
        };

        if !expired.is_empty() {
            tracing::debug!(count = expired.len(), "evicting resources past keep-alive");
        }
        for resource in expired {
            // A failed close must not abort the pass: a stuck sweep would
            // stall all future eviction.
            if self.source.close(resource).await.is_err() {
                tracing::warn!("failed to close an evicted resource");
            }
        }

        next_deadline
    }
}

/// The self-rescheduling eviction sweep.
///
/// A single task per pool, re-armed with a fresh deadline after each pass;
/// passes never overlap. The task holds only a [`Weak`] so that dropping the
/// pool ends it at the next wake-up; [`Pool::shutdown`] aborts it right away.
async fn sweep_loop<S: ResourceSource + 'static>(pool: Weak<Pool<S>>, keep_alive: Duration) {
    let mut deadline = Instant::now() + keep_alive;
    loop {
        tokio::time::sleep_until(deadline).await;
        let Some(pool) = pool.upgrade() else {
            break;
        };
        deadline = pool.sweep().await;
    }
}

impl<S: ResourceSource + 'static> ResourcePool for Pool<S> {
    type Resource = S::Resource;
    type Error = S::Error;

    async fn get(&self) -> Result<S::Resource, S::Error> {
        Pool::get(self).await
    }

    async fn try_get(&self) -> Result<Option<S::Resource>, S::Error> {
        Pool::try_get(self).await
    }

    fn release(&self, resource: S::Resource) {
        Pool::release(self, resource)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pop_freshest_prefers_latest_release() {
        let mut idle = IdleSet::new();
        let base = Instant::now();
        idle.insert_stamped(base, "old");
        idle.insert_stamped(base + Duration::from_millis(5), "young");

        assert_eq!(idle.pop_freshest(), Some("young"));
        assert_eq!(idle.pop_freshest(), Some("old"));
        assert_eq!(idle.pop_freshest(), None);
    }

    #[test]
    fn test_same_instant_ties_break_by_release_order() {
        let mut idle = IdleSet::new();
        let base = Instant::now();
        idle.insert_stamped(base, "first");
        idle.insert_stamped(base, "second");

        assert_eq!(idle.pop_freshest(), Some("second"));
        assert_eq!(idle.pop_freshest(), Some("first"));
    }

    #[test]
    fn test_take_expired_stops_at_keep_alive_boundary() {
        let keep_alive = Duration::from_millis(10);
        let mut idle = IdleSet::new();
        let base = Instant::now();
        idle.insert_stamped(base, 1);
        idle.insert_stamped(base + Duration::from_millis(4), 2);
        idle.insert_stamped(base + Duration::from_millis(12), 3);

        let now = base + Duration::from_millis(14);
        assert_eq!(idle.take_expired(now, keep_alive), vec![1, 2]);
        assert_eq!(idle.len(), 1);
        assert_eq!(
            idle.next_eviction_at(keep_alive),
            Some(base + Duration::from_millis(22)),
        );
    }

    #[test]
    fn test_take_expired_is_inclusive_at_the_deadline() {
        let keep_alive = Duration::from_millis(10);
        let mut idle = IdleSet::new();
        let base = Instant::now();
        idle.insert_stamped(base, 1);

        assert!(idle.take_expired(base + Duration::from_millis(9), keep_alive).is_empty());
        assert_eq!(idle.take_expired(base + keep_alive, keep_alive), vec![1]);
        assert_eq!(idle.next_eviction_at(keep_alive), None);
    }
}
