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

//! Limited-cached pools: a warm tier plus an elastic tier.
//!
//! A limited pool keeps `min_size` resources permanently open (the warm tier,
//! a [`fixed::Pool`](crate::fixed::Pool)) and grows on demand up to
//! `max_size` (the elastic tier, a [`cached::Pool`](crate::cached::Pool) of
//! size `max_size - min_size` whose keep-alive sweep prunes the overflow).
//! A single permit set of size `max_size` gates admission for both tiers.
//!
//! Resources are fungible across tiers: where a released resource lands
//! depends only on the warm-tier occupancy counter, never on the tier it was
//! drawn from. The counter maintains
//! `warm_idle + outstanding warm checkouts == min_size` at all times, so warm
//! capacity is always repaid before the elastic tier sees a release.
//!
//! When `min_size` is zero there is no warm tier to keep; use a plain
//! [`cached::Pool`](crate::cached::Pool) of size `max_size` instead.

use std::sync::Arc;

use mea::semaphore::Semaphore;
use mea::semaphore::SemaphorePermit;

use crate::ResourcePool;
use crate::ResourceSource;
use crate::cached;
use crate::fixed;
use crate::mutex::Mutex;

/// The configuration of [`Pool`].
#[derive(Clone, Copy, Debug)]
#[non_exhaustive]
pub struct PoolConfig {
    /// Size of the warm tier, kept permanently open.
    pub min_size: usize,

    /// Total capacity across both tiers.
    pub max_size: usize,

    /// How long an elastic-tier resource may sit idle before the sweep
    /// closes it.
    pub keep_alive: std::time::Duration,
}

impl PoolConfig {
    /// Creates a new [`PoolConfig`].
    ///
    /// `min_size` must not exceed `max_size`.
    pub fn new(min_size: usize, max_size: usize, keep_alive: std::time::Duration) -> Self {
        assert!(
            min_size <= max_size,
            "min_size must not exceed max_size (actual: {min_size} <= {max_size})",
        );
        Self {
            min_size,
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
    /// Size of the warm tier.
    pub min_size: usize,

    /// Total capacity across both tiers.
    pub max_size: usize,

    /// The number of idle warm-tier slots.
    pub warm_idle: usize,

    /// The number of idle elastic-tier resources.
    pub elastic_idle: usize,

    /// The number of resources currently checked out.
    pub checked_out: usize,
}

/// Warm-tier occupancy.
#[derive(Debug)]
struct TierState {
    /// Idle warm slots, in `[0, min_size]`.
    ///
    /// Invariant: `warm_idle + outstanding warm checkouts == min_size`. Every
    /// warm fetch and every warm return moves this counter under the same
    /// lock, so it always mirrors the warm tier's free-slot count.
    warm_idle: usize,
}

/// Generic pool with a warm minimum and an elastic, timeout-pruned overflow.
///
/// See the [module level documentation](self) for more.
pub struct Pool<S: ResourceSource + 'static> {
    config: PoolConfig,

    /// A semaphore gating admission across both tiers.
    permits: Semaphore,
    warm: Arc<fixed::Pool<Arc<S>>>,
    elastic: Arc<cached::Pool<Arc<S>>>,
    tiers: Mutex<TierState>,
}

impl<S> std::fmt::Debug for Pool<S>
where
    S: ResourceSource + 'static,
    S::Resource: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("config", &self.config)
            .field("warm", &self.warm)
            .field("elastic", &self.elastic)
            .field("tiers", &self.tiers)
            .finish()
    }
}

impl<S: ResourceSource + 'static> Pool<S> {
    /// Creates a new [`Pool`], eagerly opening the `min_size` warm resources.
    ///
    /// If the warm-tier fill fails, construction aborts with the error. Must
    /// be called within a tokio runtime (the elastic tier spawns its sweep
    /// task).
    pub async fn new(config: PoolConfig, source: S) -> Result<Arc<Self>, S::Error> {
        let source = Arc::new(source);
        let warm = fixed::Pool::new(config.min_size, source.clone()).await?;
        let elastic = cached::Pool::new(
            cached::PoolConfig::new(config.max_size - config.min_size, config.keep_alive),
            source,
        );

        Ok(Arc::new(Self {
            config,
            permits: Semaphore::new(config.max_size),
            warm,
            elastic,
            tiers: Mutex::new(TierState {
                warm_idle: config.min_size,
            }),
        }))
    }

    /// Retrieves a resource from this [`Pool`], suspending until the pool has
    /// spare capacity.
    ///
    /// A warm resource is preferred; the elastic tier serves the overflow,
    /// opening a fresh resource when it has no idle one. Dropping the
    /// returned future before it resolves abandons the wait without consuming
    /// capacity.
    pub async fn get(&self) -> Result<S::Resource, S::Error> {
        let permit = self.permits.acquire(1).await;
        self.obtain(permit).await
    }

    /// Retrieves a resource if the pool has spare capacity right now.
    ///
    /// This method never waits for capacity, but it may suspend inside
    /// [`ResourceSource::open`] when the warm tier is busy and the elastic
    /// tier has no idle resource.
    pub async fn try_get(&self) -> Result<Option<S::Resource>, S::Error> {
        let Some(permit) = self.permits.try_acquire(1) else {
            return Ok(None);
        };
        self.obtain(permit).await.map(Some)
    }

    async fn obtain(&self, permit: SemaphorePermit<'_>) -> Result<S::Resource, S::Error> {
        // The warm fetch and the counter move must be atomic, so both happen
        // under the tiers lock.
        let warm = {
            let mut tiers = self.tiers.lock();
            let resource = self.warm.try_get();
            if resource.is_some() {
                assert!(
                    tiers.warm_idle > 0,
                    "invariant broken: warm resource fetched with zero idle warm slots",
                );
                tiers.warm_idle -= 1;
            }
            resource
        };
        if let Some(resource) = warm {
            permit.forget();
            return Ok(resource);
        }

        // The outer permit is already committed, so elastic capacity follows
        // from the tier accounting; fetch blocking rather than best-effort so
        // that a granted permit always yields a resource. The tiers lock is
        // not held across this await.
        let resource = self.elastic.get().await?;
        permit.forget();
        Ok(resource)
    }

    /// Returns a resource to this [`Pool`].
    ///
    /// The resource repays the warm tier while any warm slot is outstanding;
    /// only then does it land in the elastic tier, stamped for keep-alive
    /// tracking. The caller must release exactly the resources it acquired;
    /// see [`ResourcePool::release`].
    pub fn release(&self, resource: S::Resource) {
        let mut tiers = self.tiers.lock();
        if tiers.warm_idle < self.config.min_size {
            self.warm.release(resource);
            tiers.warm_idle += 1;
        } else {
            self.elastic.release(resource);
        }
        drop(tiers);

        self.permits.release(1);
    }

    /// Shuts down both tiers, closing every resource.
    ///
    /// This method suspends until all checked out resources have been
    /// released; the pool hands out no resources afterwards. The first close
    /// error is returned once both tiers have drained.
    pub async fn shutdown(&self) -> Result<(), S::Error> {
        let permit = self.permits.acquire(self.config.max_size).await;
        permit.forget();

        let warm_result = self.warm.shutdown().await;
        let elastic_result = self.elastic.shutdown().await;
        warm_result.and(elastic_result)
    }

    /// Returns the current status of the pool.
    ///
    /// The numbers are sampled without a global lock and may be off for a pool
    /// under heavy load. They are meant for an overall insight.
    pub fn status(&self) -> PoolStatus {
        let warm_idle = self.tiers.lock().warm_idle;
        let elastic_idle = self.elastic.status().idle_count;
        let checked_out = self.config.max_size - self.permits.available_permits();

        PoolStatus {
            min_size: self.config.min_size,
            max_size: self.config.max_size,
            warm_idle,
            elastic_idle,
            checked_out,
        }
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
