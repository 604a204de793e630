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

//! Fixed-size blocking pools.
//!
//! A fixed pool opens all of its resources eagerly at construction time and
//! never opens another one. Every slot is either free or checked out; there is
//! no eviction. [`Pool::get`] blocks (suspends) while all resources are
//! checked out, and [`Pool::shutdown`] drains the pool and closes every
//! resource.
//!
//! Fixed pools are useful when the cost of an idle resource is negligible
//! compared to the latency of opening one on demand.
//!
//! ## Examples
//!
//! ```
//! use std::convert::Infallible;
//!
//! use respool::ResourceSource;
//! use respool::fixed::Pool;
//!
//! struct Buffers;
//!
//! impl ResourceSource for Buffers {
//!     type Resource = Vec<u8>;
//!     type Error = Infallible;
//!
//!     async fn open(&self) -> Result<Self::Resource, Self::Error> {
//!         Ok(Vec::with_capacity(4096))
//!     }
//!
//!     async fn close(&self, _resource: Self::Resource) -> Result<(), Self::Error> {
//!         Ok(())
//!     }
//! }
//!
//! # #[tokio::main]
//! # async fn main() {
//! let pool = Pool::new(2, Buffers).await.unwrap();
//! let buf = pool.get().await;
//! assert_eq!(buf.capacity(), 4096);
//! pool.release(buf);
//! pool.shutdown().await.unwrap();
//! # }
//! ```

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

use mea::semaphore::Semaphore;

use crate::ResourcePool;
use crate::ResourceSource;
use crate::mutex::Mutex;

/// The current pool status.
///
/// See [`Pool::status`].
#[derive(Clone, Copy, Debug)]
#[non_exhaustive]
pub struct PoolStatus {
    /// The fixed size of the pool.
    pub size: usize,

    /// The number of free resources in the pool.
    pub idle_count: usize,

    /// The number of resources currently checked out.
    pub checked_out: usize,

    /// The number of futures waiting for a resource.
    pub wait_count: usize,
}

/// Generic fixed-size blocking pool.
///
/// See the [module level documentation](self) for more.
pub struct Pool<S: ResourceSource> {
    source: S,
    size: usize,

    /// A counter that tracks the sum of waiters + checked out resources.
    users: AtomicUsize,
    /// A semaphore with one permit per free slot.
    permits: Semaphore,
    /// A deque that holds the free resources.
    slots: Mutex<VecDeque<S::Resource>>,
}

impl<S> std::fmt::Debug for Pool<S>
where
    S: ResourceSource,
    S::Resource: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("size", &self.size)
            .field("slots", &self.slots)
            .field("users", &self.users)
            .finish()
    }
}

impl<S: ResourceSource> Pool<S> {
    /// Creates a new [`Pool`] by eagerly opening `size` resources.
    ///
    /// If any `open` call fails, construction aborts: the resources opened so
    /// far are closed best-effort and the error is returned.
    pub async fn new(size: usize, source: S) -> Result<Arc<Self>, S::Error> {
        let mut slots = VecDeque::with_capacity(size);
        for _ in 0..size {
            match source.open().await {
                Ok(resource) => slots.push_back(resource),
                Err(err) => {
                    for resource in slots {
                        if source.close(resource).await.is_err() {
                            tracing::warn!(
                                "failed to close a resource while aborting pool construction"
                            );
                        }
                    }
                    return Err(err);
                }
            }
        }

        Ok(Arc::new(Self {
            source,
            size,
            users: AtomicUsize::new(0),
            permits: Semaphore::new(size),
            slots: Mutex::new(slots),
        }))
    }

    /// Retrieves a resource from this [`Pool`], suspending until one is free.
    ///
    /// Dropping the returned future before it resolves abandons the wait
    /// without consuming a slot.
    pub async fn get(&self) -> S::Resource {
        self.users.fetch_add(1, Ordering::Relaxed);

        // TODO(*) replace scopeguard with std DropGuard once stabilized
        //  https://github.com/rust-lang/rust/issues/144426
        let guard = scopeguard::guard((), |()| {
            self.users.fetch_sub(1, Ordering::Relaxed);
        });

        let permit = self.permits.acquire(1).await;
        permit.forget();
        let resource = self.take_slot();

        scopeguard::ScopeGuard::into_inner(guard);
        resource
    }

    /// Retrieves a resource if one is free right now.
    pub fn try_get(&self) -> Option<S::Resource> {
        let permit = self.permits.try_acquire(1)?;
        permit.forget();
        self.users.fetch_add(1, Ordering::Relaxed);
        Some(self.take_slot())
    }

    fn take_slot(&self) -> S::Resource {
        match self.slots.lock().pop_front() {
            Some(resource) => resource,
            None => unreachable!("invariant broken: permit granted but no free resource"),
        }
    }

    /// Returns a resource to this [`Pool`].
    ///
    /// The caller must release exactly the resources it acquired; see
    /// [`ResourcePool::release`].
    pub fn release(&self, resource: S::Resource) {
        let mut slots = self.slots.lock();
        slots.push_back(resource);
        assert!(
            slots.len() <= self.size,
            "invariant broken: free resources exceed pool size (actual: {} <= {})",
            slots.len(),
            self.size,
        );
        drop(slots);

        self.permits.release(1);
        self.users.fetch_sub(1, Ordering::Relaxed);
    }

    /// Drains the pool and closes every resource.
    ///
    /// This method suspends until all checked out resources have been
    /// released. It is intended for pool teardown: it is not safe to call
    /// concurrently with `get` calls whose resources are still in flight, and
    /// the pool hands out no resources afterwards.
    ///
    /// Close failures are logged and do not stop the drain; the first error
    /// is returned once the drain completes.
    pub async fn shutdown(&self) -> Result<(), S::Error> {
        let permit = self.permits.acquire(self.size).await;
        permit.forget();

        let drained = {
            let mut slots = self.slots.lock();
            std::mem::take(&mut *slots)
        };
        assert_eq!(
            drained.len(),
            self.size,
            "invariant broken: pool drained fewer resources than its size",
        );

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
        let idle_count = self.slots.lock().len();
        let users = self.users.load(Ordering::Relaxed);
        let checked_out = self.size - self.permits.available_permits();

        PoolStatus {
            size: self.size,
            idle_count,
            checked_out,
            wait_count: users.saturating_sub(checked_out),
        }
    }
}

impl<S: ResourceSource> ResourcePool for Pool<S> {
    type Resource = S::Resource;
    type Error = S::Error;

    async fn get(&self) -> Result<S::Resource, S::Error> {
        Ok(Pool::get(self).await)
    }

    async fn try_get(&self) -> Result<Option<S::Resource>, S::Error> {
        Ok(Pool::try_get(self))
    }

    fn release(&self, resource: S::Resource) {
        Pool::release(self, resource)
    }
}
