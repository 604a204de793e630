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

use std::future::Future;
use std::sync::Arc;

/// A trait whose instance opens new resources and closes spent ones.
///
/// The pools never inspect a resource beyond moving it around; all knowledge
/// about what a resource is and how it is brought up or torn down lives in the
/// source. Both operations may suspend and may fail.
pub trait ResourceSource: Send + Sync {
    /// The type of resources that this source opens and closes.
    type Resource: Send;

    /// The type of errors that this source can return.
    type Error: Send;

    /// Opens a new resource.
    fn open(&self) -> impl Future<Output = Result<Self::Resource, Self::Error>> + Send;

    /// Closes a resource that will never be handed out again.
    fn close(
        &self,
        resource: Self::Resource,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;
}

// A shared source can feed several pools; the limited pool relies on this to
// drive both of its tiers from one source.
impl<S: ResourceSource + ?Sized> ResourceSource for Arc<S> {
    type Resource = S::Resource;
    type Error = S::Error;

    fn open(&self) -> impl Future<Output = Result<Self::Resource, Self::Error>> + Send {
        S::open(self)
    }

    fn close(
        &self,
        resource: Self::Resource,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send {
        S::close(self, resource)
    }
}

/// The uniform contract of all pool flavors.
///
/// * [`ResourcePool::get`] suspends until a resource is available. Dropping
///   the returned future before it resolves aborts the wait cleanly: no
///   permit is consumed and no idle resource is removed.
/// * [`ResourcePool::try_get`] never waits for pool capacity; it returns
///   `Ok(None)` when the pool is exhausted. It may still suspend inside
///   [`ResourceSource::open`] when it has to bring up a fresh resource.
/// * [`ResourcePool::release`] must be called exactly once per resource
///   obtained from `get`/`try_get`. Releasing a resource that was not checked
///   out from this pool is a caller bug; the pools trust their callers and do
///   not validate provenance.
pub trait ResourcePool: Send + Sync {
    /// The type of pooled resources.
    type Resource: Send;

    /// The type of errors surfaced from the underlying [`ResourceSource`].
    type Error: Send;

    /// Retrieves a resource, suspending until one is available.
    fn get(&self) -> impl Future<Output = Result<Self::Resource, Self::Error>> + Send;

    /// Retrieves a resource if the pool has spare capacity right now.
    fn try_get(&self) -> impl Future<Output = Result<Option<Self::Resource>, Self::Error>> + Send;

    /// Returns a previously obtained resource to the pool.
    fn release(&self, resource: Self::Resource);
}
