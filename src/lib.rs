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

//! Tiered resource pools for async Rust.
//!
//! A resource is anything expensive to create: a connection, a large buffer,
//! a worker handle. An implementation of [`ResourceSource`] teaches a pool
//! how to open and close resources; the pool takes care of admission,
//! reuse, and eviction. Three flavors are provided:
//!
//! * [`fixed::Pool`]: a fixed-size blocking pool, eagerly filled, with no
//!   eviction and an explicit drain-and-close shutdown.
//! * [`cached::Pool`]: an elastic pool that opens resources on demand up to
//!   a capacity and closes any resource idle past a keep-alive threshold.
//! * [`limited::Pool`]: a warm minimum kept always open, with elastic
//!   overflow up to a maximum; only the overflow is timeout-pruned.
//!
//! All three implement the uniform [`ResourcePool`] contract:
//! `get`/`try_get` to check a resource out, `release` to check it back in.
//!
//! # Example
//!
//! ```
//! use std::convert::Infallible;
//! use std::time::Duration;
//!
//! use respool::ResourceSource;
//! use respool::limited::Pool;
//! use respool::limited::PoolConfig;
//!
//! struct Sessions;
//!
//! impl ResourceSource for Sessions {
//!     type Resource = String;
//!     type Error = Infallible;
//!
//!     async fn open(&self) -> Result<Self::Resource, Self::Error> {
//!         Ok("session".to_string())
//!     }
//!
//!     async fn close(&self, _resource: Self::Resource) -> Result<(), Self::Error> {
//!         Ok(())
//!     }
//! }
//!
//! # #[tokio::main]
//! # async fn main() {
//! let config = PoolConfig::new(2, 8, Duration::from_secs(30));
//! let pool = Pool::new(config, Sessions).await.unwrap();
//!
//! let session = pool.get().await.unwrap();
//! assert_eq!(session, "session");
//! pool.release(session);
//!
//! pool.shutdown().await.unwrap();
//! # }
//! ```

pub mod cached;
mod common;
pub mod fixed;
pub mod limited;
mod mutex;

pub use common::ResourcePool;
pub use common::ResourceSource;
