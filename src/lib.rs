//! bucketfs: a hierarchical filesystem view over S3-compatible object stores.
//!
//! Object stores only know flat keys.  This crate synthesizes directories
//! from key prefixes and `/`-terminated marker objects, addresses nodes by
//! opaque path-encoded ids, caches expensive store clients per connection,
//! and answers web file manager commands with JSON responses.
//!
//! The layers, bottom up:
//!
//! - [`storage`]: the [`storage::backend::ObjectStore`] trait with S3 and
//!   in-memory implementations, plus client factories.
//! - [`pool`]: bounded, expiring client cache keyed by connection.
//! - [`codec`] and [`vfs`]: node ids and directory semantics.
//! - [`dispatcher`]: command routing and response building.

pub mod audit;
pub mod buckets;
pub mod codec;
pub mod config;
pub mod dispatcher;
pub mod errors;
pub mod metrics;
pub mod pool;
pub mod storage;
pub mod vfs;
