//! Object store clients.
//!
//! The [`backend::ObjectStore`] trait abstracts over the S3-compatible
//! service behind a bucket.  [`s3::S3Store`] talks to a real endpoint;
//! [`memory::MemoryStore`] keeps everything in process.  Clients are
//! produced by a [`factory::ClientFactory`] so the pool does not need to
//! know which kind it is caching.

pub mod backend;
pub mod factory;
pub mod memory;
pub mod s3;
