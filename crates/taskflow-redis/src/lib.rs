//! Redis implementation of the taskflow store contract.
//!
//! Records live under string keys with a retention TTL; the pending index
//! is a sorted set popped with ZPOPMIN, whose atomicity is what guarantees
//! at-most-one delivery per id.

pub use taskflow_core;

pub mod store;

pub use store::RedisStore;
