//! Redis Pub/Sub transport for the kaiwa group broadcast seam.
//!
//! Fans chat events across server processes. Each process bridges the
//! Redis channels it subscribed into a local broadcast channel that the
//! per-connection session tasks consume.

mod redis;

pub use redis::RedisGroupBroadcast;
