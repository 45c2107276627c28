//! murmur: follow graph, asynchronous fan-out into per-author recent-posts
//! caches, and read-time feed merging.

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;
pub mod lifecycle;
