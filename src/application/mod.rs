//! Application services: follow graph, publication ingest, fan-out, feed reads.

pub mod error;
pub mod fanout;
pub mod feed;
pub mod follows;
pub mod jobs;
pub mod pagination;
pub mod publish;
pub mod repos;
pub mod users;
