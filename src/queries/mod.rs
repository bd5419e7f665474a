//! SQL text for the record store, generated with sea-query for SQLite and PostgreSQL.

pub mod chunks;
pub mod ddl;
pub mod jobs;
pub mod metadata;
pub mod silence;
