//! Backup, restore and health orchestration for a single MongoDB instance.
//!
//! The daemon supervises the database engine, takes scheduled verifiable
//! snapshots to local disk and optionally to S3-compatible object storage,
//! enforces retention on both, restores an untouched database once at
//! startup, and reports composite health (liveness + backup freshness).

pub mod archive;
pub mod config;
pub mod error;
pub mod logger;
pub mod mongo;
pub mod remote;
pub mod services;
pub mod state;
pub mod supervisor;
