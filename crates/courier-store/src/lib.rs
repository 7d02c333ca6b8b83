//! # courier-store
//!
//! Persistent state for the Courier relay. Everything durable is a JSON blob
//! under a well-known key in a [`KvStore`]: the user registry (`user_list`)
//! and the user-to-thread mapping (`user_topic_mapping`). Stores support a
//! versioned conditional write so read-modify-write cycles can detect
//! concurrent writers.

pub mod blob;
pub mod database;
pub mod kv;
pub mod migrations;
pub mod models;
pub mod registry;

mod error;

pub use blob::Snapshot;
pub use database::Database;
pub use error::StoreError;
pub use kv::{KvStore, MemoryStore, Versioned, WriteOutcome};
pub use models::*;
pub use registry::UserRegistry;
