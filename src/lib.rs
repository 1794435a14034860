//! dictd - A multi-valued key-value store with a line-oriented TCP interface
//!
//! This library provides:
//! - An in-memory store mapping each key to an ordered set of values
//! - A textual protocol: `GET <k>`, `PUT <k> <v>`, `DELETE <k> <v>`
//! - One request per connection, answered with `200 <v>...` or `404`
//! - Periodic whole-store snapshots written atomically to disk

pub mod client;
pub mod error;
pub mod protocol;
pub mod scheduler;
pub mod server;
pub mod snapshot;
pub mod store;

pub use client::Client;
pub use error::{DictError, Result};
pub use protocol::{Command, ParseMode, Response};
pub use server::{DictServer, ServerConfig};
pub use snapshot::SnapshotFile;
pub use store::{Dictionary, MemoryStore, Store};
