//! # nvecd - in-memory vector and event similarity service
//!
//! The core engine behind a streaming similarity server: clients feed it
//! dense vectors and timestamped co-occurrence events, then query it for
//! nearest neighbors by vector similarity, behavioral (event) similarity,
//! or a linear fusion of both.
//!
//! ## Architecture
//!
//! - `error`: crate-wide error taxonomy
//! - `config`: typed configuration consumed by the core (§6)
//! - `events`: ring buffer, dedup/state caches, event store, co-occurrence index
//! - `vectors`: id -> dense-vector storage and the pluggable distance kernels
//! - `similarity`: vector / event / fusion search modes
//! - `cache`: query fingerprinting, LZ4 result compression, LRU similarity cache,
//!   two-phase invalidation
//! - `snapshot`: versioned, CRC-verified, atomic binary persistence
//! - `net`: bounded thread pool, connection acceptor, per-connection I/O
//! - `protocol`: text-protocol command parsing and dispatch
//! - `stats`: atomic counters and the runtime-variable registry
//! - `engine`: the transport-agnostic aggregator tying every subsystem together
//! - `server`: process-lifecycle wrapper driving the accept loop and graceful shutdown

pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod net;
pub mod protocol;
pub mod server;
pub mod similarity;
pub mod snapshot;
pub mod stats;
pub mod vectors;

pub use config::Config;
pub use engine::Engine;
pub use error::{Error, Result};
pub use server::Server;

/// Re-export of the crate's own version, surfaced through `INFO` and the
/// read-only `server.version` runtime variable.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Re-export of the crate name.
pub const NAME: &str = env!("CARGO_PKG_NAME");
