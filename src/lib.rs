//! Strata - control-and-serve substrate for a distributed key-value store.
//!
//! Write-side, a single elected controller per cluster drives store
//! lifecycle by consuming a serialized admin log: a single-partition
//! replicated journal of schema-typed control operations, applied
//! exactly-once and in order per store. Read-side, storage nodes serve
//! point lookups, batch lookups, and schema-driven server-side compute
//! against versioned, optionally chunked records.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────┐   ┌──────────────────────────────────┐
//! │       Controller (leader)    │   │           Storage node           │
//! │                              │   │                                  │
//! │  admin log ──► DIV ──► per-  │   │  listener ──► dispatcher ──►     │
//! │  cursor        check   store │   │  (framed)     worker pools       │
//! │                        queues│   │                 │                │
//! │                          │   │   │    partition resolver            │
//! │                 execution│   │   │    chunk assembler               │
//! │                 pool ────┘   │   │    compute evaluator             │
//! │                  │           │   │                 │                │
//! │        progress persistence  │   │          storage engine          │
//! │        (coordination store)  │   │                                  │
//! └──────────────────────────────┘   └──────────────────────────────────┘
//! ```
//!
//! # Module Organization
//!
//! ## Core
//! - [`core::config`] - Configuration parsing and validation
//! - [`core::runtime`] - Runtime orchestration
//! - [`core::error`] - Error types and status mapping
//! - [`core::version`] - `<store>_v<n>` store-version naming
//!
//! ## Control plane
//! - [`control::consumer`] - Per-cluster admin consumption task
//! - [`control::executor`] - Bounded per-store execution pool
//! - [`control::div`] - Execution-id data integrity validation
//! - [`control::log`] - Admin log transport seam
//! - [`control::operation`] - Typed admin operations
//! - [`control::progress`] - Durable consumption progress
//! - [`control::coordination`] - Coordination store and leader election
//!
//! ## Serving
//! - [`serve::dispatcher`] - Read request dispatch onto worker pools
//! - [`serve::compute`] - Schema-driven server-side compute
//! - [`serve::partitioner`] - Sub-partition resolution
//! - [`serve::scratch`] - Per-worker reusable objects
//!
//! ## Storage
//! - [`storage::engine`] - Local storage engine seam
//! - [`storage::chunking`] - Chunked-value reassembly
//! - [`storage::meta`] - Store-version metadata
//!
//! ## Schema
//! - [`schema::record`] - Self-describing record model
//! - [`schema::registry`] - Schema registry seam
//! - [`schema::codec`] - Stored-value encoding
//!
//! ## Networking
//! - [`net::codec`] - Read-path wire protocol
//! - [`net::server`] - Read-path listener
//!
//! ## Operations
//! - [`ops::metrics`] - Metrics registry
//! - [`ops::health`] - Disk health seam

// Core infrastructure
pub mod core;

// Controller-side admin consumption
pub mod control;

// Record model and schema registry
pub mod schema;

// Storage layer
pub mod storage;

// Storage execution path
pub mod serve;

// Networking
pub mod net;

// Operations and observability
pub mod ops;

// CLI
pub mod cli;

// Re-exports for convenience
pub use self::core::{config, error, runtime, version};
pub use control::{consumer, coordination, div, executor, log, operation, progress};
pub use net::{codec as wire, server};
pub use ops::{health, metrics};
pub use schema::{record, registry};
pub use serve::{compute, dispatcher, partitioner, request, response, scratch};
pub use storage::{chunking, engine, meta};
