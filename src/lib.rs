//! Meridian: a timestamp oracle.
//!
//! Hands out globally unique, strictly increasing hybrid timestamps
//! (physical milliseconds plus an 18-bit logical counter) from a single
//! elected leader, with a persisted watermark that keeps output monotonic
//! across restarts and failovers.
//!
//! # Architecture
//!
//! - **Watermark**: every issued physical value stays below a checkpoint
//!   persisted with compare-and-swap
//! - **Leadership-bound**: cursors live only while this member holds the
//!   lease and are invalidated synchronously on loss
//! - **Streams**: one global stream plus optional per-region local streams,
//!   kept ordered by a cross-stream sync
//!
//! # Modules
//!
//! - [`allocator`]: Per-stream allocation engine
//! - [`client`]: Reusable gRPC client
//! - [`clock`]: Wall clock abstraction
//! - [`config`]: CLI and environment configuration
//! - [`error`]: Allocation error taxonomy
//! - [`leadership`]: Elections, leases and the leadership guard
//! - [`manager`]: Stream routing, terms and tick scheduling
//! - [`observability`]: Tracing, metrics and probes
//! - [`proto`]: Re-exported protobuf code
//! - [`server`]: gRPC server setup
//! - [`service`]: RPC handlers
//! - [`storage`]: Checkpoint stores
//! - [`stream`]: Stream identities
//! - [`timestamp`]: Hybrid timestamp type

// Lint configuration
#![warn(clippy::all)]
#![allow(
    clippy::module_name_repetitions,    // allocator::AllocatorSettings is fine
    clippy::must_use_candidate,         // Not all functions need #[must_use]
    clippy::missing_errors_doc,         // Error docs can be verbose
    clippy::missing_panics_doc,         // Panic docs can be verbose
    clippy::needless_raw_string_hashes, // r#""# is fine for SQL
    clippy::cast_possible_truncation,   // millisecond durations fit in i64
    clippy::cast_possible_wrap,
    clippy::cast_sign_loss,
    clippy::too_many_lines              // Some functions are inherently long
)]

pub mod allocator;
pub mod client;
pub mod clock;
pub mod config;
pub mod error;
pub mod leadership;
pub mod manager;
pub mod observability;
pub mod proto;
pub mod server;
pub mod service;
pub mod storage;
pub mod stream;
pub mod timestamp;

pub use error::TsoError;
pub use stream::StreamKey;
pub use timestamp::Timestamp;
