//! Shared gRPC client library for Meridian.
//!
//! Used by `meridianctl` and the integration tests.

mod connection;
mod ops;

pub use connection::{ClientError, ConnectConfig, MeridianClient};
pub use ops::TimestampBlock;

// Re-export proto types that clients need
pub use crate::proto::meridian::v1::{GetStatusResponse, StreamStatus};
