//! Allocation error taxonomy.
//!
//! Only `NotLeader` and transient unavailability are meant for callers;
//! the other variants drive local recovery (invalidate, re-verify,
//! resign) and surface to clients as `UNAVAILABLE`.

use thiserror::Error;
use tonic::Status;

use crate::storage::StoreError;
use crate::stream::{InvalidStreamKey, StreamKey};

#[derive(Debug, Error)]
pub enum TsoError {
    /// The stream's cursor is not initialized or was invalidated. Callers
    /// must re-resolve the leader instead of retrying here.
    #[error("not leader for stream {stream}")]
    NotLeader { stream: StreamKey },

    /// A checkpoint save lost a compare-and-swap race.
    #[error("checkpoint version conflict on stream {stream}: expected {expected}, found {actual:?}")]
    VersionConflict {
        stream: StreamKey,
        expected: u64,
        actual: Option<u64>,
    },

    /// The wall clock misbehaved beyond the tolerated gap, or the watermark
    /// guarantee could not be upheld. Fatal to this process's leadership.
    #[error("clock anomaly on stream {stream}: {reason}")]
    ClockAnomaly { stream: StreamKey, reason: String },

    /// The metadata store could not be reached.
    #[error("metadata store unavailable: {0}")]
    Unavailable(String),

    #[error("invalid allocation count {count} (must be 1..={max})")]
    InvalidCount { count: u32, max: u32 },

    #[error("unknown stream {0}")]
    UnknownStream(StreamKey),

    #[error(transparent)]
    InvalidStream(#[from] InvalidStreamKey),

    #[error("invalid reset target: {0}")]
    InvalidReset(String),

    /// A wait was interrupted because the leadership term ended.
    #[error("operation on stream {stream} cancelled by leadership change")]
    Cancelled { stream: StreamKey },
}

impl TsoError {
    /// Build from a store failure observed on `stream`.
    pub fn from_store(stream: &StreamKey, err: StoreError) -> Self {
        match err {
            StoreError::VersionConflict { expected, actual } => Self::VersionConflict {
                stream: stream.clone(),
                expected,
                actual,
            },
            other => Self::Unavailable(other.to_string()),
        }
    }

    /// Short label used as a metrics dimension.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotLeader { .. } => "not_leader",
            Self::VersionConflict { .. } => "version_conflict",
            Self::ClockAnomaly { .. } => "clock_anomaly",
            Self::Unavailable(_) => "unavailable",
            Self::InvalidCount { .. } => "invalid_count",
            Self::UnknownStream(_) | Self::InvalidStream(_) => "unknown_stream",
            Self::InvalidReset(_) => "invalid_reset",
            Self::Cancelled { .. } => "cancelled",
        }
    }
}

impl From<TsoError> for Status {
    fn from(err: TsoError) -> Self {
        match &err {
            TsoError::NotLeader { .. } | TsoError::Cancelled { .. } => {
                Status::failed_precondition(err.to_string())
            }
            TsoError::InvalidCount { .. }
            | TsoError::InvalidReset(_)
            | TsoError::InvalidStream(_) => Status::invalid_argument(err.to_string()),
            TsoError::UnknownStream(_) => Status::not_found(err.to_string()),
            TsoError::VersionConflict { .. }
            | TsoError::ClockAnomaly { .. }
            | TsoError::Unavailable(_) => Status::unavailable(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tonic::Code;

    #[test]
    fn test_status_mapping() {
        let not_leader: Status = TsoError::NotLeader {
            stream: StreamKey::Global,
        }
        .into();
        assert_eq!(not_leader.code(), Code::FailedPrecondition);

        // An interrupted wait means the term ended; never retry here.
        let cancelled: Status = TsoError::Cancelled {
            stream: StreamKey::Global,
        }
        .into();
        assert_eq!(cancelled.code(), Code::FailedPrecondition);

        let count: Status = TsoError::InvalidCount { count: 0, max: 4096 }.into();
        assert_eq!(count.code(), Code::InvalidArgument);

        let unknown: Status = TsoError::UnknownStream(StreamKey::Local("x".into())).into();
        assert_eq!(unknown.code(), Code::NotFound);

        let anomaly: Status = TsoError::ClockAnomaly {
            stream: StreamKey::Global,
            reason: "behind".into(),
        }
        .into();
        assert_eq!(anomaly.code(), Code::Unavailable);
    }

    #[test]
    fn test_from_store_keeps_conflict() {
        let err = TsoError::from_store(
            &StreamKey::Global,
            StoreError::VersionConflict {
                expected: 1,
                actual: Some(2),
            },
        );
        assert!(matches!(err, TsoError::VersionConflict { expected: 1, .. }));

        let err = TsoError::from_store(&StreamKey::Global, StoreError::Unavailable("down".into()));
        assert!(matches!(err, TsoError::Unavailable(_)));
    }
}
