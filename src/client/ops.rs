//! Operation result types for the Meridian client.

use serde::Serialize;

use crate::timestamp::Timestamp;

/// A block of consecutive timestamps returned by one GetTimestamp call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimestampBlock {
    pub stream: String,
    /// First timestamp of the block.
    pub first: Timestamp,
    pub count: u32,
    /// Leadership epoch the block was issued under.
    pub epoch: u64,
}

impl TimestampBlock {
    /// Last timestamp of the block.
    pub fn last(&self) -> Timestamp {
        self.first
            .next_logical(i64::from(self.count.saturating_sub(1)))
    }

    /// Every timestamp of the block, in order.
    pub fn iter(&self) -> impl Iterator<Item = Timestamp> + '_ {
        (0..i64::from(self.count)).map(|i| self.first.next_logical(i))
    }
}
