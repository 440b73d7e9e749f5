//! GetStatus handler.

use std::sync::Arc;
use tonic::{Request, Response, Status};

use crate::allocator::StreamSnapshot;
use crate::proto::meridian::v1::{GetStatusRequest, GetStatusResponse, StreamStatus};
use crate::server::ServerState;

impl From<StreamSnapshot> for StreamStatus {
    fn from(snapshot: StreamSnapshot) -> Self {
        Self {
            stream: snapshot.stream.to_string(),
            ready: snapshot.ready,
            current: Some(snapshot.current.into()),
            saved_physical: snapshot.saved_physical,
        }
    }
}

/// Handle a GetStatus RPC request.
pub async fn handle_get_status(
    state: &Arc<ServerState>,
    _request: Request<GetStatusRequest>,
) -> Result<Response<GetStatusResponse>, Status> {
    let status = state.manager.status();

    Ok(Response::new(GetStatusResponse {
        member_id: status.member_id,
        is_leader: status.is_leader,
        epoch: status.epoch.unwrap_or_default(),
        streams: status.streams.into_iter().map(StreamStatus::from).collect(),
    }))
}
