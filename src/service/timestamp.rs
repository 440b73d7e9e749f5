//! GetTimestamp and ResetTimestamp handlers.

use std::sync::Arc;
use tonic::{Request, Response, Status};

use crate::error::TsoError;
use crate::proto::meridian::v1::{
    GetTimestampRequest, GetTimestampResponse, ResetTimestampRequest, ResetTimestampResponse,
};
use crate::server::ServerState;
use crate::stream::StreamKey;
use crate::timestamp::Timestamp;

fn parse_stream(raw: &str) -> Result<StreamKey, Status> {
    raw.parse::<StreamKey>()
        .map_err(|e| Status::from(TsoError::from(e)))
}

/// Handle a GetTimestamp RPC request.
///
/// A zero count is treated as one.
#[tracing::instrument(skip(state, request), fields(stream, count))]
pub async fn handle_get_timestamp(
    state: &Arc<ServerState>,
    request: Request<GetTimestampRequest>,
) -> Result<Response<GetTimestampResponse>, Status> {
    let req = request.into_inner();
    let stream = parse_stream(&req.stream)?;
    let count = req.count.max(1);

    let span = tracing::Span::current();
    span.record("stream", tracing::field::display(&stream));
    span.record("count", count);

    let allocation = state.manager.allocate(&stream, count).await?;

    Ok(Response::new(GetTimestampResponse {
        timestamp: Some(allocation.timestamp.into()),
        count,
        epoch: allocation.epoch,
        stream: stream.to_string(),
    }))
}

/// Handle a ResetTimestamp RPC request.
#[tracing::instrument(skip(state, request), fields(stream))]
pub async fn handle_reset_timestamp(
    state: &Arc<ServerState>,
    request: Request<ResetTimestampRequest>,
) -> Result<Response<ResetTimestampResponse>, Status> {
    let req = request.into_inner();
    let stream = parse_stream(&req.stream)?;
    tracing::Span::current().record("stream", tracing::field::display(&stream));

    let target: Timestamp = req
        .timestamp
        .ok_or_else(|| Status::invalid_argument("timestamp is required"))?
        .into();

    state
        .manager
        .reset_timestamp(&stream, target, req.ignore_smaller, req.skip_upper_bound_check)
        .await?;

    Ok(Response::new(ResetTimestampResponse {}))
}
