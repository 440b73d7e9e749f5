//! gRPC service handlers for Meridian.

pub mod status;
pub mod timestamp;

use std::sync::Arc;
use tonic::{Request, Response, Status};

use crate::proto::meridian::v1::meridian_server::Meridian;
use crate::proto::meridian::v1::{
    GetStatusRequest, GetStatusResponse, GetTimestampRequest, GetTimestampResponse,
    ResetTimestampRequest, ResetTimestampResponse,
};
use crate::server::ServerState;

/// Meridian gRPC service implementation.
pub struct MeridianService {
    state: Arc<ServerState>,
}

impl MeridianService {
    /// Create a new service with shared state.
    pub fn new(state: Arc<ServerState>) -> Self {
        Self { state }
    }
}

#[tonic::async_trait]
impl Meridian for MeridianService {
    async fn get_timestamp(
        &self,
        request: Request<GetTimestampRequest>,
    ) -> Result<Response<GetTimestampResponse>, Status> {
        timestamp::handle_get_timestamp(&self.state, request).await
    }

    async fn reset_timestamp(
        &self,
        request: Request<ResetTimestampRequest>,
    ) -> Result<Response<ResetTimestampResponse>, Status> {
        timestamp::handle_reset_timestamp(&self.state, request).await
    }

    async fn get_status(
        &self,
        request: Request<GetStatusRequest>,
    ) -> Result<Response<GetStatusResponse>, Status> {
        status::handle_get_status(&self.state, request).await
    }
}
