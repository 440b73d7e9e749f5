//! Client connection management.

use thiserror::Error;
use tonic::transport::{Certificate, Channel, ClientTlsConfig, Endpoint};

use super::ops::TimestampBlock;
use crate::proto::meridian::v1::meridian_client::MeridianClient as GrpcClient;
use crate::proto::meridian::v1::{
    GetStatusRequest, GetStatusResponse, GetTimestampRequest, ResetTimestampRequest,
};
use crate::timestamp::Timestamp;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    #[error("rpc failed: {0}")]
    Rpc(#[from] tonic::Status),

    #[error("failed to read TLS CA certificate: {0}")]
    Io(#[from] std::io::Error),

    #[error("server response missing {0}")]
    MissingField(&'static str),
}

/// Connection settings.
#[derive(Debug, Clone, Default)]
pub struct ConnectConfig {
    /// Server endpoint, e.g. `http://127.0.0.1:3379`.
    pub endpoint: String,
    /// PEM CA certificate for `https://` endpoints.
    pub tls_ca: Option<String>,
    pub tls_domain: Option<String>,
}

impl ConnectConfig {
    /// Plaintext connection to `endpoint`.
    pub fn plaintext(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Self::default()
        }
    }
}

/// Thin wrapper over the generated gRPC client.
#[derive(Debug, Clone)]
pub struct MeridianClient {
    inner: GrpcClient<Channel>,
}

impl MeridianClient {
    pub async fn connect(config: ConnectConfig) -> Result<Self, ClientError> {
        let mut endpoint = Endpoint::from_shared(config.endpoint)?;
        if let Some(ca_path) = &config.tls_ca {
            let pem = tokio::fs::read(ca_path).await?;
            let mut tls = ClientTlsConfig::new().ca_certificate(Certificate::from_pem(pem));
            if let Some(domain) = &config.tls_domain {
                tls = tls.domain_name(domain.clone());
            }
            endpoint = endpoint.tls_config(tls)?;
        }

        let channel = endpoint.connect().await?;
        Ok(Self {
            inner: GrpcClient::new(channel),
        })
    }

    /// Reserve `count` timestamps on `stream` ("global" or "local/<region>").
    pub async fn get_timestamp(
        &mut self,
        stream: &str,
        count: u32,
    ) -> Result<TimestampBlock, ClientError> {
        let response = self
            .inner
            .get_timestamp(GetTimestampRequest {
                stream: stream.to_string(),
                count,
            })
            .await?
            .into_inner();

        let first = response
            .timestamp
            .ok_or(ClientError::MissingField("timestamp"))?;
        Ok(TimestampBlock {
            stream: response.stream,
            first: first.into(),
            count: response.count,
            epoch: response.epoch,
        })
    }

    pub async fn reset_timestamp(
        &mut self,
        stream: &str,
        timestamp: Timestamp,
        ignore_smaller: bool,
        skip_upper_bound_check: bool,
    ) -> Result<(), ClientError> {
        self.inner
            .reset_timestamp(ResetTimestampRequest {
                stream: stream.to_string(),
                timestamp: Some(timestamp.into()),
                ignore_smaller,
                skip_upper_bound_check,
            })
            .await?;
        Ok(())
    }

    pub async fn status(&mut self) -> Result<GetStatusResponse, ClientError> {
        Ok(self.inner.get_status(GetStatusRequest {}).await?.into_inner())
    }
}
