//! gRPC transport for the lock service
//!
//! Wraps the generated client behind a small trait so the session and
//! renewal machinery can be exercised without a live server. The
//! concrete implementation owns the tonic channel and attaches the
//! shared-secret password, when configured, to every request.

use anyhow::anyhow;
use async_trait::async_trait;
use latch_api::grpc::latch::{
    AcquireRequest, LockResponse, ReleaseRequest, ReleaseResponse, RenewRequest,
    TryAcquireRequest, lock_service_client::LockServiceClient,
};
use latch_api::model::AUTHORIZATION_HEADER;
use tonic::metadata::AsciiMetadataValue;
use tonic::transport::{Certificate, Channel, ClientTlsConfig, Endpoint, Identity};
use tonic::{Request, Status};
use tracing::{info, warn};

use crate::config::ClientConfig;
use crate::error::Result;

/// The four lock service operations the session depends on. Each call
/// may fail at the transport level independent of the service error
/// carried in the response body.
#[async_trait]
pub(crate) trait LockTransport: Send + Sync + 'static {
    async fn acquire(&self, req: AcquireRequest) -> std::result::Result<LockResponse, Status>;
    async fn try_acquire(
        &self,
        req: TryAcquireRequest,
    ) -> std::result::Result<LockResponse, Status>;
    async fn release(&self, req: ReleaseRequest) -> std::result::Result<ReleaseResponse, Status>;
    async fn renew(&self, req: RenewRequest) -> std::result::Result<LockResponse, Status>;
}

pub(crate) struct GrpcTransport {
    client: LockServiceClient<Channel>,
    password: Option<AsciiMetadataValue>,
}

impl GrpcTransport {
    pub(crate) async fn connect(config: &ClientConfig) -> Result<Self> {
        let channel = build_channel(config).await?;
        let password = match &config.password {
            Some(p) => Some(
                p.parse::<AsciiMetadataValue>()
                    .map_err(|e| anyhow!("password is not a valid header value: {e}"))?,
            ),
            None => None,
        };

        Ok(Self {
            client: LockServiceClient::new(channel),
            password,
        })
    }

    fn request<T>(&self, message: T) -> Request<T> {
        let mut request = Request::new(message);
        if let Some(password) = &self.password {
            request
                .metadata_mut()
                .insert(AUTHORIZATION_HEADER, password.clone());
        }
        request
    }
}

#[async_trait]
impl LockTransport for GrpcTransport {
    async fn acquire(&self, req: AcquireRequest) -> std::result::Result<LockResponse, Status> {
        let mut client = self.client.clone();
        Ok(client.acquire(self.request(req)).await?.into_inner())
    }

    async fn try_acquire(
        &self,
        req: TryAcquireRequest,
    ) -> std::result::Result<LockResponse, Status> {
        let mut client = self.client.clone();
        Ok(client.try_acquire(self.request(req)).await?.into_inner())
    }

    async fn release(&self, req: ReleaseRequest) -> std::result::Result<ReleaseResponse, Status> {
        let mut client = self.client.clone();
        Ok(client.release(self.request(req)).await?.into_inner())
    }

    async fn renew(&self, req: RenewRequest) -> std::result::Result<LockResponse, Status> {
        let mut client = self.client.clone();
        Ok(client.renew(self.request(req)).await?.into_inner())
    }
}

async fn build_channel(config: &ClientConfig) -> Result<Channel> {
    let use_tls = config.use_tls || config.tls_cert.is_some();
    let scheme = if use_tls { "https" } else { "http" };
    let uri = format!("{scheme}://{}", config.address);

    let mut endpoint = Endpoint::from_shared(uri)
        .map_err(|e| anyhow!("invalid server address {:?}: {e}", config.address))?;

    if use_tls {
        endpoint = endpoint.tls_config(build_tls_config(config).await?)?;
    }

    info!(address = %config.address, tls = use_tls, "connecting to lock service");
    Ok(endpoint.connect().await?)
}

async fn build_tls_config(config: &ClientConfig) -> Result<ClientTlsConfig> {
    // The TLS server name is the host portion of the configured address.
    let host = config.address.split(':').next().unwrap_or(&config.address);
    let mut tls = ClientTlsConfig::new().with_native_roots().domain_name(host);

    if config.skip_verify {
        // tonic's rustls stack exposes no verification bypass; the
        // option is recognized so configurations carry across clients,
        // but verification stays on.
        warn!("skip_verify is set but certificate verification cannot be disabled; ignoring");
    }

    if let Some(ca_file) = &config.ca_file {
        let pem = tokio::fs::read(ca_file)
            .await
            .map_err(|e| anyhow!("failed to read CA certificate {ca_file:?}: {e}"))?;
        tls = tls.ca_certificate(Certificate::from_pem(pem));
    }

    match (&config.tls_cert, &config.tls_key) {
        (Some(cert_file), Some(key_file)) => {
            let cert = tokio::fs::read(cert_file)
                .await
                .map_err(|e| anyhow!("failed to read TLS certificate {cert_file:?}: {e}"))?;
            let key = tokio::fs::read(key_file)
                .await
                .map_err(|e| anyhow!("failed to read TLS key {key_file:?}: {e}"))?;
            tls = tls.identity(Identity::from_pem(cert, key));
        }
        (None, None) => {}
        _ => {
            return Err(anyhow!("tls_cert and tls_key must be configured together").into());
        }
    }

    Ok(tls)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_invalid_address_rejected() {
        let config = ClientConfig::new("not a uri");
        let err = build_channel(&config).await.unwrap_err();
        assert!(err.to_string().contains("invalid server address"));
    }

    #[tokio::test]
    async fn test_identity_requires_both_files() {
        let config = ClientConfig {
            address: "lockserver:3144".to_string(),
            use_tls: true,
            tls_cert: Some("/tmp/only-cert.pem".into()),
            ..ClientConfig::default()
        };
        let err = build_tls_config(&config).await.unwrap_err();
        assert!(err.to_string().contains("configured together"));
    }
}
