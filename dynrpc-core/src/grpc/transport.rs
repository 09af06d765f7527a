//! Plaintext channel construction.
use http::Uri;
use std::time::Duration;
use tonic::transport::{Channel, Endpoint};
use tracing::debug;

/// Errors that can occur when connecting to a gRPC server.
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("Invalid URL '{0}': {1}")]
    InvalidUrl(String, #[source] tonic::transport::Error),
    #[error("Invalid authority '{0}': {1}")]
    InvalidAuthority(String, #[source] http::uri::InvalidUri),
    #[error("Failed to connect to '{0}': {1}")]
    ConnectionFailed(String, #[source] tonic::transport::Error),
}

#[derive(Debug, Clone, Default)]
pub struct ConnectOptions {
    pub connect_timeout: Option<Duration>,
    /// Overrides the `:authority` sent with every request.
    pub authority: Option<String>,
    pub keepalive: Option<Duration>,
}

/// Connects to `addr` (e.g. `http://localhost:50051`) over plaintext HTTP/2.
pub async fn connect(addr: &str, options: &ConnectOptions) -> Result<Channel, ConnectError> {
    let mut endpoint = Endpoint::new(addr.to_string())
        .map_err(|e| ConnectError::InvalidUrl(addr.to_string(), e))?;

    if let Some(timeout) = options.connect_timeout {
        endpoint = endpoint.connect_timeout(timeout);
    }
    if let Some(interval) = options.keepalive {
        endpoint = endpoint.tcp_keepalive(Some(interval));
    }
    if let Some(authority) = &options.authority {
        let origin = format!("http://{authority}")
            .parse::<Uri>()
            .map_err(|e| ConnectError::InvalidAuthority(authority.clone(), e))?;
        endpoint = endpoint.origin(origin);
    }

    debug!(addr, "connecting");

    endpoint
        .connect()
        .await
        .map_err(|e| ConnectError::ConnectionFailed(addr.to_string(), e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_rejects_invalid_url() {
        let result = connect("not a url", &ConnectOptions::default()).await;
        assert!(matches!(result, Err(ConnectError::InvalidUrl(..))));
    }

    #[tokio::test]
    async fn test_connect_rejects_invalid_authority() {
        let options = ConnectOptions {
            authority: Some("bad authority".to_string()),
            ..Default::default()
        };

        let result = connect("http://127.0.0.1:1", &options).await;
        assert!(matches!(result, Err(ConnectError::InvalidAuthority(..))));
    }
}
