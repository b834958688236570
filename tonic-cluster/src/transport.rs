//! Binds [`cluster_client::Transport`] to `tonic::transport::Channel`.

use cluster_client::{DiscoveryError, Endpoint, Transport};
use tonic::transport::{Channel, Endpoint as TonicEndpoint};

/// Connects seed endpoints as lazily-connecting `tonic` channels.
///
/// Mirrors the way a tonic client normally builds a channel: scheme and TLS
/// are fixed at construction time, and `Channel::connect_lazy` defers the
/// handshake to first use so `connect()` itself never blocks on the network.
#[derive(Debug, Clone)]
pub struct TonicTransport {
    use_tls: bool,
}

impl TonicTransport {
    /// Creates a transport that dials plaintext seed channels.
    pub fn new() -> Self {
        Self { use_tls: false }
    }

    /// Creates a transport that dials seed channels over TLS using the
    /// platform's native root certificates.
    pub fn with_tls() -> Self {
        Self { use_tls: true }
    }

    fn uri(&self, endpoint: &Endpoint) -> String {
        let scheme = if self.use_tls { "https" } else { "http" };
        format!("{scheme}://{}:{}", endpoint.host(), endpoint.port())
    }
}

impl Default for TonicTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for TonicTransport {
    type Channel = Channel;

    async fn connect(&self, endpoint: &Endpoint) -> Result<Channel, DiscoveryError> {
        let uri = self.uri(endpoint);
        let tonic_endpoint = TonicEndpoint::from_shared(uri).map_err(|error| DiscoveryError::Transport {
            endpoint: endpoint.clone(),
            message: error.to_string(),
        })?;
        Ok(tonic_endpoint.connect_lazy())
    }
}
