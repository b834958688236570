//! Channel assembly (component H): wires the resolver, seed pool, load
//! balancer, and refresh interceptor into a single `tower::Service`.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use cluster_client::{ChannelState, ClusterClientConfig, ClusterResolver, Endpoint, StreamingSource, TokioRuntime};
use tonic::body::Body;
use tonic::transport::Channel;
use tower_service::Service;

use crate::balancer::ClusterBalancer;
use crate::error::Error;
use crate::interceptor::{status_code_policy, RefreshInterceptor, RefreshPolicy};
use crate::transport::TonicTransport;

/// An assembled cluster channel: a `tower::Service` over gRPC bodies that
/// discovers topology in the background, load-balances across it, and
/// re-triggers discovery on matching RPC failures.
#[derive(Clone)]
pub struct ClusterChannel {
    service: RefreshInterceptor<ClusterBalancer>,
    resolver: ClusterResolver,
}

impl ClusterChannel {
    /// Builds a channel from a primary seed endpoint plus any additional
    /// seeds (deduplicated, primary kept first — §6.3) and a discovery
    /// source.
    pub async fn for_address<S>(
        primary: impl Into<String>,
        extra_seeds: impl IntoIterator<Item = String>,
        source: S,
    ) -> Result<Self, Error>
    where
        S: StreamingSource<Channel>,
    {
        let config = ClusterClientConfig::for_address(primary, extra_seeds);
        Self::from_configuration(config, source).await
    }

    /// Builds a channel from an explicit, serializable configuration plus a
    /// code-side discovery source (the source itself is not serializable,
    /// per §6.3).
    pub async fn from_configuration<S>(config: ClusterClientConfig, source: S) -> Result<Self, Error>
    where
        S: StreamingSource<Channel>,
    {
        ClusterChannelBuilder::new(config, source).build().await
    }

    /// A diagnostic snapshot of the resolver driving this channel.
    pub fn state(&self) -> Arc<ChannelState> {
        self.resolver.state()
    }

    /// The endpoints currently in the load balancer's selection set.
    pub fn selection_set(&self) -> Vec<Endpoint> {
        self.service.inner_selection_set()
    }

    /// Forces out-of-band re-resolution, as if a refresh-triggering RPC
    /// error had just been observed.
    pub fn trigger_refresh(&self) {
        self.resolver.trigger_refresh();
    }

    /// Stops the background discovery loop. The channel itself is not
    /// reusable afterward.
    pub fn close(&self) {
        self.resolver.close();
    }
}

impl Service<http::Request<Body>> for ClusterChannel {
    type Response = http::Response<Body>;
    type Error = crate::balancer::BalancerError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.service.poll_ready(cx)
    }

    fn call(&mut self, request: http::Request<Body>) -> Self::Future {
        self.service.call(request)
    }
}

/// Builds a [`ClusterChannel`], following the construction order in the
/// design notes: the resolver is built first, and its refresh handle is
/// injected into the interceptor at the end, so there is never a
/// half-wired interceptor with a back-patched resolver reference.
pub struct ClusterChannelBuilder<S> {
    config: ClusterClientConfig,
    source: S,
    refresh_policy: Option<RefreshPolicy>,
}

impl<S> ClusterChannelBuilder<S>
where
    S: StreamingSource<Channel>,
{
    /// Starts a builder from an explicit configuration and discovery source.
    pub fn new(config: ClusterClientConfig, source: S) -> Self {
        Self {
            config,
            source,
            refresh_policy: None,
        }
    }

    /// Overrides the default (`Unavailable`-only) refresh policy.
    #[must_use]
    pub fn refresh_policy(mut self, policy: RefreshPolicy) -> Self {
        self.refresh_policy = Some(policy);
        self
    }

    /// Bootstraps the resolver, then assembles the balancer and interceptor
    /// around it.
    pub async fn build(self) -> Result<ClusterChannel, Error> {
        let transport = if self.config.use_tls {
            TonicTransport::with_tls()
        } else {
            TonicTransport::new()
        };

        let resolver = ClusterResolver::start(transport.clone(), self.source, self.config.clone(), TokioRuntime).await?;
        let (balancer, handle) = ClusterBalancer::new(transport);

        handle.update(&resolver.topology()).await;
        spawn_balancer_feed(resolver.clone(), handle);

        let policy = self
            .refresh_policy
            .unwrap_or_else(|| status_code_policy(self.config.resilience.refresh_on_status_codes.clone()));
        let service = RefreshInterceptor::new(balancer, resolver.clone(), policy);

        Ok(ClusterChannel { service, resolver })
    }
}

/// Keeps the balancer's selection set current by following every topology
/// publication; ends on its own once the resolver (and thus its publish
/// sender) is dropped.
fn spawn_balancer_feed(resolver: ClusterResolver, handle: crate::balancer::BalancerHandle) {
    let mut updates = resolver.subscribe();
    tokio::spawn(async move {
        while updates.changed().await.is_ok() {
            let topology = updates.borrow_and_update().clone();
            handle.update(&topology).await;
        }
    });
}

impl RefreshInterceptor<ClusterBalancer> {
    fn inner_selection_set(&self) -> Vec<Endpoint> {
        self.inner().selection_set()
    }
}
