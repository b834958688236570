//! Topology sources (component D): polling and streaming discovery
//! adapters, plus the driver that turns a polling source into a streaming
//! one so the resolver only ever has to deal with one shape.

use std::future::Future;
use std::pin::Pin;

use futures_core::Stream;

use crate::error::DiscoveryError;
use crate::node::Topology;
use crate::transport::TopologyContext;

/// A discovery mechanism that is queried once per call and returns the
/// current topology (request/response semantics).
pub trait PollingSource<C>: Send + Sync + 'static {
    /// Fetches the current topology over `ctx`, honoring its timeout and
    /// cancellation token.
    fn get(
        &self,
        ctx: &TopologyContext<C>,
    ) -> impl Future<Output = Result<Topology, DiscoveryError>> + Send;
}

/// A discovery mechanism that pushes topology snapshots over a long-lived
/// stream (e.g. a server-streaming RPC).
pub trait StreamingSource<C>: Send + Sync + 'static {
    /// The stream of topology snapshots yielded by a single subscription.
    type Stream: Stream<Item = Result<Topology, DiscoveryError>> + Send + 'static;

    /// Opens a subscription over `ctx`. The returned stream ends (rather
    /// than yielding an error) once `ctx.cancellation()` is triggered.
    fn subscribe(
        &self,
        ctx: TopologyContext<C>,
    ) -> impl Future<Output = Result<Self::Stream, DiscoveryError>> + Send;
}

type BoxTopologyStream = Pin<Box<dyn Stream<Item = Result<Topology, DiscoveryError>> + Send>>;

/// Turns a [`PollingSource`] into a [`StreamingSource`] by re-issuing `get`
/// every `delay` for the lifetime of the subscription (§6.2).
///
/// The first snapshot is fetched immediately; cancellation is checked both
/// between polls and is raced against the in-flight `get()` call itself, so
/// a resolver shutdown never waits out a stuck discovery call.
#[derive(Debug, Clone)]
pub struct PollingToStreamingAdapter<S> {
    source: S,
    delay: std::time::Duration,
}

impl<S> PollingToStreamingAdapter<S> {
    /// Wraps `source`, polling it every `delay`.
    pub fn new(source: S, delay: std::time::Duration) -> Self {
        Self { source, delay }
    }
}

impl<S, C> StreamingSource<C> for PollingToStreamingAdapter<S>
where
    S: PollingSource<C> + Clone,
    C: Clone + Send + Sync + 'static,
{
    type Stream = BoxTopologyStream;

    async fn subscribe(&self, ctx: TopologyContext<C>) -> Result<Self::Stream, DiscoveryError> {
        let source = self.source.clone();
        let delay = self.delay;
        let stream = async_stream::stream! {
            loop {
                if ctx.cancellation().is_cancelled() {
                    return;
                }
                let fetch = source.get(&ctx);
                let outcome = tokio::select! {
                    biased;
                    _ = ctx.cancellation().cancelled() => return,
                    outcome = fetch => outcome,
                };
                let stop_after = outcome.is_err();
                yield outcome;
                if stop_after {
                    return;
                }
                tokio::select! {
                    biased;
                    _ = ctx.cancellation().cancelled() => return,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        };
        Ok(Box::pin(stream))
    }
}
