//! The cluster resolver (component E): bootstraps an initial topology
//! against the seed pool, then holds a long-lived subscription, publishing
//! de-duplicated snapshots and falling back to backoff-and-retry whenever
//! every seed is unreachable.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use arc_swap::ArcSwap;
use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::config::{Backoff, ClusterClientConfig};
use crate::error::{DiscoveryError, Error};
use crate::node::Topology;
use crate::runtime::Runtime;
use crate::seed_pool::SeedPool;
use crate::source::StreamingSource;
use crate::state::{ChannelState, ResolverPhase, StateCell};
use crate::transport::{Transport, TopologyContext};

struct Shared {
    published: ArcSwap<Topology>,
    publish_tx: tokio::sync::watch::Sender<Arc<Topology>>,
    state: StateCell,
    cancellation: CancellationToken,
    current_subscription: Mutex<Option<CancellationToken>>,
    closed: AtomicBool,
}

impl Shared {
    fn new() -> Self {
        let (publish_tx, _rx) = tokio::sync::watch::channel(Arc::new(Topology::empty()));
        Self {
            published: ArcSwap::from_pointee(Topology::empty()),
            publish_tx,
            state: StateCell::new(),
            cancellation: CancellationToken::new(),
            current_subscription: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    fn publish(&self, topology: Arc<Topology>) {
        self.published.store(topology.clone());
        let _ = self.publish_tx.send(topology);
    }
}

/// Handle to a running cluster resolver. Cloning shares the same underlying
/// discovery loop; dropping every clone does not stop it — call
/// [`ClusterResolver::close`] explicitly.
#[derive(Clone)]
pub struct ClusterResolver {
    shared: Arc<Shared>,
}

impl ClusterResolver {
    /// Builds a resolver and bootstraps an initial topology.
    ///
    /// Bootstrapping races seed acquisition and subscription against
    /// `resilience.timeout`, retrying with exponential backoff, and fails
    /// with [`Error::BootstrapFailed`] once `resilience.max_discovery_attempts`
    /// consecutive attempts have failed. On success, a background task takes
    /// over to maintain the subscription for the resolver's lifetime.
    pub async fn start<T, S, R>(
        transport: T,
        source: S,
        config: ClusterClientConfig,
        runtime: R,
    ) -> Result<Self, Error>
    where
        T: Transport,
        S: StreamingSource<T::Channel>,
        R: Runtime,
    {
        let seeds = config.validate()?;
        let seed_count = seeds.len();
        let seed_pool = Arc::new(SeedPool::new(
            transport,
            seeds,
            config.seed_pool_capacity,
            config.resilience.retry_policy(),
            runtime.clone(),
        ));
        let shared = Arc::new(Shared::new());
        let mut backoff = Backoff::new(config.resilience.retry_policy());

        let topology = bootstrap(&seed_pool, &source, &config, &shared, &mut backoff, seed_count, &runtime).await?;
        shared
            .state
            .publish_topology(ResolverPhase::Subscribed, topology.count(), topology.eligible_count());
        shared.publish(Arc::new(topology));

        let handle = Self { shared: shared.clone() };
        let driver = Driver {
            seed_pool,
            source,
            config,
            shared,
            backoff,
            runtime: runtime.clone(),
        };
        runtime.spawn(driver.run());
        Ok(handle)
    }

    /// The most recently published topology.
    pub fn topology(&self) -> Arc<Topology> {
        self.shared.published.load_full()
    }

    /// A diagnostic snapshot of the resolver's current state.
    pub fn state(&self) -> Arc<ChannelState> {
        self.shared.state.load()
    }

    /// Subscribes to topology publications. The push handle a load-balancer
    /// factory uses to stay current without polling (§4.E); the receiver
    /// always observes the latest value, not a queue of every intermediate
    /// one, so a slow subscriber never falls behind by more than one update.
    pub fn subscribe(&self) -> tokio::sync::watch::Receiver<Arc<Topology>> {
        self.shared.publish_tx.subscribe()
    }

    /// Requests that the current subscription be torn down and re-established
    /// immediately, without clearing any seed's cooldown. Concurrent calls
    /// coalesce: cancelling an already-cancelled subscription token is a
    /// no-op, so redundant refresh requests cost nothing extra.
    pub fn trigger_refresh(&self) {
        if let Some(token) = self.shared.current_subscription.lock().unwrap().as_ref() {
            token.cancel();
        }
    }

    /// Stops the discovery loop. Idempotent.
    pub fn close(&self) {
        self.shared.closed.store(true, Ordering::SeqCst);
        self.shared.cancellation.cancel();
        self.shared.state.set_phase(ResolverPhase::Closed);
    }
}

async fn bootstrap<T, S, R>(
    seed_pool: &Arc<SeedPool<T, R>>,
    source: &S,
    config: &ClusterClientConfig,
    shared: &Arc<Shared>,
    backoff: &mut Backoff,
    seed_count: usize,
    runtime: &R,
) -> Result<Topology, Error>
where
    T: Transport,
    S: StreamingSource<T::Channel>,
    R: Runtime,
{
    let mut attempts = 0usize;
    loop {
        if shared.cancellation.is_cancelled() {
            return Err(Error::NoReachableNodes);
        }
        if attempts >= config.resilience.max_discovery_attempts {
            return Err(Error::BootstrapFailed {
                attempts,
                seeds: seed_count,
            });
        }
        match bootstrap_attempt(seed_pool, source, config, &shared.cancellation).await {
            Ok(topology) => return Ok(topology),
            Err(error) => {
                attempts += 1;
                shared.state.record_error(ResolverPhase::Bootstrap, error.to_string());
                if attempts >= config.resilience.max_discovery_attempts {
                    return Err(Error::BootstrapFailed {
                        attempts,
                        seeds: seed_count,
                    });
                }
                shared.state.set_phase(ResolverPhase::Backoff);
                let sleep = backoff.next_backoff();
                tokio::select! {
                    biased;
                    _ = shared.cancellation.cancelled() => return Err(Error::NoReachableNodes),
                    _ = runtime.sleep(sleep) => {}
                }
                shared.state.set_phase(ResolverPhase::Bootstrap);
            }
        }
    }
}

async fn bootstrap_attempt<T, S, R>(
    seed_pool: &Arc<SeedPool<T, R>>,
    source: &S,
    config: &ClusterClientConfig,
    cancellation: &CancellationToken,
) -> Result<Topology, DiscoveryError>
where
    T: Transport,
    S: StreamingSource<T::Channel>,
    R: Runtime,
{
    let (endpoint, channel) = seed_pool.acquire(cancellation).await?;
    let ctx = TopologyContext::new(channel, endpoint.clone(), config.resilience.timeout, cancellation.clone());
    let result = tokio::time::timeout(config.resilience.timeout, async {
        let stream = source.subscribe(ctx).await?;
        tokio::pin!(stream);
        match stream.next().await {
            Some(item) => item,
            None => Err(DiscoveryError::StreamBroken {
                endpoint: endpoint.clone(),
                message: "subscription ended before the first snapshot".to_string(),
            }),
        }
    })
    .await;

    match result {
        Ok(Ok(topology)) => {
            seed_pool.report_success(&endpoint);
            Ok(topology)
        }
        Ok(Err(error)) => {
            seed_pool.report_failure(&endpoint, &error);
            Err(error)
        }
        Err(_elapsed) => {
            let error = DiscoveryError::Timeout {
                endpoint: endpoint.clone(),
                timeout: config.resilience.timeout,
            };
            seed_pool.report_failure(&endpoint, &error);
            Err(error)
        }
    }
}

struct Driver<T: Transport, S, R: Runtime> {
    seed_pool: Arc<SeedPool<T, R>>,
    source: S,
    config: ClusterClientConfig,
    shared: Arc<Shared>,
    backoff: Backoff,
    runtime: R,
}

impl<T, S, R> Driver<T, S, R>
where
    T: Transport,
    S: StreamingSource<T::Channel>,
    R: Runtime,
{
    async fn run(mut self) {
        loop {
            if self.shared.cancellation.is_cancelled() {
                self.shutdown();
                return;
            }

            let sub_token = self.shared.cancellation.child_token();
            *self.shared.current_subscription.lock().unwrap() = Some(sub_token.clone());

            let acquired = self.seed_pool.acquire(&sub_token).await;
            let (endpoint, channel) = match acquired {
                Ok(v) => v,
                Err(DiscoveryError::Cancelled) => {
                    if self.shared.cancellation.is_cancelled() {
                        self.shutdown();
                        return;
                    }
                    continue; // refresh requested mid-acquire; just retry
                }
                Err(error) => {
                    self.shared.state.record_error(ResolverPhase::Backoff, error.to_string());
                    if self.sleep_backoff().await {
                        self.shutdown();
                        return;
                    }
                    continue;
                }
            };

            let ctx = TopologyContext::new(
                channel,
                endpoint.clone(),
                self.config.resilience.timeout,
                sub_token.clone(),
            );
            let stream = match self.source.subscribe(ctx).await {
                Ok(stream) => stream,
                Err(error) => {
                    self.seed_pool.report_failure(&endpoint, &error);
                    self.shared.state.record_error(ResolverPhase::Backoff, error.to_string());
                    if self.sleep_backoff().await {
                        self.shutdown();
                        return;
                    }
                    continue;
                }
            };

            self.drain(stream, &endpoint).await;

            if self.shared.cancellation.is_cancelled() {
                self.shutdown();
                return;
            }
            if sub_token.is_cancelled() {
                // Torn down by a refresh request, not a failure: reconnect
                // immediately with no backoff and no cooldown penalty.
                continue;
            }
            if self.sleep_backoff().await {
                self.shutdown();
                return;
            }
        }
    }

    /// Releases the seed pool and marks the resolver closed. Called once,
    /// at every exit point of [`Driver::run`] that follows cancellation.
    fn shutdown(&self) {
        self.seed_pool.close();
        self.shared.state.set_phase(ResolverPhase::Closed);
    }

    /// Consumes snapshots until the stream ends, publishing any that differ
    /// from the last published topology.
    async fn drain(&mut self, stream: S::Stream, endpoint: &crate::endpoint::Endpoint) {
        tokio::pin!(stream);
        loop {
            match stream.next().await {
                Some(Ok(topology)) => {
                    self.seed_pool.report_success(endpoint);
                    self.backoff.reset();
                    let previous = self.shared.published.load_full();
                    if !previous.equals(&topology) {
                        self.shared.publish(Arc::new(topology.clone()));
                    }
                    self.shared
                        .state
                        .publish_topology(ResolverPhase::Subscribed, topology.count(), topology.eligible_count());
                }
                Some(Err(error)) => {
                    self.seed_pool.report_failure(endpoint, &error);
                    self.shared.state.record_error(ResolverPhase::Backoff, error.to_string());
                    return;
                }
                None => return,
            }
        }
    }

    /// Sleeps out a backoff window, cancellable by resolver close. Returns
    /// `true` if the resolver was closed during the sleep.
    async fn sleep_backoff(&mut self) -> bool {
        self.shared.state.set_phase(ResolverPhase::Backoff);
        let sleep = self.backoff.next_backoff();
        tokio::select! {
            biased;
            _ = self.shared.cancellation.cancelled() => true,
            _ = self.runtime.sleep(sleep) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering as AOrdering};
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    use super::*;
    use crate::endpoint::Endpoint;
    use crate::node::Node;
    use crate::runtime::TokioRuntime;

    #[derive(Clone)]
    struct OkTransport;

    impl Transport for OkTransport {
        type Channel = ();

        async fn connect(&self, _endpoint: &Endpoint) -> Result<(), DiscoveryError> {
            Ok(())
        }
    }

    #[derive(Clone)]
    struct FailingTransport;

    impl Transport for FailingTransport {
        type Channel = ();

        async fn connect(&self, endpoint: &Endpoint) -> Result<(), DiscoveryError> {
            Err(DiscoveryError::Transport {
                endpoint: endpoint.clone(),
                message: "refused".to_string(),
            })
        }
    }

    /// Like [`FailingTransport`], but counts every `connect` call, so tests
    /// can assert that no I/O happened at all.
    #[derive(Clone)]
    struct CountingFailingTransport {
        connects: Arc<AtomicUsize>,
    }

    impl Transport for CountingFailingTransport {
        type Channel = ();

        async fn connect(&self, endpoint: &Endpoint) -> Result<(), DiscoveryError> {
            self.connects.fetch_add(1, AOrdering::SeqCst);
            Err(DiscoveryError::Transport {
                endpoint: endpoint.clone(),
                message: "refused".to_string(),
            })
        }
    }

    /// A streaming source whose subscriptions yield one snapshot and then
    /// hang until `ctx.cancellation()` fires, so tests can drive
    /// refresh/shutdown behavior deterministically instead of racing a fixed
    /// sleep against a finite scripted stream.
    #[derive(Clone)]
    struct CancellableSource {
        calls: Arc<AtomicUsize>,
    }

    impl StreamingSource<()> for CancellableSource {
        type Stream = std::pin::Pin<Box<dyn futures_core::Stream<Item = Result<Topology, DiscoveryError>> + Send>>;

        async fn subscribe(&self, ctx: TopologyContext<()>) -> Result<Self::Stream, DiscoveryError> {
            self.calls.fetch_add(1, AOrdering::SeqCst);
            let cancellation = ctx.cancellation().clone();
            let stream = async_stream::stream! {
                yield Ok(topology_with("a"));
                cancellation.cancelled().await;
            };
            Ok(Box::pin(stream))
        }
    }

    fn topology_with(host: &str) -> Topology {
        Topology::new(vec![Node::new(Endpoint::new(host, 9000), true, 0)])
    }

    /// A streaming source fed from a queue of pre-built responses; each call
    /// to `subscribe` drains one entry.
    #[derive(Clone)]
    struct ScriptedSource {
        scripts: Arc<StdMutex<Vec<Vec<Result<Topology, DiscoveryError>>>>>,
        calls: Arc<AtomicUsize>,
    }

    impl ScriptedSource {
        fn new(scripts: Vec<Vec<Result<Topology, DiscoveryError>>>) -> Self {
            Self {
                scripts: Arc::new(StdMutex::new(scripts)),
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    impl StreamingSource<()> for ScriptedSource {
        type Stream = futures_util::stream::Iter<std::vec::IntoIter<Result<Topology, DiscoveryError>>>;

        async fn subscribe(&self, _ctx: TopologyContext<()>) -> Result<Self::Stream, DiscoveryError> {
            self.calls.fetch_add(1, AOrdering::SeqCst);
            let mut scripts = self.scripts.lock().unwrap();
            let script = if scripts.is_empty() { Vec::new() } else { scripts.remove(0) };
            Ok(futures_util::stream::iter(script))
        }
    }

    fn config() -> ClusterClientConfig {
        ClusterClientConfig {
            seeds: vec!["seed:9000".to_string()],
            delay: Duration::from_millis(10),
            resilience: crate::config::ResilienceOptions {
                timeout: Duration::from_millis(200),
                max_discovery_attempts: 3,
                initial_backoff: Duration::from_millis(10),
                max_backoff: Duration::from_millis(50),
                refresh_on_status_codes: vec![14],
            },
            seed_pool_capacity: 4,
            use_tls: false,
        }
    }

    #[tokio::test]
    async fn bootstrap_publishes_first_snapshot() {
        let source = ScriptedSource::new(vec![vec![Ok(topology_with("a"))]]);
        let resolver = ClusterResolver::start(OkTransport, source, config(), TokioRuntime).await.unwrap();
        assert_eq!(resolver.topology().count(), 1);
        assert_eq!(resolver.state().phase(), ResolverPhase::Subscribed);
    }

    #[tokio::test]
    async fn bootstrap_fails_after_exhausting_attempts() {
        let source = ScriptedSource::new(vec![]);
        let result = ClusterResolver::start(FailingTransport, source, config(), TokioRuntime).await;
        assert!(matches!(result, Err(Error::BootstrapFailed { .. })));
    }

    #[tokio::test]
    async fn reconnect_publishes_new_snapshot_after_stream_ends() {
        let source = ScriptedSource::new(vec![
            vec![Ok(topology_with("a"))],
            vec![Ok(topology_with("b"))],
        ]);
        let resolver = ClusterResolver::start(OkTransport, source, config(), TokioRuntime).await.unwrap();
        assert_eq!(resolver.topology().nodes()[0].endpoint().host(), "a");

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(resolver.topology().nodes()[0].endpoint().host(), "b");
    }

    #[tokio::test]
    async fn identical_snapshot_does_not_replace_published_arc() {
        let source = ScriptedSource::new(vec![
            vec![Ok(topology_with("a"))],
            vec![Ok(topology_with("a"))],
        ]);
        let resolver = ClusterResolver::start(OkTransport, source, config(), TokioRuntime).await.unwrap();
        let first = resolver.topology();
        tokio::time::sleep(Duration::from_millis(100)).await;
        let second = resolver.topology();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn close_stops_the_driver() {
        let source = ScriptedSource::new(vec![vec![Ok(topology_with("a"))]]);
        let resolver = ClusterResolver::start(OkTransport, source, config(), TokioRuntime).await.unwrap();
        resolver.close();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(resolver.state().phase(), ResolverPhase::Closed);
    }

    #[tokio::test]
    async fn max_discovery_attempts_zero_fails_without_attempting_io() {
        let connects = Arc::new(AtomicUsize::new(0));
        let transport = CountingFailingTransport { connects: connects.clone() };
        let source = ScriptedSource::new(vec![]);
        let mut cfg = config();
        cfg.resilience.max_discovery_attempts = 0;

        let result = ClusterResolver::start(transport, source, cfg, TokioRuntime).await;

        assert!(matches!(result, Err(Error::BootstrapFailed { attempts: 0, .. })));
        assert_eq!(connects.load(AOrdering::SeqCst), 0);
    }

    #[tokio::test]
    async fn trigger_refresh_resubscribes_without_a_backoff_sleep() {
        let calls = Arc::new(AtomicUsize::new(0));
        let source = CancellableSource { calls: calls.clone() };
        let mut cfg = config();
        cfg.resilience.initial_backoff = Duration::from_secs(10);
        cfg.resilience.max_backoff = Duration::from_secs(10);
        let resolver = ClusterResolver::start(OkTransport, source, cfg, TokioRuntime).await.unwrap();
        assert_eq!(calls.load(AOrdering::SeqCst), 1);

        // Let the driver take over the long-lived subscription.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(calls.load(AOrdering::SeqCst), 2);

        resolver.trigger_refresh();
        // With a 10s configured backoff, a resubscribe this fast can only
        // happen on the no-backoff refresh path.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(calls.load(AOrdering::SeqCst), 3);
    }

    #[tokio::test]
    async fn concurrent_refresh_requests_coalesce_to_one_resubscribe() {
        let calls = Arc::new(AtomicUsize::new(0));
        let source = CancellableSource { calls: calls.clone() };
        let resolver = ClusterResolver::start(OkTransport, source, config(), TokioRuntime).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(calls.load(AOrdering::SeqCst), 2);

        // Cancelling an already-cancelled token is a no-op, so a burst of
        // concurrent refresh requests collapses into one pending refresh.
        resolver.trigger_refresh();
        resolver.trigger_refresh();
        resolver.trigger_refresh();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(calls.load(AOrdering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn close_during_backoff_settles_without_waiting_out_the_backoff() {
        let source = ScriptedSource::new(vec![
            vec![Ok(topology_with("a"))],
            vec![Err(DiscoveryError::StreamBroken {
                endpoint: Endpoint::new("seed", 9000),
                message: "broken".to_string(),
            })],
        ]);
        let mut cfg = config();
        cfg.resilience.initial_backoff = Duration::from_secs(30);
        cfg.resilience.max_backoff = Duration::from_secs(30);
        let resolver = ClusterResolver::start(OkTransport, source, cfg, TokioRuntime).await.unwrap();

        tokio::time::advance(Duration::from_millis(1)).await;
        assert_eq!(resolver.state().phase(), ResolverPhase::Backoff);

        resolver.close();
        tokio::time::advance(Duration::from_millis(1)).await;
        assert_eq!(resolver.state().phase(), ResolverPhase::Closed);
    }
}
