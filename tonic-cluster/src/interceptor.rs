//! The refresh-trigger interceptor (component G).

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use cluster_client::ClusterResolver;
use tonic::body::Body;
use tower_service::Service;

/// A predicate over an observed RPC status, deciding whether it should
/// trigger re-resolution. The default policy matches `Unavailable` only.
pub type RefreshPolicy = Arc<dyn Fn(tonic::Code) -> bool + Send + Sync>;

/// Default refresh policy: `resilience.refresh_on_status_codes` (the gRPC
/// status code space, `[14]` meaning `Unavailable` by default).
pub fn status_code_policy(codes: Vec<i32>) -> RefreshPolicy {
    Arc::new(move |code| codes.contains(&(code as i32)))
}

/// Wraps an inner service (the load balancer), observing the status of each
/// completed call and firing [`ClusterResolver::trigger_refresh`] when the
/// refresh policy matches. Never blocks or alters the caller's response;
/// refresh is fire-and-forget.
#[derive(Clone)]
pub struct RefreshInterceptor<S> {
    inner: S,
    resolver: ClusterResolver,
    policy: RefreshPolicy,
}

impl<S> RefreshInterceptor<S> {
    /// Wraps `inner`, triggering `resolver` refreshes per `policy`.
    pub fn new(inner: S, resolver: ClusterResolver, policy: RefreshPolicy) -> Self {
        Self { inner, resolver, policy }
    }

    /// The wrapped service.
    pub(crate) fn inner(&self) -> &S {
        &self.inner
    }
}

impl<S> Service<http::Request<Body>> for RefreshInterceptor<S>
where
    S: Service<http::Request<Body>, Response = http::Response<Body>> + Clone + Send + 'static,
    S::Future: Send,
    S::Error: Send,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: http::Request<Body>) -> Self::Future {
        let resolver = self.resolver.clone();
        let policy = self.policy.clone();
        let mut inner = self.inner.clone();
        Box::pin(async move {
            let response = inner.call(request).await?;
            if let Some(code) = grpc_status_of(&response) {
                if (policy)(code) {
                    tracing::debug!(?code, "refresh-trigger interceptor observed matching status");
                    resolver.trigger_refresh();
                }
            }
            Ok(response)
        })
    }
}

/// Extracts the gRPC status code from a response's trailers, if present.
/// Status is normally carried in trailers for streaming calls and may be
/// absent for unary calls whose status arrives out-of-band; callers relying
/// on this must inspect `tonic::Status` directly when available instead.
fn grpc_status_of(response: &http::Response<Body>) -> Option<tonic::Code> {
    response
        .headers()
        .get("grpc-status")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<i32>().ok())
        .map(tonic::Code::from_i32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_matches_unavailable_only() {
        let policy = status_code_policy(vec![14]);
        assert!(policy(tonic::Code::Unavailable));
        assert!(!policy(tonic::Code::NotFound));
    }

    #[test]
    fn extracts_status_from_header() {
        let response = http::Response::builder()
            .header("grpc-status", "14")
            .body(Body::empty())
            .unwrap();
        assert_eq!(grpc_status_of(&response), Some(tonic::Code::Unavailable));
    }

    #[test]
    fn missing_header_yields_no_status() {
        let response = http::Response::new(Body::empty());
        assert_eq!(grpc_status_of(&response), None);
    }
}
