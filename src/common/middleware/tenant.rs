use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::http::{header, Request};
use axum::response::Response;
use tower::{Layer, Service};

const TENANT_HEADER: &str = "X-Tenant-ID";

/// Resolved tenant identifier, inserted into request extensions by
/// [`TenantLayer`] before the request reaches any handler or the auth
/// middleware. Carries no DB-backed state — just the raw id string, looked
/// up against the realm registry downstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantId(pub String);

/// Extracts the tenant identifier for a request, trying progressively
/// weaker signals: an explicit header, the request subdomain, a `/tenant/<id>`
/// path segment, then a `tenant_id` query parameter. Leaves the extension
/// unset (not an error) when none match — callers that require a tenant
/// reject that downstream via `AppError::missing_tenant`.
fn extract_tenant_id<B>(request: &Request<B>) -> Option<TenantId> {
    if let Some(header_value) = request
        .headers()
        .get(TENANT_HEADER)
        .and_then(|h| h.to_str().ok())
    {
        if !header_value.trim().is_empty() {
            return Some(TenantId(header_value.trim().to_string()));
        }
    }

    if let Some(host) = request
        .headers()
        .get(header::HOST)
        .and_then(|h| h.to_str().ok())
    {
        if let Some(subdomain) = subdomain_of(host) {
            return Some(TenantId(subdomain));
        }
    }

    let path = request.uri().path();
    if let Some(rest) = path.strip_prefix("/tenant/") {
        if let Some(segment) = rest.split('/').next() {
            if !segment.is_empty() {
                return Some(TenantId(segment.to_string()));
            }
        }
    }

    if let Some(query) = request.uri().query() {
        for pair in query.split('&') {
            if let Some(value) = pair.strip_prefix("tenant_id=") {
                if !value.is_empty() {
                    return Some(TenantId(value.to_string()));
                }
            }
        }
    }

    None
}

fn subdomain_of(host: &str) -> Option<String> {
    let host_without_port = host.split(':').next().unwrap_or(host);
    let labels: Vec<&str> = host_without_port.split('.').collect();
    // Require at least `sub.domain.tld` so bare `example.com` doesn't get
    // mistaken for a tenant subdomain.
    if labels.len() >= 3 && labels[0] != "www" {
        Some(labels[0].to_string())
    } else {
        None
    }
}

#[derive(Clone, Default)]
pub struct TenantLayer;

impl TenantLayer {
    pub fn new() -> Self {
        Self
    }
}

impl<S> Layer<S> for TenantLayer {
    type Service = TenantMiddleware<S>;

    fn layer(&self, service: S) -> Self::Service {
        TenantMiddleware { inner: service }
    }
}

#[derive(Clone)]
pub struct TenantMiddleware<S> {
    inner: S,
}

impl<S> Service<Request<Body>> for TenantMiddleware<S>
where
    S: Service<Request<Body>, Response = Response> + Send + Clone + 'static,
    S::Future: Send + 'static,
{
    type Response = Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut request: Request<Body>) -> Self::Future {
        let mut inner = self.inner.clone();

        if let Some(tenant_id) = extract_tenant_id(&request) {
            request.extensions_mut().insert(tenant_id);
        }

        Box::pin(async move { inner.call(request).await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;
    use tower::ServiceExt;

    #[derive(Clone)]
    struct EchoService;

    impl Service<Request<Body>> for EchoService {
        type Response = Response;
        type Error = Infallible;
        type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

        fn poll_ready(&mut self, _: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, request: Request<Body>) -> Self::Future {
            let mut response = Response::new(Body::empty());
            response.extensions_mut().clone_from(request.extensions());
            Box::pin(async move { Ok(response) })
        }
    }

    async fn run(request: Request<Body>) -> Response {
        let mut service = TenantLayer::new().layer(EchoService);
        service.ready().await.unwrap();
        service.call(request).await.unwrap()
    }

    #[tokio::test]
    async fn header_takes_priority_over_everything_else() {
        let request = Request::builder()
            .header(TENANT_HEADER, "tenant-header")
            .header(header::HOST, "tenant-host.example.com")
            .uri("/tenant/tenant-path/widgets?tenant_id=tenant-query")
            .body(Body::empty())
            .unwrap();

        let response = run(request).await;
        let tenant = response.extensions().get::<TenantId>().unwrap();
        assert_eq!(tenant.0, "tenant-header");
    }

    #[tokio::test]
    async fn falls_back_to_subdomain() {
        let request = Request::builder()
            .header(header::HOST, "acme.app.example.com")
            .uri("/")
            .body(Body::empty())
            .unwrap();

        let response = run(request).await;
        let tenant = response.extensions().get::<TenantId>().unwrap();
        assert_eq!(tenant.0, "acme");
    }

    #[tokio::test]
    async fn falls_back_to_path_segment() {
        let request = Request::builder()
            .uri("/tenant/acme/widgets")
            .body(Body::empty())
            .unwrap();

        let response = run(request).await;
        let tenant = response.extensions().get::<TenantId>().unwrap();
        assert_eq!(tenant.0, "acme");
    }

    #[tokio::test]
    async fn falls_back_to_query_param() {
        let request = Request::builder()
            .uri("/widgets?tenant_id=acme")
            .body(Body::empty())
            .unwrap();

        let response = run(request).await;
        let tenant = response.extensions().get::<TenantId>().unwrap();
        assert_eq!(tenant.0, "acme");
    }

    #[tokio::test]
    async fn no_signal_leaves_extension_unset() {
        let request = Request::builder().uri("/widgets").body(Body::empty()).unwrap();
        let response = run(request).await;
        assert!(response.extensions().get::<TenantId>().is_none());
    }
}
