use axum::http::HeaderMap;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};
use uuid::Uuid;

#[allow(clippy::disallowed_methods)]
pub fn init() -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let formatting_layer = fmt::layer()
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_thread_names(true)
        .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
        .json();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(formatting_layer)
        .try_init()?;

    tracing::info!("logging initialized");
    Ok(())
}

#[allow(clippy::disallowed_methods)]
#[allow(dead_code)]
pub fn request_span(
    tenant_id: Option<String>,
    user_id: Option<String>,
    request_id: Uuid,
) -> tracing::Span {
    tracing::info_span!(
        "request",
        tenant_id = tenant_id.unwrap_or_else(|| "unknown".to_string()),
        user_id = user_id.unwrap_or_else(|| "anonymous".to_string()),
        request_id = request_id.to_string()
    )
}

#[allow(clippy::disallowed_methods)]
pub fn request_span_from_headers(headers: &HeaderMap) -> tracing::Span {
    let tenant_id = headers
        .get("x-tenant-id")
        .and_then(|h| h.to_str().ok())
        .map(String::from);
    let user_id = headers
        .get("x-user-id")
        .and_then(|h| h.to_str().ok())
        .map(String::from);
    let request_id = headers
        .get("x-request-id")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| Uuid::parse_str(s).ok())
        .unwrap_or_else(Uuid::now_v7);

    tracing::info_span!(
        "request",
        tenant_id = tenant_id.unwrap_or_else(|| "unknown".to_string()),
        user_id = user_id.unwrap_or_else(|| "anonymous".to_string()),
        request_id = request_id.to_string()
    )
}

#[allow(clippy::disallowed_methods)]
#[allow(dead_code)]
pub fn with_context<F, R>(
    tenant_id: Option<String>,
    user_id: Option<String>,
    request_id: String,
    f: F,
) -> R
where
    F: FnOnce() -> R,
{
    let span = tracing::info_span!(
        "request",
        tenant_id = tenant_id.unwrap_or_else(|| "unknown".to_string()),
        user_id = user_id.unwrap_or_else(|| "unknown".to_string()),
        request_id = %request_id,
    );
    span.in_scope(f)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Once;
    use tracing::{event, Level};
    use tracing_subscriber::fmt::TestWriter;

    static INIT: Once = Once::new();

    fn setup_test_logging() {
        INIT.call_once(|| {
            let env_filter = EnvFilter::new("debug");
            let _test_writer = TestWriter::new();
            let formatting_layer = fmt::layer()
                .with_test_writer()
                .with_target(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
                .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE);

            tracing_subscriber::registry()
                .with(env_filter)
                .with(formatting_layer)
                .init();
        });
    }

    #[test]
    fn with_context_returns_closure_value() {
        setup_test_logging();

        let result = with_context(
            Some("tenant-a".to_string()),
            Some("user-a".to_string()),
            "req-123".to_string(),
            || {
                event!(Level::INFO, "test log message");
                42
            },
        );

        assert_eq!(result, 42);
    }

    #[test]
    fn with_context_tolerates_missing_ids() {
        setup_test_logging();

        let result = with_context(None, None, "req-123".to_string(), || {
            event!(Level::INFO, "missing ids");
            "ok"
        });

        assert_eq!(result, "ok");
    }

    #[test]
    fn nested_contexts_compose() {
        setup_test_logging();

        let outer = with_context(
            Some("tenant1".to_string()),
            Some("user1".to_string()),
            "request1".to_string(),
            || {
                let inner = with_context(
                    Some("tenant2".to_string()),
                    Some("user2".to_string()),
                    "request2".to_string(),
                    || "inner",
                );
                (inner, "outer")
            },
        );

        assert_eq!(outer, ("inner", "outer"));
    }

    #[test]
    fn request_span_from_headers_defaults_to_anonymous() {
        setup_test_logging();
        let headers = HeaderMap::new();
        let span = request_span_from_headers(&headers);
        assert!(!span.is_disabled());
    }
}
