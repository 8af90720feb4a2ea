//! Request pipeline: resolves tenant, validates bearer tokens against the
//! right realm, maps identities, rolls up permissions, and falls back to a
//! rate-limited guest session for unauthenticated callers.

use std::time::Instant;

use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};
use metrics::{counter, histogram};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::common::error::AppResult;
use crate::common::middleware::tenant::TenantId;
use crate::domain::auth_context::AuthContext;
use crate::infrastructure::state::AppState;

fn bearer_token<B>(req: &Request<B>) -> Option<String> {
    req.headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(|t| t.to_string())
}

fn client_ip<B>(req: &Request<B>) -> String {
    req.headers()
        .get("X-Forwarded-For")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.split(',').next())
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn user_agent<B>(req: &Request<B>) -> String {
    req.headers()
        .get("User-Agent")
        .and_then(|h| h.to_str().ok())
        .unwrap_or("unknown")
        .to_string()
}

fn referrer<B>(req: &Request<B>) -> Option<String> {
    req.headers()
        .get("Referer")
        .and_then(|h| h.to_str().ok())
        .map(|s| s.to_string())
}

fn guest_session_token<B>(req: &Request<B>) -> Option<String> {
    req.headers()
        .get("X-Guest-Session")
        .and_then(|h| h.to_str().ok())
        .map(|s| s.to_string())
}

async fn resolve_authenticated(
    state: &AppState,
    tenant_id: &str,
    token: &str,
    request_id: &str,
) -> AppResult<AuthContext> {
    let realm = state.realm_registry.find_by_tenant(tenant_id).await?;

    let claims = state
        .token_validator
        .validate(&realm, token, state.config.token.default_strategy)
        .await?;

    let identity = state
        .identity_mapper
        .map_identity(
            tenant_id,
            &claims.sub,
            claims.preferred_username.clone(),
            claims.email.clone(),
        )
        .await?;

    let permissions = state
        .permission_cache
        .resolve(tenant_id, &identity.id)
        .await?;

    Ok(AuthContext {
        tenant_id: tenant_id.to_string(),
        subject: claims.sub,
        user_id: Some(identity.id),
        username: identity.username,
        email: identity.email,
        roles: claims.all_roles().into_iter().collect(),
        permissions,
        request_id: request_id.to_string(),
        is_guest: false,
    })
}

async fn resolve_guest<B>(
    state: &AppState,
    req: &Request<B>,
    tenant_id: Option<&str>,
    request_id: &str,
) -> AppResult<(AuthContext, String)> {
    let tenant_id = tenant_id.unwrap_or("anonymous");
    let session = state
        .guest_service
        .admit(
            tenant_id,
            &client_ip(req),
            &user_agent(req),
            referrer(req).as_deref(),
            guest_session_token(req).as_deref(),
        )
        .await?;

    let session_token = session.session_token.clone();
    let context = AuthContext {
        tenant_id: session.tenant_id,
        subject: session.id.to_string(),
        user_id: None,
        username: None,
        email: None,
        roles: Vec::new(),
        permissions: crate::domain::permission::PermissionSet::empty(),
        request_id: request_id.to_string(),
        is_guest: true,
    };
    Ok((context, session_token))
}

async fn record_auth_metrics(success: bool, is_guest: bool, duration: std::time::Duration) {
    let status = if success { "success" } else { "failure" };
    let mode = if is_guest { "guest" } else { "authenticated" };
    counter!("auth_attempts_total", "status" => status.to_string(), "mode" => mode.to_string())
        .increment(1);
    histogram!("auth_duration_seconds").record(duration.as_secs_f64());
}

/// Resolves an [`AuthContext`] for every incoming request and inserts it
/// into the request extensions, falling back to a guest session when no
/// bearer token is present. Expects [`TenantLayer`](super::tenant::TenantLayer)
/// to have already run so `TenantId` is available in extensions.
#[instrument(skip(state, req, next), fields(request_id))]
pub async fn auth_pipeline(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();
    let tenant_id = req.extensions().get::<TenantId>().map(|t| t.0.clone());
    let token = bearer_token(&req);

    let result = match (&tenant_id, &token) {
        (Some(tenant_id), Some(token)) => resolve_authenticated(&state, tenant_id, token, &request_id)
            .await
            .map(|ctx| (ctx, None)),
        _ => resolve_guest(&state, &req, tenant_id.as_deref(), &request_id)
            .await
            .map(|(ctx, token)| (ctx, Some(token))),
    };

    let is_guest = result.as_ref().map(|(ctx, _)| ctx.is_guest).unwrap_or(token.is_none());
    record_auth_metrics(result.is_ok(), is_guest, start.elapsed()).await;

    match result {
        Ok((context, guest_session_token)) => {
            debug!(
                tenant_id = %context.tenant_id,
                subject = %context.subject,
                is_guest = context.is_guest,
                "request authenticated"
            );
            req.extensions_mut().insert(context);
            let mut response = next.run(req).await;
            if let Some(token) = guest_session_token {
                if let Ok(value) = axum::http::HeaderValue::from_str(&token) {
                    response.headers_mut().insert("X-Guest-Session", value);
                }
            }
            response
        },
        Err(err) => {
            warn!(error = %err, "request authentication failed");
            err.into_response()
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_token_strips_prefix() {
        let req = Request::builder()
            .header("Authorization", "Bearer abc.def.ghi")
            .body(Body::empty())
            .unwrap();
        assert_eq!(bearer_token(&req), Some("abc.def.ghi".to_string()));
    }

    #[test]
    fn missing_authorization_header_yields_none() {
        let req = Request::builder().body(Body::empty()).unwrap();
        assert_eq!(bearer_token(&req), None);
    }

    #[test]
    fn client_ip_reads_first_forwarded_for_entry() {
        let req = Request::builder()
            .header("X-Forwarded-For", "203.0.113.9, 10.0.0.1")
            .body(Body::empty())
            .unwrap();
        assert_eq!(client_ip(&req), "203.0.113.9");
    }

    #[test]
    fn guest_session_token_reads_header() {
        let req = Request::builder()
            .header("X-Guest-Session", "abc123")
            .body(Body::empty())
            .unwrap();
        assert_eq!(guest_session_token(&req), Some("abc123".to_string()));
    }

    #[test]
    fn guest_session_token_missing_yields_none() {
        let req = Request::builder().body(Body::empty()).unwrap();
        assert_eq!(guest_session_token(&req), None);
    }
}
