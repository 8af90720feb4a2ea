use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Redirect, Response},
    Json,
};
use headers::{Cookie, HeaderMapExt};
use oauth2::{
    basic::BasicClient, AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken,
    PkceCodeChallenge, PkceCodeVerifier, RedirectUrl, Scope, TokenResponse, TokenUrl,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::common::error::AppError;
use crate::common::middleware::tenant::TenantId;
use crate::infrastructure::state::AppState;

const CSRF_COOKIE_NAME: &str = "csrf_state";
const PKCE_VERIFIER_COOKIE_NAME: &str = "pkce_verifier";
const TENANT_COOKIE_NAME: &str = "auth_tenant";

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    auth_url: String,
}

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    code: String,
    state: String,
}

#[derive(Debug, Serialize)]
pub struct TokenInfo {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: u64,
    token_type: String,
}

async fn oauth_client_for_tenant(state: &AppState, tenant_id: &str) -> Result<BasicClient, AppError> {
    let realm = state.realm_registry.find_by_tenant(tenant_id).await?;
    realm.ensure_active()?;

    let client = BasicClient::new(
        ClientId::new(state.config.provider.client_id.clone()),
        Some(ClientSecret::new(state.config.provider.client_secret.clone())),
        AuthUrl::new(format!(
            "{}/protocol/openid-connect/auth",
            state.oidc.issuer_url(&realm.provider_realm_name)
        ))?,
        Some(TokenUrl::new(format!(
            "{}/protocol/openid-connect/token",
            state.oidc.issuer_url(&realm.provider_realm_name)
        ))?),
    )
    .set_redirect_uri(RedirectUrl::new(format!(
        "{}/auth/callback",
        state.config.provider.url
    ))?);

    Ok(client)
}

#[instrument(skip(state))]
pub async fn login(
    State(state): State<AppState>,
    req: axum::extract::Request,
) -> Result<impl IntoResponse, AppError> {
    let tenant_id = req
        .extensions()
        .get::<TenantId>()
        .map(|t| t.0.clone())
        .ok_or_else(AppError::missing_tenant)?;

    let client = oauth_client_for_tenant(&state, &tenant_id).await?;

    let (pkce_challenge, pkce_verifier) = PkceCodeChallenge::new_random_sha256();

    let (auth_url, csrf_token) = client
        .authorize_url(CsrfToken::new_random)
        .add_scope(Scope::new("openid".to_string()))
        .add_scope(Scope::new("profile".to_string()))
        .add_scope(Scope::new("email".to_string()))
        .set_pkce_challenge(pkce_challenge)
        .url();

    debug!(tenant_id = %tenant_id, "issued login redirect");

    Ok((
        StatusCode::OK,
        [
            (
                header::SET_COOKIE,
                format!(
                    "{}={}; HttpOnly; Secure; SameSite=Lax",
                    CSRF_COOKIE_NAME,
                    csrf_token.secret()
                ),
            ),
            (
                header::SET_COOKIE,
                format!(
                    "{}={}; HttpOnly; Secure; SameSite=Lax",
                    PKCE_VERIFIER_COOKIE_NAME,
                    pkce_verifier.secret()
                ),
            ),
            (
                header::SET_COOKIE,
                format!("{}={}; HttpOnly; Secure; SameSite=Lax", TENANT_COOKIE_NAME, tenant_id),
            ),
        ],
        Json(LoginResponse {
            auth_url: auth_url.to_string(),
        }),
    ))
}

#[instrument(skip(state, headers))]
pub async fn oauth_callback(
    State(state): State<AppState>,
    query: axum::extract::Query<CallbackQuery>,
    headers: axum::http::HeaderMap,
) -> Result<Response, AppError> {
    let cookies = headers
        .typed_get::<Cookie>()
        .ok_or_else(|| AppError::invalid_credentials_with("no cookies found"))?;

    let stored_csrf_token = cookies
        .get(CSRF_COOKIE_NAME)
        .ok_or_else(|| AppError::invalid_credentials_with("missing csrf token"))?;

    if stored_csrf_token != query.state {
        return Err(AppError::invalid_credentials_with("csrf token mismatch"));
    }

    let pkce_verifier = cookies
        .get(PKCE_VERIFIER_COOKIE_NAME)
        .ok_or_else(|| AppError::invalid_credentials_with("missing pkce verifier"))?;

    let tenant_id = cookies
        .get(TENANT_COOKIE_NAME)
        .ok_or_else(AppError::missing_tenant)?
        .to_string();

    let client = oauth_client_for_tenant(&state, &tenant_id).await?;

    let token_result = client
        .exchange_code(AuthorizationCode::new(query.code.clone()))
        .set_pkce_verifier(PkceCodeVerifier::new(pkce_verifier.to_string()))
        .request_async(oauth2::reqwest::async_http_client)
        .await
        .map_err(|e| AppError::invalid_credentials_with(e.to_string()))?;

    let token_info = TokenInfo {
        access_token: token_result.access_token().secret().clone(),
        refresh_token: token_result.refresh_token().map(|t| t.secret().clone()),
        expires_in: token_result.expires_in().unwrap_or_default().as_secs(),
        token_type: token_result.token_type().as_ref().to_string(),
    };

    let response = Response::builder()
        .status(StatusCode::OK)
        .header(
            header::SET_COOKIE,
            format!("{}=; HttpOnly; Secure; SameSite=Lax; Max-Age=0", CSRF_COOKIE_NAME),
        )
        .header(
            header::SET_COOKIE,
            format!(
                "{}=; HttpOnly; Secure; SameSite=Lax; Max-Age=0",
                PKCE_VERIFIER_COOKIE_NAME
            ),
        )
        .header(
            header::SET_COOKIE,
            format!("{}=; HttpOnly; Secure; SameSite=Lax; Max-Age=0", TENANT_COOKIE_NAME),
        )
        .header(header::CONTENT_TYPE, "application/json")
        .body(
            serde_json::to_string(&token_info)
                .map_err(|e| AppError::serialization(e.to_string()))?
                .into(),
        )
        .map_err(|e| AppError::internal(e.to_string()))?;

    Ok(response)
}

#[instrument(skip(state))]
pub async fn logout(
    State(state): State<AppState>,
    req: axum::extract::Request,
) -> Result<impl IntoResponse, AppError> {
    let tenant_id = req
        .extensions()
        .get::<TenantId>()
        .map(|t| t.0.clone())
        .ok_or_else(AppError::missing_tenant)?;

    let realm = state.realm_registry.find_by_tenant(&tenant_id).await?;
    let logout_url = format!(
        "{}/protocol/openid-connect/logout",
        state.oidc.issuer_url(&realm.provider_realm_name)
    );

    Ok(Redirect::to(&logout_url))
}
