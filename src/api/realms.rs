use axum::{extract::State, routing::post, Extension, Json, Router};
use serde::{Deserialize, Serialize};
use tracing::{instrument, warn};

use crate::common::error::AppResult;
use crate::domain::auth_context::AuthContext;
use crate::domain::realm::{Realm, RealmRegistration};
use crate::infrastructure::state::AppState;

pub fn realm_routes() -> Router<AppState> {
    Router::new()
        .route("/realms", post(create_realm).get(list_realms))
        .route("/realms/{tenant_id}/disable", post(disable_realm))
}

#[derive(Debug, Deserialize)]
pub struct CreateRealmRequest {
    pub tenant_id: String,
    pub display_name: String,
    pub provider_realm_name: String,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub redirect_uris: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct RealmResponse {
    pub tenant_id: String,
    pub display_name: String,
    pub provider_realm_name: String,
    pub provider_server_url: String,
    pub issuer_url: String,
    pub client_id: String,
    pub signing_algorithms: Vec<String>,
    pub expected_audience: Option<String>,
    pub expected_issuer: Option<String>,
    pub verify_audience: bool,
    pub verify_issuer: bool,
    pub public_key_ttl_secs: u64,
    pub is_active: bool,
}

impl From<Realm> for RealmResponse {
    fn from(realm: Realm) -> Self {
        Self {
            tenant_id: realm.tenant_id,
            display_name: realm.display_name,
            provider_realm_name: realm.provider_realm_name,
            provider_server_url: realm.provider_server_url,
            issuer_url: realm.issuer_url,
            client_id: realm.client_id,
            signing_algorithms: realm.signing_algorithms,
            expected_audience: realm.expected_audience,
            expected_issuer: realm.expected_issuer,
            verify_audience: realm.verify_audience,
            verify_issuer: realm.verify_issuer,
            public_key_ttl_secs: realm.public_key_ttl_secs,
            is_active: realm.is_active,
        }
    }
}

/// Onboards a tenant: creates the backing realm and its default client at
/// the identity provider (idempotent if the realm already exists), then
/// registers the tenant-to-realm mapping locally. If the local insert fails
/// after the provider realm was created, the provider realm is torn back
/// down rather than left as an orphan a client could still authenticate
/// against.
#[instrument(skip(state, body, auth))]
async fn create_realm(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(body): Json<CreateRealmRequest>,
) -> AppResult<Json<RealmResponse>> {
    auth.require_permission("realms:create")?;

    let realm_created = if !state
        .provider_admin
        .realm_exists(&body.provider_realm_name)
        .await?
    {
        state
            .provider_admin
            .create_realm(&body.provider_realm_name)
            .await?;
        true
    } else {
        false
    };

    let client_id = format!("{}-client", body.tenant_id);
    state
        .provider_admin
        .create_default_client(
            &body.provider_realm_name,
            &client_id,
            body.client_secret.as_deref(),
            body.redirect_uris.clone(),
        )
        .await?;

    let issuer_url = state.oidc.issuer_url(&body.provider_realm_name);
    let registration = RealmRegistration {
        tenant_id: body.tenant_id,
        display_name: body.display_name,
        provider_realm_name: body.provider_realm_name.clone(),
        provider_server_url: state.config.provider.url.clone(),
        issuer_url,
        client_id,
        client_secret_ref: body.client_secret,
    };

    match state.realm_registry.create_tenant_realm(registration).await {
        Ok(realm) => Ok(Json(realm.into())),
        Err(err) => {
            if realm_created {
                if let Err(rollback_err) =
                    state.provider_admin.delete_realm(&body.provider_realm_name).await
                {
                    warn!(
                        error = %rollback_err,
                        realm = %body.provider_realm_name,
                        "failed to roll back provider realm after local registration failure"
                    );
                }
            }
            Err(err)
        },
    }
}

#[instrument(skip(state, auth))]
async fn list_realms(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> AppResult<Json<Vec<RealmResponse>>> {
    auth.require_permission("realms:read")?;

    let realms = state.realm_registry.list_realms().await?;
    Ok(Json(realms.into_iter().map(RealmResponse::from).collect()))
}

#[instrument(skip(state, auth))]
async fn disable_realm(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    axum::extract::Path(tenant_id): axum::extract::Path<String>,
) -> AppResult<()> {
    auth.require_permission("realms:disable")?;

    let realm = state.realm_registry.get_realm_by_tenant(&tenant_id).await?;
    state
        .provider_admin
        .disable_realm(&realm.provider_realm_name)
        .await?;
    state.realm_registry.disable_realm(&tenant_id).await?;
    Ok(())
}
