use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::common::error::{AppError, AppResult};

/// JSON Web Key Set as returned by a provider's `/certs` endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Jwks {
    pub keys: Vec<JwksKey>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwksKey {
    pub kid: String,
    pub kty: String,
    pub n: String,
    pub e: String,
}

/// Outcome of calling the provider's token introspection endpoint
/// (RFC 7662). Used by the `Introspection` and `SmartFallback` validation
/// strategies when local signature validation is unavailable or distrusted.
#[derive(Debug, Clone, Deserialize)]
pub struct IntrospectionResult {
    pub active: bool,
    #[serde(default)]
    pub sub: Option<String>,
    #[serde(default)]
    pub exp: Option<i64>,
    #[serde(default)]
    pub scope: Option<String>,
}

/// HTTP client for a provider's OIDC surface (JWKS, introspection). One
/// instance per realm base URL; realm-specific paths are built per call so
/// a single client can serve every realm hosted by the same provider.
#[derive(Clone)]
pub struct OidcClient {
    http: reqwest::Client,
    provider_url: String,
}

impl OidcClient {
    pub fn new(provider_url: String, timeout: Duration, max_connections: usize) -> AppResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(max_connections)
            .build()
            .map_err(|e| AppError::configuration(format!("failed to build http client: {e}")))?;
        Ok(Self { http, provider_url })
    }

    pub fn jwks_url(&self, realm_name: &str) -> String {
        format!(
            "{}/realms/{}/protocol/openid-connect/certs",
            self.provider_url, realm_name
        )
    }

    pub fn issuer_url(&self, realm_name: &str) -> String {
        format!("{}/realms/{}", self.provider_url, realm_name)
    }

    pub async fn fetch_jwks(&self, realm_name: &str) -> AppResult<Jwks> {
        debug!(realm = realm_name, "fetching jwks from provider");
        let jwks: Jwks = self
            .http
            .get(self.jwks_url(realm_name))
            .send()
            .await
            .map_err(|e| AppError::public_key_unavailable(e.to_string()))?
            .json()
            .await
            .map_err(|e| AppError::public_key_unavailable(e.to_string()))?;
        Ok(jwks)
    }

    pub async fn introspect(
        &self,
        realm_name: &str,
        token: &str,
        client_id: &str,
        client_secret: &str,
    ) -> AppResult<IntrospectionResult> {
        let url = format!(
            "{}/realms/{}/protocol/openid-connect/token/introspect",
            self.provider_url, realm_name
        );

        let result: IntrospectionResult = self
            .http
            .post(url)
            .basic_auth(client_id, Some(client_secret))
            .form(&[("token", token)])
            .send()
            .await
            .map_err(|e| AppError::external(e.to_string()))?
            .json()
            .await
            .map_err(|e| AppError::external(e.to_string()))?;

        Ok(result)
    }
}
