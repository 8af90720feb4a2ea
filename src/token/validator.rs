use std::sync::Arc;
use std::time::Duration;

use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use tracing::{debug, instrument, warn};

use crate::common::config::TokenValidationStrategy;
use crate::common::error::{AppError, AppResult};
use crate::domain::auth_context::Claims;
use crate::domain::realm::Realm;
use crate::infrastructure::cache::CacheStore;
use crate::infrastructure::provider::oidc::{Jwks, OidcClient};

fn jwks_cache_key(realm_name: &str) -> String {
    format!("jwks:{realm_name}")
}

/// Validates bearer tokens against the realm that issued them. Each realm
/// can run a different strategy: pure local signature validation (fastest,
/// needs JWKS cached), provider-side introspection (authoritative, slower,
/// catches revocation), or a smart fallback between the two.
pub struct TokenValidator {
    cache: Arc<dyn CacheStore>,
    oidc: OidcClient,
    jwks_ttl: Duration,
    client_id: String,
    client_secret: String,
}

impl TokenValidator {
    pub fn new(
        cache: Arc<dyn CacheStore>,
        oidc: OidcClient,
        jwks_ttl: Duration,
        client_id: String,
        client_secret: String,
    ) -> Self {
        Self {
            cache,
            oidc,
            jwks_ttl,
            client_id,
            client_secret,
        }
    }

    #[instrument(skip(self, token))]
    pub async fn validate(
        &self,
        realm: &Realm,
        token: &str,
        strategy: TokenValidationStrategy,
    ) -> AppResult<Claims> {
        realm.ensure_active()?;

        match strategy {
            TokenValidationStrategy::Local => self.validate_local(realm, token).await,
            TokenValidationStrategy::Introspection => {
                self.validate_via_introspection(realm, token).await
            },
            TokenValidationStrategy::SmartFallback => {
                match self.validate_local(realm, token).await {
                    Ok(claims) => Ok(claims),
                    Err(err) => {
                        warn!(error = %err, "local validation failed, falling back to introspection");
                        self.validate_via_introspection(realm, token).await
                    },
                }
            },
        }
    }

    async fn get_jwks(&self, realm: &Realm) -> AppResult<Jwks> {
        let key = jwks_cache_key(&realm.provider_realm_name);

        if let Some(cached) = self.cache.get(&key).await? {
            if let Ok(jwks) = serde_json::from_slice::<Jwks>(&cached) {
                debug!(realm = %realm.provider_realm_name, "jwks cache hit");
                return Ok(jwks);
            }
        }

        let jwks = self.oidc.fetch_jwks(&realm.provider_realm_name).await?;
        let encoded = serde_json::to_vec(&jwks)?;
        self.cache.set_ex(&key, encoded, self.jwks_ttl).await?;
        Ok(jwks)
    }

    fn decoding_key(jwks: &Jwks, token: &str) -> AppResult<DecodingKey> {
        let header = decode_header(token)
            .map_err(|e| AppError::invalid_token(format!("malformed token header: {e}")))?;

        let key = match header.kid {
            Some(kid) => jwks
                .keys
                .iter()
                .find(|k| k.kid == kid)
                .ok_or_else(|| AppError::public_key_unavailable(format!("no key for kid {kid}")))?,
            None => jwks
                .keys
                .first()
                .ok_or_else(|| AppError::public_key_unavailable("jwks has no keys".to_string()))?,
        };

        DecodingKey::from_rsa_components(&key.n, &key.e)
            .map_err(|e| AppError::invalid_token(format!("invalid rsa key components: {e}")))
    }

    async fn validate_local(&self, realm: &Realm, token: &str) -> AppResult<Claims> {
        let header = decode_header(token)
            .map_err(|e| AppError::invalid_token(format!("malformed token header: {e}")))?;
        let alg_name = format!("{:?}", header.alg);
        if !realm.allows_algorithm(&alg_name) {
            return Err(AppError::invalid_token(format!(
                "algorithm {alg_name} not permitted for this realm"
            )));
        }

        let jwks = self.get_jwks(realm).await?;
        let key = Self::decoding_key(&jwks, token)?;

        let mut validation = Validation::new(header.alg);
        validation.leeway = 0;
        validation.validate_nbf = realm.verify_nbf;
        validation.validate_exp = realm.verify_exp;

        validation.validate_aud = realm.verify_audience;
        if realm.verify_audience {
            let audience = realm.expected_audience.as_deref().unwrap_or(&self.client_id);
            validation.set_audience(&[audience]);
        }

        if realm.verify_issuer {
            let issuer = realm
                .expected_issuer
                .clone()
                .unwrap_or_else(|| self.oidc.issuer_url(&realm.provider_realm_name));
            validation.set_issuer(&[issuer]);
        } else {
            validation.iss = None;
        }

        let token_data = decode::<Claims>(token, &key, &validation)?;
        Ok(token_data.claims)
    }

    async fn validate_via_introspection(&self, realm: &Realm, token: &str) -> AppResult<Claims> {
        let result = self
            .oidc
            .introspect(
                &realm.provider_realm_name,
                token,
                &self.client_id,
                &self.client_secret,
            )
            .await?;

        if !result.active {
            return Err(AppError::token_revoked());
        }

        // Introspection confirmed validity server-side; decode the claims
        // without re-checking the signature locally.
        let mut validation = Validation::new(Algorithm::RS256);
        validation.insecure_disable_signature_validation();
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();

        let token_data =
            decode::<Claims>(token, &DecodingKey::from_secret(&[]), &validation)?;
        Ok(token_data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::realm::RealmRegistration;
    use crate::infrastructure::cache::InMemoryStore;

    fn test_realm() -> Realm {
        Realm::new(RealmRegistration {
            tenant_id: "tenant-a".to_string(),
            display_name: "Acme".to_string(),
            provider_realm_name: "tenant-a-realm".to_string(),
            provider_server_url: "https://idp.example.com".to_string(),
            issuer_url: "https://idp.example.com/realms/tenant-a-realm".to_string(),
            client_id: "client".to_string(),
            client_secret_ref: None,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn disabled_realm_is_rejected_before_any_network_call() {
        let mut realm = test_realm();
        realm.disable();

        let cache: Arc<dyn CacheStore> = Arc::new(InMemoryStore::new());
        let oidc = OidcClient::new(
            "http://localhost:8080".to_string(),
            Duration::from_secs(5),
            8,
        )
        .unwrap();
        let validator = TokenValidator::new(
            cache,
            oidc,
            Duration::from_secs(3600),
            "client".to_string(),
            "secret".to_string(),
        );

        let result = validator
            .validate(&realm, "whatever", TokenValidationStrategy::Local)
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn disallowed_algorithm_is_rejected_before_jwks_fetch() {
        use jsonwebtoken::{encode, EncodingKey, Header};

        let realm = test_realm();
        assert!(!realm.allows_algorithm("HS256"));

        let claims = Claims {
            sub: "user-1".to_string(),
            exp: 9_999_999_999,
            iat: 0,
            auth_time: None,
            jti: None,
            iss: realm.issuer_url.clone(),
            aud: None,
            typ: None,
            azp: None,
            session_state: None,
            sid: None,
            acr: None,
            realm_access: None,
            resource_access: None,
            scope: None,
            email_verified: None,
            preferred_username: None,
            given_name: None,
            family_name: None,
            email: None,
        };
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(b"irrelevant"),
        )
        .unwrap();

        let cache: Arc<dyn CacheStore> = Arc::new(InMemoryStore::new());
        let oidc = OidcClient::new(
            "http://localhost:8080".to_string(),
            Duration::from_secs(5),
            8,
        )
        .unwrap();
        let validator = TokenValidator::new(
            cache,
            oidc,
            Duration::from_secs(3600),
            "client".to_string(),
            "secret".to_string(),
        );

        let result = validator
            .validate(&realm, &token, TokenValidationStrategy::Local)
            .await;
        let err = result.unwrap_err();
        assert_eq!(err.kind.code(), "invalid_token");
    }
}
