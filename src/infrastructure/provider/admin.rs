use keycloak::{
    types::{
        ClientRepresentation, CredentialRepresentation, ExecuteActionsEmail, GetUsersParams,
        RealmRepresentation, UserRepresentation,
    },
    KeycloakAdmin, KeycloakAdminToken, KeycloakError,
};
use tracing::instrument;

use crate::common::error::{AppError, AppResult};

impl From<KeycloakError> for AppError {
    fn from(err: KeycloakError) -> Self {
        AppError::external(err.to_string())
    }
}

/// A user row as returned from the provider's admin API, trimmed to the
/// fields this system actually consumes.
#[derive(Debug, Clone)]
pub struct ProviderUser {
    pub id: String,
    pub username: String,
    pub email: Option<String>,
    pub enabled: bool,
}

impl From<UserRepresentation> for ProviderUser {
    fn from(u: UserRepresentation) -> Self {
        Self {
            id: u.id.unwrap_or_default(),
            username: u.username.unwrap_or_default(),
            email: u.email,
            enabled: u.enabled.unwrap_or(true),
        }
    }
}

/// Thin wrapper over the provider's admin REST API for realm, client, and
/// user lifecycle operations. A fresh admin token is acquired per call rather
/// than cached, since realm admin operations are rare (tenant onboarding,
/// user provisioning) compared to the request-path token validation the rest
/// of the system does thousands of times a second.
pub struct ProviderAdminClient {
    base_url: String,
    admin_username: String,
    admin_password: String,
    admin_client_id: String,
    http: reqwest::Client,
}

impl ProviderAdminClient {
    pub fn new(
        base_url: String,
        admin_username: String,
        admin_password: String,
        admin_client_id: String,
    ) -> Self {
        Self {
            base_url,
            admin_username,
            admin_password,
            admin_client_id,
            http: reqwest::Client::new(),
        }
    }

    async fn admin(&self) -> AppResult<KeycloakAdmin> {
        let token = KeycloakAdminToken::acquire_custom_realm(
            &self.base_url,
            &self.admin_username,
            &self.admin_password,
            &self.admin_client_id,
            "password",
            "master",
            &self.http,
        )
        .await?;
        Ok(KeycloakAdmin::new(&self.base_url, token, self.http.clone()))
    }

    /// Creates a realm with the defaults a newly onboarded tenant gets:
    /// email-based login, no duplicate emails, username changes disabled
    /// (identity comes from the provider, not self-service rename), brute
    /// force protection on, and a baseline password policy.
    #[instrument(skip(self))]
    pub async fn create_realm(&self, realm_name: &str) -> AppResult<()> {
        let admin = self.admin().await?;
        let representation = RealmRepresentation {
            realm: Some(realm_name.to_string()),
            enabled: Some(true),
            login_with_email_allowed: Some(true),
            duplicate_emails_allowed: Some(false),
            reset_password_allowed: Some(true),
            edit_username_allowed: Some(false),
            brute_force_protected: Some(true),
            password_policy: Some("length(12) and notUsername".to_string()),
            default_locale: Some("en".to_string()),
            ..Default::default()
        };
        admin.post(representation).await?;
        Ok(())
    }

    /// Best-effort rollback for a realm created by [`create_realm`] when a
    /// later step (persisting the local tenant-to-realm mapping) fails.
    #[instrument(skip(self))]
    pub async fn delete_realm(&self, realm_name: &str) -> AppResult<()> {
        let admin = self.admin().await?;
        admin.realm_delete(realm_name).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn disable_realm(&self, realm_name: &str) -> AppResult<()> {
        let admin = self.admin().await?;
        let representation = RealmRepresentation {
            realm: Some(realm_name.to_string()),
            enabled: Some(false),
            ..Default::default()
        };
        admin.realm_put(realm_name, representation).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn realm_exists(&self, realm_name: &str) -> AppResult<bool> {
        let admin = self.admin().await?;
        match admin.realm_get(realm_name).await {
            Ok(_) => Ok(true),
            Err(KeycloakError::HttpFailure { status: 404, .. }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Registers the default client a tenant authenticates through.
    /// Confidential (with the given secret) when `client_secret` is set,
    /// public otherwise — a public client cannot hold a secret since it runs
    /// somewhere the secret can't stay hidden (a browser, a mobile app).
    #[instrument(skip(self, client_secret))]
    pub async fn create_default_client(
        &self,
        realm_name: &str,
        client_id: &str,
        client_secret: Option<&str>,
        redirect_uris: Vec<String>,
    ) -> AppResult<()> {
        let admin = self.admin().await?;
        let representation = ClientRepresentation {
            client_id: Some(client_id.to_string()),
            enabled: Some(true),
            public_client: Some(client_secret.is_none()),
            secret: client_secret.map(|s| s.to_string()),
            redirect_uris: Some(redirect_uris),
            standard_flow_enabled: Some(true),
            direct_access_grants_enabled: Some(true),
            service_accounts_enabled: Some(client_secret.is_some()),
            ..Default::default()
        };
        admin.realm_clients_post(realm_name, representation).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn create_user(
        &self,
        realm_name: &str,
        username: &str,
        email: Option<&str>,
    ) -> AppResult<()> {
        let admin = self.admin().await?;
        let representation = UserRepresentation {
            username: Some(username.to_string()),
            email: email.map(|e| e.to_string()),
            enabled: Some(true),
            ..Default::default()
        };
        admin.realm_users_post(realm_name, representation).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn get_user_by_username(
        &self,
        realm_name: &str,
        username: &str,
    ) -> AppResult<Option<ProviderUser>> {
        let admin = self.admin().await?;
        let params = GetUsersParams {
            username: Some(username.to_string()),
            exact: Some(true),
            ..Default::default()
        };
        let users = admin.realm_users_get(realm_name, params).await?;
        Ok(users.into_iter().next().map(ProviderUser::from))
    }

    #[instrument(skip(self))]
    pub async fn get_user_by_email(
        &self,
        realm_name: &str,
        email: &str,
    ) -> AppResult<Option<ProviderUser>> {
        let admin = self.admin().await?;
        let params = GetUsersParams {
            email: Some(email.to_string()),
            exact: Some(true),
            ..Default::default()
        };
        let users = admin.realm_users_get(realm_name, params).await?;
        Ok(users.into_iter().next().map(ProviderUser::from))
    }

    #[instrument(skip(self))]
    pub async fn update_user(
        &self,
        realm_name: &str,
        user_id: &str,
        email: Option<&str>,
        enabled: Option<bool>,
    ) -> AppResult<()> {
        let admin = self.admin().await?;
        let representation = UserRepresentation {
            email: email.map(|e| e.to_string()),
            enabled,
            ..Default::default()
        };
        admin
            .realm_users_with_user_id_put(realm_name, user_id, representation)
            .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn delete_user(&self, realm_name: &str, user_id: &str) -> AppResult<()> {
        let admin = self.admin().await?;
        admin
            .realm_users_with_user_id_delete(realm_name, user_id)
            .await?;
        Ok(())
    }

    #[instrument(skip(self, password))]
    pub async fn set_user_password(
        &self,
        realm_name: &str,
        user_id: &str,
        password: &str,
        temporary: bool,
    ) -> AppResult<()> {
        let admin = self.admin().await?;
        let credential = CredentialRepresentation {
            type_: Some("password".to_string()),
            value: Some(password.to_string()),
            temporary: Some(temporary),
            ..Default::default()
        };
        admin
            .realm_users_with_user_id_reset_password_put(realm_name, user_id, credential)
            .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn send_verify_email(&self, realm_name: &str, user_id: &str) -> AppResult<()> {
        let admin = self.admin().await?;
        admin
            .realm_users_with_user_id_send_verify_email_put(realm_name, user_id)
            .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn send_required_actions_email(
        &self,
        realm_name: &str,
        user_id: &str,
        actions: Vec<String>,
    ) -> AppResult<()> {
        let admin = self.admin().await?;
        let body = ExecuteActionsEmail {
            actions: Some(actions),
            ..Default::default()
        };
        admin
            .realm_users_with_user_id_execute_actions_email_put(realm_name, user_id, body)
            .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn remove_totp(&self, realm_name: &str, user_id: &str) -> AppResult<()> {
        let admin = self.admin().await?;
        admin
            .realm_users_with_user_id_remove_totp_put(realm_name, user_id)
            .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn delete_credential(
        &self,
        realm_name: &str,
        user_id: &str,
        credential_id: &str,
    ) -> AppResult<()> {
        let admin = self.admin().await?;
        admin
            .realm_users_with_user_id_credentials_with_credential_id_delete(
                realm_name,
                user_id,
                credential_id,
            )
            .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn logout_all_sessions(&self, realm_name: &str, user_id: &str) -> AppResult<()> {
        let admin = self.admin().await?;
        admin
            .realm_users_with_user_id_logout_put(realm_name, user_id)
            .await?;
        Ok(())
    }
}
