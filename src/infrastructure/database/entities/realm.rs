use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "realms")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub tenant_id: String,
    pub display_name: String,
    pub provider_realm_name: String,
    pub provider_server_url: String,
    pub issuer_url: String,
    pub client_id: String,
    pub client_secret_ref: Option<String>,
    /// Comma-separated algorithm list, e.g. `"RS256"` or `"RS256,ES256"`.
    pub signing_algorithms: String,
    pub expected_audience: Option<String>,
    pub expected_issuer: Option<String>,
    pub verify_signature: bool,
    pub verify_exp: bool,
    pub verify_nbf: bool,
    pub verify_iat: bool,
    pub verify_audience: bool,
    pub verify_issuer: bool,
    pub public_key_ttl_secs: i64,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
