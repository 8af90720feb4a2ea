pub mod admin;
pub mod oidc;

pub use admin::ProviderAdminClient;
pub use oidc::{Jwks, JwksKey, OidcClient};
