use config::{Config, ConfigError, Environment, File};
use once_cell::sync::Lazy;
use sea_orm::ConnectOptions;
use serde::{Deserialize, Serialize};
use std::{env, fs, path::Path};
use tracing::Level;

#[cfg(test)]
use std::collections::HashMap;
#[cfg(test)]
use std::sync::Mutex;

// Mock file system for testing
#[cfg(test)]
#[derive(Default)]
struct MockFs {
    files: HashMap<String, String>,
}

#[cfg(test)]
impl MockFs {
    fn new() -> Self {
        Self {
            files: HashMap::new(),
        }
    }

    fn write(&mut self, path: &str, content: &str) {
        self.files.insert(path.to_string(), content.to_string());
    }

    fn read(&self, path: &str) -> Option<String> {
        self.files.get(path).cloned()
    }

    fn exists(&self, path: &str) -> bool {
        self.files.contains_key(path)
    }

    fn clear(&mut self) {
        self.files.clear();
    }
}

#[cfg(test)]
static MOCK_FS: Lazy<Mutex<MockFs>> = Lazy::new(|| Mutex::new(MockFs::new()));

#[derive(Debug, Deserialize, Clone, Serialize)]
pub struct ServerSettings {
    pub backend_port: u16,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
pub struct LoggingSettings {
    pub level: String,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
}

/// Which validation path the Token Validator takes by default for a realm
/// that does not override it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenValidationStrategy {
    /// Verify the JWT signature locally against cached JWKS.
    Local,
    /// Call the provider's introspection endpoint for every request.
    Introspection,
    /// Try local validation first, fall back to introspection on JWKS miss.
    SmartFallback,
}

impl Default for TokenValidationStrategy {
    fn default() -> Self {
        TokenValidationStrategy::SmartFallback
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[allow(dead_code)]
pub struct AppConfig {
    pub server: ServerSettings,
    pub database: DatabaseSettings,
    pub redis: RedisSettings,
    pub logging: LoggingSettings,
    pub provider: ProviderConfig,
    pub cache_ttl: CacheTtlSettings,
    pub token: TokenValidationSettings,
    pub guest: GuestSessionSettings,
    pub http: HttpClientSettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                backend_port: 3333,
            },
            database: DatabaseSettings {
                host: "localhost".to_string(),
                port: 5432,
                name: "tenant_auth".to_string(),
                user: "tenant_auth".to_string(),
                password: "tenant_auth".to_string(),
                max_connections: default_max_connections(),
                min_connections: default_min_connections(),
                connect_timeout: default_connect_timeout(),
                acquire_timeout: default_acquire_timeout(),
                idle_timeout: default_idle_timeout(),
                max_lifetime: default_max_lifetime(),
            },
            redis: RedisSettings {
                url: "redis://localhost:6379".to_string(),
            },
            logging: LoggingSettings {
                level: "debug".to_string(),
            },
            provider: ProviderConfig::default(),
            cache_ttl: CacheTtlSettings::default(),
            token: TokenValidationSettings::default(),
            guest: GuestSessionSettings::default(),
            http: HttpClientSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[allow(dead_code)]
pub struct DatabaseSettings {
    pub host: String,
    pub port: u16,
    pub name: String,
    pub user: String,
    pub password: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout: u64,
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout: u64,
    #[serde(default = "default_max_lifetime")]
    pub max_lifetime: u64,
}

impl DatabaseSettings {
    pub fn to_connect_options(&self) -> ConnectOptions {
        let mut opt = ConnectOptions::new(format!(
            "postgres://{}:{}@{}:{}/{}",
            self.user, self.password, self.host, self.port, self.name
        ));

        opt.max_connections(self.max_connections)
            .min_connections(self.min_connections)
            .connect_timeout(std::time::Duration::from_secs(self.connect_timeout))
            .acquire_timeout(std::time::Duration::from_secs(self.acquire_timeout))
            .idle_timeout(std::time::Duration::from_secs(self.idle_timeout))
            .max_lifetime(std::time::Duration::from_secs(self.max_lifetime));

        opt
    }
}

fn default_max_connections() -> u32 {
    100
}

fn default_min_connections() -> u32 {
    5
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_acquire_timeout() -> u64 {
    8
}

fn default_idle_timeout() -> u64 {
    300
}

fn default_max_lifetime() -> u64 {
    1800
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[allow(dead_code)]
pub struct RedisSettings {
    pub url: String,
}

/// Connection details for the upstream identity provider (Keycloak-shaped
/// OIDC + admin REST API). One set of credentials backs the default realm;
/// per-tenant realms registered at runtime reuse this provider base URL.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[allow(dead_code)]
pub struct ProviderConfig {
    pub url: String,
    pub realm: String,
    pub client_id: String,
    pub client_secret: String,
    pub admin_username: String,
    pub admin_password: String,
    #[serde(default = "default_admin_client_id")]
    pub admin_client_id: String,
    #[serde(default = "default_verify_token")]
    pub verify_token: bool,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8080".to_string(),
            realm: "master".to_string(),
            client_id: "tenant-auth-core".to_string(),
            client_secret: "dev-secret".to_string(),
            admin_username: "admin".to_string(),
            admin_password: "admin".to_string(),
            admin_client_id: default_admin_client_id(),
            verify_token: true,
        }
    }
}

fn default_verify_token() -> bool {
    true
}

fn default_admin_client_id() -> String {
    "admin-cli".to_string()
}

/// TTLs for each cache layer the system maintains, in seconds. Defaults
/// mirror the layered cache used by the reference deployment: realms and
/// roles change rarely and cache long; per-user snapshots churn more and
/// cache short.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[allow(dead_code)]
pub struct CacheTtlSettings {
    #[serde(default = "default_realm_ttl")]
    pub realm_secs: u64,
    #[serde(default = "default_public_key_ttl")]
    pub public_key_secs: u64,
    #[serde(default = "default_permission_ttl")]
    pub permission_secs: u64,
    #[serde(default = "default_roles_ttl")]
    pub roles_secs: u64,
    #[serde(default = "default_user_ttl")]
    pub user_secs: u64,
}

impl Default for CacheTtlSettings {
    fn default() -> Self {
        Self {
            realm_secs: default_realm_ttl(),
            public_key_secs: default_public_key_ttl(),
            permission_secs: default_permission_ttl(),
            roles_secs: default_roles_ttl(),
            user_secs: default_user_ttl(),
        }
    }
}

fn default_realm_ttl() -> u64 {
    3600
}

fn default_public_key_ttl() -> u64 {
    3600
}

fn default_permission_ttl() -> u64 {
    1800
}

fn default_roles_ttl() -> u64 {
    3600
}

fn default_user_ttl() -> u64 {
    600
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[allow(dead_code)]
pub struct TokenValidationSettings {
    #[serde(default)]
    pub default_strategy: TokenValidationStrategy,
    /// Permit unsigned/plaintext introspection responses when the provider
    /// cannot be reached over TLS. Off unless a deployment explicitly opts in.
    #[serde(default)]
    pub allow_plaintext_fallback: bool,
}

impl Default for TokenValidationSettings {
    fn default() -> Self {
        Self {
            default_strategy: TokenValidationStrategy::default(),
            allow_plaintext_fallback: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[allow(dead_code)]
pub struct GuestSessionSettings {
    #[serde(default = "default_guest_session_ttl")]
    pub session_ttl_secs: u64,
    /// Cap on requests from one IP+user-agent fingerprint per rate limit
    /// window, regardless of how many session tokens it cycles through.
    #[serde(default = "default_guest_ip_rate_limit_max")]
    pub ip_rate_limit_max_requests: u32,
    /// Cap on requests against one session token per rate limit window.
    #[serde(default = "default_guest_session_rate_limit_max")]
    pub session_rate_limit_max_requests: u32,
    #[serde(default = "default_guest_rate_limit_window")]
    pub rate_limit_window_secs: u64,
    /// If the cache is unreachable, allow the request through rather than
    /// blocking all guest traffic on a cache outage.
    #[serde(default = "default_guest_fail_open")]
    pub fail_open: bool,
}

impl Default for GuestSessionSettings {
    fn default() -> Self {
        Self {
            session_ttl_secs: default_guest_session_ttl(),
            ip_rate_limit_max_requests: default_guest_ip_rate_limit_max(),
            session_rate_limit_max_requests: default_guest_session_rate_limit_max(),
            rate_limit_window_secs: default_guest_rate_limit_window(),
            fail_open: default_guest_fail_open(),
        }
    }
}

fn default_guest_session_ttl() -> u64 {
    3600
}

fn default_guest_ip_rate_limit_max() -> u32 {
    60
}

fn default_guest_session_rate_limit_max() -> u32 {
    30
}

fn default_guest_rate_limit_window() -> u64 {
    60
}

fn default_guest_fail_open() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[allow(dead_code)]
pub struct HttpClientSettings {
    #[serde(default = "default_http_max_connections")]
    pub max_connections: usize,
    #[serde(default = "default_http_timeout")]
    pub timeout_secs: u64,
}

impl Default for HttpClientSettings {
    fn default() -> Self {
        Self {
            max_connections: default_http_max_connections(),
            timeout_secs: default_http_timeout(),
        }
    }
}

fn default_http_max_connections() -> usize {
    32
}

fn default_http_timeout() -> u64 {
    10
}

impl Settings {
    #[allow(clippy::disallowed_methods)]
    fn get_default_settings(run_mode: &str) -> Self {
        match run_mode {
            "dev" => Settings {
                server: ServerSettings { backend_port: 3333 },
                logging: LoggingSettings {
                    level: String::from("debug"),
                },
            },
            "prod" => Settings {
                server: ServerSettings { backend_port: 8080 },
                logging: LoggingSettings {
                    level: String::from("info"),
                },
            },
            "test" => Settings {
                server: ServerSettings { backend_port: 3333 },
                logging: LoggingSettings {
                    level: String::from("debug"),
                },
            },
            _ => {
                tracing::event!(
                    Level::WARN,
                    "Unknown run mode: {}, falling back to dev defaults",
                    run_mode
                );
                Settings::get_default_settings("dev")
            },
        }
    }

    #[allow(clippy::disallowed_methods)]
    fn ensure_config_file(run_mode: &str) -> Option<String> {
        let config_file = format!("config/config.{}.toml", run_mode);
        let template_file = format!("config/config.{}.toml.template", run_mode);

        if !Settings::file_exists(&config_file) {
            match Settings::read_file(&template_file) {
                Some(content) => {
                    if let Err(e) = Settings::write_file(&config_file, &content) {
                        tracing::event!(
                            Level::WARN,
                            "Failed to create {} from template: {}",
                            config_file,
                            e
                        );
                        return None;
                    }
                    tracing::event!(Level::INFO, "Created {} from template", config_file);
                },
                None => {
                    tracing::event!(Level::WARN, "Failed to read template {}", template_file,);
                    return None;
                },
            }
        }

        Some(config_file)
    }

    #[allow(clippy::disallowed_methods)]
    fn new() -> Result<Self, ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "dev".into());
        let default_settings = Settings::get_default_settings(&run_mode);

        let mut builder = Config::builder();

        builder = builder
            .set_default("server.backend_port", default_settings.server.backend_port)?
            .set_default("logging.level", default_settings.logging.level.as_str())?;

        if let Some(config_file) = Settings::ensure_config_file(&run_mode) {
            if Settings::file_exists(&config_file) {
                builder = builder.add_source(File::with_name(&config_file).required(false));
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("APP")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }

    #[cfg(not(test))]
    fn file_exists(path: &str) -> bool {
        Path::new(path).exists()
    }

    #[cfg(not(test))]
    fn read_file(path: &str) -> Option<String> {
        fs::read_to_string(path).ok()
    }

    #[cfg(not(test))]
    fn write_file(path: &str, content: &str) -> Result<(), std::io::Error> {
        if let Some(parent) = Path::new(path).parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, content)
    }
}

static SETTINGS: Lazy<Settings> = Lazy::new(|| {
    Settings::new().unwrap_or_else(|err| {
        eprintln!("Failed to load settings: {}", err);
        std::process::exit(1);
    })
});

#[allow(dead_code)]
pub fn get_settings() -> &'static Settings {
    &SETTINGS
}

pub fn get_backend_port() -> u16 {
    SETTINGS.server.backend_port
}

pub fn get_log_level() -> &'static str {
    &SETTINGS.logging.level
}

static APP_CONFIG: Lazy<AppConfig> = Lazy::new(|| {
    AppConfig::new().unwrap_or_else(|err| {
        eprintln!("Failed to load app config: {}", err);
        std::process::exit(1);
    })
});

impl AppConfig {
    pub fn new() -> Result<Self, ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "dev".into());
        let mut builder = Config::builder();

        let d = Self::default();
        builder = builder
            .set_default("server.backend_port", d.server.backend_port)?
            .set_default("database.host", d.database.host.as_str())?
            .set_default("database.port", d.database.port)?
            .set_default("database.name", d.database.name.as_str())?
            .set_default("database.user", d.database.user.as_str())?
            .set_default("database.password", d.database.password.as_str())?
            .set_default("database.max_connections", d.database.max_connections)?
            .set_default("database.min_connections", d.database.min_connections)?
            .set_default("database.connect_timeout", d.database.connect_timeout)?
            .set_default("database.acquire_timeout", d.database.acquire_timeout)?
            .set_default("database.idle_timeout", d.database.idle_timeout)?
            .set_default("database.max_lifetime", d.database.max_lifetime)?
            .set_default("redis.url", d.redis.url.as_str())?
            .set_default("logging.level", d.logging.level.as_str())?
            .set_default("provider.url", d.provider.url.as_str())?
            .set_default("provider.realm", d.provider.realm.as_str())?
            .set_default("provider.client_id", d.provider.client_id.as_str())?
            .set_default("provider.client_secret", d.provider.client_secret.as_str())?
            .set_default("provider.admin_username", d.provider.admin_username.as_str())?
            .set_default("provider.admin_password", d.provider.admin_password.as_str())?
            .set_default("provider.admin_client_id", d.provider.admin_client_id.as_str())?
            .set_default("provider.verify_token", d.provider.verify_token)?
            .set_default("cache_ttl.realm_secs", d.cache_ttl.realm_secs)?
            .set_default("cache_ttl.public_key_secs", d.cache_ttl.public_key_secs)?
            .set_default("cache_ttl.permission_secs", d.cache_ttl.permission_secs)?
            .set_default("cache_ttl.roles_secs", d.cache_ttl.roles_secs)?
            .set_default("cache_ttl.user_secs", d.cache_ttl.user_secs)?
            .set_default(
                "token.default_strategy",
                match d.token.default_strategy {
                    TokenValidationStrategy::Local => "local",
                    TokenValidationStrategy::Introspection => "introspection",
                    TokenValidationStrategy::SmartFallback => "smart_fallback",
                },
            )?
            .set_default("token.allow_plaintext_fallback", d.token.allow_plaintext_fallback)?
            .set_default("guest.session_ttl_secs", d.guest.session_ttl_secs)?
            .set_default(
                "guest.ip_rate_limit_max_requests",
                d.guest.ip_rate_limit_max_requests,
            )?
            .set_default(
                "guest.session_rate_limit_max_requests",
                d.guest.session_rate_limit_max_requests,
            )?
            .set_default(
                "guest.rate_limit_window_secs",
                d.guest.rate_limit_window_secs,
            )?
            .set_default("guest.fail_open", d.guest.fail_open)?
            .set_default("http.max_connections", d.http.max_connections as i64)?
            .set_default("http.timeout_secs", d.http.timeout_secs)?;

        if let Some(config_file) = Settings::ensure_config_file(&run_mode) {
            if Settings::file_exists(&config_file) {
                builder = builder.add_source(File::with_name(&config_file).required(false));
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("APP")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }
}

pub fn get_app_config() -> &'static AppConfig {
    &APP_CONFIG
}

pub fn get_database_config() -> DatabaseSettings {
    APP_CONFIG.database.clone()
}

#[cfg(test)]
impl Settings {
    fn with_mock_fs() -> &'static Mutex<MockFs> {
        &MOCK_FS
    }

    fn read_file(path: &str) -> Option<String> {
        if cfg!(test) {
            Settings::with_mock_fs().lock().unwrap().read(path)
        } else {
            fs::read_to_string(path).ok()
        }
    }

    fn write_file(path: &str, content: &str) -> Result<(), std::io::Error> {
        if cfg!(test) {
            Settings::with_mock_fs()
                .lock()
                .unwrap()
                .write(path, content);
            Ok(())
        } else {
            fs::write(path, content)
        }
    }

    fn file_exists(path: &str) -> bool {
        if cfg!(test) {
            Settings::with_mock_fs().lock().unwrap().exists(path)
        } else {
            Path::new(path).exists()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn setup() {
        let mock_fs = Settings::with_mock_fs();
        mock_fs.lock().unwrap().clear();
        env::remove_var("APP__SERVER__BACKEND_PORT");
        env::remove_var("APP__LOGGING__LEVEL");
        env::remove_var("RUN_MODE");
    }

    #[test]
    #[serial]
    fn test_default_settings() {
        setup();

        let dev_settings = Settings::get_default_settings("dev");
        assert_eq!(dev_settings.server.backend_port, 3333);
        assert_eq!(dev_settings.logging.level, "debug");

        let prod_settings = Settings::get_default_settings("prod");
        assert_eq!(prod_settings.server.backend_port, 8080);
        assert_eq!(prod_settings.logging.level, "info");

        let unknown_settings = Settings::get_default_settings("unknown");
        assert_eq!(unknown_settings.server.backend_port, 3333);
    }

    #[test]
    #[serial]
    fn test_ensure_config_file_test_mode() {
        setup();

        Settings::with_mock_fs().lock().unwrap().write(
            "config/config.test.toml",
            r#"[server]
backend_port = 3333

[logging]
level = "debug"
"#,
        );

        let result = Settings::ensure_config_file("test");
        assert_eq!(result, Some("config/config.test.toml".to_string()));
    }

    #[test]
    #[serial]
    fn test_ensure_config_file_creates_from_template() {
        setup();

        let template_content = r#"[server]
backend_port = 123

[logging]
level = "debug"
"#;
        Settings::with_mock_fs()
            .lock()
            .unwrap()
            .write("config/config.test_mode.toml.template", template_content);

        let result = Settings::ensure_config_file("test_mode");
        assert!(result.is_some());

        let created_content = Settings::with_mock_fs()
            .lock()
            .unwrap()
            .read("config/config.test_mode.toml")
            .unwrap();
        assert_eq!(created_content, template_content);
    }

    #[test]
    #[serial]
    fn test_ensure_config_file_missing_template() {
        setup();
        let result = Settings::ensure_config_file("missing_template");
        assert!(result.is_none());
    }

    #[test]
    #[serial]
    fn test_settings_new_production() {
        setup();

        Settings::with_mock_fs().lock().unwrap().write(
            "config/config.prod.toml",
            r#"[server]
backend_port = 8080

[logging]
level = "info"
"#,
        );

        env::set_var("RUN_MODE", "prod");
        let prod_settings = Settings::new().unwrap();
        assert_eq!(prod_settings.server.backend_port, 8080);
        assert_eq!(prod_settings.logging.level.as_str(), "info");
    }

    #[test]
    #[serial]
    fn test_settings_new_with_env_override() {
        setup();

        Settings::with_mock_fs().lock().unwrap().write(
            "config/config.dev.toml",
            r#"[server]
backend_port = 3333

[logging]
level = "debug"
"#,
        );

        env::set_var("APP__SERVER__BACKEND_PORT", "5000");
        let override_settings = Settings::new().unwrap();
        assert_eq!(override_settings.server.backend_port, 5000);
    }

    #[test]
    fn cache_ttl_defaults_match_reference_values() {
        let ttl = CacheTtlSettings::default();
        assert_eq!(ttl.permission_secs, 1800);
        assert_eq!(ttl.roles_secs, 3600);
        assert_eq!(ttl.user_secs, 600);
    }

    #[test]
    fn token_validation_default_strategy_is_smart_fallback() {
        assert_eq!(
            TokenValidationSettings::default().default_strategy,
            TokenValidationStrategy::SmartFallback
        );
    }
}
