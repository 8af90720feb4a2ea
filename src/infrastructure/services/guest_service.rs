use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Duration as ChronoDuration;
use sea_orm::{ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set};
use tracing::{instrument, warn};

use crate::common::error::{AppError, AppResult};
use crate::domain::guest::GuestSession;
use crate::infrastructure::cache::CacheStore;
use crate::infrastructure::database::entities::guest_session::{
    ActiveModel as GuestSessionActiveModel, Column as GuestSessionColumn,
    Entity as GuestSessionEntity,
};

fn ip_rate_limit_key(tenant_id: &str, fingerprint: &str) -> String {
    format!("guest_rate:ip:{tenant_id}:{fingerprint}")
}

fn session_rate_limit_key(tenant_id: &str, session_token: &str) -> String {
    format!("guest_rate:session:{tenant_id}:{session_token}")
}

fn session_cache_key(session_token: &str) -> String {
    format!("guest_session:{session_token}")
}

/// Tracks unauthenticated callers well enough to rate-limit them and persist
/// an audit trail, without requiring a provider login. Two independent
/// sliding counters apply: one keyed by IP+user-agent fingerprint (catches a
/// single client cycling through session tokens), one keyed by the session
/// token itself (catches one session hammering the API from a shared IP).
/// Either limit being exceeded rejects the request. If the cache is
/// unreachable the configured `fail_open` policy decides whether the
/// request proceeds anyway.
#[async_trait]
pub trait GuestServiceTrait: Send + Sync {
    /// Admits a guest request. `existing_session_token` is whatever the
    /// caller sent in `X-Guest-Session`, if anything; when it resolves to a
    /// live session that session is refreshed in place rather than a new
    /// one minted, so a client that returns the token it was given keeps
    /// being tracked as a single session across requests.
    async fn admit(
        &self,
        tenant_id: &str,
        ip: &str,
        user_agent: &str,
        referrer: Option<&str>,
        existing_session_token: Option<&str>,
    ) -> AppResult<GuestSession>;
}

pub struct GuestService {
    db: Arc<DatabaseConnection>,
    cache: Arc<dyn CacheStore>,
    ip_rate_limit_max_requests: u32,
    session_rate_limit_max_requests: u32,
    rate_limit_window: Duration,
    session_ttl: Duration,
    fail_open: bool,
}

impl GuestService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        cache: Arc<dyn CacheStore>,
        ip_rate_limit_max_requests: u32,
        session_rate_limit_max_requests: u32,
        rate_limit_window: Duration,
        session_ttl: Duration,
        fail_open: bool,
    ) -> Self {
        Self {
            db,
            cache,
            ip_rate_limit_max_requests,
            session_rate_limit_max_requests,
            rate_limit_window,
            session_ttl,
            fail_open,
        }
    }

    async fn check_rate_limit(&self, key: &str, max_requests: u32) -> AppResult<()> {
        match self.cache.incr(key, self.rate_limit_window).await {
            Ok(count) => {
                if count as u32 > max_requests {
                    return Err(AppError::rate_limited(self.rate_limit_window.as_secs()));
                }
                Ok(())
            },
            Err(err) => {
                if self.fail_open {
                    warn!(error = %err, "guest rate limit cache unavailable, failing open");
                    Ok(())
                } else {
                    Err(err)
                }
            },
        }
    }

    async fn load_cached_session(&self, session_token: &str) -> Option<GuestSession> {
        let cached = self.cache.get(&session_cache_key(session_token)).await.ok()??;
        serde_json::from_slice(&cached).ok()
    }

    async fn cache_session(&self, session: &GuestSession) -> AppResult<()> {
        let encoded = serde_json::to_vec(session)?;
        self.cache
            .set_ex(&session_cache_key(&session.session_token), encoded, self.session_ttl)
            .await
    }

    async fn persist(&self, session: &GuestSession) -> AppResult<()> {
        let existing = GuestSessionEntity::find()
            .filter(GuestSessionColumn::SessionToken.eq(session.session_token.clone()))
            .one(self.db.as_ref())
            .await?;

        match existing {
            Some(model) => {
                let mut active_model: GuestSessionActiveModel = model.into();
                active_model.request_count = Set(session.request_count as i32);
                active_model.last_seen_at = Set(session.last_seen_at);
                active_model.expires_at = Set(session.expires_at);
                active_model.update(self.db.as_ref()).await?;
            },
            None => {
                let active_model = GuestSessionActiveModel {
                    id: Set(session.id.as_uuid()),
                    tenant_id: Set(session.tenant_id.clone()),
                    session_token: Set(session.session_token.clone()),
                    fingerprint: Set(session.fingerprint.clone()),
                    user_agent: Set(session.user_agent.clone()),
                    referrer: Set(session.referrer.clone()),
                    request_count: Set(session.request_count as i32),
                    created_at: Set(session.created_at),
                    last_seen_at: Set(session.last_seen_at),
                    expires_at: Set(session.expires_at),
                };
                active_model.insert(self.db.as_ref()).await?;
            },
        }
        Ok(())
    }
}

#[async_trait]
impl GuestServiceTrait for GuestService {
    #[instrument(skip(self, ip, user_agent, referrer))]
    async fn admit(
        &self,
        tenant_id: &str,
        ip: &str,
        user_agent: &str,
        referrer: Option<&str>,
        existing_session_token: Option<&str>,
    ) -> AppResult<GuestSession> {
        let fingerprint = GuestSession::fingerprint(ip, user_agent);
        self.check_rate_limit(&ip_rate_limit_key(tenant_id, &fingerprint), self.ip_rate_limit_max_requests)
            .await?;

        let resumed = match existing_session_token {
            Some(token) => self.load_cached_session(token).await,
            None => None,
        };

        let ttl = ChronoDuration::from_std(self.session_ttl).unwrap_or(ChronoDuration::seconds(3600));
        let is_resumed = resumed.is_some();
        let mut session = match resumed {
            Some(existing) if existing.tenant_id == tenant_id => existing,
            _ => GuestSession::new(tenant_id.to_string(), ip, user_agent, referrer.map(str::to_string), ttl),
        };

        self.check_rate_limit(
            &session_rate_limit_key(tenant_id, &session.session_token),
            self.session_rate_limit_max_requests,
        )
        .await?;

        if is_resumed {
            session.touch(ttl);
        }

        self.cache_session(&session).await?;
        self.persist(&session).await?;
        Ok(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::cache::InMemoryStore;
    use sea_orm::{DatabaseBackend, MockDatabase};

    fn service_with(
        db: DatabaseConnection,
        cache: Arc<dyn CacheStore>,
        ip_max: u32,
        session_max: u32,
        fail_open: bool,
    ) -> GuestService {
        GuestService::new(
            Arc::new(db),
            cache,
            ip_max,
            session_max,
            Duration::from_secs(60),
            Duration::from_secs(3600),
            fail_open,
        )
    }

    #[tokio::test]
    async fn admits_guest_under_rate_limit() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results(Vec::<Vec<crate::infrastructure::database::entities::guest_session::Model>>::new())
            .append_exec_results(vec![sea_orm::MockExecResult {
                last_insert_id: 1,
                rows_affected: 1,
            }])
            .into_connection();
        let cache: Arc<dyn CacheStore> = Arc::new(InMemoryStore::new());
        let service = service_with(db, cache, 10, 10, true);

        let session = service
            .admit("tenant-a", "203.0.113.1", "curl/8.0", None, None)
            .await
            .unwrap();
        assert_eq!(session.tenant_id, "tenant-a");
    }

    #[tokio::test]
    async fn rejects_guest_over_ip_rate_limit() {
        let cache: Arc<dyn CacheStore> = Arc::new(InMemoryStore::new());
        let key = ip_rate_limit_key("tenant-a", &GuestSession::fingerprint("203.0.113.1", "curl/8.0"));
        for _ in 0..3 {
            cache.incr(&key, Duration::from_secs(60)).await.unwrap();
        }

        let db = MockDatabase::new(DatabaseBackend::Postgres).into_connection();
        let service = service_with(db, cache, 3, 100, true);

        let result = service.admit("tenant-a", "203.0.113.1", "curl/8.0", None, None).await;
        assert!(result.is_err());
        assert_eq!(result.unwrap_err().kind.code(), "rate_limit_exceeded");
    }

    #[tokio::test]
    async fn reusing_session_token_refreshes_instead_of_minting_new() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results(Vec::<Vec<crate::infrastructure::database::entities::guest_session::Model>>::new())
            .append_exec_results(vec![sea_orm::MockExecResult {
                last_insert_id: 1,
                rows_affected: 1,
            }])
            .append_query_results(Vec::<Vec<crate::infrastructure::database::entities::guest_session::Model>>::new())
            .append_exec_results(vec![sea_orm::MockExecResult {
                last_insert_id: 1,
                rows_affected: 1,
            }])
            .into_connection();
        let cache: Arc<dyn CacheStore> = Arc::new(InMemoryStore::new());
        let service = service_with(db, cache, 100, 100, true);

        let first = service
            .admit("tenant-a", "203.0.113.1", "curl/8.0", None, None)
            .await
            .unwrap();
        let second = service
            .admit(
                "tenant-a",
                "203.0.113.1",
                "curl/8.0",
                None,
                Some(&first.session_token),
            )
            .await
            .unwrap();

        assert_eq!(first.session_token, second.session_token);
        assert_eq!(second.request_count, 2);
    }
}
