use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::common::ids::TimeSortableId;

/// Where a guest session sits in its lifecycle. `Fresh` covers the very
/// first request; `Active` is every renewed request before expiry;
/// `Expired` once `expires_at` has passed, at which point a new session
/// token (not a refresh of this one) must be issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuestSessionState {
    Fresh,
    Active,
    Expired,
}

/// An unauthenticated caller tracked well enough to rate-limit and audit,
/// without requiring a provider login. `fingerprint` hashes IP + user agent
/// for IP-scoped rate limiting; `session_token` is the opaque value handed
/// back via `X-Guest-Session` so the same caller is recognized as one
/// session across requests rather than refingerprinted every time (useful
/// behind a NAT or shared proxy where many guests share one IP).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuestSession {
    pub id: TimeSortableId,
    pub tenant_id: String,
    pub session_token: String,
    pub fingerprint: String,
    pub user_agent: String,
    pub referrer: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub request_count: u32,
}

fn generate_session_token() -> String {
    let bytes: [u8; 24] = rand::thread_rng().gen();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

impl GuestSession {
    pub fn fingerprint(ip: &str, user_agent: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(ip.as_bytes());
        hasher.update(b"|");
        hasher.update(user_agent.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    pub fn new(
        tenant_id: String,
        ip: &str,
        user_agent: &str,
        referrer: Option<String>,
        ttl: ChronoDuration,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: TimeSortableId::new(),
            tenant_id,
            session_token: generate_session_token(),
            fingerprint: Self::fingerprint(ip, user_agent),
            user_agent: user_agent.to_string(),
            referrer,
            created_at: now,
            last_seen_at: now,
            expires_at: now + ttl,
            request_count: 1,
        }
    }

    pub fn state(&self, now: DateTime<Utc>) -> GuestSessionState {
        if now >= self.expires_at {
            GuestSessionState::Expired
        } else if self.request_count <= 1 {
            GuestSessionState::Fresh
        } else {
            GuestSessionState::Active
        }
    }

    /// Records another request against this session and slides its expiry
    /// forward by `ttl` from now.
    pub fn touch(&mut self, ttl: ChronoDuration) {
        let now = Utc::now();
        self.request_count += 1;
        self.last_seen_at = now;
        self.expires_at = now + ttl;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_deterministic_for_same_inputs() {
        let a = GuestSession::fingerprint("203.0.113.5", "curl/8.0");
        let b = GuestSession::fingerprint("203.0.113.5", "curl/8.0");
        assert_eq!(a, b);
    }

    #[test]
    fn fingerprint_differs_across_clients() {
        let a = GuestSession::fingerprint("203.0.113.5", "curl/8.0");
        let b = GuestSession::fingerprint("203.0.113.6", "curl/8.0");
        assert_ne!(a, b);
    }

    #[test]
    fn new_session_starts_fresh() {
        let session = GuestSession::new(
            "tenant-a".to_string(),
            "203.0.113.5",
            "curl/8.0",
            None,
            ChronoDuration::seconds(3600),
        );
        assert_eq!(session.state(Utc::now()), GuestSessionState::Fresh);
    }

    #[test]
    fn touch_moves_session_to_active_and_extends_expiry() {
        let mut session = GuestSession::new(
            "tenant-a".to_string(),
            "203.0.113.5",
            "curl/8.0",
            None,
            ChronoDuration::seconds(60),
        );
        let original_expiry = session.expires_at;
        session.touch(ChronoDuration::seconds(3600));
        assert_eq!(session.state(Utc::now()), GuestSessionState::Active);
        assert!(session.expires_at > original_expiry);
    }

    #[test]
    fn session_past_expires_at_reports_expired() {
        let session = GuestSession::new(
            "tenant-a".to_string(),
            "203.0.113.5",
            "curl/8.0",
            None,
            ChronoDuration::seconds(-1),
        );
        assert_eq!(session.state(Utc::now()), GuestSessionState::Expired);
    }

    #[test]
    fn session_tokens_are_unique() {
        let a = generate_session_token();
        let b = generate_session_token();
        assert_ne!(a, b);
        assert_eq!(a.len(), 48);
    }
}
