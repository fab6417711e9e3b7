//! In-memory session storage addressed by a signed cookie.

use crate::consent::csrf::{CsrfSecret, random_token, sign, verify_signature};
use crate::consent::session::{Principal, Session};
use axum::http::{HeaderMap, HeaderValue, header};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub const SESSION_COOKIE: &str = "hydra_consent_session";
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(60 * 60);

#[derive(Clone)]
struct SessionEntry {
    session: Session,
    expires_at: Instant,
}

impl SessionEntry {
    fn is_expired(&self) -> bool {
        Instant::now() > self.expires_at
    }
}

/// A session loaded for the duration of one request.
#[derive(Debug, Clone)]
pub struct LoadedSession {
    pub id: String,
    pub session: Session,
}

#[derive(Clone)]
pub struct MemorySessionStore {
    sessions: Arc<DashMap<String, SessionEntry>>,
    secret: Arc<str>,
    ttl: Duration,
    last_cleanup: Arc<std::sync::Mutex<Instant>>,
}

impl MemorySessionStore {
    pub fn new(secret: &str, ttl: Duration) -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
            secret: Arc::from(secret),
            ttl,
            last_cleanup: Arc::new(std::sync::Mutex::new(Instant::now())),
        }
    }

    /// Drop expired sessions at most once a minute.
    fn maybe_cleanup(&self) {
        const CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

        if let Ok(mut last_cleanup) = self.last_cleanup.try_lock() {
            if last_cleanup.elapsed() >= CLEANUP_INTERVAL {
                *last_cleanup = Instant::now();
                drop(last_cleanup);
                self.sessions.retain(|_, entry| !entry.is_expired());
            }
        }
    }

    fn session_id(&self, headers: &HeaderMap) -> Option<String> {
        let value = headers
            .get_all(header::COOKIE)
            .iter()
            .filter_map(|h| h.to_str().ok())
            .flat_map(|h| h.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .find_map(|(name, value)| (name == SESSION_COOKIE).then_some(value))?;

        let (id, signature) = value.split_once('.')?;
        if verify_signature(self.secret.as_bytes(), id, signature) {
            Some(id.to_owned())
        } else {
            tracing::debug!("ignoring session cookie with a bad signature");
            None
        }
    }

    /// Load the session named by the request cookie, or start a new one.
    /// Every returned session carries a CSRF secret.
    pub fn load_or_create(&self, headers: &HeaderMap) -> LoadedSession {
        self.maybe_cleanup();

        let existing = self.session_id(headers).and_then(|id| {
            let entry = self.sessions.get(&id)?;
            (!entry.is_expired()).then(|| LoadedSession {
                id: id.clone(),
                session: entry.session.clone(),
            })
        });

        let mut loaded = existing.unwrap_or_else(|| LoadedSession {
            id: random_token(24),
            session: Session::default(),
        });
        if loaded.session.csrf_secret.is_none() {
            loaded.session.csrf_secret = Some(CsrfSecret::generate());
        }
        loaded
    }

    /// Persist `loaded` and return the `Set-Cookie` value addressing it.
    pub fn commit(&self, loaded: LoadedSession) -> Option<HeaderValue> {
        let signature = sign(self.secret.as_bytes(), &loaded.id)?;
        let cookie = format!(
            "{SESSION_COOKIE}={}.{signature}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
            loaded.id,
            self.ttl.as_secs()
        );
        self.sessions.insert(
            loaded.id,
            SessionEntry {
                session: loaded.session,
                expires_at: Instant::now() + self.ttl,
            },
        );
        HeaderValue::from_str(&cookie).ok()
    }

    /// Attach an authenticated principal to the session addressed by the
    /// request cookie. Used by the identity-provider side once login
    /// completes.
    ///
    /// The in-flight consent id survives. The session moves to a new id so a
    /// cookie planted before login cannot ride the authenticated session.
    pub fn sign_in(&self, headers: &HeaderMap, principal: Principal) -> Option<HeaderValue> {
        let mut loaded = self.load_or_create(headers);
        self.sessions.remove(&loaded.id);
        loaded.id = random_token(24);
        loaded.session.principal = Some(principal);
        tracing::debug!(consent = ?loaded.session.consent_id, "principal signed in");
        self.commit(loaded)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl std::fmt::Debug for MemorySessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemorySessionStore")
            .field("sessions", &self.sessions.len())
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    const SECRET: &str = "0123456789abcdef0123456789abcdef";

    fn cookie_headers(set_cookie: &HeaderValue) -> HeaderMap {
        let pair = set_cookie.to_str().unwrap().split(';').next().unwrap().to_owned();
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_str(&pair).unwrap());
        headers
    }

    #[test]
    fn committed_session_is_loaded_back() {
        let store = MemorySessionStore::new(SECRET, DEFAULT_SESSION_TTL);
        let mut loaded = store.load_or_create(&HeaderMap::new());
        assert!(loaded.session.csrf_secret.is_some());
        loaded.session.consent_id = Some("c1".into());
        let id = loaded.id.clone();
        let cookie = store.commit(loaded).unwrap();
        assert!(cookie.to_str().unwrap().contains("HttpOnly"));

        let again = store.load_or_create(&cookie_headers(&cookie));
        assert_eq!(again.id, id);
        assert_eq!(again.session.consent_id.as_deref(), Some("c1"));
    }

    #[test]
    fn sign_in_keeps_consent_and_rotates_id() {
        let store = MemorySessionStore::new(SECRET, DEFAULT_SESSION_TTL);
        let mut loaded = store.load_or_create(&HeaderMap::new());
        loaded.session.consent_id = Some("c1".into());
        let anonymous_id = loaded.id.clone();
        let anonymous = store.commit(loaded).unwrap();

        let cookie = store
            .sign_in(&cookie_headers(&anonymous), Principal::new("user-1", Map::new(), 0))
            .unwrap();
        let loaded = store.load_or_create(&cookie_headers(&cookie));
        assert_ne!(loaded.id, anonymous_id);
        assert_eq!(loaded.session.consent_id.as_deref(), Some("c1"));
        assert_eq!(loaded.session.principal.unwrap().subject, "user-1");

        // the pre-login cookie no longer addresses any session
        let stale = store.load_or_create(&cookie_headers(&anonymous));
        assert!(stale.session.consent_id.is_none());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn forged_cookie_starts_new_session() {
        let store = MemorySessionStore::new(SECRET, DEFAULT_SESSION_TTL);
        let cookie = store
            .sign_in(&HeaderMap::new(), Principal::new("user-1", Map::new(), 0))
            .unwrap();
        let other = MemorySessionStore::new("another-secret-another-secret-xx", DEFAULT_SESSION_TTL);
        let loaded = other.load_or_create(&cookie_headers(&cookie));
        assert!(loaded.session.principal.is_none());

        let loaded = store.load_or_create(&cookie_headers(&cookie));
        assert_eq!(loaded.session.principal.unwrap().subject, "user-1");
    }

    #[test]
    fn expired_sessions_are_not_loaded() {
        let store = MemorySessionStore::new(SECRET, Duration::ZERO);
        let cookie = store
            .sign_in(&HeaderMap::new(), Principal::new("user-1", Map::new(), 0))
            .unwrap();
        std::thread::sleep(Duration::from_millis(5));
        let loaded = store.load_or_create(&cookie_headers(&cookie));
        assert!(loaded.session.principal.is_none());
    }
}
