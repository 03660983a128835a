//! Session management
//!
//! Sessions are opaque bearer tokens mapped to a server-side record.
//! [`InMemorySessionStore`] is the core store; [`DurableSessionStore`]
//! decorates it with a full JSON snapshot rewritten after every mutation.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose};
use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use super::permissions::{CapabilityFlags, Permission, PermissionSet, Role};
use crate::metrics::{
    SESSIONS_ACTIVE, SESSIONS_CREATED_TOTAL, SESSIONS_EXPIRED_TOTAL, SESSIONS_REVOKED_TOTAL,
};
use crate::storage::{JsonArrayFile, read_json_array, write_json_atomic};

/// Random bytes per token (192 bits).
const TOKEN_BYTES: usize = 24;

/// Shortest lifetime a session can be created with.
const MIN_TTL_MS: i64 = 1;

/// Longest lifetime a session can be created with (ten years).
pub const MAX_SESSION_TTL_SECONDS: i64 = 10 * 365 * 24 * 60 * 60;

/// Kind of principal a session was issued for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionKind {
    Guest,
    User,
}

impl SessionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionKind::Guest => "guest",
            SessionKind::User => "user",
        }
    }

    fn token_prefix(&self) -> &'static str {
        self.as_str()
    }
}

/// Identity path that produced a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthProvider {
    Guest,
    Github,
}

impl AuthProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthProvider::Guest => "guest",
            AuthProvider::Github => "github",
        }
    }
}

/// Identity snapshot embedded in a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionUser {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_url: Option<String>,
    #[serde(default)]
    pub role: Role,
    #[serde(flatten)]
    pub flags: CapabilityFlags,
}

/// Server-side session record
///
/// `expires_at > created_at` always holds for sessions issued by a store.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub token: String,
    #[serde(rename = "type")]
    pub kind: SessionKind,
    pub provider: AuthProvider,
    pub permissions: PermissionSet,
    pub user: SessionUser,
    /// Upstream provider token, kept only for revocation on logout
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_access_token: Option<String>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub expires_at: DateTime<Utc>,
}

impl Session {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Check if session is expired
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    pub fn allows(&self, permission: Permission) -> bool {
        self.permissions.allows(permission)
    }
}

// Tokens are credentials; keep them out of logs.
impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("token", &format_args!("{}_…", self.kind.token_prefix()))
            .field("kind", &self.kind)
            .field("provider", &self.provider)
            .field("permissions", &self.permissions)
            .field("user", &self.user)
            .field(
                "external_access_token",
                &self.external_access_token.as_ref().map(|_| "<redacted>"),
            )
            .field("created_at", &self.created_at)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Input for [`SessionStore::create`]
#[derive(Debug, Clone)]
pub struct NewSession {
    pub kind: SessionKind,
    pub provider: AuthProvider,
    pub permissions: PermissionSet,
    pub user: SessionUser,
    pub external_access_token: Option<String>,
    /// Overrides the store's default lifetime
    pub ttl: Option<Duration>,
}

/// Token → session store
///
/// Implementations serialize their own mutations. Lookups of expired
/// sessions delete them.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Issue a fresh token. Expired sessions are swept first.
    async fn create(&self, new: NewSession) -> Session;

    /// Live session for `token`, if any.
    async fn get(&self, token: &str) -> Option<Session>;

    /// Delete a session; `true` if one was removed.
    async fn revoke(&self, token: &str) -> bool;

    /// Delete every expired session, returning how many were removed.
    async fn purge_expired(&self) -> usize;

    /// Number of stored sessions, expired or not.
    async fn count(&self) -> usize;
}

/// In-memory session store
pub struct InMemorySessionStore {
    sessions: Mutex<HashMap<String, Session>>,
    default_ttl: Duration,
}

impl InMemorySessionStore {
    pub fn new(default_ttl: Duration) -> Self {
        Self::with_sessions(default_ttl, Vec::new())
    }

    fn with_sessions(default_ttl: Duration, sessions: Vec<Session>) -> Self {
        let sessions: HashMap<String, Session> = sessions
            .into_iter()
            .map(|session| (session.token.clone(), session))
            .collect();
        SESSIONS_ACTIVE.set(sessions.len() as i64);

        Self {
            sessions: Mutex::new(sessions),
            default_ttl,
        }
    }

    async fn insert_new(&self, new: NewSession) -> Session {
        let mut sessions = self.sessions.lock().await;
        let now = Utc::now();
        purge_locked(&mut sessions, now);

        let mut token = generate_token(new.kind);
        while sessions.contains_key(&token) {
            token = generate_token(new.kind);
        }

        let ttl = new
            .ttl
            .unwrap_or(self.default_ttl)
            .clamp(
                Duration::milliseconds(MIN_TTL_MS),
                Duration::seconds(MAX_SESSION_TTL_SECONDS),
            );

        let session = Session {
            token: token.clone(),
            kind: new.kind,
            provider: new.provider,
            permissions: new.permissions,
            user: new.user,
            external_access_token: new.external_access_token,
            created_at: now,
            expires_at: now.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC),
        };

        sessions.insert(token, session.clone());
        SESSIONS_CREATED_TOTAL
            .with_label_values(&[session.kind.as_str()])
            .inc();
        SESSIONS_ACTIVE.set(sessions.len() as i64);

        tracing::debug!(
            kind = session.kind.as_str(),
            provider = session.provider.as_str(),
            user_id = %session.user.id,
            "Session created"
        );

        session
    }

    /// Returns the live session and whether an expired entry was dropped.
    async fn lookup(&self, token: &str) -> (Option<Session>, bool) {
        let mut sessions = self.sessions.lock().await;

        match sessions.get(token) {
            None => return (None, false),
            Some(session) if !session.is_expired() => return (Some(session.clone()), false),
            Some(_) => {}
        }

        sessions.remove(token);
        SESSIONS_EXPIRED_TOTAL.inc();
        SESSIONS_ACTIVE.set(sessions.len() as i64);

        (None, true)
    }

    async fn remove(&self, token: &str) -> bool {
        let mut sessions = self.sessions.lock().await;
        let removed = sessions.remove(token).is_some();

        if removed {
            SESSIONS_REVOKED_TOTAL.inc();
            SESSIONS_ACTIVE.set(sessions.len() as i64);
        }

        removed
    }

    async fn purge(&self) -> usize {
        let mut sessions = self.sessions.lock().await;
        purge_locked(&mut sessions, Utc::now())
    }

    async fn snapshot(&self) -> Vec<Session> {
        let sessions = self.sessions.lock().await;
        let mut snapshot: Vec<Session> = sessions.values().cloned().collect();
        snapshot.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        snapshot
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn create(&self, new: NewSession) -> Session {
        self.insert_new(new).await
    }

    async fn get(&self, token: &str) -> Option<Session> {
        self.lookup(token).await.0
    }

    async fn revoke(&self, token: &str) -> bool {
        self.remove(token).await
    }

    async fn purge_expired(&self) -> usize {
        self.purge().await
    }

    async fn count(&self) -> usize {
        self.sessions.lock().await.len()
    }
}

/// Session store backed by a JSON snapshot file
///
/// Every successful mutation rewrites the whole snapshot. The file is
/// crash-recovery only: write failures are logged and the in-memory state
/// stays authoritative.
pub struct DurableSessionStore {
    inner: InMemorySessionStore,
    path: PathBuf,
    /// Held across mutate + write so snapshots land in mutation order.
    write_lock: Mutex<()>,
}

impl DurableSessionStore {
    /// Load the snapshot at `path`.
    ///
    /// Only entries with a token, an expiry, and `expiresAt > now` are
    /// admitted. Missing, unreadable, or corrupt files yield an empty store.
    pub async fn open(path: impl Into<PathBuf>, default_ttl: Duration) -> Self {
        let path = path.into();
        let (sessions, rewrite) = load_snapshot(&path).await;

        tracing::info!(
            path = %path.display(),
            sessions = sessions.len(),
            "Session snapshot loaded"
        );

        let store = Self {
            inner: InMemorySessionStore::with_sessions(default_ttl, sessions),
            path,
            write_lock: Mutex::new(()),
        };

        if rewrite {
            store.persist().await;
        }

        store
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self) {
        let snapshot = self.inner.snapshot().await;
        if let Err(error) = write_json_atomic(&self.path, &snapshot).await {
            tracing::error!(
                %error,
                path = %self.path.display(),
                "Failed to write session snapshot"
            );
        }
    }
}

#[async_trait]
impl SessionStore for DurableSessionStore {
    async fn create(&self, new: NewSession) -> Session {
        let _guard = self.write_lock.lock().await;
        let session = self.inner.insert_new(new).await;
        self.persist().await;
        session
    }

    async fn get(&self, token: &str) -> Option<Session> {
        let _guard = self.write_lock.lock().await;
        let (session, expired) = self.inner.lookup(token).await;
        if expired {
            self.persist().await;
        }
        session
    }

    async fn revoke(&self, token: &str) -> bool {
        let _guard = self.write_lock.lock().await;
        let removed = self.inner.remove(token).await;
        if removed {
            self.persist().await;
        }
        removed
    }

    async fn purge_expired(&self) -> usize {
        let _guard = self.write_lock.lock().await;
        let purged = self.inner.purge().await;
        if purged > 0 {
            self.persist().await;
        }
        purged
    }

    async fn count(&self) -> usize {
        self.inner.count().await
    }
}

fn generate_token(kind: SessionKind) -> String {
    let mut bytes = [0_u8; TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!(
        "{}_{}",
        kind.token_prefix(),
        general_purpose::URL_SAFE_NO_PAD.encode(bytes)
    )
}

fn purge_locked(sessions: &mut HashMap<String, Session>, now: DateTime<Utc>) -> usize {
    let before = sessions.len();
    sessions.retain(|_, session| !session.is_expired_at(now));
    let purged = before - sessions.len();

    if purged > 0 {
        SESSIONS_EXPIRED_TOTAL.inc_by(purged as u64);
        SESSIONS_ACTIVE.set(sessions.len() as i64);
        tracing::debug!(purged, "Expired sessions purged");
    }

    purged
}

/// Returns admitted sessions and whether the file should be rewritten.
async fn load_snapshot(path: &Path) -> (Vec<Session>, bool) {
    let entries = match read_json_array(path).await {
        JsonArrayFile::Missing => return (Vec::new(), true),
        JsonArrayFile::Invalid => return (Vec::new(), false),
        JsonArrayFile::Entries(entries) => entries,
    };

    let total = entries.len();
    let now = Utc::now();
    let sessions: Vec<Session> = entries
        .into_iter()
        .filter_map(|entry| serde_json::from_value::<Session>(entry).ok())
        .filter(|session| !session.token.is_empty() && !session.is_expired_at(now))
        .collect();

    let dropped = total - sessions.len();
    (sessions, dropped > 0)
}
