//! OAuth handshake state tracking
//!
//! Correlates the outbound GitHub redirect with its callback. A state value
//! is unpredictable, valid for one callback only, and expires after
//! [`DEFAULT_STATE_TTL`].

use std::collections::HashMap;
use std::time::{Duration, Instant};

use base64::{Engine as _, engine::general_purpose};
use rand::RngCore;
use tokio::sync::Mutex;

use crate::metrics::OAUTH_STATES_PENDING;

/// Lifetime of an unconsumed handshake (10 minutes)
pub const DEFAULT_STATE_TTL: Duration = Duration::from_secs(10 * 60);

const STATE_BYTES: usize = 24;

/// Data carried from the login redirect to the callback
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakePayload {
    /// Where to send the browser after a successful login
    pub frontend_redirect_url: Option<String>,
}

#[derive(Debug)]
struct PendingHandshake {
    payload: HandshakePayload,
    expires_at: Instant,
}

/// Store of pending OAuth handshakes
pub struct OAuthStateStore {
    states: Mutex<HashMap<String, PendingHandshake>>,
    ttl: Duration,
}

impl Default for OAuthStateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl OAuthStateStore {
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_STATE_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            states: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Register a new handshake and return its state value.
    pub async fn create_state(&self, frontend_redirect_url: Option<String>) -> String {
        let mut states = self.states.lock().await;
        let now = Instant::now();
        purge_locked(&mut states, now);

        let mut state = generate_state();
        while states.contains_key(&state) {
            state = generate_state();
        }

        states.insert(
            state.clone(),
            PendingHandshake {
                payload: HandshakePayload {
                    frontend_redirect_url,
                },
                expires_at: now + self.ttl,
            },
        );
        OAUTH_STATES_PENDING.set(states.len() as i64);

        state
    }

    /// Take the payload for `state`, deleting the entry whether or not it
    /// was found.
    pub async fn consume_state(&self, state: &str) -> Option<HandshakePayload> {
        let mut states = self.states.lock().await;
        purge_locked(&mut states, Instant::now());

        let pending = states.remove(state);
        OAUTH_STATES_PENDING.set(states.len() as i64);

        if pending.is_none() {
            tracing::debug!("OAuth state not found");
        }

        pending.map(|pending| pending.payload)
    }

    /// Drop expired handshakes, returning how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let mut states = self.states.lock().await;
        purge_locked(&mut states, Instant::now())
    }

    pub async fn pending(&self) -> usize {
        self.states.lock().await.len()
    }
}

fn generate_state() -> String {
    let mut bytes = [0_u8; STATE_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

fn purge_locked(states: &mut HashMap<String, PendingHandshake>, now: Instant) -> usize {
    let before = states.len();
    states.retain(|_, pending| pending.expires_at > now);
    let purged = before - states.len();

    if purged > 0 {
        OAUTH_STATES_PENDING.set(states.len() as i64);
    }

    purged
}
