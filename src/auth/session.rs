//! Session context shared by the HTTP client and the command handlers

use anyhow::Result;
use tokio::sync::broadcast;

use super::{Persistence, TokenStore, UserRecord};

/// Capacity of the session-changed channel. Slow observers only miss
/// intermediate events, never block the sender.
const EVENT_CHANNEL_CAPACITY: usize = 16;

/// Session-changed notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// A new session was stored after login
    SignedIn,
    /// The access token was replaced by a refresh
    Refreshed,
    /// The user logged out
    SignedOut,
    /// Credentials were rejected and the session was purged
    Expired,
}

/// Token storage plus the notification channel for one signed-in context.
///
/// Constructed once by the composition root and handed to `HttpClient`.
pub struct SessionContext {
    store: TokenStore,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionContext {
    pub fn new(store: TokenStore) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { store, events }
    }

    pub fn store(&self) -> &TokenStore {
        &self.store
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn notify(&self, event: SessionEvent) {
        tracing::debug!(?event, "Session changed");
        // No receivers is fine
        let _ = self.events.send(event);
    }

    /// Store a fresh login and announce it.
    pub fn sign_in(
        &self,
        access_token: &str,
        refresh_token: Option<&str>,
        user: Option<&UserRecord>,
        persistence: Persistence,
    ) -> Result<()> {
        self.store
            .save_session(access_token, refresh_token, user, persistence)?;
        self.notify(SessionEvent::SignedIn);
        Ok(())
    }

    /// Forget the session. With `keep_profile` the cached user record stays
    /// behind for `whoami`.
    pub fn sign_out(&self, keep_profile: bool) -> Result<()> {
        if keep_profile {
            self.store.clear_tokens()?;
        } else {
            self.store.clear()?;
        }
        self.notify(SessionEvent::SignedOut);
        Ok(())
    }

    /// Purge all credentials after an unrecoverable auth failure.
    ///
    /// Announces `Expired` once per session: a purge that finds nothing
    /// stored stays quiet. Observers are still notified if clearing storage
    /// failed.
    pub fn invalidate(&self) {
        match self.store.clear() {
            Ok(false) => {
                tracing::debug!("Session already cleared");
                return;
            }
            Ok(true) => tracing::warn!("Session invalidated, credentials cleared"),
            Err(e) => tracing::warn!("Failed to clear stored session: {:#}", e),
        }
        self.notify(SessionEvent::Expired);
    }
}
