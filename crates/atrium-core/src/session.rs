//! Session: the single owner of the credential pair and tenant context
//!
//! A `Session` is an explicit value injected into the client, so several
//! independent sessions can coexist in one process. Every read goes to the
//! in-memory state; every write goes through to all attached stores.
//!
//! Lifecycle:
//! - `login` stores a fresh credential pair (and optional tenant)
//! - `set_credentials` / `set_access_only` record the result of a refresh
//! - `expire` / `logout` / `clear` drop everything, in memory and in every store
//!
//! Store writes happen while the state lock is held, so the stores always
//! see writes in the same order as the in-memory state. `login` and `clear`
//! start a new generation; `commit_refresh` and `expire_if_current` only
//! apply to the generation they were started from.

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::Result;
use crate::claims::{self, Claims};
use crate::store::{CredentialStore, Credentials, MemoryCredentialStore, PersistedSession};
use crate::tenant::TenantId;

const EVENT_CHANNEL_CAPACITY: usize = 16;

/// Lifecycle notifications published by a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// Credentials stored after login or registration
    LoggedIn,
    /// Access token replaced by a refresh
    Refreshed,
    /// Both tokens are unusable; the user has to authenticate again
    Expired,
    /// The user logged out
    LoggedOut,
}

/// Point-in-time copy of the session state
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub state: PersistedSession,
    pub generation: u64,
}

impl SessionSnapshot {
    pub fn access_token(&self) -> Option<&str> {
        self.state.access_token.as_deref()
    }

    pub fn refresh_token(&self) -> Option<&str> {
        self.state.refresh_token.as_deref()
    }

    pub fn tenant(&self) -> Option<&TenantId> {
        self.state.tenant_id.as_ref()
    }

    /// Claims of the access token, if it decodes
    pub fn access_claims(&self) -> Option<Claims> {
        self.access_token().and_then(claims::decode)
    }

    /// Claims of the refresh token, if it decodes
    pub fn refresh_claims(&self) -> Option<Claims> {
        self.refresh_token().and_then(claims::decode)
    }

    pub fn is_authenticated(&self) -> bool {
        self.state.access_token.is_some() || self.state.refresh_token.is_some()
    }
}

#[derive(Debug, Default)]
struct State {
    current: PersistedSession,
    generation: u64,
}

#[derive(Debug)]
pub struct Session {
    state: RwLock<State>,
    stores: Vec<Arc<dyn CredentialStore>>,
    events: broadcast::Sender<SessionEvent>,
}

impl Default for Session {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl Session {
    /// Session persisted only in process memory
    pub fn in_memory() -> Self {
        Self::builder()
            .store(Arc::new(MemoryCredentialStore::new()))
            .build()
    }

    pub fn builder() -> SessionBuilder {
        SessionBuilder::default()
    }

    /// Subscribe to lifecycle events
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    fn publish(&self, event: SessionEvent) {
        // No receivers is fine
        let _ = self.events.send(event);
    }

    fn read(&self) -> RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn update(&self, f: impl FnOnce(&mut PersistedSession)) -> Result<()> {
        let mut state = self.write();
        f(&mut state.current);
        self.persist(&state.current)
    }

    fn persist(&self, state: &PersistedSession) -> Result<()> {
        let mut first_error = None;
        for store in &self.stores {
            if let Err(e) = store.save(state) {
                warn!(store = store.name(), "Failed to persist credentials: {}", e);
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Store the credentials returned by login or registration
    pub fn login(&self, credentials: Credentials, tenant: Option<TenantId>) -> Result<()> {
        let result = {
            let mut state = self.write();
            state.generation += 1;
            state.current.access_token = Some(credentials.access_token);
            state.current.refresh_token = Some(credentials.refresh_token);
            if tenant.is_some() {
                state.current.tenant_id = tenant;
            }
            self.persist(&state.current)
        };
        info!("Session established");
        self.publish(SessionEvent::LoggedIn);
        result
    }

    /// Replace both tokens after a refresh that rotated the refresh token
    pub fn set_credentials(&self, access_token: String, refresh_token: String) -> Result<()> {
        let result = self.update(|state| {
            state.access_token = Some(access_token);
            state.refresh_token = Some(refresh_token);
        });
        self.publish(SessionEvent::Refreshed);
        result
    }

    /// Replace only the access token after a refresh without rotation
    pub fn set_access_only(&self, access_token: String) -> Result<()> {
        let result = self.update(|state| {
            state.access_token = Some(access_token);
        });
        self.publish(SessionEvent::Refreshed);
        result
    }

    /// Record the result of a refresh started at `generation`.
    ///
    /// Returns `Ok(false)` and leaves the session untouched when it was
    /// cleared or logged into again since then. A rotated refresh token
    /// replaces the stored one.
    pub fn commit_refresh(
        &self,
        generation: u64,
        access_token: String,
        refresh_token: Option<String>,
    ) -> Result<bool> {
        let result = {
            let mut state = self.write();
            if state.generation != generation {
                debug!(
                    started = generation,
                    current = state.generation,
                    "Session changed during refresh, discarding issued tokens"
                );
                return Ok(false);
            }
            state.current.access_token = Some(access_token);
            if let Some(rotated) = refresh_token {
                state.current.refresh_token = Some(rotated);
            }
            self.persist(&state.current)
        };
        self.publish(SessionEvent::Refreshed);
        result.map(|()| true)
    }

    /// Set or unset the tenant scoping outbound requests
    pub fn set_tenant(&self, tenant: Option<TenantId>) -> Result<()> {
        self.update(|state| state.tenant_id = tenant)
    }

    pub fn access_token(&self) -> Option<String> {
        self.read().current.access_token.clone()
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.read().current.refresh_token.clone()
    }

    pub fn tenant(&self) -> Option<TenantId> {
        self.read().current.tenant_id.clone()
    }

    /// Bumped by every login and clear
    pub fn generation(&self) -> u64 {
        self.read().generation
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let state = self.read();
        SessionSnapshot {
            state: state.current.clone(),
            generation: state.generation,
        }
    }

    /// Drop every credential, in memory and in every store.
    ///
    /// Idempotent: a second call finds nothing to remove. Every store is
    /// cleared even if an earlier one fails; the first failure is returned.
    pub fn clear(&self) -> Result<()> {
        let mut state = self.write();
        self.clear_locked(&mut state)
    }

    fn clear_locked(&self, state: &mut State) -> Result<()> {
        let had_state = !state.current.is_empty();
        state.current = PersistedSession::default();
        state.generation += 1;

        let mut first_error = None;
        for store in &self.stores {
            if let Err(e) = store.clear() {
                warn!(store = store.name(), "Failed to clear credentials: {}", e);
                first_error.get_or_insert(e);
            }
        }

        if had_state {
            debug!("Session cleared");
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Clear the session and tell the application to reauthenticate
    pub fn expire(&self) {
        if let Err(e) = self.clear() {
            warn!("Session expired but could not be fully cleared: {}", e);
        }
        self.announce_expiry();
    }

    /// Expire the session only if it is still at `generation`
    pub fn expire_if_current(&self, generation: u64) -> bool {
        {
            let mut state = self.write();
            if state.generation != generation {
                debug!("Session changed since refresh started, not expiring it");
                return false;
            }
            if let Err(e) = self.clear_locked(&mut state) {
                warn!("Session expired but could not be fully cleared: {}", e);
            }
        }
        self.announce_expiry();
        true
    }

    fn announce_expiry(&self) {
        info!("Session expired, reauthentication required");
        self.publish(SessionEvent::Expired);
    }

    /// Clear the session after an explicit logout
    pub fn logout(&self) -> Result<()> {
        let result = self.clear();
        info!("Logged out");
        self.publish(SessionEvent::LoggedOut);
        result
    }
}

#[derive(Debug, Default)]
pub struct SessionBuilder {
    stores: Vec<Arc<dyn CredentialStore>>,
}

impl SessionBuilder {
    /// Attach a store. The first store attached is the primary one.
    pub fn store(mut self, store: Arc<dyn CredentialStore>) -> Self {
        self.stores.push(store);
        self
    }

    /// Build an empty session
    pub fn build(self) -> Session {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Session {
            state: RwLock::new(State::default()),
            stores: self.stores,
            events,
        }
    }

    /// Build a session seeded from the primary store, mirroring the restored
    /// state into the other stores
    pub fn restore(self) -> Result<Session> {
        let restored = match self.stores.first() {
            Some(primary) => primary.load()?,
            None => None,
        };

        let session = self.build();
        if let Some(state) = restored {
            debug!("Restored session from persisted credentials");
            session.update(|current| *current = state)?;
        }
        Ok(session)
    }
}
