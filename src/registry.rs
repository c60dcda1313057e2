//! Registry of live pairing sessions and linked remote clients.
//!
//! Passed explicitly to the controller, the completion supervisor and the
//! status endpoints instead of living in process-wide state.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::RwLock;

use crate::identity::{LocalIdentity, LoginId};
use crate::network::RemoteClient;

/// Live client handles keyed by identity and login, plus a count of open
/// pairing sessions.
///
/// Login ids are only unique per identity: two identities may link the same
/// remote account.
#[derive(Default)]
pub struct SessionRegistry {
    clients: RwLock<HashMap<LocalIdentity, HashMap<LoginId, Arc<dyn RemoteClient>>>>,
    active_pairings: Arc<AtomicU64>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a pairing session for as long as the returned guard lives.
    pub fn begin_pairing(&self) -> PairingGuard {
        self.active_pairings.fetch_add(1, Ordering::Relaxed);
        PairingGuard {
            counter: Arc::clone(&self.active_pairings),
        }
    }

    pub fn active_pairings(&self) -> u64 {
        self.active_pairings.load(Ordering::Relaxed)
    }

    pub async fn register_client(
        &self,
        identity: LocalIdentity,
        login: LoginId,
        client: Arc<dyn RemoteClient>,
    ) {
        tracing::debug!(login = %login, identity = %identity, "Registered remote client");
        self.clients
            .write()
            .await
            .entry(identity)
            .or_default()
            .insert(login, client);
    }

    pub async fn client(
        &self,
        identity: &LocalIdentity,
        login: &LoginId,
    ) -> Option<Arc<dyn RemoteClient>> {
        self.clients
            .read()
            .await
            .get(identity)
            .and_then(|clients| clients.get(login))
            .cloned()
    }

    pub async fn remove_client(
        &self,
        identity: &LocalIdentity,
        login: &LoginId,
    ) -> Option<Arc<dyn RemoteClient>> {
        let mut clients = self.clients.write().await;
        let per_identity = clients.get_mut(identity)?;
        let removed = per_identity.remove(login);
        if per_identity.is_empty() {
            clients.remove(identity);
        }
        removed
    }

    /// Logins with a live client for `identity`.
    pub async fn logins_for(&self, identity: &LocalIdentity) -> Vec<LoginId> {
        let mut logins: Vec<LoginId> = self
            .clients
            .read()
            .await
            .get(identity)
            .map(|clients| clients.keys().cloned().collect())
            .unwrap_or_default();
        logins.sort();
        logins
    }
}

/// Decrements the active pairing count on drop.
pub struct PairingGuard {
    counter: Arc<AtomicU64>,
}

impl Drop for PairingGuard {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::Relaxed);
    }
}
