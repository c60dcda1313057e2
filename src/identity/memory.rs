//! In-process identity store.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::StoreError;
use crate::identity::{IdentityStore, LinkedSession, LocalIdentity, LoginId, LoginState};

/// Identity store kept in memory. Lost on restart.
#[derive(Debug, Default)]
pub struct InMemoryIdentityStore {
    logins: RwLock<HashMap<LocalIdentity, Vec<LinkedSession>>>,
    management_rooms: RwLock<HashMap<LocalIdentity, String>>,
}

impl InMemoryIdentityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_management_room(&self, identity: LocalIdentity, room: impl Into<String>) {
        self.management_rooms
            .write()
            .await
            .insert(identity, room.into());
    }
}

#[async_trait]
impl IdentityStore for InMemoryIdentityStore {
    async fn list_logins(
        &self,
        identity: &LocalIdentity,
    ) -> Result<Vec<LinkedSession>, StoreError> {
        Ok(self
            .logins
            .read()
            .await
            .get(identity)
            .cloned()
            .unwrap_or_default())
    }

    async fn insert_login(&self, session: LinkedSession) -> Result<(), StoreError> {
        let mut logins = self.logins.write().await;
        let entries = logins.entry(session.identity.clone()).or_default();
        entries.retain(|s| s.id != session.id);
        entries.push(session);
        Ok(())
    }

    async fn mark_logged_out(
        &self,
        identity: &LocalIdentity,
        login: &LoginId,
        reason: &str,
    ) -> Result<(), StoreError> {
        let mut logins = self.logins.write().await;
        let session = logins
            .get_mut(identity)
            .and_then(|entries| entries.iter_mut().find(|s| &s.id == login))
            .ok_or_else(|| StoreError::NotFound {
                entity: "login".to_string(),
                id: login.to_string(),
            })?;
        if session.is_active() {
            session.state = LoginState::LoggedOut {
                reason: reason.to_string(),
            };
        }
        Ok(())
    }

    async fn management_room(
        &self,
        identity: &LocalIdentity,
    ) -> Result<Option<String>, StoreError> {
        Ok(self.management_rooms.read().await.get(identity).cloned())
    }
}
