//! Connection status reporting and remote logout for linked identities.

use std::sync::Arc;

use serde::Serialize;

use crate::error::StatusError;
use crate::identity::{IdentityStore, LocalIdentity, LoginId};
use crate::network::RemoteClient;
use crate::registry::SessionRegistry;

/// Transport-level flags of a live client.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConnInfo {
    pub is_connected: bool,
    pub is_logged_in: bool,
}

/// Snapshot of one linked account. Empty strings mean "not known".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConnectionStatus {
    pub has_session: bool,
    pub management_room: String,
    pub conn: ConnInfo,
    pub jid: String,
    pub phone: String,
    pub platform: String,
}

impl ConnectionStatus {
    /// Read the client's flags without conflating them.
    pub fn from_client(client: &dyn RemoteClient, management_room: Option<String>) -> Self {
        let mut status = Self {
            has_session: client.has_session(),
            management_room: management_room.unwrap_or_default(),
            conn: ConnInfo {
                is_connected: client.is_connected(),
                is_logged_in: client.is_logged_in(),
            },
            ..Self::default()
        };
        if let Some(address) = client.address() {
            status.jid = address.to_string();
            status.phone = address.phone();
            if let Some(platform) = client.platform().filter(|p| !p.is_empty()) {
                status.platform = platform;
            }
        }
        status
    }
}

/// Result of a logout pass over every linked login of an identity.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LogoutReport {
    pub logged_out: Vec<LoginId>,
    pub failed: Vec<LoginId>,
}

#[derive(Clone)]
pub struct StatusReporter {
    store: Arc<dyn IdentityStore>,
    registry: Arc<SessionRegistry>,
}

impl StatusReporter {
    pub fn new(store: Arc<dyn IdentityStore>, registry: Arc<SessionRegistry>) -> Self {
        Self { store, registry }
    }

    /// Status of the identity's current login.
    ///
    /// The current login is the newest active one with a live client.
    pub async fn status(&self, identity: &LocalIdentity) -> Result<ConnectionStatus, StatusError> {
        let client = self
            .current_client(identity)
            .await?
            .ok_or_else(|| StatusError::NotLoggedIn(identity.to_string()))?;
        let management_room = self
            .store
            .management_room(identity)
            .await
            .map_err(StatusError::ManagementRoom)?;
        Ok(ConnectionStatus::from_client(client.as_ref(), management_room))
    }

    /// Log every live login of the identity out of the remote network.
    ///
    /// Local session records stay in the store.
    pub async fn logout_all(&self, identity: &LocalIdentity) -> Result<LogoutReport, StatusError> {
        let logins = self.registry.logins_for(identity).await;
        if logins.is_empty() {
            return Err(StatusError::NotLoggedIn(identity.to_string()));
        }

        let mut report = LogoutReport::default();
        for login in logins {
            let Some(client) = self.registry.client(identity, &login).await else {
                continue;
            };
            match client.logout_remote().await {
                Ok(()) => report.logged_out.push(login),
                Err(e) => {
                    tracing::warn!(identity = %identity, login = %login, "Remote logout failed: {}", e);
                    report.failed.push(login);
                }
            }
        }
        tracing::info!(
            identity = %identity,
            logged_out = report.logged_out.len(),
            "Logged out remote sessions"
        );
        Ok(report)
    }

    async fn current_client(
        &self,
        identity: &LocalIdentity,
    ) -> Result<Option<Arc<dyn RemoteClient>>, StatusError> {
        let logins = self.store.list_logins(identity).await?;
        for login in logins.iter().rev().filter(|l| l.is_active()) {
            if let Some(client) = self.registry.client(identity, &login.id).await {
                return Ok(Some(client));
            }
        }
        Ok(None)
    }
}
