//! Supersession of older linked sessions after a successful link.

use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::error::StoreError;
use crate::identity::{IdentityStore, LocalIdentity, LoginId};
use crate::registry::SessionRegistry;

/// Logout reason recorded on sessions replaced by a newer link.
pub const LOGIN_OVERRIDDEN: &str = "LOGIN_OVERRIDDEN";

/// Outcome of one supersession pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SupersedeReport {
    pub superseded: Vec<LoginId>,
    pub failed: Vec<LoginId>,
}

/// Marks every other session of an identity logged out once a new one completes.
#[derive(Clone)]
pub struct CompletionSupervisor {
    store: Arc<dyn IdentityStore>,
    registry: Arc<SessionRegistry>,
}

impl CompletionSupervisor {
    pub fn new(store: Arc<dyn IdentityStore>, registry: Arc<SessionRegistry>) -> Self {
        Self { store, registry }
    }

    /// Run a pass on its own task, unaffected by the pairing session ending.
    pub fn spawn(
        &self,
        identity: LocalIdentity,
        keep: LoginId,
    ) -> JoinHandle<Result<SupersedeReport, StoreError>> {
        let supervisor = self.clone();
        tokio::spawn(async move { supervisor.supersede(&identity, &keep).await })
    }

    /// Mark every session of `identity` linked before `keep` logged out.
    ///
    /// A pass for a login that has itself been overtaken by a newer active
    /// login does nothing, so racing completions leave the newest one active.
    /// Safe to repeat: already logged-out sessions stay as they are.
    pub async fn supersede(
        &self,
        identity: &LocalIdentity,
        keep: &LoginId,
    ) -> Result<SupersedeReport, StoreError> {
        let mut logins = self.store.list_logins(identity).await?;
        let mut report = SupersedeReport::default();

        let Some(position) = logins.iter().position(|login| &login.id == keep) else {
            return Err(StoreError::NotFound {
                entity: "login".to_string(),
                id: keep.to_string(),
            });
        };
        if let Some(newer) = logins[position + 1..].iter().find(|login| login.is_active()) {
            tracing::debug!(
                identity = %identity,
                login = %keep,
                newer = %newer.id,
                "Skipping supersession, a newer login is active"
            );
            return Ok(report);
        }
        logins.truncate(position);

        for login in logins {
            match self
                .store
                .mark_logged_out(identity, &login.id, LOGIN_OVERRIDDEN)
                .await
            {
                Ok(()) => {
                    self.registry.remove_client(identity, &login.id).await;
                    report.superseded.push(login.id);
                }
                Err(e) => {
                    tracing::warn!(
                        identity = %identity,
                        login = %login.id,
                        "Failed to mark superseded login as logged out: {}",
                        e
                    );
                    report.failed.push(login.id);
                }
            }
        }

        if !report.superseded.is_empty() {
            tracing::info!(
                identity = %identity,
                kept = %keep,
                superseded = report.superseded.len(),
                "Superseded older logins"
            );
        }
        Ok(report)
    }
}
