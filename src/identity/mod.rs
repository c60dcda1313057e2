//! Local identities and the sessions linked to them.
//!
//! The durable store is owned by the bridge; this module only defines the
//! contract the provisioning core relies on.

mod memory;

pub use memory::InMemoryIdentityStore;

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// Bridge-side account on whose behalf remote accounts are linked.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocalIdentity(String);

impl LocalIdentity {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LocalIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of one linked session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LoginId(String);

impl LoginId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LoginId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum LoginState {
    Active,
    LoggedOut { reason: String },
}

/// A remote account linked to a local identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkedSession {
    pub id: LoginId,
    pub identity: LocalIdentity,
    pub state: LoginState,
    pub created_at: DateTime<Utc>,
}

impl LinkedSession {
    pub fn new(id: LoginId, identity: LocalIdentity) -> Self {
        Self {
            id,
            identity,
            state: LoginState::Active,
            created_at: Utc::now(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.state == LoginState::Active
    }
}

/// Durable store of linked sessions, safe to share across sessions.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// All sessions ever linked for `identity`, in the order they were linked.
    async fn list_logins(&self, identity: &LocalIdentity)
    -> Result<Vec<LinkedSession>, StoreError>;

    /// Record a newly linked session. Relinking an existing id replaces the
    /// old record and moves it to the end of the list.
    async fn insert_login(&self, session: LinkedSession) -> Result<(), StoreError>;

    /// Mark a session logged out. Marking an already logged-out session is a no-op.
    async fn mark_logged_out(
        &self,
        identity: &LocalIdentity,
        login: &LoginId,
        reason: &str,
    ) -> Result<(), StoreError>;

    async fn management_room(&self, identity: &LocalIdentity)
    -> Result<Option<String>, StoreError>;
}
