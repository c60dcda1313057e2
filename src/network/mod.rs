//! Capability traits for the remote messaging network.
//!
//! The pairing core never sees a concrete network client. It drives a
//! [`LoginHandle`] obtained from a [`LoginCapable`] connector and reads live
//! connection facts through [`StatusReportable`].

pub mod mock;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::LoginError;
use crate::identity::{LinkedSession, LocalIdentity};

/// How the remote account is going to be linked. Fixed for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginFlow {
    Qr,
    PhoneCode,
}

impl LoginFlow {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Qr => "qr",
            Self::PhoneCode => "phone",
        }
    }
}

impl fmt::Display for LoginFlow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Advisory options forwarded to the remote network when a login is created.
#[derive(Debug, Clone, Default)]
pub struct LoginOptions {
    /// IANA zone name reported by the client, e.g. `Europe/Madrid`.
    pub timezone: Option<String>,
}

/// Input submitted to a login that is waiting for the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserInput {
    /// Normalized phone number, digits only.
    PhoneNumber(String),
}

/// Address of an account on the remote network (`user[:device]@server`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteAddress {
    pub user: String,
    pub device: Option<u16>,
    pub server: String,
}

impl RemoteAddress {
    pub const DEFAULT_SERVER: &'static str = "s.whatsapp.net";

    pub fn new(user: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            device: None,
            server: Self::DEFAULT_SERVER.to_string(),
        }
    }

    pub fn with_device(mut self, device: u16) -> Self {
        self.device = Some(device);
        self
    }

    /// Phone number in international notation, e.g. `+12345550123`.
    pub fn phone(&self) -> String {
        format!("+{}", self.user)
    }
}

impl fmt::Display for RemoteAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.device {
            Some(device) if device > 0 => write!(f, "{}:{}@{}", self.user, device, self.server),
            _ => write!(f, "{}@{}", self.user, self.server),
        }
    }
}

/// Result of a successful link, produced by the remote network.
///
/// The local session record has already been persisted by the time this
/// reaches the controller.
#[derive(Clone)]
pub struct LoginCompletion {
    pub session: LinkedSession,
    pub address: RemoteAddress,
    pub platform: String,
    /// Live client for the newly linked account.
    pub client: Arc<dyn RemoteClient>,
}

impl fmt::Debug for LoginCompletion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginCompletion")
            .field("session", &self.session)
            .field("address", &self.address)
            .field("platform", &self.platform)
            .finish_non_exhaustive()
    }
}

/// One step of a remote login flow.
#[derive(Debug, Clone)]
pub enum LoginStep {
    /// Scannable code and how long it stays valid.
    Qr {
        data: String,
        display_seconds: Option<u64>,
    },
    /// The flow is ready to accept a phone number.
    PhoneNumberPrompt,
    /// Short code the user types on their phone.
    PairingCode {
        data: String,
        display_seconds: Option<u64>,
    },
    /// Linking finished.
    Complete(Box<LoginCompletion>),
    /// Any step this service does not drive, e.g. a remote logout.
    Other { step_id: String },
}

impl LoginStep {
    /// Stable identifier used in logs and error messages.
    pub fn id(&self) -> &str {
        match self {
            Self::Qr { .. } => "qr",
            Self::PhoneNumberPrompt => "phone_number",
            Self::PairingCode { .. } => "pairing_code",
            Self::Complete(_) => "complete",
            Self::Other { step_id } => step_id,
        }
    }
}

/// One in-progress linking attempt against the remote network.
///
/// Owned by exactly one pairing session. `cancel` must be idempotent.
#[async_trait]
pub trait LoginHandle: Send + Sync {
    async fn start(&mut self) -> Result<LoginStep, LoginError>;

    async fn submit_user_input(&mut self, input: UserInput) -> Result<LoginStep, LoginError>;

    /// Suspend until the remote network produces the next step.
    async fn wait(&mut self) -> Result<LoginStep, LoginError>;

    async fn cancel(&mut self);
}

/// Connector able to create login handles for a local identity.
#[async_trait]
pub trait LoginCapable: Send + Sync {
    async fn create_login(
        &self,
        identity: &LocalIdentity,
        flow: LoginFlow,
        options: LoginOptions,
    ) -> Result<Box<dyn LoginHandle>, LoginError>;
}

/// Read-only view of a linked account's live state.
///
/// The flags are independent: an account can be authenticated while its
/// transport is down.
pub trait StatusReportable: Send + Sync {
    /// Whether the client holds stored credentials for the account.
    fn has_session(&self) -> bool;

    /// Whether the remote network reports the account as authenticated.
    fn is_logged_in(&self) -> bool;

    /// Whether the live transport connection is up.
    fn is_connected(&self) -> bool;

    fn address(&self) -> Option<RemoteAddress>;

    fn platform(&self) -> Option<String>;
}

/// Remote-side logout that leaves local records alone.
#[async_trait]
pub trait RemoteLogout: Send + Sync {
    async fn logout_remote(&self) -> Result<(), LoginError>;
}

/// Everything the provisioning surface needs from a live network client.
pub trait RemoteClient: StatusReportable + RemoteLogout {}

impl<T: StatusReportable + RemoteLogout> RemoteClient for T {}
