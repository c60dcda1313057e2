//! Error types for walink.

use serde::Serialize;

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Errors on the client-facing message channel.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Channel {name} failed to start: {reason}")]
    StartupFailed { name: String, reason: String },

    #[error("Channel {name} disconnected: {reason}")]
    Disconnected { name: String, reason: String },

    #[error("Failed to send frame on channel {name}: {reason}")]
    SendFailed { name: String, reason: String },
}

/// Rejection reasons for a user-supplied phone number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PhoneNumberError {
    /// Fewer than seven digits remained after stripping non-digits.
    #[error("Invalid phone number")]
    InvalidFormat,

    /// The number starts with a trunk prefix instead of a country code.
    #[error("Please enter the phone number in international format")]
    LeadingZero,
}

/// Structured error reported by the remote network or the bridge core.
///
/// Serializes to the `{"errcode": .., "error": ..}` shape clients already
/// understand. The HTTP status is kept for plain request/response endpoints
/// and never leaves the process on the login channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[error("{errcode}: {message}")]
pub struct RemoteError {
    pub errcode: String,
    #[serde(rename = "error")]
    pub message: String,
    #[serde(skip)]
    pub status: u16,
}

impl RemoteError {
    pub const UNKNOWN_ERRCODE: &'static str = "M_UNKNOWN";

    pub fn new(errcode: impl Into<String>, message: impl Into<String>, status: u16) -> Self {
        Self {
            errcode: errcode.into(),
            message: message.into(),
            status,
        }
    }

    /// Generic internal error carrying only a user-facing context message.
    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(Self::UNKNOWN_ERRCODE, message, 500)
    }
}

/// Errors returned by a login handle.
#[derive(Debug, Clone, thiserror::Error)]
pub enum LoginError {
    #[error("{0}")]
    Remote(RemoteError),

    #[error("Login was cancelled")]
    Cancelled,

    #[error("Login failed: {0}")]
    Failed(String),
}

/// Identity store errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    #[error("Identity store unavailable: {0}")]
    Unavailable(String),
}

/// Failures of the status and logout operations.
#[derive(Debug, thiserror::Error)]
pub enum StatusError {
    #[error("No linked session for {0}")]
    NotLoggedIn(String),

    #[error("Failed to get management room: {0}")]
    ManagementRoom(#[source] StoreError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Stage of the pairing flow at which a failure was detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairingStage {
    Create,
    Start,
    SubmitPhoneNumber,
    Wait,
}

impl PairingStage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Start => "start",
            Self::SubmitPhoneNumber => "submit_phone_number",
            Self::Wait => "wait",
        }
    }

    /// Client-facing message used when the remote failure carries no detail.
    pub fn failure_message(self) -> &'static str {
        match self {
            Self::Create => "Failed to create login",
            Self::Start => "Failed to start login",
            Self::SubmitPhoneNumber => "Failed to start phone code login",
            Self::Wait => "Failed to wait for login",
        }
    }
}

/// Point in the flow where a step arrived that the flow cannot accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnexpectedAt {
    PhoneStart,
    PhoneSubmitted,
    QrStart,
    Waiting,
}

impl UnexpectedAt {
    pub fn message(self) -> &'static str {
        match self {
            Self::PhoneStart => "Unexpected step while starting phone number login",
            Self::PhoneSubmitted => "Unexpected step after submitting phone number",
            Self::QrStart => "Unexpected step while starting QR login",
            Self::Waiting => "Unexpected step while waiting for login",
        }
    }
}

/// Terminal failure of one pairing session.
#[derive(Debug, thiserror::Error)]
pub enum PairingError {
    #[error("Invalid phone number: {0}")]
    InvalidPhoneNumber(#[from] PhoneNumberError),

    #[error("{}: got step {step}", .at.message())]
    UnexpectedStep { at: UnexpectedAt, step: String },

    #[error("Remote failure during {}: {source}", .stage.as_str())]
    Remote {
        stage: PairingStage,
        source: LoginError,
    },

    #[error("Transport failure: {0}")]
    Transport(#[from] ChannelError),

    #[error("Pairing cancelled by client")]
    Cancelled,
}

impl PairingError {
    /// Whether the client should still be told about this failure.
    ///
    /// Client closure and a broken channel leave nobody to write to.
    pub fn is_reportable(&self) -> bool {
        !matches!(self, Self::Cancelled | Self::Transport(_))
    }
}
