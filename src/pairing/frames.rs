//! JSON frames sent to the client over the login channel.

use serde::Serialize;

use crate::error::{LoginError, PairingError, RemoteError};
use crate::network::{LoginCompletion, LoginStep};

/// Display window sent with the first QR code.
pub const INITIAL_QR_TIMEOUT_SECS: u64 = 60;
/// Display window sent with each refreshed QR code.
pub const REFRESH_QR_TIMEOUT_SECS: u64 = 20;
/// Display window sent with a pairing code.
pub const PAIRING_CODE_TIMEOUT_SECS: u64 = 180;

pub const INVALID_PHONE_ERRCODE: &str = "invalid phone number";

/// Plain error body, shared with the request/response endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorBody {
    pub success: bool,
    pub error: String,
    pub errcode: String,
}

impl ErrorBody {
    pub fn new(error: impl Into<String>, errcode: impl Into<String>) -> Self {
        Self {
            success: false,
            error: error.into(),
            errcode: errcode.into(),
        }
    }
}

/// One server-to-client message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ServerFrame {
    Qr {
        code: String,
        timeout: u64,
    },
    PairingCode {
        pairing_code: String,
        timeout: u64,
    },
    Success {
        success: bool,
        jid: String,
        platform: String,
        phone: String,
    },
    Error(ErrorBody),
    Remote(RemoteError),
}

/// Map a login step to the frame the client sees.
///
/// `timeout` is the advisory display window for code-bearing steps. Steps the
/// client never sees directly (the phone prompt, unknown steps) map to `None`.
pub fn encode_step(step: &LoginStep, timeout: u64) -> Option<ServerFrame> {
    match step {
        LoginStep::Qr { data, .. } => Some(ServerFrame::Qr {
            code: data.clone(),
            timeout,
        }),
        LoginStep::PairingCode { data, .. } => Some(ServerFrame::PairingCode {
            pairing_code: data.clone(),
            timeout,
        }),
        LoginStep::Complete(done) => Some(success_frame(done)),
        LoginStep::PhoneNumberPrompt | LoginStep::Other { .. } => None,
    }
}

pub fn success_frame(done: &LoginCompletion) -> ServerFrame {
    ServerFrame::Success {
        success: true,
        jid: done.address.to_string(),
        platform: done.platform.clone(),
        phone: done.address.phone(),
    }
}

/// The single error frame reported for a terminal failure, if any.
///
/// Structured remote errors pass through verbatim; anything else becomes a
/// generic error carrying the stage's message so no internal detail leaks.
pub fn encode_error(err: &PairingError) -> Option<ServerFrame> {
    match err {
        PairingError::InvalidPhoneNumber(e) => Some(ServerFrame::Error(ErrorBody::new(
            e.to_string(),
            INVALID_PHONE_ERRCODE,
        ))),
        PairingError::UnexpectedStep { at, .. } => {
            Some(ServerFrame::Remote(RemoteError::unknown(at.message())))
        }
        PairingError::Remote {
            source: LoginError::Remote(remote),
            ..
        } => Some(ServerFrame::Remote(remote.clone())),
        PairingError::Remote { stage, .. } => Some(ServerFrame::Remote(RemoteError::unknown(
            stage.failure_message(),
        ))),
        PairingError::Transport(_) | PairingError::Cancelled => None,
    }
}
