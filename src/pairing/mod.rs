//! Linking a remote account to a local identity.

pub mod frames;
pub mod phone;
pub mod session;
pub mod supervisor;

pub use frames::ServerFrame;
pub use session::{FrameSink, PairingController, PairingRequest, SessionOutcome};
pub use supervisor::{CompletionSupervisor, LOGIN_OVERRIDDEN, SupersedeReport};
