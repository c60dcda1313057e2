//! Links remote messaging accounts to local bridge identities.
//!
//! A client opens the login channel, receives QR or pairing codes while the
//! remote network completes the handshake, and ends with exactly one success
//! or error frame. Older sessions of the same identity are superseded once a
//! new link completes.

pub mod config;
pub mod error;
pub mod identity;
pub mod logging;
pub mod network;
pub mod pairing;
pub mod provisioning;
pub mod registry;
pub mod status;
