//! HTTP and WebSocket provisioning surface.

pub mod auth;
pub mod server;
pub mod types;
pub mod ws;

pub use server::{ProvisioningState, router, start_server};
