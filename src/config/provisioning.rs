use std::fmt::Write as _;
use std::net::{IpAddr, SocketAddr};

use rand::RngCore;
use rand::rngs::OsRng;
use secrecy::SecretString;

use crate::config::helpers::{optional_env, parse_optional_env};
use crate::error::ConfigError;

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 29318;

/// Provisioning API listener configuration.
#[derive(Debug, Clone)]
pub struct ProvisioningConfig {
    pub host: String,
    pub port: u16,
    /// Shared secret for the API. Random hex generated at startup if unset.
    pub shared_secret: SecretString,
    /// Whether `shared_secret` was generated rather than configured.
    pub secret_generated: bool,
}

impl ProvisioningConfig {
    pub(crate) fn resolve() -> Result<Self, ConfigError> {
        let (shared_secret, secret_generated) = match optional_env("PROVISIONING_SHARED_SECRET")? {
            Some(secret) => (SecretString::from(secret), false),
            None => (SecretString::from(generate_secret()), true),
        };

        Ok(Self {
            host: optional_env("PROVISIONING_HOST")?.unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: parse_optional_env("PROVISIONING_PORT", DEFAULT_PORT, "a valid port number")?,
            shared_secret,
            secret_generated,
        })
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        let ip: IpAddr = self.host.parse().map_err(|e| ConfigError::InvalidValue {
            key: "PROVISIONING_HOST".to_string(),
            message: format!("must be an IP address: {e}"),
        })?;
        Ok(SocketAddr::new(ip, self.port))
    }
}

/// 32 random bytes, hex encoded.
fn generate_secret() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    let mut output = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(&mut output, "{:02x}", byte);
    }
    output
}
