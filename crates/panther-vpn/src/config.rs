//! Tunnel Configuration
//!
//! Builds the structured interface-plus-peer record handed to the tunnel
//! engine. The build is a pure transformation of a registration result and
//! the device private key; every field is validated here, because the
//! engine's own rejection errors are far less diagnosable.

use crate::keys::{PrivateKey, PublicKey};
use crate::registration::RegistrationResult;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use thiserror::Error;

/// Keepalive interval keeping NAT bindings warm
pub const PERSISTENT_KEEPALIVE_SECS: u32 = 25;

/// Full-tunnel routing, both address families
pub const FULL_TUNNEL_ALLOWED_IPS: [&str; 2] = ["0.0.0.0/0", "::/0"];

/// Interface half of a tunnel configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterfaceConfig {
    /// Device private key (base64)
    pub private_key: String,
    /// Interface addresses, CIDR notation
    pub addresses: Vec<String>,
    /// DNS resolvers; empty means do not override
    pub dns: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mtu: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub listen_port: Option<u16>,
}

/// Peer half of a tunnel configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerConfig {
    /// Server public key (base64)
    pub public_key: String,
    /// Routed ranges, CIDR notation
    #[serde(rename = "allowedIPs")]
    pub allowed_ips: Vec<String>,
    /// Server endpoint, "host:port"
    pub endpoint: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preshared_key: Option<String>,
    pub persistent_keepalive: u32,
}

/// Structured configuration for one single-peer tunnel.
///
/// Serializes to the shape the engine adapter consumes. Replaced wholesale
/// on every update; fields are never patched individually.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TunnelConfiguration {
    /// Display name, e.g. "Panther - Helsinki"
    pub name: String,
    /// Tag identifying the engine binding this profile targets
    pub provider_identity: String,
    pub interface: InterfaceConfig,
    pub peers: Vec<PeerConfig>,
}

/// Configuration build errors
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Invalid key: {0}")]
    InvalidKey(&'static str),

    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),
}

/// Pure builder from registration output to a tunnel configuration.
pub struct TunnelConfigBuilder;

impl TunnelConfigBuilder {
    /// Build a configuration. Deterministic, no I/O.
    pub fn build(
        result: &RegistrationResult,
        private_key_b64: &str,
        display_name: &str,
        provider_identity: &str,
    ) -> Result<TunnelConfiguration, ConfigError> {
        validate_cidr(&result.assigned_address_cidr)?;

        PrivateKey::from_base64(private_key_b64)
            .map_err(|_| ConfigError::InvalidKey("device private key"))?;
        PublicKey::from_base64(&result.server_public_key)
            .map_err(|_| ConfigError::InvalidKey("peer public key"))?;

        validate_endpoint(&result.endpoint)?;

        Ok(TunnelConfiguration {
            name: display_name.to_string(),
            provider_identity: provider_identity.to_string(),
            interface: InterfaceConfig {
                private_key: private_key_b64.to_string(),
                addresses: vec![result.assigned_address_cidr.clone()],
                dns: result.dns.clone(),
                mtu: None,
                listen_port: None,
            },
            peers: vec![PeerConfig {
                public_key: result.server_public_key.clone(),
                allowed_ips: FULL_TUNNEL_ALLOWED_IPS
                    .iter()
                    .map(|s| s.to_string())
                    .collect(),
                endpoint: result.endpoint.clone(),
                preshared_key: None,
                persistent_keepalive: PERSISTENT_KEEPALIVE_SECS,
            }],
        })
    }
}

/// Parse CIDR notation (e.g., "10.66.0.7/32"), checking prefix bounds
/// per address family.
fn validate_cidr(cidr: &str) -> Result<(), ConfigError> {
    let bad = || ConfigError::InvalidAddress(cidr.to_string());

    let (ip_part, prefix_part) = cidr.split_once('/').ok_or_else(bad)?;
    let ip: IpAddr = ip_part.parse().map_err(|_| bad())?;
    let prefix: u8 = prefix_part.parse().map_err(|_| bad())?;

    let max = match ip {
        IpAddr::V4(_) => 32,
        IpAddr::V6(_) => 128,
    };
    if prefix > max {
        return Err(bad());
    }
    Ok(())
}

/// Validate a "host:port" endpoint. Hostnames and bracketed IPv6 literals
/// are both accepted; the port must be non-zero.
fn validate_endpoint(endpoint: &str) -> Result<(), ConfigError> {
    let bad = || ConfigError::InvalidEndpoint(endpoint.to_string());

    let (host, port_part) = endpoint.rsplit_once(':').ok_or_else(bad)?;
    if host.is_empty() {
        return Err(bad());
    }

    if let Some(inner) = host.strip_prefix('[') {
        let inner = inner.strip_suffix(']').ok_or_else(bad)?;
        let ip: IpAddr = inner.parse().map_err(|_| bad())?;
        if !matches!(ip, IpAddr::V6(_)) {
            return Err(bad());
        }
    } else if host.contains(':') {
        // Unbracketed IPv6 is ambiguous with the port separator
        return Err(bad());
    }

    let port: u16 = port_part.parse().map_err(|_| bad())?;
    if port == 0 {
        return Err(bad());
    }
    Ok(())
}
