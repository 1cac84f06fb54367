//! PantherVPN Core - Device Provisioning and Tunnel Sessions
//!
//! Everything a client app needs between "user taps Connect" and a running
//! WireGuard tunnel: a persistent device identity, the registration
//! exchange against the backend, tunnel configuration assembly, profile
//! installation, and the connect/disconnect session state machine.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                  TunnelSessionController                   │
//! │                                                            │
//! │  ┌──────────────┐   ┌──────────────┐   ┌───────────────┐   │
//! │  │   Device     │──▶│ Registration │──▶│ TunnelConfig  │   │
//! │  │   Identity   │   │   Client     │   │   Builder     │   │
//! │  └──────┬───────┘   └──────┬───────┘   └───────┬───────┘   │
//! │         │                  │                   │           │
//! │  ┌──────▼───────┐          ▼ HTTPS      ┌──────▼────────┐  │
//! │  │ SecretStore  │   ┌──────────────┐    │ TunnelProfile │  │
//! │  │ (keys, id)   │   │ /wg-register │    │    Store      │  │
//! │  └──────────────┘   └──────────────┘    └──────┬────────┘  │
//! │                                                │           │
//! └────────────────────────────────────────────────│───────────┘
//!                                                  ▼
//!                                         ┌───────────────┐
//!                                         │ TunnelEngine  │
//!                                         │ (OS provider) │
//!                                         └───────────────┘
//! ```
//!
//! # Features
//!
//! - **Stable identity**: X25519 keypair and install id created once,
//!   persisted in a pluggable secret store
//! - **Registration**: one POST to the backend, typed denial reasons
//! - **Deterministic configs**: same registration in, same bytes out
//! - **Single profile**: install reuses the existing slot, stale
//!   profiles from other builds are swept on connect
//! - **Serialized sessions**: one operation in flight at a time,
//!   polled status with bounded budgets
//!
//! # Security
//!
//! - Private keys never leave the secret store unencoded
//! - Key material redacted from Debug output
//! - TLS with webpki roots for the registration exchange

mod config;
mod controller;
mod engine;
mod identity;
mod keys;
mod profile;
mod region;
mod registration;
mod secret_store;

pub use config::{
    ConfigError, InterfaceConfig, PeerConfig, TunnelConfigBuilder, TunnelConfiguration,
    FULL_TUNNEL_ALLOWED_IPS, PERSISTENT_KEEPALIVE_SECS,
};
pub use controller::{SessionError, SessionState, SessionTimings, TunnelSessionController};
pub use engine::{EngineError, TunnelEngine, TunnelStatus, DEFAULT_PROVIDER_IDENTITY};
pub use identity::{DeviceIdentity, IdentityError};
pub use keys::{KeyError, KeyPair, PrivateKey, PublicKey};
pub use profile::{
    FileProfileBackend, MemoryProfileBackend, ProfileBackend, ProfileError, ProfileHandle,
    ProfileRecord, TunnelProfileStore,
};
pub use region::{RegionId, UnknownRegion};
pub use registration::{
    interpret_response, DenialReason, Registrar, RegistrationClient, RegistrationError,
    RegistrationResult,
};
pub use secret_store::{
    FileSecretStore, MemorySecretStore, SecretStore, SecretStoreError, INSTALL_ID_ENTRY,
    PRIVATE_KEY_ENTRY, PUBLIC_KEY_ENTRY,
};
