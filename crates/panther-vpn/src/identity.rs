//! Device Identity
//!
//! One long-lived X25519 keypair and one install identifier per
//! installation, kept in the secret store. The private key is created on
//! first use and reused for every registration after that.

use crate::keys::{KeyPair, PrivateKey, PublicKey};
use crate::secret_store::{
    INSTALL_ID_ENTRY, PRIVATE_KEY_ENTRY, PUBLIC_KEY_ENTRY, SecretStore, SecretStoreError,
};
use std::sync::Arc;
use tracing::{debug, info};

/// Identity errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum IdentityError {
    #[error("Identity storage unavailable: {0}")]
    Unavailable(String),

    #[error("Stored identity entry is corrupt: {0}")]
    Corrupt(&'static str),
}

impl From<SecretStoreError> for IdentityError {
    fn from(e: SecretStoreError) -> Self {
        match e {
            SecretStoreError::Unavailable(msg) => IdentityError::Unavailable(msg),
        }
    }
}

/// Device identity backed by a secret store.
///
/// All accessors are get-or-create: the first call mints the material, every
/// later call returns the same values.
pub struct DeviceIdentity {
    store: Arc<dyn SecretStore>,
}

impl DeviceIdentity {
    /// Create an identity over the given store
    pub fn new(store: Arc<dyn SecretStore>) -> Self {
        Self { store }
    }

    /// Load the device keypair, generating and persisting one if absent.
    pub fn get_or_create(&self) -> Result<KeyPair, IdentityError> {
        if let Some(bytes) = self.store.get(PRIVATE_KEY_ENTRY)? {
            let arr: [u8; 32] = bytes
                .as_slice()
                .try_into()
                .map_err(|_| IdentityError::Corrupt(PRIVATE_KEY_ENTRY))?;
            debug!("Loaded existing device key");
            return Ok(KeyPair::from_private(PrivateKey::from_bytes(arr)));
        }

        let pair = KeyPair::generate();
        self.store.set(PRIVATE_KEY_ENTRY, &pair.private.to_bytes())?;
        self.store
            .set(PUBLIC_KEY_ENTRY, pair.public.to_base64().as_bytes())?;
        info!("Generated new device key (public: {})", pair.public);
        Ok(pair)
    }

    /// Base64 of the device public key, from the cached entry when present.
    pub fn public_key_encoded(&self) -> Result<String, IdentityError> {
        if let Some(bytes) = self.store.get(PUBLIC_KEY_ENTRY)? {
            let cached = String::from_utf8(bytes)
                .map_err(|_| IdentityError::Corrupt(PUBLIC_KEY_ENTRY))?;
            // Reject a cache entry that no longer decodes to a key.
            PublicKey::from_base64(&cached)
                .map_err(|_| IdentityError::Corrupt(PUBLIC_KEY_ENTRY))?;
            return Ok(cached);
        }

        let pair = self.get_or_create()?;
        let encoded = pair.public.to_base64();
        self.store.set(PUBLIC_KEY_ENTRY, encoded.as_bytes())?;
        Ok(encoded)
    }

    /// Base64 of the device private key
    pub fn private_key_encoded(&self) -> Result<String, IdentityError> {
        Ok(self.get_or_create()?.private.to_base64())
    }

    /// Stable install identifier, minted once and reused.
    pub fn install_id(&self) -> Result<String, IdentityError> {
        if let Some(bytes) = self.store.get(INSTALL_ID_ENTRY)? {
            return String::from_utf8(bytes).map_err(|_| IdentityError::Corrupt(INSTALL_ID_ENTRY));
        }

        let id = uuid::Uuid::new_v4().to_string();
        self.store.set(INSTALL_ID_ENTRY, id.as_bytes())?;
        info!("Generated install id");
        Ok(id)
    }

    /// Remove every stored identity entry.
    pub fn wipe(&self) -> Result<(), IdentityError> {
        self.store.delete(PRIVATE_KEY_ENTRY)?;
        self.store.delete(PUBLIC_KEY_ENTRY)?;
        self.store.delete(INSTALL_ID_ENTRY)?;
        info!("Device identity wiped");
        Ok(())
    }
}
