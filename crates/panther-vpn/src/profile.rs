//! Tunnel Profile Store
//!
//! Owns the persisted tunnel profiles on this host. At most one profile
//! authored by this system exists at a time: installs reuse the first slot,
//! updates replace the whole configuration, and profiles recorded against
//! an outdated engine binding are removed before a new install.

use crate::config::TunnelConfiguration;
use crate::engine::{TunnelEngine, TunnelStatus};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Profile store errors
#[derive(Debug, Clone, Error)]
pub enum ProfileError {
    #[error("Profile save failed: {0}")]
    Save(String),

    #[error("Profile load failed: {0}")]
    Load(String),

    #[error("Profile removal failed: {0}")]
    Remove(String),
}

/// One persisted profile: the configuration plus platform bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileRecord {
    pub id: u64,
    /// Platform enable flag, preserved across updates
    pub enabled: bool,
    pub config: TunnelConfiguration,
}

/// Opaque reference to an installed profile
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProfileHandle {
    id: u64,
}

/// Persistence behind the profile store.
pub trait ProfileBackend: Send + Sync {
    /// Load every persisted profile, ordered by slot id
    fn load_all(&self) -> Result<Vec<ProfileRecord>, ProfileError>;

    /// Persist one profile, replacing any record with the same id
    fn save(&self, record: &ProfileRecord) -> Result<(), ProfileError>;

    /// Remove a persisted profile if present
    fn remove(&self, id: u64) -> Result<(), ProfileError>;
}

/// Manages the single system-authored tunnel profile.
pub struct TunnelProfileStore {
    backend: Arc<dyn ProfileBackend>,
    engine: Arc<dyn TunnelEngine>,
    profiles: RwLock<Vec<ProfileRecord>>,
    next_id: AtomicU64,
}

impl TunnelProfileStore {
    /// Create a store, loading persisted profiles from the backend.
    pub fn new(
        backend: Arc<dyn ProfileBackend>,
        engine: Arc<dyn TunnelEngine>,
    ) -> Result<Self, ProfileError> {
        let profiles = backend.load_all()?;
        let next_id = profiles.iter().map(|p| p.id).max().map_or(1, |m| m + 1);

        debug!("Loaded {} persisted profile(s)", profiles.len());
        Ok(Self {
            backend,
            engine,
            profiles: RwLock::new(profiles),
            next_id: AtomicU64::new(next_id),
        })
    }

    /// Install a configuration, reusing the existing slot when one exists.
    ///
    /// The whole configuration is replaced; the platform enable flag of an
    /// updated slot is preserved. The backend write happens first, so a
    /// save failure leaves the prior profile untouched.
    pub async fn install_or_update(
        &self,
        config: TunnelConfiguration,
    ) -> Result<ProfileHandle, ProfileError> {
        let mut profiles = self.profiles.write().await;

        let record = match profiles.first() {
            Some(existing) => ProfileRecord {
                id: existing.id,
                enabled: existing.enabled,
                config,
            },
            None => ProfileRecord {
                id: self.next_id.fetch_add(1, Ordering::Relaxed),
                enabled: true,
                config,
            },
        };

        self.backend.save(&record)?;

        let handle = ProfileHandle { id: record.id };
        match profiles.first_mut() {
            Some(slot) => *slot = record,
            None => profiles.push(record),
        }

        info!("Installed tunnel profile (slot {})", handle.id);
        Ok(handle)
    }

    /// Remove every profile bound to a different engine identity.
    ///
    /// Removal failures are logged and swallowed; a leftover stale profile
    /// only costs another attempt next time.
    pub async fn remove_stale(&self, current_provider_identity: &str) {
        let mut profiles = self.profiles.write().await;
        let mut removed = 0usize;

        profiles.retain(|record| {
            if record.config.provider_identity == current_provider_identity {
                return true;
            }
            match self.backend.remove(record.id) {
                Ok(()) => {
                    removed += 1;
                    false
                }
                Err(e) => {
                    warn!("Failed to remove stale profile {}: {}", record.id, e);
                    true
                }
            }
        });

        if removed > 0 {
            info!("Removed {} stale profile(s)", removed);
        }
    }

    /// Handle of the installed profile, if any
    pub async fn current_profile(&self) -> Option<ProfileHandle> {
        self.profiles
            .read()
            .await
            .first()
            .map(|record| ProfileHandle { id: record.id })
    }

    /// Configuration of the installed profile, if any
    pub async fn current_config(&self) -> Option<TunnelConfiguration> {
        self.profiles
            .read()
            .await
            .first()
            .map(|record| record.config.clone())
    }

    /// Observe the live status behind a handle.
    ///
    /// An unknown handle, or a profile bound to a different engine identity,
    /// reads as `Invalid`. Status is observed from the engine, never set.
    pub async fn status(&self, handle: ProfileHandle) -> TunnelStatus {
        let profiles = self.profiles.read().await;

        let Some(record) = profiles.iter().find(|r| r.id == handle.id) else {
            return TunnelStatus::Invalid;
        };
        if record.config.provider_identity != self.engine.provider_identity() {
            return TunnelStatus::Invalid;
        }

        self.engine.status()
    }
}

/// In-memory backend, with failure injection for tests.
#[derive(Default)]
pub struct MemoryProfileBackend {
    state: std::sync::Mutex<MemoryBackendState>,
}

#[derive(Default)]
struct MemoryBackendState {
    records: Vec<ProfileRecord>,
    fail_next_save: bool,
    fail_next_remove: bool,
}

impl MemoryProfileBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `save` fail
    pub fn fail_next_save(&self) {
        self.state.lock().unwrap().fail_next_save = true;
    }

    /// Make the next `remove` fail
    pub fn fail_next_remove(&self) {
        self.state.lock().unwrap().fail_next_remove = true;
    }
}

impl ProfileBackend for MemoryProfileBackend {
    fn load_all(&self) -> Result<Vec<ProfileRecord>, ProfileError> {
        let mut records = self.state.lock().unwrap().records.clone();
        records.sort_by_key(|r| r.id);
        Ok(records)
    }

    fn save(&self, record: &ProfileRecord) -> Result<(), ProfileError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_next_save {
            state.fail_next_save = false;
            return Err(ProfileError::Save("injected save failure".to_string()));
        }

        match state.records.iter_mut().find(|r| r.id == record.id) {
            Some(slot) => *slot = record.clone(),
            None => state.records.push(record.clone()),
        }
        Ok(())
    }

    fn remove(&self, id: u64) -> Result<(), ProfileError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_next_remove {
            state.fail_next_remove = false;
            return Err(ProfileError::Remove("injected remove failure".to_string()));
        }

        state.records.retain(|r| r.id != id);
        Ok(())
    }
}

/// File backend: all records in one JSON file, written to a temp file and
/// renamed into place.
pub struct FileProfileBackend {
    path: PathBuf,
}

impl FileProfileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn read_records(&self) -> Result<Vec<ProfileRecord>, ProfileError> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(ProfileError::Load(e.to_string())),
        };
        serde_json::from_str(&content).map_err(|e| ProfileError::Load(e.to_string()))
    }

    fn write_records(&self, records: &[ProfileRecord]) -> Result<(), ProfileError> {
        let json = serde_json::to_string_pretty(records)
            .map_err(|e| ProfileError::Save(e.to_string()))?;

        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, json).map_err(|e| ProfileError::Save(e.to_string()))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| ProfileError::Save(e.to_string()))
    }
}

impl ProfileBackend for FileProfileBackend {
    fn load_all(&self) -> Result<Vec<ProfileRecord>, ProfileError> {
        let mut records = self.read_records()?;
        records.sort_by_key(|r| r.id);
        Ok(records)
    }

    fn save(&self, record: &ProfileRecord) -> Result<(), ProfileError> {
        let mut records = self
            .read_records()
            .map_err(|e| ProfileError::Save(e.to_string()))?;

        match records.iter_mut().find(|r| r.id == record.id) {
            Some(slot) => *slot = record.clone(),
            None => records.push(record.clone()),
        }
        self.write_records(&records)
    }

    fn remove(&self, id: u64) -> Result<(), ProfileError> {
        let mut records = self
            .read_records()
            .map_err(|e| ProfileError::Remove(e.to_string()))?;
        records.retain(|r| r.id != id);
        self.write_records(&records)
            .map_err(|e| ProfileError::Remove(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TunnelConfigBuilder;
    use crate::engine::DEFAULT_PROVIDER_IDENTITY;
    use crate::engine::testing::FakeEngine;
    use crate::keys::KeyPair;
    use crate::registration::RegistrationResult;

    fn config_for(provider_identity: &str, endpoint: &str) -> TunnelConfiguration {
        let result = RegistrationResult {
            assigned_address_cidr: "10.10.0.2/32".to_string(),
            server_public_key: KeyPair::generate().public.to_base64(),
            endpoint: endpoint.to_string(),
            dns: vec!["1.1.1.1".to_string()],
        };
        TunnelConfigBuilder::build(
            &result,
            &KeyPair::generate().private.to_base64(),
            "Panther - Helsinki",
            provider_identity,
        )
        .unwrap()
    }

    fn store_with(
        backend: Arc<MemoryProfileBackend>,
        engine: Arc<FakeEngine>,
    ) -> TunnelProfileStore {
        TunnelProfileStore::new(backend, engine).unwrap()
    }

    #[tokio::test]
    async fn test_install_creates_single_slot() {
        let backend = Arc::new(MemoryProfileBackend::new());
        let store = store_with(backend.clone(), Arc::new(FakeEngine::new()));

        let first = config_for(DEFAULT_PROVIDER_IDENTITY, "a.example:51820");
        let second = config_for(DEFAULT_PROVIDER_IDENTITY, "b.example:51820");

        let h1 = store.install_or_update(first).await.unwrap();
        let h2 = store.install_or_update(second.clone()).await.unwrap();

        // Same slot reused, second config wins
        assert_eq!(h1, h2);
        let records = backend.load_all().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].config, second);
        assert!(records[0].enabled);
    }

    #[tokio::test]
    async fn test_update_preserves_enabled_flag() {
        let backend = Arc::new(MemoryProfileBackend::new());
        backend
            .save(&ProfileRecord {
                id: 7,
                enabled: false,
                config: config_for(DEFAULT_PROVIDER_IDENTITY, "a.example:51820"),
            })
            .unwrap();

        let store = store_with(backend.clone(), Arc::new(FakeEngine::new()));
        store
            .install_or_update(config_for(DEFAULT_PROVIDER_IDENTITY, "b.example:51820"))
            .await
            .unwrap();

        let records = backend.load_all().unwrap();
        assert_eq!(records.len(), 1);
        assert!(!records[0].enabled);
    }

    #[tokio::test]
    async fn test_save_failure_leaves_prior_profile() {
        let backend = Arc::new(MemoryProfileBackend::new());
        let store = store_with(backend.clone(), Arc::new(FakeEngine::new()));

        let first = config_for(DEFAULT_PROVIDER_IDENTITY, "a.example:51820");
        store.install_or_update(first.clone()).await.unwrap();

        backend.fail_next_save();
        let result = store
            .install_or_update(config_for(DEFAULT_PROVIDER_IDENTITY, "b.example:51820"))
            .await;

        assert!(matches!(result, Err(ProfileError::Save(_))));
        assert_eq!(store.current_config().await.unwrap(), first);
        assert_eq!(backend.load_all().unwrap()[0].config, first);
    }

    #[tokio::test]
    async fn test_remove_stale_selectivity() {
        let backend = Arc::new(MemoryProfileBackend::new());
        backend
            .save(&ProfileRecord {
                id: 1,
                enabled: true,
                config: config_for(DEFAULT_PROVIDER_IDENTITY, "a.example:51820"),
            })
            .unwrap();
        backend
            .save(&ProfileRecord {
                id: 2,
                enabled: true,
                config: config_for("app.panthervpn.old.packetTunnel", "b.example:51820"),
            })
            .unwrap();

        let store = store_with(backend.clone(), Arc::new(FakeEngine::new()));
        store.remove_stale(DEFAULT_PROVIDER_IDENTITY).await;

        let records = backend.load_all().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(
            records[0].config.provider_identity,
            DEFAULT_PROVIDER_IDENTITY
        );
    }

    #[tokio::test]
    async fn test_remove_stale_failure_is_swallowed() {
        let backend = Arc::new(MemoryProfileBackend::new());
        backend
            .save(&ProfileRecord {
                id: 1,
                enabled: true,
                config: config_for("app.panthervpn.old.packetTunnel", "a.example:51820"),
            })
            .unwrap();

        let store = store_with(backend.clone(), Arc::new(FakeEngine::new()));
        backend.fail_next_remove();
        store.remove_stale(DEFAULT_PROVIDER_IDENTITY).await;

        // Still there; next pass gets another chance
        assert_eq!(backend.load_all().unwrap().len(), 1);
        assert!(store.current_profile().await.is_some());
    }

    #[tokio::test]
    async fn test_status_observes_engine() {
        let engine = Arc::new(FakeEngine::new());
        let store = store_with(Arc::new(MemoryProfileBackend::new()), engine.clone());

        let handle = store
            .install_or_update(config_for(DEFAULT_PROVIDER_IDENTITY, "a.example:51820"))
            .await
            .unwrap();

        engine.script_statuses([TunnelStatus::Connecting, TunnelStatus::Connected]);
        assert_eq!(store.status(handle).await, TunnelStatus::Connecting);
        assert_eq!(store.status(handle).await, TunnelStatus::Connected);
    }

    #[tokio::test]
    async fn test_status_invalid_on_identity_mismatch() {
        let backend = Arc::new(MemoryProfileBackend::new());
        let store = store_with(backend, Arc::new(FakeEngine::new()));

        let handle = store
            .install_or_update(config_for("app.panthervpn.old.packetTunnel", "a.example:51820"))
            .await
            .unwrap();

        assert_eq!(store.status(handle).await, TunnelStatus::Invalid);
    }

    #[tokio::test]
    async fn test_status_invalid_on_unknown_handle() {
        let backend = Arc::new(MemoryProfileBackend::new());
        let store = store_with(backend.clone(), Arc::new(FakeEngine::new()));

        let handle = store
            .install_or_update(config_for(DEFAULT_PROVIDER_IDENTITY, "a.example:51820"))
            .await
            .unwrap();
        store.remove_stale("app.panthervpn.new.packetTunnel").await;

        // Removal left the handle dangling
        assert_eq!(store.status(handle).await, TunnelStatus::Invalid);
    }

    #[tokio::test]
    async fn test_file_backend_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("profiles.json");

        let backend = FileProfileBackend::new(&path);
        let record = ProfileRecord {
            id: 1,
            enabled: true,
            config: config_for(DEFAULT_PROVIDER_IDENTITY, "a.example:51820"),
        };
        backend.save(&record).unwrap();

        let reopened = FileProfileBackend::new(&path);
        assert_eq!(reopened.load_all().unwrap(), vec![record.clone()]);

        backend.remove(1).unwrap();
        assert!(reopened.load_all().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_file_backend_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileProfileBackend::new(dir.path().join("none.json"));
        assert!(backend.load_all().unwrap().is_empty());
    }
}
