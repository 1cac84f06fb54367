//! Tunnel Session Controller
//!
//! Top-level orchestrator for the provisioning pipeline. Sequences
//! registration, stale-profile cleanup, configuration build, profile
//! install, and engine start into one serialized state machine, and is the
//! only component allowed to mutate the installed profile's lifecycle.

use crate::config::{ConfigError, TunnelConfigBuilder};
use crate::engine::{EngineError, TunnelEngine, TunnelStatus};
use crate::identity::{DeviceIdentity, IdentityError};
use crate::profile::{ProfileError, TunnelProfileStore};
use crate::region::RegionId;
use crate::registration::{DenialReason, Registrar, RegistrationError};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

/// Session connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Nothing installed or running
    Idle,
    /// Registration exchange in flight
    Registering,
    /// Cleaning stale profiles and installing the new one
    Installing,
    /// Engine started, waiting for the tunnel to come up
    Connecting,
    /// Tunnel is up
    Connected,
    /// Engine stopping, waiting for teardown
    Disconnecting,
    /// Last operation failed; see `last_failure`
    Failed,
}

impl SessionState {
    /// Is a lifecycle operation mid-flight?
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            SessionState::Registering
                | SessionState::Installing
                | SessionState::Connecting
                | SessionState::Disconnecting
        )
    }

    /// Is the tunnel usable?
    pub fn is_connected(&self) -> bool {
        matches!(self, SessionState::Connected)
    }

    /// Did the last operation fail?
    pub fn is_failed(&self) -> bool {
        matches!(self, SessionState::Failed)
    }
}

/// Session errors
#[derive(Debug, Clone, Error)]
pub enum SessionError {
    #[error("Identity error: {0}")]
    Identity(IdentityError),

    #[error("Registration denied: {0}")]
    Denied(DenialReason),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Profile save failed: {0}")]
    ProfileSave(String),

    #[error("Engine error: {0}")]
    Engine(String),

    #[error("Timed out waiting for the tunnel")]
    EngineTimeout,

    #[error("Another operation is in progress")]
    OperationInProgress,

    #[error("No installed tunnel profile")]
    NoProfile,
}

impl SessionError {
    /// Stable human-readable message for the presentation layer.
    ///
    /// Backend detail is surfaced only for registration denials; every
    /// other category maps to a fixed string.
    pub fn user_message(&self) -> String {
        match self {
            SessionError::Identity(_) => {
                "Secure storage is unavailable on this device.".to_string()
            }
            SessionError::Denied(DenialReason::DeviceLimitExceeded) => {
                "This account has reached its device limit. Remove a device and try again."
                    .to_string()
            }
            SessionError::Denied(DenialReason::SubscriptionInactive) => {
                "Your subscription is not active. Renew it to connect.".to_string()
            }
            SessionError::Denied(DenialReason::Unauthorized) => {
                "Your session has expired. Please sign in again.".to_string()
            }
            SessionError::Denied(DenialReason::Unknown(detail)) => {
                format!("The server refused this device: {detail}")
            }
            SessionError::Protocol(_) | SessionError::Config(_) => {
                "The server sent an unexpected response. Try again later.".to_string()
            }
            SessionError::Network(_) => {
                "Could not reach the server. Check your connection.".to_string()
            }
            SessionError::ProfileSave(_) => {
                "Could not save the tunnel profile. Try again.".to_string()
            }
            SessionError::Engine(_) => "The tunnel could not be started.".to_string(),
            SessionError::EngineTimeout => "The tunnel did not come up in time.".to_string(),
            SessionError::OperationInProgress => {
                "Another operation is already in progress.".to_string()
            }
            SessionError::NoProfile => {
                "No tunnel is set up yet. Connect to a region first.".to_string()
            }
        }
    }
}

impl From<IdentityError> for SessionError {
    fn from(e: IdentityError) -> Self {
        SessionError::Identity(e)
    }
}

impl From<RegistrationError> for SessionError {
    fn from(e: RegistrationError) -> Self {
        match e {
            RegistrationError::Identity(inner) => SessionError::Identity(inner),
            RegistrationError::Denied(reason) => SessionError::Denied(reason),
            RegistrationError::Protocol(msg) => SessionError::Protocol(msg),
            RegistrationError::Transport(msg) => SessionError::Network(msg),
        }
    }
}

impl From<ProfileError> for SessionError {
    fn from(e: ProfileError) -> Self {
        SessionError::ProfileSave(e.to_string())
    }
}

impl From<EngineError> for SessionError {
    fn from(e: EngineError) -> Self {
        SessionError::Engine(e.to_string())
    }
}

/// Poll cadence and budgets for engine status waits
#[derive(Debug, Clone)]
pub struct SessionTimings {
    pub poll_interval: Duration,
    pub connect_budget: Duration,
    pub disconnect_budget: Duration,
}

impl Default for SessionTimings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(200),
            connect_budget: Duration::from_secs(5),
            disconnect_budget: Duration::from_secs(3),
        }
    }
}

/// Serialized state machine over the tunnel session.
///
/// `connect` runs the full pipeline; `toggle` starts or stops the installed
/// profile without re-registering. Lifecycle operations never interleave: a
/// request arriving while one is in flight is rejected, not queued.
pub struct TunnelSessionController {
    identity: Arc<DeviceIdentity>,
    registrar: Arc<dyn Registrar>,
    profiles: Arc<TunnelProfileStore>,
    engine: Arc<dyn TunnelEngine>,
    state: Arc<RwLock<SessionState>>,
    last_error: Arc<RwLock<Option<SessionError>>>,
    in_flight: AtomicBool,
    timings: SessionTimings,
}

enum ToggleDirection {
    Up,
    Down,
}

impl TunnelSessionController {
    /// Create a controller with default timings
    pub fn new(
        identity: Arc<DeviceIdentity>,
        registrar: Arc<dyn Registrar>,
        profiles: Arc<TunnelProfileStore>,
        engine: Arc<dyn TunnelEngine>,
    ) -> Self {
        Self::with_timings(identity, registrar, profiles, engine, SessionTimings::default())
    }

    /// Create a controller with explicit poll timings
    pub fn with_timings(
        identity: Arc<DeviceIdentity>,
        registrar: Arc<dyn Registrar>,
        profiles: Arc<TunnelProfileStore>,
        engine: Arc<dyn TunnelEngine>,
        timings: SessionTimings,
    ) -> Self {
        Self {
            identity,
            registrar,
            profiles,
            engine,
            state: Arc::new(RwLock::new(SessionState::Idle)),
            last_error: Arc::new(RwLock::new(None)),
            in_flight: AtomicBool::new(false),
            timings,
        }
    }

    /// Current observable state
    pub async fn state(&self) -> SessionState {
        *self.state.read().await
    }

    /// Cause of the last failure, while in `Failed`
    pub async fn last_failure(&self) -> Option<SessionError> {
        self.last_error.read().await.clone()
    }

    /// Run the full provisioning pipeline for `region`.
    ///
    /// Allowed from `Idle` and `Failed` (a fresh attempt); rejected from
    /// every other state without disturbing the in-flight operation. The
    /// first failure wins and lands the session in `Failed`.
    pub async fn connect(
        &self,
        region: RegionId,
        bearer_token: &str,
    ) -> Result<(), SessionError> {
        {
            let mut state = self.state.write().await;
            if self.in_flight.load(Ordering::SeqCst)
                || !matches!(*state, SessionState::Idle | SessionState::Failed)
            {
                return Err(SessionError::OperationInProgress);
            }
            *state = SessionState::Registering;
            self.in_flight.store(true, Ordering::SeqCst);
        }

        info!("Connect requested for region {}", region);
        let result = self.do_connect(region, bearer_token).await;
        self.settle(result, SessionState::Connected).await
    }

    /// Tear the tunnel down.
    ///
    /// No-op from `Idle` and `Failed`; rejected while another operation is
    /// in flight.
    pub async fn disconnect(&self) -> Result<(), SessionError> {
        {
            let mut state = self.state.write().await;
            match *state {
                SessionState::Connected => {}
                SessionState::Idle | SessionState::Failed => return Ok(()),
                _ => return Err(SessionError::OperationInProgress),
            }
            *state = SessionState::Disconnecting;
            self.in_flight.store(true, Ordering::SeqCst);
        }

        info!("Disconnect requested");
        let result = self.do_disconnect().await;
        self.settle(result, SessionState::Idle).await
    }

    /// Start or stop the installed profile, depending on its live status.
    ///
    /// Starting this way reuses the stored configuration without another
    /// registration. Fails with `NoProfile` when nothing is installed.
    pub async fn toggle(&self) -> Result<(), SessionError> {
        let direction = {
            let mut state = self.state.write().await;
            if self.in_flight.load(Ordering::SeqCst) || state.is_busy() {
                return Err(SessionError::OperationInProgress);
            }

            let Some(handle) = self.profiles.current_profile().await else {
                return Err(SessionError::NoProfile);
            };

            let live = self.profiles.status(handle).await;
            if matches!(
                live,
                TunnelStatus::Connected | TunnelStatus::Connecting | TunnelStatus::Reasserting
            ) {
                *state = SessionState::Disconnecting;
                self.in_flight.store(true, Ordering::SeqCst);
                ToggleDirection::Down
            } else {
                *state = SessionState::Connecting;
                self.in_flight.store(true, Ordering::SeqCst);
                ToggleDirection::Up
            }
        };

        match direction {
            ToggleDirection::Down => {
                info!("Toggle: stopping tunnel");
                let result = self.do_disconnect().await;
                self.settle(result, SessionState::Idle).await
            }
            ToggleDirection::Up => {
                info!("Toggle: starting installed profile");
                let result = self.do_start_installed().await;
                self.settle(result, SessionState::Connected).await
            }
        }
    }

    /// Observe the installed profile's live status and, when no operation
    /// is in flight, fold it into the session state. Never touches the
    /// profile itself, and never clobbers an unacknowledged failure.
    pub async fn refresh_status(&self) -> TunnelStatus {
        let live = match self.profiles.current_profile().await {
            Some(handle) => self.profiles.status(handle).await,
            None => TunnelStatus::Invalid,
        };

        if !self.in_flight.load(Ordering::SeqCst) {
            let mut state = self.state.write().await;
            if !state.is_failed() {
                *state = match live {
                    TunnelStatus::Connected => SessionState::Connected,
                    TunnelStatus::Connecting | TunnelStatus::Reasserting => {
                        SessionState::Connecting
                    }
                    TunnelStatus::Disconnecting => SessionState::Disconnecting,
                    TunnelStatus::Disconnected | TunnelStatus::Invalid => SessionState::Idle,
                };
            }
        }

        live
    }

    /// Acknowledge a failure, returning the session to `Idle`.
    pub async fn acknowledge_failure(&self) {
        let mut state = self.state.write().await;
        if state.is_failed() {
            *state = SessionState::Idle;
            *self.last_error.write().await = None;
        }
    }

    async fn do_connect(&self, region: RegionId, bearer_token: &str) -> Result<(), SessionError> {
        let registration = self.registrar.register(region, bearer_token).await?;

        self.set_state(SessionState::Installing).await;
        let provider_identity = self.engine.provider_identity().to_string();
        self.profiles.remove_stale(&provider_identity).await;

        let private_key = self.identity.private_key_encoded()?;
        let config = TunnelConfigBuilder::build(
            &registration,
            &private_key,
            &format!("Panther - {}", region),
            &provider_identity,
        )?;
        let handle = self.profiles.install_or_update(config.clone()).await?;

        self.set_state(SessionState::Connecting).await;
        self.engine.start(&config)?;

        self.await_status(handle, TunnelStatus::Connected, self.timings.connect_budget)
            .await
            .map_err(|last| {
                warn!("Tunnel did not connect in time (last status: {})", last);
                SessionError::EngineTimeout
            })?;

        info!("Tunnel connected ({})", region);
        Ok(())
    }

    async fn do_start_installed(&self) -> Result<(), SessionError> {
        let handle = self
            .profiles
            .current_profile()
            .await
            .ok_or(SessionError::NoProfile)?;
        let config = self
            .profiles
            .current_config()
            .await
            .ok_or(SessionError::NoProfile)?;

        self.engine.start(&config)?;

        self.await_status(handle, TunnelStatus::Connected, self.timings.connect_budget)
            .await
            .map_err(|last| {
                warn!("Tunnel did not connect in time (last status: {})", last);
                SessionError::EngineTimeout
            })?;

        info!("Tunnel connected (installed profile)");
        Ok(())
    }

    async fn do_disconnect(&self) -> Result<(), SessionError> {
        self.engine.stop()?;

        if let Some(handle) = self.profiles.current_profile().await {
            // Teardown overruns are not fatal; report best-known status.
            if let Err(last) = self
                .await_status(
                    handle,
                    TunnelStatus::Disconnected,
                    self.timings.disconnect_budget,
                )
                .await
            {
                warn!("Tunnel still {} after teardown budget", last);
            }
        }

        info!("Tunnel disconnected");
        Ok(())
    }

    /// Bounded status poll. Returns the best-known status on expiry.
    async fn await_status(
        &self,
        handle: crate::profile::ProfileHandle,
        target: TunnelStatus,
        budget: Duration,
    ) -> Result<(), TunnelStatus> {
        let deadline = tokio::time::Instant::now() + budget;
        loop {
            let status = self.profiles.status(handle).await;
            if status == target {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(status);
            }
            debug!("Waiting for {} (currently {})", target, status);
            tokio::time::sleep(self.timings.poll_interval).await;
        }
    }

    async fn set_state(&self, next: SessionState) {
        *self.state.write().await = next;
    }

    async fn settle(
        &self,
        result: Result<(), SessionError>,
        on_success: SessionState,
    ) -> Result<(), SessionError> {
        let mut state = self.state.write().await;
        self.in_flight.store(false, Ordering::SeqCst);

        match result {
            Ok(()) => {
                *state = on_success;
                *self.last_error.write().await = None;
                Ok(())
            }
            Err(e) => {
                error!("Session operation failed: {}", e);
                *state = SessionState::Failed;
                *self.last_error.write().await = Some(e.clone());
                Err(e)
            }
        }
    }
}
