//! Device Registration
//!
//! One POST against the registration backend: the device offers its install
//! id, public key, and chosen region, and gets back everything needed to
//! build a tunnel configuration. No retries here; the caller decides
//! whether to try again.

use crate::identity::{DeviceIdentity, IdentityError};
use crate::region::RegionId;
use async_trait::async_trait;
use panther_net::{HttpClient, HttpError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Registration request body
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RegisterRequest<'a> {
    device_id: &'a str,
    public_key: &'a str,
    region: &'a str,
}

/// Values returned by a successful registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationResult {
    /// Client address with prefix, e.g. "10.66.0.7/32"
    #[serde(rename = "assignedAddressCIDR")]
    pub assigned_address_cidr: String,
    /// Server public key (base64)
    pub server_public_key: String,
    /// Server endpoint, "host:port"
    pub endpoint: String,
    /// DNS resolvers to use inside the tunnel (may be empty)
    pub dns: Vec<String>,
}

/// Why the backend refused a registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DenialReason {
    /// The account has registered its maximum number of devices
    DeviceLimitExceeded,
    /// The subscription has lapsed
    SubscriptionInactive,
    /// The bearer token was missing, expired, or rejected
    Unauthorized,
    /// Anything else; carries the backend's text
    Unknown(String),
}

impl std::fmt::Display for DenialReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DenialReason::DeviceLimitExceeded => write!(f, "device limit exceeded"),
            DenialReason::SubscriptionInactive => write!(f, "subscription inactive"),
            DenialReason::Unauthorized => write!(f, "unauthorized"),
            DenialReason::Unknown(body) => write!(f, "registration refused: {}", body),
        }
    }
}

/// Registration errors
#[derive(Debug, Clone, Error)]
pub enum RegistrationError {
    #[error("Identity error: {0}")]
    Identity(#[from] IdentityError),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Registration denied: {0}")]
    Denied(DenialReason),

    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl From<HttpError> for RegistrationError {
    fn from(e: HttpError) -> Self {
        RegistrationError::Transport(e.to_string())
    }
}

/// The registration exchange, as the session controller sees it.
#[async_trait]
pub trait Registrar: Send + Sync {
    /// Register this device for `region`
    async fn register(
        &self,
        region: RegionId,
        bearer_token: &str,
    ) -> Result<RegistrationResult, RegistrationError>;
}

/// Client for the wg-register exchange.
pub struct RegistrationClient {
    base_url: String,
    http: HttpClient,
    identity: Arc<DeviceIdentity>,
}

impl RegistrationClient {
    /// Create a client against `base_url` (no trailing slash needed)
    pub fn new(base_url: impl Into<String>, identity: Arc<DeviceIdentity>) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http: HttpClient::with_defaults(),
            identity,
        }
    }

}

#[async_trait]
impl Registrar for RegistrationClient {
    /// Identity material is resolved first, so a broken secret store fails
    /// before any network traffic. No retry; safe to call again after any
    /// failure.
    async fn register(
        &self,
        region: RegionId,
        bearer_token: &str,
    ) -> Result<RegistrationResult, RegistrationError> {
        let device_id = self.identity.install_id()?;
        let public_key = self.identity.public_key_encoded()?;

        let request = RegisterRequest {
            device_id: &device_id,
            public_key: &public_key,
            region: region.name(),
        };
        let body = serde_json::to_vec(&request)
            .map_err(|e| RegistrationError::Protocol(e.to_string()))?;

        let url = format!("{}/wg-register", self.base_url);
        debug!("Registering device for region {} via {}", region, url);

        let response = self.http.post_json(&url, body, Some(bearer_token)).await?;

        match interpret_response(response.status, &response.body) {
            Ok(result) => {
                info!(
                    "Registered for {}: address {}, endpoint {}",
                    region, result.assigned_address_cidr, result.endpoint
                );
                Ok(result)
            }
            Err(e) => {
                warn!("Registration for {} failed: {}", region, e);
                Err(e)
            }
        }
    }
}

/// Decode a registration response. Pure over status and body.
pub fn interpret_response(
    status: u16,
    body: &[u8],
) -> Result<RegistrationResult, RegistrationError> {
    if !(200..300).contains(&status) {
        let text = String::from_utf8_lossy(body).into_owned();
        return Err(RegistrationError::Denied(classify_denial(status, &text)));
    }

    let result: RegistrationResult = serde_json::from_slice(body)
        .map_err(|e| RegistrationError::Protocol(format!("bad response body: {}", e)))?;

    if result.assigned_address_cidr.is_empty() {
        return Err(RegistrationError::Protocol(
            "missing assignedAddressCIDR".to_string(),
        ));
    }
    if result.server_public_key.is_empty() {
        return Err(RegistrationError::Protocol(
            "missing serverPublicKey".to_string(),
        ));
    }
    if result.endpoint.is_empty() {
        return Err(RegistrationError::Protocol("missing endpoint".to_string()));
    }

    Ok(result)
}

/// Map a refusal to its reason. Body substrings take priority over the
/// status code, so a 403 carrying "device_limit_exceeded" classifies as the
/// device limit, not a generic authorization failure.
fn classify_denial(status: u16, body: &str) -> DenialReason {
    let lower = body.to_lowercase();

    if lower.contains("device_limit_exceeded") {
        DenialReason::DeviceLimitExceeded
    } else if lower.contains("subscription_inactive") {
        DenialReason::SubscriptionInactive
    } else if lower.contains("unauthorized")
        || lower.contains("forbidden")
        || status == 401
        || status == 403
    {
        DenialReason::Unauthorized
    } else {
        DenialReason::Unknown(body.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GOOD_BODY: &str = r#"{
        "assignedAddressCIDR": "10.66.0.7/32",
        "serverPublicKey": "mAKL3aUd9PW+G1oB1sDr4V6SL4hMpyQJv/yJSyRvhX4=",
        "endpoint": "vpn.fi.panthervpn.app:51820",
        "dns": ["1.1.1.1", "1.0.0.1"]
    }"#;

    #[test]
    fn test_request_body_field_names() {
        let request = RegisterRequest {
            device_id: "d-1",
            public_key: "pk",
            region: "Helsinki",
        };
        let json = serde_json::to_string(&request).unwrap();

        assert!(json.contains("\"deviceId\":\"d-1\""));
        assert!(json.contains("\"publicKey\":\"pk\""));
        assert!(json.contains("\"region\":\"Helsinki\""));
    }

    #[test]
    fn test_interpret_success() {
        let result = interpret_response(200, GOOD_BODY.as_bytes()).unwrap();

        assert_eq!(result.assigned_address_cidr, "10.66.0.7/32");
        assert_eq!(result.endpoint, "vpn.fi.panthervpn.app:51820");
        assert_eq!(result.dns.len(), 2);
    }

    #[test]
    fn test_interpret_empty_dns_allowed() {
        let body = r#"{
            "assignedAddressCIDR": "10.66.0.7/32",
            "serverPublicKey": "k",
            "endpoint": "host:51820",
            "dns": []
        }"#;
        let result = interpret_response(200, body.as_bytes()).unwrap();
        assert!(result.dns.is_empty());
    }

    #[test]
    fn test_interpret_missing_field() {
        let body = r#"{"assignedAddressCIDR": "10.66.0.7/32", "dns": []}"#;
        assert!(matches!(
            interpret_response(200, body.as_bytes()),
            Err(RegistrationError::Protocol(_))
        ));
    }

    #[test]
    fn test_interpret_empty_field() {
        let body = r#"{
            "assignedAddressCIDR": "",
            "serverPublicKey": "k",
            "endpoint": "host:51820",
            "dns": []
        }"#;
        assert!(matches!(
            interpret_response(200, body.as_bytes()),
            Err(RegistrationError::Protocol(_))
        ));
    }

    #[test]
    fn test_interpret_garbage_body() {
        assert!(matches!(
            interpret_response(200, b"<html>oops</html>"),
            Err(RegistrationError::Protocol(_))
        ));
    }

    #[test]
    fn test_denial_device_limit_over_status() {
        // Body text wins over the 403
        let reason = classify_denial(403, r#"{"error":"device_limit_exceeded"}"#);
        assert_eq!(reason, DenialReason::DeviceLimitExceeded);
    }

    #[test]
    fn test_denial_subscription() {
        let reason = classify_denial(402, "subscription_inactive");
        assert_eq!(reason, DenialReason::SubscriptionInactive);
    }

    #[test]
    fn test_denial_unauthorized() {
        assert_eq!(classify_denial(401, ""), DenialReason::Unauthorized);
        assert_eq!(classify_denial(403, "Forbidden"), DenialReason::Unauthorized);
        assert_eq!(
            classify_denial(400, "request unauthorized"),
            DenialReason::Unauthorized
        );
    }

    #[test]
    fn test_denial_unknown_keeps_body() {
        let reason = classify_denial(500, "backend exploded");
        assert_eq!(reason, DenialReason::Unknown("backend exploded".to_string()));
    }

    #[test]
    fn test_denied_via_interpret() {
        let err = interpret_response(403, b"device_limit_exceeded").unwrap_err();
        assert!(matches!(
            err,
            RegistrationError::Denied(DenialReason::DeviceLimitExceeded)
        ));
    }
}
