//! Registration token verification.
//!
//! Verification runs off the hub task; the verdict is fed back as a hub
//! command so session state is only ever touched by the hub.

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};
use vicinity_core::VehicleId;

#[async_trait]
pub trait TokenVerifier: Send + Sync {
    /// `Err` carries the human-readable rejection reason.
    async fn verify(&self, vehicle_id: &VehicleId, token: Option<&str>) -> Result<(), String>;
}

/// Accepts every registration.
pub struct AllowAll;

#[async_trait]
impl TokenVerifier for AllowAll {
    async fn verify(&self, _vehicle_id: &VehicleId, _token: Option<&str>) -> Result<(), String> {
        Ok(())
    }
}

/// Tokens are `base64url(sha256(secret ":" vehicleId))`, so a fleet operator
/// can mint them offline from the shared secret.
pub struct SharedSecretVerifier {
    secret: SecretString,
}

impl SharedSecretVerifier {
    pub fn new(secret: SecretString) -> Self {
        Self { secret }
    }

    /// Mint the token for a vehicle.
    pub fn issue(&self, vehicle_id: &VehicleId) -> String {
        derive_token(self.secret.expose_secret(), vehicle_id)
    }
}

#[async_trait]
impl TokenVerifier for SharedSecretVerifier {
    async fn verify(&self, vehicle_id: &VehicleId, token: Option<&str>) -> Result<(), String> {
        let Some(token) = token.map(str::trim).filter(|t| !t.is_empty()) else {
            return Err("authToken is required".into());
        };
        let expected = self.issue(vehicle_id);
        if constant_time_eq(expected.as_bytes(), token.as_bytes()) {
            Ok(())
        } else {
            Err(format!("invalid token for {vehicle_id}"))
        }
    }
}

fn derive_token(secret: &str, vehicle_id: &VehicleId) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hasher.update(b":");
    hasher.update(vehicle_id.as_str().as_bytes());
    URL_SAFE_NO_PAD.encode(hasher.finalize())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
