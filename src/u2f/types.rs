//! U2F core types
//!
//! Persisted records (`Challenge`, `Registration`), the plain request and
//! response records exchanged with the transport layer, and the transient
//! decoded wire messages.

use std::collections::BTreeSet;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::codec;

/// Protocol version tag sent with every outbound request
pub const U2F_VERSION: &str = "U2F_V2";

/// Client data `typ` for a registration response
pub const TYPE_FINISH_ENROLLMENT: &str = "navigator.id.finishEnrollment";

/// Client data `typ` for an authentication response
pub const TYPE_GET_ASSERTION: &str = "navigator.id.getAssertion";

/// What an outstanding challenge was issued for
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Purpose {
    Registration,
    Authentication,
}

impl Purpose {
    /// The client data `typ` a device must report when answering
    #[must_use]
    pub fn client_data_type(self) -> &'static str {
        match self {
            Purpose::Registration => TYPE_FINISH_ENROLLMENT,
            Purpose::Authentication => TYPE_GET_ASSERTION,
        }
    }
}

/// A single-use challenge bound to a user identity and purpose
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Challenge {
    pub user_identity: String,
    pub purpose: Purpose,
    pub nonce: Vec<u8>,
    pub app_id: String,
    pub trusted_facets: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
}

impl Challenge {
    /// Nonce as sent to the device: base64url, unpadded
    #[must_use]
    pub fn encoded_nonce(&self) -> String {
        codec::encode_b64url(&self.nonce)
    }

    /// Whether the challenge is older than `timeout` at `now`
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        now.signed_duration_since(self.created_at) > timeout
    }
}

/// Durable binding of a user identity to a device key and its counter
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Registration {
    pub user_identity: String,
    pub key_handle: Vec<u8>,
    /// Uncompressed SEC1 P-256 point (65 bytes)
    pub public_key: Vec<u8>,
    /// DER-encoded attestation certificate, if the policy keeps it
    pub attestation_certificate: Option<Vec<u8>>,
    pub counter: u32,
    pub created_at: DateTime<Utc>,
    pub last_used: Option<DateTime<Utc>>,
}

impl Registration {
    /// External view of the registration, without key material
    #[must_use]
    pub fn summary(&self) -> RegistrationSummary {
        RegistrationSummary {
            user_identity: self.user_identity.clone(),
            key_handle: codec::encode_b64url(&self.key_handle),
            counter: self.counter,
            created_at: self.created_at,
            last_used: self.last_used,
        }
    }
}

/// Registration as reported to callers of `list_registrations`
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationSummary {
    pub user_identity: String,
    pub key_handle: String, // Base64URL-encoded key handle
    pub counter: u32,
    pub created_at: DateTime<Utc>,
    pub last_used: Option<DateTime<Utc>>,
}

/// Registration request sent to the device
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct RegisterRequest {
    pub version: String,   // Always "U2F_V2"
    pub challenge: String, // Base64URL-encoded nonce
    #[serde(rename = "appId")]
    pub app_id: String,
}

/// Sign request for one registered device
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct SignRequest {
    pub version: String,   // Always "U2F_V2"
    pub challenge: String, // Base64URL-encoded nonce, shared by all devices
    #[serde(rename = "keyHandle")]
    pub key_handle: String, // Base64URL-encoded key handle
    #[serde(rename = "appId")]
    pub app_id: String,
}

/// Registration response from the device
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct RegisterResponse {
    #[serde(rename = "registrationData")]
    pub registration_data: String, // Base64URL-encoded raw registration message
    #[serde(rename = "clientData")]
    pub client_data: String, // Base64URL-encoded client data JSON
}

/// Sign response from the device
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct SignResponse {
    #[serde(rename = "keyHandle")]
    pub key_handle: String, // Base64URL-encoded key handle
    #[serde(rename = "signatureData")]
    pub signature_data: String, // Base64URL-encoded signature envelope
    #[serde(rename = "clientData")]
    pub client_data: String, // Base64URL-encoded client data JSON
}

/// Client data object assembled by the browser
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ClientData {
    #[serde(rename = "typ", alias = "type")]
    pub typ: String,
    pub challenge: String, // Base64URL-encoded nonce, unpadded
    pub origin: String,
    /// Channel ID public key, present when the browser supports it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cid_pubkey: Option<serde_json::Value>,
}

/// Decoded registration message. Transient, never persisted as-is.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawRegistrationMessage {
    pub public_key: Vec<u8>,
    pub key_handle: Vec<u8>,
    pub certificate: Vec<u8>,
    pub signature: Vec<u8>,
}

/// Decoded assertion envelope. Transient, never persisted as-is.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawSignatureData {
    pub flags: u8,
    pub counter: u32,
    pub signature: Vec<u8>,
}

impl RawSignatureData {
    #[must_use]
    pub fn user_present(&self) -> bool {
        self.flags & 0x01 != 0
    }
}
