//! Per-device ciphertext payloads and the device-mismatch response bodies.
//!
//! The [`EncryptedDeviceMessage`] JSON shape is consumed by the relay
//! server as-is and must not change:
//! `{"type": <int>, "destinationDeviceId": <int>,
//!   "destinationRegistrationId": <int>, "content": "<base64>"}`.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::addrs::DeviceId;
use crate::error::WireError;

/// One device's ciphertext within a recipient's message bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedDeviceMessage {
    /// Envelope type of the ciphertext (pre-key vs established-session).
    #[serde(rename = "type")]
    pub message_type: u32,
    pub destination_device_id: u32,
    pub destination_registration_id: u32,
    /// Base64-encoded ciphertext body.
    pub content: String,
}

impl EncryptedDeviceMessage {
    pub fn new(message_type: u32, device_id: DeviceId, registration_id: u32, body: &[u8]) -> Self {
        Self {
            message_type,
            destination_device_id: device_id.into(),
            destination_registration_id: registration_id,
            content: BASE64.encode(body),
        }
    }

    /// Decode the base64 content back to ciphertext bytes.
    pub fn content_bytes(&self) -> Result<Vec<u8>, WireError> {
        BASE64
            .decode(&self.content)
            .map_err(|e| WireError::InvalidContent(e.to_string()))
    }
}

/// Request body of the message-submit endpoint: all device ciphertexts for
/// one recipient, stamped with the dispatch timestamp the server uses for
/// deduplication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutgoingMessageBundle {
    pub messages: Vec<EncryptedDeviceMessage>,
    pub timestamp: u64,
}

/// 409 response body: the server's device set disagrees with the submitted
/// one and enumerates the diff.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MismatchedDevices {
    #[serde(default)]
    pub extra_devices: Vec<DeviceId>,
    #[serde(default)]
    pub missing_devices: Vec<DeviceId>,
}

/// 410 response body: devices whose sessions the server considers stale.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StaleDevices {
    #[serde(default)]
    pub stale_devices: Vec<DeviceId>,
}
