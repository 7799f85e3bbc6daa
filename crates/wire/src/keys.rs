//! Pre-key bundle DTOs returned by the key-fetch endpoint.
//!
//! A [`PreKeyResponse`] carries the recipient's long-term identity key and
//! one [`PreKeyBundle`] per device. The bundles are consumed by the session
//! builder during session establishment and then discarded.

use serde::{Deserialize, Serialize};

use crate::addrs::DeviceId;

/// A signed pre-key: medium-term public key plus the identity-key signature
/// over it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedPreKey {
    pub key_id: u32,
    pub public_key: Vec<u8>,
    pub signature: Vec<u8>,
}

/// A one-time pre-key. Consumed by the first session established against it;
/// the server may omit it when the recipient's supply is exhausted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OneTimePreKey {
    pub key_id: u32,
    pub public_key: Vec<u8>,
}

/// Key material for bootstrapping a session with one device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreKeyBundle {
    pub device_id: DeviceId,
    /// The recipient's long-term identity public key. Identical across all
    /// bundles in one response; a mismatch with the locally stored identity
    /// requires user confirmation before any session is built.
    pub identity_key: Vec<u8>,
    pub registration_id: u32,
    pub signed_pre_key: SignedPreKey,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pre_key: Option<OneTimePreKey>,
}

/// Response body of the key-fetch endpoint, covering one recipient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreKeyResponse {
    pub identity_key: Vec<u8>,
    pub devices: Vec<PreKeyBundle>,
}
