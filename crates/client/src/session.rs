//! Session-layer seams consumed by the dispatcher.
//!
//! The dispatcher never inspects ratchet state. It asks a [`SessionCipher`]
//! three things per device (is a session open, encrypt this padded payload,
//! archive the open session) and hands fetched pre-key bundles to the
//! [`SessionLayer`]'s session builder. A concrete binding implements both
//! over the reference protocol library and its stores.

use std::sync::Arc;

use async_trait::async_trait;

use openrelay_wire::addrs::{Address, DeviceId};
use openrelay_wire::keys::PreKeyBundle;

use crate::error::SessionError;

/// Result of encrypting one padded payload for one device.
#[derive(Debug, Clone)]
pub struct CiphertextDescriptor {
    /// Envelope type of the produced ciphertext (pre-key vs
    /// established-session), copied into the wire payload's `type` field.
    pub message_type: u32,
    /// The remote device's registration id, echoed into the wire payload.
    pub registration_id: u32,
    /// Serialized ciphertext body.
    pub body: Vec<u8>,
}

/// Cryptographic operations on one `(address, device)` session.
#[async_trait]
pub trait SessionCipher: Send + Sync {
    /// Whether a usable sender chain exists for this device.
    async fn has_open_session(&self) -> Result<bool, SessionError>;

    /// Encrypt a padded payload, advancing the ratchet.
    async fn encrypt(&self, padded: &[u8]) -> Result<CiphertextDescriptor, SessionError>;

    /// Archive the currently open session so the next encrypt starts from a
    /// freshly built one. A no-op when no session is open.
    async fn close_open_session(&self) -> Result<(), SessionError>;
}

/// Factory and session builder over the underlying protocol library.
#[async_trait]
pub trait SessionLayer: Send + Sync {
    /// Cipher handle for one `(address, device)` pair.
    fn cipher(&self, addr: &Address, device_id: DeviceId) -> Arc<dyn SessionCipher>;

    /// Run the session builder over a fetched pre-key bundle.
    ///
    /// Fails with [`SessionError::UntrustedIdentity`] when the bundle's
    /// identity key conflicts with the identity stored for the address; the
    /// session is only built once the change has been accepted.
    async fn process_pre_key(
        &self,
        addr: &Address,
        bundle: &PreKeyBundle,
    ) -> Result<(), SessionError>;
}
