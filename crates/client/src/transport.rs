//! Signal transport seam.
//!
//! The dispatcher treats the relay server as a typed RPC surface with two
//! calls: fetch pre-key bundles and submit a recipient's ciphertext bundle.
//! Protocol-level rejections surface as
//! [`TransportError::Protocol`](crate::error::TransportError) carrying the
//! numeric status and the raw JSON body; the dispatcher interprets
//! 404/409/410 itself.

use async_trait::async_trait;

use openrelay_wire::addrs::{Address, DeviceId};
use openrelay_wire::keys::PreKeyResponse;
use openrelay_wire::messages::EncryptedDeviceMessage;

use crate::error::TransportError;

pub mod http;

/// RPC surface of the relay server, as consumed by the dispatcher.
#[async_trait]
pub trait SignalTransport: Send + Sync {
    /// Fetch pre-key bundles for all of a recipient's devices, or for one
    /// specific device.
    async fn get_keys_for_addr(
        &self,
        addr: &Address,
        device_id: Option<DeviceId>,
    ) -> Result<PreKeyResponse, TransportError>;

    /// Submit one recipient's ciphertext bundle. A 2xx response maps to
    /// `Ok(())`; everything else is a [`TransportError`].
    async fn send_messages(
        &self,
        addr: &Address,
        messages: &[EncryptedDeviceMessage],
        timestamp: u64,
    ) -> Result<(), TransportError>;
}
