//! Session-record storage seam and the in-memory registry.
//!
//! The dispatcher needs two things from persistence: the device ids known
//! for an address, and removal of a single session record. Everything else
//! about session state stays behind the session layer.

use async_trait::async_trait;
use dashmap::DashMap;

use openrelay_wire::addrs::{Address, DeviceId, EncodedAddress};

use crate::error::StoreError;

/// Narrow persistence interface consumed by the dispatcher.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Device ids with a session record for this address. An unknown
    /// address yields an empty list.
    async fn get_device_ids(&self, addr: &Address) -> Result<Vec<DeviceId>, StoreError>;

    /// Delete the session record for one encoded address. Missing records
    /// are not an error.
    async fn remove_session(&self, encoded: &EncodedAddress) -> Result<(), StoreError>;
}

/// Process-local session registry backed by a concurrent map.
///
/// Records are keyed by the `"<address>.<deviceId>"` encoded form and hold
/// whatever serialized session blob the session-layer binding stores in
/// them. Suitable for embedding and tests; durable deployments put a
/// database-backed implementation behind [`SessionStore`] instead.
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: DashMap<String, Vec<u8>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the session record for one device.
    pub fn put_session(&self, encoded: &EncodedAddress, record: Vec<u8>) {
        self.sessions.insert(encoded.to_string(), record);
    }

    /// The stored session record, if any.
    pub fn get_session(&self, encoded: &EncodedAddress) -> Option<Vec<u8>> {
        self.sessions
            .get(&encoded.to_string())
            .map(|record| record.value().clone())
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn get_device_ids(&self, addr: &Address) -> Result<Vec<DeviceId>, StoreError> {
        let mut device_ids: Vec<DeviceId> = self
            .sessions
            .iter()
            .filter_map(|entry| entry.key().parse::<EncodedAddress>().ok())
            .filter(|encoded| encoded.addr() == addr)
            .map(|encoded| encoded.device_id())
            .collect();
        device_ids.sort();
        Ok(device_ids)
    }

    async fn remove_session(&self, encoded: &EncodedAddress) -> Result<(), StoreError> {
        self.sessions.remove(&encoded.to_string());
        Ok(())
    }
}
