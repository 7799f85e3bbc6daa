//! Recipient addressing.
//!
//! An [`Address`] identifies a recipient account; the relay server assigns
//! it and the client treats it as opaque. Each account has one or more
//! numbered devices, with device 1 as the primary. Session records are
//! keyed by the combined [`EncodedAddress`] form `"<address>.<deviceId>"`.

use serde::{Deserialize, Serialize};

use crate::error::WireError;

/// Opaque recipient identifier assigned by the directory service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(pub String);

impl Address {
    pub fn new(addr: impl Into<String>) -> Self {
        Self(addr.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Address {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for Address {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Device number within a recipient account.
///
/// Canonicalised to `u32` at the boundary; servers and stores that speak
/// string device ids are converted on ingest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(pub u32);

impl DeviceId {
    /// The recipient's primary device. Never auto-pruned on a key-fetch 404.
    pub const PRIMARY: DeviceId = DeviceId(1);

    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn is_primary(self) -> bool {
        self == Self::PRIMARY
    }
}

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<DeviceId> for u32 {
    fn from(id: DeviceId) -> u32 {
        id.0
    }
}

/// Session-record key in the `"<address>.<deviceId>"` form.
///
/// The device id is everything after the last dot; addresses may themselves
/// contain dots.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EncodedAddress {
    addr: Address,
    device_id: DeviceId,
}

impl EncodedAddress {
    pub fn new(addr: Address, device_id: DeviceId) -> Self {
        Self { addr, device_id }
    }

    pub fn addr(&self) -> &Address {
        &self.addr
    }

    pub fn device_id(&self) -> DeviceId {
        self.device_id
    }
}

impl std::fmt::Display for EncodedAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.addr, self.device_id)
    }
}

impl std::str::FromStr for EncodedAddress {
    type Err = WireError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr, device) = s
            .rsplit_once('.')
            .ok_or_else(|| WireError::InvalidEncodedAddress(s.to_string()))?;
        if addr.is_empty() {
            return Err(WireError::InvalidEncodedAddress(s.to_string()));
        }
        let device_id: u32 = device
            .parse()
            .map_err(|_| WireError::InvalidEncodedAddress(s.to_string()))?;
        Ok(Self {
            addr: Address::new(addr),
            device_id: DeviceId::new(device_id),
        })
    }
}
