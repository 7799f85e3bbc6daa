//! openrelay-wire -- shared wire types for the OpenRelay messaging client.
//!
//! Everything in this crate is plain data: recipient addressing, the
//! pre-key and message DTOs exchanged with the relay server, and the
//! message padding codec. The protocol engine lives in `openrelay-client`;
//! this crate has no I/O and no async surface.
//!
//! ## Modules
//!
//! - [`addrs`] -- `Address`, `DeviceId`, and `addr.deviceId` session keys
//! - [`keys`] -- pre-key bundle DTOs returned by the key-fetch endpoint
//! - [`messages`] -- per-device ciphertext payloads and 409/410 bodies
//! - [`padding`] -- 160-byte-block plaintext padding
//! - [`error`] -- `WireError` enum

pub mod addrs;
pub mod error;
pub mod keys;
pub mod messages;
pub mod padding;
