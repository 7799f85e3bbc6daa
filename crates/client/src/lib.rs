//! openrelay-client -- outgoing secure-message dispatch for OpenRelay.
//!
//! The centrepiece is [`outgoing::OutgoingMessage`]: given a serialized
//! plaintext, a recipient address, and a timestamp, it discovers the
//! recipient's devices, builds or refreshes end-to-end sessions, encrypts a
//! padded payload per device, posts the ciphertext bundle, and reconciles
//! the local device set against the server's (HTTP 409/410) under a bounded
//! retry loop, surfacing per-recipient `sent`/`error`/`keychange` events.
//!
//! Cryptography, persistence, and the relay RPC surface are injected
//! collaborators ([`session::SessionLayer`], [`store::SessionStore`],
//! [`transport::SignalTransport`]); the crate ships an in-memory store, a
//! reqwest-based transport, and a background credential refresher.
//!
//! ## Modules
//!
//! - [`error`] -- error enums per seam plus the `DispatchError` taxonomy
//! - [`events`] -- `sent`/`error`/`keychange` observer registry
//! - [`session`] -- session cipher/builder seams
//! - [`store`] -- session-record storage seam and `MemorySessionStore`
//! - [`transport`] -- relay RPC seam and the HTTP binding
//! - [`outgoing`] -- the dispatcher
//! - [`credentials`] -- bearer-token source and refresh loop
//! - [`config`] -- client configuration

pub mod config;
pub mod credentials;
pub mod error;
pub mod events;
pub mod outgoing;
pub mod session;
pub mod store;
pub mod transport;
