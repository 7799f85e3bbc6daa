//! Outgoing message dispatch.
//!
//! An [`OutgoingMessage`] is one dispatch of an already-serialized plaintext,
//! stamped with a caller-supplied timestamp that the server uses for
//! deduplication and that never changes across retries. Per recipient the
//! dispatcher discovers active devices, builds or refreshes sessions,
//! encrypts a padded payload for every device, posts the bundle, and
//! reconciles the local device set against the server's when they disagree
//! (HTTP 409/410). Every outcome is delivered through the registered
//! observers: exactly one terminal `sent` or `error` observation per
//! [`send_to_addr`](OutgoingMessage::send_to_addr) call.
//!
//! Dispatches are not cancellable; once started they run to a terminal
//! event. Observer callbacks run sequentially on the dispatch task, so
//! within one dispatch a slow `sent` handler cannot be overtaken by a later
//! `error` emission.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use futures::future::{try_join_all, BoxFuture};
use serde::de::DeserializeOwned;

use openrelay_wire::addrs::{Address, DeviceId, EncodedAddress};
use openrelay_wire::messages::{EncryptedDeviceMessage, MismatchedDevices, StaleDevices};
use openrelay_wire::padding::pad_plaintext;

use crate::error::{DispatchError, SessionError, TransportError};
use crate::events::{
    BoxError, ErrorEntry, IdentityKeyChange, KeyTrustDecision, Observers, SentEntry,
};
use crate::session::{SessionCipher, SessionLayer};
use crate::store::SessionStore;
use crate::transport::SignalTransport;

/// Phase tags attached to error entries.
pub mod reason {
    pub const GET_DEVICE_IDS: &str = "Failed to get device ids for address";
    pub const GET_KEYS: &str = "Failed to retrieve new device keys for address";
    pub const SEND: &str = "Failed to send to address";
    pub const CREATE_MESSAGE: &str = "Failed to create message";
    pub const RELOAD_KEYS: &str = "Failed to reload device keys";
    pub const RETRY_LIMIT: &str = "Hit retry limit attempting to reload device list";
}

/// One outgoing dispatch. Single-use: construct, register observers, then
/// call [`send_to_addr`](Self::send_to_addr) once per recipient.
///
/// Callers serialize the top-level operations of one dispatch; concurrent
/// dispatches to the same address are outside the contract (the server's
/// duplicate-timestamp detection would catch the duplicate, but session
/// races would not be prevented).
pub struct OutgoingMessage {
    transport: Arc<dyn SignalTransport>,
    sessions: Arc<dyn SessionLayer>,
    store: Arc<dyn SessionStore>,
    timestamp: u64,
    message: Vec<u8>,
    observers: Observers,
    sent: Mutex<Vec<SentEntry>>,
    errors: Mutex<Vec<ErrorEntry>>,
}

impl OutgoingMessage {
    /// `message` is the serialized plaintext; `timestamp` is the dispatch
    /// send time in epoch milliseconds, preserved bit-exact in every retry.
    pub fn new(
        transport: Arc<dyn SignalTransport>,
        sessions: Arc<dyn SessionLayer>,
        store: Arc<dyn SessionStore>,
        timestamp: u64,
        message: Vec<u8>,
    ) -> Self {
        Self {
            transport,
            sessions,
            store,
            timestamp,
            message,
            observers: Observers::new(),
            sent: Mutex::new(Vec::new()),
            errors: Mutex::new(Vec::new()),
        }
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    /// Register a `sent` observer. Registration must happen before
    /// dispatching; handler failures are logged and never propagated.
    pub fn on_sent<F, Fut>(&mut self, handler: F)
    where
        F: Fn(SentEntry) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.observers.on_sent(handler);
    }

    /// Register an `error` observer.
    pub fn on_error<F, Fut>(&mut self, handler: F)
    where
        F: Fn(ErrorEntry) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.observers.on_error(handler);
    }

    /// Register a `keychange` observer. The handler decides whether a
    /// rotated identity key is trusted; with no handler registered every
    /// rotation is rejected.
    pub fn on_keychange<F, Fut>(&mut self, handler: F)
    where
        F: Fn(IdentityKeyChange) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = KeyTrustDecision> + Send + 'static,
    {
        self.observers.on_keychange(handler);
    }

    /// Acknowledgements recorded so far, in completion order.
    pub fn sent_entries(&self) -> Vec<SentEntry> {
        lock_log(&self.sent).clone()
    }

    /// Failures recorded so far, in completion order.
    pub fn error_entries(&self) -> Vec<ErrorEntry> {
        lock_log(&self.errors).clone()
    }

    /// Dispatch to one recipient.
    ///
    /// Never returns an error: every outcome, success or failure, is
    /// appended to the entry logs and delivered through the observers.
    pub async fn send_to_addr(&self, addr: &Address) {
        let stale = match self.get_stale_device_ids_for_addr(addr).await {
            Ok(ids) => ids,
            Err(e) => {
                self.register_error(addr, reason::GET_DEVICE_IDS, e).await;
                return;
            }
        };

        if let Err(e) = self
            .get_keys_with_guard(addr, Some(stale.as_slice()), false)
            .await
        {
            self.register_error(addr, reason::GET_KEYS, e).await;
            return;
        }

        if let Err(e) = self.reload_devices_and_send(addr, true).await {
            self.register_error(addr, reason::SEND, e).await;
        }
    }

    /// Fetch pre-key bundles and build sessions for an address.
    ///
    /// With `update_devices = None` the complete bundle set is fetched in
    /// one RPC and processed in parallel. With an explicit device set each
    /// device's bundle is fetched in strict sequence; a 404 for a
    /// non-primary device prunes it from local storage instead of failing.
    pub async fn get_keys_for_addr(
        &self,
        addr: &Address,
        update_devices: Option<&[DeviceId]>,
    ) -> Result<(), DispatchError> {
        self.get_keys_with_guard(addr, update_devices, false).await
    }

    /// Key fetch with the identity-change prompt. `reentrant` marks the
    /// retry after an accepted change; a second conflict then fails
    /// unconditionally so one dispatch never prompts twice for the same
    /// address.
    fn get_keys_with_guard<'a>(
        &'a self,
        addr: &'a Address,
        update_devices: Option<&'a [DeviceId]>,
        reentrant: bool,
    ) -> BoxFuture<'a, Result<(), DispatchError>> {
        Box::pin(async move {
            match self.fetch_and_process_keys(addr, update_devices).await {
                Err(DispatchError::Session(SessionError::UntrustedIdentity { identity_key })) => {
                    if reentrant {
                        return Err(DispatchError::IdentityChanged {
                            addr: addr.clone(),
                            identity_key,
                        });
                    }
                    let change = IdentityKeyChange {
                        addr: addr.clone(),
                        identity_key: identity_key.clone(),
                    };
                    match self.observers.emit_keychange(&change).await {
                        KeyTrustDecision::Accept => {
                            tracing::info!(addr = %addr, "identity key change accepted; rebuilding sessions");
                            self.get_keys_with_guard(addr, update_devices, true).await
                        }
                        KeyTrustDecision::Reject => Err(DispatchError::IdentityChanged {
                            addr: addr.clone(),
                            identity_key,
                        }),
                    }
                }
                other => other,
            }
        })
    }

    async fn fetch_and_process_keys(
        &self,
        addr: &Address,
        update_devices: Option<&[DeviceId]>,
    ) -> Result<(), DispatchError> {
        match update_devices {
            None => {
                let response = self.transport.get_keys_for_addr(addr, None).await?;
                // The all-devices response is self-consistent, so the
                // bundles can be processed concurrently.
                try_join_all(
                    response
                        .devices
                        .iter()
                        .map(|bundle| self.sessions.process_pre_key(addr, bundle)),
                )
                .await?;
                Ok(())
            }
            Some(device_ids) => {
                // Strict sequence: the underlying library misbehaves when
                // per-device bundles are processed concurrently.
                for &device_id in device_ids {
                    let response = match self.transport.get_keys_for_addr(addr, Some(device_id)).await
                    {
                        Ok(response) => response,
                        Err(TransportError::Protocol { code: 404, .. })
                            if !device_id.is_primary() =>
                        {
                            tracing::debug!(addr = %addr, device_id = %device_id, "device gone; pruning local session");
                            self.remove_device_ids_for_addr(addr, &[device_id]).await?;
                            continue;
                        }
                        Err(e) => return Err(e.into()),
                    };
                    for bundle in &response.devices {
                        self.sessions.process_pre_key(addr, bundle).await?;
                    }
                }
                Ok(())
            }
        }
    }

    /// Locally known device ids whose session cipher reports no open
    /// session. An empty local list stays empty; the first transmit then
    /// elicits a 409 carrying the authoritative set.
    pub async fn get_stale_device_ids_for_addr(
        &self,
        addr: &Address,
    ) -> Result<Vec<DeviceId>, DispatchError> {
        let device_ids = self.store.get_device_ids(addr).await?;
        let mut stale = Vec::new();
        for device_id in device_ids {
            let cipher = self.sessions.cipher(addr, device_id);
            if !cipher.has_open_session().await? {
                stale.push(device_id);
            }
        }
        Ok(stale)
    }

    /// Delete the session records for the given devices. Missing records
    /// are tolerated by the store.
    pub async fn remove_device_ids_for_addr(
        &self,
        addr: &Address,
        device_ids: &[DeviceId],
    ) -> Result<(), DispatchError> {
        for &device_id in device_ids {
            let encoded = EncodedAddress::new(addr.clone(), device_id);
            self.store.remove_session(&encoded).await?;
        }
        Ok(())
    }

    /// Re-read the device list from storage (reconciliation may have
    /// changed it since entry) and transmit.
    async fn reload_devices_and_send(
        &self,
        addr: &Address,
        recurse: bool,
    ) -> Result<(), DispatchError> {
        let device_ids = self.store.get_device_ids(addr).await?;
        self.do_send_message(addr, device_ids, recurse).await
    }

    /// Encrypt the padded plaintext for every device and transmit the
    /// bundle, driving 409/410 reconciliation.
    ///
    /// `recurse` bounds the reconciliation: a 409 re-enters with the bound
    /// intact (the server's device set converges), a 410 re-enters with
    /// recursion spent (a second 410 means divergence and terminates with
    /// a retry-limit error).
    fn do_send_message<'a>(
        &'a self,
        addr: &'a Address,
        device_ids: Vec<DeviceId>,
        recurse: bool,
    ) -> BoxFuture<'a, Result<(), DispatchError>> {
        Box::pin(async move {
            let padded = pad_plaintext(&self.message);

            // Cipher handles are retained across the transmit: the 410
            // handler closes stale sessions through them before re-fetching
            // keys.
            let mut ciphers: HashMap<DeviceId, Arc<dyn SessionCipher>> = HashMap::new();
            let mut encrypts = Vec::with_capacity(device_ids.len());
            for &device_id in &device_ids {
                let cipher = self.sessions.cipher(addr, device_id);
                ciphers.insert(device_id, Arc::clone(&cipher));
                let padded = &padded;
                encrypts.push(async move {
                    let descriptor = cipher.encrypt(padded).await?;
                    Ok::<_, SessionError>(EncryptedDeviceMessage::new(
                        descriptor.message_type,
                        device_id,
                        descriptor.registration_id,
                        &descriptor.body,
                    ))
                });
            }

            let messages = match try_join_all(encrypts).await {
                Ok(messages) => messages,
                Err(e) => {
                    self.register_error(addr, reason::CREATE_MESSAGE, e.into())
                        .await;
                    return Ok(());
                }
            };

            match self
                .transport
                .send_messages(addr, &messages, self.timestamp)
                .await
            {
                Ok(()) => {
                    self.register_sent(addr).await;
                    Ok(())
                }
                Err(TransportError::Protocol {
                    code: code @ (409 | 410),
                    response,
                }) => {
                    if !recurse {
                        self.register_error(
                            addr,
                            reason::RETRY_LIMIT,
                            DispatchError::RetryLimit { addr: addr.clone() },
                        )
                        .await;
                        return Ok(());
                    }

                    let recovery = if code == 409 {
                        self.recover_from_mismatch(addr, response).await
                    } else {
                        self.recover_from_stale(addr, response, &ciphers).await
                    };
                    if let Err(e) = recovery {
                        self.register_error(addr, reason::RELOAD_KEYS, e).await;
                        return Ok(());
                    }

                    // A 409 reflects the server's authoritative device set
                    // and may recover again; a 410 may not.
                    self.reload_devices_and_send(addr, code == 409).await
                }
                Err(TransportError::Protocol { code: 404, .. }) => {
                    Err(DispatchError::UnregisteredUser { addr: addr.clone() })
                }
                Err(TransportError::Protocol { code, response }) => {
                    Err(DispatchError::SendRejected {
                        code,
                        detail: response
                            .map(|body| body.to_string())
                            .unwrap_or_else(|| "no response body".to_string()),
                    })
                }
                // Network-level failures pass through unchanged; callers
                // treat them as retriable later.
                Err(e) => Err(e.into()),
            }
        })
    }

    /// 409 recovery: prune the server-reported extra devices, then fetch
    /// keys for the missing ones.
    async fn recover_from_mismatch(
        &self,
        addr: &Address,
        response: Option<serde_json::Value>,
    ) -> Result<(), DispatchError> {
        let mismatch: MismatchedDevices = parse_device_payload(409, response)?;
        tracing::info!(
            addr = %addr,
            extra = ?mismatch.extra_devices,
            missing = ?mismatch.missing_devices,
            "server device set disagrees; reconciling"
        );

        if !mismatch.extra_devices.is_empty() {
            self.remove_device_ids_for_addr(addr, &mismatch.extra_devices)
                .await?;
        }
        if !mismatch.missing_devices.is_empty() {
            self.get_keys_with_guard(addr, Some(mismatch.missing_devices.as_slice()), false)
                .await?;
        }
        Ok(())
    }

    /// 410 recovery: close the open session of every stale device through
    /// its retained cipher, then fetch fresh keys for them.
    async fn recover_from_stale(
        &self,
        addr: &Address,
        response: Option<serde_json::Value>,
        ciphers: &HashMap<DeviceId, Arc<dyn SessionCipher>>,
    ) -> Result<(), DispatchError> {
        let stale: StaleDevices = parse_device_payload(410, response)?;
        tracing::info!(addr = %addr, stale = ?stale.stale_devices, "server reports stale devices; rebuilding sessions");

        for &device_id in &stale.stale_devices {
            let cipher = match ciphers.get(&device_id) {
                Some(cipher) => Arc::clone(cipher),
                // A device outside the transmitted set; close through a
                // fresh handle.
                None => self.sessions.cipher(addr, device_id),
            };
            cipher.close_open_session().await?;
        }

        self.get_keys_with_guard(addr, Some(stale.stale_devices.as_slice()), false)
            .await?;
        Ok(())
    }

    async fn register_sent(&self, addr: &Address) {
        tracing::debug!(addr = %addr, timestamp = self.timestamp, "message sent");
        let entry = SentEntry {
            addr: addr.clone(),
            timestamp: self.timestamp,
        };
        lock_log(&self.sent).push(entry.clone());
        self.observers.emit_sent(&entry).await;
    }

    async fn register_error(&self, addr: &Address, reason: &str, error: DispatchError) {
        tracing::warn!(addr = %addr, reason, error = %error, "dispatch failed");
        let entry = ErrorEntry {
            addr: addr.clone(),
            reason: reason.to_string(),
            timestamp: self.timestamp,
            error,
        };
        lock_log(&self.errors).push(entry.clone());
        self.observers.emit_error(&entry).await;
    }
}

/// Lock an entry log, recovering the guard from a poisoned mutex. The logs
/// hold plain data that stays valid across a panic elsewhere, so a poison
/// must not take down the dispatch or its result accessors.
fn lock_log<T>(log: &Mutex<Vec<T>>) -> MutexGuard<'_, Vec<T>> {
    log.lock().unwrap_or_else(|e| e.into_inner())
}

/// Decode a 409/410 device payload out of the raw protocol response.
fn parse_device_payload<T: DeserializeOwned>(
    code: u16,
    response: Option<serde_json::Value>,
) -> Result<T, DispatchError> {
    let body = response.ok_or(DispatchError::SendRejected {
        code,
        detail: "missing device payload".to_string(),
    })?;
    serde_json::from_value(body).map_err(|e| DispatchError::SendRejected {
        code,
        detail: format!("undecodable device payload: {e}"),
    })
}
