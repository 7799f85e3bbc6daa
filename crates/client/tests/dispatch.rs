//! End-to-end dispatch scenarios against recording mocks.
//!
//! The mock transport and session layer record every interaction so the
//! tests can assert on what actually went over the wire: device sets,
//! padded payloads, timestamps, reconciliation order, and the retry bound.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use openrelay_client::error::{DispatchError, SessionError, StoreError, TransportError};
use openrelay_client::events::{IdentityKeyChange, KeyTrustDecision, SentEntry};
use openrelay_client::outgoing::{reason, OutgoingMessage};
use openrelay_client::session::{CiphertextDescriptor, SessionCipher, SessionLayer};
use openrelay_client::store::{MemorySessionStore, SessionStore};
use openrelay_client::transport::SignalTransport;
use openrelay_wire::addrs::{Address, DeviceId, EncodedAddress};
use openrelay_wire::keys::{PreKeyBundle, PreKeyResponse, SignedPreKey};
use openrelay_wire::messages::EncryptedDeviceMessage;
use openrelay_wire::padding::PADDED_BLOCK_SIZE;

const TIMESTAMP: u64 = 1_723_456_789_012;
const PLAINTEXT: &[u8] = b"hello alice";

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("openrelay_client=debug")
        .try_init();
}

fn alice() -> Address {
    Address::new("alice")
}

fn encoded(addr: &str, device_id: u32) -> EncodedAddress {
    EncodedAddress::new(Address::new(addr), DeviceId::new(device_id))
}

fn device_ids(send: &RecordedSend) -> Vec<u32> {
    send.messages
        .iter()
        .map(|m| m.destination_device_id)
        .collect()
}

fn protocol_err(code: u16, body: serde_json::Value) -> TransportError {
    TransportError::Protocol {
        code,
        response: Some(body),
    }
}

fn bundle_for(device_id: DeviceId) -> PreKeyBundle {
    PreKeyBundle {
        device_id,
        identity_key: vec![5, 7, 7],
        registration_id: 4000 + device_id.0,
        signed_pre_key: SignedPreKey {
            key_id: 10,
            public_key: vec![5, 1],
            signature: vec![64; 4],
        },
        pre_key: None,
    }
}

// ─── Mock transport ──────────────────────────────────────────

#[derive(Debug, Clone)]
struct RecordedSend {
    addr: Address,
    messages: Vec<EncryptedDeviceMessage>,
    timestamp: u64,
}

#[derive(Default)]
struct MockTransport {
    /// Scripted results for successive transmits; once exhausted, Ok.
    send_script: Mutex<VecDeque<Result<(), TransportError>>>,
    sends: Mutex<Vec<RecordedSend>>,
    /// Scripted results for successive key fetches; once exhausted, a
    /// single-bundle response for the requested device.
    key_script: Mutex<VecDeque<Result<PreKeyResponse, TransportError>>>,
    key_fetches: Mutex<Vec<(Address, Option<DeviceId>)>>,
}

impl MockTransport {
    fn script_send(&self, result: Result<(), TransportError>) {
        self.send_script.lock().unwrap().push_back(result);
    }

    fn script_keys(&self, result: Result<PreKeyResponse, TransportError>) {
        self.key_script.lock().unwrap().push_back(result);
    }

    fn sends(&self) -> Vec<RecordedSend> {
        self.sends.lock().unwrap().clone()
    }

    fn key_fetches(&self) -> Vec<(Address, Option<DeviceId>)> {
        self.key_fetches.lock().unwrap().clone()
    }
}

#[async_trait]
impl SignalTransport for MockTransport {
    async fn get_keys_for_addr(
        &self,
        addr: &Address,
        device_id: Option<DeviceId>,
    ) -> Result<PreKeyResponse, TransportError> {
        self.key_fetches
            .lock()
            .unwrap()
            .push((addr.clone(), device_id));
        if let Some(result) = self.key_script.lock().unwrap().pop_front() {
            return result;
        }
        let device_id = device_id.unwrap_or(DeviceId::new(1));
        Ok(PreKeyResponse {
            identity_key: vec![5, 7, 7],
            devices: vec![bundle_for(device_id)],
        })
    }

    async fn send_messages(
        &self,
        addr: &Address,
        messages: &[EncryptedDeviceMessage],
        timestamp: u64,
    ) -> Result<(), TransportError> {
        self.sends.lock().unwrap().push(RecordedSend {
            addr: addr.clone(),
            messages: messages.to_vec(),
            timestamp,
        });
        self.send_script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(()))
    }
}

// ─── Mock session layer ──────────────────────────────────────

#[derive(Default)]
struct SessionState {
    /// Devices whose cipher reports no open session.
    stale: Mutex<HashSet<DeviceId>>,
    processed: Mutex<Vec<(Address, DeviceId)>>,
    /// Scripted results for successive process_pre_key calls; once
    /// exhausted, Ok.
    process_script: Mutex<VecDeque<Result<(), SessionError>>>,
    closed: Mutex<Vec<DeviceId>>,
    encrypt_error: Mutex<Option<SessionError>>,
    /// Where a successful pre-key build persists the session record, like
    /// a real session builder would.
    store: Mutex<Option<Arc<MemorySessionStore>>>,
}

#[derive(Default)]
struct MockSessions {
    state: Arc<SessionState>,
}

impl MockSessions {
    fn mark_no_open_session(&self, device_id: DeviceId) {
        self.state.stale.lock().unwrap().insert(device_id);
    }

    fn script_process(&self, result: Result<(), SessionError>) {
        self.state.process_script.lock().unwrap().push_back(result);
    }

    fn set_encrypt_error(&self, error: SessionError) {
        *self.state.encrypt_error.lock().unwrap() = Some(error);
    }

    fn processed(&self) -> Vec<(Address, DeviceId)> {
        self.state.processed.lock().unwrap().clone()
    }

    fn closed(&self) -> Vec<DeviceId> {
        self.state.closed.lock().unwrap().clone()
    }
}

struct MockCipher {
    device_id: DeviceId,
    state: Arc<SessionState>,
}

#[async_trait]
impl SessionCipher for MockCipher {
    async fn has_open_session(&self) -> Result<bool, SessionError> {
        Ok(!self.state.stale.lock().unwrap().contains(&self.device_id))
    }

    async fn encrypt(&self, padded: &[u8]) -> Result<CiphertextDescriptor, SessionError> {
        if let Some(error) = self.state.encrypt_error.lock().unwrap().clone() {
            return Err(error);
        }
        Ok(CiphertextDescriptor {
            message_type: 3,
            registration_id: 100 + self.device_id.0,
            body: padded.to_vec(),
        })
    }

    async fn close_open_session(&self) -> Result<(), SessionError> {
        self.state.closed.lock().unwrap().push(self.device_id);
        self.state.stale.lock().unwrap().insert(self.device_id);
        Ok(())
    }
}

#[async_trait]
impl SessionLayer for MockSessions {
    fn cipher(&self, _addr: &Address, device_id: DeviceId) -> Arc<dyn SessionCipher> {
        Arc::new(MockCipher {
            device_id,
            state: Arc::clone(&self.state),
        })
    }

    async fn process_pre_key(
        &self,
        addr: &Address,
        bundle: &PreKeyBundle,
    ) -> Result<(), SessionError> {
        self.state
            .processed
            .lock()
            .unwrap()
            .push((addr.clone(), bundle.device_id));
        if let Some(result) = self.state.process_script.lock().unwrap().pop_front() {
            if result.is_err() {
                return result;
            }
        }
        self.state.stale.lock().unwrap().remove(&bundle.device_id);
        if let Some(store) = self.state.store.lock().unwrap().as_ref() {
            store.put_session(
                &EncodedAddress::new(addr.clone(), bundle.device_id),
                vec![1],
            );
        }
        Ok(())
    }
}

// ─── Recording store ─────────────────────────────────────────

struct RecordingStore {
    inner: Arc<MemorySessionStore>,
    removed: Mutex<Vec<String>>,
}

impl Default for RecordingStore {
    fn default() -> Self {
        Self {
            inner: Arc::new(MemorySessionStore::new()),
            removed: Mutex::new(Vec::new()),
        }
    }
}

impl RecordingStore {
    fn removed(&self) -> Vec<String> {
        self.removed.lock().unwrap().clone()
    }
}

#[async_trait]
impl SessionStore for RecordingStore {
    async fn get_device_ids(&self, addr: &Address) -> Result<Vec<DeviceId>, StoreError> {
        self.inner.get_device_ids(addr).await
    }

    async fn remove_session(&self, encoded: &EncodedAddress) -> Result<(), StoreError> {
        self.removed.lock().unwrap().push(encoded.to_string());
        self.inner.remove_session(encoded).await
    }
}

// ─── Harness ─────────────────────────────────────────────────

fn harness(
    devices: &[u32],
) -> (
    Arc<MockTransport>,
    Arc<MockSessions>,
    Arc<RecordingStore>,
    OutgoingMessage,
) {
    init_tracing();
    let transport = Arc::new(MockTransport::default());
    let sessions = Arc::new(MockSessions::default());
    let store = Arc::new(RecordingStore::default());

    for &device in devices {
        store.inner.put_session(&encoded("alice", device), vec![1]);
    }
    *sessions.state.store.lock().unwrap() = Some(Arc::clone(&store.inner));

    let message = OutgoingMessage::new(
        Arc::clone(&transport) as Arc<dyn SignalTransport>,
        Arc::clone(&sessions) as Arc<dyn SessionLayer>,
        Arc::clone(&store) as Arc<dyn SessionStore>,
        TIMESTAMP,
        PLAINTEXT.to_vec(),
    );
    (transport, sessions, store, message)
}

// ─── Scenarios ───────────────────────────────────────────────

#[tokio::test]
async fn happy_path_delivers_to_all_devices() {
    let (transport, _sessions, store, mut message) = harness(&[1, 2]);

    let observed = Arc::new(Mutex::new(Vec::<SentEntry>::new()));
    let observed_clone = Arc::clone(&observed);
    message.on_sent(move |entry| {
        let observed = Arc::clone(&observed_clone);
        async move {
            observed.lock().unwrap().push(entry);
            Ok(())
        }
    });

    message.send_to_addr(&alice()).await;

    // Exactly one terminal observation: a sent entry, no errors.
    assert_eq!(
        message.sent_entries(),
        vec![SentEntry {
            addr: alice(),
            timestamp: TIMESTAMP
        }]
    );
    assert!(message.error_entries().is_empty());
    assert_eq!(observed.lock().unwrap().len(), 1);

    // One transmit carrying both devices, stamped with the dispatch time.
    let sends = transport.sends();
    assert_eq!(sends.len(), 1);
    assert_eq!(sends[0].addr, alice());
    assert_eq!(sends[0].timestamp, TIMESTAMP);
    assert_eq!(device_ids(&sends[0]), vec![1, 2]);
    assert_eq!(sends[0].messages[0].destination_registration_id, 101);
    assert_eq!(sends[0].messages[1].destination_registration_id, 102);

    // The transmitted content is the padded plaintext.
    for msg in &sends[0].messages {
        let padded = msg.content_bytes().unwrap();
        assert_eq!(padded.len() % PADDED_BLOCK_SIZE, PADDED_BLOCK_SIZE - 1);
        assert_eq!(&padded[..PLAINTEXT.len()], PLAINTEXT);
        assert_eq!(padded[PLAINTEXT.len()], 0x80);
        assert!(padded[PLAINTEXT.len() + 1..].iter().all(|&b| b == 0));
    }

    // Sessions were all open: no key fetches, no pruning.
    assert!(transport.key_fetches().is_empty());
    assert!(store.removed().is_empty());
}

#[tokio::test]
async fn extra_devices_are_pruned_and_resent() {
    let (transport, _sessions, store, message) = harness(&[1, 2, 3]);
    transport.script_send(Err(protocol_err(
        409,
        serde_json::json!({"extraDevices": [3], "missingDevices": []}),
    )));

    message.send_to_addr(&alice()).await;

    // The extra device was pruned before the retry transmit.
    assert_eq!(store.removed(), vec!["alice.3".to_string()]);
    assert!(transport.key_fetches().is_empty());

    let sends = transport.sends();
    assert_eq!(sends.len(), 2);
    assert_eq!(device_ids(&sends[0]), vec![1, 2, 3]);
    assert_eq!(device_ids(&sends[1]), vec![1, 2]);

    // The timestamp is preserved bit-exact across the retry.
    assert_eq!(sends[0].timestamp, TIMESTAMP);
    assert_eq!(sends[1].timestamp, TIMESTAMP);

    assert_eq!(message.sent_entries().len(), 1);
    assert!(message.error_entries().is_empty());
}

#[tokio::test]
async fn missing_devices_are_fetched_after_mismatch() {
    let (transport, sessions, _store, message) = harness(&[1]);
    transport.script_send(Err(protocol_err(
        409,
        serde_json::json!({"extraDevices": [], "missingDevices": [2]}),
    )));

    message.send_to_addr(&alice()).await;

    // Keys for the missing device were fetched and its session built.
    assert_eq!(transport.key_fetches(), vec![(alice(), Some(DeviceId::new(2)))]);
    assert_eq!(sessions.processed(), vec![(alice(), DeviceId::new(2))]);

    // The retry transmit includes the newly built device.
    let sends = transport.sends();
    assert_eq!(sends.len(), 2);
    assert_eq!(device_ids(&sends[0]), vec![1]);
    assert_eq!(device_ids(&sends[1]), vec![1, 2]);
    assert_eq!(message.sent_entries().len(), 1);
}

#[tokio::test]
async fn stale_devices_close_sessions_and_resend() {
    let (transport, sessions, _store, message) = harness(&[1, 2]);
    transport.script_send(Err(protocol_err(
        410,
        serde_json::json!({"staleDevices": [2]}),
    )));

    message.send_to_addr(&alice()).await;

    // The stale session was closed through the retained cipher, then
    // rebuilt from a fresh bundle.
    assert_eq!(sessions.closed(), vec![DeviceId::new(2)]);
    assert_eq!(transport.key_fetches(), vec![(alice(), Some(DeviceId::new(2)))]);
    assert_eq!(sessions.processed(), vec![(alice(), DeviceId::new(2))]);

    let sends = transport.sends();
    assert_eq!(sends.len(), 2);
    assert_eq!(device_ids(&sends[1]), vec![1, 2]);
    assert_eq!(message.sent_entries().len(), 1);
    assert!(message.error_entries().is_empty());
}

#[tokio::test]
async fn second_stale_response_hits_the_retry_limit() {
    let (transport, _sessions, _store, message) = harness(&[1, 2]);
    transport.script_send(Err(protocol_err(
        410,
        serde_json::json!({"staleDevices": [2]}),
    )));
    transport.script_send(Err(protocol_err(
        410,
        serde_json::json!({"staleDevices": [2]}),
    )));

    message.send_to_addr(&alice()).await;

    // No third transmit after the second 410.
    assert_eq!(transport.sends().len(), 2);
    assert!(message.sent_entries().is_empty());

    let errors = message.error_entries();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].reason, reason::RETRY_LIMIT);
    assert!(matches!(errors[0].error, DispatchError::RetryLimit { .. }));
}

#[tokio::test]
async fn mismatch_then_stale_recovers_then_succeeds() {
    let (transport, sessions, store, message) = harness(&[1, 2, 3]);
    transport.script_send(Err(protocol_err(
        409,
        serde_json::json!({"extraDevices": [3], "missingDevices": []}),
    )));
    transport.script_send(Err(protocol_err(
        410,
        serde_json::json!({"staleDevices": [2]}),
    )));

    message.send_to_addr(&alice()).await;

    assert_eq!(store.removed(), vec!["alice.3".to_string()]);
    assert_eq!(sessions.closed(), vec![DeviceId::new(2)]);
    assert_eq!(transport.sends().len(), 3);
    assert_eq!(device_ids(&transport.sends()[2]), vec![1, 2]);
    assert_eq!(message.sent_entries().len(), 1);
    assert!(message.error_entries().is_empty());
}

#[tokio::test]
async fn identity_change_accepted_retries_and_sends() {
    let (transport, sessions, _store, mut message) = harness(&[1]);
    sessions.mark_no_open_session(DeviceId::new(1));
    sessions.script_process(Err(SessionError::UntrustedIdentity {
        identity_key: vec![9, 9, 9],
    }));

    let changes = Arc::new(Mutex::new(Vec::<IdentityKeyChange>::new()));
    let changes_clone = Arc::clone(&changes);
    message.on_keychange(move |change| {
        let changes = Arc::clone(&changes_clone);
        async move {
            changes.lock().unwrap().push(change);
            KeyTrustDecision::Accept
        }
    });

    message.send_to_addr(&alice()).await;

    let changes = changes.lock().unwrap();
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].addr, alice());
    assert_eq!(changes[0].identity_key, vec![9, 9, 9]);

    // Both the rejected and the reentrant build attempt ran.
    assert_eq!(
        sessions.processed(),
        vec![(alice(), DeviceId::new(1)), (alice(), DeviceId::new(1))]
    );
    assert_eq!(message.sent_entries().len(), 1);
    assert!(message.error_entries().is_empty());
    assert_eq!(transport.sends().len(), 1);
}

#[tokio::test]
async fn identity_change_rejected_fails_the_dispatch() {
    let (transport, sessions, _store, message) = harness(&[1]);
    sessions.mark_no_open_session(DeviceId::new(1));
    sessions.script_process(Err(SessionError::UntrustedIdentity {
        identity_key: vec![9, 9, 9],
    }));
    // No keychange handler registered: the rotation is rejected.

    message.send_to_addr(&alice()).await;

    assert!(message.sent_entries().is_empty());
    assert!(transport.sends().is_empty());

    let errors = message.error_entries();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].reason, reason::GET_KEYS);
    match &errors[0].error {
        DispatchError::IdentityChanged { addr, identity_key } => {
            assert_eq!(addr, &alice());
            assert_eq!(identity_key, &vec![9, 9, 9]);
        }
        other => panic!("expected IdentityChanged, got: {other:?}"),
    }
}

#[tokio::test]
async fn repeated_identity_conflict_prompts_only_once() {
    let (_transport, sessions, _store, mut message) = harness(&[1]);
    sessions.mark_no_open_session(DeviceId::new(1));
    sessions.script_process(Err(SessionError::UntrustedIdentity {
        identity_key: vec![9, 9, 9],
    }));
    sessions.script_process(Err(SessionError::UntrustedIdentity {
        identity_key: vec![8, 8, 8],
    }));

    let prompts = Arc::new(Mutex::new(0usize));
    let prompts_clone = Arc::clone(&prompts);
    message.on_keychange(move |_change| {
        let prompts = Arc::clone(&prompts_clone);
        async move {
            *prompts.lock().unwrap() += 1;
            KeyTrustDecision::Accept
        }
    });

    message.send_to_addr(&alice()).await;

    // The reentrant guard stops the second conflict from prompting again.
    assert_eq!(*prompts.lock().unwrap(), 1);
    assert!(message.sent_entries().is_empty());
    let errors = message.error_entries();
    assert_eq!(errors.len(), 1);
    assert!(matches!(
        errors[0].error,
        DispatchError::IdentityChanged { .. }
    ));
}

#[tokio::test]
async fn unregistered_user_terminates_without_retries() {
    let (transport, _sessions, _store, message) = harness(&[1]);
    transport.script_send(Err(TransportError::Protocol {
        code: 404,
        response: None,
    }));

    message.send_to_addr(&alice()).await;

    assert_eq!(transport.sends().len(), 1);
    assert!(message.sent_entries().is_empty());

    let errors = message.error_entries();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].reason, reason::SEND);
    assert!(matches!(
        errors[0].error,
        DispatchError::UnregisteredUser { .. }
    ));
}

#[tokio::test]
async fn non_primary_device_404_prunes_silently() {
    let (transport, sessions, store, message) = harness(&[1, 2]);
    transport.script_keys(Err(TransportError::Protocol {
        code: 404,
        response: None,
    }));

    message
        .get_keys_for_addr(&alice(), Some(&[DeviceId::new(2)]))
        .await
        .unwrap();

    assert_eq!(store.removed(), vec!["alice.2".to_string()]);
    assert!(sessions.processed().is_empty());
}

#[tokio::test]
async fn primary_device_404_propagates() {
    let (transport, _sessions, store, message) = harness(&[1]);
    transport.script_keys(Err(TransportError::Protocol {
        code: 404,
        response: None,
    }));

    let result = message
        .get_keys_for_addr(&alice(), Some(&[DeviceId::new(1)]))
        .await;

    assert!(matches!(
        result,
        Err(DispatchError::Transport(TransportError::Protocol {
            code: 404,
            ..
        }))
    ));
    assert!(store.removed().is_empty());
}

#[tokio::test]
async fn explicit_device_fetch_runs_in_request_order() {
    let (transport, sessions, _store, message) = harness(&[]);

    message
        .get_keys_for_addr(&alice(), Some(&[DeviceId::new(2), DeviceId::new(3)]))
        .await
        .unwrap();

    assert_eq!(
        transport.key_fetches(),
        vec![
            (alice(), Some(DeviceId::new(2))),
            (alice(), Some(DeviceId::new(3))),
        ]
    );
    assert_eq!(
        sessions.processed(),
        vec![(alice(), DeviceId::new(2)), (alice(), DeviceId::new(3))]
    );
}

#[tokio::test]
async fn full_fetch_processes_every_returned_bundle() {
    let (transport, sessions, _store, message) = harness(&[]);
    transport.script_keys(Ok(PreKeyResponse {
        identity_key: vec![5, 7, 7],
        devices: vec![bundle_for(DeviceId::new(1)), bundle_for(DeviceId::new(2))],
    }));

    message.get_keys_for_addr(&alice(), None).await.unwrap();

    assert_eq!(transport.key_fetches(), vec![(alice(), None)]);
    let mut processed = sessions.processed();
    processed.sort_by_key(|(_, device_id)| *device_id);
    assert_eq!(
        processed,
        vec![(alice(), DeviceId::new(1)), (alice(), DeviceId::new(2))]
    );
}

#[tokio::test]
async fn encryption_failure_emits_create_message_error() {
    let (transport, sessions, _store, message) = harness(&[1]);
    sessions.set_encrypt_error(SessionError::Protocol("ratchet desync".into()));

    message.send_to_addr(&alice()).await;

    assert!(transport.sends().is_empty());
    assert!(message.sent_entries().is_empty());

    let errors = message.error_entries();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].reason, reason::CREATE_MESSAGE);
    assert!(matches!(errors[0].error, DispatchError::Session(_)));
}

#[tokio::test]
async fn network_error_passes_through_unwrapped() {
    let (transport, _sessions, _store, message) = harness(&[1]);
    transport.script_send(Err(TransportError::Network("connection reset".into())));

    message.send_to_addr(&alice()).await;

    let errors = message.error_entries();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].reason, reason::SEND);
    assert!(matches!(
        errors[0].error,
        DispatchError::Transport(TransportError::Network(_))
    ));
}

#[tokio::test]
async fn failed_recovery_emits_reload_keys_error() {
    let (transport, sessions, _store, message) = harness(&[1]);
    transport.script_send(Err(protocol_err(
        410,
        serde_json::json!({"staleDevices": [1]}),
    )));
    transport.script_keys(Err(TransportError::Protocol {
        code: 500,
        response: None,
    }));

    message.send_to_addr(&alice()).await;

    // The session was closed, but the key re-fetch failed and terminated
    // the dispatch.
    assert_eq!(sessions.closed(), vec![DeviceId::new(1)]);
    assert_eq!(transport.sends().len(), 1);
    assert!(message.sent_entries().is_empty());

    let errors = message.error_entries();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].reason, reason::RELOAD_KEYS);
    assert!(matches!(
        errors[0].error,
        DispatchError::Transport(TransportError::Protocol { code: 500, .. })
    ));
}

#[tokio::test]
async fn other_protocol_error_is_a_send_rejection() {
    let (transport, _sessions, _store, message) = harness(&[1]);
    transport.script_send(Err(protocol_err(
        413,
        serde_json::json!({"error": "payload too large"}),
    )));

    message.send_to_addr(&alice()).await;

    assert_eq!(transport.sends().len(), 1);
    assert!(message.sent_entries().is_empty());

    let errors = message.error_entries();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].reason, reason::SEND);
    assert!(matches!(
        errors[0].error,
        DispatchError::SendRejected { code: 413, .. }
    ));
}

#[tokio::test]
async fn empty_local_device_list_recovers_from_mismatch() {
    let (transport, _sessions, _store, message) = harness(&[]);
    transport.script_send(Err(protocol_err(
        409,
        serde_json::json!({"extraDevices": [], "missingDevices": [1, 2]}),
    )));

    message.send_to_addr(&alice()).await;

    // The empty first transmit elicited the authoritative set, which was
    // fetched, built, and delivered to.
    let sends = transport.sends();
    assert_eq!(sends.len(), 2);
    assert!(sends[0].messages.is_empty());
    assert_eq!(device_ids(&sends[1]), vec![1, 2]);
    assert_eq!(message.sent_entries().len(), 1);
    assert!(message.error_entries().is_empty());
}
