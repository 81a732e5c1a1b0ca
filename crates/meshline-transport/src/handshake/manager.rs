//! Handshake Manager orchestration (§4.9): drives a peer's three-message
//! exchange to completion, holds the resulting `SecureLink`s, and rekeys
//! them on a timer. Plays the role `transport::links.rs`'s `Transport`
//! methods play over `Link` objects — a keyed map of live state behind a
//! `Mutex`, mutated by short-lived lock/await/release calls — and the
//! periodic rekey sweep is shaped after `transport::jobs::manage_transport`'s
//! `tokio::select!` loop.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use meshline_proto::crypt::LinkCipher;
use meshline_proto::error::ProtoError;
use meshline_proto::hash::AddressHash;
use meshline_proto::identity::StaticKeypair;
use tokio::sync::{broadcast, oneshot, Mutex};
use tokio_util::sync::CancellationToken;

use super::session::{EstablishedLink, HandshakeSession};
use crate::error::HandshakeError;

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);
const REKEY_INTERVAL: Duration = Duration::from_secs(3600);
const REKEY_CHECK_INTERVAL: Duration = Duration::from_secs(60);
const MESSAGE_REKEY_THRESHOLD: u64 = 10_000;
const LINK_HEALTH_TIMEOUT: Duration = Duration::from_secs(24 * 3600);
const REKEY_SIGNAL_CAPACITY: usize = 64;

/// Delivers one handshake wire message to `peer_id` over whichever
/// transport the caller is running the handshake over. Kept separate
/// from the `Transport` trait (§4.12) since handshake messages are a
/// narrow three-step exchange, not a `Packet`.
#[async_trait]
pub trait HandshakeTransport: Send + Sync {
    async fn send_handshake(&self, peer_id: AddressHash, payload: Vec<u8>) -> Result<(), HandshakeError>;
}

pub struct HandshakeManagerConfig {
    pub handshake_timeout: Duration,
    pub rekey_interval: Duration,
    pub rekey_check_interval: Duration,
}

impl Default for HandshakeManagerConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: HANDSHAKE_TIMEOUT,
            rekey_interval: REKEY_INTERVAL,
            rekey_check_interval: REKEY_CHECK_INTERVAL,
        }
    }
}

/// An established link plus the bookkeeping the manager needs to decide
/// when it must be rekeyed (§4.9 rekey policy).
pub struct SecureLink {
    pub link: EstablishedLink,
    pub established_at: Instant,
    message_count: AtomicU64,
}

impl SecureLink {
    fn new(link: EstablishedLink) -> Self {
        Self { link, established_at: Instant::now(), message_count: AtomicU64::new(0) }
    }

    /// Past 1h old or past 10,000 messages, a link must be rekeyed (§3, §4.9).
    fn needs_rekey(&self, rekey_interval: Duration) -> bool {
        self.established_at.elapsed() >= rekey_interval
            || self.message_count.load(Ordering::Relaxed) >= MESSAGE_REKEY_THRESHOLD
    }

    /// A link's health fails after 24h regardless of `rekey_interval`
    /// (§3) — a link this stale is not reused even if the application
    /// hasn't yet reacted to a `rekey_required` signal.
    pub fn is_healthy(&self) -> bool {
        self.established_at.elapsed() < LINK_HEALTH_TIMEOUT
    }

    pub fn message_count(&self) -> u64 {
        self.message_count.load(Ordering::Relaxed)
    }

    pub fn send_cipher(&self) -> &LinkCipher {
        &self.link.send_cipher
    }

    pub fn recv_cipher(&self) -> &LinkCipher {
        &self.link.recv_cipher
    }

    /// Encrypts on the send side, counting the message toward the rekey threshold.
    pub fn encrypt(&self, plaintext: &[u8]) -> Vec<u8> {
        self.message_count.fetch_add(1, Ordering::Relaxed);
        self.link.send_cipher.encrypt(plaintext)
    }

    /// Decrypts on the receive side, counting the message toward the rekey threshold.
    pub fn decrypt(&self, framed: &[u8]) -> Result<Vec<u8>, ProtoError> {
        self.message_count.fetch_add(1, Ordering::Relaxed);
        self.link.recv_cipher.decrypt(framed)
    }
}

/// Wire framing for a handshake step: `[step_byte, ...fields]`. Step 1
/// carries just the initiator's ephemeral key; steps 2 and 3 additionally
/// carry a length-prefixed encrypted static key.
fn encode_step1(ephemeral: [u8; 32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + 32);
    out.push(1);
    out.extend_from_slice(&ephemeral);
    out
}

fn encode_step23(step: u8, ephemeral: Option<[u8; 32]>, encrypted_static: &[u8]) -> Vec<u8> {
    let mut out = vec![step];
    if let Some(e) = ephemeral {
        out.extend_from_slice(&e);
    }
    out.extend_from_slice(&(encrypted_static.len() as u32).to_be_bytes());
    out.extend_from_slice(encrypted_static);
    out
}

fn decode_step1(payload: &[u8]) -> Result<[u8; 32], HandshakeError> {
    if payload.len() != 32 {
        return Err(HandshakeError::UnexpectedStep);
    }
    let mut ephemeral = [0u8; 32];
    ephemeral.copy_from_slice(payload);
    Ok(ephemeral)
}

fn decode_step2(payload: &[u8]) -> Result<([u8; 32], Vec<u8>), HandshakeError> {
    if payload.len() < 32 + 4 {
        return Err(HandshakeError::UnexpectedStep);
    }
    let mut ephemeral = [0u8; 32];
    ephemeral.copy_from_slice(&payload[..32]);
    let len = u32::from_be_bytes(payload[32..36].try_into().unwrap()) as usize;
    let body = payload.get(36..36 + len).ok_or(HandshakeError::UnexpectedStep)?;
    Ok((ephemeral, body.to_vec()))
}

fn decode_step3(payload: &[u8]) -> Result<Vec<u8>, HandshakeError> {
    if payload.len() < 4 {
        return Err(HandshakeError::UnexpectedStep);
    }
    let len = u32::from_be_bytes(payload[..4].try_into().unwrap()) as usize;
    let body = payload.get(4..4 + len).ok_or(HandshakeError::UnexpectedStep)?;
    Ok(body.to_vec())
}

pub struct HandshakeManager {
    identity: StaticKeypair,
    config: HandshakeManagerConfig,
    links: Mutex<HashMap<AddressHash, Arc<SecureLink>>>,
    peer_locks: Mutex<HashMap<AddressHash, Arc<Mutex<()>>>>,
    pending_step2: Mutex<HashMap<AddressHash, oneshot::Sender<Vec<u8>>>>,
    responder_sessions: Mutex<HashMap<AddressHash, HandshakeSession>>,
    rekey_tx: broadcast::Sender<AddressHash>,
    cancel: CancellationToken,
}

impl HandshakeManager {
    pub fn new(identity: StaticKeypair, config: HandshakeManagerConfig) -> Arc<Self> {
        let (rekey_tx, _) = broadcast::channel(REKEY_SIGNAL_CAPACITY);
        Arc::new(Self {
            identity,
            config,
            links: Mutex::new(HashMap::new()),
            peer_locks: Mutex::new(HashMap::new()),
            pending_step2: Mutex::new(HashMap::new()),
            responder_sessions: Mutex::new(HashMap::new()),
            rekey_tx,
            cancel: CancellationToken::new(),
        })
    }

    /// Subscribes to `rekey_required` notifications (§4.9): the
    /// background sweep fires one per peer whose link has crossed its
    /// rekey threshold. The application is expected to call
    /// `initiate_handshake` again for that peer; the stale link stays in
    /// place (and usable) until that new handshake completes and
    /// replaces it.
    pub fn subscribe_rekey_required(&self) -> broadcast::Receiver<AddressHash> {
        self.rekey_tx.subscribe()
    }

    async fn peer_lock(&self, peer_id: AddressHash) -> Arc<Mutex<()>> {
        self.peer_locks.lock().await.entry(peer_id).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    /// Drives a full initiator handshake with `peer_id`, unless a live,
    /// not-yet-due-for-rekey link is already held — then that link is
    /// reused. A second caller racing on the same peer blocks on the
    /// per-peer lock and, once it acquires it, re-checks for a link the
    /// first caller just established rather than handshaking twice.
    pub async fn initiate_handshake(
        self: &Arc<Self>,
        peer_id: AddressHash,
        transport: &dyn HandshakeTransport,
        expected_public_key: Option<[u8; 32]>,
    ) -> Result<Arc<SecureLink>, HandshakeError> {
        let lock = self.peer_lock(peer_id).await;
        let _guard = lock.lock().await;

        if let Some(existing) = self.links.lock().await.get(&peer_id) {
            if existing.is_healthy() && !existing.needs_rekey(self.config.rekey_interval) {
                return Ok(existing.clone());
            }
        }

        let mut session = HandshakeSession::new_initiator(peer_id, self.identity.clone());

        let (tx, rx) = oneshot::channel();
        self.pending_step2.lock().await.insert(peer_id, tx);

        // Every exit from this block, success or failure, must fall
        // through to the `pending_step2` cleanup below — a timeout or a
        // decode/pinning failure here must not leave a stale sender
        // behind for a message 2 that will never arrive.
        let outcome: Result<EstablishedLink, HandshakeError> = async {
            transport.send_handshake(peer_id, encode_step1(session.message_1())).await?;

            let step2_payload = tokio::time::timeout(self.config.handshake_timeout, rx)
                .await
                .map_err(|_| HandshakeError::Timeout)?
                .map_err(|_| HandshakeError::Timeout)?;

            let (responder_ephemeral, encrypted_static) = decode_step2(&step2_payload)?;
            let step3 = session.handle_message_2(responder_ephemeral, &encrypted_static, expected_public_key)?;

            transport.send_handshake(peer_id, encode_step23(3, None, &step3)).await?;

            session.finish_initiator()
        }
        .await;

        self.pending_step2.lock().await.remove(&peer_id);

        let link = outcome?;
        let secure_link = Arc::new(SecureLink::new(link));
        self.links.lock().await.insert(peer_id, secure_link.clone());
        Ok(secure_link)
    }

    /// Feeds an inbound handshake message to the manager. `step` is the
    /// first byte of the message (1, 2, or 3); steps 1 and 3 are handled
    /// here as the responder, step 2 resolves an initiator's in-flight
    /// `initiate_handshake` call.
    pub async fn handle_incoming_handshake(
        self: &Arc<Self>,
        peer_id: AddressHash,
        payload: &[u8],
        transport: &dyn HandshakeTransport,
        expected_public_key: Option<[u8; 32]>,
    ) -> Result<(), HandshakeError> {
        let (&step, body) = payload.split_first().ok_or(HandshakeError::UnexpectedStep)?;
        match step {
            1 => {
                let initiator_ephemeral = decode_step1(body)?;
                let mut session = HandshakeSession::new_responder(peer_id, self.identity.clone());
                let (responder_ephemeral, encrypted_static) =
                    session.handle_message_1(initiator_ephemeral)?;
                self.responder_sessions.lock().await.insert(peer_id, session);
                transport
                    .send_handshake(
                        peer_id,
                        encode_step23(2, Some(responder_ephemeral), &encrypted_static),
                    )
                    .await
            }
            2 => {
                if let Some(tx) = self.pending_step2.lock().await.remove(&peer_id) {
                    let _ = tx.send(body.to_vec());
                    Ok(())
                } else {
                    Err(HandshakeError::NoSession)
                }
            }
            3 => {
                let encrypted_static = decode_step3(body)?;
                let mut session = self
                    .responder_sessions
                    .lock()
                    .await
                    .remove(&peer_id)
                    .ok_or(HandshakeError::NoSession)?;
                session.handle_message_3(&encrypted_static, expected_public_key)?;
                let link = session.into_established_link()?;
                let secure_link = Arc::new(SecureLink::new(link));
                self.links.lock().await.insert(peer_id, secure_link);
                Ok(())
            }
            _ => Err(HandshakeError::UnexpectedStep),
        }
    }

    pub async fn get_link(&self, peer_id: &AddressHash) -> Option<Arc<SecureLink>> {
        self.links.lock().await.get(peer_id).cloned()
    }

    /// Drops a link, wiping its directional ciphers' key material
    /// (`LinkCipher`'s `Drop` impl zeroizes on the way out).
    pub async fn close_link(&self, peer_id: &AddressHash) {
        self.links.lock().await.remove(peer_id);
    }

    pub async fn close_all_links(&self) {
        self.links.lock().await.clear();
    }

    pub async fn get_connected_peers(&self) -> Vec<AddressHash> {
        self.links.lock().await.keys().copied().collect()
    }

    /// Spawns the background rekey-check sweep: every
    /// `rekey_check_interval`, every link whose age or message count has
    /// crossed its rekey threshold fires a `rekey_required` signal
    /// (§4.9). The link itself is left in place — it is replaced the
    /// next time the application re-handshakes that peer, not torn down
    /// here.
    pub fn start(self: &Arc<Self>) {
        let manager = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = manager.cancel.cancelled() => break,
                    _ = tokio::time::sleep(manager.config.rekey_check_interval) => {
                        let links = manager.links.lock().await;
                        for (peer_id, link) in links.iter() {
                            if link.needs_rekey(manager.config.rekey_interval) {
                                let _ = manager.rekey_tx.send(*peer_id);
                            }
                        }
                    }
                }
            }
        });
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Hands every outbound message straight to the other side's
    /// manager, with the reply path flipped so that side's own
    /// `send_handshake` calls (made while replying) land back here.
    struct LoopbackTransport {
        target: Arc<HandshakeManager>,
        reply_target: Arc<HandshakeManager>,
    }

    #[async_trait]
    impl HandshakeTransport for LoopbackTransport {
        async fn send_handshake(&self, peer_id: AddressHash, payload: Vec<u8>) -> Result<(), HandshakeError> {
            let reply_transport =
                LoopbackTransport { target: self.reply_target.clone(), reply_target: self.target.clone() };
            self.target.handle_incoming_handshake(peer_id, &payload, &reply_transport, None).await
        }
    }

    fn peer(tag: &[u8]) -> AddressHash {
        AddressHash::from_key_material(tag)
    }

    #[tokio::test]
    async fn initiator_and_responder_converge_on_a_usable_link() {
        let initiator_mgr = HandshakeManager::new(StaticKeypair::generate(), HandshakeManagerConfig::default());
        let responder_mgr = HandshakeManager::new(StaticKeypair::generate(), HandshakeManagerConfig::default());
        let session_id = peer(b"the-session");

        let transport_to_responder =
            LoopbackTransport { target: responder_mgr.clone(), reply_target: initiator_mgr.clone() };

        let link = initiator_mgr
            .initiate_handshake(session_id, &transport_to_responder, None)
            .await
            .unwrap();

        let peer_link = responder_mgr.get_link(&session_id).await.unwrap();
        let plaintext = b"across the mesh";
        let framed = link.send_cipher().encrypt(plaintext);
        let recovered = peer_link.recv_cipher().decrypt(&framed).unwrap();
        assert_eq!(recovered, plaintext);
    }

    #[tokio::test]
    async fn a_cached_link_is_reused_without_rehandshaking() {
        let manager = HandshakeManager::new(StaticKeypair::generate(), HandshakeManagerConfig::default());
        let peer_id = peer(b"cached-peer");
        let link = Arc::new(SecureLink::new(EstablishedLink {
            send_cipher: LinkCipher::new_from_key([0x42; 32]),
            recv_cipher: LinkCipher::new_from_key([0x43; 32]),
            remote_static: [0x99; 32],
        }));
        manager.links.lock().await.insert(peer_id, link.clone());

        struct PanicTransport;
        #[async_trait]
        impl HandshakeTransport for PanicTransport {
            async fn send_handshake(&self, _: AddressHash, _: Vec<u8>) -> Result<(), HandshakeError> {
                panic!("a cached, non-expired link must not trigger a new handshake");
            }
        }

        let reused = manager.initiate_handshake(peer_id, &PanicTransport, None).await.unwrap();
        assert_eq!(reused.link.remote_static, [0x99; 32]);
    }

    #[tokio::test]
    async fn close_link_removes_it_from_the_connected_set() {
        let manager = HandshakeManager::new(StaticKeypair::generate(), HandshakeManagerConfig::default());
        let peer_id = peer(b"closing-peer");
        manager.links.lock().await.insert(
            peer_id,
            Arc::new(SecureLink::new(EstablishedLink {
                send_cipher: LinkCipher::new_from_key([0x11; 32]),
                recv_cipher: LinkCipher::new_from_key([0x12; 32]),
                remote_static: [0x01; 32],
            })),
        );
        assert_eq!(manager.get_connected_peers().await.len(), 1);
        manager.close_link(&peer_id).await;
        assert!(manager.get_connected_peers().await.is_empty());
    }
}
