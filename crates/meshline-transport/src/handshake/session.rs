//! Handshake session state machine (§4.9): a three-message XX-style
//! pattern. Modeled as an explicit step enum per §9 REDESIGN FLAGS
//! ("nested coroutine/callback chains for handshakes" → "explicit state
//! machine with a typed step enum").

use meshline_proto::crypt::LinkCipher;
use meshline_proto::identity::{EphemeralKeypair, HandshakeTranscript, StaticKeypair};
use meshline_proto::hash::AddressHash;

use crate::error::HandshakeError;

const PROTOCOL_NAME: &[u8] = b"meshline-handshake-xx-v1";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Initiator,
    Responder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Initialized,
    WaitingForE,
    WaitingForSe,
    WaitingForS,
    Established,
}

pub struct HandshakeSession {
    pub peer_id: AddressHash,
    pub role: Role,
    pub state: SessionState,
    static_keypair: StaticKeypair,
    ephemeral_keypair: Option<EphemeralKeypair>,
    transcript: HandshakeTranscript,
    remote_ephemeral: Option<[u8; 32]>,
    pub remote_static: Option<[u8; 32]>,
}

pub struct EstablishedLink {
    pub send_cipher: LinkCipher,
    pub recv_cipher: LinkCipher,
    pub remote_static: [u8; 32],
}

impl HandshakeSession {
    pub fn new_initiator(peer_id: AddressHash, static_keypair: StaticKeypair) -> Self {
        let ephemeral_keypair = EphemeralKeypair::generate();
        let mut transcript = HandshakeTranscript::new(PROTOCOL_NAME);
        // Mixed here (rather than in `message_1`) so the initiator's
        // transcript reflects its own ephemeral key the moment it's
        // generated, matching the responder's first `mix` in
        // `handle_message_1`.
        transcript.mix(&ephemeral_keypair.public_bytes());
        Self {
            peer_id,
            role: Role::Initiator,
            state: SessionState::WaitingForSe,
            static_keypair,
            ephemeral_keypair: Some(ephemeral_keypair),
            transcript,
            remote_ephemeral: None,
            remote_static: None,
        }
    }

    pub fn new_responder(peer_id: AddressHash, static_keypair: StaticKeypair) -> Self {
        Self {
            peer_id,
            role: Role::Responder,
            state: SessionState::Initialized,
            static_keypair,
            ephemeral_keypair: None,
            transcript: HandshakeTranscript::new(PROTOCOL_NAME),
            remote_ephemeral: None,
            remote_static: None,
        }
    }

    /// Message 1 (initiator -> responder): the initiator's ephemeral
    /// public key.
    pub fn message_1(&self) -> [u8; 32] {
        self.ephemeral_keypair.as_ref().expect("initiator has an ephemeral key").public_bytes()
    }

    /// Responder processes message 1 and produces message 2: its own
    /// ephemeral public key plus its static public key, encrypted under a
    /// key derived from the ephemeral-ephemeral DH so far.
    pub fn handle_message_1(
        &mut self,
        initiator_ephemeral: [u8; 32],
    ) -> Result<([u8; 32], Vec<u8>), HandshakeError> {
        if self.state != SessionState::Initialized {
            return Err(HandshakeError::UnexpectedStep);
        }
        self.remote_ephemeral = Some(initiator_ephemeral);
        self.transcript.mix(&initiator_ephemeral);

        let responder_ephemeral = EphemeralKeypair::generate();
        let responder_ephemeral_bytes = responder_ephemeral.public_bytes();
        self.transcript.mix(&responder_ephemeral_bytes);

        let ee = responder_ephemeral
            .diffie_hellman(&meshline_proto::identity::public_key_from_bytes(initiator_ephemeral));
        self.transcript.mix(&ee);

        // Message 2 flows responder -> initiator, so it's encrypted
        // under the r2i key; the initiator decrypts it with the same
        // key (see `handle_message_2`).
        let (_, r2i) = self.transcript.split();
        let cipher = LinkCipher::new(*r2i.as_bytes(), *r2i.as_bytes());
        let encrypted_static = cipher.encrypt(&self.static_keypair.public_bytes());

        self.state = SessionState::WaitingForS;
        Ok((responder_ephemeral_bytes, encrypted_static))
    }

    /// Initiator processes message 2 and produces message 3: its own
    /// static public key, encrypted under the same transcript.
    pub fn handle_message_2(
        &mut self,
        responder_ephemeral: [u8; 32],
        encrypted_static: &[u8],
        expected_public_key: Option<[u8; 32]>,
    ) -> Result<Vec<u8>, HandshakeError> {
        if self.state != SessionState::WaitingForSe {
            return Err(HandshakeError::UnexpectedStep);
        }
        self.remote_ephemeral = Some(responder_ephemeral);
        self.transcript.mix(&responder_ephemeral);

        let ephemeral = self.ephemeral_keypair.take().expect("initiator ephemeral key present");
        let ee = ephemeral
            .diffie_hellman(&meshline_proto::identity::public_key_from_bytes(responder_ephemeral));
        self.transcript.mix(&ee);

        let (_, rx) = self.transcript.split();
        let cipher = LinkCipher::new(*rx.as_bytes(), *rx.as_bytes());
        let remote_static_bytes = cipher
            .decrypt(encrypted_static)
            .map_err(|_| HandshakeError::AuthenticationFailed)?;
        let mut remote_static = [0u8; 32];
        if remote_static_bytes.len() != 32 {
            return Err(HandshakeError::AuthenticationFailed);
        }
        remote_static.copy_from_slice(&remote_static_bytes);

        if let Some(expected) = expected_public_key {
            if expected != remote_static {
                return Err(HandshakeError::KeyPinningFailed);
            }
        }
        self.remote_static = Some(remote_static);

        let own_static = self.static_keypair.public_bytes();
        let (tx, _) = self.transcript.split();
        let outgoing_cipher = LinkCipher::new(*tx.as_bytes(), *tx.as_bytes());
        let encrypted_own_static = outgoing_cipher.encrypt(&own_static);

        self.state = SessionState::WaitingForS;
        Ok(encrypted_own_static)
    }

    /// Responder processes message 3, completing the handshake.
    pub fn handle_message_3(
        &mut self,
        encrypted_static: &[u8],
        expected_public_key: Option<[u8; 32]>,
    ) -> Result<(), HandshakeError> {
        if self.state != SessionState::WaitingForS {
            return Err(HandshakeError::UnexpectedStep);
        }
        // Message 3 flows initiator -> responder, under the i2r key
        // (matches the encrypt side in `handle_message_2`).
        let (i2r, _) = self.transcript.split();
        let cipher = LinkCipher::new(*i2r.as_bytes(), *i2r.as_bytes());
        let remote_static_bytes = cipher
            .decrypt(encrypted_static)
            .map_err(|_| HandshakeError::AuthenticationFailed)?;
        let mut remote_static = [0u8; 32];
        if remote_static_bytes.len() != 32 {
            return Err(HandshakeError::AuthenticationFailed);
        }
        remote_static.copy_from_slice(&remote_static_bytes);

        if let Some(expected) = expected_public_key {
            if expected != remote_static {
                return Err(HandshakeError::KeyPinningFailed);
            }
        }
        self.remote_static = Some(remote_static);
        self.state = SessionState::Established;
        Ok(())
    }

    /// Finalizes an initiator session once message 3 has been sent, and
    /// derives the two directional `SecureLink` ciphers.
    pub fn finish_initiator(mut self) -> Result<EstablishedLink, HandshakeError> {
        self.state = SessionState::Established;
        self.into_established_link()
    }

    pub fn into_established_link(self) -> Result<EstablishedLink, HandshakeError> {
        if self.state != SessionState::Established {
            return Err(HandshakeError::UnexpectedStep);
        }
        let remote_static = self.remote_static.ok_or(HandshakeError::NoSession)?;
        let (i2r, r2i) = self.transcript.split();
        let (send_key, recv_key) = match self.role {
            Role::Initiator => (*i2r.as_bytes(), *r2i.as_bytes()),
            Role::Responder => (*r2i.as_bytes(), *i2r.as_bytes()),
        };
        Ok(EstablishedLink {
            send_cipher: LinkCipher::new(send_key, send_key),
            recv_cipher: LinkCipher::new(recv_key, recv_key),
            remote_static,
        })
    }
}
