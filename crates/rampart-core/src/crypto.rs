//! Cryptographic session layer for the v8 client protocol.
//!
//! Each connection owns one `Session`. The session starts empty, learns the
//! peer's static Curve25519 key, and walks a one-way state machine as the
//! handshake progresses:
//!
//! ```text
//!   Idle ............ no key material, nothing is legal but key install
//!   InitialKey ...... peer static key + two-key Blake2b hashing nonce
//!   BlakeNonce ...... hashing nonce re-derived over the server nonce
//!   SecondKey ....... derived symmetric key + two counter nonces
//! ```
//!
//! In the two middle states traffic is public-key box (Curve25519 +
//! XSalsa20-Poly1305) under the hashing nonce. In SecondKey traffic is
//! secret-key box under 24-byte little-endian counter nonces, bumped by two
//! before every operation. Ciphertext in both phases is the NaCl combined
//! form: a 16-byte Poly1305 tag followed by the encrypted body.
//!
//! Key material is zeroized on drop. There is no unsafe code in this module.

use crypto_box::{aead::OsRng, SalsaBox};
use rand::RngCore;
use thiserror::Error;
use xsalsa20poly1305::aead::AeadInPlace;
use xsalsa20poly1305::{Key, KeyInit, Nonce, Tag, XSalsa20Poly1305};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

// ── Constants ─────────────────────────────────────────────────────────────────

/// Curve25519 key length, public or private, and the derived key length.
pub const KEY_LENGTH: usize = 32;

/// XSalsa20 nonce length, hashing nonce and counter nonces alike.
pub const NONCE_LENGTH: usize = 24;

/// Poly1305 tag length. Every ciphertext carries the tag as a prefix.
pub const TAG_LENGTH: usize = 16;

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("{what} must be {expected} bytes, got {actual}")]
    BadLength {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("{op} is not legal in the {state:?} state")]
    InvalidState {
        op: &'static str,
        state: SessionState,
    },

    #[error("message authentication failed")]
    AuthFailure,

    /// The cipher refused to seal. Cannot happen for payloads this protocol
    /// produces, but propagated rather than panicked on.
    #[error("cipher rejected the payload")]
    Cipher,
}

/// Parse a fixed-length argument, rejecting anything else before any state
/// is touched.
fn exact<const N: usize>(what: &'static str, bytes: &[u8]) -> Result<[u8; N], SessionError> {
    bytes.try_into().map_err(|_| SessionError::BadLength {
        what,
        expected: N,
        actual: bytes.len(),
    })
}

// ── Roles and states ──────────────────────────────────────────────────────────

/// Which side of the connection this session plays.
///
/// The role decides key ordering when the hashing nonce is derived: the
/// concatenation is always client key first, server key second, no matter
/// which side computes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Client,
    Server,
}

/// Handshake progress. Transitions are one-way; see the module docs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    InitialKey,
    BlakeNonce,
    SecondKey,
}

/// Which of the session's nonces an `update_nonce` call targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NonceKind {
    /// Re-derive the Blake2b hashing nonce over the server nonce.
    Blake,
    /// Install the counter nonce for outbound traffic.
    Encrypt,
    /// Install the counter nonce for inbound traffic.
    Decrypt,
}

// ── Keypair ───────────────────────────────────────────────────────────────────

/// A static Curve25519 keypair.
///
/// The private key is wiped from memory on drop and never exposed outside
/// this module. The public key travels in the clear during the handshake.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Keypair {
    private: Zeroizing<[u8; KEY_LENGTH]>,
    pub public: [u8; KEY_LENGTH],
}

impl Keypair {
    /// Generate a fresh random keypair.
    pub fn generate() -> Self {
        let secret = crypto_box::SecretKey::generate(&mut OsRng);
        let public = secret.public_key();
        Self {
            private: Zeroizing::new(secret.to_bytes()),
            public: *public.as_bytes(),
        }
    }

    /// Rebuild a keypair from private key bytes, deriving the public half.
    pub fn from_private(private: [u8; KEY_LENGTH]) -> Self {
        let secret = crypto_box::SecretKey::from(private);
        let public = secret.public_key();
        Self {
            private: Zeroizing::new(private),
            public: *public.as_bytes(),
        }
    }

    /// Inject a keypair whose halves are both already known, such as the
    /// well-known client keypair used for custom-server interoperation.
    /// The caller vouches that the halves belong together.
    pub fn from_parts(public: [u8; KEY_LENGTH], private: [u8; KEY_LENGTH]) -> Self {
        Self {
            private: Zeroizing::new(private),
            public,
        }
    }
}

impl std::fmt::Debug for Keypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keypair")
            .field("public", &hex::encode(self.public))
            .finish_non_exhaustive()
    }
}

// ── Primitives ────────────────────────────────────────────────────────────────
//
// Thin, stateless wrappers over the box/secretbox/Blake2b primitives. The
// detached AEAD calls are used so the tag can be placed in front of the
// body, which is the combined layout the peer expects on the wire.

/// Generate a uniformly random 24-byte nonce.
pub fn generate_nonce() -> [u8; NONCE_LENGTH] {
    let mut nonce = [0u8; NONCE_LENGTH];
    rand::thread_rng().fill_bytes(&mut nonce);
    nonce
}

/// Public-key box seal: `tag || body`.
fn seal_box(
    plaintext: &[u8],
    nonce: &[u8; NONCE_LENGTH],
    private: &[u8; KEY_LENGTH],
    peer_public: &[u8; KEY_LENGTH],
) -> Result<Vec<u8>, SessionError> {
    let cipher = SalsaBox::new(
        &crypto_box::PublicKey::from(*peer_public),
        &crypto_box::SecretKey::from(*private),
    );
    let mut body = plaintext.to_vec();
    let tag = cipher
        .encrypt_in_place_detached(Nonce::from_slice(nonce), &[], &mut body)
        .map_err(|_| SessionError::Cipher)?;
    Ok(prefix_tag(&tag, &body))
}

/// Public-key box open. A truncated or forged input fails authentication.
fn open_box(
    sealed: &[u8],
    nonce: &[u8; NONCE_LENGTH],
    private: &[u8; KEY_LENGTH],
    peer_public: &[u8; KEY_LENGTH],
) -> Result<Vec<u8>, SessionError> {
    let (tag, body) = split_tag(sealed)?;
    let cipher = SalsaBox::new(
        &crypto_box::PublicKey::from(*peer_public),
        &crypto_box::SecretKey::from(*private),
    );
    let mut plaintext = body.to_vec();
    cipher
        .decrypt_in_place_detached(Nonce::from_slice(nonce), &[], &mut plaintext, tag)
        .map_err(|_| SessionError::AuthFailure)?;
    Ok(plaintext)
}

/// Secret-key box seal: `tag || body`.
fn seal_secretbox(
    plaintext: &[u8],
    nonce: &[u8; NONCE_LENGTH],
    key: &[u8; KEY_LENGTH],
) -> Result<Vec<u8>, SessionError> {
    let cipher = XSalsa20Poly1305::new(Key::from_slice(key));
    let mut body = plaintext.to_vec();
    let tag = cipher
        .encrypt_in_place_detached(Nonce::from_slice(nonce), &[], &mut body)
        .map_err(|_| SessionError::Cipher)?;
    Ok(prefix_tag(&tag, &body))
}

/// Secret-key box open.
fn open_secretbox(
    sealed: &[u8],
    nonce: &[u8; NONCE_LENGTH],
    key: &[u8; KEY_LENGTH],
) -> Result<Vec<u8>, SessionError> {
    let (tag, body) = split_tag(sealed)?;
    let cipher = XSalsa20Poly1305::new(Key::from_slice(key));
    let mut plaintext = body.to_vec();
    cipher
        .decrypt_in_place_detached(Nonce::from_slice(nonce), &[], &mut plaintext, tag)
        .map_err(|_| SessionError::AuthFailure)?;
    Ok(plaintext)
}

fn prefix_tag(tag: &Tag, body: &[u8]) -> Vec<u8> {
    let mut sealed = Vec::with_capacity(TAG_LENGTH + body.len());
    sealed.extend_from_slice(tag.as_slice());
    sealed.extend_from_slice(body);
    sealed
}

fn split_tag(sealed: &[u8]) -> Result<(&Tag, &[u8]), SessionError> {
    if sealed.len() < TAG_LENGTH {
        return Err(SessionError::AuthFailure);
    }
    let (tag, body) = sealed.split_at(TAG_LENGTH);
    Ok((Tag::from_slice(tag), body))
}

/// Derive the Blake2b hashing nonce over the session's key material.
///
/// Without a server nonce this is the two-key form used on key install:
/// `blake2b(client_pk || server_pk, 24)`. With one it is the three-key
/// form: `blake2b(snonce || client_pk || server_pk, 24)`. Both sides feed
/// the keys in client-first order, so they derive the same nonce.
fn handshake_nonce(
    direction: Direction,
    own_public: &[u8; KEY_LENGTH],
    peer_public: &[u8; KEY_LENGTH],
    snonce: Option<&[u8; NONCE_LENGTH]>,
) -> [u8; NONCE_LENGTH] {
    let (client_key, server_key) = match direction {
        Direction::Client => (own_public, peer_public),
        Direction::Server => (peer_public, own_public),
    };
    let mut state = blake2b_simd::Params::new()
        .hash_length(NONCE_LENGTH)
        .to_state();
    if let Some(snonce) = snonce {
        state.update(snonce);
    }
    state.update(client_key);
    state.update(server_key);
    state
        .finalize()
        .as_bytes()
        .try_into()
        .expect("blake2b output length equals NONCE_LENGTH")
}

// ── Counter nonces ────────────────────────────────────────────────────────────

/// Add one to a 24-byte little-endian counter, with carry.
fn increment(nonce: &mut [u8; NONCE_LENGTH]) {
    for byte in nonce.iter_mut() {
        let (sum, carry) = byte.overflowing_add(1);
        *byte = sum;
        if !carry {
            break;
        }
    }
}

/// Counter nonces advance by two per operation; each direction keeps one
/// parity of the nonce space to itself.
fn increment_by_two(nonce: &mut [u8; NONCE_LENGTH]) {
    increment(nonce);
    increment(nonce);
}

// ── Session ───────────────────────────────────────────────────────────────────

/// Key material for the handshake states. The shared key slot holds the
/// peer's static public key here; `renonced` records whether the hashing
/// nonce has been re-derived over the server nonce.
struct HandshakeKeys {
    peer_public: [u8; KEY_LENGTH],
    blake_nonce: [u8; NONCE_LENGTH],
    renonced: bool,
    encrypt_nonce: Option<[u8; NONCE_LENGTH]>,
    decrypt_nonce: Option<[u8; NONCE_LENGTH]>,
}

/// Key material once the handshake is over: the derived symmetric key and
/// both counter nonces, all mandatory from here on.
#[derive(Zeroize, ZeroizeOnDrop)]
struct SessionKeys {
    key: [u8; KEY_LENGTH],
    encrypt_nonce: [u8; NONCE_LENGTH],
    decrypt_nonce: [u8; NONCE_LENGTH],
}

/// The shared-key slot is a tagged variant rather than a bare state flag,
/// so the encrypt/decrypt paths match on what the key actually is and a
/// mis-sequenced update cannot aim the wrong construction at the wire.
enum Phase {
    Idle,
    Handshake(HandshakeKeys),
    Established(SessionKeys),
}

/// One directional crypto session, alive for exactly one connection.
///
/// Not internally synchronized; callers serialize access. Every operation
/// is synchronous and returns in bounded time. Any error is fatal to the
/// session: the caller drops it and the connection with it.
pub struct Session {
    direction: Direction,
    keypair: Keypair,
    phase: Phase,
}

impl Session {
    /// Create a session with an injected keypair.
    pub fn new(direction: Direction, keypair: Keypair) -> Self {
        Self {
            direction,
            keypair,
            phase: Phase::Idle,
        }
    }

    /// Create a session with a freshly generated keypair.
    pub fn generate(direction: Direction) -> Self {
        Self::new(direction, Keypair::generate())
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn public_key(&self) -> &[u8; KEY_LENGTH] {
        &self.keypair.public
    }

    pub fn state(&self) -> SessionState {
        match &self.phase {
            Phase::Idle => SessionState::Idle,
            Phase::Handshake(keys) if keys.renonced => SessionState::BlakeNonce,
            Phase::Handshake(_) => SessionState::InitialKey,
            Phase::Established(_) => SessionState::SecondKey,
        }
    }

    /// Install a shared key.
    ///
    /// In Idle the key is the peer's static public key; the two-key hashing
    /// nonce is derived and the session enters InitialKey. In InitialKey or
    /// BlakeNonce the key is the derived symmetric key `k`; both counter
    /// nonces must already be installed, and the session enters SecondKey.
    /// Any later call fails.
    pub fn update_shared_key(&mut self, key: &[u8]) -> Result<(), SessionError> {
        let key = exact::<KEY_LENGTH>("shared key", key)?;
        match &self.phase {
            Phase::Idle => {
                let blake_nonce =
                    handshake_nonce(self.direction, &self.keypair.public, &key, None);
                self.phase = Phase::Handshake(HandshakeKeys {
                    peer_public: key,
                    blake_nonce,
                    renonced: false,
                    encrypt_nonce: None,
                    decrypt_nonce: None,
                });
                Ok(())
            }
            Phase::Handshake(keys) => match (keys.encrypt_nonce, keys.decrypt_nonce) {
                (Some(encrypt_nonce), Some(decrypt_nonce)) => {
                    self.phase = Phase::Established(SessionKeys {
                        key,
                        encrypt_nonce,
                        decrypt_nonce,
                    });
                    Ok(())
                }
                _ => Err(SessionError::InvalidState {
                    op: "update_shared_key",
                    state: self.state(),
                }),
            },
            Phase::Established(_) => Err(SessionError::InvalidState {
                op: "update_shared_key",
                state: SessionState::SecondKey,
            }),
        }
    }

    /// Install or re-derive a nonce. Legal only in the handshake states.
    ///
    /// `Blake` folds the server nonce into the hashing nonce (three-key
    /// form) and moves InitialKey to BlakeNonce; once there, further Blake
    /// updates do nothing. `Encrypt` and `Decrypt` stash the counter nonces
    /// that arm the transition to SecondKey.
    pub fn update_nonce(&mut self, nonce: &[u8], kind: NonceKind) -> Result<(), SessionError> {
        let nonce = exact::<NONCE_LENGTH>("nonce", nonce)?;
        let state = self.state();
        let direction = self.direction;
        let own_public = self.keypair.public;
        let Phase::Handshake(keys) = &mut self.phase else {
            return Err(SessionError::InvalidState {
                op: "update_nonce",
                state,
            });
        };
        match kind {
            NonceKind::Blake => {
                if !keys.renonced {
                    keys.blake_nonce =
                        handshake_nonce(direction, &own_public, &keys.peer_public, Some(&nonce));
                    keys.renonced = true;
                }
                Ok(())
            }
            NonceKind::Encrypt => {
                keys.encrypt_nonce = Some(nonce);
                Ok(())
            }
            NonceKind::Decrypt => {
                keys.decrypt_nonce = Some(nonce);
                Ok(())
            }
        }
    }

    /// Seal one outbound message for the current state.
    ///
    /// Handshake states use the public-key box under the hashing nonce.
    /// SecondKey bumps the outbound counter nonce by two, then uses the
    /// secret-key box. The returned ciphertext is `tag || body`.
    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, SessionError> {
        match &mut self.phase {
            Phase::Idle => Err(SessionError::InvalidState {
                op: "encrypt",
                state: SessionState::Idle,
            }),
            Phase::Handshake(keys) => seal_box(
                plaintext,
                &keys.blake_nonce,
                &self.keypair.private,
                &keys.peer_public,
            ),
            Phase::Established(keys) => {
                increment_by_two(&mut keys.encrypt_nonce);
                seal_secretbox(plaintext, &keys.encrypt_nonce, &keys.key)
            }
        }
    }

    /// Open one inbound ciphertext for the current state.
    ///
    /// In SecondKey the inbound counter nonce is bumped by two before the
    /// open and stays bumped even when authentication fails; replaying a
    /// counter nonce against a valid ciphertext is never safe. A failed
    /// open therefore kills the stream for good, which is intended.
    pub fn decrypt(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>, SessionError> {
        match &mut self.phase {
            Phase::Idle => Err(SessionError::InvalidState {
                op: "decrypt",
                state: SessionState::Idle,
            }),
            Phase::Handshake(keys) => open_box(
                ciphertext,
                &keys.blake_nonce,
                &self.keypair.private,
                &keys.peer_public,
            ),
            Phase::Established(keys) => {
                increment_by_two(&mut keys.decrypt_nonce);
                open_secretbox(ciphertext, &keys.decrypt_nonce, &keys.key)
            }
        }
    }

    #[cfg(test)]
    fn blake_nonce(&self) -> Option<[u8; NONCE_LENGTH]> {
        match &self.phase {
            Phase::Handshake(keys) => Some(keys.blake_nonce),
            _ => None,
        }
    }

    #[cfg(test)]
    fn encrypt_nonce(&self) -> Option<[u8; NONCE_LENGTH]> {
        match &self.phase {
            Phase::Handshake(keys) => keys.encrypt_nonce,
            Phase::Established(keys) => Some(keys.encrypt_nonce),
            Phase::Idle => None,
        }
    }

    #[cfg(test)]
    fn decrypt_nonce(&self) -> Option<[u8; NONCE_LENGTH]> {
        match &self.phase {
            Phase::Handshake(keys) => keys.decrypt_nonce,
            Phase::Established(keys) => Some(keys.decrypt_nonce),
            Phase::Idle => None,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
