//! rampart-core — session crypto, wire framing, payload codec, message
//! types, and configuration for the v8 client protocol.
//! Everything above this crate is transport plumbing.

pub mod codec;
pub mod config;
pub mod crypto;
pub mod message;
pub mod wire;

pub use crypto::{Direction, Keypair, NonceKind, Session, SessionError, SessionState};
