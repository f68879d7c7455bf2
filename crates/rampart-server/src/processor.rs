//! The message processor: one per connection, owning the server-side
//! crypto session and sequencing the handshake.
//!
//! The processor is synchronous. The connection loop hands it each inbound
//! frame's opcode and payload and writes back whatever frames come out.
//! Key and nonce installs happen here, at the protocol moments the
//! handshake defines:
//!
//!   1. `SessionRequest` arrives in the clear. Reply `SessionKey` carrying
//!      a fresh server nonce.
//!   2. `Login` arrives as `client_pk || ciphertext`. Install the client
//!      key (public-key box becomes legal), decrypt, fold the server nonce
//!      into the hashing nonce, then answer `LoginOk` carrying
//!      `rnonce || snonce2 || k`. The reply is sealed before those values
//!      are installed, because the client can only open it with the
//!      hashing-nonce construction.
//!   3. From then on both directions run the secret-key box under the
//!      counter nonces.
//!
//! Every session error is terminal: the caller drops the connection and
//! the processor with it.

use rand::RngCore;
use thiserror::Error;

use rampart_core::codec::{CodecError, PayloadWriter};
use rampart_core::crypto::{generate_nonce, KEY_LENGTH, NONCE_LENGTH};
use rampart_core::message::{
    opcode, ClientMessage, Command, EndClientTurn, KeepAliveOk, Login, LoginFailed, LoginOk,
    Message, SessionKey, SessionRequest, ShutdownInfo,
};
use rampart_core::wire::{Frame, WireError};
use rampart_core::{Direction, Keypair, NonceKind, Session, SessionError, SessionState};

/// Client major version this server speaks.
pub const SUPPORTED_MAJOR_VERSION: i32 = 8;

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error("session error: {0}")]
    Session(#[from] SessionError),

    #[error("malformed payload: {0}")]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Wire(#[from] WireError),

    #[error("unexpected opcode {opcode}, expected {expected}")]
    UnexpectedOpcode { opcode: u16, expected: u16 },

    #[error("login frame too short to carry a client key")]
    LoginTooShort,

    #[error("connection is already closed")]
    Closed,
}

// ── Processor ─────────────────────────────────────────────────────────────────

/// Where the connection stands in the protocol. The server nonce only
/// exists between the session request and the login that consumes it.
enum Stage {
    AwaitSessionRequest,
    AwaitLogin { snonce: [u8; NONCE_LENGTH] },
    Established,
    Closed,
}

/// Frames to write back, and whether to hang up afterwards.
#[derive(Debug, Default)]
pub struct Output {
    pub frames: Vec<Frame>,
    pub close: bool,
}

impl Output {
    fn reply(frame: Frame) -> Self {
        Self {
            frames: vec![frame],
            close: false,
        }
    }

    fn none() -> Self {
        Self::default()
    }

    fn hangup(frame: Frame) -> Self {
        Self {
            frames: vec![frame],
            close: true,
        }
    }
}

pub struct Processor {
    session: Session,
    stage: Stage,
}

impl Processor {
    /// A processor for a fresh inbound connection, using the server's
    /// static keypair.
    pub fn new(keypair: Keypair) -> Self {
        Self {
            session: Session::new(Direction::Server, keypair),
            stage: Stage::AwaitSessionRequest,
        }
    }

    /// The crypto state, for logging.
    pub fn session_state(&self) -> SessionState {
        self.session.state()
    }

    /// Process one inbound frame and produce the frames to send back.
    pub fn handle_frame(&mut self, opcode: u16, payload: &[u8]) -> Result<Output, ProcessorError> {
        match &self.stage {
            Stage::AwaitSessionRequest => self.handle_session_request(opcode, payload),
            Stage::AwaitLogin { snonce } => {
                let snonce = *snonce;
                self.handle_login(opcode, payload, snonce)
            }
            Stage::Established => self.handle_established(opcode, payload),
            Stage::Closed => Err(ProcessorError::Closed),
        }
    }

    /// Build the encrypted shutdown notice, once the session can carry one.
    pub fn shutdown_frame(&mut self, seconds: i32) -> Result<Option<Frame>, ProcessorError> {
        if !matches!(self.stage, Stage::Established) {
            return Ok(None);
        }
        let notice = ShutdownInfo {
            seconds_until_shutdown: seconds,
        };
        let sealed = self.session.encrypt(&notice.to_payload())?;
        Ok(Some(Frame::new(opcode::SHUTDOWN_INFO, sealed)?))
    }

    fn handle_session_request(
        &mut self,
        opcode_in: u16,
        payload: &[u8],
    ) -> Result<Output, ProcessorError> {
        if opcode_in != opcode::SESSION_REQUEST {
            return Err(ProcessorError::UnexpectedOpcode {
                opcode: opcode_in,
                expected: opcode::SESSION_REQUEST,
            });
        }
        let request = SessionRequest::from_payload(payload)?;
        tracing::debug!(
            major_version = request.major_version,
            build = request.build,
            "session requested"
        );

        let snonce = generate_nonce();
        self.stage = Stage::AwaitLogin { snonce };

        let reply = SessionKey {
            session_key: snonce.to_vec(),
        };
        Ok(Output::reply(Frame::new(
            opcode::SESSION_KEY,
            reply.to_payload(),
        )?))
    }

    fn handle_login(
        &mut self,
        opcode_in: u16,
        payload: &[u8],
        snonce: [u8; NONCE_LENGTH],
    ) -> Result<Output, ProcessorError> {
        if opcode_in != opcode::LOGIN {
            return Err(ProcessorError::UnexpectedOpcode {
                opcode: opcode_in,
                expected: opcode::LOGIN,
            });
        }
        if payload.len() <= KEY_LENGTH {
            return Err(ProcessorError::LoginTooShort);
        }
        let (client_key, sealed) = payload.split_at(KEY_LENGTH);

        self.session.update_shared_key(client_key)?;
        let plain = self.session.decrypt(sealed)?;
        let login = Login::from_payload(&plain)?;
        self.session.update_nonce(&snonce, NonceKind::Blake)?;

        if login.major_version != SUPPORTED_MAJOR_VERSION {
            tracing::info!(
                account_id = login.account_id,
                major_version = login.major_version,
                "login refused, unsupported client version"
            );
            let refusal = LoginFailed {
                reason: LoginFailed::OUTDATED_VERSION,
                message: Some("update your client".to_owned()),
            };
            let sealed = self.session.encrypt(&refusal.to_payload())?;
            self.stage = Stage::Closed;
            return Ok(Output::hangup(Frame::new(opcode::LOGIN_FAILED, sealed)?));
        }

        // Bulk-transport material: one counter nonce per direction plus the
        // derived key. Sealed into the reply before being installed, since
        // the client opens the reply with the hashing-nonce construction.
        let rnonce = generate_nonce();
        let snonce2 = generate_nonce();
        let mut derived_key = [0u8; KEY_LENGTH];
        rand::thread_rng().fill_bytes(&mut derived_key);

        let ok = LoginOk {
            account_id: login.account_id,
            pass_token: login
                .pass_token
                .clone()
                .or_else(|| Some(hex::encode(generate_nonce()))),
            server_environment: Some("prod".to_owned()),
            session_count: 1,
            server_time: None,
        };
        let mut body = PayloadWriter::new();
        body.put_raw(&rnonce);
        body.put_raw(&snonce2);
        body.put_raw(&derived_key);
        ok.encode(&mut body);
        let sealed = self.session.encrypt(&body.into_bytes())?;

        self.session.update_nonce(&rnonce, NonceKind::Encrypt)?;
        self.session.update_nonce(&snonce2, NonceKind::Decrypt)?;
        self.session.update_shared_key(&derived_key)?;
        self.stage = Stage::Established;

        tracing::info!(account_id = login.account_id, "login accepted");
        Ok(Output::reply(Frame::new(opcode::LOGIN_OK, sealed)?))
    }

    fn handle_established(
        &mut self,
        opcode_in: u16,
        payload: &[u8],
    ) -> Result<Output, ProcessorError> {
        let plain = self.session.decrypt(payload)?;
        let Some(message) = ClientMessage::decode(opcode_in, &plain)? else {
            tracing::warn!(opcode = opcode_in, "dropping frame with unhandled opcode");
            return Ok(Output::none());
        };
        match message {
            ClientMessage::KeepAlive(_) => {
                let sealed = self.session.encrypt(&KeepAliveOk.to_payload())?;
                Ok(Output::reply(Frame::new(opcode::KEEP_ALIVE_OK, sealed)?))
            }
            ClientMessage::EndClientTurn(turn) => {
                self.apply_turn(&turn);
                Ok(Output::none())
            }
            ClientMessage::SessionRequest(_) | ClientMessage::Login(_) => {
                Err(ProcessorError::UnexpectedOpcode {
                    opcode: opcode_in,
                    expected: opcode::KEEP_ALIVE,
                })
            }
        }
    }

    fn apply_turn(&self, turn: &EndClientTurn) {
        tracing::debug!(
            tick = turn.tick,
            commands = turn.commands.len(),
            "client turn"
        );
        for command in &turn.commands {
            match command {
                Command::SpeedUpHero {
                    hero_id,
                    resource_cost,
                } => {
                    tracing::info!(hero_id, resource_cost, "hero upgrade sped up");
                }
                Command::Unknown { id } => {
                    tracing::warn!(command_id = id, "ignoring unknown command");
                }
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
