//! Per-opcode message types.
//!
//! Client messages live in the 1xxxx range, server messages in 2xxxx.
//! Every type encodes to and decodes from the payload bytes that sit
//! behind the frame header; encryption is the session layer's business
//! and never appears here.

use crate::codec::{CodecError, PayloadReader, PayloadWriter};

// ── Opcodes ───────────────────────────────────────────────────────────────────

pub mod opcode {
    pub const SESSION_REQUEST: u16 = 10100;
    pub const LOGIN: u16 = 10101;
    pub const KEEP_ALIVE: u16 = 10108;
    pub const END_CLIENT_TURN: u16 = 14102;

    pub const SESSION_KEY: u16 = 20100;
    pub const LOGIN_FAILED: u16 = 20103;
    pub const LOGIN_OK: u16 = 20104;
    pub const KEEP_ALIVE_OK: u16 = 20108;
    pub const SHUTDOWN_INFO: u16 = 20161;
}

/// A payload-shaped message with a fixed opcode.
pub trait Message: Sized {
    const OPCODE: u16;

    fn encode(&self, writer: &mut PayloadWriter);
    fn decode(reader: &mut PayloadReader<'_>) -> Result<Self, CodecError>;

    fn to_payload(&self) -> Vec<u8> {
        let mut writer = PayloadWriter::new();
        self.encode(&mut writer);
        writer.into_bytes()
    }

    fn from_payload(payload: &[u8]) -> Result<Self, CodecError> {
        Self::decode(&mut PayloadReader::new(payload))
    }
}

// ── Client messages ───────────────────────────────────────────────────────────

/// First message on a fresh connection, sent in the clear.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRequest {
    pub major_version: i32,
    pub build: i32,
    pub content_hash: Option<String>,
    pub key_version: i32,
}

impl Message for SessionRequest {
    const OPCODE: u16 = opcode::SESSION_REQUEST;

    fn encode(&self, writer: &mut PayloadWriter) {
        writer.put_i32(self.major_version);
        writer.put_i32(self.build);
        writer.put_string(self.content_hash.as_deref());
        writer.put_i32(self.key_version);
    }

    fn decode(reader: &mut PayloadReader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            major_version: reader.read_i32()?,
            build: reader.read_i32()?,
            content_hash: reader.read_string()?,
            key_version: reader.read_i32()?,
        })
    }
}

/// Account credentials and device identity. Always travels encrypted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Login {
    pub account_id: i64,
    pub pass_token: Option<String>,
    pub major_version: i32,
    pub minor_version: i32,
    pub build: i32,
    pub fingerprint_sha: Option<String>,
    pub device_uuid: Option<String>,
    pub device_model: Option<String>,
}

impl Message for Login {
    const OPCODE: u16 = opcode::LOGIN;

    fn encode(&self, writer: &mut PayloadWriter) {
        writer.put_i64(self.account_id);
        writer.put_string(self.pass_token.as_deref());
        writer.put_i32(self.major_version);
        writer.put_i32(self.minor_version);
        writer.put_i32(self.build);
        writer.put_string(self.fingerprint_sha.as_deref());
        writer.put_string(self.device_uuid.as_deref());
        writer.put_string(self.device_model.as_deref());
    }

    fn decode(reader: &mut PayloadReader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            account_id: reader.read_i64()?,
            pass_token: reader.read_string()?,
            major_version: reader.read_i32()?,
            minor_version: reader.read_i32()?,
            build: reader.read_i32()?,
            fingerprint_sha: reader.read_string()?,
            device_uuid: reader.read_string()?,
            device_model: reader.read_string()?,
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KeepAlive;

impl Message for KeepAlive {
    const OPCODE: u16 = opcode::KEEP_ALIVE;

    fn encode(&self, _writer: &mut PayloadWriter) {}

    fn decode(_reader: &mut PayloadReader<'_>) -> Result<Self, CodecError> {
        Ok(Self)
    }
}

/// End-of-turn batch: the commands the player issued this tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndClientTurn {
    pub tick: i32,
    pub checksum: i32,
    pub commands: Vec<Command>,
}

impl Message for EndClientTurn {
    const OPCODE: u16 = opcode::END_CLIENT_TURN;

    fn encode(&self, writer: &mut PayloadWriter) {
        writer.put_i32(self.tick);
        writer.put_i32(self.checksum);
        writer.put_i32(self.commands.len() as i32);
        for command in &self.commands {
            command.encode(writer);
        }
    }

    fn decode(reader: &mut PayloadReader<'_>) -> Result<Self, CodecError> {
        let tick = reader.read_i32()?;
        let checksum = reader.read_i32()?;
        let count = reader.read_i32()?;
        if count < 0 {
            return Err(CodecError::NegativeLength(count));
        }
        let mut commands = Vec::with_capacity(count.min(64) as usize);
        for _ in 0..count {
            let command = Command::decode(reader)?;
            let unknown = matches!(command, Command::Unknown { .. });
            commands.push(command);
            if unknown {
                // An unrecognized id makes the rest of the buffer
                // uninterpretable; Command::decode already drained it.
                break;
            }
        }
        Ok(Self {
            tick,
            checksum,
            commands,
        })
    }
}

/// Player commands nested inside `EndClientTurn`, tagged by an i32 id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Finish a hero upgrade early for a gem cost.
    SpeedUpHero { hero_id: i32, resource_cost: i32 },
    /// A command id this server does not handle. Commands are the last
    /// field of the payload, so the remainder is consumed with it.
    Unknown { id: i32 },
}

impl Command {
    pub const SPEED_UP_HERO: i32 = 521;

    fn encode(&self, writer: &mut PayloadWriter) {
        match self {
            Command::SpeedUpHero {
                hero_id,
                resource_cost,
            } => {
                writer.put_i32(Self::SPEED_UP_HERO);
                writer.put_i32(*hero_id);
                writer.put_i32(*resource_cost);
            }
            Command::Unknown { id } => writer.put_i32(*id),
        }
    }

    fn decode(reader: &mut PayloadReader<'_>) -> Result<Self, CodecError> {
        let id = reader.read_i32()?;
        match id {
            Self::SPEED_UP_HERO => Ok(Command::SpeedUpHero {
                hero_id: reader.read_i32()?,
                resource_cost: reader.read_i32()?,
            }),
            _ => {
                reader.read_rest();
                Ok(Command::Unknown { id })
            }
        }
    }
}

// ── Server messages ───────────────────────────────────────────────────────────

/// Carries the server nonce, sent in the clear before any encryption.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionKey {
    pub session_key: Vec<u8>,
}

impl Message for SessionKey {
    const OPCODE: u16 = opcode::SESSION_KEY;

    fn encode(&self, writer: &mut PayloadWriter) {
        writer.put_byte_array(&self.session_key);
    }

    fn decode(reader: &mut PayloadReader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            session_key: reader.read_byte_array()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginFailed {
    pub reason: i32,
    pub message: Option<String>,
}

impl LoginFailed {
    pub const OUTDATED_VERSION: i32 = 8;
}

impl Message for LoginFailed {
    const OPCODE: u16 = opcode::LOGIN_FAILED;

    fn encode(&self, writer: &mut PayloadWriter) {
        writer.put_i32(self.reason);
        writer.put_string(self.message.as_deref());
    }

    fn decode(reader: &mut PayloadReader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            reason: reader.read_i32()?,
            message: reader.read_string()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginOk {
    pub account_id: i64,
    pub pass_token: Option<String>,
    pub server_environment: Option<String>,
    pub session_count: i32,
    pub server_time: Option<String>,
}

impl Message for LoginOk {
    const OPCODE: u16 = opcode::LOGIN_OK;

    fn encode(&self, writer: &mut PayloadWriter) {
        writer.put_i64(self.account_id);
        writer.put_string(self.pass_token.as_deref());
        writer.put_string(self.server_environment.as_deref());
        writer.put_i32(self.session_count);
        writer.put_string(self.server_time.as_deref());
    }

    fn decode(reader: &mut PayloadReader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            account_id: reader.read_i64()?,
            pass_token: reader.read_string()?,
            server_environment: reader.read_string()?,
            session_count: reader.read_i32()?,
            server_time: reader.read_string()?,
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KeepAliveOk;

impl Message for KeepAliveOk {
    const OPCODE: u16 = opcode::KEEP_ALIVE_OK;

    fn encode(&self, _writer: &mut PayloadWriter) {}

    fn decode(_reader: &mut PayloadReader<'_>) -> Result<Self, CodecError> {
        Ok(Self)
    }
}

/// Warns connected clients the server is going down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownInfo {
    pub seconds_until_shutdown: i32,
}

impl Message for ShutdownInfo {
    const OPCODE: u16 = opcode::SHUTDOWN_INFO;

    fn encode(&self, writer: &mut PayloadWriter) {
        writer.put_i32(self.seconds_until_shutdown);
    }

    fn decode(reader: &mut PayloadReader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            seconds_until_shutdown: reader.read_i32()?,
        })
    }
}

// ── Dispatch ──────────────────────────────────────────────────────────────────

/// A decoded client-to-server message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    SessionRequest(SessionRequest),
    Login(Login),
    KeepAlive(KeepAlive),
    EndClientTurn(EndClientTurn),
}

impl ClientMessage {
    /// Decode a payload by opcode. Unknown opcodes come back as `None`;
    /// the caller decides whether that is log-and-drop or a hangup.
    pub fn decode(opcode: u16, payload: &[u8]) -> Result<Option<Self>, CodecError> {
        let message = match opcode {
            opcode::SESSION_REQUEST => {
                Self::SessionRequest(SessionRequest::from_payload(payload)?)
            }
            opcode::LOGIN => Self::Login(Login::from_payload(payload)?),
            opcode::KEEP_ALIVE => Self::KeepAlive(KeepAlive::from_payload(payload)?),
            opcode::END_CLIENT_TURN => {
                Self::EndClientTurn(EndClientTurn::from_payload(payload)?)
            }
            _ => return Ok(None),
        };
        Ok(Some(message))
    }

    pub fn opcode(&self) -> u16 {
        match self {
            Self::SessionRequest(_) => SessionRequest::OPCODE,
            Self::Login(_) => Login::OPCODE,
            Self::KeepAlive(_) => KeepAlive::OPCODE,
            Self::EndClientTurn(_) => EndClientTurn::OPCODE,
        }
    }
}

/// A decoded server-to-client message, the mirror of `ClientMessage`.
///
/// Note that the decrypted login reply carries the bulk-transport
/// material (`rnonce || snonce2 || k`) ahead of the `LoginOk` fields;
/// callers strip that prefix before handing the remainder to this
/// decoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMessage {
    SessionKey(SessionKey),
    LoginFailed(LoginFailed),
    LoginOk(LoginOk),
    KeepAliveOk(KeepAliveOk),
    ShutdownInfo(ShutdownInfo),
}

impl ServerMessage {
    /// Decode a payload by opcode. Unknown opcodes come back as `None`.
    pub fn decode(opcode: u16, payload: &[u8]) -> Result<Option<Self>, CodecError> {
        let message = match opcode {
            opcode::SESSION_KEY => Self::SessionKey(SessionKey::from_payload(payload)?),
            opcode::LOGIN_FAILED => Self::LoginFailed(LoginFailed::from_payload(payload)?),
            opcode::LOGIN_OK => Self::LoginOk(LoginOk::from_payload(payload)?),
            opcode::KEEP_ALIVE_OK => Self::KeepAliveOk(KeepAliveOk::from_payload(payload)?),
            opcode::SHUTDOWN_INFO => Self::ShutdownInfo(ShutdownInfo::from_payload(payload)?),
            _ => return Ok(None),
        };
        Ok(Some(message))
    }

    pub fn opcode(&self) -> u16 {
        match self {
            Self::SessionKey(_) => SessionKey::OPCODE,
            Self::LoginFailed(_) => LoginFailed::OPCODE,
            Self::LoginOk(_) => LoginOk::OPCODE,
            Self::KeepAliveOk(_) => KeepAliveOk::OPCODE,
            Self::ShutdownInfo(_) => ShutdownInfo::OPCODE,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
