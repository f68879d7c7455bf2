//! Rampart integration harness.
//!
//! Spins up a real listener on a loopback port per test and drives it with
//! a protocol client built from the same library the server uses. No
//! external environment is required; `cargo test --test integration` is
//! enough.

use anyhow::{bail, Context, Result};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;

use rampart_core::codec::PayloadReader;
use rampart_core::crypto::{KEY_LENGTH, NONCE_LENGTH};
use rampart_core::message::{
    opcode, Login, LoginFailed, LoginOk, Message, ServerMessage, SessionRequest,
};
use rampart_core::wire::Frame;
use rampart_core::{Direction, Keypair, NonceKind, Session};
use rampart_server::{connection, Processor};

mod crypto_fixtures;
mod handshake;

// ── Server helpers ────────────────────────────────────────────────────────────

/// A test server: loopback address, its public key, and the shutdown handle.
pub struct TestServer {
    pub addr: std::net::SocketAddr,
    pub public_key: [u8; KEY_LENGTH],
    pub shutdown: broadcast::Sender<i32>,
}

/// Bind a listener on an ephemeral loopback port and serve connections
/// until the test ends.
pub async fn spawn_server() -> Result<TestServer> {
    let keypair = Keypair::generate();
    let public_key = keypair.public;
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .context("binding test listener")?;
    let addr = listener.local_addr()?;
    let (shutdown, _) = broadcast::channel(1);

    let accept_shutdown = shutdown.clone();
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            let processor = Processor::new(keypair.clone());
            let rx = accept_shutdown.subscribe();
            tokio::spawn(async move {
                let _ = connection::serve(stream, processor, rx).await;
            });
        }
    });

    Ok(TestServer {
        addr,
        public_key,
        shutdown,
    })
}

// ── Client helpers ────────────────────────────────────────────────────────────

pub enum LoginOutcome {
    Accepted(LoginOk),
    Refused(LoginFailed),
}

/// The client half of the protocol, over any byte stream.
pub struct ProtocolClient<S> {
    pub session: Session,
    stream: S,
}

impl ProtocolClient<TcpStream> {
    pub async fn connect(server: &TestServer) -> Result<Self> {
        let stream = TcpStream::connect(server.addr)
            .await
            .context("connecting to test server")?;
        Self::new(stream, server.public_key)
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> ProtocolClient<S> {
    pub fn new(stream: S, server_public: [u8; KEY_LENGTH]) -> Result<Self> {
        let mut session = Session::generate(Direction::Client);
        session.update_shared_key(&server_public)?;
        Ok(Self { session, stream })
    }

    pub async fn send_plain(&mut self, opcode: u16, payload: Vec<u8>) -> Result<()> {
        let frame = Frame::new(opcode, payload)?;
        connection::write_frame(&mut self.stream, &frame).await?;
        Ok(())
    }

    pub async fn recv(&mut self) -> Result<Option<(u16, Vec<u8>)>> {
        let frame = connection::read_frame(&mut self.stream).await?;
        Ok(frame.map(|(header, payload)| (header.opcode, payload)))
    }

    pub async fn send_encrypted<M: Message>(&mut self, message: &M) -> Result<()> {
        let sealed = self.session.encrypt(&message.to_payload())?;
        self.send_plain(M::OPCODE, sealed).await
    }

    pub async fn recv_decrypted(&mut self) -> Result<Option<(u16, Vec<u8>)>> {
        match self.recv().await? {
            Some((opcode, payload)) => {
                let plain = self.session.decrypt(&payload)?;
                Ok(Some((opcode, plain)))
            }
            None => Ok(None),
        }
    }

    /// Run the handshake: session request, login, key install. On success
    /// the session is established and bulk traffic can flow.
    pub async fn login(&mut self, login: &Login) -> Result<LoginOutcome> {
        self.send_plain(
            opcode::SESSION_REQUEST,
            SessionRequest {
                major_version: login.major_version,
                build: login.build,
                content_hash: Some("content".to_owned()),
                key_version: 16,
            }
            .to_payload(),
        )
        .await?;

        let (reply, payload) = self.recv().await?.context("server closed before reply")?;
        let snonce = match ServerMessage::decode(reply, &payload)? {
            Some(ServerMessage::SessionKey(message)) => message.session_key,
            _ => bail!("expected session key, got opcode {reply}"),
        };

        let sealed = self.session.encrypt(&login.to_payload())?;
        let mut body = self.session.public_key().to_vec();
        body.extend_from_slice(&sealed);
        self.send_plain(opcode::LOGIN, body).await?;

        let (reply, payload) = self.recv().await?.context("server closed before reply")?;
        self.session.update_nonce(&snonce, NonceKind::Blake)?;
        let plain = self.session.decrypt(&payload)?;
        match reply {
            opcode::LOGIN_OK => {
                let mut reader = PayloadReader::new(&plain);
                let rnonce: [u8; NONCE_LENGTH] = reader.read_array()?;
                let snonce2: [u8; NONCE_LENGTH] = reader.read_array()?;
                let derived_key: [u8; KEY_LENGTH] = reader.read_array()?;
                let ok = LoginOk::decode(&mut reader)?;

                self.session.update_nonce(&snonce2, NonceKind::Encrypt)?;
                self.session.update_nonce(&rnonce, NonceKind::Decrypt)?;
                self.session.update_shared_key(&derived_key)?;
                Ok(LoginOutcome::Accepted(ok))
            }
            opcode::LOGIN_FAILED => Ok(LoginOutcome::Refused(LoginFailed::from_payload(&plain)?)),
            other => bail!("unexpected login reply opcode {other}"),
        }
    }
}

/// A login that the stock server accepts.
pub fn stock_login() -> Login {
    Login {
        account_id: 1_000_001,
        pass_token: Some("deadbeef".to_owned()),
        major_version: 8,
        minor_version: 212,
        build: 9,
        fingerprint_sha: Some("sha".to_owned()),
        device_uuid: Some("uuid-1".to_owned()),
        device_model: Some("iPhone8,1".to_owned()),
    }
}
