use crate::*;

use rampart_core::message::{Command, EndClientTurn, KeepAlive, KeepAliveOk};
use rampart_core::SessionState;

#[tokio::test]
async fn full_login_handshake_over_tcp() {
    let server = spawn_server().await.unwrap();
    let mut client = ProtocolClient::connect(&server).await.unwrap();

    let outcome = client.login(&stock_login()).await.unwrap();
    let LoginOutcome::Accepted(ok) = outcome else {
        panic!("login was refused");
    };
    assert_eq!(ok.account_id, 1_000_001);
    assert_eq!(ok.pass_token.as_deref(), Some("deadbeef"));
    assert_eq!(ok.server_environment.as_deref(), Some("prod"));
    assert_eq!(client.session.state(), SessionState::SecondKey);
}

#[tokio::test]
async fn bulk_traffic_after_login() {
    let server = spawn_server().await.unwrap();
    let mut client = ProtocolClient::connect(&server).await.unwrap();
    client.login(&stock_login()).await.unwrap();

    // Several keep-alives in a row exercise the counter nonces on both
    // directions.
    for _ in 0..3 {
        client.send_encrypted(&KeepAlive).await.unwrap();
        let (reply, plain) = client.recv_decrypted().await.unwrap().unwrap();
        let message = ServerMessage::decode(reply, &plain).unwrap();
        assert_eq!(message, Some(ServerMessage::KeepAliveOk(KeepAliveOk)));
    }

    // A turn batch produces no reply, and the connection stays healthy.
    let turn = EndClientTurn {
        tick: 64,
        checksum: 0,
        commands: vec![Command::SpeedUpHero {
            hero_id: 2,
            resource_cost: 410,
        }],
    };
    client.send_encrypted(&turn).await.unwrap();

    client.send_encrypted(&KeepAlive).await.unwrap();
    let (reply, _) = client.recv_decrypted().await.unwrap().unwrap();
    assert_eq!(reply, opcode::KEEP_ALIVE_OK);
}

#[tokio::test]
async fn outdated_client_is_refused() {
    let server = spawn_server().await.unwrap();
    let mut client = ProtocolClient::connect(&server).await.unwrap();

    let mut login = stock_login();
    login.major_version = 7;
    let outcome = client.login(&login).await.unwrap();
    let LoginOutcome::Refused(refusal) = outcome else {
        panic!("outdated client was accepted");
    };
    assert_eq!(refusal.reason, LoginFailed::OUTDATED_VERSION);

    // The server hangs up after the refusal.
    assert!(client.recv().await.unwrap().is_none());
}

#[tokio::test]
async fn tampered_login_drops_the_connection() {
    let server = spawn_server().await.unwrap();
    let mut client = ProtocolClient::connect(&server).await.unwrap();

    client
        .send_plain(
            opcode::SESSION_REQUEST,
            SessionRequest {
                major_version: 8,
                build: 551,
                content_hash: None,
                key_version: 16,
            }
            .to_payload(),
        )
        .await
        .unwrap();
    let (reply, _) = client.recv().await.unwrap().unwrap();
    assert_eq!(reply, opcode::SESSION_KEY);

    let sealed = client
        .session
        .encrypt(&stock_login().to_payload())
        .unwrap();
    let mut body = client.session.public_key().to_vec();
    body.extend_from_slice(&sealed);
    let last = body.len() - 1;
    body[last] ^= 0xFF;
    client.send_plain(opcode::LOGIN, body).await.unwrap();

    // Authentication failure is terminal: no reply, just a hangup.
    assert!(client.recv().await.unwrap().is_none());
}

#[tokio::test]
async fn replayed_bulk_frame_drops_the_connection() {
    let server = spawn_server().await.unwrap();
    let mut client = ProtocolClient::connect(&server).await.unwrap();
    client.login(&stock_login()).await.unwrap();

    let sealed = client
        .session
        .encrypt(&KeepAlive.to_payload())
        .unwrap();
    client
        .send_plain(opcode::KEEP_ALIVE, sealed.clone())
        .await
        .unwrap();
    let (reply, _) = client.recv_decrypted().await.unwrap().unwrap();
    assert_eq!(reply, opcode::KEEP_ALIVE_OK);

    // The same ciphertext again no longer matches the server's counter
    // nonce, so the session dies and the socket closes.
    client.send_plain(opcode::KEEP_ALIVE, sealed).await.unwrap();
    assert!(client.recv().await.unwrap().is_none());
}

#[tokio::test]
async fn shutdown_notice_reaches_established_clients() {
    let server = spawn_server().await.unwrap();
    let mut client = ProtocolClient::connect(&server).await.unwrap();
    client.login(&stock_login()).await.unwrap();

    server.shutdown.send(90).unwrap();

    let (reply, plain) = client.recv_decrypted().await.unwrap().unwrap();
    let Some(ServerMessage::ShutdownInfo(notice)) = ServerMessage::decode(reply, &plain).unwrap()
    else {
        panic!("expected a shutdown notice, got opcode {reply}");
    };
    assert_eq!(notice.seconds_until_shutdown, 90);

    // After the notice the server closes the connection.
    assert!(client.recv().await.unwrap().is_none());
}

#[tokio::test]
async fn shutdown_before_login_sends_nothing() {
    let server = spawn_server().await.unwrap();
    let mut client = ProtocolClient::connect(&server).await.unwrap();

    // Get as far as the session key so the connection task is running,
    // then pull the plug before the login.
    client
        .send_plain(
            opcode::SESSION_REQUEST,
            SessionRequest {
                major_version: 8,
                build: 551,
                content_hash: None,
                key_version: 16,
            }
            .to_payload(),
        )
        .await
        .unwrap();
    let (reply, _) = client.recv().await.unwrap().unwrap();
    assert_eq!(reply, opcode::SESSION_KEY);

    server.shutdown.send(30).unwrap();

    // The connection closes without a notice; there is no session to
    // seal one with yet.
    assert!(client.recv().await.unwrap().is_none());
}
