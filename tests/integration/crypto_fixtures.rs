use crate::*;

use rampart_core::config::{standard_keypair, STANDARD_PUBLIC_KEY, STOCK_SERVER_PUBLIC_KEY};

/// Two sessions built from the same fixture material seal identically:
/// the handshake nonce is a pure function of the key material, and the
/// public-key box is deterministic given key, nonce, and plaintext.
#[test]
fn standard_fixture_sessions_are_reproducible() {
    let seal = || {
        let mut session = Session::new(Direction::Client, standard_keypair());
        session
            .update_shared_key(&STOCK_SERVER_PUBLIC_KEY)
            .unwrap();
        session.encrypt(b"interop probe").unwrap()
    };
    assert_eq!(seal(), seal());
}

#[test]
fn standard_keypair_carries_the_published_public_key() {
    let session = Session::new(Direction::Client, standard_keypair());
    assert_eq!(*session.public_key(), STANDARD_PUBLIC_KEY);
}

/// The role decides key ordering inside the nonce derivation, so the same
/// key material seals differently depending on which side is speaking.
#[test]
fn role_changes_the_derivation() {
    let seal = |direction| {
        let mut session = Session::new(direction, standard_keypair());
        session
            .update_shared_key(&STOCK_SERVER_PUBLIC_KEY)
            .unwrap();
        session.encrypt(b"interop probe").unwrap()
    };
    assert_ne!(seal(Direction::Client), seal(Direction::Server));
}

/// The server keypair from the default config interoperates with a client
/// session built from its derived public half.
#[test]
fn default_server_key_interoperates() {
    let config = rampart_core::config::RampartConfig::default();
    let server_keypair = config.keys.keypair().unwrap();

    let mut server = Session::new(Direction::Server, server_keypair.clone());
    let mut client = Session::generate(Direction::Client);
    client.update_shared_key(&server_keypair.public).unwrap();
    server.update_shared_key(client.public_key()).unwrap();

    let sealed = client.encrypt(b"hello server").unwrap();
    assert_eq!(server.decrypt(&sealed).unwrap(), b"hello server");
}
