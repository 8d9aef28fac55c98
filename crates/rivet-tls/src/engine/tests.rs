//! Loopback tests: two engines wired back to back through byte buffers.

use std::sync::{Arc, Mutex, OnceLock};

use super::{HandshakeStatus, Status, TlsEngine};
use crate::config::{ContextData, TlsConfig};
use crate::params::ChannelBindingType;
use crate::provider::rustcrypto::{self, EcdsaSigningKey, RsaSigningKey, RustCryptoProvider};
use crate::provider::{
    HandshakeObserver, KeyManager, KeyType, PrivateKey, TrustError, TrustManager,
};
use crate::session::TlsSession;
use crate::version::ProtocolVersion;
use crate::CipherSuite;
use rivet_types::{AlertDescription, TlsError};
use rsa::traits::PublicKeyParts;

const NET_BUF: usize = 64 * 1024;
const APP_BUF: usize = 17 * 1024;

// ---------------------------------------------------------------------------
// Test capabilities
// ---------------------------------------------------------------------------

#[derive(Clone)]
struct TestIdentity {
    key: Arc<dyn PrivateKey>,
    chain: Vec<Vec<u8>>,
    key_type: KeyType,
}

static RSA_KEY: OnceLock<rsa::RsaPrivateKey> = OnceLock::new();

fn rsa_identity() -> TestIdentity {
    let key = RSA_KEY
        .get_or_init(|| rsa::RsaPrivateKey::new(&mut rand_core::OsRng, 2048).unwrap())
        .clone();
    let public = key.to_public_key();
    let chain = vec![rustcrypto::rsa_spki(
        &public.n().to_bytes_be(),
        &public.e().to_bytes_be(),
    )];
    TestIdentity {
        key: Arc::new(RsaSigningKey(key)),
        chain,
        key_type: KeyType::Rsa,
    }
}

fn ecdsa_identity() -> TestIdentity {
    let key = p256::ecdsa::SigningKey::random(&mut rand_core::OsRng);
    let point = key.verifying_key().to_encoded_point(false).as_bytes().to_vec();
    let chain = vec![rustcrypto::p256_spki(&point)];
    TestIdentity {
        key: Arc::new(EcdsaSigningKey(key)),
        chain,
        key_type: KeyType::Ec,
    }
}

struct TestKeyManager(Option<TestIdentity>);

impl KeyManager for TestKeyManager {
    fn choose_client_alias(
        &self,
        key_types: &[KeyType],
        _issuers: Option<&[Vec<u8>]>,
    ) -> Option<String> {
        let identity = self.0.as_ref()?;
        key_types
            .contains(&identity.key_type)
            .then(|| "default".to_string())
    }

    fn choose_server_alias(
        &self,
        key_type: KeyType,
        _issuers: Option<&[Vec<u8>]>,
    ) -> Option<String> {
        let identity = self.0.as_ref()?;
        (identity.key_type == key_type).then(|| "default".to_string())
    }

    fn private_key(&self, alias: &str) -> Option<Arc<dyn PrivateKey>> {
        if alias != "default" {
            return None;
        }
        self.0.as_ref().map(|identity| Arc::clone(&identity.key))
    }

    fn certificate_chain(&self, alias: &str) -> Option<Vec<Vec<u8>>> {
        if alias != "default" {
            return None;
        }
        self.0.as_ref().map(|identity| identity.chain.clone())
    }
}

struct TrustAll;

impl TrustManager for TrustAll {
    fn check_client_trusted(&self, _chain: &[Vec<u8>], _auth_type: &str) -> Result<(), TrustError> {
        Ok(())
    }
    fn check_server_trusted(&self, _chain: &[Vec<u8>], _auth_type: &str) -> Result<(), TrustError> {
        Ok(())
    }
}

struct TrustNothing;

impl TrustManager for TrustNothing {
    fn check_client_trusted(&self, _chain: &[Vec<u8>], _auth_type: &str) -> Result<(), TrustError> {
        Err(TrustError::new("nothing is trusted"))
    }
    fn check_server_trusted(&self, _chain: &[Vec<u8>], _auth_type: &str) -> Result<(), TrustError> {
        Err(TrustError::with_alert(
            AlertDescription::CertificateExpired,
            "server certificate expired",
        ))
    }
}

fn context(identity: Option<TestIdentity>) -> Arc<ContextData> {
    Arc::new(ContextData::new(
        Arc::new(RustCryptoProvider::new()),
        Arc::new(TestKeyManager(identity)),
        Arc::new(TrustAll),
    ))
}

fn client_engine(data: &Arc<ContextData>, config: TlsConfig) -> TlsEngine {
    let mut engine = TlsEngine::with_peer(Arc::clone(data), config, "peer.test", 4433);
    engine.set_client_mode(true).unwrap();
    engine
}

fn server_engine(data: &Arc<ContextData>, config: TlsConfig) -> TlsEngine {
    TlsEngine::with_config(Arc::clone(data), config)
}

// ---------------------------------------------------------------------------
// Loopback driver
// ---------------------------------------------------------------------------

/// Drain everything the engine wants to send.
fn flush(engine: &mut TlsEngine, net: &mut Vec<u8>, finished: &mut usize) -> Result<(), TlsError> {
    loop {
        let mut buf = vec![0u8; NET_BUF];
        let result = engine.wrap(&[], &mut buf)?;
        if result.handshake_status == HandshakeStatus::Finished {
            *finished += 1;
        }
        net.extend_from_slice(&buf[..result.bytes_produced]);
        if result.bytes_produced == 0 {
            return Ok(());
        }
    }
}

/// Feed buffered network bytes into the engine, collecting plaintext.
fn deliver(
    engine: &mut TlsEngine,
    net: &mut Vec<u8>,
    app: &mut Vec<u8>,
    finished: &mut usize,
) -> Result<(), TlsError> {
    loop {
        let mut buf = vec![0u8; APP_BUF];
        let result = engine.unwrap(net, &mut buf)?;
        net.drain(..result.bytes_consumed);
        app.extend_from_slice(&buf[..result.bytes_produced]);
        if result.handshake_status == HandshakeStatus::Finished {
            *finished += 1;
        }
        if result.status == Status::BufferUnderflow
            || result.status == Status::Closed
            || result.bytes_consumed == 0
        {
            return Ok(());
        }
    }
}

#[derive(Debug)]
struct HandshakeOutcome {
    client_finished: usize,
    server_finished: usize,
}

fn try_handshake(
    client: &mut TlsEngine,
    server: &mut TlsEngine,
) -> Result<HandshakeOutcome, TlsError> {
    let mut c2s = Vec::new();
    let mut s2c = Vec::new();
    let mut sink = Vec::new();
    let mut outcome = HandshakeOutcome {
        client_finished: 0,
        server_finished: 0,
    };
    for _ in 0..40 {
        flush(client, &mut c2s, &mut outcome.client_finished)?;
        deliver(server, &mut c2s, &mut sink, &mut outcome.server_finished)?;
        flush(server, &mut s2c, &mut outcome.server_finished)?;
        deliver(client, &mut s2c, &mut sink, &mut outcome.client_finished)?;
        if outcome.client_finished > 0 && outcome.server_finished > 0 {
            assert!(sink.is_empty(), "no application data during the handshake");
            return Ok(outcome);
        }
    }
    panic!("handshake did not converge");
}

fn run_handshake(client: &mut TlsEngine, server: &mut TlsEngine) -> HandshakeOutcome {
    let outcome = try_handshake(client, server).expect("handshake failed");
    assert_eq!(outcome.client_finished, 1);
    assert_eq!(outcome.server_finished, 1);
    assert_eq!(client.handshake_status(), HandshakeStatus::NotHandshaking);
    assert_eq!(server.handshake_status(), HandshakeStatus::NotHandshaking);
    outcome
}

/// Encrypt `data` on one side and decrypt it on the other.
fn transfer(from: &mut TlsEngine, to: &mut TlsEngine, data: &[u8]) -> Vec<u8> {
    let mut net = Vec::new();
    let mut offset = 0;
    while offset < data.len() {
        let mut buf = vec![0u8; NET_BUF];
        let result = from.wrap(&data[offset..], &mut buf).unwrap();
        assert_ne!(
            result.bytes_consumed + result.bytes_produced,
            0,
            "transfer stalled"
        );
        offset += result.bytes_consumed;
        net.extend_from_slice(&buf[..result.bytes_produced]);
    }
    let mut out = Vec::new();
    let mut finished = 0;
    deliver(to, &mut net, &mut out, &mut finished).unwrap();
    assert_eq!(finished, 0);
    out
}

/// Content types of the records in a raw byte stream.
fn record_types(mut net: &[u8]) -> Vec<u8> {
    let mut types = Vec::new();
    while net.len() >= 5 {
        let len = u16::from_be_bytes([net[3], net[4]]) as usize;
        types.push(net[0]);
        net = &net[5 + len..];
    }
    types
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[test]
fn test_happy_path_tls12_rsa_16k() {
    let client_data = context(None);
    let server_data = context(Some(rsa_identity()));
    let config = TlsConfig::builder()
        .enabled_versions(&[ProtocolVersion::TLS12])
        .cipher_suites(&[CipherSuite::TLS_RSA_WITH_AES_128_GCM_SHA256])
        .build();

    let mut client = client_engine(&client_data, config.clone());
    let mut server = server_engine(&server_data, config);
    run_handshake(&mut client, &mut server);

    // One FINISHED per side is asserted by run_handshake; the negotiated
    // session carries a fresh 32-byte ID cached on both ends.
    let session = client.session();
    assert_eq!(session.id().len(), 32);
    assert_eq!(session.cipher_suite(), CipherSuite::TLS_RSA_WITH_AES_128_GCM_SHA256);
    assert_eq!(session.version(), ProtocolVersion::TLS12);
    assert!(client_data.sessions.get(session.id()).is_some());
    assert!(server_data.sessions.get(session.id()).is_some());
    assert_eq!(server.session().id(), session.id());

    // 16 KiB delivered byte-identically.
    let payload = vec![b'A'; 16384];
    let received = transfer(&mut client, &mut server, &payload);
    assert_eq!(received, payload);

    // And the other direction.
    let reply = vec![b'B'; 4096];
    let received = transfer(&mut server, &mut client, &reply);
    assert_eq!(received, reply);
}

#[test]
fn test_ecdhe_ecdsa_alpn_h2() {
    let client_data = context(None);
    let server_data = context(Some(ecdsa_identity()));

    let client_config = TlsConfig::builder()
        .cipher_suites(&[CipherSuite::TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256])
        .alpn(&[b"h2", b"http/1.1"])
        .build();
    let server_config = TlsConfig::builder()
        .cipher_suites(&[CipherSuite::TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256])
        .alpn(&[b"h2"])
        .build();

    let mut client = client_engine(&client_data, client_config);
    let mut server = server_engine(&server_data, server_config);
    run_handshake(&mut client, &mut server);

    assert_eq!(client.application_protocol().as_deref(), Some(&b"h2"[..]));
    assert_eq!(server.application_protocol().as_deref(), Some(&b"h2"[..]));

    let received = transfer(&mut client, &mut server, b"GET / HTTP/2");
    assert_eq!(received, b"GET / HTTP/2");
}

#[test]
fn test_chacha20_suite_roundtrip() {
    let client_data = context(None);
    let server_data = context(Some(rsa_identity()));
    let config = TlsConfig::builder()
        .cipher_suites(&[CipherSuite::TLS_ECDHE_RSA_WITH_CHACHA20_POLY1305_SHA256])
        .build();

    let mut client = client_engine(&client_data, config.clone());
    let mut server = server_engine(&server_data, config);
    run_handshake(&mut client, &mut server);

    let payload = vec![0x5A; 1000];
    assert_eq!(transfer(&mut client, &mut server, &payload), payload);
}

#[test]
fn test_session_resumption_abbreviated() {
    let client_data = context(None);
    let server_data = context(Some(rsa_identity()));
    let config = TlsConfig::builder()
        .cipher_suites(&[CipherSuite::TLS_RSA_WITH_AES_128_GCM_SHA256])
        .build();

    let mut client = client_engine(&client_data, config.clone());
    let mut server = server_engine(&server_data, config.clone());
    run_handshake(&mut client, &mut server);
    let first_session = client.session();
    assert!(!client.was_resumed());

    // Second connection: same contexts, same peer.
    let mut client2 = client_engine(&client_data, config.clone());
    let mut server2 = server_engine(&server_data, config);

    // Drive by hand so the server flight can be inspected.
    let mut c2s = Vec::new();
    let mut s2c = Vec::new();
    let mut s2c_log = Vec::new();
    let mut sink = Vec::new();
    let (mut cf, mut sf) = (0, 0);
    for _ in 0..40 {
        flush(&mut client2, &mut c2s, &mut cf).unwrap();
        deliver(&mut server2, &mut c2s, &mut sink, &mut sf).unwrap();
        let before = s2c.len();
        flush(&mut server2, &mut s2c, &mut sf).unwrap();
        s2c_log.extend_from_slice(&s2c[before..]);
        deliver(&mut client2, &mut s2c, &mut sink, &mut cf).unwrap();
        if cf > 0 && sf > 0 {
            break;
        }
    }
    assert_eq!((cf, sf), (1, 1));
    assert!(client2.was_resumed());
    assert!(server2.was_resumed());

    // Abbreviated flight: ServerHello, ChangeCipherSpec, Finished. A single
    // handshake record before the CCS means no Certificate was sent.
    assert_eq!(record_types(&s2c_log), vec![22, 20, 22]);

    // Same session, same master secret reused.
    assert_eq!(client2.session().id(), first_session.id());
    assert_eq!(server2.session().id(), first_session.id());

    // The exporter is deterministic and agrees across the connection.
    let client_export = client2
        .export_keying_material("EXPORTER-label", None, 32)
        .unwrap();
    let server_export = server2
        .export_keying_material("EXPORTER-label", None, 32)
        .unwrap();
    assert_eq!(client_export, server_export);
    assert_eq!(
        client_export,
        client2
            .export_keying_material("EXPORTER-label", None, 32)
            .unwrap()
    );

    // Resumed connections still move data.
    assert_eq!(
        transfer(&mut client2, &mut server2, b"resumed"),
        b"resumed"
    );
}

#[test]
fn test_invalidated_session_is_not_resumed() {
    let client_data = context(None);
    let server_data = context(Some(rsa_identity()));
    let config = TlsConfig::builder().build();

    let mut client = client_engine(&client_data, config.clone());
    let mut server = server_engine(&server_data, config.clone());
    run_handshake(&mut client, &mut server);
    let session = client.session();

    // Invalidate on the server: the ID lookup must miss.
    server_data.sessions.invalidate(session.id());

    let mut client2 = client_engine(&client_data, config.clone());
    let mut server2 = server_engine(&server_data, config);
    run_handshake(&mut client2, &mut server2);
    assert!(!server2.was_resumed());
    assert_ne!(client2.session().id(), session.id());
}

#[test]
fn test_close_notify_after_pending_data() {
    let client_data = context(None);
    let server_data = context(Some(rsa_identity()));
    let config = TlsConfig::builder().build();

    let mut client = client_engine(&client_data, config.clone());
    let mut server = server_engine(&server_data, config);
    run_handshake(&mut client, &mut server);

    // 500 bytes of plaintext queued, then an orderly close.
    let payload = vec![0xEE; 500];
    let mut net = Vec::new();
    let mut buf = vec![0u8; NET_BUF];
    let result = server.wrap(&payload, &mut buf).unwrap();
    assert_eq!(result.bytes_consumed, 500);
    net.extend_from_slice(&buf[..result.bytes_produced]);

    server.close_outbound();
    assert!(!server.is_outbound_done(), "close_notify still buffered");
    let mut fin = 0;
    flush(&mut server, &mut net, &mut fin).unwrap();
    assert!(server.is_outbound_done());

    // Data first, then close_notify, then CLOSED.
    let mut app = Vec::new();
    deliver(&mut client, &mut net, &mut app, &mut fin).unwrap();
    assert_eq!(app, payload);
    assert!(client.is_inbound_done());
    let result = client.unwrap(&[], &mut buf).unwrap();
    assert_eq!(result.status, Status::Closed);

    // Our own close_notify answer is buffered and drainable.
    let mut answer = Vec::new();
    flush(&mut client, &mut answer, &mut fin).unwrap();
    assert_eq!(record_types(&answer), vec![21]);
    assert!(client.is_outbound_done());
}

#[test]
fn test_tampered_record_deferred_error() {
    let client_data = context(None);
    let server_data = context(Some(rsa_identity()));
    let config = TlsConfig::builder().build();

    let mut client = client_engine(&client_data, config.clone());
    let mut server = server_engine(&server_data, config);
    run_handshake(&mut client, &mut server);

    // Flip one ciphertext bit in flight.
    let mut net = Vec::new();
    let mut buf = vec![0u8; NET_BUF];
    let result = client.wrap(b"application data", &mut buf).unwrap();
    net.extend_from_slice(&buf[..result.bytes_produced]);
    let last = net.len() - 1;
    net[last] ^= 0x01;

    // unwrap reports success and asks for a wrap...
    let mut app = vec![0u8; APP_BUF];
    let result = server.unwrap(&net, &mut app).unwrap();
    assert_eq!(result.status, Status::Ok);
    assert_eq!(result.handshake_status, HandshakeStatus::NeedWrap);
    assert_eq!(result.bytes_produced, 0);

    // ...the next wrap raises the stored failure...
    let error = server.wrap(&[], &mut buf).unwrap_err();
    assert_eq!(error.alert(), Some(AlertDescription::BadRecordMac));

    // ...and the wrap after that flushes the buffered fatal alert.
    let result = server.wrap(&[], &mut buf).unwrap();
    assert!(result.bytes_produced > 0);
    let alert = &buf[..result.bytes_produced];
    assert_eq!(record_types(alert), vec![21]);

    // The peer surfaces it as a received fatal alert.
    let error = client.unwrap(alert, &mut app).unwrap_err();
    assert!(matches!(
        error,
        TlsError::PeerAlert(AlertDescription::BadRecordMac)
    ));
}

#[test]
fn test_renegotiation_rejected() {
    let client_data = context(None);
    let server_data = context(Some(rsa_identity()));
    let config = TlsConfig::builder().build();

    let mut client = client_engine(&client_data, config.clone());
    let mut server = server_engine(&server_data, config);
    run_handshake(&mut client, &mut server);

    // Synchronous engine-local error; no bytes, no state change.
    let error = client.begin_handshake().unwrap_err();
    assert!(matches!(error, TlsError::Misuse(_)));
    let mut buf = vec![0u8; NET_BUF];
    let result = client.wrap(&[], &mut buf).unwrap();
    assert_eq!(result.bytes_produced, 0);

    // The connection stays usable.
    assert_eq!(
        transfer(&mut client, &mut server, b"still alive"),
        b"still alive"
    );
    assert_eq!(
        transfer(&mut server, &mut client, b"both ways"),
        b"both ways"
    );
}

#[test]
fn test_mutual_tls_client_auth() {
    let client_data = context(Some(rsa_identity()));
    let server_data = context(Some(ecdsa_identity()));
    let config = TlsConfig::builder()
        .cipher_suites(&[CipherSuite::TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256])
        .build();
    let server_config = {
        let mut c = config.clone();
        c.want_client_auth = true;
        c.need_client_auth = true;
        c
    };

    let mut client = client_engine(&client_data, config);
    let mut server = server_engine(&server_data, server_config);
    run_handshake(&mut client, &mut server);

    // The server saw and kept the client's chain.
    let session = server.session();
    let peer = session.peer_certificate().expect("client chain recorded");
    assert_eq!(peer.len(), 1);
    assert_eq!(
        transfer(&mut client, &mut server, b"authenticated"),
        b"authenticated"
    );
}

#[test]
fn test_need_client_auth_without_identity_fails() {
    let client_data = context(None);
    let server_data = context(Some(rsa_identity()));
    let config = TlsConfig::builder().build();
    let server_config = {
        let mut c = config.clone();
        c.want_client_auth = true;
        c.need_client_auth = true;
        c
    };

    let mut client = client_engine(&client_data, config);
    let mut server = server_engine(&server_data, server_config);
    let error = try_handshake(&mut client, &mut server).unwrap_err();
    // The failure surfaces on one of the two ends as bad_certificate.
    let alert = match &error {
        TlsError::Fatal { alert, .. } => *alert,
        TlsError::PeerAlert(alert) => *alert,
        other => panic!("unexpected error {other:?}"),
    };
    assert_eq!(alert, AlertDescription::BadCertificate);
}

#[test]
fn test_untrusted_server_is_rejected() {
    let client_data = Arc::new(ContextData::new(
        Arc::new(RustCryptoProvider::new()),
        Arc::new(TestKeyManager(None)),
        Arc::new(TrustNothing),
    ));
    let server_data = context(Some(rsa_identity()));
    let config = TlsConfig::builder().build();

    let mut client = client_engine(&client_data, config.clone());
    let mut server = server_engine(&server_data, config);
    let error = try_handshake(&mut client, &mut server).unwrap_err();
    // The trust capability asked for certificate_expired specifically.
    let alert = match &error {
        TlsError::Fatal { alert, .. } => *alert,
        TlsError::PeerAlert(alert) => *alert,
        other => panic!("unexpected error {other:?}"),
    };
    assert_eq!(alert, AlertDescription::CertificateExpired);
}

#[test]
fn test_tls11_cbc_handshake() {
    let client_data = context(None);
    let server_data = context(Some(rsa_identity()));
    let config = TlsConfig::builder()
        .enabled_versions(&[ProtocolVersion::TLS11, ProtocolVersion::TLS10])
        .cipher_suites(&[CipherSuite::TLS_ECDHE_RSA_WITH_AES_128_CBC_SHA])
        .build();

    let mut client = client_engine(&client_data, config.clone());
    let mut server = server_engine(&server_data, config);
    run_handshake(&mut client, &mut server);

    let session = client.session();
    assert_eq!(session.version(), ProtocolVersion::TLS11);

    let payload = vec![0x42; 2000];
    assert_eq!(transfer(&mut client, &mut server, &payload), payload);
}

#[test]
fn test_tls10_cbc_one_n_minus_one_split() {
    let client_data = context(None);
    let server_data = context(Some(rsa_identity()));
    let config = TlsConfig::builder()
        .enabled_versions(&[ProtocolVersion::TLS10])
        .cipher_suites(&[CipherSuite::TLS_RSA_WITH_AES_128_CBC_SHA])
        .build();

    let mut client = client_engine(&client_data, config.clone());
    let mut server = server_engine(&server_data, config);
    run_handshake(&mut client, &mut server);
    assert_eq!(client.session().version(), ProtocolVersion::TLS10);

    // One write becomes two application-data records: 1 byte, then n-1.
    let mut buf = vec![0u8; NET_BUF];
    let result = client.wrap(b"split me", &mut buf).unwrap();
    assert_eq!(result.bytes_consumed, 8);
    let net = &buf[..result.bytes_produced];
    assert_eq!(record_types(net), vec![23, 23]);

    let mut app = Vec::new();
    let mut fin = 0;
    let mut net = net.to_vec();
    deliver(&mut server, &mut net, &mut app, &mut fin).unwrap();
    assert_eq!(app, b"split me");
}

#[test]
fn test_buffer_underflow_and_overflow() {
    let client_data = context(None);
    let server_data = context(Some(rsa_identity()));
    let config = TlsConfig::builder().build();

    let mut client = client_engine(&client_data, config.clone());
    let mut server = server_engine(&server_data, config);

    // Flush the ClientHello.
    let mut c2s = Vec::new();
    let mut fin = 0;
    flush(&mut client, &mut c2s, &mut fin).unwrap();
    assert!(c2s.len() > 5);

    // Less than a header, then less than the whole record: underflow, no
    // state change, nothing consumed.
    let mut app = vec![0u8; APP_BUF];
    let result = server.unwrap(&c2s[..3], &mut app).unwrap();
    assert_eq!(result.status, Status::BufferUnderflow);
    assert_eq!(result.bytes_consumed, 0);
    let result = server.unwrap(&c2s[..c2s.len() - 1], &mut app).unwrap();
    assert_eq!(result.status, Status::BufferUnderflow);
    assert_eq!(result.bytes_consumed, 0);

    // A destination smaller than the record's potential plaintext:
    // overflow, nothing consumed.
    let mut tiny = [0u8; 4];
    let result = server.unwrap(&c2s, &mut tiny).unwrap();
    assert_eq!(result.status, Status::BufferOverflow);
    assert_eq!(result.bytes_consumed, 0);

    // The same record is then accepted unchanged.
    let result = server.unwrap(&c2s, &mut app).unwrap();
    assert_eq!(result.status, Status::Ok);
    assert_eq!(result.bytes_consumed, c2s.len());
}

#[test]
fn test_wrap_buffer_overflow_reserves_worst_case() {
    let client_data = context(None);
    let server_data = context(Some(rsa_identity()));
    let config = TlsConfig::builder().build();

    let mut client = client_engine(&client_data, config.clone());
    let mut server = server_engine(&server_data, config);
    run_handshake(&mut client, &mut server);

    // A destination too small for the sealed record: overflow, nothing
    // consumed or produced.
    let mut tiny = [0u8; 64];
    let result = client.wrap(&[0xAA; 1000], &mut tiny).unwrap();
    assert_eq!(result.status, Status::BufferOverflow);
    assert_eq!(result.bytes_consumed, 0);
    assert_eq!(result.bytes_produced, 0);

    // With room, the same data goes out.
    let mut buf = vec![0u8; NET_BUF];
    let result = client.wrap(&[0xAA; 1000], &mut buf).unwrap();
    assert_eq!(result.bytes_consumed, 1000);
    assert!(result.bytes_produced > 1000);
}

#[test]
fn test_channel_bindings_and_exporter() {
    let client_data = context(None);
    let server_data = context(Some(rsa_identity()));
    let config = TlsConfig::builder().build();

    let mut client = client_engine(&client_data, config.clone());
    let mut server = server_engine(&server_data, config);

    // Before completion: misuse errors.
    assert!(matches!(
        client.channel_binding(ChannelBindingType::TlsUnique),
        Err(TlsError::Misuse(_))
    ));
    run_handshake(&mut client, &mut server);

    // tls-unique: the first Finished, agreed by both sides, 12 bytes.
    let client_unique = client.channel_binding(ChannelBindingType::TlsUnique).unwrap();
    let server_unique = server.channel_binding(ChannelBindingType::TlsUnique).unwrap();
    assert_eq!(client_unique, server_unique);
    assert_eq!(client_unique.len(), 12);

    // tls-server-end-point: hash of the server certificate, agreed.
    let client_ep = client
        .channel_binding(ChannelBindingType::TlsServerEndPoint)
        .unwrap();
    let server_ep = server
        .channel_binding(ChannelBindingType::TlsServerEndPoint)
        .unwrap();
    assert_eq!(client_ep, server_ep);
    assert_eq!(client_ep.len(), 32);

    // Exporter: both ends derive identical material; the context is bound.
    let a = client
        .export_keying_material("EXPORTER-test", Some(b"ctx"), 48)
        .unwrap();
    let b = server
        .export_keying_material("EXPORTER-test", Some(b"ctx"), 48)
        .unwrap();
    assert_eq!(a, b);
    let c = client
        .export_keying_material("EXPORTER-test", Some(b"other"), 48)
        .unwrap();
    assert_ne!(a, c);
}

#[test]
fn test_application_bytes_bijection() {
    let client_data = context(None);
    let server_data = context(Some(ecdsa_identity()));
    let config = TlsConfig::builder()
        .cipher_suites(&[CipherSuite::TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384])
        .build();

    let mut client = client_engine(&client_data, config.clone());
    let mut server = server_engine(&server_data, config);
    run_handshake(&mut client, &mut server);

    // Uneven chunk sizes crossing the fragment limit in both directions:
    // every byte arrives exactly once, in order.
    let mut to_server_expected = Vec::new();
    let mut to_client_expected = Vec::new();
    let mut to_server_actual = Vec::new();
    let mut to_client_actual = Vec::new();
    for (i, size) in [1usize, 7, 16384, 20000, 3, 16383].iter().enumerate() {
        let chunk: Vec<u8> = (0..*size).map(|j| (i + j) as u8).collect();
        to_server_expected.extend_from_slice(&chunk);
        to_server_actual.extend_from_slice(&transfer(&mut client, &mut server, &chunk));

        let reply: Vec<u8> = (0..*size).map(|j| (i * j) as u8).collect();
        to_client_expected.extend_from_slice(&reply);
        to_client_actual.extend_from_slice(&transfer(&mut server, &mut client, &reply));
    }
    assert_eq!(to_server_actual, to_server_expected);
    assert_eq!(to_client_actual, to_client_expected);
}

#[test]
fn test_set_mode_after_handshake_rejected() {
    let client_data = context(None);
    let server_data = context(Some(rsa_identity()));
    let config = TlsConfig::builder().build();

    let mut client = client_engine(&client_data, config.clone());
    let mut server = server_engine(&server_data, config);
    run_handshake(&mut client, &mut server);

    assert!(matches!(
        client.set_client_mode(false),
        Err(TlsError::Misuse(_))
    ));
    assert!(matches!(client.config_mut(), Err(TlsError::Misuse(_))));
    assert!(matches!(
        server.set_need_client_auth(true),
        Err(TlsError::Misuse(_))
    ));
}

#[test]
fn test_handshake_observer_sees_session_then_completion() {
    struct RecordingObserver {
        events: Mutex<Vec<(&'static str, usize)>>,
    }
    impl HandshakeObserver for RecordingObserver {
        fn handshake_session(&self, session: &Arc<TlsSession>) {
            self.events
                .lock()
                .unwrap()
                .push(("session", session.id().len()));
        }
        fn handshake_complete(&self, session: &Arc<TlsSession>) {
            self.events
                .lock()
                .unwrap()
                .push(("complete", session.id().len()));
        }
    }

    let observer = Arc::new(RecordingObserver {
        events: Mutex::new(Vec::new()),
    });
    let server_data = Arc::new(
        ContextData::new(
            Arc::new(RustCryptoProvider::new()),
            Arc::new(TestKeyManager(Some(rsa_identity()))),
            Arc::new(TrustAll),
        )
        .with_observer(Arc::clone(&observer) as Arc<dyn HandshakeObserver>),
    );
    let client_data = context(None);
    let config = TlsConfig::builder().build();

    let mut client = client_engine(&client_data, config.clone());
    let mut server = server_engine(&server_data, config);
    run_handshake(&mut client, &mut server);

    let events = observer.events.lock().unwrap();
    assert_eq!(
        events.as_slice(),
        &[("session", 32), ("complete", 32)],
        "session surfaces before completion, once each"
    );
}

#[test]
fn test_session_creation_disabled_yields_empty_id() {
    let client_data = context(None);
    let server_data = context(Some(rsa_identity()));
    let config = TlsConfig::builder().session_creation(false).build();

    let mut client = client_engine(&client_data, config.clone());
    let mut server = server_engine(&server_data, config);
    run_handshake(&mut client, &mut server);

    assert!(server.session().id().is_empty());
    assert!(!server.session().is_resumable());
    assert!(server_data.sessions.is_empty());
    assert!(client_data.sessions.is_empty());
}
