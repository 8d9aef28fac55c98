//! Client handshake state machine.
//!
//! Full handshakes for ECDHE and static-RSA key exchange, abbreviated
//! handshakes for resumed sessions, optional client authentication, and
//! the RFC 5746 / RFC 7627 extension signalling. Each state admits a fixed
//! set of inbound messages; anything else is a fatal unexpected_message.

use std::sync::Arc;

use subtle::ConstantTimeEq;
use zeroize::Zeroize;

use crate::config::{ContextData, TlsConfig};
use crate::crypt::key_schedule::{
    compute_verify_data, derive_extended_master_secret, derive_master_secret,
};
use crate::crypt::transcript::Transcript;
use crate::crypt::{CipherSuiteParams, KeyExchangeAlg, NamedGroup};
#[cfg(test)]
use crate::crypt::SignatureScheme;
use crate::handshake::codec::{
    self, encode_certificate, encode_certificate_verify, encode_client_hello,
    encode_client_key_exchange_ecdhe, encode_client_key_exchange_rsa, encode_finished,
    CertificateRequest, CertificateVerify, ClientHello, ServerHello,
};
use crate::handshake::extensions::{self, ExtensionType};
use crate::handshake::{
    direction_keys, legacy_signature_algorithm, scheme_matches_key, select_signature_scheme,
    ClientState, HandshakeMessage, HandshakeOutput, HandshakeResult, HandshakeType,
};
use crate::params::ConnectionContext;
use crate::provider::{KeyType, PrivateKey, PublicKey};
use crate::record::cipher::CipherKeys;
use crate::session::TlsSession;
use crate::version::ProtocolVersion;
use crate::TlsRole;
use rivet_types::{AlertDescription, HashAlg, TlsError};

fn fatal(alert: AlertDescription, reason: impl Into<String>) -> TlsError {
    TlsError::fatal(alert, reason)
}

pub(crate) struct ClientHandshake {
    state: ClientState,
    config: TlsConfig,
    data: Arc<ContextData>,
    peer: Option<(String, u16)>,
    transcript: Transcript,

    /// The version offered in ClientHello; also the version embedded in the
    /// RSA premaster secret.
    offered_version: ProtocolVersion,
    version: ProtocolVersion,
    suite: Option<CipherSuiteParams>,
    client_random: [u8; 32],
    server_random: [u8; 32],
    ems_offered: bool,
    ems: bool,

    offered_session: Option<Arc<TlsSession>>,
    resumed: bool,
    session_id: Vec<u8>,
    session: Option<Arc<TlsSession>>,

    server_public_key: Option<PublicKey>,
    server_kx: Option<(NamedGroup, Vec<u8>)>,
    cert_request: Option<CertificateRequest>,
    client_key: Option<Arc<dyn PrivateKey>>,
    sent_client_cert: bool,

    master_secret: Vec<u8>,
    pending_read_keys: Option<CipherKeys>,
    pending_write_keys: Option<CipherKeys>,
}

impl Drop for ClientHandshake {
    fn drop(&mut self) {
        self.master_secret.zeroize();
    }
}

impl ClientHandshake {
    pub fn new(config: TlsConfig, data: Arc<ContextData>, peer: Option<(String, u16)>) -> Self {
        let offered_version = config.max_version().unwrap_or(ProtocolVersion::TLS12);
        Self {
            state: ClientState::Init,
            config,
            data,
            peer,
            transcript: Transcript::new(),
            offered_version,
            version: offered_version,
            suite: None,
            client_random: [0; 32],
            server_random: [0; 32],
            ems_offered: false,
            ems: false,
            offered_session: None,
            resumed: false,
            session_id: Vec::new(),
            session: None,
            server_public_key: None,
            server_kx: None,
            cert_request: None,
            client_key: None,
            sent_client_cert: false,
            master_secret: Vec::new(),
            pending_read_keys: None,
            pending_write_keys: None,
        }
    }

    pub fn handshake_session(&self) -> Option<&Arc<TlsSession>> {
        self.session.as_ref()
    }

    /// A cached session is only offered if it could still be negotiated
    /// under the current configuration.
    fn pick_resumption_offer(&self) -> Option<Arc<TlsSession>> {
        let (host, port) = self.peer.as_ref()?;
        let session = self.data.sessions.get_by_peer(host, *port)?;
        let usable = self.config.enabled_versions.contains(&session.version())
            && self.config.cipher_suites.contains(&session.cipher_suite());
        usable.then_some(session)
    }

    /// Send ClientHello.
    pub fn start(
        &mut self,
        ctx: &mut ConnectionContext,
        out: &mut HandshakeOutput<'_>,
    ) -> Result<(), TlsError> {
        self.config.validate()?;
        self.data.crypto.random_bytes(&mut self.client_random)?;

        self.offered_session = self.pick_resumption_offer();
        let session_id = self
            .offered_session
            .as_ref()
            .map(|s| s.id().to_vec())
            .unwrap_or_default();

        let mut hello_extensions = vec![extensions::renegotiation_info(&[])];
        if let Some(name) = &self.config.server_name {
            hello_extensions.push(extensions::server_name(name));
        }
        hello_extensions.push(extensions::supported_groups(&self.config.supported_groups));
        hello_extensions.push(extensions::ec_point_formats());
        if self.offered_version.uses_tls12_prf() {
            hello_extensions.push(extensions::signature_algorithms(
                &self.config.signature_schemes,
            ));
        }
        if self.config.extended_master_secret {
            hello_extensions.push(extensions::extended_master_secret());
            self.ems_offered = true;
        }
        if !self.config.alpn_protocols.is_empty() {
            hello_extensions.push(extensions::alpn(&self.config.alpn_protocols));
        }

        let hello = ClientHello {
            client_version: self.offered_version,
            random: self.client_random,
            session_id,
            cipher_suites: self.config.cipher_suites.clone(),
            compression_methods: vec![0],
            extensions: hello_extensions,
        };

        {
            let params = ctx.security_parameters_handshake_mut()?;
            params.client_random = Some(self.client_random);
        }
        out.send_handshake(&mut self.transcript, &encode_client_hello(&hello))?;
        self.state = ClientState::WaitServerHello;
        Ok(())
    }

    pub fn handle_message(
        &mut self,
        msg: HandshakeMessage,
        ctx: &mut ConnectionContext,
        out: &mut HandshakeOutput<'_>,
    ) -> Result<Option<HandshakeResult>, TlsError> {
        match (self.state, msg.msg_type) {
            // A HelloRequest during the handshake is ignored and excluded
            // from the transcript (RFC 5246 §7.4.1.1).
            (_, HandshakeType::HelloRequest) => Ok(None),
            (ClientState::WaitServerHello, HandshakeType::ServerHello) => {
                self.transcript.update(&msg.raw);
                let hello = codec::decode_server_hello(&msg.body)?;
                self.process_server_hello(hello, ctx, out)?;
                Ok(None)
            }
            (ClientState::WaitCertificate, HandshakeType::Certificate) => {
                self.transcript.update(&msg.raw);
                let chain = codec::decode_certificate(&msg.body)?;
                self.process_certificate(chain, ctx)?;
                Ok(None)
            }
            (ClientState::WaitServerKeyExchange, HandshakeType::ServerKeyExchange) => {
                self.transcript.update(&msg.raw);
                let ske = codec::decode_server_key_exchange(&msg.body, self.version)?;
                self.process_server_key_exchange(ske)?;
                Ok(None)
            }
            (ClientState::WaitServerHelloDone, HandshakeType::CertificateRequest) => {
                if self.cert_request.is_some() {
                    return Err(self.unexpected(msg.msg_type));
                }
                self.transcript.update(&msg.raw);
                let request = codec::decode_certificate_request(&msg.body, self.version)?;
                self.cert_request = Some(request);
                Ok(None)
            }
            (ClientState::WaitServerHelloDone, HandshakeType::ServerHelloDone) => {
                if !msg.body.is_empty() {
                    return Err(fatal(
                        AlertDescription::DecodeError,
                        "ServerHelloDone carries a body",
                    ));
                }
                self.transcript.update(&msg.raw);
                self.process_server_hello_done(ctx, out)?;
                Ok(None)
            }
            (ClientState::WaitFinished, HandshakeType::Finished) => {
                let verify_data = codec::decode_finished(&msg.body)?;
                self.process_server_finished(&verify_data, &msg.raw, ctx, out)
            }
            (_, other) => Err(self.unexpected(other)),
        }
    }

    fn unexpected(&self, msg_type: HandshakeType) -> TlsError {
        fatal(
            AlertDescription::UnexpectedMessage,
            format!("unexpected {msg_type:?} in state {:?}", self.state),
        )
    }

    fn process_server_hello(
        &mut self,
        hello: ServerHello,
        ctx: &mut ConnectionContext,
        out: &mut HandshakeOutput<'_>,
    ) -> Result<(), TlsError> {
        let version = hello.server_version;
        if version > self.offered_version || !self.config.enabled_versions.contains(&version) {
            return Err(fatal(
                AlertDescription::ProtocolVersion,
                format!("server chose unsupported version {version}"),
            ));
        }
        if hello.compression_method != 0 {
            return Err(fatal(
                AlertDescription::IllegalParameter,
                "server selected non-null compression",
            ));
        }
        if !self.config.cipher_suites.contains(&hello.cipher_suite) {
            return Err(fatal(
                AlertDescription::IllegalParameter,
                format!("server chose unoffered suite 0x{:04X}", hello.cipher_suite.0),
            ));
        }
        let suite = CipherSuiteParams::from_suite(hello.cipher_suite)?;
        if !suite.usable_at(version) {
            return Err(fatal(
                AlertDescription::IllegalParameter,
                "suite not defined at the negotiated version",
            ));
        }

        self.check_server_extensions(&hello, ctx)?;

        self.version = version;
        self.server_random = hello.random;
        out.record.set_negotiated_version(version);

        {
            let params = ctx.security_parameters_handshake_mut()?;
            params.negotiated_version = Some(version);
            params.cipher_suite = Some(hello.cipher_suite);
            params.prf_hash = Some(suite.prf_hash);
            params.server_random = Some(hello.random);
        }

        // Abbreviated handshake when the server echoed our offer.
        let resumed = self.offered_session.as_ref().is_some_and(|session| {
            !hello.session_id.is_empty()
                && session.id() == hello.session_id.as_slice()
                && session.version() == version
                && session.cipher_suite() == hello.cipher_suite
        });

        self.session_id = hello.session_id;
        self.suite = Some(suite);

        if resumed {
            let session = self.offered_session.take().expect("checked above");
            if session.extended_master_secret() != self.ems {
                return Err(fatal(
                    AlertDescription::HandshakeFailure,
                    "extended_master_secret changed across resumption",
                ));
            }
            self.resumed = true;
            self.master_secret = session.master_secret().to_vec();
            let end_point = session
                .peer_certificate()
                .and_then(|c| c.first())
                .map(|cert| self.end_point_hash(cert));
            {
                let params = ctx.security_parameters_handshake_mut()?;
                params.master_secret = session.master_secret().to_vec();
                params.extended_master_secret = session.extended_master_secret();
                params.peer_certificate = session.peer_certificate().map(|c| c.to_vec());
                params.tls_server_end_point = end_point.unwrap_or_default();
            }
            self.derive_pending_keys();
            self.notify_handshake_session(Arc::clone(&session));
            self.session = Some(session);
            self.state = ClientState::WaitChangeCipherSpec;
        } else {
            self.offered_session = None;
            self.state = ClientState::WaitCertificate;
        }
        Ok(())
    }

    /// The server may only reflect extensions we offered.
    fn check_server_extensions(
        &mut self,
        hello: &ServerHello,
        ctx: &mut ConnectionContext,
    ) -> Result<(), TlsError> {
        for extension in &hello.extensions {
            match extension.extension_type {
                ExtensionType::RENEGOTIATION_INFO => {
                    let payload = extensions::parse_renegotiation_info(&extension.data)?;
                    if !payload.is_empty() {
                        return Err(fatal(
                            AlertDescription::HandshakeFailure,
                            "non-empty renegotiation_info on initial handshake",
                        ));
                    }
                    ctx.security_parameters_handshake_mut()?.secure_renegotiation = true;
                }
                ExtensionType::EXTENDED_MASTER_SECRET => {
                    if !self.ems_offered {
                        return Err(fatal(
                            AlertDescription::UnsupportedExtension,
                            "unsolicited extended_master_secret",
                        ));
                    }
                    self.ems = true;
                    ctx.security_parameters_handshake_mut()?.extended_master_secret = true;
                }
                ExtensionType::SERVER_NAME => {
                    if self.config.server_name.is_none() {
                        return Err(fatal(
                            AlertDescription::UnsupportedExtension,
                            "unsolicited server_name acknowledgement",
                        ));
                    }
                }
                ExtensionType::ALPN => {
                    if self.config.alpn_protocols.is_empty() {
                        return Err(fatal(
                            AlertDescription::UnsupportedExtension,
                            "unsolicited ALPN selection",
                        ));
                    }
                    let selected = extensions::parse_alpn(&extension.data)?;
                    let [protocol] = selected.as_slice() else {
                        return Err(fatal(
                            AlertDescription::DecodeError,
                            "ALPN response must name exactly one protocol",
                        ));
                    };
                    if !self.config.alpn_protocols.contains(protocol) {
                        return Err(fatal(
                            AlertDescription::IllegalParameter,
                            "server selected unoffered ALPN protocol",
                        ));
                    }
                    ctx.security_parameters_handshake_mut()?.application_protocol =
                        Some(protocol.clone());
                }
                ExtensionType::EC_POINT_FORMATS => {
                    extensions::parse_ec_point_formats(&extension.data)?;
                }
                other => {
                    return Err(fatal(
                        AlertDescription::UnsupportedExtension,
                        format!("server reflected unprocessed extension {:#06x}", other.0),
                    ));
                }
            }
        }
        Ok(())
    }

    fn process_certificate(
        &mut self,
        chain: Vec<Vec<u8>>,
        ctx: &mut ConnectionContext,
    ) -> Result<(), TlsError> {
        let suite = self.suite.as_ref().expect("suite fixed by ServerHello");
        if chain.is_empty() {
            return Err(fatal(
                AlertDescription::BadCertificate,
                "server sent an empty certificate chain",
            ));
        }
        let auth_type = suite.kx_alg.auth_type(suite.auth_alg);
        self.data
            .trust_manager
            .check_server_trusted(&chain, auth_type)
            .map_err(|e| fatal(e.alert(), e.reason))?;

        let public_key = self
            .data
            .crypto
            .extract_public_key(&chain[0])
            .map_err(|_| fatal(AlertDescription::UnsupportedCertificate, "unusable server key"))?;

        let end_point = self.end_point_hash(&chain[0]);
        {
            let params = ctx.security_parameters_handshake_mut()?;
            params.peer_certificate = Some(chain);
            params.tls_server_end_point = end_point;
        }
        self.server_public_key = Some(public_key);
        self.state = match suite.kx_alg {
            KeyExchangeAlg::Ecdhe => ClientState::WaitServerKeyExchange,
            KeyExchangeAlg::Rsa => ClientState::WaitServerHelloDone,
        };
        Ok(())
    }

    /// tls-server-end-point (RFC 5929 §4): hash of the end-entity
    /// certificate; SHA-256 covers the MD5/SHA-1 upgrade rule.
    fn end_point_hash(&self, cert: &[u8]) -> Vec<u8> {
        let factory = self.data.crypto.hash_factory(HashAlg::Sha256);
        let mut digest = factory();
        digest.update(cert);
        let mut out = vec![0u8; digest.output_len()];
        digest.finish(&mut out);
        out
    }

    fn process_server_key_exchange(
        &mut self,
        ske: codec::ServerKeyExchange,
    ) -> Result<(), TlsError> {
        let suite = self.suite.as_ref().expect("suite fixed by ServerHello");
        if !self.config.supported_groups.contains(&ske.named_curve) {
            return Err(fatal(
                AlertDescription::IllegalParameter,
                format!("server chose unoffered group {:#06x}", ske.named_curve.0),
            ));
        }

        let algorithm = match ske.signature_scheme {
            Some(scheme) => {
                if !self.config.signature_schemes.contains(&scheme)
                    || !scheme_matches_key(scheme, suite.server_key_type())
                {
                    return Err(fatal(
                        AlertDescription::IllegalParameter,
                        "signature scheme does not fit the negotiated suite",
                    ));
                }
                scheme.algorithm().ok_or_else(|| {
                    fatal(
                        AlertDescription::IllegalParameter,
                        "unsupported signature scheme",
                    )
                })?
            }
            None => legacy_signature_algorithm(suite.server_key_type()),
        };

        let params = codec::build_ske_params(ske.named_curve, &ske.public_key);
        let signed_data =
            codec::build_ske_signed_data(&self.client_random, &self.server_random, &params);
        let public_key = self
            .server_public_key
            .as_ref()
            .expect("certificate processed before ServerKeyExchange");
        self.data
            .crypto
            .verify_signature(algorithm, public_key, &signed_data, &ske.signature)
            .map_err(|_| {
                fatal(
                    AlertDescription::DecryptError,
                    "ServerKeyExchange signature verification failed",
                )
            })?;

        self.server_kx = Some((ske.named_curve, ske.public_key));
        self.state = ClientState::WaitServerHelloDone;
        Ok(())
    }

    fn process_server_hello_done(
        &mut self,
        ctx: &mut ConnectionContext,
        out: &mut HandshakeOutput<'_>,
    ) -> Result<(), TlsError> {
        // Client Certificate, if requested.
        if self.cert_request.is_some() {
            self.send_client_certificate(ctx, out)?;
        }

        // ClientKeyExchange.
        let suite = self.suite.clone().expect("suite fixed by ServerHello");
        let mut premaster = match suite.kx_alg {
            KeyExchangeAlg::Ecdhe => {
                let (group, server_point) =
                    self.server_kx.take().ok_or_else(|| {
                        fatal(
                            AlertDescription::UnexpectedMessage,
                            "missing ServerKeyExchange for ECDHE suite",
                        )
                    })?;
                let agreement = self.data.crypto.start_key_agreement(group)?;
                let cke = encode_client_key_exchange_ecdhe(&agreement.public_key());
                out.send_handshake(&mut self.transcript, &cke)?;
                agreement.agree(&server_point)?
            }
            KeyExchangeAlg::Rsa => {
                let mut premaster = vec![0u8; 48];
                self.data.crypto.random_bytes(&mut premaster[2..])?;
                premaster[..2].copy_from_slice(&self.offered_version.to_wire());
                let public_key = self
                    .server_public_key
                    .as_ref()
                    .expect("certificate processed");
                let encrypted = self
                    .data
                    .crypto
                    .rsa_encrypt_premaster(public_key, &premaster)?;
                let cke = encode_client_key_exchange_rsa(&encrypted);
                out.send_handshake(&mut self.transcript, &cke)?;
                premaster
            }
        };

        // Master secret; the session hash covers through ClientKeyExchange.
        self.master_secret = if self.ems {
            let session_hash =
                self.transcript
                    .finished_hash(&*self.data.crypto, self.version, suite.prf_hash);
            let master = derive_extended_master_secret(
                &*self.data.crypto,
                self.version,
                suite.prf_hash,
                &premaster,
                &session_hash,
            );
            ctx.security_parameters_handshake_mut()?.session_hash = Some(session_hash);
            master
        } else {
            derive_master_secret(
                &*self.data.crypto,
                self.version,
                suite.prf_hash,
                &premaster,
                &self.client_random,
                &self.server_random,
            )
        };
        premaster.zeroize();
        {
            let params = ctx.security_parameters_handshake_mut()?;
            params.master_secret = self.master_secret.clone();
            params.extended_master_secret = self.ems;
        }

        // CertificateVerify proves possession of the client key.
        if self.sent_client_cert {
            if let Some(key) = self.client_key.clone() {
                self.send_certificate_verify(&key, out)?;
            }
        }

        self.derive_pending_keys();
        self.create_handshake_session(ctx)?;
        self.send_change_cipher_spec_and_finished(ctx, out)?;
        self.state = ClientState::WaitChangeCipherSpec;
        Ok(())
    }

    fn send_client_certificate(
        &mut self,
        ctx: &mut ConnectionContext,
        out: &mut HandshakeOutput<'_>,
    ) -> Result<(), TlsError> {
        let request = self.cert_request.as_ref().expect("checked by caller");
        let key_types: Vec<KeyType> = request
            .certificate_types
            .iter()
            .filter_map(|t| match *t {
                codec::CERT_TYPE_RSA_SIGN => Some(KeyType::Rsa),
                codec::CERT_TYPE_ECDSA_SIGN => Some(KeyType::Ec),
                _ => None,
            })
            .collect();
        let issuers = (!request.certificate_authorities.is_empty())
            .then_some(request.certificate_authorities.as_slice());

        let identity = self
            .data
            .key_manager
            .choose_client_alias(&key_types, issuers)
            .and_then(|alias| {
                let key = self.data.key_manager.private_key(&alias)?;
                let chain = self.data.key_manager.certificate_chain(&alias)?;
                Some((key, chain))
            });

        match identity {
            Some((key, chain)) => {
                out.send_handshake(&mut self.transcript, &encode_certificate(&chain))?;
                ctx.security_parameters_handshake_mut()?.local_certificate = Some(chain);
                self.client_key = Some(key);
                self.sent_client_cert = true;
            }
            None => {
                // Declining is only an error when the server requires us.
                out.send_handshake(&mut self.transcript, &encode_certificate(&[]))?;
            }
        }
        Ok(())
    }

    fn send_certificate_verify(
        &mut self,
        key: &Arc<dyn PrivateKey>,
        out: &mut HandshakeOutput<'_>,
    ) -> Result<(), TlsError> {
        let request = self.cert_request.as_ref().expect("client cert was sent");
        let (scheme, algorithm) = if self.version.uses_tls12_prf() {
            let scheme = select_signature_scheme(
                &self.config.signature_schemes,
                &request.signature_schemes,
                key.key_type(),
            )
            .ok_or_else(|| {
                fatal(
                    AlertDescription::HandshakeFailure,
                    "no mutual signature scheme for client authentication",
                )
            })?;
            let algorithm = scheme.algorithm().expect("selected from known schemes");
            (Some(scheme), algorithm)
        } else {
            (None, legacy_signature_algorithm(key.key_type()))
        };

        let signature = key.sign(algorithm, self.transcript.bytes())?;
        let verify = CertificateVerify {
            signature_scheme: scheme,
            signature,
        };
        out.send_handshake(&mut self.transcript, &encode_certificate_verify(&verify))
    }

    fn derive_pending_keys(&mut self) {
        let suite = self.suite.as_ref().expect("suite fixed by ServerHello");
        let (write, read) = direction_keys(
            &*self.data.crypto,
            self.version,
            suite,
            &self.master_secret,
            &self.client_random,
            &self.server_random,
            TlsRole::Client,
        );
        self.pending_write_keys = Some(write);
        self.pending_read_keys = Some(read);
    }

    /// Build the in-progress session and surface it to observers before
    /// Finished validation.
    fn create_handshake_session(&mut self, ctx: &mut ConnectionContext) -> Result<(), TlsError> {
        let suite = self.suite.as_ref().expect("suite fixed by ServerHello");
        let session_id = if self.config.session_creation {
            self.session_id.clone()
        } else {
            Vec::new()
        };
        let params = ctx.security_parameters_handshake_mut()?;
        let session = Arc::new(TlsSession::new(
            session_id,
            self.version,
            suite.suite,
            self.master_secret.clone(),
            params.peer_certificate.clone(),
            params.local_certificate.clone(),
            self.ems,
            self.peer.as_ref().map(|(host, _)| host.clone()),
            self.peer.as_ref().map(|(_, port)| *port),
        ));
        self.notify_handshake_session(Arc::clone(&session));
        self.session = Some(session);
        Ok(())
    }

    fn notify_handshake_session(&self, session: Arc<TlsSession>) {
        if let Some(observer) = &self.data.observer {
            observer.handshake_session(&session);
        }
    }

    fn send_change_cipher_spec_and_finished(
        &mut self,
        ctx: &mut ConnectionContext,
        out: &mut HandshakeOutput<'_>,
    ) -> Result<(), TlsError> {
        let suite = self.suite.as_ref().expect("suite fixed by ServerHello");
        let write_keys = self
            .pending_write_keys
            .take()
            .expect("keys derived before the final flight");
        out.send_change_cipher_spec(&*self.data.crypto, &write_keys, TlsRole::Client)?;

        let handshake_hash =
            self.transcript
                .finished_hash(&*self.data.crypto, self.version, suite.prf_hash);
        let verify_data = compute_verify_data(
            &*self.data.crypto,
            self.version,
            suite.prf_hash,
            &self.master_secret,
            "client finished",
            &handshake_hash,
        );
        out.send_handshake(&mut self.transcript, &encode_finished(&verify_data))?;

        let params = ctx.security_parameters_handshake_mut()?;
        params.local_verify_data = verify_data.clone();
        if params.tls_unique.is_empty() {
            // First Finished of the handshake: ours on the full path.
            params.tls_unique = verify_data;
        }
        Ok(())
    }

    /// Inbound ChangeCipherSpec: hand the pending read keys to the record
    /// layer.
    pub fn handle_change_cipher_spec(&mut self) -> Result<CipherKeys, TlsError> {
        if self.state != ClientState::WaitChangeCipherSpec {
            return Err(fatal(
                AlertDescription::UnexpectedMessage,
                format!("ChangeCipherSpec in state {:?}", self.state),
            ));
        }
        let keys = self.pending_read_keys.take().ok_or_else(|| {
            fatal(AlertDescription::InternalError, "read keys not derived")
        })?;
        self.state = ClientState::WaitFinished;
        Ok(keys)
    }

    fn process_server_finished(
        &mut self,
        verify_data: &[u8],
        raw: &[u8],
        ctx: &mut ConnectionContext,
        out: &mut HandshakeOutput<'_>,
    ) -> Result<Option<HandshakeResult>, TlsError> {
        let suite = self.suite.as_ref().expect("suite fixed by ServerHello");
        let handshake_hash =
            self.transcript
                .finished_hash(&*self.data.crypto, self.version, suite.prf_hash);
        let expected = compute_verify_data(
            &*self.data.crypto,
            self.version,
            suite.prf_hash,
            &self.master_secret,
            "server finished",
            &handshake_hash,
        );
        if expected.ct_eq(verify_data).unwrap_u8() != 1 {
            return Err(fatal(
                AlertDescription::DecryptError,
                "server Finished verification failed",
            ));
        }
        self.transcript.update(raw);
        {
            let params = ctx.security_parameters_handshake_mut()?;
            params.peer_verify_data = verify_data.to_vec();
            if params.tls_unique.is_empty() {
                // Abbreviated handshake: the server's Finished came first.
                params.tls_unique = verify_data.to_vec();
            }
        }

        if self.resumed {
            // Our flight answers the server's on the short path.
            self.create_resumed_session_params(ctx)?;
            self.send_change_cipher_spec_and_finished(ctx, out)?;
        }

        self.state = ClientState::Complete;
        let session = self.session.take().expect("session created before Finished");
        let publish_session =
            !self.resumed && self.config.session_creation && !session.id().is_empty();
        Ok(Some(HandshakeResult {
            session,
            resumed: self.resumed,
            publish_session,
        }))
    }

    /// On resumption the session object already exists; only the freshly
    /// negotiated per-connection values need recording.
    fn create_resumed_session_params(
        &mut self,
        ctx: &mut ConnectionContext,
    ) -> Result<(), TlsError> {
        let session = self.session.as_ref().expect("resumed session present");
        let params = ctx.security_parameters_handshake_mut()?;
        params.local_certificate = session.local_certificate().map(|c| c.to_vec());
        Ok(())
    }
}
