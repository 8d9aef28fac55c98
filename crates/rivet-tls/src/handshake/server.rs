//! Server handshake state machine.
//!
//! The negotiated version is the lower of the two maxima intersected with
//! both enabled sets; the suite is the server's first preference the
//! client also offers that is usable given the available server key, the
//! peer's signature algorithms, and the group intersection. Resumption by
//! session ID takes the short path.

use std::sync::Arc;

use subtle::ConstantTimeEq;
use zeroize::Zeroize;

use crate::config::{ContextData, TlsConfig};
use crate::crypt::key_schedule::{
    compute_verify_data, derive_extended_master_secret, derive_master_secret,
};
use crate::crypt::transcript::Transcript;
use crate::crypt::{CipherSuiteParams, KeyExchangeAlg, NamedGroup, SignatureScheme};
use crate::handshake::codec::{
    self, encode_certificate, encode_certificate_request, encode_finished,
    encode_server_hello, encode_server_hello_done, encode_server_key_exchange,
    CertificateRequest, ClientHello, ServerHello, ServerKeyExchange,
};
use crate::handshake::extensions::{self, Extension, ExtensionType};
use crate::handshake::{
    default_peer_schemes, direction_keys, legacy_signature_algorithm, select_signature_scheme,
    HandshakeMessage, HandshakeOutput, HandshakeResult, HandshakeType, ServerState,
};
use crate::params::ConnectionContext;
use crate::provider::{KeyAgreement, KeyType, PrivateKey, PublicKey};
use crate::record::cipher::CipherKeys;
use crate::session::TlsSession;
use crate::version::ProtocolVersion;
use crate::{CipherSuite, TlsRole};
use rivet_types::{AlertDescription, HashAlg, TlsError};

fn fatal(alert: AlertDescription, reason: impl Into<String>) -> TlsError {
    TlsError::fatal(alert, reason)
}

/// What the ClientHello offered, after extension processing.
struct ClientOffer {
    client_version: ProtocolVersion,
    suites: Vec<CipherSuite>,
    groups: Vec<NamedGroup>,
    signature_schemes: Vec<SignatureScheme>,
    alpn_protocols: Vec<Vec<u8>>,
    server_name: Option<String>,
    ems: bool,
    secure_renegotiation: bool,
    ec_point_formats: bool,
}

pub(crate) struct ServerHandshake {
    state: ServerState,
    config: TlsConfig,
    data: Arc<ContextData>,

    transcript: Transcript,
    version: ProtocolVersion,
    suite: Option<CipherSuiteParams>,
    client_random: [u8; 32],
    server_random: [u8; 32],
    ems: bool,
    client_offered_version: ProtocolVersion,

    resumed: bool,
    session_id: Vec<u8>,
    session: Option<Arc<TlsSession>>,

    server_key: Option<Arc<dyn PrivateKey>>,
    key_agreement: Option<Box<dyn KeyAgreement>>,
    client_cert_chain: Vec<Vec<u8>>,
    client_public_key: Option<PublicKey>,
    requested_client_auth: bool,

    master_secret: Vec<u8>,
    pending_read_keys: Option<CipherKeys>,
    pending_write_keys: Option<CipherKeys>,
}

impl Drop for ServerHandshake {
    fn drop(&mut self) {
        self.master_secret.zeroize();
    }
}

impl ServerHandshake {
    pub fn new(config: TlsConfig, data: Arc<ContextData>) -> Self {
        Self {
            state: ServerState::Init,
            config,
            data,
            transcript: Transcript::new(),
            version: ProtocolVersion::TLS12,
            suite: None,
            client_random: [0; 32],
            server_random: [0; 32],
            ems: false,
            client_offered_version: ProtocolVersion::TLS12,
            resumed: false,
            session_id: Vec::new(),
            session: None,
            server_key: None,
            key_agreement: None,
            client_cert_chain: Vec::new(),
            client_public_key: None,
            requested_client_auth: false,
            master_secret: Vec::new(),
            pending_read_keys: None,
            pending_write_keys: None,
        }
    }

    pub fn handshake_session(&self) -> Option<&Arc<TlsSession>> {
        self.session.as_ref()
    }

    /// The server speaks second: starting only arms the state machine.
    pub fn start(&mut self, _ctx: &mut ConnectionContext) -> Result<(), TlsError> {
        self.config.validate()?;
        self.state = ServerState::WaitClientHello;
        Ok(())
    }

    pub fn handle_message(
        &mut self,
        msg: HandshakeMessage,
        ctx: &mut ConnectionContext,
        out: &mut HandshakeOutput<'_>,
    ) -> Result<Option<HandshakeResult>, TlsError> {
        match (self.state, msg.msg_type) {
            (ServerState::WaitClientHello, HandshakeType::ClientHello) => {
                self.transcript.update(&msg.raw);
                let hello = codec::decode_client_hello(&msg.body)?;
                self.process_client_hello(hello, ctx, out)?;
                Ok(None)
            }
            (ServerState::WaitClientCertificate, HandshakeType::Certificate) => {
                self.transcript.update(&msg.raw);
                let chain = codec::decode_certificate(&msg.body)?;
                self.process_client_certificate(chain, ctx)?;
                Ok(None)
            }
            (ServerState::WaitClientKeyExchange, HandshakeType::ClientKeyExchange) => {
                self.transcript.update(&msg.raw);
                self.process_client_key_exchange(&msg.body, ctx)?;
                Ok(None)
            }
            (ServerState::WaitCertificateVerify, HandshakeType::CertificateVerify) => {
                // The signature covers every message before this one.
                let verify = codec::decode_certificate_verify(&msg.body, self.version)?;
                self.process_certificate_verify(verify)?;
                self.transcript.update(&msg.raw);
                self.state = ServerState::WaitChangeCipherSpec;
                Ok(None)
            }
            (ServerState::WaitFinished, HandshakeType::Finished) => {
                let verify_data = codec::decode_finished(&msg.body)?;
                self.process_client_finished(&verify_data, &msg.raw, ctx, out)
            }
            (_, other) => Err(fatal(
                AlertDescription::UnexpectedMessage,
                format!("unexpected {other:?} in state {:?}", self.state),
            )),
        }
    }

    // -- ClientHello --------------------------------------------------------

    fn process_client_hello(
        &mut self,
        hello: ClientHello,
        ctx: &mut ConnectionContext,
        out: &mut HandshakeOutput<'_>,
    ) -> Result<(), TlsError> {
        if !hello.compression_methods.contains(&0) {
            return Err(fatal(
                AlertDescription::HandshakeFailure,
                "client does not offer null compression",
            ));
        }
        let offer = self.parse_offer(&hello)?;

        // Version: lower of the two maxima, within our enabled set.
        let our_max = self
            .config
            .max_version()
            .ok_or_else(|| TlsError::Config("no protocol versions enabled".into()))?;
        let version = offer.client_version.min(our_max);
        if !self.config.enabled_versions.contains(&version) {
            return Err(fatal(
                AlertDescription::ProtocolVersion,
                format!("no mutually enabled version at or below {version}"),
            ));
        }

        self.client_offered_version = offer.client_version;
        self.client_random = hello.random;
        self.data.crypto.random_bytes(&mut self.server_random)?;

        {
            let params = ctx.security_parameters_handshake_mut()?;
            params.client_random = Some(hello.random);
            params.server_random = Some(self.server_random);
            params.secure_renegotiation = offer.secure_renegotiation;
        }

        // Resumption by session ID.
        if let Some(session) = self.lookup_resumable(&hello, &offer, version) {
            return self.resume_session(session, &offer, ctx, out);
        }

        // Fresh session: pick a suite, build the full first flight.
        let (suite, alias, key) = self.select_suite(&offer, version)?;
        self.version = version;
        out.record.set_negotiated_version(version);
        self.ems = offer.ems && self.config.extended_master_secret;

        self.session_id = if self.config.session_creation {
            let mut id = vec![0u8; 32];
            self.data.crypto.random_bytes(&mut id)?;
            id
        } else {
            Vec::new()
        };

        let alpn = self.select_alpn(&offer)?;
        {
            let params = ctx.security_parameters_handshake_mut()?;
            params.negotiated_version = Some(version);
            params.cipher_suite = Some(suite.suite);
            params.prf_hash = Some(suite.prf_hash);
            params.extended_master_secret = self.ems;
            params.application_protocol = alpn.clone();
        }

        let server_hello = ServerHello {
            server_version: version,
            random: self.server_random,
            session_id: self.session_id.clone(),
            cipher_suite: suite.suite,
            compression_method: 0,
            extensions: self.reflected_extensions(&offer, &suite, alpn.as_deref()),
        };
        out.send_handshake(&mut self.transcript, &encode_server_hello(&server_hello))?;

        // Certificate.
        let chain = self
            .data
            .key_manager
            .certificate_chain(&alias)
            .ok_or_else(|| {
                fatal(
                    AlertDescription::InternalError,
                    "key manager lost the selected identity",
                )
            })?;
        out.send_handshake(&mut self.transcript, &encode_certificate(&chain))?;
        {
            let params = ctx.security_parameters_handshake_mut()?;
            params.tls_server_end_point = self.end_point_hash(&chain[0]);
            params.local_certificate = Some(chain);
        }

        // ServerKeyExchange for ECDHE.
        if suite.kx_alg == KeyExchangeAlg::Ecdhe {
            self.send_server_key_exchange(&suite, &offer, &key, out)?;
        }

        // CertificateRequest.
        if self.config.want_client_auth {
            let request = CertificateRequest {
                certificate_types: vec![codec::CERT_TYPE_RSA_SIGN, codec::CERT_TYPE_ECDSA_SIGN],
                signature_schemes: self.config.signature_schemes.clone(),
                certificate_authorities: Vec::new(),
            };
            out.send_handshake(
                &mut self.transcript,
                &encode_certificate_request(&request, self.version),
            )?;
            self.requested_client_auth = true;
        }

        out.send_handshake(&mut self.transcript, &encode_server_hello_done())?;

        self.suite = Some(suite);
        self.server_key = Some(key);
        self.state = if self.requested_client_auth {
            ServerState::WaitClientCertificate
        } else {
            ServerState::WaitClientKeyExchange
        };
        Ok(())
    }

    fn parse_offer(&self, hello: &ClientHello) -> Result<ClientOffer, TlsError> {
        let mut offer = ClientOffer {
            client_version: hello.client_version,
            suites: hello.cipher_suites.clone(),
            groups: Vec::new(),
            signature_schemes: Vec::new(),
            alpn_protocols: Vec::new(),
            server_name: None,
            ems: false,
            secure_renegotiation: false,
            ec_point_formats: false,
        };

        for extension in &hello.extensions {
            match extension.extension_type {
                ExtensionType::SERVER_NAME => {
                    offer.server_name = extensions::parse_server_name(&extension.data)?;
                }
                ExtensionType::SUPPORTED_GROUPS => {
                    offer.groups = extensions::parse_supported_groups(&extension.data)?;
                }
                ExtensionType::EC_POINT_FORMATS => {
                    extensions::parse_ec_point_formats(&extension.data)?;
                    offer.ec_point_formats = true;
                }
                ExtensionType::SIGNATURE_ALGORITHMS => {
                    offer.signature_schemes =
                        extensions::parse_signature_algorithms(&extension.data)?;
                }
                ExtensionType::ALPN => {
                    offer.alpn_protocols = extensions::parse_alpn(&extension.data)?;
                }
                ExtensionType::EXTENDED_MASTER_SECRET => {
                    if !extension.data.is_empty() {
                        return Err(fatal(
                            AlertDescription::DecodeError,
                            "extended_master_secret carries data",
                        ));
                    }
                    offer.ems = true;
                }
                ExtensionType::RENEGOTIATION_INFO => {
                    let payload = extensions::parse_renegotiation_info(&extension.data)?;
                    if !payload.is_empty() {
                        return Err(fatal(
                            AlertDescription::HandshakeFailure,
                            "non-empty renegotiation_info on initial handshake",
                        ));
                    }
                    offer.secure_renegotiation = true;
                }
                // Unknown extensions are carried but not processed.
                _ => {}
            }
        }

        if hello
            .cipher_suites
            .contains(&CipherSuite::TLS_EMPTY_RENEGOTIATION_INFO_SCSV)
        {
            offer.secure_renegotiation = true;
        }
        Ok(offer)
    }

    fn lookup_resumable(
        &self,
        hello: &ClientHello,
        offer: &ClientOffer,
        version: ProtocolVersion,
    ) -> Option<Arc<TlsSession>> {
        if hello.session_id.is_empty() {
            return None;
        }
        let session = self.data.sessions.get(&hello.session_id)?;
        let acceptable = session.is_resumable()
            && session.version() == version
            && offer.suites.contains(&session.cipher_suite())
            && self.config.cipher_suites.contains(&session.cipher_suite())
            && session.extended_master_secret() == (offer.ems && self.config.extended_master_secret);
        acceptable.then_some(session)
    }

    /// Abbreviated handshake: echo the ID and send our CCS/Finished first.
    fn resume_session(
        &mut self,
        session: Arc<TlsSession>,
        offer: &ClientOffer,
        ctx: &mut ConnectionContext,
        out: &mut HandshakeOutput<'_>,
    ) -> Result<(), TlsError> {
        let suite = CipherSuiteParams::from_suite(session.cipher_suite())?;
        self.version = session.version();
        out.record.set_negotiated_version(self.version);
        self.ems = session.extended_master_secret();
        self.resumed = true;
        self.session_id = session.id().to_vec();
        self.master_secret = session.master_secret().to_vec();

        let alpn = self.select_alpn(offer)?;
        let end_point = session
            .local_certificate()
            .and_then(|c| c.first())
            .map(|cert| self.end_point_hash(cert));
        {
            let params = ctx.security_parameters_handshake_mut()?;
            params.negotiated_version = Some(self.version);
            params.cipher_suite = Some(session.cipher_suite());
            params.prf_hash = Some(suite.prf_hash);
            params.extended_master_secret = self.ems;
            params.master_secret = session.master_secret().to_vec();
            params.peer_certificate = session.peer_certificate().map(|c| c.to_vec());
            params.local_certificate = session.local_certificate().map(|c| c.to_vec());
            params.application_protocol = alpn.clone();
            params.tls_server_end_point = end_point.unwrap_or_default();
        }

        let server_hello = ServerHello {
            server_version: self.version,
            random: self.server_random,
            session_id: self.session_id.clone(),
            cipher_suite: session.cipher_suite(),
            compression_method: 0,
            extensions: self.reflected_extensions(offer, &suite, alpn.as_deref()),
        };
        out.send_handshake(&mut self.transcript, &encode_server_hello(&server_hello))?;

        let (write, read) = direction_keys(
            &*self.data.crypto,
            self.version,
            &suite,
            &self.master_secret,
            &self.client_random,
            &self.server_random,
            TlsRole::Server,
        );
        self.pending_read_keys = Some(read);
        out.send_change_cipher_spec(&*self.data.crypto, &write, TlsRole::Server)?;

        let handshake_hash =
            self.transcript
                .finished_hash(&*self.data.crypto, self.version, suite.prf_hash);
        let verify_data = compute_verify_data(
            &*self.data.crypto,
            self.version,
            suite.prf_hash,
            &self.master_secret,
            "server finished",
            &handshake_hash,
        );
        out.send_handshake(&mut self.transcript, &encode_finished(&verify_data))?;
        {
            let params = ctx.security_parameters_handshake_mut()?;
            params.local_verify_data = verify_data.clone();
            // The first Finished of an abbreviated handshake is ours.
            params.tls_unique = verify_data;
        }

        self.notify_handshake_session(&session);
        self.suite = Some(suite);
        self.session = Some(session);
        self.state = ServerState::WaitChangeCipherSpec;
        Ok(())
    }

    /// First mutually enabled suite that is usable: defined at the version,
    /// backed by a server key of the right type, with a satisfiable
    /// signature algorithm and (for ECDHE) a mutual group.
    fn select_suite(
        &self,
        offer: &ClientOffer,
        version: ProtocolVersion,
    ) -> Result<(CipherSuiteParams, String, Arc<dyn PrivateKey>), TlsError> {
        let peer_schemes = if offer.signature_schemes.is_empty() {
            default_peer_schemes()
        } else {
            offer.signature_schemes.clone()
        };

        for suite_id in &self.config.cipher_suites {
            if !offer.suites.contains(suite_id) {
                continue;
            }
            let Ok(suite) = CipherSuiteParams::from_suite(*suite_id) else {
                continue;
            };
            if !suite.usable_at(version) {
                continue;
            }
            if suite.kx_alg == KeyExchangeAlg::Ecdhe {
                let has_group = self
                    .config
                    .supported_groups
                    .iter()
                    .any(|group| offer.groups.contains(group));
                if !has_group {
                    continue;
                }
                // The SKE signature must be acceptable to the peer.
                if version.uses_tls12_prf()
                    && select_signature_scheme(
                        &self.config.signature_schemes,
                        &peer_schemes,
                        suite.server_key_type(),
                    )
                    .is_none()
                {
                    continue;
                }
            }
            let key_type = suite.server_key_type();
            let Some(alias) = self.data.key_manager.choose_server_alias(key_type, None) else {
                continue;
            };
            let Some(key) = self.data.key_manager.private_key(&alias) else {
                continue;
            };
            if key.key_type() != key_type {
                continue;
            }
            return Ok((suite, alias, key));
        }
        Err(fatal(
            AlertDescription::HandshakeFailure,
            "no mutually usable cipher suite",
        ))
    }

    /// Server-preference ALPN selection. A mutual miss when both sides
    /// speak ALPN is fatal.
    fn select_alpn(&self, offer: &ClientOffer) -> Result<Option<Vec<u8>>, TlsError> {
        if self.config.alpn_protocols.is_empty() || offer.alpn_protocols.is_empty() {
            return Ok(None);
        }
        for protocol in &self.config.alpn_protocols {
            if offer.alpn_protocols.contains(protocol) {
                return Ok(Some(protocol.clone()));
            }
        }
        Err(fatal(
            AlertDescription::NoApplicationProtocol,
            "no mutual ALPN protocol",
        ))
    }

    /// Only extensions the server processed are reflected.
    fn reflected_extensions(
        &self,
        offer: &ClientOffer,
        suite: &CipherSuiteParams,
        alpn: Option<&[u8]>,
    ) -> Vec<Extension> {
        let mut reflected = Vec::new();
        if offer.secure_renegotiation {
            reflected.push(extensions::renegotiation_info(&[]));
        }
        if offer.server_name.is_some() {
            reflected.push(extensions::server_name_ack());
        }
        if self.ems {
            reflected.push(extensions::extended_master_secret());
        }
        if let Some(protocol) = alpn {
            reflected.push(extensions::alpn(&[protocol.to_vec()]));
        }
        if offer.ec_point_formats && suite.kx_alg == KeyExchangeAlg::Ecdhe {
            reflected.push(extensions::ec_point_formats());
        }
        reflected
    }

    fn end_point_hash(&self, cert: &[u8]) -> Vec<u8> {
        let factory = self.data.crypto.hash_factory(HashAlg::Sha256);
        let mut digest = factory();
        digest.update(cert);
        let mut out = vec![0u8; digest.output_len()];
        digest.finish(&mut out);
        out
    }

    fn send_server_key_exchange(
        &mut self,
        suite: &CipherSuiteParams,
        offer: &ClientOffer,
        key: &Arc<dyn PrivateKey>,
        out: &mut HandshakeOutput<'_>,
    ) -> Result<(), TlsError> {
        let group = self
            .config
            .supported_groups
            .iter()
            .copied()
            .find(|group| offer.groups.contains(group))
            .expect("suite selection checked the intersection");

        let agreement = self.data.crypto.start_key_agreement(group)?;
        let public_key = agreement.public_key();
        let params = codec::build_ske_params(group, &public_key);
        let signed_data =
            codec::build_ske_signed_data(&self.client_random, &self.server_random, &params);

        let (scheme, algorithm) = if self.version.uses_tls12_prf() {
            let peer_schemes = if offer.signature_schemes.is_empty() {
                default_peer_schemes()
            } else {
                offer.signature_schemes.clone()
            };
            let scheme = select_signature_scheme(
                &self.config.signature_schemes,
                &peer_schemes,
                suite.server_key_type(),
            )
            .expect("suite selection checked scheme availability");
            (
                Some(scheme),
                scheme.algorithm().expect("selected from known schemes"),
            )
        } else {
            (None, legacy_signature_algorithm(suite.server_key_type()))
        };

        let signature = key.sign(algorithm, &signed_data)?;
        let ske = ServerKeyExchange {
            named_curve: group,
            public_key,
            signature_scheme: scheme,
            signature,
        };
        out.send_handshake(&mut self.transcript, &encode_server_key_exchange(&ske))?;
        self.key_agreement = Some(agreement);
        Ok(())
    }

    // -- client flight ------------------------------------------------------

    fn process_client_certificate(
        &mut self,
        chain: Vec<Vec<u8>>,
        ctx: &mut ConnectionContext,
    ) -> Result<(), TlsError> {
        if chain.is_empty() {
            if self.config.need_client_auth {
                return Err(fatal(
                    AlertDescription::BadCertificate,
                    "client certificate required but absent",
                ));
            }
            // Anonymous client under want_client_auth.
            self.state = ServerState::WaitClientKeyExchange;
            return Ok(());
        }

        let public_key = self
            .data
            .crypto
            .extract_public_key(&chain[0])
            .map_err(|_| fatal(AlertDescription::UnsupportedCertificate, "unusable client key"))?;
        let key_type = match public_key {
            PublicKey::Rsa { .. } => KeyType::Rsa,
            PublicKey::Ec { .. } => KeyType::Ec,
        };
        self.data
            .trust_manager
            .check_client_trusted(&chain, key_type.name())
            .map_err(|e| fatal(e.alert(), e.reason))?;

        ctx.security_parameters_handshake_mut()?.peer_certificate = Some(chain.clone());
        self.client_public_key = Some(public_key);
        self.client_cert_chain = chain;
        self.state = ServerState::WaitClientKeyExchange;
        Ok(())
    }

    fn process_client_key_exchange(
        &mut self,
        body: &[u8],
        ctx: &mut ConnectionContext,
    ) -> Result<(), TlsError> {
        let suite = self.suite.clone().expect("suite fixed by ClientHello");
        let mut premaster = match suite.kx_alg {
            KeyExchangeAlg::Ecdhe => {
                let point = codec::decode_client_key_exchange_ecdhe(body)?;
                let agreement = self.key_agreement.take().ok_or_else(|| {
                    fatal(AlertDescription::InternalError, "key agreement not started")
                })?;
                agreement.agree(&point).map_err(|_| {
                    fatal(AlertDescription::HandshakeFailure, "bad client ECDH public")
                })?
            }
            KeyExchangeAlg::Rsa => self.decrypt_rsa_premaster(body)?,
        };

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
        ctx.security_parameters_handshake_mut()?.master_secret = self.master_secret.clone();

        let (write, read) = direction_keys(
            &*self.data.crypto,
            self.version,
            &suite,
            &self.master_secret,
            &self.client_random,
            &self.server_random,
            TlsRole::Server,
        );
        self.pending_write_keys = Some(write);
        self.pending_read_keys = Some(read);

        self.create_handshake_session(ctx)?;

        self.state = if self.client_cert_chain.is_empty() {
            ServerState::WaitChangeCipherSpec
        } else {
            ServerState::WaitCertificateVerify
        };
        Ok(())
    }

    /// RFC 5246 §7.4.7.1: on any decryption or format failure, continue
    /// with a random premaster so padding oracles learn nothing.
    fn decrypt_rsa_premaster(&mut self, body: &[u8]) -> Result<Vec<u8>, TlsError> {
        let encrypted = codec::decode_client_key_exchange_rsa(body)?;
        let key = self
            .server_key
            .as_ref()
            .expect("server key selected with the suite");

        let mut random_premaster = vec![0u8; 48];
        self.data.crypto.random_bytes(&mut random_premaster[2..])?;
        random_premaster[..2].copy_from_slice(&self.client_offered_version.to_wire());

        let premaster = match key.decrypt_premaster(&encrypted) {
            Ok(mut decrypted) => {
                let version_ok = decrypted.len() == 48
                    && decrypted[..2] == self.client_offered_version.to_wire();
                if version_ok {
                    decrypted
                } else {
                    decrypted.zeroize();
                    random_premaster
                }
            }
            Err(_) => random_premaster,
        };
        Ok(premaster)
    }

    fn process_certificate_verify(
        &mut self,
        verify: codec::CertificateVerify,
    ) -> Result<(), TlsError> {
        let algorithm = match verify.signature_scheme {
            Some(scheme) => {
                let key_type = match self.client_public_key {
                    Some(PublicKey::Rsa { .. }) => KeyType::Rsa,
                    Some(PublicKey::Ec { .. }) => KeyType::Ec,
                    None => {
                        return Err(fatal(
                            AlertDescription::InternalError,
                            "CertificateVerify without a client certificate",
                        ))
                    }
                };
                if !self.config.signature_schemes.contains(&scheme)
                    || !crate::handshake::scheme_matches_key(scheme, key_type)
                {
                    return Err(fatal(
                        AlertDescription::IllegalParameter,
                        "CertificateVerify scheme not acceptable",
                    ));
                }
                scheme.algorithm().ok_or_else(|| {
                    fatal(AlertDescription::IllegalParameter, "unsupported scheme")
                })?
            }
            None => {
                let key_type = match self.client_public_key {
                    Some(PublicKey::Rsa { .. }) => KeyType::Rsa,
                    Some(PublicKey::Ec { .. }) => KeyType::Ec,
                    None => {
                        return Err(fatal(
                            AlertDescription::InternalError,
                            "CertificateVerify without a client certificate",
                        ))
                    }
                };
                legacy_signature_algorithm(key_type)
            }
        };

        let public_key = self
            .client_public_key
            .as_ref()
            .expect("checked above");
        self.data
            .crypto
            .verify_signature(
                algorithm,
                public_key,
                self.transcript.bytes(),
                &verify.signature,
            )
            .map_err(|_| {
                fatal(
                    AlertDescription::DecryptError,
                    "CertificateVerify signature verification failed",
                )
            })
    }

    fn create_handshake_session(&mut self, ctx: &mut ConnectionContext) -> Result<(), TlsError> {
        let suite = self.suite.as_ref().expect("suite fixed by ClientHello");
        let params = ctx.security_parameters_handshake_mut()?;
        let session = Arc::new(TlsSession::new(
            self.session_id.clone(),
            self.version,
            suite.suite,
            self.master_secret.clone(),
            params.peer_certificate.clone(),
            params.local_certificate.clone(),
            self.ems,
            None,
            None,
        ));
        self.notify_handshake_session(&session);
        self.session = Some(session);
        Ok(())
    }

    fn notify_handshake_session(&self, session: &Arc<TlsSession>) {
        if let Some(observer) = &self.data.observer {
            observer.handshake_session(session);
        }
    }

    pub fn handle_change_cipher_spec(&mut self) -> Result<CipherKeys, TlsError> {
        if self.state != ServerState::WaitChangeCipherSpec {
            return Err(fatal(
                AlertDescription::UnexpectedMessage,
                format!("ChangeCipherSpec in state {:?}", self.state),
            ));
        }
        let keys = self.pending_read_keys.take().ok_or_else(|| {
            fatal(AlertDescription::InternalError, "read keys not derived")
        })?;
        self.state = ServerState::WaitFinished;
        Ok(keys)
    }

    fn process_client_finished(
        &mut self,
        verify_data: &[u8],
        raw: &[u8],
        ctx: &mut ConnectionContext,
        out: &mut HandshakeOutput<'_>,
    ) -> Result<Option<HandshakeResult>, TlsError> {
        let suite = self.suite.as_ref().expect("suite fixed by ClientHello");
        let prf_hash = suite.prf_hash;
        let handshake_hash =
            self.transcript
                .finished_hash(&*self.data.crypto, self.version, prf_hash);
        let expected = compute_verify_data(
            &*self.data.crypto,
            self.version,
            prf_hash,
            &self.master_secret,
            "client finished",
            &handshake_hash,
        );
        if expected.ct_eq(verify_data).unwrap_u8() != 1 {
            return Err(fatal(
                AlertDescription::DecryptError,
                "client Finished verification failed",
            ));
        }
        self.transcript.update(raw);
        {
            let params = ctx.security_parameters_handshake_mut()?;
            params.peer_verify_data = verify_data.to_vec();
            if params.tls_unique.is_empty() {
                // Full handshake: the client's Finished came first.
                params.tls_unique = verify_data.to_vec();
            }
        }

        if !self.resumed {
            // Answer with our ChangeCipherSpec and Finished.
            let write_keys = self
                .pending_write_keys
                .take()
                .expect("keys derived at ClientKeyExchange");
            out.send_change_cipher_spec(&*self.data.crypto, &write_keys, TlsRole::Server)?;

            let handshake_hash =
                self.transcript
                    .finished_hash(&*self.data.crypto, self.version, prf_hash);
            let our_verify = compute_verify_data(
                &*self.data.crypto,
                self.version,
                prf_hash,
                &self.master_secret,
                "server finished",
                &handshake_hash,
            );
            out.send_handshake(&mut self.transcript, &encode_finished(&our_verify))?;
            ctx.security_parameters_handshake_mut()?.local_verify_data = our_verify;
        }

        self.state = ServerState::Complete;
        let session = self.session.take().expect("session created before Finished");
        let publish_session =
            !self.resumed && self.config.session_creation && !session.id().is_empty();
        Ok(Some(HandshakeResult {
            session,
            resumed: self.resumed,
            publish_session,
        }))
    }
}

#[cfg(all(test, feature = "rustcrypto-provider"))]
mod tests {
    use super::*;

    fn offer(suites: &[CipherSuite]) -> ClientOffer {
        ClientOffer {
            client_version: ProtocolVersion::TLS12,
            suites: suites.to_vec(),
            groups: vec![NamedGroup::X25519],
            signature_schemes: vec![
                SignatureScheme::ECDSA_SECP256R1_SHA256,
                SignatureScheme::RSA_PKCS1_SHA256,
            ],
            alpn_protocols: Vec::new(),
            server_name: None,
            ems: true,
            secure_renegotiation: true,
            ec_point_formats: true,
        }
    }

    fn server_with_alpn(protocols: &[&[u8]]) -> ServerHandshake {
        use crate::provider::rustcrypto::RustCryptoProvider;
        use crate::provider::{KeyManager, TrustError, TrustManager};

        struct NoKeys;
        impl KeyManager for NoKeys {
            fn choose_client_alias(
                &self,
                _key_types: &[KeyType],
                _issuers: Option<&[Vec<u8>]>,
            ) -> Option<String> {
                None
            }
            fn choose_server_alias(
                &self,
                _key_type: KeyType,
                _issuers: Option<&[Vec<u8>]>,
            ) -> Option<String> {
                None
            }
            fn private_key(&self, _alias: &str) -> Option<Arc<dyn PrivateKey>> {
                None
            }
            fn certificate_chain(&self, _alias: &str) -> Option<Vec<Vec<u8>>> {
                None
            }
        }
        struct TrustAll;
        impl TrustManager for TrustAll {
            fn check_client_trusted(
                &self,
                _chain: &[Vec<u8>],
                _auth_type: &str,
            ) -> Result<(), TrustError> {
                Ok(())
            }
            fn check_server_trusted(
                &self,
                _chain: &[Vec<u8>],
                _auth_type: &str,
            ) -> Result<(), TrustError> {
                Ok(())
            }
        }

        let data = Arc::new(ContextData::new(
            Arc::new(RustCryptoProvider::new()),
            Arc::new(NoKeys),
            Arc::new(TrustAll),
        ));
        let config = TlsConfig::builder()
            .alpn(protocols)
            .build();
        ServerHandshake::new(config, data)
    }

    #[test]
    fn test_alpn_server_preference() {
        let server = server_with_alpn(&[b"h2", b"http/1.1"]);
        let mut client_offer = offer(&[CipherSuite::TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256]);
        client_offer.alpn_protocols = vec![b"http/1.1".to_vec(), b"h2".to_vec()];
        let selected = server.select_alpn(&client_offer).unwrap();
        assert_eq!(selected.as_deref(), Some(&b"h2"[..]));
    }

    #[test]
    fn test_alpn_mutual_miss_is_fatal() {
        let server = server_with_alpn(&[b"h2"]);
        let mut client_offer = offer(&[CipherSuite::TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256]);
        client_offer.alpn_protocols = vec![b"spdy/3".to_vec()];
        let err = server.select_alpn(&client_offer).unwrap_err();
        assert_eq!(
            err.alert(),
            Some(AlertDescription::NoApplicationProtocol)
        );
    }

    #[test]
    fn test_alpn_absent_on_either_side_is_none() {
        let server = server_with_alpn(&[]);
        let mut client_offer = offer(&[CipherSuite::TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256]);
        client_offer.alpn_protocols = vec![b"h2".to_vec()];
        assert!(server.select_alpn(&client_offer).unwrap().is_none());

        let server = server_with_alpn(&[b"h2"]);
        let mut client_offer = offer(&[CipherSuite::TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256]);
        client_offer.alpn_protocols = Vec::new();
        assert!(server.select_alpn(&client_offer).unwrap().is_none());
    }

    #[test]
    fn test_suite_selection_fails_without_server_key() {
        let server = server_with_alpn(&[]);
        let client_offer = offer(&[CipherSuite::TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256]);
        // No identity in the key manager: nothing is usable.
        let err = server
            .select_suite(&client_offer, ProtocolVersion::TLS12)
            .unwrap_err();
        assert_eq!(err.alert(), Some(AlertDescription::HandshakeFailure));
    }
}
