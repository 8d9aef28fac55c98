//! The connection core: one record in, state advanced, bytes out.
//!
//! `Protocol` owns the record layer, the role's handshake machine, the
//! decrypted application-data buffer, and the pending network output. It
//! does no I/O and never blocks; the engine façade feeds it whole records
//! and drains its buffers.

use std::sync::Arc;

use crate::alert::Alert;
use crate::config::{ContextData, TlsConfig};
use crate::handshake::client::ClientHandshake;
use crate::handshake::server::ServerHandshake;
use crate::handshake::{HandshakeOutput, HandshakeResult, HandshakeReassembly};
use crate::params::ConnectionContext;
use crate::record::{ContentType, RecordCipher, RecordLayer, HEADER_LEN, MAX_PLAINTEXT_LEN};
use crate::session::TlsSession;
use crate::TlsRole;
use rivet_types::{AlertDescription, AlertLevel, TlsError};

enum Handshaker {
    Client(Box<ClientHandshake>),
    Server(Box<ServerHandshake>),
}

impl Handshaker {
    fn handshake_session(&self) -> Option<&Arc<TlsSession>> {
        match self {
            Handshaker::Client(h) => h.handshake_session(),
            Handshaker::Server(h) => h.handshake_session(),
        }
    }
}

pub(crate) struct Protocol {
    data: Arc<ContextData>,
    record: RecordLayer,
    handshaker: Option<Handshaker>,
    reassembly: HandshakeReassembly,
    ctx: ConnectionContext,
    /// Network bytes ready for the host to send.
    output: Vec<u8>,
    /// Decrypted application bytes awaiting the host.
    app_input: Vec<u8>,
    resumed: bool,
    close_notify_sent: bool,
    close_notify_received: bool,
    failed: Option<AlertDescription>,
}

impl Protocol {
    /// Build the connection and emit the first flight (client) or arm the
    /// acceptor (server).
    pub fn new(
        data: Arc<ContextData>,
        config: TlsConfig,
        role: TlsRole,
        peer: Option<(String, u16)>,
    ) -> Result<Self, TlsError> {
        config.validate()?;
        let mut protocol = Self {
            data: Arc::clone(&data),
            record: RecordLayer::new(),
            handshaker: None,
            reassembly: HandshakeReassembly::new(),
            ctx: ConnectionContext::new(role),
            output: Vec::new(),
            app_input: Vec::new(),
            resumed: false,
            close_notify_sent: false,
            close_notify_received: false,
            failed: None,
        };
        protocol.ctx.handshake_beginning()?;
        match role {
            TlsRole::Client => {
                let mut handshake = Box::new(ClientHandshake::new(config, data, peer));
                let mut out = HandshakeOutput {
                    record: &mut protocol.record,
                    out: &mut protocol.output,
                };
                handshake.start(&mut protocol.ctx, &mut out)?;
                protocol.handshaker = Some(Handshaker::Client(handshake));
            }
            TlsRole::Server => {
                let mut handshake = Box::new(ServerHandshake::new(config, data));
                handshake.start(&mut protocol.ctx)?;
                protocol.handshaker = Some(Handshaker::Server(handshake));
            }
        }
        Ok(protocol)
    }

    // -- inbound ------------------------------------------------------------

    /// Offer exactly one whole record. On a fatal failure the outbound
    /// alert is already buffered when this returns the error.
    pub fn offer_record(&mut self, record: &[u8]) -> Result<(), TlsError> {
        match self.process_record(record) {
            Ok(()) => Ok(()),
            Err(error) => {
                self.fail(&error);
                Err(error)
            }
        }
    }

    /// Fail the connection for an externally detected error (for example a
    /// malformed record header seen during preview), buffering the alert.
    pub fn abort(&mut self, error: TlsError) -> TlsError {
        self.fail(&error);
        error
    }

    fn process_record(&mut self, record: &[u8]) -> Result<(), TlsError> {
        if self.failed.is_some() {
            return Err(TlsError::Closed);
        }
        let (content_type, plaintext, _) = self.record.open_record(record)?;

        // Handshake messages must not interleave with other content types.
        if content_type != ContentType::Handshake && self.reassembly.has_partial() {
            return Err(TlsError::fatal(
                AlertDescription::UnexpectedMessage,
                "record interleaved with a partial handshake message",
            ));
        }

        match content_type {
            ContentType::Handshake => self.process_handshake_fragment(&plaintext),
            ContentType::ChangeCipherSpec => self.process_change_cipher_spec(&plaintext),
            ContentType::Alert => self.process_alert(&plaintext),
            ContentType::ApplicationData => {
                if self.handshaker.is_some() {
                    return Err(TlsError::fatal(
                        AlertDescription::UnexpectedMessage,
                        "application data during the handshake",
                    ));
                }
                self.app_input.extend_from_slice(&plaintext);
                Ok(())
            }
            // Not implemented; tolerated and dropped.
            ContentType::Heartbeat => Ok(()),
        }
    }

    fn process_handshake_fragment(&mut self, fragment: &[u8]) -> Result<(), TlsError> {
        if self.handshaker.is_none() {
            // HelloRequest or ClientHello after completion: this engine
            // performs a single handshake per connection.
            return Err(TlsError::fatal(
                AlertDescription::NoRenegotiation,
                "renegotiation is not supported",
            ));
        }
        self.reassembly.push(fragment);
        while let Some(msg) = self.reassembly.next_message()? {
            let Some(handshaker) = self.handshaker.as_mut() else {
                return Err(TlsError::fatal(
                    AlertDescription::UnexpectedMessage,
                    "handshake data after Finished",
                ));
            };
            let mut out = HandshakeOutput {
                record: &mut self.record,
                out: &mut self.output,
            };
            let result = match handshaker {
                Handshaker::Client(h) => h.handle_message(msg, &mut self.ctx, &mut out)?,
                Handshaker::Server(h) => h.handle_message(msg, &mut self.ctx, &mut out)?,
            };
            if let Some(result) = result {
                self.complete_handshake(result)?;
            }
        }
        Ok(())
    }

    fn process_change_cipher_spec(&mut self, payload: &[u8]) -> Result<(), TlsError> {
        if payload != [0x01] {
            return Err(TlsError::fatal(
                AlertDescription::DecodeError,
                "malformed ChangeCipherSpec",
            ));
        }
        let Some(handshaker) = self.handshaker.as_mut() else {
            return Err(TlsError::fatal(
                AlertDescription::UnexpectedMessage,
                "ChangeCipherSpec outside a handshake",
            ));
        };
        let keys = match handshaker {
            Handshaker::Client(h) => h.handle_change_cipher_spec()?,
            Handshaker::Server(h) => h.handle_change_cipher_spec()?,
        };
        let cipher = RecordCipher::new(&*self.data.crypto, &keys, None)?;
        self.record.activate_read(cipher);
        Ok(())
    }

    fn process_alert(&mut self, fragment: &[u8]) -> Result<(), TlsError> {
        let (level, description) = Alert::decode(fragment)?;
        match (level, description) {
            (_, Ok(AlertDescription::CloseNotify)) => {
                self.close_notify_received = true;
                self.record.close_inbound();
                // Answer the close so our side winds down too.
                self.close();
                Ok(())
            }
            (AlertLevel::Warning, _) => Ok(()),
            (AlertLevel::Fatal, Ok(description)) => {
                self.record.close_inbound();
                self.record.close_outbound();
                self.failed = Some(description);
                Err(TlsError::PeerAlert(description))
            }
            (AlertLevel::Fatal, Err(code)) => {
                self.record.close_inbound();
                self.record.close_outbound();
                self.failed = Some(AlertDescription::InternalError);
                Err(TlsError::PeerAlertUnknown(code))
            }
        }
    }

    fn complete_handshake(&mut self, result: HandshakeResult) -> Result<(), TlsError> {
        if self.reassembly.has_partial() {
            return Err(TlsError::fatal(
                AlertDescription::UnexpectedMessage,
                "handshake data after Finished",
            ));
        }
        self.resumed = result.resumed;
        if result.publish_session {
            self.data.sessions.put(Arc::clone(&result.session));
        }
        self.ctx.handshake_complete(Arc::clone(&result.session))?;
        if let Some(observer) = &self.data.observer {
            observer.handshake_complete(&result.session);
        }
        self.handshaker = None;
        Ok(())
    }

    /// Buffer a fatal alert for the failure and tear the connection down.
    /// Configuration and misuse errors carry no alert and close nothing.
    fn fail(&mut self, error: &TlsError) {
        if self.failed.is_some() {
            return;
        }
        if matches!(error, TlsError::PeerAlert(_) | TlsError::PeerAlertUnknown(_)) {
            // Already closed in process_alert; nothing to send back.
            return;
        }
        if let Some(description) = error.alert() {
            let alert = Alert::fatal(description);
            let _ = self
                .record
                .seal_record_into(ContentType::Alert, &alert.encode(), &mut self.output);
            self.failed = Some(description);
            self.record.close_outbound();
            self.record.close_inbound();
        }
    }

    // -- outbound -----------------------------------------------------------

    /// Encrypt application data into records. The caller limits `data` to
    /// one record's worth; the 1/n-1 split for IV-chaining CBC emits an
    /// extra one-byte record first.
    pub fn write_application_data(&mut self, data: &[u8]) -> Result<usize, TlsError> {
        if self.handshaker.is_some() {
            return Err(TlsError::Misuse(
                "application data before handshake completion".into(),
            ));
        }
        if self.is_closed() {
            return Err(TlsError::Closed);
        }
        debug_assert!(data.len() <= MAX_PLAINTEXT_LEN);

        if self.record.write_needs_split() && data.len() > 1 {
            self.record
                .seal_record_into(ContentType::ApplicationData, &data[..1], &mut self.output)?;
            self.record.seal_record_into(
                ContentType::ApplicationData,
                &data[1..],
                &mut self.output,
            )?;
        } else {
            self.record
                .seal_record_into(ContentType::ApplicationData, data, &mut self.output)?;
        }
        Ok(data.len())
    }

    /// Worst-case wire size for wrapping `plaintext_len` application bytes.
    pub fn wrap_overhead(&self, plaintext_len: usize) -> usize {
        let expansion = self.record.write_expansion();
        let mut total = HEADER_LEN + plaintext_len + expansion;
        if self.record.write_needs_split() && plaintext_len > 1 {
            total += HEADER_LEN + expansion;
        }
        total
    }

    pub fn available_output(&self) -> usize {
        self.output.len()
    }

    pub fn read_output(&mut self, dst: &mut [u8]) -> usize {
        let n = dst.len().min(self.output.len());
        dst[..n].copy_from_slice(&self.output[..n]);
        self.output.drain(..n);
        n
    }

    pub fn available_app_input(&self) -> usize {
        self.app_input.len()
    }

    pub fn read_app_input(&mut self, dst: &mut [u8]) -> usize {
        let n = dst.len().min(self.app_input.len());
        dst[..n].copy_from_slice(&self.app_input[..n]);
        self.app_input.drain(..n);
        n
    }

    // -- closure ------------------------------------------------------------

    /// Queue close_notify (once) and mark the outbound pipeline closed.
    pub fn close(&mut self) {
        if !self.close_notify_sent && self.failed.is_none() {
            let _ = self.record.seal_record_into(
                ContentType::Alert,
                &Alert::close_notify().encode(),
                &mut self.output,
            );
        }
        self.close_notify_sent = true;
        self.record.close_outbound();
    }

    /// Close the inbound side. Without a peer close_notify this is a
    /// truncation and reported as such, after initiating our own close.
    pub fn close_input(&mut self) -> Result<(), TlsError> {
        self.record.close_inbound();
        if self.close_notify_received {
            Ok(())
        } else {
            self.close();
            Err(TlsError::Misuse(
                "inbound closed before the peer's close_notify".into(),
            ))
        }
    }

    pub fn is_closed(&self) -> bool {
        self.failed.is_some() || self.close_notify_sent || self.close_notify_received
    }

    // -- state --------------------------------------------------------------

    pub fn is_handshake_complete(&self) -> bool {
        self.handshaker.is_none() && self.ctx.security_parameters_connection().is_some()
    }

    pub fn was_resumed(&self) -> bool {
        self.resumed
    }

    pub fn handshake_session(&self) -> Option<Arc<TlsSession>> {
        self.handshaker
            .as_ref()
            .and_then(|h| h.handshake_session())
            .cloned()
    }

    pub fn session(&self) -> Option<Arc<TlsSession>> {
        self.ctx.session().cloned()
    }

    pub fn context(&self) -> &ConnectionContext {
        &self.ctx
    }

    pub fn crypto(&self) -> &dyn crate::provider::Crypto {
        &*self.data.crypto
    }
}
