//! The non-blocking engine façade.
//!
//! `wrap` and `unwrap` advance the connection by byte offers: `unwrap`
//! consumes exactly one whole record per call, `wrap` emits at most one
//! maximum-sized application record and drains pending output. Neither
//! blocks; "waiting" is modeled as `BufferUnderflow`/`BufferOverflow`
//! returns and the host performs the actual I/O.
//!
//! A failure during `unwrap` that produced an outbound fatal alert is not
//! raised there: the engine reports `NeedWrap` with an `Ok` status and
//! raises the stored error from the next `wrap` call, so hosts that only
//! drain outbound buffers after a successful `wrap` still flush the alert
//! before seeing the error. The wrap after the failing one drains the
//! alert bytes (buffered output stays drainable after `Closed`).

#[cfg(all(test, feature = "rustcrypto-provider"))]
mod tests;

use std::sync::Arc;

use crate::config::{ContextData, TlsConfig};
use crate::params::{ChannelBindingType, SecurityParameters};
use crate::protocol::Protocol;
use crate::record::{parse_header, HEADER_LEN, MAX_PLAINTEXT_LEN};
use crate::session::TlsSession;
use crate::TlsRole;
use rivet_types::TlsError;

/// Overall result status of a wrap/unwrap call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    /// `unwrap` needs a complete record; offer more input.
    BufferUnderflow,
    /// The destination lacks room for the worst-case output.
    BufferOverflow,
    Closed,
}

/// What the engine needs next to make progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeStatus {
    NeedWrap,
    NeedUnwrap,
    /// Never returned: this engine runs CPU-bound handshake work inline
    /// instead of delegating tasks.
    NeedTask,
    /// Returned exactly once, by the call that completed the handshake.
    Finished,
    NotHandshaking,
}

/// The result triple of a wrap/unwrap call.
#[derive(Debug, Clone, Copy)]
pub struct EngineResult {
    pub status: Status,
    pub handshake_status: HandshakeStatus,
    pub bytes_consumed: usize,
    pub bytes_produced: usize,
}

/// A non-blocking TLS engine over byte buffers. One handshake per engine;
/// renegotiation is rejected.
pub struct TlsEngine {
    data: Arc<ContextData>,
    config: TlsConfig,
    peer: Option<(String, u16)>,
    client_mode: bool,
    handshake_begun: bool,
    status: HandshakeStatus,
    protocol: Option<Protocol>,
    deferred: Option<TlsError>,
    closed_before_handshake: bool,
}

impl TlsEngine {
    /// An engine with the default configuration, in server mode.
    pub fn new(data: Arc<ContextData>) -> Self {
        Self::with_config(data, TlsConfig::builder().build())
    }

    pub fn with_config(data: Arc<ContextData>, config: TlsConfig) -> Self {
        Self {
            data,
            config,
            peer: None,
            client_mode: false,
            handshake_begun: false,
            status: HandshakeStatus::NotHandshaking,
            protocol: None,
            deferred: None,
            closed_before_handshake: false,
        }
    }

    /// An engine bound to a known peer, enabling the client-side session
    /// resumption offer.
    pub fn with_peer(data: Arc<ContextData>, config: TlsConfig, host: &str, port: u16) -> Self {
        let mut engine = Self::with_config(data, config);
        engine.peer = Some((host.to_string(), port));
        engine
    }

    // -- pre-handshake configuration ----------------------------------------

    /// Switch between client and server roles. Rejected once the handshake
    /// has begun.
    pub fn set_client_mode(&mut self, client: bool) -> Result<(), TlsError> {
        if self.handshake_begun {
            return Err(TlsError::Misuse(
                "mode cannot change after the handshake has begun".into(),
            ));
        }
        self.client_mode = client;
        Ok(())
    }

    pub fn client_mode(&self) -> bool {
        self.client_mode
    }

    /// Adjust this engine's parameters. Rejected once the handshake has
    /// begun.
    pub fn config_mut(&mut self) -> Result<&mut TlsConfig, TlsError> {
        if self.handshake_begun {
            return Err(TlsError::Misuse(
                "parameters cannot change after the handshake has begun".into(),
            ));
        }
        Ok(&mut self.config)
    }

    pub fn config(&self) -> &TlsConfig {
        &self.config
    }

    pub fn set_want_client_auth(&mut self, want: bool) -> Result<(), TlsError> {
        self.config_mut()?.want_client_auth = want;
        Ok(())
    }

    pub fn set_need_client_auth(&mut self, need: bool) -> Result<(), TlsError> {
        let config = self.config_mut()?;
        config.need_client_auth = need;
        if need {
            config.want_client_auth = true;
        }
        Ok(())
    }

    // -- lifecycle ----------------------------------------------------------

    /// Begin the initial handshake. Calling again once begun is the
    /// renegotiation this engine refuses; the connection is unaffected.
    pub fn begin_handshake(&mut self) -> Result<(), TlsError> {
        if self.handshake_begun {
            return Err(TlsError::Misuse("renegotiation is not supported".into()));
        }
        if self.closed_before_handshake {
            return Err(TlsError::Closed);
        }
        let role = if self.client_mode {
            TlsRole::Client
        } else {
            TlsRole::Server
        };
        let protocol = Protocol::new(
            Arc::clone(&self.data),
            self.config.clone(),
            role,
            self.peer.clone(),
        )?;
        self.protocol = Some(protocol);
        self.handshake_begun = true;
        self.status = match role {
            TlsRole::Client => HandshakeStatus::NeedWrap,
            TlsRole::Server => HandshakeStatus::NeedUnwrap,
        };
        Ok(())
    }

    pub fn handshake_status(&self) -> HandshakeStatus {
        self.status
    }

    /// Decrypt one inbound record from `src` into `dst`.
    pub fn unwrap(&mut self, src: &[u8], dst: &mut [u8]) -> Result<EngineResult, TlsError> {
        if !self.handshake_begun {
            self.begin_handshake()?;
        }
        let protocol = self.protocol.as_mut().expect("handshake begun");

        let mut status = Status::Ok;
        let mut bytes_consumed = 0;
        let mut bytes_produced = 0;

        if protocol.is_closed() && protocol.available_app_input() == 0 {
            status = Status::Closed;
        } else if src.len() < HEADER_LEN {
            status = Status::BufferUnderflow;
        } else {
            match parse_header(src) {
                Err(error) => {
                    // A malformed header is a connection failure like any
                    // other record-layer error.
                    let error = protocol.abort(error);
                    return self.defer_unwrap_failure(error, 0, 0);
                }
                Ok(header) => {
                    let record_len = header.record_len();
                    if src.len() < record_len {
                        status = Status::BufferUnderflow;
                    } else if dst.len() < header.fragment_len.min(MAX_PLAINTEXT_LEN) {
                        status = Status::BufferOverflow;
                    } else {
                        match protocol.offer_record(&src[..record_len]) {
                            Ok(()) => {
                                bytes_consumed = record_len;
                                bytes_produced = protocol.read_app_input(dst);
                            }
                            Err(error) => {
                                return self.defer_unwrap_failure(error, record_len, 0);
                            }
                        }
                    }
                }
            }
        }

        // The stored status only moves here when we started in NeedUnwrap.
        let protocol = self.protocol.as_ref().expect("handshake begun");
        let mut result_status = self.status;
        if self.status == HandshakeStatus::NeedUnwrap {
            if protocol.available_output() > 0 {
                self.status = HandshakeStatus::NeedWrap;
                result_status = HandshakeStatus::NeedWrap;
            } else if protocol.is_closed() {
                self.status = HandshakeStatus::NotHandshaking;
                result_status = HandshakeStatus::NotHandshaking;
            } else if protocol.is_handshake_complete() {
                self.status = HandshakeStatus::NotHandshaking;
                result_status = HandshakeStatus::Finished;
            }
        }

        Ok(EngineResult {
            status,
            handshake_status: result_status,
            bytes_consumed,
            bytes_produced,
        })
    }

    /// The deferred-error discipline: when the failure buffered an outbound
    /// alert, pretend this unwrap succeeded and ask for a wrap; the stored
    /// error surfaces there, after the host had a chance to flush.
    fn defer_unwrap_failure(
        &mut self,
        error: TlsError,
        bytes_consumed: usize,
        bytes_produced: usize,
    ) -> Result<EngineResult, TlsError> {
        let has_alert_to_flush = self
            .protocol
            .as_ref()
            .is_some_and(|p| p.available_output() > 0);
        if !has_alert_to_flush && self.status != HandshakeStatus::NeedUnwrap {
            return Err(error);
        }
        if self.deferred.is_none() {
            self.deferred = Some(error);
        }
        self.status = HandshakeStatus::NeedWrap;
        Ok(EngineResult {
            status: Status::Ok,
            handshake_status: HandshakeStatus::NeedWrap,
            bytes_consumed,
            bytes_produced,
        })
    }

    /// Encrypt application bytes from `src` into `dst`, or flush pending
    /// handshake/alert bytes. Pending output is fully drained before any
    /// new application record is produced.
    pub fn wrap(&mut self, src: &[u8], dst: &mut [u8]) -> Result<EngineResult, TlsError> {
        if let Some(error) = self.deferred.take() {
            return Err(error);
        }
        if !self.handshake_begun {
            self.begin_handshake()?;
        }
        let protocol = self.protocol.as_mut().expect("handshake begun");

        let mut status = Status::Ok;
        let mut bytes_consumed = 0;
        let mut bytes_produced = 0;

        if self.status == HandshakeStatus::NotHandshaking {
            if protocol.is_closed() {
                status = Status::Closed;
            } else if protocol.available_output() > 0 {
                // Flush buffered bytes before accepting new application data.
            } else {
                // At most one maximum-sized application record per call.
                let limit = src.len().min(MAX_PLAINTEXT_LEN);
                if limit > 0 {
                    if dst.len() < protocol.wrap_overhead(limit) {
                        status = Status::BufferOverflow;
                    } else {
                        bytes_consumed = protocol.write_application_data(&src[..limit])?;
                    }
                }
            }
        }

        let available = protocol.available_output();
        if available > 0 {
            let n = protocol.read_output(dst);
            if n > 0 {
                bytes_produced = n;
            } else {
                status = Status::BufferOverflow;
            }
        }

        // The stored status only moves here when we started in NeedWrap.
        let mut result_status = self.status;
        if self.status == HandshakeStatus::NeedWrap {
            if protocol.available_output() > 0 {
                // Still NeedWrap.
            } else if protocol.is_closed() {
                self.status = HandshakeStatus::NotHandshaking;
                result_status = HandshakeStatus::NotHandshaking;
            } else if protocol.is_handshake_complete() {
                self.status = HandshakeStatus::NotHandshaking;
                result_status = HandshakeStatus::Finished;
            } else {
                self.status = HandshakeStatus::NeedUnwrap;
                result_status = HandshakeStatus::NeedUnwrap;
            }
        }

        Ok(EngineResult {
            status,
            handshake_status: result_status,
            bytes_consumed,
            bytes_produced,
        })
    }

    /// Initiate an orderly close: close_notify is synthesized and must be
    /// flushed via `wrap`.
    pub fn close_outbound(&mut self) {
        match self.protocol.as_mut() {
            Some(protocol) => protocol.close(),
            None => self.closed_before_handshake = true,
        }
    }

    /// Close the inbound side. An error is reported when the peer never
    /// sent close_notify (possible truncation); the close still happens.
    pub fn close_inbound(&mut self) -> Result<(), TlsError> {
        match self.protocol.as_mut() {
            Some(protocol) => protocol.close_input(),
            None => {
                self.closed_before_handshake = true;
                Ok(())
            }
        }
    }

    pub fn is_inbound_done(&self) -> bool {
        match &self.protocol {
            Some(protocol) => protocol.is_closed(),
            None => self.closed_before_handshake,
        }
    }

    pub fn is_outbound_done(&self) -> bool {
        match &self.protocol {
            Some(protocol) => protocol.is_closed() && protocol.available_output() == 0,
            None => self.closed_before_handshake,
        }
    }

    // -- connection information ---------------------------------------------

    /// The connection's session, or the null session before completion.
    pub fn session(&self) -> Arc<TlsSession> {
        self.protocol
            .as_ref()
            .and_then(|p| p.session())
            .unwrap_or_else(|| Arc::new(TlsSession::null()))
    }

    /// The in-progress session during a handshake.
    pub fn handshake_session(&self) -> Option<Arc<TlsSession>> {
        self.protocol.as_ref().and_then(|p| p.handshake_session())
    }

    /// Whether the completed handshake resumed a cached session.
    pub fn was_resumed(&self) -> bool {
        self.protocol.as_ref().is_some_and(|p| p.was_resumed())
    }

    /// The in-progress parameters if a handshake is running, else the
    /// completed connection's.
    pub fn security_parameters(&self) -> Option<&SecurityParameters> {
        self.protocol
            .as_ref()
            .and_then(|p| p.context().security_parameters())
    }

    /// The ALPN protocol negotiated by the completed handshake.
    pub fn application_protocol(&self) -> Option<Vec<u8>> {
        self.protocol.as_ref().and_then(|p| {
            p.context()
                .security_parameters_connection()?
                .application_protocol
                .clone()
        })
    }

    /// Export a channel binding (RFC 5929) from the completed handshake.
    pub fn channel_binding(&self, binding: ChannelBindingType) -> Result<Vec<u8>, TlsError> {
        let protocol = self
            .protocol
            .as_ref()
            .ok_or_else(|| TlsError::Misuse("no connection".into()))?;
        protocol.context().channel_binding(binding)
    }

    /// Export keying material (RFC 5705) from the completed handshake.
    pub fn export_keying_material(
        &self,
        label: &str,
        context: Option<&[u8]>,
        length: usize,
    ) -> Result<Vec<u8>, TlsError> {
        let protocol = self
            .protocol
            .as_ref()
            .ok_or_else(|| TlsError::Misuse("no connection".into()))?;
        protocol
            .context()
            .export_keying_material(protocol.crypto(), label, context, length)
    }
}
