//! Per-client peer session.
//!
//! Each client that sends an offer gets an owned actor task holding its ICE
//! agent, DTLS transport and SCTP association. Everything else talks to it
//! through [`PeerHandle`] commands; transport state never leaks out of the
//! task. Handshakes run in subtasks so the mailbox stays responsive.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;
use webrtc::dtls::config::Config as DtlsConfig;
use webrtc::dtls::conn::DTLSConn;
use webrtc::dtls::crypto::Certificate as DtlsCertificate;
use webrtc::ice::agent::agent_config::AgentConfig;
use webrtc::ice::agent::Agent;
use webrtc::ice::candidate::candidate_base::unmarshal_candidate;
use webrtc::ice::candidate::Candidate;
use webrtc::ice::network_type::NetworkType;
use webrtc::ice::state::ConnectionState;
use webrtc::sctp::association::{Association, Config as SctpConfig};
use webrtc::sctp::chunk::chunk_payload_data::PayloadProtocolIdentifier;
use webrtc::sctp::stream::{ReliabilityType, Stream};
use webrtc::util::Conn;

use gv_protocol::ServerMessage;

use crate::audio::AudioIngress;

use super::dcep::{self, ppid, DcepOpen};
use super::error::RtcError;
use super::ice::RemoteCandidate;
use super::sdp::{self, OfferView};
use super::sender::{BackpressureGate, SendOutcome, BUFFER_HIGH_WATERMARK};

/// Mailbox depth for peer commands; audio frames share it.
const COMMAND_QUEUE_DEPTH: usize = 256;

/// Lifecycle of a peer session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    New,
    Gathering,
    Checking,
    Connected,
    Failed,
    Closed,
}

/// One data channel the client opened via DCEP.
#[derive(Debug, Clone)]
pub struct DataChannel {
    pub stream_id: u16,
    pub channel_type: u8,
    pub priority: u16,
    pub reliability_parameter: u32,
    pub label: String,
    pub protocol: String,
    pub open: bool,
}

enum PeerCommand {
    Offer {
        sdp: String,
        reply: oneshot::Sender<Result<String, RtcError>>,
    },
    RemoteCandidate {
        line: String,
    },
    EndOfCandidates,
    StartDataChannel,
    SendAudio {
        frame: Bytes,
    },
    Close,
}

enum InternalEvent {
    IceState(ConnectionState),
    IceConnected(Arc<dyn Conn + Send + Sync>),
    IceFailed(RtcError),
    TransportUp(Arc<Association>),
    TransportFailed(RtcError),
    ChannelOpen {
        stream: Arc<Stream>,
        open: DcepOpen,
    },
    ChannelClosed {
        stream_id: u16,
    },
}

/// Cheap handle to a peer session actor.
#[derive(Clone)]
pub struct PeerHandle {
    pub client_id: Uuid,
    cmd_tx: mpsc::Sender<PeerCommand>,
    state_rx: watch::Receiver<PeerState>,
}

impl PeerHandle {
    /// Process an offer and return the answer SDP.
    pub async fn set_offer(&self, sdp: String) -> Result<String, RtcError> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(PeerCommand::Offer { sdp, reply })
            .await
            .map_err(|_| RtcError::PeerClosed)?;
        rx.await.map_err(|_| RtcError::PeerClosed)?
    }

    /// Queue a remote trickle candidate.
    pub fn add_candidate(&self, line: String) {
        let _ = self.cmd_tx.try_send(PeerCommand::RemoteCandidate { line });
    }

    pub fn end_of_candidates(&self) {
        let _ = self.cmd_tx.try_send(PeerCommand::EndOfCandidates);
    }

    /// Bring up DTLS/SCTP once ICE completes and accept data channels.
    pub fn start_datachannel(&self) {
        let _ = self.cmd_tx.try_send(PeerCommand::StartDataChannel);
    }

    /// Queue one encoded audio frame. Drops when the mailbox is full; the
    /// audio path never blocks on a slow peer.
    pub fn send_audio(&self, frame: Bytes) {
        let _ = self.cmd_tx.try_send(PeerCommand::SendAudio { frame });
    }

    pub fn close(&self) {
        let _ = self.cmd_tx.try_send(PeerCommand::Close);
    }

    #[must_use]
    pub fn state(&self) -> PeerState {
        *self.state_rx.borrow()
    }
}

struct OutboundChannel {
    stream: Arc<Stream>,
    label: String,
    unordered: bool,
}

/// Spawn a peer session actor for one client.
pub(super) async fn spawn(
    client_id: Uuid,
    certificate: DtlsCertificate,
    fingerprint: String,
    signal_tx: mpsc::Sender<ServerMessage>,
    audio_ingress: AudioIngress,
) -> Result<PeerHandle, RtcError> {
    let agent = Arc::new(
        Agent::new(AgentConfig {
            network_types: vec![NetworkType::Udp4],
            ..AgentConfig::default()
        })
        .await?,
    );

    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
    let (internal_tx, internal_rx) = mpsc::unbounded_channel();
    let (state_tx, state_rx) = watch::channel(PeerState::New);

    // The application mid is only known once the offer arrives; the
    // candidate callback reads whatever is current at emit time.
    let app_mid: Arc<Mutex<Option<(String, u16)>>> = Arc::new(Mutex::new(None));

    {
        let signal_tx = signal_tx.clone();
        let app_mid = app_mid.clone();
        agent.on_candidate(Box::new(move |candidate| {
            let signal_tx = signal_tx.clone();
            let app_mid = app_mid.clone();
            Box::pin(async move {
                let message = match candidate {
                    Some(c) => {
                        let (sdp_mid, sdp_m_line_index) = app_mid
                            .lock()
                            .expect("mid lock")
                            .clone()
                            .map_or((None, None), |(mid, index)| (Some(mid), Some(index)));
                        ServerMessage::IceCandidate {
                            candidate: Some(c.marshal()),
                            sdp_mid,
                            sdp_m_line_index,
                            complete: None,
                        }
                    }
                    None => ServerMessage::IceCandidate {
                        candidate: None,
                        sdp_mid: None,
                        sdp_m_line_index: None,
                        complete: Some(true),
                    },
                };
                let _ = signal_tx.send(message).await;
            })
        }));
    }

    {
        let internal_tx = internal_tx.clone();
        agent.on_connection_state_change(Box::new(move |state| {
            let _ = internal_tx.send(InternalEvent::IceState(state));
            Box::pin(async {})
        }));
    }

    let actor = PeerActor {
        client_id,
        agent,
        certificate,
        fingerprint,
        signal_tx,
        audio_ingress,
        internal_tx,
        state_tx,
        app_mid,
        offer: None,
        cancel_tx: None,
        ice_conn: None,
        association: None,
        channels: HashMap::new(),
        outbound: None,
        gate: BackpressureGate::new(),
        start_requested: false,
        handshake_running: false,
    };
    tokio::spawn(actor.run(cmd_rx, internal_rx));

    Ok(PeerHandle {
        client_id,
        cmd_tx,
        state_rx,
    })
}

struct PeerActor {
    client_id: Uuid,
    agent: Arc<Agent>,
    certificate: DtlsCertificate,
    fingerprint: String,
    signal_tx: mpsc::Sender<ServerMessage>,
    audio_ingress: AudioIngress,
    internal_tx: mpsc::UnboundedSender<InternalEvent>,
    state_tx: watch::Sender<PeerState>,
    app_mid: Arc<Mutex<Option<(String, u16)>>>,
    offer: Option<OfferView>,
    cancel_tx: Option<mpsc::Sender<()>>,
    ice_conn: Option<Arc<dyn Conn + Send + Sync>>,
    association: Option<Arc<Association>>,
    channels: HashMap<u16, DataChannel>,
    outbound: Option<OutboundChannel>,
    gate: BackpressureGate,
    start_requested: bool,
    handshake_running: bool,
}

impl PeerActor {
    async fn run(
        mut self,
        mut cmd_rx: mpsc::Receiver<PeerCommand>,
        mut internal_rx: mpsc::UnboundedReceiver<InternalEvent>,
    ) {
        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(PeerCommand::Close) | None => break,
                        Some(cmd) => self.handle_command(cmd).await,
                    }
                }
                Some(event) = internal_rx.recv() => self.handle_internal(event).await,
            }
        }
        self.shutdown().await;
    }

    async fn handle_command(&mut self, cmd: PeerCommand) {
        match cmd {
            PeerCommand::Offer { sdp, reply } => {
                let result = self.process_offer(&sdp).await;
                let _ = reply.send(result);
            }
            PeerCommand::RemoteCandidate { line } => {
                if let Err(e) = self.add_remote_candidate(&line) {
                    warn!(client_id = %self.client_id, error = %e, "Dropping remote candidate");
                }
            }
            PeerCommand::EndOfCandidates => {
                debug!(client_id = %self.client_id, "Remote end-of-candidates");
            }
            PeerCommand::StartDataChannel => {
                self.start_requested = true;
                self.maybe_start_transport();
            }
            PeerCommand::SendAudio { frame } => self.send_audio(frame).await,
            PeerCommand::Close => unreachable!("handled in run"),
        }
    }

    /// Parse the offer, produce the answer and kick off ICE. Repeat offers
    /// rebuild the answer with the existing credentials.
    async fn process_offer(&mut self, sdp: &str) -> Result<String, RtcError> {
        let offer = sdp::parse_offer(sdp)?;
        *self.app_mid.lock().expect("mid lock") = Some((
            offer.application.mid.clone(),
            offer.application.mline_index,
        ));

        let (ufrag, pwd) = self.agent.get_local_user_credentials().await;
        let answer = sdp::build_answer(&offer, &ufrag, &pwd, &self.fingerprint);

        let first_offer = self.offer.is_none();
        let remote_ufrag = offer.remote_ufrag.clone();
        let remote_pwd = offer.remote_pwd.clone();
        self.offer = Some(offer);

        if first_offer {
            self.agent.gather_candidates()?;
            self.set_state(PeerState::Gathering);

            let (cancel_tx, cancel_rx) = mpsc::channel(1);
            self.cancel_tx = Some(cancel_tx);
            let agent = self.agent.clone();
            let internal_tx = self.internal_tx.clone();
            tokio::spawn(async move {
                match agent.accept(cancel_rx, remote_ufrag, remote_pwd).await {
                    Ok(conn) => {
                        let _ = internal_tx.send(InternalEvent::IceConnected(conn));
                    }
                    Err(e) => {
                        let _ = internal_tx.send(InternalEvent::IceFailed(e.into()));
                    }
                }
            });
        }

        Ok(answer)
    }

    fn add_remote_candidate(&self, line: &str) -> Result<(), RtcError> {
        let parsed = RemoteCandidate::parse(line)?;
        let candidate = unmarshal_candidate(&parsed.to_string())
            .map_err(|e| RtcError::Candidate(e.to_string()))?;
        let candidate: Arc<dyn Candidate + Send + Sync> = Arc::new(candidate);
        self.agent.add_remote_candidate(&candidate)?;
        Ok(())
    }

    async fn handle_internal(&mut self, event: InternalEvent) {
        match event {
            InternalEvent::IceState(state) => {
                debug!(client_id = %self.client_id, ?state, "ICE state changed");
                match state {
                    ConnectionState::Checking => self.set_state(PeerState::Checking),
                    ConnectionState::Connected | ConnectionState::Completed => {
                        self.set_state(PeerState::Connected);
                    }
                    ConnectionState::Failed | ConnectionState::Disconnected => {
                        self.set_state(PeerState::Failed);
                    }
                    ConnectionState::Closed => self.set_state(PeerState::Closed),
                    _ => {}
                }
            }
            InternalEvent::IceConnected(conn) => {
                info!(client_id = %self.client_id, "ICE connected");
                self.ice_conn = Some(conn);
                self.set_state(PeerState::Connected);
                self.maybe_start_transport();
            }
            InternalEvent::IceFailed(e) => {
                warn!(client_id = %self.client_id, error = %e, "ICE failed");
                self.set_state(PeerState::Failed);
            }
            InternalEvent::TransportUp(association) => {
                info!(client_id = %self.client_id, "SCTP association established");
                self.association = Some(association);
            }
            InternalEvent::TransportFailed(e) => {
                warn!(client_id = %self.client_id, error = %e, "Transport failed");
                self.handshake_running = false;
                self.set_state(PeerState::Failed);
            }
            InternalEvent::ChannelOpen { stream, open } => {
                self.register_channel(stream, open).await;
            }
            InternalEvent::ChannelClosed { stream_id } => {
                debug!(client_id = %self.client_id, stream_id, "Data channel closed");
                self.channels.remove(&stream_id);
                if self
                    .outbound
                    .as_ref()
                    .is_some_and(|o| o.stream.stream_identifier() == stream_id)
                {
                    self.outbound = None;
                }
            }
        }
    }

    /// Record an OPENed channel, acknowledge it and adopt it for outbound
    /// audio (a channel labeled `audio` wins over earlier channels).
    async fn register_channel(&mut self, stream: Arc<Stream>, open: DcepOpen) {
        let stream_id = stream.stream_identifier();
        let unordered = open.is_unordered();

        stream.set_reliability_params(
            unordered,
            ReliabilityType::Reliable,
            open.reliability_parameter,
        );

        if let Err(e) = stream
            .write_sctp(&dcep::ack(), PayloadProtocolIdentifier::from(ppid::DCEP))
            .await
        {
            warn!(client_id = %self.client_id, stream_id, error = %e, "Failed to ACK channel open");
            return;
        }

        info!(
            client_id = %self.client_id,
            stream_id,
            label = %open.label,
            unordered,
            "Data channel open"
        );

        let adopt = match &self.outbound {
            None => true,
            Some(existing) => existing.label != "audio" && open.label == "audio",
        };
        if adopt {
            self.outbound = Some(OutboundChannel {
                stream: stream.clone(),
                label: open.label.clone(),
                unordered,
            });
        }

        self.channels.insert(
            stream_id,
            DataChannel {
                stream_id,
                channel_type: open.channel_type,
                priority: open.priority,
                reliability_parameter: open.reliability_parameter,
                label: open.label,
                protocol: open.protocol,
                open: true,
            },
        );
    }

    fn maybe_start_transport(&mut self) {
        if !self.start_requested || self.handshake_running || self.association.is_some() {
            return;
        }
        let Some(conn) = self.ice_conn.clone() else {
            // Waiting for the selected pair; retried on IceConnected.
            return;
        };
        self.handshake_running = true;

        let client_id = self.client_id;
        let certificate = self.certificate.clone();
        let internal_tx = self.internal_tx.clone();
        let audio_ingress = self.audio_ingress.clone();
        tokio::spawn(run_transport(
            client_id,
            conn,
            certificate,
            internal_tx,
            audio_ingress,
        ));
    }

    async fn send_audio(&mut self, frame: Bytes) {
        let Some(outbound) = &self.outbound else {
            return;
        };
        let now = Instant::now();
        if self.gate.in_cooldown(now) {
            return;
        }

        let outcome = if outbound.stream.buffered_amount() > BUFFER_HIGH_WATERMARK {
            SendOutcome::Backpressured
        } else {
            let ppid_value = if frame.is_empty() {
                ppid::BINARY_EMPTY
            } else {
                ppid::BINARY
            };
            match outbound
                .stream
                .write_sctp(&frame, PayloadProtocolIdentifier::from(ppid_value))
                .await
            {
                Ok(_) => SendOutcome::Success,
                Err(webrtc::sctp::Error::ErrStreamClosed) => SendOutcome::Closed,
                Err(e) => {
                    debug!(client_id = %self.client_id, error = %e, "Audio send failed");
                    SendOutcome::Error
                }
            }
        };

        match outcome {
            SendOutcome::Success => {}
            SendOutcome::Backpressured => {
                if let Some(dropped) = self.gate.trip(now) {
                    warn!(
                        client_id = %self.client_id,
                        dropped,
                        "Data channel backpressured, dropping audio"
                    );
                }
            }
            SendOutcome::Closed => {
                let stream_id = outbound.stream.stream_identifier();
                self.channels.remove(&stream_id);
                self.outbound = None;
            }
            SendOutcome::Error => {}
        }
    }

    fn set_state(&self, state: PeerState) {
        let current = *self.state_tx.borrow();
        if current == state || current == PeerState::Closed {
            return;
        }
        let _ = self.state_tx.send(state);
    }

    async fn shutdown(mut self) {
        self.cancel_tx.take();
        if let Some(association) = self.association.take() {
            let _ = association.close().await;
        }
        if let Err(e) = self.agent.close().await {
            debug!(client_id = %self.client_id, error = %e, "ICE agent close");
        }
        let _ = self.state_tx.send(PeerState::Closed);
        debug!(client_id = %self.client_id, "Peer session closed");
    }
}

/// DTLS handshake, SCTP association and stream accept loop. Runs until the
/// association dies.
async fn run_transport(
    client_id: Uuid,
    conn: Arc<dyn Conn + Send + Sync>,
    certificate: DtlsCertificate,
    internal_tx: mpsc::UnboundedSender<InternalEvent>,
    audio_ingress: AudioIngress,
) {
    let dtls_config = DtlsConfig {
        certificates: vec![certificate],
        ..DtlsConfig::default()
    };
    let dtls = match DTLSConn::new(conn, dtls_config, false, None).await {
        Ok(dtls) => Arc::new(dtls),
        Err(e) => {
            let _ = internal_tx.send(InternalEvent::TransportFailed(e.into()));
            return;
        }
    };
    debug!(client_id = %client_id, "DTLS handshake complete");

    let association = match Association::server(SctpConfig {
        net_conn: dtls as Arc<dyn Conn + Send + Sync>,
        max_receive_buffer_size: 0,
        max_message_size: 0,
        name: format!("gv-{client_id}"),
    })
    .await
    {
        Ok(association) => Arc::new(association),
        Err(e) => {
            let _ = internal_tx.send(InternalEvent::TransportFailed(e.into()));
            return;
        }
    };
    let _ = internal_tx.send(InternalEvent::TransportUp(association.clone()));

    while let Some(stream) = association.accept_stream().await {
        tokio::spawn(read_stream(
            client_id,
            stream,
            internal_tx.clone(),
            audio_ingress.clone(),
        ));
    }

    let _ = internal_tx.send(InternalEvent::TransportFailed(RtcError::Sctp(
        "association closed".into(),
    )));
}

/// Demux one SCTP stream by PPID: DCEP control versus audio payloads.
async fn read_stream(
    client_id: Uuid,
    stream: Arc<Stream>,
    internal_tx: mpsc::UnboundedSender<InternalEvent>,
    audio_ingress: AudioIngress,
) {
    let stream_id = stream.stream_identifier();
    let mut buf = vec![0u8; 4096];
    loop {
        match stream.read_sctp(&mut buf).await {
            Ok((n, proto)) => match proto as u32 {
                ppid::DCEP => {
                    if dcep::is_ack(&buf[..n]) {
                        // Only relevant for server-opened channels; unused.
                        continue;
                    }
                    match DcepOpen::parse(&buf[..n]) {
                        Ok(open) => {
                            let _ = internal_tx.send(InternalEvent::ChannelOpen {
                                stream: stream.clone(),
                                open,
                            });
                        }
                        Err(e) => {
                            warn!(client_id = %client_id, stream_id, error = %e, "Bad DCEP message");
                        }
                    }
                }
                ppid::BINARY | ppid::STRING => {
                    if n > 0 {
                        audio_ingress.push(client_id, Bytes::copy_from_slice(&buf[..n]));
                    }
                }
                ppid::BINARY_EMPTY | ppid::STRING_EMPTY => {}
                other => {
                    debug!(client_id = %client_id, stream_id, ppid = other, "Ignoring unknown PPID");
                }
            },
            Err(_) => {
                let _ = internal_tx.send(InternalEvent::ChannelClosed { stream_id });
                return;
            }
        }
    }
}
