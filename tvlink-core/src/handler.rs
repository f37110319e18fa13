//! Inner connection handler.
//!
//! Owns the single inner connection, its receive/send buffers, the
//! sequence counter, the pending-request table, the keepalive timer and
//! the bandwidth probe pool. Everything runs on the event-loop thread:
//! the handler is driven exclusively through [`LoopObserver`] callbacks
//! and its public operations.
//!
//! ```text
//! data_received ─► FrameCodec ─► Command::parse ─┬─ Request ──► answer server push
//!                                                 └─ Response/Approve ─► Correlator
//!
//! request_*() ─► Sequencer ─► Command ─► FrameCodec ─► send queue ─► ready_to_write
//! ```

use std::collections::VecDeque;
use std::io;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use bytes::{Buf, Bytes, BytesMut};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::codec::FrameCodec;
use crate::command::{Command, CommandKind, Operation, Origin, SeqId, Sequencer};
use crate::config::InnerConfig;
use crate::correlator::{Correlation, Correlator, RequestPolicy};
use crate::error::InnerError;
use crate::info::{
    Bandwidth, ChannelsInfo, ChatMessage, ClientSystemInfo, PingInfo, RuntimeChannelInfo,
    ServerInfo, StreamId,
};
use crate::probe::{BandwidthHostType, ProbeFailure, ProbeManager, ProbeReport, ProbeSettings};
use crate::reactor::{ClientId, LoopObserver, Reactor, TimerId};
use crate::reply::{FromReply, Pending};
use crate::state::ConnectionState;

// ── Events ───────────────────────────────────────────────────────

/// Why the inner connection went away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Requested locally.
    Local,
    /// The peer closed the socket.
    PeerClosed,
    /// The TCP connect did not succeed.
    ConnectFailed(String),
    /// The keepalive ping went unanswered for a whole period.
    PingTimeout,
    /// The byte stream can no longer be trusted.
    ProtocolError(String),
    /// Reading or writing the socket failed.
    Io(String),
}

impl std::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local => write!(f, "disconnected locally"),
            Self::PeerClosed => write!(f, "closed by peer"),
            Self::ConnectFailed(e) => write!(f, "connect failed: {e}"),
            Self::PingTimeout => write!(f, "keepalive ping timed out"),
            Self::ProtocolError(e) => write!(f, "protocol error: {e}"),
            Self::Io(e) => write!(f, "io error: {e}"),
        }
    }
}

/// Notifications the handler pushes to its owner.
#[derive(Debug)]
pub enum InnerEvent {
    Connected,
    Disconnected { reason: DisconnectReason },
    /// Chat line relayed by the server.
    ChatMessage(ChatMessage),
    BandwidthMeasured {
        host_type: BandwidthHostType,
        bandwidth: Bandwidth,
    },
    ProbeFailed {
        host_type: BandwidthHostType,
        error: InnerError,
    },
}

pub type EventSender = mpsc::UnboundedSender<InnerEvent>;

// ── PingTimer ────────────────────────────────────────────────────

/// Keepalive timer bound to one connected session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PingTimer {
    id: TimerId,
}

impl PingTimer {
    pub fn id(&self) -> TimerId {
        self.id
    }
}

// ── InnerHandler ─────────────────────────────────────────────────

pub struct InnerHandler<R: Reactor> {
    config: InnerConfig,
    io: R,
    state: ConnectionState,
    inner: Option<ClientId>,
    codec: FrameCodec,
    sequencer: Sequencer,
    correlator: Correlator,
    recv_buf: BytesMut,
    send_queue: VecDeque<Bytes>,
    ping_timer: Option<PingTimer>,
    last_ping: Option<SeqId>,
    last_ping_at: Option<Instant>,
    probes: ProbeManager,
    events: EventSender,
    current_bandwidth: Bandwidth,
}

impl<R: Reactor> InnerHandler<R> {
    pub fn new(config: InnerConfig, io: R, events: EventSender) -> Self {
        let codec = FrameCodec::new(config.limits.max_frame_size);
        let probes = ProbeManager::new(ProbeSettings {
            target_bytes: config.limits.probe_target_bytes,
            max_duration: config.limits.probe_max_duration(),
        });
        Self {
            config,
            io,
            state: ConnectionState::default(),
            inner: None,
            codec,
            sequencer: Sequencer::new(),
            correlator: Correlator::new(),
            recv_buf: BytesMut::with_capacity(8 * 1024),
            send_queue: VecDeque::new(),
            ping_timer: None,
            last_ping: None,
            last_ping_at: None,
            probes,
            events,
            current_bandwidth: 0,
        }
    }

    // ── Accessors ────────────────────────────────────────────────

    pub fn config(&self) -> &InnerConfig {
        &self.config
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    pub fn inner_client(&self) -> Option<ClientId> {
        self.inner
    }

    pub fn pending_count(&self) -> usize {
        self.correlator.pending_count()
    }

    pub fn is_pending(&self, seq: SeqId) -> bool {
        self.correlator.is_pending(seq)
    }

    pub fn ping_timer(&self) -> Option<PingTimer> {
        self.ping_timer
    }

    pub fn probes(&self) -> &ProbeManager {
        &self.probes
    }

    /// Last bandwidth measured toward the main server, bytes/second.
    pub fn current_bandwidth(&self) -> Bandwidth {
        self.current_bandwidth
    }

    pub fn reactor(&self) -> &R {
        &self.io
    }

    pub fn reactor_mut(&mut self) -> &mut R {
        &mut self.io
    }

    // ── Lifecycle ────────────────────────────────────────────────

    /// Open a fresh inner connection: new id space, new pending table.
    pub fn connect(&mut self) -> Result<(), InnerError> {
        self.state.begin_connect()?;
        self.sequencer.reset();
        self.correlator = Correlator::new();
        self.recv_buf.clear();
        self.send_queue.clear();

        match self.io.connect(&self.config.inner_host) {
            Ok(client) => {
                info!(host = %self.config.inner_host, %client, "connecting to inner server");
                self.inner = Some(client);
                Ok(())
            }
            Err(e) => {
                error!(host = %self.config.inner_host, error = %e, "inner connect failed");
                self.teardown(DisconnectReason::ConnectFailed(e.to_string()));
                Err(InnerError::Io(e))
            }
        }
    }

    /// Close the inner connection, failing every pending request.
    pub fn disconnect(&mut self) {
        self.teardown(DisconnectReason::Local);
    }

    fn teardown(&mut self, reason: DisconnectReason) {
        if self.state.begin_disconnect().is_err() {
            return;
        }

        let cancelled = self.correlator.cancel_all(&reason.to_string());
        if let Some(timer) = self.ping_timer.take() {
            self.io.remove_timer(timer.id);
        }
        self.last_ping = None;
        self.last_ping_at = None;
        if let Some(client) = self.inner.take() {
            self.io.close(client);
        }
        self.recv_buf.clear();
        self.send_queue.clear();

        // Only reachable from Disconnecting, which we just entered.
        let _ = self.state.finish_disconnect();
        info!(%reason, cancelled, "inner connection closed");
        self.emit(InnerEvent::Disconnected { reason });
    }

    // ── Public operations ────────────────────────────────────────

    pub fn request_server_info(&mut self) -> Result<Pending<ServerInfo>, InnerError> {
        self.submit(Operation::ServerInfo, Vec::new())
    }

    pub fn request_channels(&mut self) -> Result<Pending<ChannelsInfo>, InnerError> {
        self.submit(Operation::Channels, Vec::new())
    }

    pub fn request_runtime_channel_info(
        &mut self,
        stream_id: &StreamId,
    ) -> Result<Pending<RuntimeChannelInfo>, InnerError> {
        self.submit(Operation::RuntimeChannelInfo, vec![stream_id.clone()])
    }

    /// Resolves once the server has approved the post.
    pub fn post_message_to_chat(&mut self, msg: &ChatMessage) -> Result<Pending<()>, InnerError> {
        let body = serde_json::to_string(msg)?;
        self.submit(Operation::ChatMessagePost, vec![body])
    }

    /// Give up on a pending request; its caller sees `Cancelled`.
    pub fn cancel(&mut self, seq: SeqId) -> bool {
        self.correlator.cancel(seq)
    }

    fn policy_for(&self, operation: Operation) -> RequestPolicy {
        let timing = &self.config.timing;
        let response_timeout = match operation {
            Operation::ClientPing => timing.ping_interval(),
            _ => timing.response_timeout(),
        };
        RequestPolicy {
            response_timeout,
            approve_timeout: operation
                .requires_approve()
                .then(|| timing.approve_timeout()),
        }
    }

    /// Build, register and queue a request.
    ///
    /// Accepted while `Connecting` (flushed once connected); rejected with
    /// `NotConnected` in every other non-connected state.
    fn submit<T: FromReply>(
        &mut self,
        operation: Operation,
        args: Vec<String>,
    ) -> Result<Pending<T>, InnerError> {
        if !self.state.is_live() {
            return Err(InnerError::NotConnected);
        }

        let seq = self.sequencer.next_id();
        let request = Command::request(seq, operation, args);
        let frame = self.codec.encode(request.to_text().as_bytes())?;
        let rx = self
            .correlator
            .submit(&request, self.policy_for(operation), Instant::now())?;

        debug!(seq, %operation, "request queued");
        self.queue_frame(frame);
        Ok(Pending::new(seq, rx))
    }

    fn send_command(&mut self, command: &Command) {
        match self.codec.encode(command.to_text().as_bytes()) {
            Ok(frame) => self.queue_frame(frame),
            Err(e) => warn!(verb = %command.verb(), error = %e, "dropping outbound command"),
        }
    }

    fn queue_frame(&mut self, frame: Bytes) {
        self.send_queue.push_back(frame);
        if let (true, Some(client)) = (self.state.is_connected(), self.inner) {
            self.io.request_write(client);
        }
    }

    fn emit(&self, event: InnerEvent) {
        if self.events.send(event).is_err() {
            debug!("event receiver dropped");
        }
    }

    // ── Inbound path ─────────────────────────────────────────────

    fn on_inner_data(&mut self, client: ClientId) {
        loop {
            match self.io.read(client, &mut self.recv_buf) {
                Ok(0) => break,
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    self.teardown(DisconnectReason::Io(e.to_string()));
                    return;
                }
            }
        }

        loop {
            match self.codec.try_decode(&mut self.recv_buf) {
                Ok(Some(frame)) => self.handle_frame(frame.payload()),
                Ok(None) => break,
                Err(e) => {
                    error!(error = %e, "unrecoverable framing error");
                    self.teardown(DisconnectReason::ProtocolError(e.to_string()));
                    return;
                }
            }
            // A handler reaction may have torn the connection down.
            if self.inner != Some(client) {
                return;
            }
        }
    }

    fn handle_frame(&mut self, payload: &[u8]) {
        let command = match Command::parse(payload) {
            Ok(command) => command,
            Err(e) => {
                warn!(error = %e, "discarding malformed command");
                return;
            }
        };

        match command.kind() {
            CommandKind::Request => self.handle_server_request(command),
            CommandKind::Response | CommandKind::Approve => {
                match self.correlator.on_command_received(command, Instant::now()) {
                    Correlation::Completed {
                        operation,
                        response,
                    } => {
                        debug!(seq = response.seq(), %operation, "request completed");
                        self.after_completion(operation, &response);
                    }
                    Correlation::AwaitingApprove { operation } => {
                        debug!(%operation, "waiting for approve");
                    }
                    Correlation::Rejected { operation, reason } => {
                        warn!(%operation, %reason, "request rejected by server");
                    }
                    Correlation::Unmatched(command) => {
                        debug!(
                            seq = command.seq(),
                            verb = %command.verb(),
                            "no pending request; discarding unsolicited or stale reply"
                        );
                    }
                }
            }
        }
    }

    fn after_completion(&mut self, operation: Operation, response: &Command) {
        if operation != Operation::ServerInfo {
            return;
        }
        let info: ServerInfo = match response.json_body() {
            Ok(info) => info,
            Err(e) => {
                warn!(error = %e, "server info body unreadable");
                return;
            }
        };
        if info.bandwidth_host.is_empty() {
            return;
        }
        let now = Instant::now();
        if let Err(error) =
            self.probes
                .start_probe(&mut self.io, &info.bandwidth_host, BandwidthHostType::MainServer, now)
        {
            warn!(%error, "could not start bandwidth probe");
            self.emit(InnerEvent::ProbeFailed {
                host_type: BandwidthHostType::MainServer,
                error,
            });
        }
    }

    /// Answer a server-initiated request on its own sequence id.
    fn handle_server_request(&mut self, request: Command) {
        let seq = request.seq();
        let operation = request.operation();

        if operation.origin() != Origin::Server {
            warn!(seq, %operation, "server sent a client-only request");
            self.send_command(&Command::response_fail(seq, operation, "unsupported request"));
            return;
        }

        let reply = match operation {
            Operation::ServerPing => Command::response_json(seq, operation, &PingInfo {
                timestamp: unix_millis(),
            }),
            Operation::WhoAreYou => Command::response_json(seq, operation, &self.config.auth),
            Operation::SystemInfo => Command::response_json(
                seq,
                operation,
                &ClientSystemInfo::current(self.current_bandwidth),
            ),
            Operation::ServerChatMessage => {
                match request.args().first().map(|body| serde_json::from_str::<ChatMessage>(body)) {
                    Some(Ok(msg)) => {
                        self.emit(InnerEvent::ChatMessage(msg));
                        Ok(Command::response_ok(seq, operation, None))
                    }
                    Some(Err(e)) => Ok(Command::response_fail(seq, operation, e.to_string())),
                    None => Ok(Command::response_fail(seq, operation, "missing chat message")),
                }
            }
            _ => Ok(Command::response_fail(seq, operation, "unsupported request")),
        };

        match reply {
            Ok(reply) => {
                debug!(seq, %operation, "answering server request");
                self.send_command(&reply);
            }
            Err(e) => error!(seq, %operation, error = %e, "could not build reply"),
        }
    }

    // ── Outbound path ────────────────────────────────────────────

    fn flush(&mut self, client: ClientId) {
        while let Some(mut frame) = self.send_queue.pop_front() {
            match self.io.write(client, &frame) {
                Ok(n) if n == frame.len() => {}
                Ok(n) => {
                    frame.advance(n);
                    self.send_queue.push_front(frame);
                    self.io.request_write(client);
                    return;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    self.send_queue.push_front(frame);
                    self.io.request_write(client);
                    return;
                }
                Err(e) => {
                    self.teardown(DisconnectReason::Io(e.to_string()));
                    return;
                }
            }
        }
    }

    // ── Keepalive ────────────────────────────────────────────────

    fn on_ping_tick(&mut self, now: Instant) {
        // Ticks closer together than half a period are late duplicates.
        let min_gap = self.config.timing.ping_interval() / 2;
        if let Some(at) = self.last_ping_at {
            if now.saturating_duration_since(at) < min_gap {
                debug!(since = ?now.saturating_duration_since(at), "early keepalive tick ignored");
                return;
            }
        }

        let expired = self.correlator.expire(now);
        for e in &expired {
            warn!(seq = e.seq, operation = %e.operation, elapsed = ?e.elapsed, "request timed out");
        }
        // The previous ping must be answered before the next tick.
        let ping_outstanding = self
            .last_ping
            .is_some_and(|seq| self.correlator.is_pending(seq));
        if ping_outstanding || expired.iter().any(|e| e.operation == Operation::ClientPing) {
            self.teardown(DisconnectReason::PingTimeout);
            return;
        }

        match self.submit::<()>(Operation::ClientPing, Vec::new()) {
            Ok(pending) => {
                debug!(seq = pending.seq(), "keepalive ping sent");
                self.last_ping = Some(pending.seq());
                self.last_ping_at = Some(now);
            }
            Err(e) => warn!(error = %e, "could not send keepalive ping"),
        }
    }

    fn fail_probe(&mut self, failure: ProbeFailure) {
        self.emit(InnerEvent::ProbeFailed {
            host_type: failure.host_type,
            error: failure.error,
        });
    }

    fn record_probe(&mut self, report: ProbeReport) {
        if report.host_type == BandwidthHostType::MainServer {
            self.current_bandwidth = report.bandwidth;
        }
        self.emit(InnerEvent::BandwidthMeasured {
            host_type: report.host_type,
            bandwidth: report.bandwidth,
        });
    }
}

// ── Event-loop callbacks ─────────────────────────────────────────

impl<R: Reactor> LoopObserver for InnerHandler<R> {
    fn connected(&mut self, client: ClientId) {
        if self.inner == Some(client) {
            if let Err(e) = self.state.complete_connect() {
                warn!(error = %e, "unexpected connected event");
                return;
            }
            let id = self.io.create_timer(self.config.timing.ping_interval());
            self.ping_timer = Some(PingTimer { id });
            info!(%client, "inner connection established");
            self.emit(InnerEvent::Connected);
            if !self.send_queue.is_empty() {
                self.io.request_write(client);
            }
        } else if self.probes.on_probe_connected(client, Instant::now()) {
            debug!(%client, "bandwidth probe connected");
        } else {
            debug!(%client, "connected event for unknown client");
        }
    }

    fn connect_failed(&mut self, client: ClientId, error: io::Error) {
        if self.inner == Some(client) {
            error!(%client, %error, "inner connect failed");
            self.inner = None;
            self.teardown(DisconnectReason::ConnectFailed(error.to_string()));
        } else if let Some(failure) =
            self.probes.on_probe_connect_failed(&mut self.io, client, error)
        {
            self.fail_probe(failure);
        }
    }

    fn data_received(&mut self, client: ClientId) {
        if self.inner == Some(client) {
            self.on_inner_data(client);
        } else if self.probes.contains(client) {
            let outcome = self.probes.on_probe_data(&mut self.io, client, Instant::now());
            match outcome {
                Ok(Some(report)) => self.record_probe(report),
                Ok(None) => {}
                Err(failure) => self.fail_probe(failure),
            }
        }
    }

    fn ready_to_write(&mut self, client: ClientId) {
        if self.inner == Some(client) && self.state.is_connected() {
            self.flush(client);
        }
    }

    fn closed(&mut self, client: ClientId) {
        if self.inner == Some(client) {
            self.inner = None;
            self.teardown(DisconnectReason::PeerClosed);
        } else if let Some(report) =
            self.probes.on_probe_closed(&mut self.io, client, Instant::now())
        {
            self.record_probe(report);
        }
    }

    fn timer_fired(&mut self, timer: TimerId, now: Instant) {
        if self.ping_timer.is_some_and(|ping| ping.id == timer) {
            if self.state.is_connected() {
                self.on_ping_tick(now);
            }
            return;
        }
        // Probe deadlines fire whatever the inner connection is doing.
        match self.probes.on_deadline(&mut self.io, timer, now) {
            Some(Ok(report)) => self.record_probe(report),
            Some(Err(failure)) => {
                warn!(client = %failure.client, error = %failure.error, "bandwidth probe timed out");
                self.fail_probe(failure);
            }
            None => debug!(?timer, "stale timer"),
        }
    }
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
