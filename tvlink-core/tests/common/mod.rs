#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::io;
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use tokio::sync::mpsc;

use tvlink_core::{
    AuthInfo, ClientId, Command, FrameCodec, InnerConfig, InnerEvent, InnerHandler, LoopObserver,
    Reactor, TimerId,
};

pub const INNER_HOST: &str = "inner.test:6317";

/// Reactor that records every request and serves scripted bytes.
#[derive(Default)]
pub struct MockReactor {
    next_client: u64,
    next_timer: u64,
    pub refuse_connect: bool,
    /// Cap on bytes accepted per `write` call.
    pub write_limit: Option<usize>,
    pub connects: Vec<(ClientId, String)>,
    pub inbound: HashMap<ClientId, VecDeque<Bytes>>,
    pub written: HashMap<ClientId, BytesMut>,
    pub write_requests: Vec<ClientId>,
    pub closed: Vec<ClientId>,
    pub timers: Vec<(TimerId, Duration)>,
    pub removed_timers: Vec<TimerId>,
}

impl MockReactor {
    pub fn push_inbound(&mut self, client: ClientId, data: impl Into<Bytes>) {
        self.inbound.entry(client).or_default().push_back(data.into());
    }

    pub fn take_written(&mut self, client: ClientId) -> BytesMut {
        self.written.remove(&client).unwrap_or_default()
    }
}

impl Reactor for MockReactor {
    fn connect(&mut self, host: &str) -> io::Result<ClientId> {
        if self.refuse_connect {
            return Err(io::Error::new(io::ErrorKind::ConnectionRefused, "refused"));
        }
        self.next_client += 1;
        let id = ClientId(self.next_client);
        self.connects.push((id, host.to_string()));
        Ok(id)
    }

    fn read(&mut self, client: ClientId, buf: &mut BytesMut) -> io::Result<usize> {
        match self.inbound.get_mut(&client).and_then(|q| q.pop_front()) {
            Some(chunk) => {
                buf.extend_from_slice(&chunk);
                Ok(chunk.len())
            }
            None => Ok(0),
        }
    }

    fn write(&mut self, client: ClientId, data: &[u8]) -> io::Result<usize> {
        let n = self.write_limit.map_or(data.len(), |limit| limit.min(data.len()));
        self.written
            .entry(client)
            .or_default()
            .extend_from_slice(&data[..n]);
        Ok(n)
    }

    fn request_write(&mut self, client: ClientId) {
        self.write_requests.push(client);
    }

    fn close(&mut self, client: ClientId) {
        self.closed.push(client);
    }

    fn create_timer(&mut self, period: Duration) -> TimerId {
        self.next_timer += 1;
        let id = TimerId(self.next_timer);
        self.timers.push((id, period));
        id
    }

    fn remove_timer(&mut self, timer: TimerId) {
        self.removed_timers.push(timer);
    }
}

// ── Harness ──────────────────────────────────────────────────────

pub struct Harness {
    pub handler: InnerHandler<MockReactor>,
    pub events: mpsc::UnboundedReceiver<InnerEvent>,
    pub codec: FrameCodec,
}

pub fn test_config() -> InnerConfig {
    InnerConfig::new(INNER_HOST, AuthInfo::new("alice", "secret", "device-1"))
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: InnerConfig) -> Self {
        let (tx, events) = mpsc::unbounded_channel();
        let codec = FrameCodec::new(config.limits.max_frame_size);
        Self {
            handler: InnerHandler::new(config, MockReactor::default(), tx),
            events,
            codec,
        }
    }

    /// A handler whose inner connection is already up.
    pub fn connected() -> Self {
        let mut h = Self::new();
        h.connect();
        h.drain_events();
        h
    }

    pub fn connect(&mut self) {
        self.handler.connect().unwrap();
        let inner = self.inner();
        self.handler.connected(inner);
    }

    pub fn inner(&self) -> ClientId {
        self.handler.inner_client().expect("inner connection")
    }

    pub fn io(&mut self) -> &mut MockReactor {
        self.handler.reactor_mut()
    }

    /// Deliver raw bytes on the inner connection.
    pub fn feed(&mut self, data: &[u8]) {
        let inner = self.inner();
        self.io().push_inbound(inner, Bytes::copy_from_slice(data));
        self.handler.data_received(inner);
    }

    pub fn frame(&self, command: &Command) -> Bytes {
        self.codec.encode(command.to_text().as_bytes()).unwrap()
    }

    pub fn feed_command(&mut self, command: &Command) {
        let frame = self.frame(command);
        self.feed(&frame);
    }

    /// Let the handler write, then decode everything it sent.
    pub fn sent(&mut self) -> Vec<Command> {
        let inner = self.inner();
        self.handler.ready_to_write(inner);
        let mut written = self.io().take_written(inner);
        let mut out = Vec::new();
        while let Some(frame) = self.codec.try_decode(&mut written).unwrap() {
            out.push(Command::parse(frame.payload()).unwrap());
        }
        assert!(written.is_empty(), "trailing partial frame");
        out
    }

    pub fn tick(&mut self, now: Instant) {
        let timer = self.handler.ping_timer().expect("ping timer").id();
        self.handler.timer_fired(timer, now);
    }

    pub fn drain_events(&mut self) -> Vec<InnerEvent> {
        let mut out = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            out.push(event);
        }
        out
    }
}
