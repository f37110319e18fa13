use std::collections::HashMap;
use std::io;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, trace};

use crate::reactor::{ClientId, Reactor, TimerId};

const READ_CHUNK: usize = 16 * 1024;
const MIN_TIMER_PERIOD: Duration = Duration::from_millis(1);

/// Something that happened on a socket or timer task.
#[derive(Debug)]
pub enum LoopEvent {
    Connected(ClientId),
    ConnectFailed(ClientId, io::Error),
    Data(ClientId, Bytes),
    Writable(ClientId),
    Closed(ClientId),
    Timer(TimerId),
}

pub type LoopEventSender = mpsc::UnboundedSender<LoopEvent>;

struct Socket {
    writer: mpsc::UnboundedSender<Bytes>,
    inbound: BytesMut,
    task: JoinHandle<()>,
}

/// [`Reactor`] backed by tokio sockets and interval tasks.
///
/// Every socket gets one task that connects, then multiplexes reads and
/// queued writes. All tasks report into one [`LoopEvent`] queue drained by
/// the event loop.
pub struct TokioReactor {
    next_client: u64,
    next_timer: u64,
    sockets: HashMap<ClientId, Socket>,
    timers: HashMap<TimerId, JoinHandle<()>>,
    events: LoopEventSender,
    connect_timeout: Duration,
}

impl TokioReactor {
    pub fn new(events: LoopEventSender, connect_timeout: Duration) -> Self {
        Self {
            next_client: 1,
            next_timer: 1,
            sockets: HashMap::new(),
            timers: HashMap::new(),
            events,
            connect_timeout,
        }
    }

    pub fn is_open(&self, client: ClientId) -> bool {
        self.sockets.contains_key(&client)
    }

    pub fn has_timer(&self, timer: TimerId) -> bool {
        self.timers.contains_key(&timer)
    }

    /// Buffer bytes the socket task delivered until the observer reads them.
    pub fn stash(&mut self, client: ClientId, data: Bytes) -> bool {
        match self.sockets.get_mut(&client) {
            Some(socket) => {
                socket.inbound.extend_from_slice(&data);
                true
            }
            None => false,
        }
    }

    /// Drop a socket the peer already closed. Returns whether it was known.
    pub fn forget(&mut self, client: ClientId) -> bool {
        self.sockets.remove(&client).is_some()
    }

    pub fn shutdown(&mut self) {
        for (_, socket) in self.sockets.drain() {
            socket.task.abort();
        }
        for (_, timer) in self.timers.drain() {
            timer.abort();
        }
    }
}

impl Reactor for TokioReactor {
    fn connect(&mut self, host: &str) -> io::Result<ClientId> {
        if host.is_empty() {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "empty host"));
        }
        let id = ClientId(self.next_client);
        self.next_client += 1;

        let (writer, outbound) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_socket(
            id,
            host.to_string(),
            self.connect_timeout,
            outbound,
            self.events.clone(),
        ));
        self.sockets.insert(
            id,
            Socket {
                writer,
                inbound: BytesMut::new(),
                task,
            },
        );
        Ok(id)
    }

    fn read(&mut self, client: ClientId, buf: &mut BytesMut) -> io::Result<usize> {
        let socket = self
            .sockets
            .get_mut(&client)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "unknown socket"))?;
        let n = socket.inbound.len();
        buf.extend_from_slice(&socket.inbound);
        socket.inbound.clear();
        Ok(n)
    }

    fn write(&mut self, client: ClientId, data: &[u8]) -> io::Result<usize> {
        let socket = self
            .sockets
            .get(&client)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "unknown socket"))?;
        socket
            .writer
            .send(Bytes::copy_from_slice(data))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "socket task ended"))?;
        Ok(data.len())
    }

    fn request_write(&mut self, client: ClientId) {
        let _ = self.events.send(LoopEvent::Writable(client));
    }

    fn close(&mut self, client: ClientId) {
        if let Some(socket) = self.sockets.remove(&client) {
            socket.task.abort();
            debug!(%client, "socket closed locally");
        }
    }

    fn create_timer(&mut self, period: Duration) -> TimerId {
        let id = TimerId(self.next_timer);
        self.next_timer += 1;

        let period = period.max(MIN_TIMER_PERIOD);
        let events = self.events.clone();
        let handle = tokio::spawn(async move {
            let start = tokio::time::Instant::now() + period;
            let mut interval = tokio::time::interval_at(start, period);
            // A stalled loop gets one late tick, never a burst of them.
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                if events.send(LoopEvent::Timer(id)).is_err() {
                    break;
                }
            }
        });
        self.timers.insert(id, handle);
        id
    }

    fn remove_timer(&mut self, timer: TimerId) {
        if let Some(handle) = self.timers.remove(&timer) {
            handle.abort();
        }
    }
}

impl Drop for TokioReactor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ── Socket task ──────────────────────────────────────────────────

async fn run_socket(
    id: ClientId,
    host: String,
    connect_timeout: Duration,
    mut outbound: mpsc::UnboundedReceiver<Bytes>,
    events: LoopEventSender,
) {
    let stream = match tokio::time::timeout(connect_timeout, TcpStream::connect(&host)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            let _ = events.send(LoopEvent::ConnectFailed(id, e));
            return;
        }
        Err(_) => {
            let e = io::Error::new(io::ErrorKind::TimedOut, format!("connect to {host} timed out"));
            let _ = events.send(LoopEvent::ConnectFailed(id, e));
            return;
        }
    };
    let _ = stream.set_nodelay(true);
    if events.send(LoopEvent::Connected(id)).is_err() {
        return;
    }

    let (mut reader, mut writer) = stream.into_split();
    let mut buf = BytesMut::with_capacity(READ_CHUNK);
    loop {
        buf.reserve(READ_CHUNK);
        tokio::select! {
            read = reader.read_buf(&mut buf) => match read {
                Ok(0) => break,
                Ok(n) => {
                    trace!(client = %id, n, "read");
                    if events.send(LoopEvent::Data(id, buf.split().freeze())).is_err() {
                        return;
                    }
                }
                Err(e) => {
                    debug!(client = %id, error = %e, "socket read failed");
                    break;
                }
            },
            out = outbound.recv() => match out {
                Some(data) => {
                    if let Err(e) = writer.write_all(&data).await {
                        debug!(client = %id, error = %e, "socket write failed");
                        break;
                    }
                }
                // The reactor forgot this socket.
                None => return,
            },
        }
    }
    let _ = events.send(LoopEvent::Closed(id));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain_ticks(rx: &mut mpsc::UnboundedReceiver<LoopEvent>, timer: TimerId) -> usize {
        let mut ticks = 0;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, LoopEvent::Timer(id) if id == timer) {
                ticks += 1;
            }
        }
        ticks
    }

    async fn settle() {
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_timer_ticks_once() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut reactor = TokioReactor::new(tx, Duration::from_secs(1));
        let timer = reactor.create_timer(Duration::from_secs(30));
        settle().await;

        // Three periods pass without the loop draining anything.
        tokio::time::advance(Duration::from_secs(95)).await;
        settle().await;
        assert_eq!(drain_ticks(&mut rx, timer), 1);

        // The next tick is a full period after the late one.
        tokio::time::advance(Duration::from_secs(29)).await;
        settle().await;
        assert_eq!(drain_ticks(&mut rx, timer), 0);
        tokio::time::advance(Duration::from_secs(1)).await;
        settle().await;
        assert_eq!(drain_ticks(&mut rx, timer), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn removed_timer_stops_ticking() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut reactor = TokioReactor::new(tx, Duration::from_secs(1));
        let timer = reactor.create_timer(Duration::from_secs(1));
        settle().await;
        assert!(reactor.has_timer(timer));

        reactor.remove_timer(timer);
        assert!(!reactor.has_timer(timer));
        tokio::time::advance(Duration::from_secs(5)).await;
        settle().await;
        assert_eq!(drain_ticks(&mut rx, timer), 0);
    }
}
