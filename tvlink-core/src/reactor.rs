//! Event-loop capability and callback table.
//!
//! The handler never touches sockets or timers directly. It holds a
//! [`Reactor`] (what it may ask the loop to do) and implements
//! [`LoopObserver`] (what the loop tells it). All callbacks run on the
//! loop's single thread.

use std::fmt;
use std::io;
use std::time::{Duration, Instant};

use bytes::BytesMut;

/// Handle of one socket owned by the reactor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(pub u64);

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client#{}", self.0)
    }
}

/// Handle of one recurring timer owned by the reactor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(pub u64);

/// Socket and timer operations the event loop provides.
pub trait Reactor {
    /// Start a non-blocking connect toward `host` (`host:port`).
    ///
    /// Completion is reported later through [`LoopObserver::connected`] or
    /// [`LoopObserver::connect_failed`].
    fn connect(&mut self, host: &str) -> io::Result<ClientId>;

    /// Move whatever bytes are currently available into `buf`.
    ///
    /// Returns `Ok(0)` when nothing is buffered; never blocks.
    fn read(&mut self, client: ClientId, buf: &mut BytesMut) -> io::Result<usize>;

    /// Write as much of `data` as the socket accepts right now.
    fn write(&mut self, client: ClientId, data: &[u8]) -> io::Result<usize>;

    /// Ask for a [`LoopObserver::ready_to_write`] callback.
    fn request_write(&mut self, client: ClientId);

    /// Close and forget a socket. No `closed` callback follows.
    fn close(&mut self, client: ClientId);

    fn create_timer(&mut self, period: Duration) -> TimerId;

    fn remove_timer(&mut self, timer: TimerId);
}

/// Callbacks the event loop dispatches into.
pub trait LoopObserver {
    fn connected(&mut self, client: ClientId);

    fn connect_failed(&mut self, client: ClientId, error: io::Error);

    fn data_received(&mut self, client: ClientId);

    fn ready_to_write(&mut self, client: ClientId);

    /// The peer closed the socket or it failed.
    fn closed(&mut self, client: ClientId);

    fn timer_fired(&mut self, timer: TimerId, now: Instant);
}
