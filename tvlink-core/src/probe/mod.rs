//! Bandwidth probe manager.
//!
//! A probe is a short-lived auxiliary TCP connection, separate from the
//! inner connection, that only receives data so its throughput can be
//! measured. Each probe lives for one measurement round:
//!
//! ```text
//! start_probe ──► connected ──► data... ──► target bytes / max duration
//!                                              │
//!      closed by peer / connect failure ───────┴──► removed + reported
//! ```
//!
//! The collection is keyed by the reactor's [`ClientId`]. Each probe also
//! owns a deadline timer armed for `max_duration`; every exit path removes
//! both the entry and its timer, so no handle outlives its socket and a
//! silent probe never outlives its round.

pub mod meter;

use std::collections::HashMap;
use std::time::{Duration, Instant};

use bytes::BytesMut;
use tracing::{debug, info, warn};

use crate::error::InnerError;
use crate::info::Bandwidth;
use crate::reactor::{ClientId, Reactor, TimerId};

pub use meter::ThroughputMeter;

/// Which kind of server a probe measures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BandwidthHostType {
    MainServer,
    ChannelServer,
}

/// When a measurement round ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeSettings {
    pub target_bytes: u64,
    pub max_duration: Duration,
}

/// One finished measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeReport {
    pub client: ClientId,
    pub host_type: BandwidthHostType,
    pub bandwidth: Bandwidth,
    pub bytes: u64,
}

/// A probe that could not produce a measurement.
#[derive(Debug)]
pub struct ProbeFailure {
    pub client: ClientId,
    pub host_type: BandwidthHostType,
    pub error: InnerError,
}

// ── BandwidthProbe ───────────────────────────────────────────────

pub struct BandwidthProbe {
    host: String,
    host_type: BandwidthHostType,
    deadline: TimerId,
    connected: bool,
    meter: ThroughputMeter,
}

impl BandwidthProbe {
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn host_type(&self) -> BandwidthHostType {
        self.host_type
    }

    /// Timer that ends the round if the target is never reached.
    pub fn deadline(&self) -> TimerId {
        self.deadline
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn bytes_received(&self) -> u64 {
        self.meter.total_bytes()
    }
}

// ── ProbeManager ─────────────────────────────────────────────────

pub struct ProbeManager {
    probes: HashMap<ClientId, BandwidthProbe>,
    deadlines: HashMap<TimerId, ClientId>,
    settings: ProbeSettings,
    scratch: BytesMut,
}

impl ProbeManager {
    pub fn new(settings: ProbeSettings) -> Self {
        Self {
            probes: HashMap::new(),
            deadlines: HashMap::new(),
            settings,
            scratch: BytesMut::with_capacity(64 * 1024),
        }
    }

    /// Open an auxiliary connection toward `host`, arm its deadline and
    /// start tracking it.
    pub fn start_probe<R: Reactor>(
        &mut self,
        io: &mut R,
        host: &str,
        host_type: BandwidthHostType,
        now: Instant,
    ) -> Result<ClientId, InnerError> {
        let client = io.connect(host).map_err(|source| InnerError::ProbeConnect {
            host: host.to_string(),
            source,
        })?;
        let deadline = io.create_timer(self.settings.max_duration);
        debug!(%client, host, ?host_type, ?deadline, "bandwidth probe started");
        self.deadlines.insert(deadline, client);
        self.probes.insert(
            client,
            BandwidthProbe {
                host: host.to_string(),
                host_type,
                deadline,
                connected: false,
                meter: ThroughputMeter::new(now),
            },
        );
        Ok(client)
    }

    pub fn on_probe_connected(&mut self, client: ClientId, now: Instant) -> bool {
        match self.probes.get_mut(&client) {
            Some(probe) => {
                probe.connected = true;
                probe.meter.restart(now);
                true
            }
            None => false,
        }
    }

    /// Drain readable bytes and finish the round once it has enough data.
    pub fn on_probe_data<R: Reactor>(
        &mut self,
        io: &mut R,
        client: ClientId,
        now: Instant,
    ) -> Result<Option<ProbeReport>, ProbeFailure> {
        let Some(probe) = self.probes.get_mut(&client) else {
            return Ok(None);
        };

        loop {
            self.scratch.clear();
            match io.read(client, &mut self.scratch) {
                Ok(0) => break,
                Ok(n) => probe.meter.record_at(now, n as u64),
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    let host_type = probe.host_type;
                    io.close(client);
                    return match self.on_probe_closed(io, client, now) {
                        Some(report) => Ok(Some(report)),
                        None => Err(ProbeFailure {
                            client,
                            host_type,
                            error: InnerError::Io(e),
                        }),
                    };
                }
            }
        }

        let done = probe.meter.total_bytes() >= self.settings.target_bytes
            || probe.meter.elapsed(now) >= self.settings.max_duration;
        if !done {
            return Ok(None);
        }

        let bandwidth = probe.meter.average_bps(now);
        debug!(%client, recent = probe.meter.recent_bps(), "probe round finished");
        io.close(client);
        Ok(self.on_probe_complete(io, client, bandwidth))
    }

    /// Remove a probe and report its measurement.
    pub fn on_probe_complete<R: Reactor>(
        &mut self,
        io: &mut R,
        client: ClientId,
        bandwidth: Bandwidth,
    ) -> Option<ProbeReport> {
        let probe = self.release(io, client)?;
        info!(
            host = %probe.host,
            host_type = ?probe.host_type,
            bandwidth,
            "bandwidth measured"
        );
        Some(ProbeReport {
            client,
            host_type: probe.host_type,
            bandwidth,
            bytes: probe.meter.total_bytes(),
        })
    }

    /// Cleanup path for a probe whose socket is gone, normal or not.
    ///
    /// A probe that already received data still reports what it measured.
    pub fn on_probe_closed<R: Reactor>(
        &mut self,
        io: &mut R,
        client: ClientId,
        now: Instant,
    ) -> Option<ProbeReport> {
        let probe = self.probes.get(&client)?;
        if probe.meter.total_bytes() > 0 {
            let bandwidth = probe.meter.average_bps(now);
            return self.on_probe_complete(io, client, bandwidth);
        }
        if let Some(probe) = self.release(io, client) {
            warn!(host = %probe.host, "bandwidth probe closed before any data");
        }
        None
    }

    pub fn on_probe_connect_failed<R: Reactor>(
        &mut self,
        io: &mut R,
        client: ClientId,
        error: std::io::Error,
    ) -> Option<ProbeFailure> {
        let probe = self.release(io, client)?;
        warn!(host = %probe.host, %error, "bandwidth probe could not connect");
        Some(ProbeFailure {
            client,
            host_type: probe.host_type,
            error: InnerError::ProbeConnect {
                host: probe.host,
                source: error,
            },
        })
    }

    /// Whether `timer` is the deadline of a live probe.
    pub fn owns_timer(&self, timer: TimerId) -> bool {
        self.deadlines.contains_key(&timer)
    }

    /// End the round of the probe whose deadline fired.
    ///
    /// Returns `None` when `timer` belongs to no live probe. A probe that
    /// received data reports it; a silent one fails with `TimedOut`.
    pub fn on_deadline<R: Reactor>(
        &mut self,
        io: &mut R,
        timer: TimerId,
        now: Instant,
    ) -> Option<Result<ProbeReport, ProbeFailure>> {
        let client = *self.deadlines.get(&timer)?;
        let (host, host_type) = match self.probes.get(&client) {
            Some(probe) => (probe.host.clone(), probe.host_type),
            None => {
                self.deadlines.remove(&timer);
                io.remove_timer(timer);
                return None;
            }
        };

        io.close(client);
        Some(match self.on_probe_closed(io, client, now) {
            Some(report) => Ok(report),
            None => Err(ProbeFailure {
                client,
                host_type,
                error: InnerError::ProbeConnect {
                    host,
                    source: std::io::Error::new(
                        std::io::ErrorKind::TimedOut,
                        "no data before probe deadline",
                    ),
                },
            }),
        })
    }

    fn release<R: Reactor>(&mut self, io: &mut R, client: ClientId) -> Option<BandwidthProbe> {
        let probe = self.probes.remove(&client)?;
        self.deadlines.remove(&probe.deadline);
        io.remove_timer(probe.deadline);
        Some(probe)
    }

    pub fn contains(&self, client: ClientId) -> bool {
        self.probes.contains_key(&client)
    }

    pub fn get(&self, client: ClientId) -> Option<&BandwidthProbe> {
        self.probes.get(&client)
    }

    pub fn len(&self) -> usize {
        self.probes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.probes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::io;

    #[derive(Default)]
    struct FakeIo {
        next: u64,
        refuse: bool,
        incoming: VecDeque<usize>,
        closed: Vec<ClientId>,
        timers: Vec<TimerId>,
        removed: Vec<TimerId>,
    }

    impl Reactor for FakeIo {
        fn connect(&mut self, _host: &str) -> io::Result<ClientId> {
            if self.refuse {
                return Err(io::Error::new(io::ErrorKind::ConnectionRefused, "refused"));
            }
            self.next += 1;
            Ok(ClientId(self.next))
        }

        fn read(&mut self, _client: ClientId, buf: &mut BytesMut) -> io::Result<usize> {
            match self.incoming.pop_front() {
                Some(n) => {
                    buf.extend_from_slice(&vec![0u8; n]);
                    Ok(n)
                }
                None => Ok(0),
            }
        }

        fn write(&mut self, _client: ClientId, data: &[u8]) -> io::Result<usize> {
            Ok(data.len())
        }

        fn request_write(&mut self, _client: ClientId) {}

        fn close(&mut self, client: ClientId) {
            self.closed.push(client);
        }

        fn create_timer(&mut self, _period: Duration) -> TimerId {
            let id = TimerId(100 + self.timers.len() as u64);
            self.timers.push(id);
            id
        }

        fn remove_timer(&mut self, timer: TimerId) {
            self.removed.push(timer);
        }
    }

    fn manager() -> ProbeManager {
        ProbeManager::new(ProbeSettings {
            target_bytes: 1000,
            max_duration: Duration::from_secs(3),
        })
    }

    #[test]
    fn completes_at_target_bytes() {
        let mut io = FakeIo::default();
        let mut probes = manager();
        let t0 = Instant::now();

        let id = probes
            .start_probe(&mut io, "bw.example:9000", BandwidthHostType::MainServer, t0)
            .unwrap();
        assert!(probes.on_probe_connected(id, t0));
        let deadline = probes.get(id).unwrap().deadline();
        assert!(probes.owns_timer(deadline));

        io.incoming.extend([400, 200]);
        let partial = probes.on_probe_data(&mut io, id, t0 + Duration::from_millis(100));
        assert!(matches!(partial, Ok(None)));
        assert_eq!(probes.get(id).unwrap().bytes_received(), 600);

        io.incoming.push_back(400);
        let report = probes
            .on_probe_data(&mut io, id, t0 + Duration::from_millis(500))
            .unwrap()
            .expect("round should finish");
        assert_eq!(report.host_type, BandwidthHostType::MainServer);
        assert_eq!(report.bytes, 1000);
        assert_eq!(report.bandwidth, 2000);
        assert_eq!(io.closed, vec![id]);
        assert_eq!(io.removed, vec![deadline]);
        assert!(!probes.owns_timer(deadline));
        assert!(probes.is_empty());
    }

    #[test]
    fn closed_before_data_reports_nothing() {
        let mut io = FakeIo::default();
        let mut probes = manager();
        let t0 = Instant::now();
        let id = probes
            .start_probe(&mut io, "bw:1", BandwidthHostType::ChannelServer, t0)
            .unwrap();

        assert!(probes.on_probe_closed(&mut io, id, t0).is_none());
        assert!(!probes.contains(id));
        assert_eq!(io.removed, io.timers);
    }

    #[test]
    fn closed_after_data_still_reports() {
        let mut io = FakeIo::default();
        let mut probes = manager();
        let t0 = Instant::now();
        let id = probes
            .start_probe(&mut io, "bw:1", BandwidthHostType::MainServer, t0)
            .unwrap();
        probes.on_probe_connected(id, t0);
        io.incoming.push_back(100);
        probes.on_probe_data(&mut io, id, t0).unwrap();

        let report = probes
            .on_probe_closed(&mut io, id, t0 + Duration::from_secs(1))
            .unwrap();
        assert_eq!(report.bandwidth, 100);
        assert!(probes.is_empty());
    }

    #[test]
    fn refused_connect_is_probe_error() {
        let mut io = FakeIo {
            refuse: true,
            ..Default::default()
        };
        let mut probes = manager();
        let err = probes
            .start_probe(&mut io, "bw:1", BandwidthHostType::MainServer, Instant::now())
            .unwrap_err();
        assert!(matches!(err, InnerError::ProbeConnect { ref host, .. } if host == "bw:1"));
        assert!(probes.is_empty());
        assert!(io.timers.is_empty());
    }

    #[test]
    fn async_connect_failure_removes_probe() {
        let mut io = FakeIo::default();
        let mut probes = manager();
        let id = probes
            .start_probe(&mut io, "bw:1", BandwidthHostType::MainServer, Instant::now())
            .unwrap();
        let failure = probes
            .on_probe_connect_failed(&mut io, id, io::Error::new(io::ErrorKind::TimedOut, "slow"))
            .unwrap();
        assert_eq!(failure.client, id);
        assert_eq!(io.removed, io.timers);
        assert!(probes
            .on_probe_connect_failed(&mut io, id, io::ErrorKind::Other.into())
            .is_none());
    }

    #[test]
    fn deadline_closes_only_its_own_probe() {
        let mut io = FakeIo::default();
        let mut probes = manager();
        let t0 = Instant::now();
        let silent = probes
            .start_probe(&mut io, "bw:1", BandwidthHostType::MainServer, t0)
            .unwrap();
        let fresh = probes
            .start_probe(&mut io, "bw:2", BandwidthHostType::MainServer, t0 + Duration::from_secs(2))
            .unwrap();
        let deadline = probes.get(silent).unwrap().deadline();

        let failure = probes
            .on_deadline(&mut io, deadline, t0 + Duration::from_secs(3))
            .expect("deadline of a live measurement")
            .unwrap_err();
        assert_eq!(failure.client, silent);
        assert!(matches!(
            failure.error,
            InnerError::ProbeConnect { ref source, .. } if source.kind() == io::ErrorKind::TimedOut
        ));
        assert_eq!(io.closed, vec![silent]);
        assert_eq!(io.removed, vec![deadline]);
        assert!(probes.contains(fresh));

        // A tick already queued for the removed timer is ignored.
        assert!(probes.on_deadline(&mut io, deadline, t0 + Duration::from_secs(4)).is_none());
    }

    #[test]
    fn deadline_reports_partial_measurement() {
        let mut io = FakeIo::default();
        let mut probes = manager();
        let t0 = Instant::now();
        let id = probes
            .start_probe(&mut io, "bw:1", BandwidthHostType::MainServer, t0)
            .unwrap();
        probes.on_probe_connected(id, t0);
        io.incoming.push_back(300);
        probes.on_probe_data(&mut io, id, t0 + Duration::from_secs(1)).unwrap();

        let deadline = probes.get(id).unwrap().deadline();
        let report = probes
            .on_deadline(&mut io, deadline, t0 + Duration::from_secs(3))
            .unwrap()
            .unwrap();
        assert_eq!(report.bytes, 300);
        assert_eq!(report.bandwidth, 100);
        assert!(probes.is_empty());
    }
}
