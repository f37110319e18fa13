//! Handshake correlator: pending-request tracking by sequence id.
//!
//! Every locally initiated operation is a three-phase exchange:
//!
//! ```text
//! Client ──[Request  seq=N]──► Server     pending entry created
//! Client ◄─[Response seq=N]─── Server     resolved, or kept if approve required
//! Client ◄─[Approve  seq=N]─── Server     resolved ("acknowledged")
//! ```
//!
//! Each [`PendingRequest`] owns the sending half of a oneshot channel and is
//! consumed when it resolves, so a request can resolve at most once.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::command::{Command, CommandKind, Operation, ReplyStatus, SeqId};
use crate::error::InnerError;

/// What a caller eventually receives: the server's `Response`, or why none
/// will come.
pub type Resolution = Result<Command, InnerError>;

/// Receiving end of a pending request's completion slot.
pub type CompletionRx = oneshot::Receiver<Resolution>;

// ── RequestPolicy ────────────────────────────────────────────────

/// Deadlines applied to one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestPolicy {
    /// Time allowed between sending the request and its `Response`.
    pub response_timeout: Duration,
    /// Time allowed between the `Response` and its `Approve`.
    /// `None` when the operation completes on the `Response`.
    pub approve_timeout: Option<Duration>,
}

// ── PendingRequest ───────────────────────────────────────────────

/// Phase a pending request is waiting in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Awaiting {
    Response,
    Approve,
}

/// An outstanding request awaiting resolution.
#[derive(Debug)]
pub struct PendingRequest {
    seq: SeqId,
    operation: Operation,
    issued_at: Instant,
    deadline: Instant,
    awaiting: Awaiting,
    policy: RequestPolicy,
    /// Response kept while the approve is outstanding.
    response: Option<Command>,
    completion: oneshot::Sender<Resolution>,
}

impl PendingRequest {
    pub fn seq(&self) -> SeqId {
        self.seq
    }

    pub fn operation(&self) -> Operation {
        self.operation
    }

    pub fn issued_at(&self) -> Instant {
        self.issued_at
    }

    pub fn awaiting(&self) -> Awaiting {
        self.awaiting
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.deadline
    }

    fn resolve(self, resolution: Resolution) {
        // The caller may have dropped its receiver; nothing to do then.
        let _ = self.completion.send(resolution);
    }
}

// ── Correlation ──────────────────────────────────────────────────

/// What happened to an incoming `Response`/`Approve`.
#[derive(Debug)]
pub enum Correlation {
    /// The request resolved successfully; the caller got `response`.
    Completed {
        operation: Operation,
        response: Command,
    },
    /// A `Response` arrived; the entry now waits for its `Approve`.
    AwaitingApprove { operation: Operation },
    /// The server answered with a failure status.
    Rejected { operation: Operation, reason: String },
    /// No pending request matches: unsolicited or stale.
    Unmatched(Command),
}

/// A request removed by [`Correlator::expire`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Expired {
    pub seq: SeqId,
    pub operation: Operation,
    pub elapsed: Duration,
}

// ── Correlator ───────────────────────────────────────────────────

/// Tracks outstanding requests for one inner connection.
#[derive(Debug, Default)]
pub struct Correlator {
    pending: HashMap<SeqId, PendingRequest>,
}

impl Correlator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `request` as pending and hand back its completion slot.
    pub fn submit(
        &mut self,
        request: &Command,
        policy: RequestPolicy,
        now: Instant,
    ) -> Result<CompletionRx, InnerError> {
        if request.kind() != CommandKind::Request {
            return Err(InnerError::MalformedCommand(format!(
                "only requests can be submitted, got {}",
                request.verb()
            )));
        }

        let (tx, rx) = oneshot::channel();
        let entry = PendingRequest {
            seq: request.seq(),
            operation: request.operation(),
            issued_at: now,
            deadline: now + policy.response_timeout,
            awaiting: Awaiting::Response,
            policy,
            response: None,
            completion: tx,
        };

        if let Some(stale) = self.pending.insert(request.seq(), entry) {
            warn!(seq = stale.seq, "sequence id reused while still pending");
            stale.resolve(Err(InnerError::Cancelled));
        }
        Ok(rx)
    }

    /// Route an incoming `Response` or `Approve` to its pending request.
    pub fn on_command_received(&mut self, command: Command, now: Instant) -> Correlation {
        let matches = self
            .pending
            .get(&command.seq())
            .is_some_and(|p| p.operation == command.operation());
        if !matches || command.kind() == CommandKind::Request {
            return Correlation::Unmatched(command);
        }

        let Some(mut entry) = self.pending.remove(&command.seq()) else {
            return Correlation::Unmatched(command);
        };
        let operation = entry.operation;

        match (command.kind(), entry.awaiting) {
            (CommandKind::Response, Awaiting::Response) => {
                if let ReplyStatus::Fail(reason) = command.status() {
                    entry.resolve(Err(InnerError::Rejected {
                        operation,
                        reason: reason.clone(),
                    }));
                    return Correlation::Rejected { operation, reason };
                }

                match entry.policy.approve_timeout {
                    Some(approve_timeout) => {
                        debug!(seq = entry.seq, %operation, "response received, awaiting approve");
                        entry.awaiting = Awaiting::Approve;
                        entry.deadline = now + approve_timeout;
                        entry.response = Some(command);
                        self.pending.insert(entry.seq, entry);
                        Correlation::AwaitingApprove { operation }
                    }
                    None => {
                        entry.resolve(Ok(command.clone()));
                        Correlation::Completed {
                            operation,
                            response: command,
                        }
                    }
                }
            }
            (CommandKind::Approve, Awaiting::Approve) => {
                let response = entry.response.take().unwrap_or_else(|| command.clone());
                entry.resolve(Ok(response.clone()));
                Correlation::Completed {
                    operation,
                    response,
                }
            }
            // Approve before response, or a duplicate response: not ours.
            _ => {
                self.pending.insert(entry.seq, entry);
                Correlation::Unmatched(command)
            }
        }
    }

    /// Resolve every request whose deadline has passed as a timeout.
    pub fn expire(&mut self, now: Instant) -> Vec<Expired> {
        let ids: Vec<SeqId> = self
            .pending
            .iter()
            .filter(|(_, p)| p.is_expired(now))
            .map(|(&id, _)| id)
            .collect();

        let mut expired = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(entry) = self.pending.remove(&id) {
                let elapsed = now.saturating_duration_since(entry.issued_at);
                expired.push(Expired {
                    seq: id,
                    operation: entry.operation,
                    elapsed,
                });
                let operation = entry.operation;
                entry.resolve(Err(InnerError::RequestTimeout { operation, elapsed }));
            }
        }
        expired.sort_by_key(|e| e.seq);
        expired
    }

    /// Resolve one request as cancelled by its caller.
    pub fn cancel(&mut self, seq: SeqId) -> bool {
        match self.pending.remove(&seq) {
            Some(entry) => {
                entry.resolve(Err(InnerError::Cancelled));
                true
            }
            None => false,
        }
    }

    /// Fail every pending request with `reason` and clear the table.
    pub fn cancel_all(&mut self, reason: &str) -> usize {
        let count = self.pending.len();
        for (_, entry) in self.pending.drain() {
            entry.resolve(Err(InnerError::ConnectionClosed(reason.to_string())));
        }
        count
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn is_pending(&self, seq: SeqId) -> bool {
        self.pending.contains_key(&seq)
    }

    pub fn get(&self, seq: SeqId) -> Option<&PendingRequest> {
        self.pending.get(&seq)
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const FETCH: RequestPolicy = RequestPolicy {
        response_timeout: Duration::from_secs(10),
        approve_timeout: None,
    };
    const CONFIRMED: RequestPolicy = RequestPolicy {
        response_timeout: Duration::from_secs(10),
        approve_timeout: Some(Duration::from_secs(5)),
    };

    fn request(seq: SeqId, op: Operation) -> Command {
        Command::request(seq, op, vec![])
    }

    #[test]
    fn response_resolves_fetch_request() {
        let mut c = Correlator::new();
        let now = Instant::now();
        let mut rx = c.submit(&request(1, Operation::Channels), FETCH, now).unwrap();

        let resp = Command::response_ok(1, Operation::Channels, Some("{}".into()));
        let out = c.on_command_received(resp.clone(), now);
        assert!(matches!(out, Correlation::Completed { operation: Operation::Channels, .. }));
        assert_eq!(c.pending_count(), 0);
        assert_eq!(rx.try_recv().unwrap().unwrap(), resp);
    }

    #[test]
    fn approve_required_keeps_entry_after_response() {
        let mut c = Correlator::new();
        let now = Instant::now();
        let mut rx = c
            .submit(&request(7, Operation::ChatMessagePost), CONFIRMED, now)
            .unwrap();

        let resp = Command::response_ok(7, Operation::ChatMessagePost, None);
        assert!(matches!(
            c.on_command_received(resp.clone(), now),
            Correlation::AwaitingApprove { .. }
        ));
        assert!(c.is_pending(7));
        assert_eq!(c.get(7).unwrap().awaiting(), Awaiting::Approve);
        assert!(rx.try_recv().is_err());

        let out = c.on_command_received(Command::approve(7, Operation::ChatMessagePost), now);
        assert!(matches!(out, Correlation::Completed { .. }));
        assert!(!c.is_pending(7));
        assert_eq!(rx.try_recv().unwrap().unwrap(), resp);
    }

    #[test]
    fn failure_status_rejects_even_when_approve_required() {
        let mut c = Correlator::new();
        let now = Instant::now();
        let mut rx = c
            .submit(&request(2, Operation::ChatMessagePost), CONFIRMED, now)
            .unwrap();

        let out = c.on_command_received(
            Command::response_fail(2, Operation::ChatMessagePost, "chat disabled"),
            now,
        );
        assert!(matches!(out, Correlation::Rejected { ref reason, .. } if reason == "chat disabled"));
        assert_eq!(c.pending_count(), 0);
        assert!(matches!(rx.try_recv().unwrap(), Err(InnerError::Rejected { .. })));
    }

    #[test]
    fn unknown_or_mismatched_ids_are_unmatched() {
        let mut c = Correlator::new();
        let now = Instant::now();
        c.submit(&request(3, Operation::ServerInfo), FETCH, now).unwrap();

        let stray = Command::response_ok(99, Operation::ServerInfo, None);
        assert!(matches!(c.on_command_received(stray, now), Correlation::Unmatched(_)));

        // Same id, different operation: the server's own id space.
        let other = Command::approve(3, Operation::WhoAreYou);
        assert!(matches!(c.on_command_received(other, now), Correlation::Unmatched(_)));

        // Approve before response is not accepted either.
        let early = Command::approve(3, Operation::ServerInfo);
        assert!(matches!(c.on_command_received(early, now), Correlation::Unmatched(_)));
        assert!(c.is_pending(3));
    }

    #[test]
    fn expire_resolves_once_and_late_response_is_stale() {
        let mut c = Correlator::new();
        let t0 = Instant::now();
        let mut rx = c.submit(&request(4, Operation::Channels), FETCH, t0).unwrap();
        c.submit(&request(5, Operation::Channels), FETCH, t0 + Duration::from_secs(8))
            .unwrap();

        assert!(c.expire(t0 + Duration::from_secs(9)).is_empty());
        let expired = c.expire(t0 + Duration::from_secs(10));
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].seq, 4);
        assert!(matches!(
            rx.try_recv().unwrap(),
            Err(InnerError::RequestTimeout { operation: Operation::Channels, .. })
        ));

        let late = Command::response_ok(4, Operation::Channels, None);
        assert!(matches!(
            c.on_command_received(late, t0 + Duration::from_secs(11)),
            Correlation::Unmatched(_)
        ));
        assert_eq!(c.pending_count(), 1);
    }

    #[test]
    fn approve_deadline_restarts_from_response() {
        let mut c = Correlator::new();
        let t0 = Instant::now();
        c.submit(&request(1, Operation::ChatMessagePost), CONFIRMED, t0)
            .unwrap();
        let t1 = t0 + Duration::from_secs(9);
        c.on_command_received(Command::response_ok(1, Operation::ChatMessagePost, None), t1);

        assert!(c.expire(t0 + Duration::from_secs(12)).is_empty());
        assert_eq!(c.expire(t1 + Duration::from_secs(5)).len(), 1);
    }

    #[test]
    fn cancel_all_fails_everything() {
        let mut c = Correlator::new();
        let now = Instant::now();
        let mut receivers: Vec<_> = (1..=4)
            .map(|i| c.submit(&request(i, Operation::Channels), FETCH, now).unwrap())
            .collect();

        assert_eq!(c.cancel_all("peer closed"), 4);
        assert_eq!(c.pending_count(), 0);
        for rx in &mut receivers {
            assert!(matches!(rx.try_recv().unwrap(), Err(InnerError::ConnectionClosed(_))));
        }
    }

    #[test]
    fn cancel_single_request() {
        let mut c = Correlator::new();
        let mut rx = c
            .submit(&request(1, Operation::Channels), FETCH, Instant::now())
            .unwrap();
        assert!(c.cancel(1));
        assert!(!c.cancel(1));
        assert!(matches!(rx.try_recv().unwrap(), Err(InnerError::Cancelled)));
    }

    #[test]
    fn submit_rejects_non_requests() {
        let mut c = Correlator::new();
        let resp = Command::response_ok(1, Operation::Channels, None);
        assert!(c.submit(&resp, FETCH, Instant::now()).is_err());
    }
}
