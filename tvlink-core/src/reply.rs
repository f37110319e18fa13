//! Typed completions for public operations.

use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::oneshot::error::TryRecvError;

use crate::command::{Command, SeqId};
use crate::correlator::CompletionRx;
use crate::error::InnerError;
use crate::info::{ChannelsInfo, RuntimeChannelInfo, ServerInfo};

/// Decode a successful `Response` into the caller's result type.
pub trait FromReply: Sized {
    fn from_reply(response: &Command) -> Result<Self, InnerError>;
}

impl FromReply for ServerInfo {
    fn from_reply(response: &Command) -> Result<Self, InnerError> {
        response.json_body()
    }
}

impl FromReply for ChannelsInfo {
    fn from_reply(response: &Command) -> Result<Self, InnerError> {
        response.json_body()
    }
}

impl FromReply for RuntimeChannelInfo {
    fn from_reply(response: &Command) -> Result<Self, InnerError> {
        response.json_body()
    }
}

/// Acknowledgement without a body (chat post, ping).
impl FromReply for () {
    fn from_reply(_response: &Command) -> Result<Self, InnerError> {
        Ok(())
    }
}

// ── Pending ──────────────────────────────────────────────────────

/// A request in flight. Resolves exactly once, to the decoded reply or
/// to the reason it failed.
///
/// Await it directly, or poll it without blocking via
/// [`try_take`](Self::try_take) from the event-loop thread.
#[derive(Debug)]
pub struct Pending<T> {
    seq: SeqId,
    rx: CompletionRx,
    _reply: PhantomData<fn() -> T>,
}

impl<T: FromReply> Pending<T> {
    pub(crate) fn new(seq: SeqId, rx: CompletionRx) -> Self {
        Self {
            seq,
            rx,
            _reply: PhantomData,
        }
    }

    /// Sequence id of the underlying request, usable for cancellation.
    pub fn seq(&self) -> SeqId {
        self.seq
    }

    /// Returns `None` while the request is still unresolved.
    pub fn try_take(&mut self) -> Option<Result<T, InnerError>> {
        match self.rx.try_recv() {
            Ok(resolution) => Some(decode(resolution)),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Closed) => Some(Err(dropped())),
        }
    }

    pub async fn wait(self) -> Result<T, InnerError> {
        self.await
    }
}

impl<T: FromReply> Future for Pending<T> {
    type Output = Result<T, InnerError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match Pin::new(&mut this.rx).poll(cx) {
            Poll::Ready(Ok(resolution)) => Poll::Ready(decode(resolution)),
            Poll::Ready(Err(_)) => Poll::Ready(Err(dropped())),
            Poll::Pending => Poll::Pending,
        }
    }
}

fn decode<T: FromReply>(resolution: Result<Command, InnerError>) -> Result<T, InnerError> {
    resolution.and_then(|response| T::from_reply(&response))
}

fn dropped() -> InnerError {
    InnerError::ConnectionClosed("handler dropped".into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::Operation;
    use tokio::sync::oneshot;

    #[test]
    fn decodes_channels_body() {
        let (tx, rx) = oneshot::channel();
        let mut pending: Pending<ChannelsInfo> = Pending::new(1, rx);
        assert!(pending.try_take().is_none());

        let body = r#"{"channels":[{"id":"a","name":"A"},{"id":"b","name":"B"}]}"#;
        tx.send(Ok(Command::response_ok(1, Operation::Channels, Some(body.into()))))
            .unwrap();
        let channels = pending.try_take().unwrap().unwrap();
        assert_eq!(channels.len(), 2);
    }

    #[test]
    fn bad_json_surfaces_as_error() {
        let (tx, rx) = oneshot::channel();
        let mut pending: Pending<ServerInfo> = Pending::new(1, rx);
        tx.send(Ok(Command::response_ok(1, Operation::ServerInfo, Some("{".into()))))
            .unwrap();
        assert!(matches!(pending.try_take(), Some(Err(InnerError::Json(_)))));
    }

    #[test]
    fn dropped_sender_is_connection_closed() {
        let (tx, rx) = oneshot::channel::<Result<Command, InnerError>>();
        let mut pending: Pending<()> = Pending::new(1, rx);
        drop(tx);
        assert!(matches!(pending.try_take(), Some(Err(InnerError::ConnectionClosed(_)))));
    }

    #[tokio::test]
    async fn awaiting_yields_reply() {
        let (tx, rx) = oneshot::channel();
        let pending: Pending<()> = Pending::new(9, rx);
        tx.send(Ok(Command::approve(9, Operation::ChatMessagePost)))
            .unwrap();
        pending.wait().await.unwrap();
    }
}
