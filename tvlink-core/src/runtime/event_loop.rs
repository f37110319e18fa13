use std::time::Instant;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::reactor::{LoopEvent, TokioReactor};
use crate::command::SeqId;
use crate::config::InnerConfig;
use crate::error::InnerError;
use crate::handler::{InnerEvent, InnerHandler};
use crate::info::{Bandwidth, ChannelsInfo, ChatMessage, RuntimeChannelInfo, ServerInfo, StreamId};
use crate::reactor::LoopObserver;
use crate::reply::{FromReply, Pending};
use crate::state::ConnectionState;

type HandlerCall = Box<dyn FnOnce(&mut InnerHandler<TokioReactor>) + Send>;

enum LoopMessage {
    Call(HandlerCall),
    Stop,
}

/// Single task that owns the handler and dispatches every callback.
pub struct EventLoop {
    handler: InnerHandler<TokioReactor>,
    events: mpsc::UnboundedReceiver<LoopEvent>,
    calls: mpsc::Receiver<LoopMessage>,
}

pub type Spawned = (InnerClient, mpsc::UnboundedReceiver<InnerEvent>, JoinHandle<()>);

impl EventLoop {
    /// Build a loop for `config`, rejecting configurations it cannot run.
    pub fn new(
        config: InnerConfig,
    ) -> Result<(Self, InnerClient, mpsc::UnboundedReceiver<InnerEvent>), InnerError> {
        config.validate()?;
        let (loop_tx, loop_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (call_tx, call_rx) = mpsc::channel(64);

        let reactor = TokioReactor::new(loop_tx, config.timing.connect_timeout());
        let handler = InnerHandler::new(config, reactor, event_tx);
        let event_loop = Self {
            handler,
            events: loop_rx,
            calls: call_rx,
        };
        Ok((event_loop, InnerClient { tx: call_tx }, event_rx))
    }

    pub async fn run(mut self) {
        info!(host = %self.handler.config().inner_host, "event loop started");
        loop {
            tokio::select! {
                Some(event) = self.events.recv() => self.dispatch(event),
                msg = self.calls.recv() => match msg {
                    Some(LoopMessage::Call(call)) => call(&mut self.handler),
                    Some(LoopMessage::Stop) | None => break,
                },
            }
        }
        self.handler.disconnect();
        self.handler.reactor_mut().shutdown();
        info!("event loop stopped");
    }

    fn dispatch(&mut self, event: LoopEvent) {
        let handler = &mut self.handler;
        match event {
            LoopEvent::Connected(client) => {
                if handler.reactor().is_open(client) {
                    handler.connected(client);
                }
            }
            LoopEvent::ConnectFailed(client, error) => {
                if handler.reactor_mut().forget(client) {
                    handler.connect_failed(client, error);
                }
            }
            LoopEvent::Data(client, data) => {
                if handler.reactor_mut().stash(client, data) {
                    handler.data_received(client);
                }
            }
            LoopEvent::Writable(client) => {
                if handler.reactor().is_open(client) {
                    handler.ready_to_write(client);
                }
            }
            LoopEvent::Closed(client) => {
                if handler.reactor().is_open(client) {
                    handler.closed(client);
                    handler.reactor_mut().forget(client);
                }
            }
            LoopEvent::Timer(timer) => {
                if handler.reactor().has_timer(timer) {
                    handler.timer_fired(timer, Instant::now());
                } else {
                    debug!(?timer, "tick from removed timer");
                }
            }
        }
    }
}

// ── InnerClient ──────────────────────────────────────────────────

/// Cloneable handle onto a running [`EventLoop`].
///
/// Every method runs on the loop task; request methods then await the
/// typed reply outside of it.
#[derive(Clone)]
pub struct InnerClient {
    tx: mpsc::Sender<LoopMessage>,
}

impl InnerClient {
    /// Spawn an event loop on the current runtime.
    ///
    /// Fails with [`InnerError::Config`] before anything is spawned if the
    /// configuration is invalid.
    pub fn spawn(config: InnerConfig) -> Result<Spawned, InnerError> {
        let (event_loop, client, events) = EventLoop::new(config)?;
        let handle = tokio::spawn(event_loop.run());
        Ok((client, events, handle))
    }

    /// Run `f` against the handler on the loop task.
    pub async fn call<F, T>(&self, f: F) -> Result<T, InnerError>
    where
        F: FnOnce(&mut InnerHandler<TokioReactor>) -> T + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let call: HandlerCall = Box::new(move |handler: &mut InnerHandler<TokioReactor>| {
            let _ = tx.send(f(handler));
        });
        self.tx
            .send(LoopMessage::Call(call))
            .await
            .map_err(|_| loop_gone())?;
        rx.await.map_err(|_| loop_gone())
    }

    async fn request<T, F>(&self, f: F) -> Result<T, InnerError>
    where
        T: FromReply + Send + 'static,
        F: FnOnce(&mut InnerHandler<TokioReactor>) -> Result<Pending<T>, InnerError>
            + Send
            + 'static,
    {
        self.call(f).await??.await
    }

    /// Start connecting. Requests issued from now on are queued until the
    /// connection is up; watch for [`InnerEvent::Connected`].
    pub async fn connect(&self) -> Result<(), InnerError> {
        self.call(|h| h.connect()).await?
    }

    pub async fn disconnect(&self) -> Result<(), InnerError> {
        self.call(|h| h.disconnect()).await
    }

    pub async fn request_server_info(&self) -> Result<ServerInfo, InnerError> {
        self.request(|h| h.request_server_info()).await
    }

    pub async fn request_channels(&self) -> Result<ChannelsInfo, InnerError> {
        self.request(|h| h.request_channels()).await
    }

    pub async fn request_runtime_channel_info(
        &self,
        stream_id: StreamId,
    ) -> Result<RuntimeChannelInfo, InnerError> {
        self.request(move |h| h.request_runtime_channel_info(&stream_id))
            .await
    }

    pub async fn post_message_to_chat(&self, msg: ChatMessage) -> Result<(), InnerError> {
        self.request(move |h| h.post_message_to_chat(&msg)).await
    }

    pub async fn cancel(&self, seq: SeqId) -> Result<bool, InnerError> {
        self.call(move |h| h.cancel(seq)).await
    }

    pub async fn state(&self) -> Result<ConnectionState, InnerError> {
        self.call(|h| h.state().clone()).await
    }

    pub async fn current_bandwidth(&self) -> Result<Bandwidth, InnerError> {
        self.call(|h| h.current_bandwidth()).await
    }

    /// Disconnect and stop the loop task.
    pub async fn shutdown(&self) {
        let _ = self.tx.send(LoopMessage::Stop).await;
    }
}

fn loop_gone() -> InnerError {
    InnerError::ConnectionClosed("event loop stopped".into())
}
