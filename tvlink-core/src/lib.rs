//! # tvlink-core
//!
//! Inner control-channel engine for the tvlink streaming client.
//!
//! This crate contains:
//! - **Codec**: `FrameCodec`, length-prefixed framing usable directly or via `tokio_util`
//! - **Commands**: `Command`, `Operation`, `Sequencer`, the text command format
//! - **Correlator**: matches responses and approves to pending requests, with deadlines
//! - **Handler**: `InnerHandler`, the connection state machine with keepalive
//! - **Probes**: `ProbeManager`, auxiliary bandwidth measurement connections
//! - **Reactor**: `Reactor`/`LoopObserver` seams plus a tokio-backed `EventLoop`
//! - **Error**: `InnerError`, typed `thiserror`-based error hierarchy

pub mod codec;
pub mod command;
pub mod config;
pub mod correlator;
pub mod error;
pub mod handler;
pub mod info;
pub mod probe;
pub mod reactor;
pub mod reply;
pub mod runtime;
pub mod state;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use codec::{DEFAULT_MAX_FRAME_SIZE, Frame, FrameCodec, LENGTH_PREFIX_SIZE};
pub use command::{Command, CommandKind, Operation, Origin, ReplyStatus, SeqId, Sequencer};
pub use config::{InnerConfig, LimitsConfig, TimingConfig};
pub use correlator::{Correlation, Correlator, RequestPolicy};
pub use error::InnerError;
pub use handler::{DisconnectReason, InnerEvent, InnerHandler};
pub use info::{
    AuthInfo, Bandwidth, ChannelInfo, ChannelsInfo, ChatMessage, ChatMessageType,
    ClientSystemInfo, PingInfo, RuntimeChannelInfo, ServerInfo, StreamId,
};
pub use probe::{BandwidthHostType, ProbeManager, ProbeReport, ThroughputMeter};
pub use reactor::{ClientId, LoopObserver, Reactor, TimerId};
pub use reply::{FromReply, Pending};
pub use runtime::{EventLoop, InnerClient, TokioReactor};
pub use state::ConnectionState;
