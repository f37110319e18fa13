//! Tokio-backed event loop driving an [`InnerHandler`](crate::handler::InnerHandler).

pub mod event_loop;
pub mod reactor;

pub use event_loop::{EventLoop, InnerClient, Spawned};
pub use reactor::{LoopEvent, LoopEventSender, TokioReactor};
