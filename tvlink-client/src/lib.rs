//! # tvlink-client — inner control-channel command-line client
//!
//! Connects to the inner control server, answers its keepalive and
//! identity requests, and runs one operation (server info, channel list,
//! runtime channel info, chat post) or watches events until interrupted.

pub mod config;
pub mod report;
