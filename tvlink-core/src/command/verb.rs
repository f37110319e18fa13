//! Verb table and phase classification.
//!
//! Every logical operation owns a triple of wire verbs:
//!
//! | Phase    | Verb                | Example                    |
//! |----------|---------------------|----------------------------|
//! | Request  | `<op>`              | `get_channels`             |
//! | Response | `<op>_resp`         | `get_channels_resp`        |
//! | Approve  | `<op>_approve`      | `get_channels_approve`     |
//!
//! The mapping is static; no per-connection state is involved.

use std::fmt;

use crate::error::InnerError;

const RESPONSE_SUFFIX: &str = "_resp";
const APPROVE_SUFFIX: &str = "_approve";

// ── CommandKind ──────────────────────────────────────────────────

/// Phase of the three-way handshake a command belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    Request,
    Response,
    Approve,
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandKind::Request => write!(f, "Request"),
            CommandKind::Response => write!(f, "Response"),
            CommandKind::Approve => write!(f, "Approve"),
        }
    }
}

// ── Origin ───────────────────────────────────────────────────────

/// Which peer is allowed to open an operation with a `Request`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Client,
    Server,
}

// ── Operation ────────────────────────────────────────────────────

/// All logical operations carried on the inner connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    // ── Client-initiated ─────────────────────────────────────────
    /// Keepalive sent on every ping-timer tick.
    ClientPing,
    /// Fetch server metadata (bandwidth host, ...).
    ServerInfo,
    /// Fetch the channel list for the authenticated user.
    Channels,
    /// Fetch live information for one stream.
    RuntimeChannelInfo,
    /// Post a chat message; delivery is confirmed by an `Approve`.
    ChatMessagePost,

    // ── Server-initiated (push path) ─────────────────────────────
    /// Server-side keepalive.
    ServerPing,
    /// Server asks the client to identify itself.
    WhoAreYou,
    /// Server asks for client system information.
    SystemInfo,
    /// Chat message relayed from another viewer.
    ServerChatMessage,
}

impl Operation {
    pub const ALL: [Operation; 9] = [
        Operation::ClientPing,
        Operation::ServerInfo,
        Operation::Channels,
        Operation::RuntimeChannelInfo,
        Operation::ChatMessagePost,
        Operation::ServerPing,
        Operation::WhoAreYou,
        Operation::SystemInfo,
        Operation::ServerChatMessage,
    ];

    /// The request verb; response and approve verbs derive from it.
    pub const fn request_verb(self) -> &'static str {
        match self {
            Operation::ClientPing => "client_ping",
            Operation::ServerInfo => "get_server_info",
            Operation::Channels => "get_channels",
            Operation::RuntimeChannelInfo => "get_runtime_channel_info",
            Operation::ChatMessagePost => "send_chat_message",
            Operation::ServerPing => "server_ping",
            Operation::WhoAreYou => "who_are_you",
            Operation::SystemInfo => "system_info",
            Operation::ServerChatMessage => "server_send_chat_message",
        }
    }

    /// Wire verb for this operation in the given phase.
    pub fn verb(self, kind: CommandKind) -> String {
        let base = self.request_verb();
        match kind {
            CommandKind::Request => base.to_string(),
            CommandKind::Response => format!("{base}{RESPONSE_SUFFIX}"),
            CommandKind::Approve => format!("{base}{APPROVE_SUFFIX}"),
        }
    }

    pub const fn origin(self) -> Origin {
        match self {
            Operation::ClientPing
            | Operation::ServerInfo
            | Operation::Channels
            | Operation::RuntimeChannelInfo
            | Operation::ChatMessagePost => Origin::Client,
            Operation::ServerPing
            | Operation::WhoAreYou
            | Operation::SystemInfo
            | Operation::ServerChatMessage => Origin::Server,
        }
    }

    /// Returns `true` if the operation only completes once the remote
    /// side has sent an `Approve` after its `Response`.
    pub const fn requires_approve(self) -> bool {
        matches!(self, Operation::ChatMessagePost)
    }

    fn from_request_verb(verb: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.request_verb() == verb)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.request_verb())
    }
}

/// Map a wire verb to its operation and handshake phase.
pub fn classify(verb: &str) -> Result<(Operation, CommandKind), InnerError> {
    let (base, kind) = if let Some(base) = verb.strip_suffix(RESPONSE_SUFFIX) {
        (base, CommandKind::Response)
    } else if let Some(base) = verb.strip_suffix(APPROVE_SUFFIX) {
        (base, CommandKind::Approve)
    } else {
        (verb, CommandKind::Request)
    };

    Operation::from_request_verb(base)
        .map(|op| (op, kind))
        .ok_or_else(|| InnerError::MalformedCommand(format!("unknown verb `{verb}`")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_verb_classifies_back_to_its_operation() {
        for op in Operation::ALL {
            for kind in [
                CommandKind::Request,
                CommandKind::Response,
                CommandKind::Approve,
            ] {
                assert_eq!(classify(&op.verb(kind)).unwrap(), (op, kind));
            }
        }
    }

    #[test]
    fn unknown_verb_is_malformed() {
        assert!(matches!(
            classify("launch_rockets"),
            Err(InnerError::MalformedCommand(_))
        ));
        assert!(classify("_resp").is_err());
        assert!(classify("").is_err());
    }

    #[test]
    fn only_chat_post_requires_approve() {
        let approving: Vec<_> = Operation::ALL
            .into_iter()
            .filter(|op| op.requires_approve())
            .collect();
        assert_eq!(approving, vec![Operation::ChatMessagePost]);
    }

    #[test]
    fn verb_names() {
        assert_eq!(Operation::Channels.verb(CommandKind::Request), "get_channels");
        assert_eq!(
            Operation::ChatMessagePost.verb(CommandKind::Approve),
            "send_chat_message_approve"
        );
        assert_eq!(Operation::ServerInfo.to_string(), "get_server_info");
    }
}
