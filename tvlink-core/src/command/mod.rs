//! Command parsing, serialization and classification.
//!
//! # Text format
//!
//! ```text
//! <verb> <seq> <argc> <arg1> ... <argN>
//! ```
//!
//! Tokens are separated by a single space; arguments are escaped per
//! [`escape`]. Response arguments start with a status token:
//!
//! ```text
//! get_channels_resp 1 2 ok {"channels":[...]}
//! get_channels_resp 1 2 fail not\sauthorized
//! send_chat_message_approve 7 1 ok
//! ```

pub mod escape;
pub mod sequencer;
pub mod verb;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::InnerError;

pub use sequencer::{SeqId, Sequencer};
pub use verb::{CommandKind, Operation, Origin, classify};

/// Status token for a successful response.
pub const STATUS_OK: &str = "ok";
/// Status token for a failed response.
pub const STATUS_FAIL: &str = "fail";

// ── ReplyStatus ──────────────────────────────────────────────────

/// Outcome carried in the first argument of a `Response`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyStatus {
    Ok,
    Fail(String),
}

// ── Command ──────────────────────────────────────────────────────

/// A parsed, classified protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    seq: SeqId,
    kind: CommandKind,
    operation: Operation,
    args: Vec<String>,
}

impl Command {
    pub fn new(seq: SeqId, kind: CommandKind, operation: Operation, args: Vec<String>) -> Self {
        Self {
            seq,
            kind,
            operation,
            args,
        }
    }

    pub fn request(seq: SeqId, operation: Operation, args: Vec<String>) -> Self {
        Self::new(seq, CommandKind::Request, operation, args)
    }

    /// Successful response, optionally carrying a JSON body.
    pub fn response_ok(seq: SeqId, operation: Operation, body: Option<String>) -> Self {
        let mut args = vec![STATUS_OK.to_string()];
        args.extend(body);
        Self::new(seq, CommandKind::Response, operation, args)
    }

    /// Successful response whose body is `value` serialized as JSON.
    pub fn response_json<T: Serialize>(
        seq: SeqId,
        operation: Operation,
        value: &T,
    ) -> Result<Self, InnerError> {
        let body = serde_json::to_string(value)?;
        Ok(Self::response_ok(seq, operation, Some(body)))
    }

    pub fn response_fail(seq: SeqId, operation: Operation, reason: impl Into<String>) -> Self {
        Self::new(
            seq,
            CommandKind::Response,
            operation,
            vec![STATUS_FAIL.to_string(), reason.into()],
        )
    }

    pub fn approve(seq: SeqId, operation: Operation) -> Self {
        Self::new(
            seq,
            CommandKind::Approve,
            operation,
            vec![STATUS_OK.to_string()],
        )
    }

    pub fn seq(&self) -> SeqId {
        self.seq
    }

    pub fn kind(&self) -> CommandKind {
        self.kind
    }

    pub fn operation(&self) -> Operation {
        self.operation
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn verb(&self) -> String {
        self.operation.verb(self.kind)
    }

    /// Interpret the leading status token of a response/approve.
    ///
    /// A missing or unknown status is treated as a failure.
    pub fn status(&self) -> ReplyStatus {
        match self.args.first().map(String::as_str) {
            Some(STATUS_OK) => ReplyStatus::Ok,
            Some(STATUS_FAIL) => ReplyStatus::Fail(
                self.args
                    .get(1)
                    .cloned()
                    .unwrap_or_else(|| "unspecified failure".to_string()),
            ),
            Some(other) => ReplyStatus::Fail(format!("unknown status `{other}`")),
            None => ReplyStatus::Fail("missing status".to_string()),
        }
    }

    /// Decode the JSON body that follows an `ok` status.
    pub fn json_body<T: DeserializeOwned>(&self) -> Result<T, InnerError> {
        if let ReplyStatus::Fail(reason) = self.status() {
            return Err(InnerError::Rejected {
                operation: self.operation,
                reason,
            });
        }
        let body = self.args.get(1).ok_or_else(|| {
            InnerError::MalformedCommand(format!("{} carries no body", self.verb()))
        })?;
        Ok(serde_json::from_str(body)?)
    }

    // ── Text encoding ────────────────────────────────────────────

    pub fn to_text(&self) -> String {
        let mut out = format!("{} {} {}", self.verb(), self.seq, self.args.len());
        for arg in &self.args {
            out.push(' ');
            out.push_str(&escape::escape(arg));
        }
        out
    }

    /// Parse one frame payload into a command.
    pub fn parse(payload: &[u8]) -> Result<Self, InnerError> {
        let text = std::str::from_utf8(payload)
            .map_err(|e| InnerError::MalformedCommand(format!("payload is not utf-8: {e}")))?;

        let mut tokens = text.split(' ');
        let verb = tokens
            .next()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| InnerError::MalformedCommand("missing verb".into()))?;
        let (operation, kind) = classify(verb)?;

        let seq: SeqId = parse_number(tokens.next(), "sequence id")?;
        let argc: usize = parse_number(tokens.next(), "argument count")?;

        let args = tokens
            .map(escape::unescape)
            .collect::<Result<Vec<_>, _>>()?;
        if args.len() != argc {
            return Err(InnerError::MalformedCommand(format!(
                "{verb}: declared {argc} arguments, found {}",
                args.len()
            )));
        }

        Ok(Self::new(seq, kind, operation, args))
    }
}

fn parse_number<T: std::str::FromStr>(token: Option<&str>, what: &str) -> Result<T, InnerError> {
    let token = token.ok_or_else(|| InnerError::MalformedCommand(format!("missing {what}")))?;
    token
        .parse()
        .map_err(|_| InnerError::MalformedCommand(format!("invalid {what} `{token}`")))
}
