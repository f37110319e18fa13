//! Inner connection state machine.
//!
//! Models the lifecycle of one inner connection with validated
//! transitions that return `Result` instead of panicking.

use std::time::Instant;

use crate::error::InnerError;

// ── ConnectionState ──────────────────────────────────────────────

/// The current state of the inner connection.
///
/// ```text
///  Idle ──► Connecting ──► Connected
///              │               │
///              ▼               ▼
///  Disconnected ◄── Disconnecting
///       │
///       └──► Connecting (fresh connection)
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Handler built, never connected.
    #[default]
    Idle,

    /// Socket opened toward the inner host, not yet established.
    Connecting,

    /// Link is up; protocol traffic flows.
    Connected {
        /// When the connection entered the `Connected` state.
        since: Instant,
    },

    /// Teardown in progress: pending requests are being cancelled.
    Disconnecting,

    /// Terminal for this connection instance.
    Disconnected,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected { .. } => write!(f, "Connected"),
            Self::Disconnecting => write!(f, "Disconnecting"),
            Self::Disconnected => write!(f, "Disconnected"),
        }
    }
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected { .. })
    }

    pub fn is_connecting(&self) -> bool {
        matches!(self, Self::Connecting)
    }

    /// `true` while a socket is open or being opened.
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Connecting | Self::Connected { .. })
    }

    /// How long the connection has been established.
    ///
    /// Returns `None` for any other state.
    pub fn connected_duration(&self) -> Option<std::time::Duration> {
        match self {
            Self::Connected { since } => Some(since.elapsed()),
            _ => None,
        }
    }

    // ── Transitions ──────────────────────────────────────────────

    /// Transition to `Connecting`.
    ///
    /// Valid from: `Idle`, `Disconnected`.
    pub fn begin_connect(&mut self) -> Result<(), InnerError> {
        match self {
            Self::Idle | Self::Disconnected => {
                *self = Self::Connecting;
                Ok(())
            }
            _ => Err(InnerError::InvalidTransition(
                "cannot connect: a connection is already live",
            )),
        }
    }

    /// Transition to `Connected`.
    ///
    /// Valid from: `Connecting`.
    pub fn complete_connect(&mut self) -> Result<(), InnerError> {
        match self {
            Self::Connecting => {
                *self = Self::Connected {
                    since: Instant::now(),
                };
                Ok(())
            }
            _ => Err(InnerError::InvalidTransition(
                "cannot complete connect: not in Connecting state",
            )),
        }
    }

    /// Transition to `Disconnecting`.
    ///
    /// Valid from: `Connecting`, `Connected`.
    pub fn begin_disconnect(&mut self) -> Result<(), InnerError> {
        match self {
            Self::Connecting | Self::Connected { .. } => {
                *self = Self::Disconnecting;
                Ok(())
            }
            _ => Err(InnerError::InvalidTransition(
                "cannot disconnect: no live connection",
            )),
        }
    }

    /// Transition to `Disconnected`.
    ///
    /// Valid from: `Disconnecting`.
    pub fn finish_disconnect(&mut self) -> Result<(), InnerError> {
        match self {
            Self::Disconnecting => {
                *self = Self::Disconnected;
                Ok(())
            }
            _ => Err(InnerError::InvalidTransition(
                "cannot finish disconnect: not in Disconnecting state",
            )),
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_lifecycle() {
        let mut state = ConnectionState::default();
        assert_eq!(state, ConnectionState::Idle);

        state.begin_connect().unwrap();
        assert!(state.is_connecting());

        state.complete_connect().unwrap();
        assert!(state.is_connected());
        assert!(state.connected_duration().is_some());

        state.begin_disconnect().unwrap();
        assert_eq!(state, ConnectionState::Disconnecting);

        state.finish_disconnect().unwrap();
        assert_eq!(state, ConnectionState::Disconnected);

        // A fresh logical connection may follow.
        state.begin_connect().unwrap();
        assert!(state.is_live());
    }

    #[test]
    fn cannot_connect_twice() {
        let mut state = ConnectionState::Connected {
            since: Instant::now(),
        };
        assert!(state.begin_connect().is_err());
        let mut state = ConnectionState::Connecting;
        assert!(state.begin_connect().is_err());
    }

    #[test]
    fn connect_failure_goes_through_disconnecting() {
        let mut state = ConnectionState::Connecting;
        state.begin_disconnect().unwrap();
        state.finish_disconnect().unwrap();
        assert_eq!(state, ConnectionState::Disconnected);
    }

    #[test]
    fn invalid_transitions() {
        assert!(ConnectionState::Idle.complete_connect().is_err());
        assert!(ConnectionState::Idle.begin_disconnect().is_err());
        assert!(ConnectionState::Disconnected.begin_disconnect().is_err());
        assert!(ConnectionState::Connecting.finish_disconnect().is_err());
    }

    #[test]
    fn display_format() {
        assert_eq!(ConnectionState::Idle.to_string(), "Idle");
        assert_eq!(ConnectionState::Connecting.to_string(), "Connecting");
        assert_eq!(
            ConnectionState::Connected {
                since: Instant::now()
            }
            .to_string(),
            "Connected"
        );
        assert_eq!(ConnectionState::Disconnecting.to_string(), "Disconnecting");
        assert_eq!(ConnectionState::Disconnected.to_string(), "Disconnected");
    }
}
