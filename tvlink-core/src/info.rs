//! Payload records carried as JSON bodies on the inner connection.
//!
//! The protocol engine only needs enough structure to route these; the
//! fields mirror what the inner server sends and expects.

use serde::{Deserialize, Serialize};

/// Identifier of a live stream / channel.
pub type StreamId = String;

/// Measured throughput in bytes per second.
pub type Bandwidth = u64;

/// Credentials presented when the server asks `who_are_you`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthInfo {
    pub login: String,
    pub password: String,
    pub device_id: String,
}

impl AuthInfo {
    pub fn new(
        login: impl Into<String>,
        password: impl Into<String>,
        device_id: impl Into<String>,
    ) -> Self {
        Self {
            login: login.into(),
            password: password.into(),
            device_id: device_id.into(),
        }
    }

    pub fn is_valid(&self) -> bool {
        !self.login.is_empty() && !self.device_id.is_empty()
    }
}

/// Reply body of `get_server_info`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerInfo {
    /// `host:port` of the bandwidth measurement endpoint; empty if none.
    pub bandwidth_host: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelInfo {
    pub id: StreamId,
    pub name: String,
    pub url: String,
    pub enable_audio: bool,
    pub enable_video: bool,
}

/// Reply body of `get_channels`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelsInfo {
    pub channels: Vec<ChannelInfo>,
}

impl ChannelsInfo {
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

/// Reply body of `get_runtime_channel_info`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeChannelInfo {
    pub channel_id: StreamId,
    pub watchers_count: u64,
    pub chat_enabled: bool,
    pub chat_read_only: bool,
    pub messages: Vec<ChatMessage>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatMessageType {
    #[default]
    Message,
    Control,
}

/// A chat line, posted by us or relayed by the server.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatMessage {
    pub channel_id: StreamId,
    pub login: String,
    pub message: String,
    #[serde(rename = "type")]
    pub kind: ChatMessageType,
}

impl ChatMessage {
    pub fn new(
        channel_id: impl Into<StreamId>,
        login: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            channel_id: channel_id.into(),
            login: login.into(),
            message: message.into(),
            kind: ChatMessageType::Message,
        }
    }
}

/// Body of our answer to `server_ping`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingInfo {
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
}

/// Body of our answer to `system_info`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientSystemInfo {
    pub os: String,
    pub arch: String,
    pub bandwidth: Bandwidth,
}

impl ClientSystemInfo {
    pub fn current(bandwidth: Bandwidth) -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            bandwidth,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_message_uses_type_field() {
        let msg = ChatMessage::new("42", "alice", "hi there");
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains(r#""type":"message""#));
        let back: ChatMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn missing_fields_default() {
        let info: ServerInfo = serde_json::from_str("{}").unwrap();
        assert!(info.bandwidth_host.is_empty());

        let channels: ChannelsInfo =
            serde_json::from_str(r#"{"channels":[{"id":"1","name":"News"}]}"#).unwrap();
        assert_eq!(channels.len(), 1);
        assert_eq!(channels.channels[0].name, "News");
    }

    #[test]
    fn auth_validity() {
        assert!(!AuthInfo::default().is_valid());
        assert!(AuthInfo::new("bob", "secret", "dev-1").is_valid());
    }
}
