//! Human-readable rendering of handler events and replies.

use serde::Serialize;

use tvlink_core::{Bandwidth, InnerEvent};

/// One line describing `event`.
pub fn describe_event(event: &InnerEvent) -> String {
    match event {
        InnerEvent::Connected => "connected".to_string(),
        InnerEvent::Disconnected { reason } => format!("disconnected: {reason}"),
        InnerEvent::ChatMessage(msg) => {
            format!("[{}] {}: {}", msg.channel_id, msg.login, msg.message)
        }
        InnerEvent::BandwidthMeasured {
            host_type,
            bandwidth,
        } => format!("bandwidth {host_type:?}: {}", format_bandwidth(*bandwidth)),
        InnerEvent::ProbeFailed { host_type, error } => {
            format!("bandwidth probe {host_type:?} failed: {error}")
        }
    }
}

/// Bytes/second as a short decimal rate.
pub fn format_bandwidth(bps: Bandwidth) -> String {
    let bits = bps as f64 * 8.0;
    if bits >= 1e9 {
        format!("{:.2} Gbit/s", bits / 1e9)
    } else if bits >= 1e6 {
        format!("{:.2} Mbit/s", bits / 1e6)
    } else if bits >= 1e3 {
        format!("{:.2} kbit/s", bits / 1e3)
    } else {
        format!("{bits:.0} bit/s")
    }
}

/// Pretty JSON for a reply body.
pub fn render<T: Serialize>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|e| format!("<unprintable: {e}>"))
}
