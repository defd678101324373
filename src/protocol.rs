// MIT License - Copyright (c) 2026 Peter Wright
// Insynctive bridge client

use std::borrow::Cow;
use std::sync::LazyLock;

use regex::Regex;

use crate::constants::{
    BATTERY_STATUS, BRIDGE_INFO, DEVICE_COUNT, DEVICE_ID, DEVICE_ID_WIDTH, DEVICE_INFO,
    DEVICE_STATUS, SET_DEVICE_STATUS, SET_STATIC_IP,
};
use crate::event::NotificationEvent;

/// Unsolicited status change pushed by the bridge: `POINTSTATUS-<id>,$<code>`.
pub const NOTIFICATION_PATTERN: &str = r"POINTSTATUS-(\d+),\$([0-9A-Fa-f]+)";
/// Any line the bridge sends in answer to a command.
pub const RESPONSE_PATTERN: &str = r"^[\w\-,$: ]+$";
/// Characters stripped from incoming data before classification.
pub const INVALID_CHARS_PATTERN: &str = r"[^\w\[\-,$: \r\n]+";

static HEX_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[a-fA-F0-9]+").expect("hex run pattern"));
static DECIMAL_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+").expect("decimal run pattern"));
static BRIDGE_INFO_FIELDS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Version: ([A-Z0-9]+), MAC: ([a-f0-9:]+)").expect("bridge info pattern")
});
static DEFAULT_PATTERNS: LazyLock<LinePatterns> = LazyLock::new(|| {
    LinePatterns::new(NOTIFICATION_PATTERN, RESPONSE_PATTERN, INVALID_CHARS_PATTERN)
        .expect("default line patterns")
});

/// Commands that can be sent to the bridge.
///
/// Every per-device command addresses the device by its ordinal id,
/// zero-padded to three digits (`?POINTSTATUS-007`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `?BRIDGEINFO`: bridge identity; answer contains `Version: <v>, MAC: <mac>`.
    BridgeInfo,
    /// `?POINTCOUNT`: number of paired devices; answer contains a decimal count.
    DeviceCount,
    /// `?POINTDEVICE-<id>`: device type code (hex).
    DeviceInfo { id: u32 },
    /// `?POINTSTATUS-<id>`: current raw status code (hex).
    DeviceStatus { id: u32 },
    /// `?POINTBATTERYGET-<id>`: battery level (hex, 0-255).
    BatteryStatus { id: u32 },
    /// `?POINTID-<id>`: device serial number (hex).
    DeviceId { id: u32 },
    /// `?POINTSET-<id>,$<value>`: set device status. Passed through verbatim.
    SetDeviceStatus { id: u32, value: String },
    /// `!BRIDGESETIP,$<ip>`: reconfigure the bridge's static IP.
    SetStaticIp { ip: String },
    /// Raw command string (for any unlisted commands).
    Raw(String),
}

impl Command {
    /// Convert the command to its wire string representation (without terminator).
    pub fn to_wire_string(&self) -> String {
        match self {
            Command::BridgeInfo => BRIDGE_INFO.to_string(),
            Command::DeviceCount => DEVICE_COUNT.to_string(),
            Command::DeviceInfo { id } => format!("{}{}", DEVICE_INFO, pad_device_id(*id)),
            Command::DeviceStatus { id } => format!("{}{}", DEVICE_STATUS, pad_device_id(*id)),
            Command::BatteryStatus { id } => format!("{}{}", BATTERY_STATUS, pad_device_id(*id)),
            Command::DeviceId { id } => format!("{}{}", DEVICE_ID, pad_device_id(*id)),
            Command::SetDeviceStatus { id, value } => {
                format!("{}{},${}", SET_DEVICE_STATUS, pad_device_id(*id), value)
            }
            Command::SetStaticIp { ip } => format!("{}{}", SET_STATIC_IP, ip),
            Command::Raw(s) => s.clone(),
        }
    }
}

/// Zero-pad a device ordinal to the width used on the wire (`7` → `"007"`).
pub fn pad_device_id(id: u32) -> String {
    format!("{:0>width$}", id, width = DEVICE_ID_WIDTH)
}

/// Classification of one incoming line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Line {
    /// Unsolicited device status change. Never consumes a pending command.
    Notification(NotificationEvent),
    /// Answer to the oldest pending command.
    Response(String),
    /// Matches neither shape; dropped.
    Unrecognized(String),
}

/// The three patterns that drive line handling, kept as data so protocol
/// quirks can be adjusted without touching the reader.
#[derive(Debug, Clone)]
pub struct LinePatterns {
    notification: Regex,
    response: Regex,
    invalid_chars: Regex,
}

impl LinePatterns {
    /// Compile a custom pattern set.
    ///
    /// `notification` must have two capture groups: the decimal device
    /// ordinal and the status code.
    pub fn new(
        notification: &str,
        response: &str,
        invalid_chars: &str,
    ) -> std::result::Result<Self, regex::Error> {
        Ok(Self {
            notification: Regex::new(notification)?,
            response: Regex::new(response)?,
            invalid_chars: Regex::new(invalid_chars)?,
        })
    }

    /// Remove every character outside the protocol alphabet.
    pub fn sanitize<'a>(&self, raw: &'a str) -> Cow<'a, str> {
        self.invalid_chars.replace_all(raw, "")
    }

    /// Classify a sanitized line.
    ///
    /// Notification shape is tested first: a status push also satisfies the
    /// generic response shape and would otherwise be taken as the answer to
    /// an unrelated command.
    pub fn classify(&self, line: &str) -> Line {
        if let Some(caps) = self.notification.captures(line) {
            let id = caps.get(1).and_then(|m| m.as_str().parse::<u32>().ok());
            let code = caps.get(2).map(|m| m.as_str().to_string());
            if let (Some(device_id), Some(status_code)) = (id, code) {
                return Line::Notification(NotificationEvent {
                    device_id,
                    status_code,
                });
            }
        }

        if self.response.is_match(line) {
            Line::Response(line.to_string())
        } else {
            Line::Unrecognized(line.to_string())
        }
    }
}

impl Default for LinePatterns {
    fn default() -> Self {
        DEFAULT_PATTERNS.clone()
    }
}

/// Split a data buffer into complete lines.
///
/// Bytes after the last `\n` are kept in `leftover` and prefixed to the next
/// read. Each line is sanitized and right-trimmed; empty lines are skipped.
pub fn split_lines(data: &[u8], leftover: &mut Vec<u8>, patterns: &LinePatterns) -> Vec<String> {
    let mut lines = Vec::new();
    let mut start = 0;

    for i in 0..data.len() {
        if data[i] == b'\n' {
            let raw = String::from_utf8_lossy(&data[start..i]);
            let clean = patterns.sanitize(&raw);
            let trimmed = clean.trim_end();
            if !trimmed.is_empty() {
                lines.push(trimmed.to_string());
            }
            start = i + 1;
        }
    }

    if start < data.len() {
        leftover.extend_from_slice(&data[start..]);
    }

    lines
}

/// First hexadecimal run in a response (`"$0D"` → `"0D"`).
pub fn extract_hex(response: &str) -> Option<&str> {
    HEX_RUN.find(response).map(|m| m.as_str())
}

/// First decimal integer in a response (`"Count: 4"` → `4`).
pub fn parse_first_decimal(response: &str) -> Option<u32> {
    DECIMAL_RUN
        .find(response)
        .and_then(|m| m.as_str().parse().ok())
}

/// Version and MAC tokens from a `?BRIDGEINFO` answer.
pub fn parse_bridge_info(response: &str) -> Option<(String, String)> {
    let caps = BRIDGE_INFO_FIELDS.captures(response)?;
    Some((caps[1].to_string(), caps[2].to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_wire_format() {
        assert_eq!(Command::BridgeInfo.to_wire_string(), "?BRIDGEINFO");
        assert_eq!(Command::DeviceCount.to_wire_string(), "?POINTCOUNT");
        assert_eq!(
            Command::DeviceInfo { id: 2 }.to_wire_string(),
            "?POINTDEVICE-002"
        );
        assert_eq!(
            Command::DeviceStatus { id: 12 }.to_wire_string(),
            "?POINTSTATUS-012"
        );
        assert_eq!(
            Command::BatteryStatus { id: 104 }.to_wire_string(),
            "?POINTBATTERYGET-104"
        );
        assert_eq!(Command::DeviceId { id: 1 }.to_wire_string(), "?POINTID-001");
        assert_eq!(
            Command::SetDeviceStatus {
                id: 3,
                value: "01".to_string()
            }
            .to_wire_string(),
            "?POINTSET-003,$01"
        );
        assert_eq!(
            Command::SetStaticIp {
                ip: "192.168.1.50".to_string()
            }
            .to_wire_string(),
            "!BRIDGESETIP,$192.168.1.50"
        );
    }

    #[test]
    fn test_pad_device_id() {
        assert_eq!(pad_device_id(1), "001");
        assert_eq!(pad_device_id(42), "042");
        assert_eq!(pad_device_id(999), "999");
        assert_eq!(pad_device_id(1234), "1234");
    }

    #[test]
    fn test_notification_takes_precedence_over_response() {
        let patterns = LinePatterns::default();
        let line = "POINTSTATUS-2,$05";
        // The line is also a valid generic response.
        assert!(Regex::new(RESPONSE_PATTERN).unwrap().is_match(line));
        assert_eq!(
            patterns.classify(line),
            Line::Notification(NotificationEvent {
                device_id: 2,
                status_code: "05".to_string(),
            })
        );
    }

    #[test]
    fn test_classify_response_and_garbage() {
        let patterns = LinePatterns::default();
        assert_eq!(
            patterns.classify("Count: 4"),
            Line::Response("Count: 4".to_string())
        );
        assert_eq!(
            patterns.classify("Version: A1B2, MAC: aa:bb:cc:dd:ee:ff"),
            Line::Response("Version: A1B2, MAC: aa:bb:cc:dd:ee:ff".to_string())
        );
        assert_eq!(
            patterns.classify("[garbage]"),
            Line::Unrecognized("[garbage]".to_string())
        );
    }

    #[test]
    fn test_notification_with_hex_status() {
        let patterns = LinePatterns::default();
        assert_eq!(
            patterns.classify("POINTSTATUS-11,$0A"),
            Line::Notification(NotificationEvent {
                device_id: 11,
                status_code: "0A".to_string(),
            })
        );
    }

    #[test]
    fn test_sanitize_strips_control_characters() {
        let patterns = LinePatterns::default();
        assert_eq!(patterns.sanitize("\u{1}$01\u{7f}"), "$01");
        assert_eq!(patterns.sanitize("Count: 4\r\n"), "Count: 4\r\n");
    }

    #[test]
    fn test_custom_patterns() {
        let patterns = LinePatterns::new(r"EVT(\d+)=(\w+)", r"^\w+$", r"[^\w=\r\n]+").unwrap();
        assert_eq!(
            patterns.classify("EVT3=01"),
            Line::Notification(NotificationEvent {
                device_id: 3,
                status_code: "01".to_string(),
            })
        );
        assert!(LinePatterns::new("(", RESPONSE_PATTERN, INVALID_CHARS_PATTERN).is_err());
    }

    #[test]
    fn test_split_lines_with_leftover() {
        let patterns = LinePatterns::default();
        let mut leftover = Vec::new();

        let lines = split_lines(b"$01\r\nPOINTSTATUS-1,$00\r\nCou", &mut leftover, &patterns);
        assert_eq!(lines, vec!["$01".to_string(), "POINTSTATUS-1,$00".to_string()]);
        assert_eq!(leftover, b"Cou".to_vec());

        let mut data = std::mem::take(&mut leftover);
        data.extend_from_slice(b"nt: 4\r\n\r\n");
        let lines = split_lines(&data, &mut leftover, &patterns);
        assert_eq!(lines, vec!["Count: 4".to_string()]);
        assert!(leftover.is_empty());
    }

    #[test]
    fn test_extract_hex() {
        assert_eq!(extract_hex("$0D"), Some("0D"));
        assert_eq!(extract_hex("04"), Some("04"));
        assert_eq!(extract_hex("$1A2B3C4D"), Some("1A2B3C4D"));
        assert_eq!(extract_hex("$"), None);
        assert_eq!(extract_hex(""), None);
    }

    #[test]
    fn test_parse_first_decimal() {
        assert_eq!(parse_first_decimal("Count: 4"), Some(4));
        assert_eq!(parse_first_decimal("POINTCOUNT,$12"), Some(12));
        assert_eq!(parse_first_decimal("none"), None);
    }

    #[test]
    fn test_parse_bridge_info() {
        assert_eq!(
            parse_bridge_info("Version: A1B2, MAC: aa:bb:cc:dd:ee:ff"),
            Some(("A1B2".to_string(), "aa:bb:cc:dd:ee:ff".to_string()))
        );
        assert_eq!(parse_bridge_info("Insynctive Telnet Server"), None);
    }
}
