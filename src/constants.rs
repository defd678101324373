// MIT License - Copyright (c) 2026 Peter Wright
// Insynctive bridge client

/// Command prefixes understood by the bridge.
pub const BRIDGE_INFO: &str = "?BRIDGEINFO";
pub const DEVICE_COUNT: &str = "?POINTCOUNT";
pub const DEVICE_INFO: &str = "?POINTDEVICE-";
pub const DEVICE_STATUS: &str = "?POINTSTATUS-";
pub const BATTERY_STATUS: &str = "?POINTBATTERYGET-";
pub const DEVICE_ID: &str = "?POINTID-";
pub const SET_DEVICE_STATUS: &str = "?POINTSET-";
pub const SET_STATIC_IP: &str = "!BRIDGESETIP,$";

/// Width of the zero-padded device id used in per-device commands.
pub const DEVICE_ID_WIDTH: usize = 3;

/// Device type codes reported by `?POINTDEVICE-`.
pub const TYPE_DOOR_OR_WINDOW: &str = "01";
pub const TYPE_GARAGE_DOOR: &str = "03";
pub const TYPE_DOOR_LOCK: &str = "0D";
pub const TYPE_BLIND: &str = "13";

/// Garage door status codes.
pub const GARAGE_DOOR_LOCKED: [&str; 2] = ["00", "04"];
pub const GARAGE_DOOR_UNLOCKED: [&str; 4] = ["01", "02", "05", "06"];

/// Door/window (and fallback) status codes. `02` is reported after the
/// sensor reconnects and counts as closed.
pub const DOOR_WINDOW_CLOSED: [&str; 5] = ["00", "02", "04", "06", "20"];
pub const DOOR_WINDOW_OPEN: [&str; 3] = ["01", "05", "21"];

/// Status codes that carry the tamper flag, regardless of device type.
pub const TAMPER_CODES: [&str; 3] = ["04", "05", "06"];
