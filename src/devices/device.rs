// MIT License - Copyright (c) 2026 Peter Wright
// Insynctive bridge client

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::RwLock;
use tracing::debug;

use crate::constants::{
    DOOR_WINDOW_CLOSED, DOOR_WINDOW_OPEN, GARAGE_DOOR_LOCKED, GARAGE_DOOR_UNLOCKED, TAMPER_CODES,
    TYPE_BLIND, TYPE_DOOR_LOCK, TYPE_DOOR_OR_WINDOW, TYPE_GARAGE_DOOR,
};
use crate::error::Result;
use crate::protocol::{extract_hex, pad_device_id, Command};
use crate::transport::Transport;

/// Kind of sensor, from the 2-hex-digit type code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum DeviceType {
    #[serde(rename = "Pella Door/Window")]
    DoorWindow,
    #[serde(rename = "Pella Garage Door")]
    GarageDoor,
    #[serde(rename = "Pella Door Lock")]
    DoorLock,
    #[serde(rename = "Pella Blind")]
    Blind,
    Unknown,
}

impl DeviceType {
    /// Map a raw type code. Unlisted codes are `Unknown`.
    pub fn from_code(code: &str) -> Self {
        match code.to_ascii_uppercase().as_str() {
            TYPE_DOOR_OR_WINDOW => Self::DoorWindow,
            TYPE_GARAGE_DOOR => Self::GarageDoor,
            TYPE_DOOR_LOCK => Self::DoorLock,
            TYPE_BLIND => Self::Blind,
            _ => Self::Unknown,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::DoorWindow => "Pella Door/Window",
            Self::GarageDoor => "Pella Garage Door",
            Self::DoorLock => "Pella Door Lock",
            Self::Blind => "Pella Blind",
            Self::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.name())
    }
}

/// Human-readable device status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum DeviceStatus {
    Open,
    Closed,
    Locked,
    Unlocked,
    Unknown,
}

impl DeviceStatus {
    /// Translate a status code using the table for the device's type.
    ///
    /// Garage doors report locked/unlocked. Blinds have no mapping. Every
    /// other type, including unknown ones, uses the door/window table.
    pub fn derive(type_code: Option<&str>, status_code: Option<&str>) -> Self {
        let Some(status) = status_code.map(str::to_ascii_uppercase) else {
            return Self::Unknown;
        };
        let status = status.as_str();

        match type_code.map(DeviceType::from_code) {
            Some(DeviceType::GarageDoor) => {
                if in_set(&GARAGE_DOOR_LOCKED, status) {
                    Self::Locked
                } else if in_set(&GARAGE_DOOR_UNLOCKED, status) {
                    Self::Unlocked
                } else {
                    Self::Unknown
                }
            }
            Some(DeviceType::Blind) => Self::Unknown,
            _ => {
                if in_set(&DOOR_WINDOW_CLOSED, status) {
                    Self::Closed
                } else if in_set(&DOOR_WINDOW_OPEN, status) {
                    Self::Open
                } else {
                    Self::Unknown
                }
            }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Open => "Open",
            Self::Closed => "Closed",
            Self::Locked => "Locked",
            Self::Unlocked => "Unlocked",
            Self::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.name())
    }
}

/// Whether a status code reports a tamper fault. Independent of type.
pub fn is_tamper_code(status_code: &str) -> bool {
    in_set(&TAMPER_CODES, &status_code.to_ascii_uppercase())
}

fn in_set(set: &[&str], code: &str) -> bool {
    set.iter().any(|c| *c == code)
}

/// Cached view of a device, built without any I/O.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceState {
    pub id: u32,
    pub device_id: String,
    pub type_code: Option<String>,
    pub device_type: DeviceType,
    pub serial_number: Option<String>,
    pub status_code: Option<String>,
    pub status: DeviceStatus,
    pub temper: bool,
}

/// Freshly fetched summary of a device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSnapshot {
    pub id: u32,
    pub battery: Option<u8>,
    #[serde(rename = "type")]
    pub device_type: DeviceType,
    pub serial_number: Option<String>,
    pub status: DeviceStatus,
    pub temper: bool,
}

#[derive(Debug, Default)]
struct DeviceCache {
    type_code: Option<String>,
    device_type: Option<DeviceType>,
    serial_number: Option<String>,
    status_code: Option<String>,
}

/// One sensor attached to the bridge.
///
/// Type code and serial number are fetched once and kept for the lifetime
/// of the device. Status is polled on demand or set locally from a pushed
/// notification via [`apply_status_code`](Self::apply_status_code).
pub struct Device<T: Transport> {
    /// 1-based ordinal
    pub id: u32,
    /// Zero-padded ordinal used in commands
    pub device_id: String,
    transport: Arc<T>,
    cache: RwLock<DeviceCache>,
}

impl<T: Transport> Device<T> {
    pub fn new(id: u32, transport: Arc<T>) -> Self {
        Self {
            id,
            device_id: pad_device_id(id),
            transport,
            cache: RwLock::new(DeviceCache::default()),
        }
    }

    async fn fetch_hex(&self, command: Command) -> Result<Option<String>> {
        let response = self.transport.send_command(&command.to_wire_string()).await?;
        let hex = extract_hex(&response).map(str::to_string);
        if hex.is_none() {
            debug!("Device {}: no hex value in {:?}", self.device_id, response);
        }
        Ok(hex)
    }

    /// Raw type code, fetched on first use.
    pub async fn get_type_code(&self) -> Result<Option<String>> {
        if let Some(code) = self.cache.read().await.type_code.clone() {
            return Ok(Some(code));
        }
        let code = self.fetch_hex(Command::DeviceInfo { id: self.id }).await?;
        if let Some(ref code) = code {
            self.cache.write().await.type_code = Some(code.clone());
        }
        Ok(code)
    }

    pub async fn get_device_type(&self) -> Result<DeviceType> {
        if let Some(device_type) = self.cache.read().await.device_type {
            return Ok(device_type);
        }
        let Some(code) = self.get_type_code().await? else {
            return Ok(DeviceType::Unknown);
        };
        let device_type = DeviceType::from_code(&code);
        self.cache.write().await.device_type = Some(device_type);
        Ok(device_type)
    }

    /// Poll the current status code. A parsed code replaces the cached one.
    pub async fn get_status_code(&self) -> Result<Option<String>> {
        let code = self.fetch_hex(Command::DeviceStatus { id: self.id }).await?;
        if let Some(ref code) = code {
            self.cache.write().await.status_code = Some(code.clone());
        }
        Ok(code)
    }

    pub async fn get_status(&self) -> Result<DeviceStatus> {
        let type_code = self.get_type_code().await?;
        let status_code = self.get_status_code().await?;
        Ok(DeviceStatus::derive(type_code.as_deref(), status_code.as_deref()))
    }

    /// Serial number, fetched on first use.
    pub async fn get_serial_number(&self) -> Result<Option<String>> {
        if let Some(serial) = self.cache.read().await.serial_number.clone() {
            return Ok(Some(serial));
        }
        let serial = self.fetch_hex(Command::DeviceId { id: self.id }).await?;
        if let Some(ref serial) = serial {
            self.cache.write().await.serial_number = Some(serial.clone());
        }
        Ok(serial)
    }

    /// Battery level 0-255. Always fetched.
    pub async fn get_battery(&self) -> Result<Option<u8>> {
        let hex = self.fetch_hex(Command::BatteryStatus { id: self.id }).await?;
        Ok(hex.and_then(|h| u8::from_str_radix(&h, 16).ok()))
    }

    /// Send `?POINTSET` for this device and return the raw response.
    ///
    /// Local state is left alone; the bridge reports the resulting change
    /// as a notification.
    pub async fn set_point(&self, value: &str) -> Result<String> {
        let command = Command::SetDeviceStatus {
            id: self.id,
            value: value.to_string(),
        };
        self.transport.send_command(&command.to_wire_string()).await
    }

    /// Record a status code without any I/O. Returns the previous code.
    pub async fn apply_status_code(&self, status_code: &str) -> Option<String> {
        self.cache
            .write()
            .await
            .status_code
            .replace(status_code.to_string())
    }

    pub async fn status_code(&self) -> Option<String> {
        self.cache.read().await.status_code.clone()
    }

    pub async fn type_code(&self) -> Option<String> {
        self.cache.read().await.type_code.clone()
    }

    pub async fn serial_number(&self) -> Option<String> {
        self.cache.read().await.serial_number.clone()
    }

    /// Status derived from the cached codes.
    pub async fn status(&self) -> DeviceStatus {
        let cache = self.cache.read().await;
        DeviceStatus::derive(cache.type_code.as_deref(), cache.status_code.as_deref())
    }

    pub async fn is_tampered(&self) -> bool {
        self.cache
            .read()
            .await
            .status_code
            .as_deref()
            .is_some_and(is_tamper_code)
    }

    /// Snapshot of the cached fields.
    pub async fn state(&self) -> DeviceState {
        let cache = self.cache.read().await;
        let device_type = cache.device_type.unwrap_or_else(|| {
            cache
                .type_code
                .as_deref()
                .map_or(DeviceType::Unknown, DeviceType::from_code)
        });
        DeviceState {
            id: self.id,
            device_id: self.device_id.clone(),
            type_code: cache.type_code.clone(),
            device_type,
            serial_number: cache.serial_number.clone(),
            status_code: cache.status_code.clone(),
            status: DeviceStatus::derive(cache.type_code.as_deref(), cache.status_code.as_deref()),
            temper: cache.status_code.as_deref().is_some_and(is_tamper_code),
        }
    }

    /// Fetch battery, type, serial number and status concurrently.
    pub async fn snapshot(&self) -> Result<DeviceSnapshot> {
        let (battery, device_type, serial_number, status) = tokio::try_join!(
            self.get_battery(),
            self.get_device_type(),
            self.get_serial_number(),
            self.get_status(),
        )?;
        Ok(DeviceSnapshot {
            id: self.id,
            battery,
            device_type,
            serial_number,
            status,
            temper: self.is_tampered().await,
        })
    }
}

impl<T: Transport> fmt::Debug for Device<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("id", &self.id)
            .field("device_id", &self.device_id)
            .finish_non_exhaustive()
    }
}
