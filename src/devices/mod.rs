// MIT License - Copyright (c) 2026 Peter Wright
// Insynctive bridge client

pub mod device;

pub use device::{is_tamper_code, Device, DeviceSnapshot, DeviceState, DeviceStatus, DeviceType};
