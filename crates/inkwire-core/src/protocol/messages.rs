//! Typed payloads for every message the driver exchanges with the pen.
//!
//! These are the structs the inbound parser produces and the outbound
//! builders consume.  Byte layouts live in [`super::builder`] and
//! [`super::parser`]; this module only carries meaning.

use serde::{Deserialize, Serialize};

use crate::domain::paper::{NoteId, PageAddress};

/// Default password shipped on every pen.  Setting it as a *new* password is
/// rejected locally: the device treats it as "no password" and the account
/// would silently lose protection.
pub const DEFAULT_PASSWORD: &str = "0000";

/// Protocol version string the driver advertises during the handshake.
pub const SUPPORTED_PROTOCOL_VERSION: &str = "2.18";

/// Fixed profile store identity.  The device's profile partition is gated by
/// a vendor credential pair, not by caller-supplied names.
pub const PROFILE_NAME: &str = "neolab";
/// Fixed profile store secret matching [`PROFILE_NAME`].
pub const PROFILE_SECRET: [u8; 8] = [0x6B, 0xCA, 0x6B, 0x50, 0x5D, 0xEC, 0xA7, 0x8C];

// ── Version handshake ─────────────────────────────────────────────────────────

/// Device identity and capabilities, produced by the version handshake.
/// Replaces any previous value for the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceVersionInfo {
    pub device_name: String,
    pub firmware_version: String,
    pub protocol_version: String,
    pub sub_name: String,
    pub device_type: u16,
    pub mac: [u8; 6],
    pub pressure_sensor_type: u8,
    /// Whether the firmware accepts zlib-compressed upload chunks.
    pub supports_compression: bool,
}

impl DeviceVersionInfo {
    /// Parses `"major.minor"` out of the protocol version string; trailing
    /// components are ignored the way the handshake comparison does.
    pub fn protocol_version_number(&self) -> Option<f32> {
        let mut parts = self.protocol_version.split('.');
        let major = parts.next()?;
        match parts.next() {
            Some(minor) => format!("{major}.{minor}").parse().ok(),
            None => major.parse().ok(),
        }
    }
}

// ── Settings ──────────────────────────────────────────────────────────────────

/// Snapshot of the pen's configuration, replaced wholesale on every settings
/// response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingInfo {
    /// Device clock, milliseconds since the Unix epoch.
    pub timestamp: u64,
    pub auto_power_off_minutes: u16,
    pub max_force: u16,
    pub battery_percent: u8,
    pub used_memory_percent: u8,
    pub led_color: u32,
    pub auto_power_on: bool,
    pub beep: bool,
    pub hover: bool,
    pub offline_store: bool,
    pub down_sampling: bool,
    pub sensitivity: u8,
}

/// Identifies one mutable setting in change requests and acks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum SettingKind {
    Timestamp = 0x01,
    AutoPowerOffTime = 0x02,
    PenCapOff = 0x03,
    AutoPowerOn = 0x04,
    Beep = 0x05,
    Hover = 0x06,
    OfflineData = 0x07,
    LedColor = 0x08,
    Sensitivity = 0x09,
    UsbMode = 0x0A,
    DownSampling = 0x0B,
    BtLocalName = 0x0C,
    FscSensitivity = 0x0D,
    DataTransmissionType = 0x0E,
    BeepAndLight = 0x10,
    InitDisk = 0x11,
}

impl TryFrom<u8> for SettingKind {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, ()> {
        match value {
            0x01 => Ok(SettingKind::Timestamp),
            0x02 => Ok(SettingKind::AutoPowerOffTime),
            0x03 => Ok(SettingKind::PenCapOff),
            0x04 => Ok(SettingKind::AutoPowerOn),
            0x05 => Ok(SettingKind::Beep),
            0x06 => Ok(SettingKind::Hover),
            0x07 => Ok(SettingKind::OfflineData),
            0x08 => Ok(SettingKind::LedColor),
            0x09 => Ok(SettingKind::Sensitivity),
            0x0A => Ok(SettingKind::UsbMode),
            0x0B => Ok(SettingKind::DownSampling),
            0x0C => Ok(SettingKind::BtLocalName),
            0x0D => Ok(SettingKind::FscSensitivity),
            0x0E => Ok(SettingKind::DataTransmissionType),
            0x10 => Ok(SettingKind::BeepAndLight),
            0x11 => Ok(SettingKind::InitDisk),
            _ => Err(()),
        }
    }
}

/// One requested setting change, with the value typed per setting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SettingChange {
    /// Milliseconds since the Unix epoch.
    Timestamp(u64),
    /// Minutes until auto power-off (1..=3600 on protocol 2.18).
    AutoPowerOffTime(u16),
    PenCapOff(bool),
    AutoPowerOn(bool),
    Beep(bool),
    Hover(bool),
    OfflineData(bool),
    /// ARGB color for the cap LED.
    LedColor(u32),
    /// FSR pressure step, 0 (most sensitive) to 4.
    Sensitivity(u8),
    UsbMode(u8),
    DownSampling(bool),
    /// Bluetooth advertising name, up to 16 bytes.
    BtLocalName(String),
    /// FSC pressure step, 0 (most sensitive) to 4.
    FscSensitivity(u16),
    DataTransmissionType(u8),
    BeepAndLight,
    /// Formats the pen's internal storage.
    InitDisk,
}

impl SettingChange {
    pub fn kind(&self) -> SettingKind {
        match self {
            SettingChange::Timestamp(_) => SettingKind::Timestamp,
            SettingChange::AutoPowerOffTime(_) => SettingKind::AutoPowerOffTime,
            SettingChange::PenCapOff(_) => SettingKind::PenCapOff,
            SettingChange::AutoPowerOn(_) => SettingKind::AutoPowerOn,
            SettingChange::Beep(_) => SettingKind::Beep,
            SettingChange::Hover(_) => SettingKind::Hover,
            SettingChange::OfflineData(_) => SettingKind::OfflineData,
            SettingChange::LedColor(_) => SettingKind::LedColor,
            SettingChange::Sensitivity(_) => SettingKind::Sensitivity,
            SettingChange::UsbMode(_) => SettingKind::UsbMode,
            SettingChange::DownSampling(_) => SettingKind::DownSampling,
            SettingChange::BtLocalName(_) => SettingKind::BtLocalName,
            SettingChange::FscSensitivity(_) => SettingKind::FscSensitivity,
            SettingChange::DataTransmissionType(_) => SettingKind::DataTransmissionType,
            SettingChange::BeepAndLight => SettingKind::BeepAndLight,
            SettingChange::InitDisk => SettingKind::InitDisk,
        }
    }
}

// ── Realtime stroke events ────────────────────────────────────────────────────

/// Pen tip transition direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum PenTipSwitch {
    Down = 0x00,
    Up = 0x01,
}

impl TryFrom<u8> for PenTipSwitch {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, ()> {
        match value {
            0x00 => Ok(PenTipSwitch::Down),
            0x01 => Ok(PenTipSwitch::Up),
            _ => Err(()),
        }
    }
}

/// Pen up/down event body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PenUpDown {
    /// Device timestamp, milliseconds since the Unix epoch.
    pub timestamp: u64,
    pub direction: PenTipSwitch,
    /// 0 = normal tip, 1 = eraser tip.
    pub tip_type: u8,
    /// ARGB ink color currently assigned to the tip.
    pub tip_color: u32,
    /// Stroke statistics carried only by the counted pen-up variant.
    pub dot_count: Option<u16>,
    pub image_count: Option<u16>,
}

/// One coordinate sample.
///
/// `x`/`y` are integer ncode cell coordinates; `fx`/`fy` are the fractional
/// part in 1/100 cells.  Tilt is degrees from vertical per axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dot {
    /// Milliseconds since the previous event in the stroke.
    pub time_delta: u8,
    pub force: u16,
    pub x: u16,
    pub y: u16,
    pub fx: u8,
    pub fy: u8,
    pub tilt_x: u8,
    pub tilt_y: u8,
    pub twist: u16,
}

/// Distinguishes inked samples from hover samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DotKind {
    Stroke,
    Hover,
}

/// Optical tracking failure report emitted instead of a dot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DotError {
    pub time_delta: u8,
    pub force: u16,
    pub brightness: u8,
    pub exposure_time: u8,
    pub process_time: u8,
    pub label_count: u16,
    pub nadc_error: u8,
}

// ── Note subscription ─────────────────────────────────────────────────────────

/// What the realtime stroke subscription covers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NoteFilter {
    /// Every section, owner, and note.
    All,
    /// All notes under the given section/owner pairs.
    Sections(Vec<(u8, u32)>),
    /// An explicit list of notes.
    Notes(Vec<NoteId>),
}

// ── Offline data ──────────────────────────────────────────────────────────────

/// Pages stored offline for a note.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfflinePageList {
    pub note: NoteId,
    pub pages: Vec<u32>,
}

/// Acknowledgement of an offline fetch: what the pen is about to stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfflineFetchAck {
    pub page_count: u16,
    pub total_bytes: u32,
}

/// One reassembled page of offline stroke data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfflinePage {
    pub address: PageAddress,
    /// Raw stroke records for the whole page, decompressed.
    pub data: Vec<u8>,
}

// ── Firmware upload ───────────────────────────────────────────────────────────

/// Device verdict on a firmware upload negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum FirmwareAckCode {
    Granted = 0x00,
    Denied = 0x01,
    InProgress = 0x02,
    InsufficientSpace = 0x03,
    CompressionUnsupported = 0x04,
}

impl TryFrom<u8> for FirmwareAckCode {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, ()> {
        match value {
            0x00 => Ok(FirmwareAckCode::Granted),
            0x01 => Ok(FirmwareAckCode::Denied),
            0x02 => Ok(FirmwareAckCode::InProgress),
            0x03 => Ok(FirmwareAckCode::InsufficientSpace),
            0x04 => Ok(FirmwareAckCode::CompressionUnsupported),
            _ => Err(()),
        }
    }
}

/// State of the chunk round-trip, carried in each pen packet request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum FirmwarePacketStatus {
    /// Send the chunk at the requested offset.
    Continue = 0x00,
    /// All chunks received; the upload is done.
    Finished = 0x01,
    /// The device aborted the upload.
    Error = 0x02,
}

impl TryFrom<u8> for FirmwarePacketStatus {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, ()> {
        match value {
            0x00 => Ok(FirmwarePacketStatus::Continue),
            0x01 => Ok(FirmwarePacketStatus::Finished),
            0x02 => Ok(FirmwarePacketStatus::Error),
            _ => Err(()),
        }
    }
}

/// Pen-initiated request for the next firmware chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirmwarePacketRequest {
    pub status: FirmwarePacketStatus,
    /// Byte offset into the firmware image the device wants next.
    pub offset: u32,
}

// ── Profile store ─────────────────────────────────────────────────────────────

/// Profile store operation codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum ProfileOp {
    Create = 0x01,
    Delete = 0x02,
    Info = 0x03,
    WriteValue = 0x11,
    ReadValue = 0x12,
    DeleteValue = 0x13,
}

impl TryFrom<u8> for ProfileOp {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, ()> {
        match value {
            0x01 => Ok(ProfileOp::Create),
            0x02 => Ok(ProfileOp::Delete),
            0x03 => Ok(ProfileOp::Info),
            0x11 => Ok(ProfileOp::WriteValue),
            0x12 => Ok(ProfileOp::ReadValue),
            0x13 => Ok(ProfileOp::DeleteValue),
            _ => Err(()),
        }
    }
}

/// One key/value read back from the profile store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileValue {
    pub key: String,
    /// Per-key device status; 0 means the value was found.
    pub status: u8,
    pub value: Vec<u8>,
}

/// Per-key status for write and delete operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileKeyStatus {
    pub key: String,
    pub status: u8,
}

/// Operation-specific tail of a profile ack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProfileAckDetail {
    /// Create/delete acknowledge with no extra data.
    None,
    /// Partition geometry, answering an info request.
    Info {
        sector_size: u16,
        total_sectors: u16,
        used_sectors: u16,
    },
    /// Values answering a read request.
    Values(Vec<ProfileValue>),
    /// Per-key statuses answering a write or delete-value request.
    Statuses(Vec<ProfileKeyStatus>),
}

/// Acknowledgement of a profile operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileAck {
    pub name: String,
    pub op: ProfileOp,
    pub detail: ProfileAckDetail,
}

// ── Shutdown reasons ──────────────────────────────────────────────────────────

/// Why the pen powered itself off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum ShutdownReason {
    AutoPowerOff = 0x01,
    LowBattery = 0x02,
    UpdateRestart = 0x03,
    PowerKey = 0x04,
    PenCapClosed = 0x05,
    Other = 0xFF,
}

impl From<u8> for ShutdownReason {
    fn from(value: u8) -> Self {
        match value {
            0x01 => ShutdownReason::AutoPowerOff,
            0x02 => ShutdownReason::LowBattery,
            0x03 => ShutdownReason::UpdateRestart,
            0x04 => ShutdownReason::PowerKey,
            0x05 => ShutdownReason::PenCapClosed,
            _ => ShutdownReason::Other,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setting_change_reports_matching_kind() {
        assert_eq!(
            SettingChange::AutoPowerOffTime(20).kind(),
            SettingKind::AutoPowerOffTime
        );
        assert_eq!(SettingChange::Beep(true).kind(), SettingKind::Beep);
        assert_eq!(SettingChange::InitDisk.kind(), SettingKind::InitDisk);
    }

    #[test]
    fn test_setting_kind_round_trips_through_wire_id() {
        for id in (0x01..=0x0E).chain([0x10, 0x11]) {
            let kind = SettingKind::try_from(id).unwrap();
            assert_eq!(kind as u8, id);
        }
        assert!(SettingKind::try_from(0x0F).is_err());
    }

    #[test]
    fn test_protocol_version_number_takes_major_minor() {
        let mut info = version_info("2.18.1");
        assert_eq!(info.protocol_version_number(), Some(2.18));
        info.protocol_version = "2".into();
        assert_eq!(info.protocol_version_number(), Some(2.0));
        info.protocol_version = "garbage".into();
        assert_eq!(info.protocol_version_number(), None);
    }

    #[test]
    fn test_firmware_ack_code_covers_compression_refusal() {
        assert_eq!(
            FirmwareAckCode::try_from(4),
            Ok(FirmwareAckCode::CompressionUnsupported)
        );
        assert!(FirmwareAckCode::try_from(9).is_err());
    }

    #[test]
    fn test_shutdown_reason_maps_unknown_codes_to_other() {
        assert_eq!(ShutdownReason::from(0x02), ShutdownReason::LowBattery);
        assert_eq!(ShutdownReason::from(0x77), ShutdownReason::Other);
    }

    fn version_info(protocol: &str) -> DeviceVersionInfo {
        DeviceVersionInfo {
            device_name: "NWP-F30".into(),
            firmware_version: "1.10".into(),
            protocol_version: protocol.into(),
            sub_name: String::new(),
            device_type: 1,
            mac: [0; 6],
            pressure_sensor_type: 0,
            supports_compression: false,
        }
    }
}
