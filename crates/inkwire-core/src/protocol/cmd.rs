//! Command catalog and fixed protocol constants.
//!
//! One byte of every frame names the command.  Host-originated requests
//! live below 0x80; pen-originated responses mirror them with the high bit
//! set.  The realtime event block (0x61-0x6F) and the two pen-initiated
//! transfer commands (0x24 offline data, 0x32 firmware packet) are the
//! exception: the pen sends them unsolicited and they carry no result byte.

use serde::{Deserialize, Serialize};

// ── Frame delimiters ──────────────────────────────────────────────────────────

/// Frame start byte (STX).
pub const STX: u8 = 0xC0;
/// Frame end byte (ETX).
pub const ETX: u8 = 0xC1;
/// Escape byte (DLE); the following byte is XORed with [`ESCAPE_XOR`].
pub const DLE: u8 = 0x7D;
/// XOR mask applied to an escaped byte.
pub const ESCAPE_XOR: u8 = 0x20;

// ── Header layout ─────────────────────────────────────────────────────────────

/// Offset of the command byte within a frame (byte 0 is STX).
pub const POS_CMD: usize = 1;
/// Offset of the result byte within a response frame.
pub const POS_RESULT: usize = 2;
/// Offset of the length field within a request or event frame.
pub const POS_LEN_EVENT: usize = 2;
/// Offset of the length field within a response frame.
pub const POS_LEN_RESPONSE: usize = 3;

/// Unescaped header size of a request/event body: command + 2-byte length.
pub const EVENT_HEADER_SIZE: usize = 3;
/// Unescaped header size of a response body: command + result + 2-byte length.
pub const RESPONSE_HEADER_SIZE: usize = 4;

/// Largest declared payload length the parser will accept.  Anything above
/// this is treated as a protocol violation rather than an allocation request.
pub const MAX_PAYLOAD_LEN: usize = 8192;

// ── Command catalog ───────────────────────────────────────────────────────────

/// Every command id the driver speaks, host to pen and pen to host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Cmd {
    // Host → pen
    VersionRequest = 0x01,
    PasswordRequest = 0x02,
    PasswordChangeRequest = 0x03,
    SettingInfoRequest = 0x04,
    SettingChangeRequest = 0x05,
    OnlineDataRequest = 0x11,
    OfflineNoteListRequest = 0x21,
    OfflinePageListRequest = 0x22,
    OfflineDataRequest = 0x23,
    OfflineDataDeleteRequest = 0x25,
    FirmwareUploadRequest = 0x31,
    PenProfileRequest = 0x41,
    /// Host ack for one pen-initiated offline data packet.
    OfflinePacketAck = 0xA4,
    /// Host upload of one firmware chunk, answering [`Cmd::FirmwarePacketRequest`].
    FirmwarePacketResponse = 0xB2,

    // Pen → host, unsolicited (no result byte)
    LowBatteryEvent = 0x61,
    ShutdownEvent = 0x62,
    PenUpDownEvent = 0x63,
    PaperInfoEvent = 0x64,
    PenDotEvent = 0x65,
    PenErrorEvent = 0x68,
    NewPenDownEvent = 0x69,
    NewPenUpEvent = 0x6A,
    NewPaperInfoEvent = 0x6B,
    NewPenDotEvent = 0x6C,
    NewPenErrorEvent = 0x6D,
    PenHoverEvent = 0x6F,
    /// One packet of buffered offline stroke data (pen-initiated).
    OfflinePacketData = 0x24,
    /// The pen asks for the firmware chunk at a given offset (pen-initiated).
    FirmwarePacketRequest = 0x32,

    // Pen → host responses (carry a result byte)
    VersionResponse = 0x81,
    PasswordResponse = 0x82,
    PasswordChangeResponse = 0x83,
    SettingInfoResponse = 0x84,
    SettingChangeResponse = 0x85,
    OnlineDataResponse = 0x91,
    OfflineNoteListResponse = 0xA1,
    OfflinePageListResponse = 0xA2,
    OfflineDataResponse = 0xA3,
    OfflineDataDeleteResponse = 0xA5,
    FirmwareUploadResponse = 0xB1,
    PenProfileResponse = 0xC1,
}

impl Cmd {
    /// True when a frame with this command carries a result byte between the
    /// command and the length field.  All response-family ids (>= 0x80) do,
    /// in both directions: the host's chunk upload and offline packet ack
    /// are themselves responses to pen-initiated requests.
    pub fn carries_result(self) -> bool {
        (self as u8) >= 0x80
    }

    /// True for commands the pen may send to the host.
    pub fn is_inbound(self) -> bool {
        matches!(
            self,
            Cmd::VersionResponse
                | Cmd::PasswordResponse
                | Cmd::PasswordChangeResponse
                | Cmd::SettingInfoResponse
                | Cmd::SettingChangeResponse
                | Cmd::OnlineDataResponse
                | Cmd::OfflineNoteListResponse
                | Cmd::OfflinePageListResponse
                | Cmd::OfflineDataResponse
                | Cmd::OfflineDataDeleteResponse
                | Cmd::FirmwareUploadResponse
                | Cmd::PenProfileResponse
        ) || matches!(
                self,
                Cmd::LowBatteryEvent
                    | Cmd::ShutdownEvent
                    | Cmd::PenUpDownEvent
                    | Cmd::PaperInfoEvent
                    | Cmd::PenDotEvent
                    | Cmd::PenErrorEvent
                    | Cmd::NewPenDownEvent
                    | Cmd::NewPenUpEvent
                    | Cmd::NewPaperInfoEvent
                    | Cmd::NewPenDotEvent
                    | Cmd::NewPenErrorEvent
                    | Cmd::PenHoverEvent
                    | Cmd::OfflinePacketData
                    | Cmd::FirmwarePacketRequest
            )
    }
}

impl TryFrom<u8> for Cmd {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, ()> {
        match value {
            0x01 => Ok(Cmd::VersionRequest),
            0x02 => Ok(Cmd::PasswordRequest),
            0x03 => Ok(Cmd::PasswordChangeRequest),
            0x04 => Ok(Cmd::SettingInfoRequest),
            0x05 => Ok(Cmd::SettingChangeRequest),
            0x11 => Ok(Cmd::OnlineDataRequest),
            0x21 => Ok(Cmd::OfflineNoteListRequest),
            0x22 => Ok(Cmd::OfflinePageListRequest),
            0x23 => Ok(Cmd::OfflineDataRequest),
            0x24 => Ok(Cmd::OfflinePacketData),
            0x25 => Ok(Cmd::OfflineDataDeleteRequest),
            0x31 => Ok(Cmd::FirmwareUploadRequest),
            0x32 => Ok(Cmd::FirmwarePacketRequest),
            0x41 => Ok(Cmd::PenProfileRequest),
            0x61 => Ok(Cmd::LowBatteryEvent),
            0x62 => Ok(Cmd::ShutdownEvent),
            0x63 => Ok(Cmd::PenUpDownEvent),
            0x64 => Ok(Cmd::PaperInfoEvent),
            0x65 => Ok(Cmd::PenDotEvent),
            0x68 => Ok(Cmd::PenErrorEvent),
            0x69 => Ok(Cmd::NewPenDownEvent),
            0x6A => Ok(Cmd::NewPenUpEvent),
            0x6B => Ok(Cmd::NewPaperInfoEvent),
            0x6C => Ok(Cmd::NewPenDotEvent),
            0x6D => Ok(Cmd::NewPenErrorEvent),
            0x6F => Ok(Cmd::PenHoverEvent),
            0x81 => Ok(Cmd::VersionResponse),
            0x82 => Ok(Cmd::PasswordResponse),
            0x83 => Ok(Cmd::PasswordChangeResponse),
            0x84 => Ok(Cmd::SettingInfoResponse),
            0x85 => Ok(Cmd::SettingChangeResponse),
            0x91 => Ok(Cmd::OnlineDataResponse),
            0xA1 => Ok(Cmd::OfflineNoteListResponse),
            0xA2 => Ok(Cmd::OfflinePageListResponse),
            0xA3 => Ok(Cmd::OfflineDataResponse),
            0xA4 => Ok(Cmd::OfflinePacketAck),
            0xA5 => Ok(Cmd::OfflineDataDeleteResponse),
            0xB1 => Ok(Cmd::FirmwareUploadResponse),
            0xB2 => Ok(Cmd::FirmwarePacketResponse),
            0xC1 => Ok(Cmd::PenProfileResponse),
            _ => Err(()),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
