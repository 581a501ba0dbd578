//! Inbound byte-stream parser and multi-packet state machine.
//!
//! [`InboundParser::feed`] consumes link notifications of any size - a
//! single frame may arrive split across many calls, and one call may carry
//! several frames - and returns the typed [`InboundEvent`]s completed by
//! those bytes, in arrival order.
//!
//! Error policy: a malformed frame (framing damage, unknown command, bad
//! payload, checksum mismatch) is reported as an event and dropped; the
//! scanner resynchronises on the next frame start, so one bad frame never
//! poisons the frames around it.  Nothing here performs I/O; replying to
//! pen-initiated packets is the session's job.

use std::io::Read;

use tracing::{debug, warn};

use crate::domain::paper::{unpack_section_owner, NoteId, PageAddress};
use crate::protocol::buffer::{checksum, ByteReader, ShortRead};
use crate::protocol::cmd::Cmd;
use crate::protocol::framing::{FrameScanner, FramingError, RawFrame};
use crate::protocol::messages::{
    DeviceVersionInfo, Dot, DotError, DotKind, FirmwareAckCode, FirmwarePacketRequest,
    FirmwarePacketStatus, OfflineFetchAck, OfflinePage, OfflinePageList, PenTipSwitch, PenUpDown,
    ProfileAck, ProfileAckDetail, ProfileKeyStatus, ProfileOp, ProfileValue, SettingInfo,
    SettingKind, ShutdownReason,
};

/// Everything the parser can hand back to the session.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    // ── Handshake / auth ────────────────────────────────────────────────────
    VersionInfo(DeviceVersionInfo),
    /// Password accepted (or none set); the session is usable.
    Authorized,
    /// The pen wants a password, or rejected the one supplied.
    PasswordRequired {
        device_code: u8,
        retry_count: u8,
        /// Device uptime ms after which the retry counter resets.
        reset_time: u64,
    },
    PasswordChanged,
    PasswordChangeRejected { device_code: u8, retry_count: u8 },

    // ── Settings ────────────────────────────────────────────────────────────
    SettingInfo(SettingInfo),
    SettingChanged { kind: SettingKind },
    SubscriptionReady,

    // ── Device lifecycle ────────────────────────────────────────────────────
    LowBattery { percent: u8 },
    Shutdown { reason: ShutdownReason },

    // ── Realtime strokes ────────────────────────────────────────────────────
    PenUpDown { counter: Option<u8>, event: PenUpDown },
    PaperInfo { counter: Option<u8>, page: PageAddress },
    Dot { counter: Option<u8>, kind: DotKind, dot: Dot },
    DotError { counter: Option<u8>, error: DotError },

    // ── Offline transfer ────────────────────────────────────────────────────
    OfflineNoteList(Vec<NoteId>),
    OfflinePageList(OfflinePageList),
    OfflineFetchAck(OfflineFetchAck),
    /// One data packet arrived; the session must ack it with `valid`.
    OfflinePacket { packet_id: u16, valid: bool },
    /// A page's packets are complete; the accumulated buffer is flushed.
    OfflinePageReady(OfflinePage),
    OfflineDeleted,

    // ── Firmware upload ─────────────────────────────────────────────────────
    FirmwareAck(FirmwareAckCode),
    FirmwarePacketRequest(FirmwarePacketRequest),

    // ── Profile store ───────────────────────────────────────────────────────
    ProfileAck(ProfileAck),

    // ── Reported faults (discard-and-continue) ──────────────────────────────
    /// The device answered a request with a non-zero result code.
    DeviceRejected { cmd: Cmd, code: u8 },
    /// Frame-level damage; the frame was dropped.
    Framing(FramingError),
    /// The frame parsed but its payload did not.
    BadPayload { cmd: Cmd, reason: String },
    /// An embedded data checksum did not match.
    ChecksumMismatch { cmd: Cmd, expected: u8, actual: u8 },
}

/// Internal payload-decode error, reported as [`InboundEvent::BadPayload`].
#[derive(Debug)]
enum PayloadError {
    Short(ShortRead),
    Value { field: &'static str, value: u32 },
    Inflate(std::io::Error),
}

impl From<ShortRead> for PayloadError {
    fn from(err: ShortRead) -> Self {
        PayloadError::Short(err)
    }
}

impl std::fmt::Display for PayloadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PayloadError::Short(e) => write!(f, "{e}"),
            PayloadError::Value { field, value } => {
                write!(f, "bad value {value} for {field}")
            }
            PayloadError::Inflate(e) => write!(f, "inflate failed: {e}"),
        }
    }
}

/// Incremental inbound parser.  One per session; [`reset`](Self::reset) on
/// every (re)connect.
#[derive(Debug, Default)]
pub struct InboundParser {
    scanner: FrameScanner,
    /// Page buffer being accumulated from offline data packets.
    current_page: Option<(PageAddress, Vec<u8>)>,
}

impl InboundParser {
    pub fn new() -> Self {
        Self {
            scanner: FrameScanner::new(),
            current_page: None,
        }
    }

    /// Drops scanner state and any half-accumulated page.
    pub fn reset(&mut self) {
        self.scanner.reset();
        self.current_page = None;
    }

    /// Consumes one link notification and returns the events it completed.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<InboundEvent> {
        let mut events = Vec::new();
        for body in self.scanner.feed(bytes) {
            match body {
                Ok(body) => match RawFrame::decode(&body) {
                    Ok(frame) => self.dispatch(frame, &mut events),
                    Err(err) => {
                        warn!(%err, "dropped undecodable frame");
                        events.push(InboundEvent::Framing(err));
                    }
                },
                Err(err) => {
                    warn!(%err, "dropped damaged frame");
                    events.push(InboundEvent::Framing(err));
                }
            }
        }
        events
    }

    fn dispatch(&mut self, frame: RawFrame, events: &mut Vec<InboundEvent>) {
        let cmd = frame.cmd;
        if !cmd.is_inbound() {
            warn!(?cmd, "host-originated command arrived from the pen");
            events.push(InboundEvent::BadPayload {
                cmd,
                reason: "command is host-originated".into(),
            });
            return;
        }

        // Non-zero result codes short-circuit payload decoding for most
        // responses; password and firmware responses give the code meaning.
        if let Some(code) = frame.result {
            if code != 0
                && !matches!(
                    cmd,
                    Cmd::PasswordResponse | Cmd::PasswordChangeResponse | Cmd::FirmwareUploadResponse
                )
            {
                debug!(?cmd, code, "device rejected request");
                events.push(InboundEvent::DeviceRejected { cmd, code });
                return;
            }
        }

        let result = match cmd {
            Cmd::VersionResponse => decode_version(&frame.payload),
            Cmd::PasswordResponse | Cmd::PasswordChangeResponse => {
                decode_password(cmd, frame.result.unwrap_or(0), &frame.payload)
            }
            Cmd::SettingInfoResponse => decode_setting_info(&frame.payload),
            Cmd::SettingChangeResponse => decode_setting_changed(&frame.payload),
            Cmd::OnlineDataResponse => Ok(vec![InboundEvent::SubscriptionReady]),
            Cmd::LowBatteryEvent => decode_low_battery(&frame.payload),
            Cmd::ShutdownEvent => decode_shutdown(&frame.payload),
            Cmd::PenUpDownEvent => decode_updown_legacy(&frame.payload),
            Cmd::NewPenDownEvent => decode_counted_down(&frame.payload),
            Cmd::NewPenUpEvent => decode_counted_up(&frame.payload),
            Cmd::PaperInfoEvent => decode_paper_info(None, &frame.payload),
            Cmd::NewPaperInfoEvent => decode_counted_paper_info(&frame.payload),
            Cmd::PenDotEvent => decode_dot(None, DotKind::Stroke, &frame.payload),
            Cmd::PenHoverEvent => decode_dot(None, DotKind::Hover, &frame.payload),
            Cmd::NewPenDotEvent => decode_counted_dot(&frame.payload),
            Cmd::PenErrorEvent => decode_dot_error(None, &frame.payload),
            Cmd::NewPenErrorEvent => decode_counted_dot_error(&frame.payload),
            Cmd::OfflineNoteListResponse => decode_offline_note_list(&frame.payload),
            Cmd::OfflinePageListResponse => decode_offline_page_list(&frame.payload),
            Cmd::OfflineDataResponse => decode_offline_fetch_ack(&frame.payload),
            Cmd::OfflinePacketData => self.decode_offline_packet(&frame.payload),
            Cmd::OfflineDataDeleteResponse => Ok(vec![InboundEvent::OfflineDeleted]),
            Cmd::FirmwareUploadResponse => decode_firmware_ack(frame.result.unwrap_or(0)),
            Cmd::FirmwarePacketRequest => decode_firmware_packet_request(&frame.payload),
            Cmd::PenProfileResponse => decode_profile_ack(&frame.payload),
            // Host-originated ids were rejected above; nothing reaches here.
            other => Err(PayloadError::Value {
                field: "command",
                value: u32::from(other as u8),
            }),
        };

        match result {
            Ok(mut produced) => events.append(&mut produced),
            Err(err) => {
                warn!(?cmd, %err, "dropped frame with bad payload");
                events.push(InboundEvent::BadPayload {
                    cmd,
                    reason: err.to_string(),
                });
            }
        }
    }

    /// Offline data packets accumulate per page; the page-end flag flushes
    /// the buffer as one [`OfflinePage`].  Two pages never share a buffer:
    /// a packet for a different page starts a fresh accumulation.
    fn decode_offline_packet(&mut self, payload: &[u8]) -> Result<Vec<InboundEvent>, PayloadError> {
        let mut r = ByteReader::new(payload);
        let packet_id = r.read_u16()?;
        let page_end = r.read_u8()? != 0;
        let compressed = r.read_u8()? != 0;
        let before_size = r.read_u16()?;
        let after_size = r.read_u16()?;
        let (section, owner) = unpack_section_owner(r.read_array::<4>()?);
        let note = r.read_u32()?;
        let page = r.read_u32()?;
        let expected_checksum = r.read_u8()?;
        let raw = r.read_rest();

        let data = if compressed {
            if raw.len() != after_size as usize {
                return Err(PayloadError::Value {
                    field: "compressed size",
                    value: raw.len() as u32,
                });
            }
            inflate(raw, before_size as usize)?
        } else {
            raw.to_vec()
        };
        if data.len() != before_size as usize {
            return Err(PayloadError::Value {
                field: "data size",
                value: data.len() as u32,
            });
        }

        let actual = checksum(&data);
        if actual != expected_checksum {
            // Report and nack; the pen will resend this packet.
            return Ok(vec![
                InboundEvent::ChecksumMismatch {
                    cmd: Cmd::OfflinePacketData,
                    expected: expected_checksum,
                    actual,
                },
                InboundEvent::OfflinePacket {
                    packet_id,
                    valid: false,
                },
            ]);
        }

        let address = PageAddress {
            section,
            owner,
            note,
            page,
        };

        let mut events = vec![InboundEvent::OfflinePacket {
            packet_id,
            valid: true,
        }];

        match &mut self.current_page {
            Some((current, buf)) if *current == address => buf.extend_from_slice(&data),
            Some((current, _)) => {
                warn!(
                    ?current,
                    ?address,
                    "offline packet switched page without end marker; dropping partial page"
                );
                self.current_page = Some((address, data));
            }
            None => self.current_page = Some((address, data)),
        }

        if page_end {
            if let Some((address, data)) = self.current_page.take() {
                debug!(?address, bytes = data.len(), "offline page complete");
                events.push(InboundEvent::OfflinePageReady(OfflinePage { address, data }));
            }
        }

        Ok(events)
    }
}

// ── Per-command payload decoders ──────────────────────────────────────────────

fn decode_version(payload: &[u8]) -> Result<Vec<InboundEvent>, PayloadError> {
    let mut r = ByteReader::new(payload);
    let info = DeviceVersionInfo {
        device_name: r.read_str(16)?,
        firmware_version: r.read_str(16)?,
        protocol_version: r.read_str(8)?,
        sub_name: r.read_str(16)?,
        device_type: r.read_u16()?,
        mac: r.read_array::<6>()?,
        pressure_sensor_type: r.read_u8()?,
        supports_compression: r.read_u8()? != 0,
    };
    Ok(vec![InboundEvent::VersionInfo(info)])
}

fn decode_password(
    cmd: Cmd,
    code: u8,
    payload: &[u8],
) -> Result<Vec<InboundEvent>, PayloadError> {
    if code == 0 {
        return Ok(vec![match cmd {
            Cmd::PasswordChangeResponse => InboundEvent::PasswordChanged,
            _ => InboundEvent::Authorized,
        }]);
    }
    let mut r = ByteReader::new(payload);
    let retry_count = r.read_u8()?;
    let reset_time = r.read_u64()?;
    Ok(vec![match cmd {
        Cmd::PasswordChangeResponse => InboundEvent::PasswordChangeRejected {
            device_code: code,
            retry_count,
        },
        _ => InboundEvent::PasswordRequired {
            device_code: code,
            retry_count,
            reset_time,
        },
    }])
}

fn decode_setting_info(payload: &[u8]) -> Result<Vec<InboundEvent>, PayloadError> {
    let mut r = ByteReader::new(payload);
    let info = SettingInfo {
        timestamp: r.read_u64()?,
        auto_power_off_minutes: r.read_u16()?,
        max_force: r.read_u16()?,
        battery_percent: r.read_u8()?,
        used_memory_percent: r.read_u8()?,
        led_color: r.read_u32()?,
        auto_power_on: r.read_u8()? != 0,
        beep: r.read_u8()? != 0,
        hover: r.read_u8()? != 0,
        offline_store: r.read_u8()? != 0,
        down_sampling: r.read_u8()? != 0,
        sensitivity: r.read_u8()?,
    };
    Ok(vec![InboundEvent::SettingInfo(info)])
}

fn decode_setting_changed(payload: &[u8]) -> Result<Vec<InboundEvent>, PayloadError> {
    let mut r = ByteReader::new(payload);
    let raw = r.read_u8()?;
    let kind = SettingKind::try_from(raw).map_err(|()| PayloadError::Value {
        field: "setting kind",
        value: u32::from(raw),
    })?;
    Ok(vec![InboundEvent::SettingChanged { kind }])
}

fn decode_low_battery(payload: &[u8]) -> Result<Vec<InboundEvent>, PayloadError> {
    let mut r = ByteReader::new(payload);
    Ok(vec![InboundEvent::LowBattery {
        percent: r.read_u8()?,
    }])
}

fn decode_shutdown(payload: &[u8]) -> Result<Vec<InboundEvent>, PayloadError> {
    let mut r = ByteReader::new(payload);
    Ok(vec![InboundEvent::Shutdown {
        reason: ShutdownReason::from(r.read_u8()?),
    }])
}

fn decode_updown_legacy(payload: &[u8]) -> Result<Vec<InboundEvent>, PayloadError> {
    let mut r = ByteReader::new(payload);
    let timestamp = r.read_u64()?;
    let raw = r.read_u8()?;
    let direction = PenTipSwitch::try_from(raw).map_err(|()| PayloadError::Value {
        field: "pen tip direction",
        value: u32::from(raw),
    })?;
    let event = PenUpDown {
        timestamp,
        direction,
        tip_type: r.read_u8()?,
        tip_color: r.read_u32()?,
        dot_count: None,
        image_count: None,
    };
    Ok(vec![InboundEvent::PenUpDown {
        counter: None,
        event,
    }])
}

fn decode_counted_down(payload: &[u8]) -> Result<Vec<InboundEvent>, PayloadError> {
    let mut r = ByteReader::new(payload);
    let counter = r.read_u8()?;
    let event = PenUpDown {
        timestamp: r.read_u64()?,
        direction: PenTipSwitch::Down,
        tip_type: r.read_u8()?,
        tip_color: r.read_u32()?,
        dot_count: None,
        image_count: None,
    };
    Ok(vec![InboundEvent::PenUpDown {
        counter: Some(counter),
        event,
    }])
}

fn decode_counted_up(payload: &[u8]) -> Result<Vec<InboundEvent>, PayloadError> {
    let mut r = ByteReader::new(payload);
    let counter = r.read_u8()?;
    let timestamp = r.read_u64()?;
    let dot_count = r.read_u16()?;
    let image_count = r.read_u16()?;
    let event = PenUpDown {
        timestamp,
        direction: PenTipSwitch::Up,
        tip_type: 0,
        tip_color: 0,
        dot_count: Some(dot_count),
        image_count: Some(image_count),
    };
    Ok(vec![InboundEvent::PenUpDown {
        counter: Some(counter),
        event,
    }])
}

fn decode_paper_info(
    counter: Option<u8>,
    payload: &[u8],
) -> Result<Vec<InboundEvent>, PayloadError> {
    let mut r = ByteReader::new(payload);
    let (section, owner) = unpack_section_owner(r.read_array::<4>()?);
    let page = PageAddress {
        section,
        owner,
        note: r.read_u32()?,
        page: r.read_u32()?,
    };
    Ok(vec![InboundEvent::PaperInfo { counter, page }])
}

fn decode_counted_paper_info(payload: &[u8]) -> Result<Vec<InboundEvent>, PayloadError> {
    let mut r = ByteReader::new(payload);
    let counter = r.read_u8()?;
    decode_paper_info(Some(counter), r.read_rest())
}

fn decode_dot(
    counter: Option<u8>,
    kind: DotKind,
    payload: &[u8],
) -> Result<Vec<InboundEvent>, PayloadError> {
    let mut r = ByteReader::new(payload);
    let dot = Dot {
        time_delta: r.read_u8()?,
        force: r.read_u16()?,
        x: r.read_u16()?,
        y: r.read_u16()?,
        fx: r.read_u8()?,
        fy: r.read_u8()?,
        tilt_x: r.read_u8()?,
        tilt_y: r.read_u8()?,
        twist: r.read_u16()?,
    };
    Ok(vec![InboundEvent::Dot { counter, kind, dot }])
}

fn decode_counted_dot(payload: &[u8]) -> Result<Vec<InboundEvent>, PayloadError> {
    let mut r = ByteReader::new(payload);
    let counter = r.read_u8()?;
    decode_dot(Some(counter), DotKind::Stroke, r.read_rest())
}

fn decode_dot_error(
    counter: Option<u8>,
    payload: &[u8],
) -> Result<Vec<InboundEvent>, PayloadError> {
    let mut r = ByteReader::new(payload);
    let error = DotError {
        time_delta: r.read_u8()?,
        force: r.read_u16()?,
        brightness: r.read_u8()?,
        exposure_time: r.read_u8()?,
        process_time: r.read_u8()?,
        label_count: r.read_u16()?,
        nadc_error: r.read_u8()?,
    };
    Ok(vec![InboundEvent::DotError { counter, error }])
}

fn decode_counted_dot_error(payload: &[u8]) -> Result<Vec<InboundEvent>, PayloadError> {
    let mut r = ByteReader::new(payload);
    let counter = r.read_u8()?;
    decode_dot_error(Some(counter), r.read_rest())
}

fn decode_offline_note_list(payload: &[u8]) -> Result<Vec<InboundEvent>, PayloadError> {
    let mut r = ByteReader::new(payload);
    let count = r.read_u16()?;
    let mut notes = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let (section, owner) = unpack_section_owner(r.read_array::<4>()?);
        notes.push(NoteId {
            section,
            owner,
            note: r.read_u32()?,
        });
    }
    Ok(vec![InboundEvent::OfflineNoteList(notes)])
}

fn decode_offline_page_list(payload: &[u8]) -> Result<Vec<InboundEvent>, PayloadError> {
    let mut r = ByteReader::new(payload);
    let (section, owner) = unpack_section_owner(r.read_array::<4>()?);
    let note = r.read_u32()?;
    let count = r.read_u16()?;
    let mut pages = Vec::with_capacity(count as usize);
    for _ in 0..count {
        pages.push(r.read_u32()?);
    }
    Ok(vec![InboundEvent::OfflinePageList(OfflinePageList {
        note: NoteId {
            section,
            owner,
            note,
        },
        pages,
    })])
}

fn decode_offline_fetch_ack(payload: &[u8]) -> Result<Vec<InboundEvent>, PayloadError> {
    let mut r = ByteReader::new(payload);
    Ok(vec![InboundEvent::OfflineFetchAck(OfflineFetchAck {
        page_count: r.read_u16()?,
        total_bytes: r.read_u32()?,
    })])
}

fn decode_firmware_ack(code: u8) -> Result<Vec<InboundEvent>, PayloadError> {
    let ack = FirmwareAckCode::try_from(code).map_err(|()| PayloadError::Value {
        field: "firmware ack code",
        value: u32::from(code),
    })?;
    Ok(vec![InboundEvent::FirmwareAck(ack)])
}

fn decode_firmware_packet_request(payload: &[u8]) -> Result<Vec<InboundEvent>, PayloadError> {
    let mut r = ByteReader::new(payload);
    let raw = r.read_u8()?;
    let status = FirmwarePacketStatus::try_from(raw).map_err(|()| PayloadError::Value {
        field: "firmware packet status",
        value: u32::from(raw),
    })?;
    Ok(vec![InboundEvent::FirmwarePacketRequest(
        FirmwarePacketRequest {
            status,
            offset: r.read_u32()?,
        },
    )])
}

fn decode_profile_ack(payload: &[u8]) -> Result<Vec<InboundEvent>, PayloadError> {
    let mut r = ByteReader::new(payload);
    let name = r.read_str(8)?;
    let raw_op = r.read_u8()?;
    let op = ProfileOp::try_from(raw_op).map_err(|()| PayloadError::Value {
        field: "profile op",
        value: u32::from(raw_op),
    })?;
    let detail = match op {
        ProfileOp::Create | ProfileOp::Delete => ProfileAckDetail::None,
        ProfileOp::Info => ProfileAckDetail::Info {
            sector_size: r.read_u16()?,
            total_sectors: r.read_u16()?,
            used_sectors: r.read_u16()?,
        },
        ProfileOp::ReadValue => {
            let count = r.read_u8()?;
            let mut values = Vec::with_capacity(count as usize);
            for _ in 0..count {
                let key = r.read_str(16)?;
                let status = r.read_u8()?;
                let len = r.read_u16()?;
                values.push(ProfileValue {
                    key,
                    status,
                    value: r.read_bytes(len as usize)?.to_vec(),
                });
            }
            ProfileAckDetail::Values(values)
        }
        ProfileOp::WriteValue | ProfileOp::DeleteValue => {
            let count = r.read_u8()?;
            let mut statuses = Vec::with_capacity(count as usize);
            for _ in 0..count {
                statuses.push(ProfileKeyStatus {
                    key: r.read_str(16)?,
                    status: r.read_u8()?,
                });
            }
            ProfileAckDetail::Statuses(statuses)
        }
    };
    Ok(vec![InboundEvent::ProfileAck(ProfileAck { name, op, detail })])
}

fn inflate(data: &[u8], expected: usize) -> Result<Vec<u8>, PayloadError> {
    let mut out = Vec::with_capacity(expected);
    flate2::read::ZlibDecoder::new(data)
        .read_to_end(&mut out)
        .map_err(PayloadError::Inflate)?;
    Ok(out)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
