//! Outbound request encoders.
//!
//! One pure function per request kind; each returns the finished framed
//! byte sequence, ready for the link.  Payload layouts here are the
//! protocol contract - the inbound parser of the pen firmware reads these
//! byte-for-byte, so field order and fixed widths are not negotiable.

use thiserror::Error;
use tracing::debug;

use crate::domain::paper::{pack_section_owner, NoteId, SECTION_OWNER_WILDCARD};
use crate::protocol::buffer::{checksum, ByteWriter};
use crate::protocol::cmd::Cmd;
use crate::protocol::framing::{encode_bare_result_frame, encode_frame, encode_response_frame};
use crate::protocol::messages::{
    NoteFilter, SettingChange, PROFILE_NAME, PROFILE_SECRET,
};

/// Fixed byte widths of the wire's string fields.
const NAME_FIELD: usize = 16;
const PASSWORD_FIELD: usize = 16;
const PROTOCOL_VERSION_FIELD: usize = 8;
const PROFILE_NAME_FIELD: usize = 8;
const PROFILE_KEY_FIELD: usize = 16;

/// Magic constant required by the disk-format setting; anything else is
/// ignored by the firmware.
const INIT_DISK_MAGIC: u32 = 0x4F1C_0B42;

/// Profile partition geometry requested on create.
const PROFILE_SECTOR_SIZE: u16 = 32;
const PROFILE_SECTOR_COUNT: u16 = 128;

/// Errors raised while building a request.
#[derive(Debug, Error)]
pub enum BuildError {
    /// zlib compression of a firmware chunk failed.
    #[error("firmware chunk compression failed: {0}")]
    Compression(#[from] std::io::Error),
}

// ── Handshake and auth ────────────────────────────────────────────────────────

/// Version/info query; the first request after connecting.
pub fn version_request(app_version: &str, protocol_version: &str) -> Vec<u8> {
    let mut w = ByteWriter::with_capacity(42);
    w.put_zeros(16)
        .put_u8(0xF0)
        .put_u8(0x01)
        .put_str(app_version, NAME_FIELD)
        .put_str(protocol_version, PROTOCOL_VERSION_FIELD);
    encode_frame(Cmd::VersionRequest, w.as_slice())
}

/// Submits the pen password.
pub fn password_input(password: &str) -> Vec<u8> {
    let mut w = ByteWriter::with_capacity(PASSWORD_FIELD);
    w.put_str(password, PASSWORD_FIELD);
    encode_frame(Cmd::PasswordRequest, w.as_slice())
}

/// Changes the pen password.  `new_password = None` clears it.
pub fn password_change(old_password: &str, new_password: Option<&str>) -> Vec<u8> {
    let mut w = ByteWriter::with_capacity(33);
    w.put_u8(if new_password.is_some() { 1 } else { 0 })
        .put_str(old_password, PASSWORD_FIELD)
        .put_str(new_password.unwrap_or(""), PASSWORD_FIELD);
    encode_frame(Cmd::PasswordChangeRequest, w.as_slice())
}

// ── Settings ──────────────────────────────────────────────────────────────────

/// Queries the full settings snapshot.
pub fn setting_info_request() -> Vec<u8> {
    encode_frame(Cmd::SettingInfoRequest, &[])
}

/// Changes a single setting; the value layout is setting-specific.
pub fn setting_change(change: &SettingChange) -> Vec<u8> {
    let kind = change.kind() as u8;
    let mut w = ByteWriter::new();
    w.put_u8(kind);
    match change {
        SettingChange::Timestamp(millis) => {
            w.put_u64(*millis);
        }
        SettingChange::AutoPowerOffTime(minutes) => {
            w.put_u16(*minutes);
        }
        SettingChange::LedColor(argb) => {
            // The LED color is the one big-endian field in the protocol.
            w.put_bytes(&argb.to_be_bytes());
        }
        SettingChange::PenCapOff(on)
        | SettingChange::AutoPowerOn(on)
        | SettingChange::Beep(on)
        | SettingChange::Hover(on)
        | SettingChange::OfflineData(on)
        | SettingChange::DownSampling(on) => {
            w.put_u8(u8::from(*on));
        }
        SettingChange::Sensitivity(step) | SettingChange::UsbMode(step) | SettingChange::DataTransmissionType(step) => {
            w.put_u8(*step);
        }
        SettingChange::BtLocalName(name) => {
            w.put_u8(NAME_FIELD as u8).put_str(name, NAME_FIELD);
        }
        SettingChange::FscSensitivity(step) => {
            w.put_u16(*step);
        }
        SettingChange::BeepAndLight => {
            w.put_u8(0x00);
        }
        SettingChange::InitDisk => {
            w.put_u32(INIT_DISK_MAGIC);
        }
    }
    encode_frame(Cmd::SettingChangeRequest, w.as_slice())
}

// ── Realtime subscription ─────────────────────────────────────────────────────

/// Subscribes to realtime stroke data for the filtered notes.
pub fn note_subscription(filter: &NoteFilter) -> Vec<u8> {
    let mut w = ByteWriter::new();
    match filter {
        NoteFilter::Notes(notes) => {
            w.put_u16(notes.len() as u16);
            for note in notes {
                w.put_bytes(&pack_section_owner(note.section, note.owner))
                    .put_u32(note.note);
            }
        }
        NoteFilter::Sections(pairs) => {
            w.put_u16(pairs.len() as u16);
            for (section, owner) in pairs {
                w.put_bytes(&pack_section_owner(*section, *owner))
                    .put_u32(0xFFFF_FFFF);
            }
        }
        NoteFilter::All => {
            w.put_u8(0xFF).put_u8(0xFF);
        }
    }
    encode_frame(Cmd::OnlineDataRequest, w.as_slice())
}

// ── Offline data ──────────────────────────────────────────────────────────────

/// Lists notes with buffered offline data.  `scope = None` lists everything.
pub fn offline_note_list(scope: Option<(u8, u32)>) -> Vec<u8> {
    let packed = match scope {
        Some((section, owner)) => pack_section_owner(section, owner),
        None => SECTION_OWNER_WILDCARD,
    };
    encode_frame(Cmd::OfflineNoteListRequest, &packed)
}

/// Lists pages with buffered offline data for one note.
pub fn offline_page_list(note: NoteId) -> Vec<u8> {
    let mut w = ByteWriter::with_capacity(8);
    w.put_bytes(&pack_section_owner(note.section, note.owner))
        .put_u32(note.note);
    encode_frame(Cmd::OfflinePageListRequest, w.as_slice())
}

/// Fetches offline stroke data.  Empty `pages` means every page of the note.
pub fn offline_data_request(note: NoteId, delete_on_finished: bool, pages: &[u32]) -> Vec<u8> {
    let mut w = ByteWriter::with_capacity(14 + pages.len() * 4);
    w.put_u8(if delete_on_finished { 1 } else { 2 })
        .put_u8(0x01)
        .put_bytes(&pack_section_owner(note.section, note.owner))
        .put_u32(note.note)
        .put_u32(pages.len() as u32);
    for page in pages {
        w.put_u32(*page);
    }
    debug!(
        section = note.section,
        owner = note.owner,
        note = note.note,
        pages = pages.len(),
        "built offline data request"
    );
    encode_frame(Cmd::OfflineDataRequest, w.as_slice())
}

/// Acknowledges one received offline data packet.
pub fn offline_packet_ack(packet_id: u16, ok: bool) -> Vec<u8> {
    encode_response_frame(
        Cmd::OfflinePacketAck,
        if ok { 0 } else { 1 },
        &packet_id.to_le_bytes(),
    )
}

/// Deletes offline data for up to 64 notes under one section/owner.
pub fn offline_delete(section: u8, owner: u32, notes: &[u32]) -> Vec<u8> {
    let mut w = ByteWriter::with_capacity(5 + notes.len() * 4);
    w.put_bytes(&pack_section_owner(section, owner))
        .put_u8(notes.len() as u8);
    for note in notes {
        w.put_u32(*note);
    }
    encode_frame(Cmd::OfflineDataDeleteRequest, w.as_slice())
}

// ── Firmware upload ───────────────────────────────────────────────────────────

/// Opens a firmware upload negotiation.
///
/// `file_checksum` is the byte-sum of the whole uncompressed image.
pub fn firmware_upload_request(
    device_name: &str,
    firmware_version: &str,
    file_size: u32,
    chunk_size: u32,
    compress: bool,
    file_checksum: u8,
) -> Vec<u8> {
    let mut w = ByteWriter::with_capacity(42);
    w.put_str(device_name, NAME_FIELD)
        .put_str(firmware_version, NAME_FIELD)
        .put_u32(file_size)
        .put_u32(chunk_size)
        .put_u8(u8::from(compress))
        .put_u8(file_checksum);
    encode_frame(Cmd::FirmwareUploadRequest, w.as_slice())
}

/// Uploads one firmware chunk at the offset the pen asked for.
///
/// The chunk checksum always covers the pre-compression bytes, and the
/// post-compression size field is zero when compression is off.
pub fn firmware_chunk(offset: u32, data: &[u8], compress: bool) -> Result<Vec<u8>, BuildError> {
    let before_size = data.len() as u32;
    let (body, after_size) = if compress {
        let compressed = deflate(data)?;
        let len = compressed.len() as u32;
        (compressed, len)
    } else {
        (data.to_vec(), 0)
    };

    let mut w = ByteWriter::with_capacity(14 + body.len());
    w.put_u8(0x00) // transfer flag
        .put_u32(offset)
        .put_u8(checksum(data))
        .put_u32(before_size)
        .put_u32(after_size)
        .put_bytes(&body);
    Ok(encode_response_frame(
        Cmd::FirmwarePacketResponse,
        0x00,
        w.as_slice(),
    ))
}

/// Refuses a firmware chunk request; no payload, just the error code.
pub fn firmware_chunk_error() -> Vec<u8> {
    encode_bare_result_frame(Cmd::FirmwarePacketResponse, 0x01)
}

fn deflate(data: &[u8]) -> Result<Vec<u8>, std::io::Error> {
    use std::io::Write;

    let mut encoder =
        flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::new(9));
    encoder.write_all(data)?;
    encoder.finish()
}

// ── Profile store ─────────────────────────────────────────────────────────────

fn profile_header(w: &mut ByteWriter, op: u8, with_secret: bool) {
    w.put_str(PROFILE_NAME, PROFILE_NAME_FIELD).put_u8(op);
    if with_secret {
        w.put_bytes(&PROFILE_SECRET);
    }
}

/// Creates the profile partition on the pen.
pub fn profile_create() -> Vec<u8> {
    let mut w = ByteWriter::with_capacity(21);
    profile_header(&mut w, 0x01, true);
    w.put_u16(PROFILE_SECTOR_SIZE).put_u16(PROFILE_SECTOR_COUNT);
    encode_frame(Cmd::PenProfileRequest, w.as_slice())
}

/// Deletes the whole profile partition.
pub fn profile_delete() -> Vec<u8> {
    let mut w = ByteWriter::with_capacity(17);
    profile_header(&mut w, 0x02, true);
    encode_frame(Cmd::PenProfileRequest, w.as_slice())
}

/// Queries profile partition geometry and usage.
pub fn profile_info() -> Vec<u8> {
    let mut w = ByteWriter::with_capacity(9);
    profile_header(&mut w, 0x03, false);
    encode_frame(Cmd::PenProfileRequest, w.as_slice())
}

/// Writes key/value pairs into the profile store.
pub fn profile_write(entries: &[(String, Vec<u8>)]) -> Vec<u8> {
    let mut w = ByteWriter::new();
    profile_header(&mut w, 0x11, true);
    w.put_u8(entries.len() as u8);
    for (key, value) in entries {
        w.put_str(key, PROFILE_KEY_FIELD)
            .put_u16(value.len() as u16)
            .put_bytes(value);
    }
    encode_frame(Cmd::PenProfileRequest, w.as_slice())
}

/// Reads values for the given keys.  Reads need no secret.
pub fn profile_read(keys: &[String]) -> Vec<u8> {
    let mut w = ByteWriter::with_capacity(10 + keys.len() * PROFILE_KEY_FIELD);
    profile_header(&mut w, 0x12, false);
    w.put_u8(keys.len() as u8);
    for key in keys {
        w.put_str(key, PROFILE_KEY_FIELD);
    }
    encode_frame(Cmd::PenProfileRequest, w.as_slice())
}

/// Deletes individual keys from the profile store.
pub fn profile_delete_value(keys: &[String]) -> Vec<u8> {
    let mut w = ByteWriter::with_capacity(18 + keys.len() * PROFILE_KEY_FIELD);
    profile_header(&mut w, 0x13, true);
    w.put_u8(keys.len() as u8);
    for key in keys {
        w.put_str(key, PROFILE_KEY_FIELD);
    }
    encode_frame(Cmd::PenProfileRequest, w.as_slice())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::cmd::{DLE, ETX, STX};
    use crate::protocol::framing::{unescape, RawFrame};

    /// Strips the delimiters, unescapes, and decodes one built frame.
    fn decode(frame: &[u8]) -> RawFrame {
        assert_eq!(frame[0], STX);
        assert_eq!(*frame.last().unwrap(), ETX);
        let body = unescape(&frame[1..frame.len() - 1]).unwrap();
        RawFrame::decode(&body).unwrap()
    }

    #[test]
    fn test_version_request_has_declared_length_42() {
        let frame = version_request("0.0.0.0", "2.18");
        let decoded = decode(&frame);
        assert_eq!(decoded.cmd, Cmd::VersionRequest);
        assert_eq!(decoded.declared_len, 42);
        assert_eq!(&decoded.payload[..16], &[0u8; 16]);
        assert_eq!(decoded.payload[16], 0xF0);
        assert_eq!(decoded.payload[17], 0x01);
        assert_eq!(&decoded.payload[18..25], b"0.0.0.0");
        assert_eq!(&decoded.payload[34..38], b"2.18");
    }

    #[test]
    fn test_version_request_body_is_fully_escaped() {
        let frame = version_request("0.0.0.0", "2.18");
        let body = &frame[1..frame.len() - 1];
        let mut escaped = false;
        for b in body {
            if escaped {
                escaped = false;
                continue;
            }
            if *b == DLE {
                escaped = true;
                continue;
            }
            assert_ne!(*b, STX);
            assert_ne!(*b, ETX);
        }
    }

    #[test]
    fn test_password_change_sets_has_new_flag() {
        let with_new = decode(&password_change("1234", Some("5678")));
        assert_eq!(with_new.declared_len, 33);
        assert_eq!(with_new.payload[0], 1);
        assert_eq!(&with_new.payload[1..5], b"1234");
        assert_eq!(&with_new.payload[17..21], b"5678");

        let clearing = decode(&password_change("1234", None));
        assert_eq!(clearing.payload[0], 0);
        assert_eq!(&clearing.payload[17..33], &[0u8; 16]);
    }

    #[test]
    fn test_password_input_is_fixed_sixteen_bytes() {
        let decoded = decode(&password_input("abcd"));
        assert_eq!(decoded.cmd, Cmd::PasswordRequest);
        assert_eq!(decoded.declared_len, 16);
        assert_eq!(&decoded.payload[..4], b"abcd");
    }

    #[test]
    fn test_setting_change_lengths_per_kind() {
        let cases: Vec<(SettingChange, usize)> = vec![
            (SettingChange::Timestamp(1_700_000_000_000), 9),
            (SettingChange::AutoPowerOffTime(20), 3),
            (SettingChange::LedColor(0xFF00FF00), 5),
            (SettingChange::Beep(true), 2),
            (SettingChange::Sensitivity(2), 2),
            (SettingChange::BtLocalName("my pen".into()), 18),
            (SettingChange::FscSensitivity(1), 3),
            (SettingChange::BeepAndLight, 2),
            (SettingChange::InitDisk, 5),
        ];
        for (change, expected) in cases {
            let decoded = decode(&setting_change(&change));
            assert_eq!(
                decoded.declared_len as usize, expected,
                "length for {change:?}"
            );
            assert_eq!(decoded.payload[0], change.kind() as u8);
        }
    }

    #[test]
    fn test_led_color_is_written_big_endian() {
        let decoded = decode(&setting_change(&SettingChange::LedColor(0x11223344)));
        assert_eq!(&decoded.payload[1..], &[0x11, 0x22, 0x33, 0x44]);
    }

    #[test]
    fn test_note_subscription_all_uses_short_wildcard() {
        let decoded = decode(&note_subscription(&NoteFilter::All));
        assert_eq!(decoded.declared_len, 2);
        assert_eq!(decoded.payload, vec![0xFF, 0xFF]);
    }

    #[test]
    fn test_note_subscription_with_notes_packs_each_entry() {
        let filter = NoteFilter::Notes(vec![
            NoteId { section: 3, owner: 27, note: 603 },
            NoteId { section: 3, owner: 27, note: 604 },
        ]);
        let decoded = decode(&note_subscription(&filter));
        assert_eq!(decoded.declared_len, 2 + 2 * 8);
        assert_eq!(&decoded.payload[..2], &[2, 0]);
        assert_eq!(&decoded.payload[2..6], &pack_section_owner(3, 27));
        assert_eq!(&decoded.payload[6..10], &603u32.to_le_bytes());
    }

    #[test]
    fn test_note_subscription_sections_use_note_wildcard() {
        let filter = NoteFilter::Sections(vec![(3, 27)]);
        let decoded = decode(&note_subscription(&filter));
        assert_eq!(&decoded.payload[6..10], &[0xFF; 4]);
    }

    #[test]
    fn test_offline_note_list_wildcard_and_scoped() {
        assert_eq!(decode(&offline_note_list(None)).payload, vec![0xFF; 4]);
        assert_eq!(
            decode(&offline_note_list(Some((1, 100)))).payload,
            pack_section_owner(1, 100)
        );
    }

    #[test]
    fn test_offline_data_request_encodes_delete_flag_and_pages() {
        let note = NoteId { section: 1, owner: 100, note: 5 };
        let decoded = decode(&offline_data_request(note, true, &[1, 2]));
        assert_eq!(decoded.declared_len, 14 + 8);
        assert_eq!(decoded.payload[0], 1, "delete-on-finished");
        assert_eq!(decoded.payload[1], 0x01);
        assert_eq!(&decoded.payload[2..6], &pack_section_owner(1, 100));
        assert_eq!(&decoded.payload[6..10], &5u32.to_le_bytes());
        assert_eq!(&decoded.payload[10..14], &2u32.to_le_bytes());
        assert_eq!(&decoded.payload[14..18], &1u32.to_le_bytes());
        assert_eq!(&decoded.payload[18..22], &2u32.to_le_bytes());

        let keep = decode(&offline_data_request(note, false, &[]));
        assert_eq!(keep.payload[0], 2, "keep data");
        assert_eq!(keep.declared_len, 14);
        assert_eq!(&keep.payload[10..14], &0u32.to_le_bytes(), "0 pages = all");
    }

    #[test]
    fn test_offline_delete_lists_note_ids() {
        let decoded = decode(&offline_delete(1, 100, &[5, 6, 7]));
        assert_eq!(decoded.declared_len, 5 + 12);
        assert_eq!(decoded.payload[4], 3);
        assert_eq!(&decoded.payload[5..9], &5u32.to_le_bytes());
    }

    #[test]
    fn test_firmware_upload_request_layout() {
        let frame = firmware_upload_request("NWP-F30", "1.20", 1024, 256, false, 0x5A);
        let decoded = decode(&frame);
        assert_eq!(decoded.cmd, Cmd::FirmwareUploadRequest);
        assert_eq!(decoded.declared_len, 42);
        assert_eq!(&decoded.payload[..7], b"NWP-F30");
        assert_eq!(&decoded.payload[32..36], &1024u32.to_le_bytes());
        assert_eq!(&decoded.payload[36..40], &256u32.to_le_bytes());
        assert_eq!(decoded.payload[40], 0);
        assert_eq!(decoded.payload[41], 0x5A);
    }

    #[test]
    fn test_firmware_chunk_uncompressed_layout_and_checksum() {
        let data = vec![0x10u8, 0x20, 0x30];
        let frame = firmware_chunk(512, &data, false).unwrap();
        let decoded = decode(&frame);
        assert_eq!(decoded.cmd, Cmd::FirmwarePacketResponse);
        assert_eq!(decoded.result, Some(0));
        assert_eq!(decoded.declared_len as usize, 14 + data.len());
        assert_eq!(decoded.payload[0], 0, "transfer flag");
        assert_eq!(&decoded.payload[1..5], &512u32.to_le_bytes());
        assert_eq!(decoded.payload[5], checksum(&data));
        assert_eq!(&decoded.payload[6..10], &3u32.to_le_bytes());
        assert_eq!(&decoded.payload[10..14], &0u32.to_le_bytes());
        assert_eq!(&decoded.payload[14..], &data[..]);
    }

    #[test]
    fn test_firmware_chunk_compressed_checksums_original_bytes() {
        let data = vec![0xABu8; 300];
        let frame = firmware_chunk(0, &data, true).unwrap();
        let decoded = decode(&frame);
        assert_eq!(decoded.payload[5], checksum(&data));
        let after = u32::from_le_bytes(decoded.payload[10..14].try_into().unwrap());
        assert!(after > 0, "post-compress size recorded");
        assert!((after as usize) < data.len(), "300 repeated bytes shrink");
        assert_eq!(decoded.payload.len(), 14 + after as usize);
    }

    #[test]
    fn test_firmware_chunk_error_is_bare_result_frame() {
        assert_eq!(firmware_chunk_error(), vec![STX, 0xB2, 0x01, ETX]);
    }

    #[test]
    fn test_profile_requests_match_fixed_lengths() {
        assert_eq!(decode(&profile_create()).declared_len, 21);
        assert_eq!(decode(&profile_delete()).declared_len, 17);
        assert_eq!(decode(&profile_info()).declared_len, 9);
        assert_eq!(
            decode(&profile_read(&["a".into(), "b".into()])).declared_len,
            10 + 32
        );
        assert_eq!(
            decode(&profile_delete_value(&["a".into()])).declared_len,
            18 + 16
        );
        let entries = vec![("key".to_string(), b"value".to_vec())];
        assert_eq!(
            decode(&profile_write(&entries)).declared_len as usize,
            18 + 16 + 2 + 5
        );
    }

    #[test]
    fn test_profile_requests_carry_fixed_identity() {
        let decoded = decode(&profile_info());
        assert_eq!(&decoded.payload[..6], b"neolab");
        assert_eq!(&decoded.payload[6..8], &[0, 0]);
        assert_eq!(decoded.payload[8], 0x03);

        let create = decode(&profile_create());
        assert_eq!(&create.payload[9..17], &PROFILE_SECRET);
        assert_eq!(&create.payload[17..19], &32u16.to_le_bytes());
        assert_eq!(&create.payload[19..21], &128u16.to_le_bytes());
    }

    #[test]
    fn test_offline_packet_ack_layout() {
        let decoded = decode(&offline_packet_ack(0x1234, true));
        assert_eq!(decoded.cmd, Cmd::OfflinePacketAck);
        assert_eq!(decoded.result, Some(0));
        assert_eq!(decoded.payload, 0x1234u16.to_le_bytes());
    }
}
