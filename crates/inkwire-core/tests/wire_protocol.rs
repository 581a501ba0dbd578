//! Integration tests for the wire protocol engine.
//!
//! These drive the public API end to end: outbound frames built by
//! `protocol::builder` are checked against the frame grammar the pen
//! firmware expects, and synthetic pen frames are pushed through the
//! inbound parser under hostile fragmentation.

use inkwire_core::domain::paper::{
    pack_section_owner, unpack_section_owner, PageAddress,
};
use inkwire_core::protocol::buffer::{checksum, ByteWriter};
use inkwire_core::protocol::builder;
use inkwire_core::protocol::cmd::{Cmd, DLE, ETX, STX};
use inkwire_core::protocol::framing::{
    encode_frame, encode_response_frame, escape, unescape, RawFrame,
};
use inkwire_core::protocol::messages::{FirmwarePacketStatus, NoteFilter};
use inkwire_core::protocol::parser::{InboundEvent, InboundParser};
use inkwire_core::NoteId;

// ── Frame grammar laws ────────────────────────────────────────────────────────

#[test]
fn test_unescape_inverts_escape_for_exhaustive_byte_values() {
    // Every byte value in every position around reserved bytes.
    let mut payload = Vec::new();
    for b in 0u16..=255 {
        payload.push(b as u8);
        payload.push(STX);
        payload.push(b as u8);
        payload.push(ETX);
        payload.push(b as u8);
        payload.push(DLE);
    }
    let escaped = escape(&payload);
    assert_eq!(unescape(&escaped).unwrap(), payload);
}

#[test]
fn test_checksum_computed_over_unescaped_bytes_is_stable() {
    let payload = vec![STX, ETX, DLE, 0x01, 0xFE];
    let through_wire = unescape(&escape(&payload)).unwrap();
    assert_eq!(checksum(&payload), checksum(&through_wire));
}

#[test]
fn test_section_owner_packing_is_bijective_across_the_u24_range() {
    for section in [0u8, 1, 64, 255] {
        for owner in [0u32, 1, 0x1234, 0xFF_FFFF] {
            let packed = pack_section_owner(section, owner);
            assert_eq!(unpack_section_owner(packed), (section, owner));
        }
    }
}

// ── Outbound request surface ──────────────────────────────────────────────────

/// Decodes a built frame the way the pen firmware would.
fn device_decode(frame: &[u8]) -> RawFrame {
    assert_eq!(frame[0], STX, "frame must open with STX");
    assert_eq!(*frame.last().unwrap(), ETX, "frame must close with ETX");
    let body = unescape(&frame[1..frame.len() - 1]).unwrap();
    RawFrame::decode(&body).unwrap()
}

#[test]
fn test_every_request_builder_produces_a_decodable_frame() {
    let note = NoteId {
        section: 3,
        owner: 27,
        note: 603,
    };
    let frames: Vec<(Cmd, Vec<u8>)> = vec![
        (Cmd::VersionRequest, builder::version_request("0.0.0.0", "2.18")),
        (Cmd::PasswordRequest, builder::password_input("1234")),
        (
            Cmd::PasswordChangeRequest,
            builder::password_change("1234", Some("4321")),
        ),
        (Cmd::SettingInfoRequest, builder::setting_info_request()),
        (
            Cmd::OnlineDataRequest,
            builder::note_subscription(&NoteFilter::Notes(vec![note])),
        ),
        (Cmd::OfflineNoteListRequest, builder::offline_note_list(None)),
        (Cmd::OfflinePageListRequest, builder::offline_page_list(note)),
        (
            Cmd::OfflineDataRequest,
            builder::offline_data_request(note, true, &[]),
        ),
        (
            Cmd::OfflineDataDeleteRequest,
            builder::offline_delete(3, 27, &[603]),
        ),
        (
            Cmd::FirmwareUploadRequest,
            builder::firmware_upload_request("NWP-F30", "1.20", 4096, 256, false, 0x11),
        ),
        (Cmd::PenProfileRequest, builder::profile_info()),
    ];
    for (cmd, frame) in frames {
        let decoded = device_decode(&frame);
        assert_eq!(decoded.cmd, cmd);
        assert_eq!(decoded.declared_len as usize, decoded.payload.len());
    }
}

#[test]
fn test_version_request_matches_handshake_contract() {
    let decoded = device_decode(&builder::version_request("0.0.0.0", "2.18"));
    assert_eq!(decoded.cmd, Cmd::VersionRequest);
    assert_eq!(decoded.declared_len, 42);
}

// ── Firmware chunk scenario ───────────────────────────────────────────────────

#[test]
fn test_three_chunk_requests_drive_three_matching_chunks() {
    // 768 bytes of firmware, negotiated chunk size 256, no compression.
    let image: Vec<u8> = (0..768u32).map(|i| (i * 7) as u8).collect();
    let chunk_size = 256usize;

    let mut parser = InboundParser::new();
    let mut uploads = Vec::new();

    for offset in [0u32, 256, 512] {
        // The pen asks for the chunk at `offset`.
        let mut w = ByteWriter::new();
        w.put_u8(0).put_u32(offset);
        let request_frame = encode_frame(Cmd::FirmwarePacketRequest, w.as_slice());
        let events = parser.feed(&request_frame);
        let InboundEvent::FirmwarePacketRequest(req) = &events[0] else {
            panic!("expected FirmwarePacketRequest, got {events:?}");
        };
        assert_eq!(req.status, FirmwarePacketStatus::Continue);

        // The host answers with that chunk.
        let start = req.offset as usize;
        let chunk = &image[start..start + chunk_size];
        uploads.push((req.offset, builder::firmware_chunk(req.offset, chunk, false).unwrap()));
    }

    assert_eq!(uploads.len(), 3);
    for (offset, frame) in uploads {
        let decoded = device_decode(&frame);
        assert_eq!(decoded.cmd, Cmd::FirmwarePacketResponse);
        assert_eq!(decoded.result, Some(0));
        let sent_offset = u32::from_le_bytes(decoded.payload[1..5].try_into().unwrap());
        assert_eq!(sent_offset, offset);
        let chunk = &image[offset as usize..offset as usize + chunk_size];
        assert_eq!(decoded.payload[5], checksum(chunk), "chunk checksum at {offset}");
        assert_eq!(&decoded.payload[14..], chunk);
    }
}

// ── Inbound stream under fragmentation ────────────────────────────────────────

fn synthetic_pen_stream() -> Vec<u8> {
    let mut stream = Vec::new();

    // A settings snapshot...
    let mut w = ByteWriter::new();
    w.put_u64(1_700_000_000_000)
        .put_u16(20)
        .put_u16(1023)
        .put_u8(80)
        .put_u8(15)
        .put_u32(0xFF00_AA55)
        .put_u8(1)
        .put_u8(1)
        .put_u8(0)
        .put_u8(1)
        .put_u8(0)
        .put_u8(2);
    stream.extend(encode_response_frame(Cmd::SettingInfoResponse, 0, w.as_slice()));

    // ...a paper info event whose packed section/owner contains 0xC1...
    let mut w = ByteWriter::new();
    w.put_bytes(&pack_section_owner(0xC1, 0x00C0_7D00)) // forces escapes
        .put_u32(603)
        .put_u32(21);
    stream.extend(encode_frame(Cmd::PaperInfoEvent, w.as_slice()));

    // ...and a burst of dots.
    for i in 0u16..4 {
        let mut w = ByteWriter::new();
        w.put_u8(8)
            .put_u16(200 + i)
            .put_u16(100 + i)
            .put_u16(50 + i)
            .put_u8(0)
            .put_u8(0)
            .put_u8(5)
            .put_u8(6)
            .put_u16(0);
        stream.extend(encode_frame(Cmd::PenDotEvent, w.as_slice()));
    }

    stream
}

#[test]
fn test_chunked_delivery_is_invariant_for_all_chunk_sizes() {
    let stream = synthetic_pen_stream();

    let mut reference_parser = InboundParser::new();
    let reference = reference_parser.feed(&stream);
    assert_eq!(reference.len(), 6);

    for chunk_size in 1..=stream.len() {
        let mut parser = InboundParser::new();
        let mut events = Vec::new();
        for chunk in stream.chunks(chunk_size) {
            events.extend(parser.feed(chunk));
        }
        assert_eq!(events, reference, "chunk size {chunk_size}");
    }
}

#[test]
fn test_paper_info_with_escaped_identity_survives_the_wire() {
    let stream = synthetic_pen_stream();
    let mut parser = InboundParser::new();
    let events = parser.feed(&stream);
    let page = events
        .iter()
        .find_map(|e| match e {
            InboundEvent::PaperInfo { page, .. } => Some(*page),
            _ => None,
        })
        .expect("paper info event");
    assert_eq!(
        page,
        PageAddress {
            section: 0xC1,
            owner: 0x00C0_7D00,
            note: 603,
            page: 21
        }
    );
}

#[test]
fn test_offline_fetch_for_all_pages_yields_separate_page_buffers() {
    // The request side: pages=[] means "all pages".
    let note = NoteId {
        section: 1,
        owner: 100,
        note: 5,
    };
    let request = device_decode(&builder::offline_data_request(note, true, &[]));
    let page_count = u32::from_le_bytes(request.payload[10..14].try_into().unwrap());
    assert_eq!(page_count, 0, "zero page ids requests every page");

    // The transfer side: two pages stream back, each ending with a marker.
    let mut parser = InboundParser::new();
    let mut events = Vec::new();
    for (id, page, data, end) in [
        (0u16, 1u32, b"first-a".as_slice(), false),
        (1, 1, b"first-b", true),
        (2, 2, b"second", true),
    ] {
        let mut w = ByteWriter::new();
        w.put_u16(id)
            .put_u8(u8::from(end))
            .put_u8(0)
            .put_u16(data.len() as u16)
            .put_u16(0)
            .put_bytes(&pack_section_owner(note.section, note.owner))
            .put_u32(note.note)
            .put_u32(page)
            .put_u8(checksum(data))
            .put_bytes(data);
        events.extend(parser.feed(&encode_frame(Cmd::OfflinePacketData, w.as_slice())));
    }

    let pages: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            InboundEvent::OfflinePageReady(p) => Some(p),
            _ => None,
        })
        .collect();
    assert_eq!(pages.len(), 2);
    assert_eq!(pages[0].data, b"first-afirst-b");
    assert_eq!(pages[1].data, b"second");
}
