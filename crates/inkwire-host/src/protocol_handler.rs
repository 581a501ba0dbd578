//! Protocol selection.
//!
//! The pen family spans two wire protocol generations.  The session talks
//! to a [`ProtocolHandler`] capability instead of branching per request, so
//! a v1 handler can be added later without touching any call site.  Exactly
//! one concrete handler exists today: [`ProtocolV2`].

use inkwire_core::protocol::builder::{self, BuildError};
use inkwire_core::protocol::messages::{NoteFilter, SettingChange, SUPPORTED_PROTOCOL_VERSION};
use inkwire_core::NoteId;

/// Supported protocol generations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    V2,
}

impl Protocol {
    /// Builds the request encoder for this generation.
    pub fn handler(self) -> Box<dyn ProtocolHandler> {
        match self {
            Protocol::V2 => Box::new(ProtocolV2),
        }
    }
}

/// Encodes every request the session can issue.
///
/// One method per public request; each returns a finished frame for the
/// link.  Implementations are stateless - per-session state stays in the
/// session.
pub trait ProtocolHandler: Send + Sync {
    fn version_request(&self, app_version: &str) -> Vec<u8>;
    fn password_input(&self, password: &str) -> Vec<u8>;
    fn password_change(&self, old: &str, new: Option<&str>) -> Vec<u8>;
    fn setting_info_request(&self) -> Vec<u8>;
    fn setting_change(&self, change: &SettingChange) -> Vec<u8>;
    fn note_subscription(&self, filter: &NoteFilter) -> Vec<u8>;
    fn offline_note_list(&self, scope: Option<(u8, u32)>) -> Vec<u8>;
    fn offline_page_list(&self, note: NoteId) -> Vec<u8>;
    fn offline_data_request(&self, note: NoteId, delete_on_finished: bool, pages: &[u32]) -> Vec<u8>;
    fn offline_packet_ack(&self, packet_id: u16, ok: bool) -> Vec<u8>;
    fn offline_delete(&self, section: u8, owner: u32, notes: &[u32]) -> Vec<u8>;
    #[allow(clippy::too_many_arguments)]
    fn firmware_upload_request(
        &self,
        device_name: &str,
        firmware_version: &str,
        file_size: u32,
        chunk_size: u32,
        compress: bool,
        file_checksum: u8,
    ) -> Vec<u8>;
    fn firmware_chunk(&self, offset: u32, data: &[u8], compress: bool) -> Result<Vec<u8>, BuildError>;
    fn firmware_chunk_error(&self) -> Vec<u8>;
    fn profile_create(&self) -> Vec<u8>;
    fn profile_delete(&self) -> Vec<u8>;
    fn profile_info(&self) -> Vec<u8>;
    fn profile_write(&self, entries: &[(String, Vec<u8>)]) -> Vec<u8>;
    fn profile_read(&self, keys: &[String]) -> Vec<u8>;
    fn profile_delete_value(&self, keys: &[String]) -> Vec<u8>;
}

/// Protocol 2.x request encoder; delegates to the core builders.
#[derive(Debug, Default)]
pub struct ProtocolV2;

impl ProtocolHandler for ProtocolV2 {
    fn version_request(&self, app_version: &str) -> Vec<u8> {
        builder::version_request(app_version, SUPPORTED_PROTOCOL_VERSION)
    }

    fn password_input(&self, password: &str) -> Vec<u8> {
        builder::password_input(password)
    }

    fn password_change(&self, old: &str, new: Option<&str>) -> Vec<u8> {
        builder::password_change(old, new)
    }

    fn setting_info_request(&self) -> Vec<u8> {
        builder::setting_info_request()
    }

    fn setting_change(&self, change: &SettingChange) -> Vec<u8> {
        builder::setting_change(change)
    }

    fn note_subscription(&self, filter: &NoteFilter) -> Vec<u8> {
        builder::note_subscription(filter)
    }

    fn offline_note_list(&self, scope: Option<(u8, u32)>) -> Vec<u8> {
        builder::offline_note_list(scope)
    }

    fn offline_page_list(&self, note: NoteId) -> Vec<u8> {
        builder::offline_page_list(note)
    }

    fn offline_data_request(&self, note: NoteId, delete_on_finished: bool, pages: &[u32]) -> Vec<u8> {
        builder::offline_data_request(note, delete_on_finished, pages)
    }

    fn offline_packet_ack(&self, packet_id: u16, ok: bool) -> Vec<u8> {
        builder::offline_packet_ack(packet_id, ok)
    }

    fn offline_delete(&self, section: u8, owner: u32, notes: &[u32]) -> Vec<u8> {
        builder::offline_delete(section, owner, notes)
    }

    fn firmware_upload_request(
        &self,
        device_name: &str,
        firmware_version: &str,
        file_size: u32,
        chunk_size: u32,
        compress: bool,
        file_checksum: u8,
    ) -> Vec<u8> {
        builder::firmware_upload_request(
            device_name,
            firmware_version,
            file_size,
            chunk_size,
            compress,
            file_checksum,
        )
    }

    fn firmware_chunk(&self, offset: u32, data: &[u8], compress: bool) -> Result<Vec<u8>, BuildError> {
        builder::firmware_chunk(offset, data, compress)
    }

    fn firmware_chunk_error(&self) -> Vec<u8> {
        builder::firmware_chunk_error()
    }

    fn profile_create(&self) -> Vec<u8> {
        builder::profile_create()
    }

    fn profile_delete(&self) -> Vec<u8> {
        builder::profile_delete()
    }

    fn profile_info(&self) -> Vec<u8> {
        builder::profile_info()
    }

    fn profile_write(&self, entries: &[(String, Vec<u8>)]) -> Vec<u8> {
        builder::profile_write(entries)
    }

    fn profile_read(&self, keys: &[String]) -> Vec<u8> {
        builder::profile_read(keys)
    }

    fn profile_delete_value(&self, keys: &[String]) -> Vec<u8> {
        builder::profile_delete_value(keys)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
