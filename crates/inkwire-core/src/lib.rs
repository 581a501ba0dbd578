//! # inkwire-core
//!
//! Wire protocol engine for ncode digital pens.  The pen streams
//! handwriting as timestamped coordinate events over a byte-oriented link;
//! this crate owns everything between raw link bytes and typed events:
//!
//! - **`protocol::framing`** - frame delimiting with byte-stuffing.  Frames
//!   are `[STX][header][escaped payload][ETX]`; STX/ETX/DLE inside the body
//!   travel as two-byte escape sequences.
//! - **`protocol::cmd`** - the command catalog: one byte per message kind,
//!   requests below 0x80, responses and events above.
//! - **`protocol::builder`** - one encoder per outbound request, from the
//!   version handshake to firmware chunks and profile writes.
//! - **`protocol::parser`** - the incremental inbound parser.  Link
//!   notifications may split a frame anywhere; the parser buffers across
//!   calls, validates checksums, and dispatches typed [`InboundEvent`]s,
//!   including the multi-packet offline-transfer and firmware-upload flows.
//! - **`domain::paper`** - section/owner/note/page identity and the packed
//!   section-owner wire form.
//!
//! The crate is sans-IO: it never touches a socket or a BLE stack.  The
//! session layer (`inkwire-host`) feeds bytes in and writes the returned
//! request buffers out.

pub mod domain;
pub mod protocol;

pub use domain::paper::{NoteId, PageAddress, PaperBounds};
pub use protocol::cmd::Cmd;
pub use protocol::framing::FramingError;
pub use protocol::messages::{
    DeviceVersionInfo, Dot, DotKind, NoteFilter, SettingChange, SettingInfo, SettingKind,
};
pub use protocol::parser::{InboundEvent, InboundParser};
