//! Per-connection pen session.
//!
//! [`PenSession`] owns everything one connected pen needs: the inbound
//! parser, the negotiated device info, and the state of any in-flight
//! multi-packet flow.  The transport owner pushes notification bytes in
//! through [`PenSession::feed`]; the session pushes typed events out on two
//! channels:
//!
//! - a **stroke channel** for the realtime data path (dots, pen up/down,
//!   page boundaries, tracking errors), and
//! - a **pen event channel** for everything else (authorization, version
//!   info, acks, faults, disconnection).
//!
//! Long-running flows are driven by the pen, not by the caller: firmware
//! chunk requests and offline data packets arrive as inbound events and the
//! session answers them itself, so callers just issue a request and watch
//! the event channel for completion.

use std::sync::Arc;

use inkwire_core::protocol::buffer::checksum;
use inkwire_core::protocol::messages::{
    DeviceVersionInfo, Dot, DotError, DotKind, FirmwareAckCode, FirmwarePacketStatus, NoteFilter,
    OfflineFetchAck, OfflinePage, OfflinePageList, PenUpDown, ProfileAck, SettingChange,
    SettingInfo, SettingKind, ShutdownReason, DEFAULT_PASSWORD,
};
use inkwire_core::protocol::parser::{InboundEvent, InboundParser};
use inkwire_core::{Cmd, NoteId, PageAddress};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::DriverConfig;
use crate::protocol_handler::{Protocol, ProtocolHandler};
use crate::transport::{send_with_retry, LinkError, PenLink};

/// Pens that negotiate a smaller firmware chunk than the 256-byte default.
const SMALL_CHUNK_MODELS: [&str; 5] = ["NSP-D100", "NSP-D101", "NSP-C200", "NWP-F121", "NWP-F121C"];
const DEFAULT_CHUNK_SIZE: u32 = 256;
const SMALL_CHUNK_SIZE: u32 = 64;

/// Protocol version from which the profile store exists.
const PROFILE_SUPPORT_VERSION: f32 = 2.18;

/// Errors returned directly to the caller of a request method.
///
/// Device-side refusals are *not* here - they arrive as
/// [`PenEvent::DeviceRejected`] on the event channel.
#[derive(Debug, Error)]
pub enum SessionError {
    /// No protocol selected, or the request does not exist on the selected
    /// protocol.  Nothing was written to the link.
    #[error("request not supported by the selected protocol")]
    UnsupportedRequest,

    /// The new password is the factory default; the device would treat the
    /// account as unprotected.
    #[error("the default password cannot be set")]
    IllegalPassword,

    /// Firmware install attempted before the version handshake completed.
    #[error("device version unknown; connect first")]
    NoVersionHandshake,

    /// A firmware upload is already in flight; only one may be active.
    #[error("a firmware upload is already active")]
    UploadActive,

    /// The link write failed even after the retry.
    #[error(transparent)]
    Link(#[from] LinkError),
}

// ── Event channels ────────────────────────────────────────────────────────────

/// Realtime handwriting events (the high-rate channel).
#[derive(Debug, Clone, PartialEq)]
pub enum StrokeEvent {
    PenUpDown {
        counter: Option<u8>,
        event: PenUpDown,
    },
    /// The pen moved onto a different page.
    PageBoundary {
        counter: Option<u8>,
        page: PageAddress,
    },
    Dot {
        counter: Option<u8>,
        kind: DotKind,
        dot: Dot,
    },
    TrackingError {
        counter: Option<u8>,
        error: DotError,
    },
}

/// Session lifecycle and request outcomes (the low-rate channel).
#[derive(Debug, Clone, PartialEq)]
pub enum PenEvent {
    Disconnected,
    VersionInfo(DeviceVersionInfo),
    Authorized,
    PasswordRequired {
        device_code: u8,
        retry_count: u8,
        reset_time: u64,
    },
    PasswordChanged,
    PasswordChangeRejected {
        device_code: u8,
        retry_count: u8,
    },
    /// A locally rejected attempt to set the factory-default password.
    IllegalPassword,
    SettingInfo(SettingInfo),
    SettingChanged {
        kind: SettingKind,
    },
    SubscriptionReady,
    LowBattery {
        percent: u8,
    },
    Shutdown {
        reason: ShutdownReason,
    },
    OfflineNoteList(Vec<NoteId>),
    OfflinePageList(OfflinePageList),
    OfflineTransferStarted(OfflineFetchAck),
    /// One fully reassembled page of offline data.
    OfflinePage(OfflinePage),
    OfflineTransferComplete {
        note: NoteId,
        pages: u16,
    },
    OfflineDeleted,
    FirmwareAck {
        code: FirmwareAckCode,
        chunk_size: u32,
        compressed: bool,
    },
    FirmwareProgress {
        sent: u32,
        total: u32,
    },
    FirmwareUploadComplete,
    FirmwareUploadFailed,
    ProfileAck(ProfileAck),
    /// The device answered with a non-zero result code.
    DeviceRejected {
        cmd: Cmd,
        code: u8,
    },
    /// A frame or payload was dropped; the session keeps running.
    ProtocolFault {
        description: String,
    },
    /// An embedded data checksum failed; the offending packet was nacked.
    ChecksumError {
        description: String,
    },
    /// A link write failed after the retry.
    TransportError {
        description: String,
    },
}

// ── Per-session state ─────────────────────────────────────────────────────────

/// Outstanding auth flow; cleared once the matching response arrives.  The
/// new password is kept so a successful change can re-authenticate with it
/// immediately.
#[derive(Debug, Clone)]
struct PendingAuth {
    new_password: Option<String>,
}

/// Exactly one of these exists while a firmware upload is in flight.
#[derive(Debug)]
struct FirmwareUploadState {
    image: Vec<u8>,
    chunk_size: u32,
    compress: bool,
    /// End offset of the last chunk handed to the pen.
    offset: u32,
}

/// Scoped to one outstanding offline fetch.
#[derive(Debug)]
struct OfflineTransferState {
    note: NoteId,
    delete_on_finish: bool,
    expected_pages: Option<u16>,
    received_pages: u16,
}

// ── The session ───────────────────────────────────────────────────────────────

/// One logical session for one physical pen.
pub struct PenSession {
    config: DriverConfig,
    link: Arc<dyn PenLink>,
    handler: Option<Box<dyn ProtocolHandler>>,
    parser: InboundParser,
    connected: bool,
    version: Option<DeviceVersionInfo>,
    settings: Option<SettingInfo>,
    pending_auth: Option<PendingAuth>,
    firmware: Option<FirmwareUploadState>,
    offline: Option<OfflineTransferState>,
    stroke_tx: mpsc::Sender<StrokeEvent>,
    event_tx: mpsc::Sender<PenEvent>,
}

impl PenSession {
    /// Creates a session speaking protocol v2 and returns it together with
    /// its two event receivers.
    pub fn new(
        config: DriverConfig,
        link: Arc<dyn PenLink>,
    ) -> (Self, mpsc::Receiver<StrokeEvent>, mpsc::Receiver<PenEvent>) {
        let (stroke_tx, stroke_rx) = mpsc::channel(256);
        let (event_tx, event_rx) = mpsc::channel(64);
        let session = Self {
            config,
            link,
            handler: Some(Protocol::V2.handler()),
            parser: InboundParser::new(),
            connected: false,
            version: None,
            settings: None,
            pending_auth: None,
            firmware: None,
            offline: None,
            stroke_tx,
            event_tx,
        };
        (session, stroke_rx, event_rx)
    }

    /// Replaces the protocol selection.  `None` puts the session in the
    /// fail-fast state where every request errors before touching the wire.
    pub fn set_protocol(&mut self, protocol: Option<Protocol>) {
        self.handler = protocol.map(Protocol::handler);
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Device info from the last version handshake, if one completed.
    pub fn version_info(&self) -> Option<&DeviceVersionInfo> {
        self.version.as_ref()
    }

    /// Settings snapshot from the last settings response.
    pub fn settings(&self) -> Option<&SettingInfo> {
        self.settings.as_ref()
    }

    /// Whether the connected pen's protocol carries the profile store.
    pub fn supports_profiles(&self) -> bool {
        self.version
            .as_ref()
            .and_then(DeviceVersionInfo::protocol_version_number)
            .map(|v| v >= PROFILE_SUPPORT_VERSION)
            .unwrap_or(false)
    }

    // ── Lifecycle ───────────────────────────────────────────────────────────

    /// Marks the transport up, resets parser state, and schedules the
    /// version query after the settle delay.
    ///
    /// # Errors
    ///
    /// Fails fast with [`SessionError::UnsupportedRequest`] when no protocol
    /// is selected.
    pub fn connect(&mut self) -> Result<(), SessionError> {
        let frame = self
            .handler()?
            .version_request(&self.config.app_version);

        self.parser.reset();
        self.version = None;
        self.settings = None;
        self.pending_auth = None;
        self.firmware = None;
        self.offline = None;
        self.connected = true;

        // The pen drops writes issued before its notification pipeline is
        // up, so the first request goes out after a settle delay.
        let link = Arc::clone(&self.link);
        let event_tx = self.event_tx.clone();
        let settle = self.config.settle_delay();
        let retry = self.config.write_retry_delay();
        tokio::spawn(async move {
            tokio::time::sleep(settle).await;
            if let Err(err) = send_with_retry(&link, &frame, retry).await {
                warn!(%err, "version query failed");
                let _ = event_tx
                    .send(PenEvent::TransportError {
                        description: err.to_string(),
                    })
                    .await;
            }
        });
        info!("session connected; version query scheduled");
        Ok(())
    }

    /// Flushes all session state and emits [`PenEvent::Disconnected`].
    /// In-flight multi-packet flows are abandoned; there is no resume.
    pub async fn disconnect(&mut self) {
        self.connected = false;
        self.parser.reset();
        self.version = None;
        self.settings = None;
        self.pending_auth = None;
        self.firmware = None;
        self.offline = None;
        let _ = self.event_tx.send(PenEvent::Disconnected).await;
        info!("session disconnected");
    }

    /// Feeds one inbound link notification to the parser and reacts to
    /// every event it completes.  Chunks may split frames anywhere.
    pub async fn feed(&mut self, bytes: &[u8]) {
        let events = self.parser.feed(bytes);
        for event in events {
            self.handle_event(event).await;
        }
    }

    // ── Public request surface ──────────────────────────────────────────────

    /// Re-issues the version query immediately.
    pub async fn request_version(&mut self) -> Result<(), SessionError> {
        let frame = self.handler()?.version_request(&self.config.app_version);
        self.send(frame).await
    }

    /// Submits the pen password.
    pub async fn input_password(&mut self, password: &str) -> Result<(), SessionError> {
        if password == DEFAULT_PASSWORD {
            return Err(SessionError::IllegalPassword);
        }
        let frame = self.handler()?.password_input(password);
        self.pending_auth = Some(PendingAuth { new_password: None });
        self.send(frame).await
    }

    /// Changes (or clears, with `new_password = None`) the pen password.
    pub async fn set_password(
        &mut self,
        old_password: &str,
        new_password: Option<&str>,
    ) -> Result<(), SessionError> {
        if new_password == Some(DEFAULT_PASSWORD) {
            let _ = self.event_tx.send(PenEvent::IllegalPassword).await;
            return Err(SessionError::IllegalPassword);
        }
        let frame = self.handler()?.password_change(old_password, new_password);
        self.pending_auth = Some(PendingAuth {
            new_password: new_password.map(str::to_string),
        });
        self.send(frame).await
    }

    /// Queries the settings snapshot.
    pub async fn request_settings(&mut self) -> Result<(), SessionError> {
        let frame = self.handler()?.setting_info_request();
        self.send(frame).await
    }

    /// Changes one setting.
    pub async fn change_setting(&mut self, change: SettingChange) -> Result<(), SessionError> {
        let frame = self.handler()?.setting_change(&change);
        self.send(frame).await
    }

    /// Subscribes to realtime stroke data.
    pub async fn subscribe_notes(&mut self, filter: NoteFilter) -> Result<(), SessionError> {
        let frame = self.handler()?.note_subscription(&filter);
        self.send(frame).await
    }

    /// Lists notes holding offline data; `None` scopes to everything.
    pub async fn request_offline_notes(
        &mut self,
        scope: Option<(u8, u32)>,
    ) -> Result<(), SessionError> {
        let frame = self.handler()?.offline_note_list(scope);
        self.send(frame).await
    }

    /// Lists offline pages of one note.
    pub async fn request_offline_pages(&mut self, note: NoteId) -> Result<(), SessionError> {
        let frame = self.handler()?.offline_page_list(note);
        self.send(frame).await
    }

    /// Starts an offline data transfer.  An empty `pages` slice fetches
    /// every page of the note.  With `delete_on_finish`, the stored data is
    /// deleted once the whole transfer completes.
    pub async fn fetch_offline_data(
        &mut self,
        note: NoteId,
        delete_on_finish: bool,
        pages: &[u32],
    ) -> Result<(), SessionError> {
        let frame = self
            .handler()?
            .offline_data_request(note, delete_on_finish, pages);
        self.offline = Some(OfflineTransferState {
            note,
            delete_on_finish,
            expected_pages: None,
            received_pages: 0,
        });
        self.send(frame).await
    }

    /// Deletes offline data for the given notes.
    pub async fn delete_offline_data(
        &mut self,
        section: u8,
        owner: u32,
        notes: &[u32],
    ) -> Result<(), SessionError> {
        let frame = self.handler()?.offline_delete(section, owner, notes);
        self.send(frame).await
    }

    /// Negotiates a firmware upload.  The chunked transfer that follows is
    /// driven by the pen; watch the event channel for progress and
    /// completion.
    pub async fn install_firmware(
        &mut self,
        image: Vec<u8>,
        new_version: &str,
        compress: bool,
    ) -> Result<(), SessionError> {
        if self.firmware.is_some() {
            return Err(SessionError::UploadActive);
        }
        let info = self.version.as_ref().ok_or(SessionError::NoVersionHandshake)?;
        let chunk_size = chunk_size_for(&info.device_name);
        let compress = compress && info.supports_compression;

        let frame = self.handler()?.firmware_upload_request(
            &info.device_name,
            new_version,
            image.len() as u32,
            chunk_size,
            compress,
            checksum(&image),
        );
        self.firmware = Some(FirmwareUploadState {
            image,
            chunk_size,
            compress,
            offset: 0,
        });
        self.send(frame).await
    }

    /// Creates the profile partition.
    pub async fn create_profile(&mut self) -> Result<(), SessionError> {
        let frame = self.handler()?.profile_create();
        self.send(frame).await
    }

    /// Deletes the profile partition.
    pub async fn delete_profile(&mut self) -> Result<(), SessionError> {
        let frame = self.handler()?.profile_delete();
        self.send(frame).await
    }

    /// Queries profile partition info.
    pub async fn request_profile_info(&mut self) -> Result<(), SessionError> {
        let frame = self.handler()?.profile_info();
        self.send(frame).await
    }

    /// Writes profile key/value pairs.
    pub async fn write_profile_values(
        &mut self,
        entries: &[(String, Vec<u8>)],
    ) -> Result<(), SessionError> {
        let frame = self.handler()?.profile_write(entries);
        self.send(frame).await
    }

    /// Reads profile values by key.
    pub async fn read_profile_values(&mut self, keys: &[String]) -> Result<(), SessionError> {
        let frame = self.handler()?.profile_read(keys);
        self.send(frame).await
    }

    /// Deletes profile values by key.
    pub async fn delete_profile_values(&mut self, keys: &[String]) -> Result<(), SessionError> {
        let frame = self.handler()?.profile_delete_value(keys);
        self.send(frame).await
    }

    // ── Internals ───────────────────────────────────────────────────────────

    fn handler(&self) -> Result<&dyn ProtocolHandler, SessionError> {
        self.handler
            .as_deref()
            .ok_or(SessionError::UnsupportedRequest)
    }

    async fn send(&self, frame: Vec<u8>) -> Result<(), SessionError> {
        match send_with_retry(&self.link, &frame, self.config.write_retry_delay()).await {
            Ok(()) => Ok(()),
            Err(err) => {
                let _ = self
                    .event_tx
                    .send(PenEvent::TransportError {
                        description: err.to_string(),
                    })
                    .await;
                Err(err.into())
            }
        }
    }

    async fn emit(&self, event: PenEvent) {
        let _ = self.event_tx.send(event).await;
    }

    async fn emit_stroke(&self, event: StrokeEvent) {
        let _ = self.stroke_tx.send(event).await;
    }

    async fn handle_event(&mut self, event: InboundEvent) {
        match event {
            InboundEvent::VersionInfo(info) => {
                debug!(device = %info.device_name, protocol = %info.protocol_version, "version handshake complete");
                self.version = Some(info.clone());
                self.emit(PenEvent::VersionInfo(info)).await;
            }
            InboundEvent::Authorized => {
                self.pending_auth = None;
                self.emit(PenEvent::Authorized).await;
            }
            InboundEvent::PasswordRequired {
                device_code,
                retry_count,
                reset_time,
            } => {
                self.pending_auth = None;
                self.emit(PenEvent::PasswordRequired {
                    device_code,
                    retry_count,
                    reset_time,
                })
                .await;
            }
            InboundEvent::PasswordChanged => {
                // The change is live; re-authenticate with the new password
                // so the session stays authorized.
                let pending = self.pending_auth.take();
                self.emit(PenEvent::PasswordChanged).await;
                if let Some(PendingAuth {
                    new_password: Some(password),
                }) = pending
                {
                    if let Ok(handler) = self.handler() {
                        let frame = handler.password_input(&password);
                        let _ = self.send(frame).await;
                    }
                }
            }
            InboundEvent::PasswordChangeRejected {
                device_code,
                retry_count,
            } => {
                self.pending_auth = None;
                self.emit(PenEvent::PasswordChangeRejected {
                    device_code,
                    retry_count,
                })
                .await;
            }
            InboundEvent::SettingInfo(info) => {
                self.settings = Some(info.clone());
                self.emit(PenEvent::SettingInfo(info)).await;
            }
            InboundEvent::SettingChanged { kind } => {
                self.emit(PenEvent::SettingChanged { kind }).await;
            }
            InboundEvent::SubscriptionReady => {
                self.emit(PenEvent::SubscriptionReady).await;
            }
            InboundEvent::LowBattery { percent } => {
                self.emit(PenEvent::LowBattery { percent }).await;
            }
            InboundEvent::Shutdown { reason } => {
                self.emit(PenEvent::Shutdown { reason }).await;
            }

            // Realtime path.
            InboundEvent::PenUpDown { counter, event } => {
                self.emit_stroke(StrokeEvent::PenUpDown { counter, event }).await;
            }
            InboundEvent::PaperInfo { counter, page } => {
                self.emit_stroke(StrokeEvent::PageBoundary { counter, page }).await;
            }
            InboundEvent::Dot { counter, kind, dot } => {
                self.emit_stroke(StrokeEvent::Dot { counter, kind, dot }).await;
            }
            InboundEvent::DotError { counter, error } => {
                self.emit_stroke(StrokeEvent::TrackingError { counter, error }).await;
            }

            // Offline transfer.
            InboundEvent::OfflineNoteList(notes) => {
                self.emit(PenEvent::OfflineNoteList(notes)).await;
            }
            InboundEvent::OfflinePageList(list) => {
                self.emit(PenEvent::OfflinePageList(list)).await;
            }
            InboundEvent::OfflineFetchAck(ack) => {
                if let Some(state) = &mut self.offline {
                    state.expected_pages = Some(ack.page_count);
                }
                self.emit(PenEvent::OfflineTransferStarted(ack)).await;
            }
            InboundEvent::OfflinePacket { packet_id, valid } => {
                if let Ok(handler) = self.handler() {
                    let frame = handler.offline_packet_ack(packet_id, valid);
                    let _ = self.send(frame).await;
                }
            }
            InboundEvent::OfflinePageReady(page) => {
                self.emit(PenEvent::OfflinePage(page)).await;
                self.note_offline_page_done().await;
            }
            InboundEvent::OfflineDeleted => {
                self.emit(PenEvent::OfflineDeleted).await;
            }

            // Firmware upload.
            InboundEvent::FirmwareAck(code) => {
                self.handle_firmware_ack(code).await;
            }
            InboundEvent::FirmwarePacketRequest(req) => match req.status {
                FirmwarePacketStatus::Continue => {
                    self.send_firmware_chunk(req.offset).await;
                }
                FirmwarePacketStatus::Finished => {
                    self.firmware = None;
                    self.emit(PenEvent::FirmwareUploadComplete).await;
                }
                FirmwarePacketStatus::Error => {
                    self.firmware = None;
                    self.emit(PenEvent::FirmwareUploadFailed).await;
                }
            },

            InboundEvent::ProfileAck(ack) => {
                self.emit(PenEvent::ProfileAck(ack)).await;
            }

            // Reported faults.
            InboundEvent::DeviceRejected { cmd, code } => {
                self.emit(PenEvent::DeviceRejected { cmd, code }).await;
            }
            InboundEvent::Framing(err) => {
                self.emit(PenEvent::ProtocolFault {
                    description: err.to_string(),
                })
                .await;
            }
            InboundEvent::BadPayload { cmd, reason } => {
                self.emit(PenEvent::ProtocolFault {
                    description: format!("{cmd:?}: {reason}"),
                })
                .await;
            }
            InboundEvent::ChecksumMismatch {
                cmd,
                expected,
                actual,
            } => {
                self.emit(PenEvent::ChecksumError {
                    description: format!(
                        "{cmd:?}: expected 0x{expected:02X}, got 0x{actual:02X}"
                    ),
                })
                .await;
            }
        }
    }

    async fn handle_firmware_ack(&mut self, code: FirmwareAckCode) {
        let (chunk_size, compressed) = match &self.firmware {
            Some(state) => (state.chunk_size, state.compress),
            None => (0, false),
        };
        if code != FirmwareAckCode::Granted {
            self.firmware = None;
        }
        self.emit(PenEvent::FirmwareAck {
            code,
            chunk_size,
            compressed,
        })
        .await;
    }

    async fn send_firmware_chunk(&mut self, offset: u32) {
        // Snapshot what the chunk needs before any await so the upload
        // state is free to change underneath.
        let chunk = match &self.firmware {
            Some(state) => {
                let start = offset as usize;
                if start >= state.image.len() {
                    None
                } else {
                    let end = (start + state.chunk_size as usize).min(state.image.len());
                    Some((
                        state.image[start..end].to_vec(),
                        state.compress,
                        end as u32,
                        state.image.len() as u32,
                    ))
                }
            }
            None => None,
        };

        let Some((data, compress, end, total)) = chunk else {
            warn!(offset, "chunk request outside any active upload");
            if let Ok(handler) = self.handler() {
                let frame = handler.firmware_chunk_error();
                let _ = self.send(frame).await;
            }
            self.emit(PenEvent::ProtocolFault {
                description: format!("firmware chunk requested at offset {offset} with no upload"),
            })
            .await;
            return;
        };

        let built = {
            let Ok(handler) = self.handler() else { return };
            handler.firmware_chunk(offset, &data, compress)
        };

        match built {
            Ok(frame) => {
                if self.send(frame).await.is_ok() {
                    if let Some(state) = &mut self.firmware {
                        state.offset = end;
                    }
                    self.emit(PenEvent::FirmwareProgress { sent: end, total }).await;
                }
            }
            Err(err) => {
                warn!(%err, "chunk build failed; refusing");
                let error_frame = {
                    let Ok(handler) = self.handler() else { return };
                    handler.firmware_chunk_error()
                };
                let _ = self.send(error_frame).await;
                self.firmware = None;
                self.emit(PenEvent::FirmwareUploadFailed).await;
            }
        }
    }

    async fn note_offline_page_done(&mut self) {
        let complete = match &mut self.offline {
            Some(state) => {
                state.received_pages += 1;
                matches!(state.expected_pages, Some(expected) if state.received_pages >= expected)
            }
            None => false,
        };
        if !complete {
            return;
        }

        if let Some(state) = self.offline.take() {
            self.emit(PenEvent::OfflineTransferComplete {
                note: state.note,
                pages: state.received_pages,
            })
            .await;

            if state.delete_on_finish {
                if let Ok(handler) = self.handler() {
                    let frame = handler.offline_delete(
                        state.note.section,
                        state.note.owner,
                        &[state.note.note],
                    );
                    let _ = self.send(frame).await;
                }
            }
        }
    }
}

/// Chunk size the device family tolerates.
fn chunk_size_for(device_name: &str) -> u32 {
    if SMALL_CHUNK_MODELS.contains(&device_name) {
        SMALL_CHUNK_SIZE
    } else {
        DEFAULT_CHUNK_SIZE
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
