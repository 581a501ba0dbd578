//! Byte-stuffing and frame delimiting.
//!
//! Wire layout of one frame, before escaping:
//!
//! ```text
//! [STX][cmd:1][result:1 - response frames only][len:2 LE][payload:len][ETX]
//! ```
//!
//! Every body byte between the delimiters is escaped: STX, ETX, and DLE
//! become `[DLE, byte ^ 0x20]`.  The delimiters themselves are written raw.
//! An escape byte always consumes exactly one following byte, whatever its
//! value, so an ETX right after a DLE is payload rather than a frame end.
//!
//! [`FrameScanner`] reassembles frames from an arbitrarily-chunked byte
//! stream: notifications from the link may split a frame anywhere, including
//! in the middle of an escape sequence or the length field, and may carry
//! several frames at once.

use thiserror::Error;
use tracing::warn;

use super::cmd::{Cmd, DLE, ESCAPE_XOR, ETX, EVENT_HEADER_SIZE, MAX_PAYLOAD_LEN, RESPONSE_HEADER_SIZE, STX};

/// Errors raised while delimiting or decoding a single frame.
///
/// All of these are discard-and-continue conditions: the offending frame is
/// dropped and the scanner resynchronises on the next STX.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FramingError {
    /// The stream ended with a dangling escape byte.
    #[error("dangling escape byte at end of input")]
    DanglingEscape,

    /// A raw STX appeared inside a frame body; the partial frame is dropped.
    #[error("frame start inside frame body after {dropped} bytes")]
    UnexpectedStart { dropped: usize },

    /// The unescaped body is shorter than the header for its command.
    #[error("truncated frame: {len} body bytes")]
    TruncatedHeader { len: usize },

    /// The command byte is not in the catalog.
    #[error("unknown command id 0x{0:02X}")]
    UnknownCommand(u8),

    /// The declared length field is beyond any payload the pen can send.
    #[error("declared payload length {declared} exceeds limit")]
    OversizedPayload { declared: usize },

    /// The payload between header and ETX does not match the declared length.
    #[error("length mismatch for 0x{cmd:02X}: declared {declared}, got {actual}")]
    LengthMismatch { cmd: u8, declared: usize, actual: usize },
}

// ── Escaping ──────────────────────────────────────────────────────────────────

/// Appends `byte` to `out`, escaped if it collides with a delimiter.
pub fn escape_into(out: &mut Vec<u8>, byte: u8) {
    if byte == STX || byte == ETX || byte == DLE {
        out.push(DLE);
        out.push(byte ^ ESCAPE_XOR);
    } else {
        out.push(byte);
    }
}

/// Escapes a whole body.
pub fn escape(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(bytes.len());
    for b in bytes {
        escape_into(&mut out, *b);
    }
    out
}

/// Reverses [`escape`] over a complete escaped body.
///
/// # Errors
///
/// Returns [`FramingError::DanglingEscape`] when the input ends on a DLE.
pub fn unescape(bytes: &[u8]) -> Result<Vec<u8>, FramingError> {
    let mut out = Vec::with_capacity(bytes.len());
    let mut iter = bytes.iter();
    while let Some(b) = iter.next() {
        if *b == DLE {
            let next = iter.next().ok_or(FramingError::DanglingEscape)?;
            out.push(*next ^ ESCAPE_XOR);
        } else {
            out.push(*b);
        }
    }
    Ok(out)
}

// ── Frame encoding ────────────────────────────────────────────────────────────

/// Serialises a request/event frame: no result byte.
pub fn encode_frame(cmd: Cmd, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 8);
    out.push(STX);
    escape_into(&mut out, cmd as u8);
    let len = payload.len() as u16;
    escape_into(&mut out, (len & 0xFF) as u8);
    escape_into(&mut out, (len >> 8) as u8);
    for b in payload {
        escape_into(&mut out, *b);
    }
    out.push(ETX);
    out
}

/// Serialises a response frame: the result byte sits between command and
/// length.  Used for the host's replies in pen-initiated flows.
pub fn encode_response_frame(cmd: Cmd, result: u8, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 8);
    out.push(STX);
    escape_into(&mut out, cmd as u8);
    escape_into(&mut out, result);
    let len = payload.len() as u16;
    escape_into(&mut out, (len & 0xFF) as u8);
    escape_into(&mut out, (len >> 8) as u8);
    for b in payload {
        escape_into(&mut out, *b);
    }
    out.push(ETX);
    out
}

/// Serialises a bare result frame with no length field at all.
///
/// The firmware chunk upload uses this shape to refuse a chunk: the body is
/// just the command and a non-zero error code.
pub fn encode_bare_result_frame(cmd: Cmd, result: u8) -> Vec<u8> {
    let mut out = Vec::with_capacity(4);
    out.push(STX);
    escape_into(&mut out, cmd as u8);
    escape_into(&mut out, result);
    out.push(ETX);
    out
}

// ── Decoded frame ─────────────────────────────────────────────────────────────

/// One delimited, unescaped, length-checked frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    pub cmd: Cmd,
    /// Device result code; present only on response frames.
    pub result: Option<u8>,
    pub declared_len: u16,
    pub payload: Vec<u8>,
}

impl RawFrame {
    /// Decodes an unescaped frame body (the bytes between STX and ETX).
    pub fn decode(body: &[u8]) -> Result<Self, FramingError> {
        let raw_cmd = *body.first().ok_or(FramingError::TruncatedHeader { len: 0 })?;
        let cmd = Cmd::try_from(raw_cmd).map_err(|()| FramingError::UnknownCommand(raw_cmd))?;

        let header = if cmd.carries_result() {
            RESPONSE_HEADER_SIZE
        } else {
            EVENT_HEADER_SIZE
        };
        if body.len() < header {
            return Err(FramingError::TruncatedHeader { len: body.len() });
        }

        let (result, len_at) = if cmd.carries_result() {
            (Some(body[1]), 2)
        } else {
            (None, 1)
        };
        let declared = u16::from_le_bytes([body[len_at], body[len_at + 1]]);
        if declared as usize > MAX_PAYLOAD_LEN {
            return Err(FramingError::OversizedPayload {
                declared: declared as usize,
            });
        }

        let payload = &body[header..];
        if payload.len() != declared as usize {
            return Err(FramingError::LengthMismatch {
                cmd: raw_cmd,
                declared: declared as usize,
                actual: payload.len(),
            });
        }

        Ok(RawFrame {
            cmd,
            result,
            declared_len: declared,
            payload: payload.to_vec(),
        })
    }
}

// ── Incremental scanner ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanState {
    /// Discarding bytes until the next STX.
    AwaitingStart,
    /// Inside a frame, accumulating unescaped body bytes.
    AwaitingBody { escaped: bool },
}

/// Reassembles unescaped frame bodies from a fragmented byte stream.
///
/// The scanner unescapes on the fly, so the escape state survives chunk
/// boundaries: a DLE at the end of one notification correctly combines with
/// the first byte of the next.
#[derive(Debug)]
pub struct FrameScanner {
    state: ScanState,
    body: Vec<u8>,
    skipped: usize,
}

impl Default for FrameScanner {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameScanner {
    pub fn new() -> Self {
        Self {
            state: ScanState::AwaitingStart,
            body: Vec::new(),
            skipped: 0,
        }
    }

    /// Drops any partial frame and returns to the hunting state.
    pub fn reset(&mut self) {
        self.state = ScanState::AwaitingStart;
        self.body.clear();
        self.skipped = 0;
    }

    /// Consumes a chunk of link bytes and returns every frame body completed
    /// by it, in arrival order.  Framing errors are reported in-line so a bad
    /// frame between two good ones does not suppress the good ones.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<Result<Vec<u8>, FramingError>> {
        let mut completed = Vec::new();

        for &b in bytes {
            match self.state {
                ScanState::AwaitingStart => {
                    if b == STX {
                        if self.skipped > 0 {
                            warn!(skipped = self.skipped, "discarded bytes outside frame");
                            self.skipped = 0;
                        }
                        self.body.clear();
                        self.state = ScanState::AwaitingBody { escaped: false };
                    } else {
                        self.skipped += 1;
                    }
                }
                ScanState::AwaitingBody { escaped: true } => {
                    self.body.push(b ^ ESCAPE_XOR);
                    self.state = ScanState::AwaitingBody { escaped: false };
                }
                ScanState::AwaitingBody { escaped: false } => match b {
                    DLE => self.state = ScanState::AwaitingBody { escaped: true },
                    ETX => {
                        completed.push(Ok(std::mem::take(&mut self.body)));
                        self.state = ScanState::AwaitingStart;
                    }
                    STX => {
                        // A new frame start clobbers the partial one.
                        completed.push(Err(FramingError::UnexpectedStart {
                            dropped: self.body.len(),
                        }));
                        self.body.clear();
                    }
                    other => self.body.push(other),
                },
            }
        }

        completed
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
