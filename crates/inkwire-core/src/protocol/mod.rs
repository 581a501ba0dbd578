//! Protocol module: framing, command catalog, codec, and the inbound parser.

pub mod buffer;
pub mod builder;
pub mod cmd;
pub mod framing;
pub mod messages;
pub mod parser;

pub use cmd::Cmd;
pub use framing::{FrameScanner, FramingError, RawFrame};
pub use messages::*;
pub use parser::{InboundEvent, InboundParser};
