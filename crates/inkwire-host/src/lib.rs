//! # inkwire-host
//!
//! Session layer over the `inkwire-core` protocol engine.  One
//! [`PenSession`] per connected pen: it encodes requests through the
//! selected protocol handler, feeds inbound link bytes to the parser, and
//! fans typed events out on a stroke channel and a pen-event channel.
//! Pen-driven flows (firmware chunk upload, offline data transfer) are
//! answered by the session itself.
//!
//! The physical link is injected behind the [`transport::PenLink`] trait;
//! this crate never opens a BLE connection.

pub mod config;
pub mod geometry;
pub mod protocol_handler;
pub mod registry;
pub mod session;
pub mod transport;

pub use config::{load_config, save_config, ConfigError, DriverConfig};
pub use geometry::{PageGeometry, StaticGeometry};
pub use protocol_handler::{Protocol, ProtocolHandler, ProtocolV2};
pub use registry::{PenRegistry, SessionId};
pub use session::{PenEvent, PenSession, SessionError, StrokeEvent};
pub use transport::{LinkError, PenLink};

/// Initialises structured logging for an application embedding the driver.
///
/// The level comes from `RUST_LOG` when set, otherwise from
/// [`DriverConfig::log_level`].  Calling this twice is harmless; the second
/// call is ignored.
pub fn init_logging(config: &DriverConfig) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone()));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
