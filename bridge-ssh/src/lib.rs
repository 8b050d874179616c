pub mod bridge;
pub mod channels;
pub mod client;
pub mod common;
pub mod config;
pub mod context;
pub mod dial;
pub mod downstream;
pub mod error;
pub mod idle_timeout;
pub mod pipe;
pub mod server;
pub mod subsystem;
pub mod term_handlers;

pub use bridge::Bridge;
pub use config::{BridgeConfig, HostCertificate, HostKeyAuth, Timeouts};
pub use error::BridgeError;
pub use pipe::{DualPipe, PipeEnd};
pub use term_handlers::{DefaultTermHandlers, TermHandlers};
