//! `chatrelay` Core Library
//!
//! Shared functionality for the relay components:
//! - Wire protocol between the host orchestrator and the gateway worker
//! - NDJSON line codec with a tolerant reader
//! - Worker transport contract (launch, message links, exit signalling)
//! - Configuration resolution
//! - Common error types

pub mod config;
pub mod error;
pub mod protocol;
pub mod tracing_init;
pub mod transport;

pub use config::{ModelSelection, RelayConfig};
pub use error::{Error, Result};
pub use protocol::{GatewayMessage, HostMessage, SerializedChatPart};
