//! chatrelay Gateway Library
//!
//! The isolated front end of the relay:
//! - HTTP endpoints (`/chat`, `/health`, `/shutdown`, `/api/model/info`)
//! - One SSE stream per accepted chat request, correlated by request id
//! - Client disconnects turned into upstream cancellations
//! - Host link over stdio (NDJSON) or in-process channels

pub mod connections;
pub mod embedded;
pub mod gateway;
pub mod host_link;
pub mod routes;
pub mod server;

pub use connections::{ConnectionTable, SseFrame};
pub use embedded::EmbeddedLauncher;
pub use gateway::{ChatStream, Gateway, GatewayError, ModelInfoReply};
pub use routes::build_router;
pub use server::{GatewayOptions, run};
