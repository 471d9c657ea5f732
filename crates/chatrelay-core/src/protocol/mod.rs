//! Wire protocol between the host orchestrator and the gateway worker.
//!
//! Two disjoint message families travel as newline-delimited JSON objects
//! tagged by `type`. Ordering is preserved per `requestId`; nothing is
//! promised across request ids.

mod codec;
mod types;

pub use codec::{Decoded, decode_line, decode_value, encode_line};
pub use types::*;
