//! chatrelay Host Library
//!
//! The host side of the relay:
//! - [`RelayOrchestrator`]: gateway lifecycle, pending requests, conversation history
//! - Content serializer mapping rich response parts onto the wire taxonomy
//! - Collaborator traits for the request handler and model endpoints
//! - Process launcher that runs the gateway binary over stdio

pub mod conversation;
pub mod echo;
pub mod error;
pub mod handler;
pub mod model;
pub mod parts;
pub mod relay;
pub mod serializer;
pub mod worker;

pub use conversation::{ConversationStore, RequestTurn, ResponseTurn, Turn};
pub use error::{HandlerError, RelayError};
pub use handler::{ChatRequest, HandlerOutcome, RequestHandler, ResponseStream};
pub use model::{EndpointProvider, ModelEndpoint, StaticEndpointProvider};
pub use parts::ResponsePart;
pub use relay::{LifecycleState, RelayOrchestrator};
pub use worker::ProcessLauncher;
