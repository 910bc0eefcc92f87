pub mod error;
pub mod message;
pub mod tool;

pub use error::{OrchestratorError, OrchestratorResult};
pub use message::{ClientMessage, MessageEnvelope, KNOWN_MESSAGE_TYPES};
pub use tool::{ResourceDescriptor, ToolCallResult, ToolDescriptor};
