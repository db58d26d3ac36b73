//! Conversation types shared by the pipeline and transports.

pub mod message;

pub use message::*;
