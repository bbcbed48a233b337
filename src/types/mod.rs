//! Shared value types passed between the engine client, dispatcher and handlers.

pub mod payload;

pub use payload::TaskPayload;
