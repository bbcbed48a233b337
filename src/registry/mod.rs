//! # Registry
//!
//! Reference-name to handler bindings used by the dispatcher.

pub mod task_handler_registry;

pub use task_handler_registry::{RegistryStats, TaskHandlerRegistry};
