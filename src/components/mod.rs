//! Built-in filters, processors, sources and sinks.
//!
//! Each is registered in [`crate::registry::ComponentRegistry::with_builtins`]
//! under a snake_case type tag.

pub mod filters;
pub mod processors;
pub mod sinks;
pub mod sources;
