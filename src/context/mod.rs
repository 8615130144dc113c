//! Processing contexts.
//!
//! [`StreamProcessingContext`] lives as long as its source's worker and is
//! never shared between workers. [`MessageProcessingContext`] wraps it for the
//! duration of a single pipeline run.

pub mod message;
pub mod stream;

pub use message::{next_message_id, MessageProcessingContext};
pub use stream::StreamProcessingContext;
