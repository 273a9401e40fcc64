//! Shared wire-format and pooled-allocation types used by both the process
//! controller and the control plane.

pub mod buffer;
pub mod message;

pub use buffer::{Buffer, BufferPool};
pub use message::{Message, MessageTag, BUF_SIZE, HEADER_OFFSET, ID_LENGTH, NAME_LENGTH};
