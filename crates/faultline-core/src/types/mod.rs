//! # Types
//!
//! Small value types shared by every capture component.
//!
//! Nothing here allocates, so all of it can be used from a signal handler.

pub mod address;
pub mod thread;

pub use address::Address;
pub use thread::ThreadId;
