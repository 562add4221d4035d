//! Shared protocol for the run center execution engine.
//!
//! Everything in here is plain data: requests handed to the engine, lifecycle
//! events streamed back, the frames an isolated context writes on its wire,
//! and the request/response pair of the capability-gated mode.

pub mod capability;
pub mod events;
pub mod request;

pub use capability::*;
pub use events::*;
pub use request::*;
