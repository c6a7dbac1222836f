//! Host-facing surface: typed events, completion handles, and the
//! line-oriented control protocol with its bridge onto the service.
//!
//! Event types derive `serde::Serialize` + `serde::Deserialize` so hosts that
//! prefer structured messages can forward them as JSON.

pub mod bridge;
pub mod completion;
pub mod events;
pub mod protocol;
