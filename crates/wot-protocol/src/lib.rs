//! # wot-protocol
//!
//! Message types and payload codec shared by the WoT broker transports.
//!
//! This crate defines the JSON documents sent to viewers and status clients,
//! and how raw request bodies become payload values.

pub mod codec;
pub mod messages;

pub use codec::*;
pub use messages::*;
