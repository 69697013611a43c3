//! # wot-core
//!
//! Core data model and building blocks for the WoT broker front-end.
//!
//! This crate provides:
//! - Model types (Thing, DataPayload, StartInfo, Event)
//! - Event subscription and emission
//! - URL route tables with a captured thing id
//! - Broker configuration resolution (options over environment over defaults)
//! - Start options and the callback table
//! - The thing registry used by the framework
//!
//! This crate is intentionally runtime-agnostic and contains no async code,
//! so the same contract serves both the CoAP and the WebSocket transports.

pub mod callbacks;
pub mod config;
pub mod events;
pub mod model;
pub mod options;
pub mod registry;
pub mod route;

pub use callbacks::{CallbackKey, CallbackTable, DataCallback, StartCallback, ThingCallback};
pub use config::{BrokerConfig, ConfigError, ConfigSource, EnvSnapshot, ProcessEnv};
pub use events::{EventEmitter, EventHandler};
pub use model::*;
pub use options::{OptionValue, Options};
pub use registry::{MemoryRegistry, ThingRegistry};
pub use route::{RouteError, RouteMatch, RouteTable};
