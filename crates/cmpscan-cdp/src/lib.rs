//! Browser control channel for the consent collector.
//!
//! This crate provides:
//! - [`ControlChannel`]: the interface the collector drives (evaluate in a
//!   context, create isolated worlds, register bindings, enumerate frames,
//!   subscribe to execution-context and binding events)
//! - [`CdpSession`]: a Chrome DevTools Protocol implementation over
//!   `tokio-tungstenite`
//! - Chrome discovery and the ignorable-error classifier

#![deny(unsafe_code)]

pub mod channel;
pub mod chrome;
pub mod error;
pub mod events;
pub mod session;

pub use channel::{ContextId, ControlChannel, EvaluateRequest, Evaluation};
pub use error::{ChannelError, is_ignorable_message};
pub use events::{AuxData, ChannelEvent, ExecutionContextDescription};
pub use session::{CdpSession, LaunchOptions};
