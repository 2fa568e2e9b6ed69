//! # cmpscan-collector
//!
//! Consent-interaction and privacy-signal collection for one page visit.
//!
//! - [`WorldManager`]: injects the agent into an isolated world per frame
//! - [`MessageRouter`]: logs agent messages and sends protocol replies
//! - [`ConsentController`]: polls the log through the consent handshake
//! - [`collect_results`] / [`merge_scan`]: per-CMP report assembly
//! - [`PatternTable`] and [`SignalProbe`]: free-text and USP/GPP signals
//! - [`CmpCollector`]: wires all of the above to a [`ControlChannel`](cmpscan_cdp::ControlChannel)

#![deny(unsafe_code)]

pub mod agent;
pub mod aggregator;
pub mod collector;
pub mod controller;
pub mod error;
pub mod probe;
pub mod router;
pub mod scanner;
pub mod worlds;

#[cfg(test)]
pub(crate) mod testutil;

pub use agent::{AgentProgram, BINDING_NAME, WORLD_NAME};
pub use aggregator::{collect_results, merge_scan};
pub use collector::CmpCollector;
pub use controller::ConsentController;
pub use error::{CollectorError, Result};
pub use probe::{ProbeResult, SignalProbe, supported_api_ids};
pub use router::MessageRouter;
pub use scanner::{PatternTable, TextMatches, collect_frame_texts, scroll_to_bottom};
pub use worlds::WorldManager;
