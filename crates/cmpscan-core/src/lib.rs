//! # cmpscan-core
//!
//! Shared vocabulary for the consent-interaction and privacy-signal collector.
//!
//! - **Messages**: [`AgentMessage`] (agent → host) and [`HostMessage`] (host → agent)
//! - **Message log**: append-only [`MessageLog`] with partial-match queries
//! - **Reports**: [`ScanResult`], [`CmpResult`], [`ConsentOutcome`], [`VisitReport`]
//! - **Polling**: bounded cooperative waits via [`poll_until`]
//! - **Logging**: [`logging::init_subscriber`]

#![deny(unsafe_code)]

pub mod log;
pub mod logging;
pub mod messages;
pub mod poll;
pub mod report;

pub use log::{MessageLog, MessageQuery};
pub use messages::{AgentConfig, AgentMessage, AutoAction, HostMessage, MessageKind};
pub use poll::{PollBudget, poll_until};
pub use report::{
    CmpResult, ConsentOutcome, ConsentState, HasSection, ScanResult, SelfTestStatus, VisitReport,
};
