//! Wire messages exchanged with the in-page consent agent.
//!
//! The agent reports through a one-argument binding that carries a JSON
//! string; every payload is a tagged object (`{"type": "...", ...}`).
//! Replies travel the other way as an expression evaluated in the agent's
//! isolated world: `autoconsentReceiveMessage({...})`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Name of the receive function the agent installs in its world.
pub const RECEIVE_FUNCTION: &str = "autoconsentReceiveMessage";

/// Errors decoding an agent payload.
#[derive(Debug, Error)]
pub enum MessageError {
    /// The payload was not a JSON object with a recognised shape.
    #[error("malformed agent message: {0}")]
    Malformed(#[from] serde_json::Error),
}

// ─────────────────────────────────────────────────────────────────────────────
// Agent → host
// ─────────────────────────────────────────────────────────────────────────────

/// A message reported by the agent.
///
/// Messages are immutable once received. Unknown `type` tags decode to
/// [`AgentMessage::Other`] so newer agents never break the log.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum AgentMessage {
    /// Agent booted in a frame and waits for its configuration.
    Init {
        /// Frame URL.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        url: Option<String>,
    },
    /// A CMP rule matched.
    CmpDetected {
        /// Detected CMP identifier.
        cmp: String,
        /// Frame URL.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        url: Option<String>,
    },
    /// The detected CMP is showing a banner.
    PopupFound {
        /// CMP identifier.
        cmp: String,
        /// Frame URL.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        url: Option<String>,
    },
    /// Outcome of an `optIn` command.
    OptInResult {
        /// CMP identifier.
        cmp: String,
        /// Whether the action succeeded.
        result: bool,
        /// Whether the agent wants a follow-up self-test.
        #[serde(default)]
        schedule_self_test: bool,
        /// Frame URL.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        url: Option<String>,
    },
    /// Outcome of an `optOut` command.
    OptOutResult {
        /// CMP identifier.
        cmp: String,
        /// Whether the action succeeded.
        result: bool,
        /// Whether the agent wants a follow-up self-test.
        #[serde(default)]
        schedule_self_test: bool,
        /// Frame URL.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        url: Option<String>,
    },
    /// The agent finished interacting with a CMP.
    AutoconsentDone {
        /// Final CMP identifier (may differ from the detected one).
        cmp: String,
        /// Frame URL.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        url: Option<String>,
    },
    /// The agent hit an internal error.
    AutoconsentError {
        /// Free-form error details; usually a string.
        #[serde(default)]
        details: Value,
    },
    /// The agent asks the host to run code in the page's own world.
    Eval {
        /// Request id echoed in the `evalResp` reply.
        id: String,
        /// Expression to evaluate.
        code: String,
    },
    /// Outcome of a `selfTest` command.
    SelfTestResult {
        /// CMP identifier.
        cmp: String,
        /// Whether the action verifiably took effect.
        result: bool,
        /// Frame URL.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        url: Option<String>,
    },
    /// Any message type this collector does not react to.
    #[serde(other)]
    Other,
}

/// Discriminant of an [`AgentMessage`], used for log queries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// `init`
    Init,
    /// `cmpDetected`
    CmpDetected,
    /// `popupFound`
    PopupFound,
    /// `optInResult`
    OptInResult,
    /// `optOutResult`
    OptOutResult,
    /// `autoconsentDone`
    AutoconsentDone,
    /// `autoconsentError`
    AutoconsentError,
    /// `eval`
    Eval,
    /// `selfTestResult`
    SelfTestResult,
    /// anything else
    Other,
}

impl MessageKind {
    /// Wire tag of this kind.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::CmpDetected => "cmpDetected",
            Self::PopupFound => "popupFound",
            Self::OptInResult => "optInResult",
            Self::OptOutResult => "optOutResult",
            Self::AutoconsentDone => "autoconsentDone",
            Self::AutoconsentError => "autoconsentError",
            Self::Eval => "eval",
            Self::SelfTestResult => "selfTestResult",
            Self::Other => "other",
        }
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl AgentMessage {
    /// Decode a binding payload (a JSON-encoded string).
    pub fn decode(payload: &str) -> Result<Self, MessageError> {
        Ok(serde_json::from_str(payload)?)
    }

    /// Discriminant of this message.
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Init { .. } => MessageKind::Init,
            Self::CmpDetected { .. } => MessageKind::CmpDetected,
            Self::PopupFound { .. } => MessageKind::PopupFound,
            Self::OptInResult { .. } => MessageKind::OptInResult,
            Self::OptOutResult { .. } => MessageKind::OptOutResult,
            Self::AutoconsentDone { .. } => MessageKind::AutoconsentDone,
            Self::AutoconsentError { .. } => MessageKind::AutoconsentError,
            Self::Eval { .. } => MessageKind::Eval,
            Self::SelfTestResult { .. } => MessageKind::SelfTestResult,
            Self::Other => MessageKind::Other,
        }
    }

    /// CMP identifier carried by the message, if its type has one.
    pub fn cmp(&self) -> Option<&str> {
        match self {
            Self::CmpDetected { cmp, .. }
            | Self::PopupFound { cmp, .. }
            | Self::OptInResult { cmp, .. }
            | Self::OptOutResult { cmp, .. }
            | Self::AutoconsentDone { cmp, .. }
            | Self::SelfTestResult { cmp, .. } => Some(cmp),
            _ => None,
        }
    }

    /// Boolean outcome for result-carrying messages.
    pub fn result(&self) -> Option<bool> {
        match self {
            Self::OptInResult { result, .. }
            | Self::OptOutResult { result, .. }
            | Self::SelfTestResult { result, .. } => Some(*result),
            _ => None,
        }
    }

    /// Error text of an `autoconsentError`; non-string details are rendered as JSON.
    pub fn error_text(&self) -> Option<String> {
        match self {
            Self::AutoconsentError { details } => Some(match details {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            }),
            _ => None,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Host → agent
// ─────────────────────────────────────────────────────────────────────────────

/// Action the collector asks the agent to perform on a found popup.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AutoAction {
    /// Accept the consent banner.
    OptIn,
    /// Reject the consent banner.
    OptOut,
}

impl AutoAction {
    /// The agent message that reports this action's outcome.
    pub fn result_kind(self) -> MessageKind {
        match self {
            Self::OptIn => MessageKind::OptInResult,
            Self::OptOut => MessageKind::OptOutResult,
        }
    }

    /// The host command that triggers this action.
    pub fn command(self) -> HostMessage {
        match self {
            Self::OptIn => HostMessage::OptIn,
            Self::OptOut => HostMessage::OptOut,
        }
    }

    /// Wire name (`optIn` / `optOut`).
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OptIn => "optIn",
            Self::OptOut => "optOut",
        }
    }
}

impl std::str::FromStr for AutoAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace(['-', '_'], "").as_str() {
            "optin" => Ok(Self::OptIn),
            "optout" => Ok(Self::OptOut),
            other => Err(format!("unknown auto action '{other}'")),
        }
    }
}

/// Configuration handed to the agent in reply to `init`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentConfig {
    /// Master switch.
    pub enabled: bool,
    /// Always `null`: the collector requests actions explicitly.
    pub auto_action: Option<AutoAction>,
    /// CMP rules the agent must skip.
    pub disabled_cmps: Vec<String>,
    /// Hide known banners before detection.
    pub enable_prehide: bool,
    /// Enable cosmetic (CSS-hiding) rules.
    pub enable_cosmetic_rules: bool,
    /// How many times the agent retries detection.
    pub detect_retries: u32,
    /// Whether the agent runs in the page's main world.
    pub is_main_world: bool,
}

impl AgentConfig {
    /// Protocol configuration with the given detection retry count.
    pub fn with_detect_retries(detect_retries: u32) -> Self {
        Self {
            detect_retries,
            ..Self::default()
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            auto_action: None,
            disabled_cmps: Vec::new(),
            enable_prehide: false,
            enable_cosmetic_rules: true,
            detect_retries: 20,
            is_main_world: false,
        }
    }
}

/// A message sent from the host into the agent's world.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum HostMessage {
    /// Reply to `init`.
    InitResp {
        /// Agent configuration.
        config: AgentConfig,
    },
    /// Accept the banner.
    OptIn,
    /// Reject the banner.
    OptOut,
    /// Verify that the previous action took effect.
    SelfTest,
    /// Reply to an `eval` request.
    EvalResp {
        /// Request id from the `eval` message.
        id: String,
        /// Boolean-coerced evaluation result.
        result: bool,
    },
}

impl HostMessage {
    /// Expression that delivers this message to the agent.
    pub fn to_expression(&self) -> String {
        // Serializing a plain enum of strings/bools cannot fail.
        let body = serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string());
        format!("{RECEIVE_FUNCTION}({body})")
    }
}
