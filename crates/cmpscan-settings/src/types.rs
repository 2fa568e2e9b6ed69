//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase")]` and `#[serde(default)]`
//! so a partial JSON file only overrides what it names.

use std::time::Duration;

use cmpscan_core::{AgentConfig, AutoAction, PollBudget};
use serde::{Deserialize, Serialize};

/// Built-in free-text consent patterns, matched case-insensitively.
///
/// Broader phrases such as "cookie settings" or "cookie preferences" are
/// left out on purpose: they match footers on most sites.
pub const DEFAULT_PATTERNS: &[&str] = &[
    "accept cookies",
    "accept all",
    "reject all",
    "only necessary cookies",
    "by clicking.*(accept|agree|allow)",
    "by continuing",
    "we (use|serve)( optional)? cookies",
    "we are using cookies",
    "use of cookies",
    "(this|our) (web)?site.*cookies",
    "cookies (and|or) .* technologies",
    "such as cookies",
    "read more about.*cookies",
    "consent to.*cookies",
    "we and our partners.*cookies",
    "we.*store.*information.*such as.*cookies",
    "store and/or access information.*on a device",
    "personalised ads and content, ad and content measurement",
];

/// Root settings type.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CmpscanSettings {
    /// Consent protocol and scan behaviour.
    pub collector: CollectorSettings,
    /// Browser launch and navigation.
    pub browser: BrowserSettings,
    /// Logging configuration.
    pub logging: LoggingSettings,
}

/// Poll budget for protocol waits.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PollSettings {
    /// Checks per wait.
    pub max_attempts: u32,
    /// Milliseconds between checks.
    pub interval_ms: u64,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            max_attempts: 20,
            interval_ms: 100,
        }
    }
}

/// Consent protocol and scan behaviour.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CollectorSettings {
    /// Action to request once a popup is found (`None` = observe only).
    pub auto_action: Option<AutoAction>,
    /// Collapse every wait to a single immediate check.
    pub short_timeouts: bool,
    /// Wait budget for protocol messages.
    pub poll: PollSettings,
    /// Detection retries handed to the agent.
    pub detect_retries: u32,
    /// Maximum snippet length in characters.
    pub snippet_max_len: usize,
    /// In-page bound on a privacy API call in milliseconds.
    pub probe_timeout_ms: u64,
    /// Scroll the main frame to the bottom before scanning text.
    pub scroll_to_bottom: bool,
    /// Free-text detection patterns.
    pub patterns: Vec<String>,
}

impl Default for CollectorSettings {
    fn default() -> Self {
        Self {
            auto_action: None,
            short_timeouts: false,
            poll: PollSettings::default(),
            detect_retries: 20,
            snippet_max_len: 200,
            probe_timeout_ms: 5_000,
            scroll_to_bottom: true,
            patterns: DEFAULT_PATTERNS.iter().map(|p| (*p).to_string()).collect(),
        }
    }
}

impl CollectorSettings {
    /// Budget for a single protocol wait.
    pub fn poll_budget(&self) -> PollBudget {
        if self.short_timeouts {
            PollBudget::immediate()
        } else {
            PollBudget::new(
                self.poll.max_attempts,
                Duration::from_millis(self.poll.interval_ms),
            )
        }
    }

    /// Configuration sent to the agent in reply to `init`.
    pub fn agent_config(&self) -> AgentConfig {
        AgentConfig::with_detect_retries(self.detect_retries)
    }
}

/// Browser launch and navigation.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BrowserSettings {
    /// Explicit Chrome binary; discovered when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chrome_path: Option<String>,
    /// Run Chrome headless.
    pub headless: bool,
    /// Timeout for a single CDP command in milliseconds.
    pub command_timeout_ms: u64,
    /// Time to let the page settle after load before scanning.
    pub settle_ms: u64,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            chrome_path: None,
            headless: true,
            command_timeout_ms: 30_000,
            settle_ms: 3_000,
        }
    }
}

/// Logging configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let s = CmpscanSettings::default();
        assert_eq!(s.collector.auto_action, None);
        assert_eq!(s.collector.poll.max_attempts, 20);
        assert_eq!(s.collector.snippet_max_len, 200);
        assert_eq!(s.collector.patterns.len(), DEFAULT_PATTERNS.len());
        assert!(s.browser.headless);
        assert_eq!(s.logging.level, "info");
    }

    #[test]
    fn short_timeouts_collapse_budget() {
        let mut c = CollectorSettings::default();
        assert_eq!(c.poll_budget(), PollBudget::default());
        c.short_timeouts = true;
        assert_eq!(c.poll_budget(), PollBudget::immediate());
    }

    #[test]
    fn agent_config_carries_detect_retries() {
        let c = CollectorSettings {
            detect_retries: 5,
            ..CollectorSettings::default()
        };
        let cfg = c.agent_config();
        assert_eq!(cfg.detect_retries, 5);
        assert!(cfg.auto_action.is_none());
        assert!(!cfg.is_main_world);
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let s: CmpscanSettings =
            serde_json::from_str(r#"{"collector": {"autoAction": "optOut"}}"#).unwrap();
        assert_eq!(s.collector.auto_action, Some(AutoAction::OptOut));
        assert_eq!(s.collector.detect_retries, 20);
        assert_eq!(s.browser.command_timeout_ms, 30_000);
    }
}
