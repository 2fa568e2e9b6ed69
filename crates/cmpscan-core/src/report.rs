//! Per-visit report types.
//!
//! All types serialize as camelCase JSON, matching the record the enclosing
//! report writer persists for each visit.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Result of one `hasSection` query against the GPP API.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HasSection {
    /// API identifier queried (e.g. `tcfcav1`).
    pub api: String,
    /// Answer, or `None` when the API did not respond successfully.
    pub has_section: Option<bool>,
}

/// Output of the text scan and privacy-signal probe for one visit.
///
/// Produced once, immutable afterwards, merged into every [`CmpResult`].
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScanResult {
    /// Textual form of every pattern that matched, each listed once.
    pub patterns: Vec<String>,
    /// Matched snippets, deduplicated, each truncated to a bounded length.
    pub snippets: Vec<String>,
    /// Raw `getUSPData` responses.
    pub usp_objects: Vec<Value>,
    /// Raw GPP `ping` responses.
    pub gpp_objects: Vec<Value>,
    /// One entry per supported GPP API.
    pub has_sections: Vec<HasSection>,
}

impl ScanResult {
    /// Whether neither text patterns nor privacy signals were found.
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
            && self.snippets.is_empty()
            && self.usp_objects.is_empty()
            && self.gpp_objects.is_empty()
            && self.has_sections.is_empty()
    }
}

/// Report entry for one detected CMP.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CmpResult {
    /// CMP identifier; empty for the synthetic signals-only entry.
    pub name: String,
    /// This CMP reached `autoconsentDone`.
    #[serde(rename = "final")]
    pub is_final: bool,
    /// A popup was found for this CMP.
    pub open: bool,
    /// An action was requested.
    pub started: bool,
    /// The requested action reported success.
    pub succeeded: bool,
    /// A self-test ran and failed.
    pub self_test_fail: bool,
    /// Every `autoconsentError` of the visit.
    pub errors: Vec<String>,
    /// Shared scan data.
    #[serde(flatten)]
    pub scan: ScanResult,
}

impl CmpResult {
    /// Entry carrying only scan data, for visits where no CMP was detected.
    pub fn signals_only(scan: ScanResult) -> Self {
        Self {
            scan,
            ..Self::default()
        }
    }
}

/// Furthest state of the consent handshake.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConsentState {
    /// Nothing detected yet.
    NoSignal,
    /// A CMP was detected.
    Detected,
    /// The CMP showed a popup.
    PopupFound,
    /// An action was requested but not confirmed.
    ActionRequested,
    /// The action completed.
    ActionDone,
    /// The agent reported completion (and the self-test, if any, ran).
    SelfTested,
}

/// Self-test status at the end of a completed handshake.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SelfTestStatus {
    /// The action result did not request a self-test.
    NotScheduled,
    /// A self-test was requested but no result arrived within budget.
    Unreported,
    /// The self-test confirmed the action.
    Passed,
    /// The self-test contradicted the action.
    Failed,
}

/// Terminal state of the consent handshake for a visit.
///
/// Exhausting a wait budget is a normal terminal transition, never an error.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ConsentOutcome {
    /// No CMP was detected.
    NoCmpDetected,
    /// A CMP was detected but never showed a popup.
    PopupNotFound {
        /// Detected CMP.
        cmp: String,
    },
    /// A popup was found and no action was configured.
    NoActionConfigured {
        /// Detected CMP.
        cmp: String,
    },
    /// The action was requested but its result never arrived.
    ActionUnconfirmed {
        /// Detected CMP.
        cmp: String,
    },
    /// The action result arrived with `result = false`.
    ActionFailed {
        /// Detected CMP.
        cmp: String,
    },
    /// The action succeeded but `autoconsentDone` never arrived.
    DoneNotReported {
        /// Detected CMP.
        cmp: String,
    },
    /// The agent reported completion.
    Completed {
        /// CMP named by `autoconsentDone`.
        cmp: String,
        /// Outcome of the optional self-test.
        self_test: SelfTestStatus,
    },
}

impl ConsentOutcome {
    /// Furthest handshake state this outcome reached.
    pub fn state(&self) -> ConsentState {
        match self {
            Self::NoCmpDetected => ConsentState::NoSignal,
            Self::PopupNotFound { .. } => ConsentState::Detected,
            Self::NoActionConfigured { .. } => ConsentState::PopupFound,
            Self::ActionUnconfirmed { .. } | Self::ActionFailed { .. } => {
                ConsentState::ActionRequested
            }
            Self::DoneNotReported { .. } => ConsentState::ActionDone,
            Self::Completed { .. } => ConsentState::SelfTested,
        }
    }

    /// Detected CMP, if any.
    pub fn cmp(&self) -> Option<&str> {
        match self {
            Self::NoCmpDetected => None,
            Self::PopupNotFound { cmp }
            | Self::NoActionConfigured { cmp }
            | Self::ActionUnconfirmed { cmp }
            | Self::ActionFailed { cmp }
            | Self::DoneNotReported { cmp }
            | Self::Completed { cmp, .. } => Some(cmp),
        }
    }
}

/// Everything the collector reports for one visit.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisitReport {
    /// Terminal state of the handshake.
    pub outcome: ConsentOutcome,
    /// One entry per detected CMP (or one signals-only entry).
    pub cmps: Vec<CmpResult>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn cmp_result_flattens_scan_fields() {
        let result = CmpResult {
            name: "Onetrust".into(),
            is_final: true,
            scan: ScanResult {
                patterns: vec!["accept all".into()],
                has_sections: vec![HasSection { api: "usnat".into(), has_section: Some(true) }],
                ..ScanResult::default()
            },
            ..CmpResult::default()
        };
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["name"], "Onetrust");
        assert_eq!(value["final"], true);
        assert_eq!(value["selfTestFail"], false);
        assert_eq!(value["patterns"], json!(["accept all"]));
        assert_eq!(value["uspObjects"], json!([]));
        assert_eq!(value["hasSections"], json!([{"api": "usnat", "hasSection": true}]));
        assert!(value.get("scan").is_none());
    }

    #[test]
    fn scan_result_emptiness() {
        assert!(ScanResult::default().is_empty());
        let with_usp = ScanResult { usp_objects: vec![json!({"uspString": "1YNN"})], ..ScanResult::default() };
        assert!(!with_usp.is_empty());
    }

    #[test]
    fn signals_only_entry_has_empty_identity() {
        let entry = CmpResult::signals_only(ScanResult {
            snippets: vec!["x".into()],
            ..ScanResult::default()
        });
        assert_eq!(entry.name, "");
        assert!(!entry.is_final && !entry.open && !entry.started && !entry.succeeded);
        assert!(entry.errors.is_empty());
    }

    #[test]
    fn outcome_states_are_ordered() {
        assert!(ConsentOutcome::NoCmpDetected.state() < ConsentState::Detected);
        let done = ConsentOutcome::Completed { cmp: "x".into(), self_test: SelfTestStatus::Passed };
        assert_eq!(done.state(), ConsentState::SelfTested);
        assert_eq!(done.cmp(), Some("x"));
        assert_eq!(
            ConsentOutcome::ActionFailed { cmp: "x".into() }.state(),
            ConsentOutcome::ActionUnconfirmed { cmp: "x".into() }.state()
        );
    }

    #[test]
    fn outcome_wire_shape() {
        let value = serde_json::to_value(ConsentOutcome::Completed {
            cmp: "Didomi".into(),
            self_test: SelfTestStatus::NotScheduled,
        })
        .unwrap();
        assert_eq!(
            value,
            json!({"outcome": "completed", "cmp": "Didomi", "selfTest": "notScheduled"})
        );
        assert_eq!(
            serde_json::to_value(ConsentOutcome::NoCmpDetected).unwrap(),
            json!({"outcome": "noCmpDetected"})
        );
    }
}
