//! Result aggregation: message log + scan result → per-CMP report.

use cmpscan_core::{
    AgentMessage, AutoAction, CmpResult, MessageKind, MessageLog, MessageQuery, ScanResult,
};
use indexmap::IndexSet;

/// Build one [`CmpResult`] per distinct detected CMP, in detection order.
///
/// Scan fields are left empty; see [`merge_scan`].
pub fn collect_results(log: &MessageLog, auto_action: Option<AutoAction>) -> Vec<CmpResult> {
    let done = log.find(&MessageQuery::kind(MessageKind::AutoconsentDone));
    let self_test_fail = log
        .find(&MessageQuery::kind(MessageKind::SelfTestResult))
        .is_some_and(|msg| msg.result() == Some(false));
    let errors: Vec<String> = log
        .find_all(&MessageQuery::kind(MessageKind::AutoconsentError))
        .iter()
        .filter_map(AgentMessage::error_text)
        .collect();

    let detected: IndexSet<String> = log
        .find_all(&MessageQuery::kind(MessageKind::CmpDetected))
        .iter()
        .filter_map(|msg| msg.cmp().map(String::from))
        .collect();

    detected
        .into_iter()
        .map(|name| {
            let mut result = CmpResult {
                is_final: done.as_ref().and_then(AgentMessage::cmp) == Some(name.as_str()),
                self_test_fail,
                errors: errors.clone(),
                ..CmpResult::default()
            };

            let popup = MessageQuery::kind(MessageKind::PopupFound).with_cmp(name.as_str());
            if log.contains(&popup) {
                result.open = true;
                if let Some(action) = auto_action {
                    result.started = true;
                    let outcome = MessageQuery::kind(action.result_kind()).with_cmp(name.as_str());
                    result.succeeded = log
                        .find(&outcome)
                        .and_then(|msg| msg.result())
                        .unwrap_or(false);
                }
            }
            result.name = name;
            result
        })
        .collect()
}

/// Attach the shared scan data to every result.
///
/// With no detected CMP, a non-empty scan becomes a single entry with an
/// empty name so signals are never dropped.
pub fn merge_scan(mut results: Vec<CmpResult>, scan: &ScanResult) -> Vec<CmpResult> {
    if scan.is_empty() {
        return results;
    }
    if results.is_empty() {
        results.push(CmpResult::signals_only(scan.clone()));
    } else {
        for result in &mut results {
            result.scan = scan.clone();
        }
    }
    results
}
