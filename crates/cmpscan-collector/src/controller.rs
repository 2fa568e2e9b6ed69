//! Consent protocol controller.
//!
//! Drives the handshake `detected → popup → action → done → self-test` by
//! polling the message log. Each step is a bounded wait; an exhausted
//! budget is a terminal outcome, not an error. Waits only read the log,
//! so running them again yields the same outcome.

use std::sync::Arc;

use cmpscan_core::{
    AgentMessage, AutoAction, ConsentOutcome, MessageKind, MessageLog, MessageQuery, PollBudget,
    SelfTestStatus, poll_until,
};

/// Polls the message log towards a terminal [`ConsentOutcome`].
pub struct ConsentController {
    log: Arc<MessageLog>,
    auto_action: Option<AutoAction>,
    budget: PollBudget,
}

impl ConsentController {
    /// Create a controller; `budget` applies to every individual wait.
    pub fn new(log: Arc<MessageLog>, auto_action: Option<AutoAction>, budget: PollBudget) -> Self {
        Self {
            log,
            auto_action,
            budget,
        }
    }

    /// Wait for the first message matching `query`.
    pub async fn wait_for_message(&self, query: &MessageQuery) -> Option<AgentMessage> {
        poll_until(self.budget, || self.log.find(query)).await
    }

    /// Run the handshake to its terminal state.
    pub async fn wait_for_finish(&self) -> ConsentOutcome {
        let Some(detected) = self
            .wait_for_message(&MessageQuery::kind(MessageKind::CmpDetected))
            .await
        else {
            tracing::debug!("no CMP detected");
            return ConsentOutcome::NoCmpDetected;
        };
        let cmp = detected.cmp().unwrap_or_default().to_string();
        tracing::info!(cmp = %cmp, "CMP detected");

        if self
            .wait_for_message(&MessageQuery::kind(MessageKind::PopupFound))
            .await
            .is_none()
        {
            return ConsentOutcome::PopupNotFound { cmp };
        }

        let Some(action) = self.auto_action else {
            return ConsentOutcome::NoActionConfigured { cmp };
        };

        let result_query = MessageQuery::kind(action.result_kind()).with_cmp(cmp.as_str());
        let Some(action_result) = self.wait_for_message(&result_query).await else {
            tracing::info!(cmp = %cmp, action = action.as_str(), "action result never arrived");
            return ConsentOutcome::ActionUnconfirmed { cmp };
        };
        if action_result.result() != Some(true) {
            tracing::info!(cmp = %cmp, action = action.as_str(), "action failed");
            return ConsentOutcome::ActionFailed { cmp };
        }

        // The completing rule may carry a different name than the detected one.
        let Some(done) = self
            .wait_for_message(&MessageQuery::kind(MessageKind::AutoconsentDone))
            .await
        else {
            return ConsentOutcome::DoneNotReported { cmp };
        };
        let final_cmp = done.cmp().unwrap_or(&cmp).to_string();

        let self_test = if self_test_scheduled(&action_result) {
            match self
                .wait_for_message(&MessageQuery::kind(MessageKind::SelfTestResult))
                .await
                .and_then(|msg| msg.result())
            {
                Some(true) => SelfTestStatus::Passed,
                Some(false) => SelfTestStatus::Failed,
                None => SelfTestStatus::Unreported,
            }
        } else {
            SelfTestStatus::NotScheduled
        };

        tracing::info!(cmp = %final_cmp, ?self_test, "consent handshake completed");
        ConsentOutcome::Completed {
            cmp: final_cmp,
            self_test,
        }
    }
}

fn self_test_scheduled(action_result: &AgentMessage) -> bool {
    matches!(
        action_result,
        AgentMessage::OptInResult {
            schedule_self_test: true,
            ..
        } | AgentMessage::OptOutResult {
            schedule_self_test: true,
            ..
        }
    )
}
