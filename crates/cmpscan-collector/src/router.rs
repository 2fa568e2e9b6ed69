//! Message router: log every agent message, then apply protocol reactions.
//!
//! Reactions talk back to the agent by evaluating
//! `autoconsentReceiveMessage(...)` in the sending context. A failing
//! reaction is logged and dropped; it never aborts the visit.

use std::sync::Arc;

use cmpscan_cdp::{ChannelError, ContextId, ControlChannel, EvaluateRequest, Evaluation};
use cmpscan_core::{AgentConfig, AgentMessage, AutoAction, HostMessage, MessageLog};
use parking_lot::Mutex;
use tokio::sync::watch;

use crate::error::log_channel_error;
use crate::worlds::WorldManager;

/// Dispatches agent messages.
pub struct MessageRouter {
    channel: Arc<dyn ControlChannel>,
    worlds: Arc<WorldManager>,
    log: Arc<MessageLog>,
    config: AgentConfig,
    auto_action: Option<AutoAction>,
    scan_done: watch::Receiver<bool>,
    self_test_target: Mutex<Option<ContextId>>,
}

impl MessageRouter {
    /// Create a router.
    ///
    /// `scan_done` gates action commands: an `optIn`/`optOut` is only sent
    /// once it reads `true`.
    pub fn new(
        channel: Arc<dyn ControlChannel>,
        worlds: Arc<WorldManager>,
        log: Arc<MessageLog>,
        config: AgentConfig,
        auto_action: Option<AutoAction>,
        scan_done: watch::Receiver<bool>,
    ) -> Self {
        Self {
            channel,
            worlds,
            log,
            config,
            auto_action,
            scan_done,
            self_test_target: Mutex::new(None),
        }
    }

    /// Decode a binding payload, append it to the log and apply its state
    /// changes.
    ///
    /// Runs synchronously in receipt order, so a self-test target is always
    /// recorded before a later `autoconsentDone` is reacted to. Malformed
    /// payloads are logged and dropped.
    pub fn record(&self, payload: &str, context_id: ContextId) -> Option<AgentMessage> {
        match AgentMessage::decode(payload) {
            Ok(msg) => {
                tracing::debug!(kind = %msg.kind(), cmp = msg.cmp(), "agent message");
                if let AgentMessage::OptInResult {
                    schedule_self_test: true,
                    ..
                }
                | AgentMessage::OptOutResult {
                    schedule_self_test: true,
                    ..
                } = msg
                {
                    *self.self_test_target.lock() = Some(context_id);
                }
                self.log.append(msg.clone());
                Some(msg)
            }
            Err(e) => {
                tracing::warn!(error = %e, payload, "dropping malformed agent message");
                None
            }
        }
    }

    /// Record `payload` and react to it.
    pub async fn on_message(&self, payload: &str, context_id: ContextId) {
        if let Some(msg) = self.record(payload, context_id) {
            self.react(&msg, context_id).await;
        }
    }

    /// Apply the protocol reaction for an already-recorded message.
    pub async fn react(&self, msg: &AgentMessage, context_id: ContextId) {
        if let Err(e) = self.dispatch(msg, context_id).await {
            log_channel_error(&e, msg.kind().as_str());
        }
    }

    /// Whether `msg` has a reaction that talks to the browser.
    pub fn reacts_to(msg: &AgentMessage) -> bool {
        matches!(
            msg,
            AgentMessage::Init { .. }
                | AgentMessage::PopupFound { .. }
                | AgentMessage::AutoconsentDone { .. }
                | AgentMessage::Eval { .. }
                | AgentMessage::AutoconsentError { .. }
        )
    }

    /// Context that asked for a self-test, if any.
    pub fn self_test_target(&self) -> Option<ContextId> {
        *self.self_test_target.lock()
    }

    async fn dispatch(&self, msg: &AgentMessage, context_id: ContextId) -> Result<(), ChannelError> {
        match msg {
            AgentMessage::Init { .. } => {
                let reply = HostMessage::InitResp {
                    config: self.config.clone(),
                };
                self.send(context_id, &reply).await
            }
            AgentMessage::PopupFound { cmp, .. } => {
                let Some(action) = self.auto_action else {
                    return Ok(());
                };
                let mut scan_done = self.scan_done.clone();
                if scan_done.wait_for(|done| *done).await.is_err() {
                    tracing::debug!(cmp = %cmp, "collector gone before scan finished");
                    return Ok(());
                }
                tracing::info!(cmp = %cmp, action = action.as_str(), "requesting consent action");
                self.send(context_id, &action.command()).await
            }
            AgentMessage::AutoconsentDone { cmp, .. } => {
                let Some(target) = self.self_test_target() else {
                    return Ok(());
                };
                tracing::debug!(cmp = %cmp, context = %target, "requesting self-test");
                self.send(target, &HostMessage::SelfTest).await
            }
            AgentMessage::Eval { id, code } => {
                let result = self.eval_in_page(context_id, code).await;
                let reply = HostMessage::EvalResp {
                    id: id.clone(),
                    result,
                };
                self.send(context_id, &reply).await
            }
            AgentMessage::AutoconsentError { .. } => {
                tracing::warn!(
                    details = %msg.error_text().unwrap_or_default(),
                    "autoconsent error"
                );
                Ok(())
            }
            AgentMessage::CmpDetected { .. }
            | AgentMessage::OptInResult { .. }
            | AgentMessage::OptOutResult { .. }
            | AgentMessage::SelfTestResult { .. }
            | AgentMessage::Other => Ok(()),
        }
    }

    /// Run agent-supplied code in the page world behind `isolated`.
    ///
    /// Exceptions, unresolved contexts and channel failures all read as `false`.
    async fn eval_in_page(&self, isolated: ContextId, code: &str) -> bool {
        let Some(page) = self.worlds.page_context_for(isolated) else {
            tracing::debug!(context = %isolated, "no page world for eval request");
            return false;
        };
        let request = EvaluateRequest::new(code)
            .in_context(page)
            .by_value()
            .allow_unsafe_eval();
        match self.channel.evaluate(request).await {
            Ok(eval) => eval.truthy(),
            Err(e) => {
                log_channel_error(&e, "eval");
                false
            }
        }
    }

    async fn send(&self, context_id: ContextId, msg: &HostMessage) -> Result<(), ChannelError> {
        let request = EvaluateRequest::new(msg.to_expression())
            .in_context(context_id)
            .allow_unsafe_eval();
        let eval: Evaluation = self.channel.evaluate(request).await?;
        if let Some(exception) = eval.exception {
            tracing::warn!(context = %context_id, exception = %exception, "agent rejected host message");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentProgram;
    use crate::testutil::{FakeChannel, page_context};
    use serde_json::json;

    struct Harness {
        channel: Arc<FakeChannel>,
        worlds: Arc<WorldManager>,
        log: Arc<MessageLog>,
        router: Arc<MessageRouter>,
        scan_tx: watch::Sender<bool>,
    }

    fn harness(channel: FakeChannel, auto_action: Option<AutoAction>) -> Harness {
        let channel = Arc::new(channel);
        let worlds = Arc::new(WorldManager::new(
            channel.clone(),
            Arc::new(AgentProgram::new("")),
        ));
        let log = Arc::new(MessageLog::new());
        let (scan_tx, scan_rx) = watch::channel(false);
        let router = Arc::new(MessageRouter::new(
            channel.clone(),
            worlds.clone(),
            log.clone(),
            AgentConfig::default(),
            auto_action,
            scan_rx,
        ));
        Harness {
            channel,
            worlds,
            log,
            router,
            scan_tx,
        }
    }

    #[tokio::test]
    async fn init_gets_config_reply() {
        let h = harness(FakeChannel::new(), None);
        h.router.on_message(r#"{"type":"init","url":"https://a.test/"}"#, ContextId(11)).await;

        assert_eq!(h.log.len(), 1);
        let sent = h.channel.requests_containing("initResp");
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].context_id, Some(ContextId(11)));
        assert!(sent[0].expression.contains(r#""detectRetries":20"#));
        assert!(sent[0].expression.contains(r#""autoAction":null"#));
    }

    #[tokio::test]
    async fn malformed_payload_is_dropped() {
        let h = harness(FakeChannel::new(), None);
        h.router.on_message("{not json", ContextId(1)).await;
        h.router.on_message(r#"{"type":"popupFound"}"#, ContextId(1)).await;
        assert!(h.log.is_empty());
        assert!(h.channel.expressions().is_empty());
    }

    #[tokio::test]
    async fn popup_without_action_sends_nothing() {
        let h = harness(FakeChannel::new(), None);
        h.router.on_message(r#"{"type":"popupFound","cmp":"Onetrust"}"#, ContextId(1)).await;
        assert!(h.channel.expressions().is_empty());
    }

    #[tokio::test]
    async fn popup_action_waits_for_scan() {
        let h = harness(FakeChannel::new(), Some(AutoAction::OptOut));
        let router = h.router.clone();
        let pending = tokio::spawn(async move {
            router
                .on_message(r#"{"type":"popupFound","cmp":"Onetrust"}"#, ContextId(4))
                .await;
        });
        tokio::task::yield_now().await;
        assert!(h.channel.requests_containing("optOut").is_empty());

        let _ = h.scan_tx.send_replace(true);
        pending.await.unwrap();
        let sent = h.channel.requests_containing(r#"{"type":"optOut"}"#);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].context_id, Some(ContextId(4)));
    }

    #[tokio::test]
    async fn self_test_only_when_scheduled() {
        let h = harness(FakeChannel::new(), Some(AutoAction::OptOut));
        h.router
            .on_message(r#"{"type":"optOutResult","cmp":"x","result":true}"#, ContextId(5))
            .await;
        h.router.on_message(r#"{"type":"autoconsentDone","cmp":"x"}"#, ContextId(5)).await;
        assert!(h.channel.requests_containing("selfTest").is_empty());

        h.router
            .on_message(
                r#"{"type":"optOutResult","cmp":"x","result":true,"scheduleSelfTest":true}"#,
                ContextId(6),
            )
            .await;
        assert_eq!(h.router.self_test_target(), Some(ContextId(6)));
        h.router.on_message(r#"{"type":"autoconsentDone","cmp":"x"}"#, ContextId(9)).await;
        let sent = h.channel.requests_containing(r#"{"type":"selfTest"}"#);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].context_id, Some(ContextId(6)));
    }

    #[tokio::test]
    async fn self_test_target_is_set_when_recorded() {
        let h = harness(FakeChannel::new(), Some(AutoAction::OptIn));
        let result = h
            .router
            .record(
                r#"{"type":"optInResult","cmp":"x","result":true,"scheduleSelfTest":true}"#,
                ContextId(8),
            )
            .unwrap();
        assert_eq!(h.router.self_test_target(), Some(ContextId(8)));
        assert!(!MessageRouter::reacts_to(&result));

        let done = h
            .router
            .record(r#"{"type":"autoconsentDone","cmp":"x"}"#, ContextId(8))
            .unwrap();
        assert!(MessageRouter::reacts_to(&done));
        h.router.react(&done, ContextId(8)).await;
        assert_eq!(h.channel.requests_containing(r#"{"type":"selfTest"}"#).len(), 1);
    }

    #[tokio::test]
    async fn eval_runs_in_page_world_and_replies() {
        let h = harness(
            FakeChannel::new().with_responder(|req| {
                if req.expression == "document.cookie.length" {
                    Ok(Evaluation::value(json!(12)))
                } else {
                    Ok(Evaluation::default())
                }
            }),
            None,
        );
        let isolated = h.worlds.on_context_created(&page_context(3, "main")).await.unwrap();
        h.router
            .on_message(r#"{"type":"eval","id":"e1","code":"document.cookie.length"}"#, isolated)
            .await;

        let eval = h.channel.requests_containing("document.cookie.length");
        assert_eq!(eval.len(), 1);
        assert_eq!(eval[0].context_id, Some(ContextId(3)));
        assert!(eval[0].return_by_value && eval[0].allow_unsafe_eval);

        let reply = h.channel.requests_containing("evalResp");
        assert_eq!(reply[0].context_id, Some(isolated));
        assert!(reply[0].expression.contains(r#""id":"e1","result":true"#));
    }

    #[tokio::test]
    async fn eval_exception_replies_false() {
        let h = harness(
            FakeChannel::new().with_responder(|req| {
                if req.expression.starts_with("throw") {
                    Ok(Evaluation::thrown("Error: nope"))
                } else {
                    Ok(Evaluation::default())
                }
            }),
            None,
        );
        let isolated = h.worlds.on_context_created(&page_context(3, "main")).await.unwrap();
        h.router
            .on_message(r#"{"type":"eval","id":"e2","code":"throw new Error('nope')"}"#, isolated)
            .await;
        let reply = h.channel.requests_containing("evalResp");
        assert!(reply[0].expression.contains(r#""result":false"#));
    }

    #[tokio::test]
    async fn eval_without_mapping_replies_false() {
        let h = harness(FakeChannel::new(), None);
        h.router
            .on_message(r#"{"type":"eval","id":"e3","code":"true"}"#, ContextId(99))
            .await;
        assert_eq!(h.channel.expressions().len(), 1);
        assert!(h.channel.expressions()[0].contains(r#""id":"e3","result":false"#));
    }

    #[tokio::test]
    async fn reaction_failure_is_swallowed() {
        let h = harness(
            FakeChannel::new()
                .with_responder(|_| Err(ChannelError::Cdp("Cannot find context with specified id".into()))),
            None,
        );
        h.router.on_message(r#"{"type":"init"}"#, ContextId(1)).await;
        h.router
            .on_message(r#"{"type":"autoconsentError","details":"boom"}"#, ContextId(1))
            .await;
        assert_eq!(h.log.len(), 2);
    }
}
