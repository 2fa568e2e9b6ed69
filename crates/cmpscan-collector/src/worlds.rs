//! Isolated-world manager.
//!
//! Every real page context gets a sandboxed sibling in the same frame with
//! the agent injected into it. The manager remembers which page context
//! each sandbox belongs to, since `eval` requests must run in the page's
//! own world.

use std::sync::Arc;

use cmpscan_cdp::{ContextId, ControlChannel, EvaluateRequest, ExecutionContextDescription};
use dashmap::DashMap;

use crate::agent::{AgentProgram, WORLD_NAME};
use crate::error::log_channel_error;

/// Provisions agent worlds and owns the isolated → page context mapping.
pub struct WorldManager {
    channel: Arc<dyn ControlChannel>,
    agent: Arc<AgentProgram>,
    isolated_to_page: DashMap<ContextId, ContextId>,
}

impl WorldManager {
    /// Create a manager injecting `agent` through `channel`.
    pub fn new(channel: Arc<dyn ControlChannel>, agent: Arc<AgentProgram>) -> Self {
        Self {
            channel,
            agent,
            isolated_to_page: DashMap::new(),
        }
    }

    /// Contexts created by the automation tooling rather than the page.
    pub fn is_synthetic(context: &ExecutionContextDescription) -> bool {
        context.origin.is_empty()
            || context.origin == "://"
            || context.aux_data.kind.as_deref() == Some("isolated")
    }

    /// Provision an agent world for a newly created page context.
    ///
    /// Returns the isolated context id when the agent was injected.
    /// Failures are logged and leave the frame undetected for this visit.
    pub async fn on_context_created(
        &self,
        context: &ExecutionContextDescription,
    ) -> Option<ContextId> {
        if Self::is_synthetic(context) {
            return None;
        }
        let Some(frame_id) = context.aux_data.frame_id.as_deref() else {
            tracing::debug!(context = %context.id, "page context without frame, skipping");
            return None;
        };

        let isolated = match self.channel.create_isolated_world(frame_id, WORLD_NAME).await {
            Ok(id) => id,
            Err(e) => {
                log_channel_error(&e, "createIsolatedWorld");
                return None;
            }
        };
        let _ = self.isolated_to_page.insert(isolated, context.id);

        let inject = EvaluateRequest::new(self.agent.source()).in_context(isolated);
        match self.channel.evaluate(inject).await {
            Ok(eval) if eval.is_exception() => {
                tracing::warn!(
                    frame_id,
                    error = eval.exception.as_deref().unwrap_or_default(),
                    "agent script threw during injection"
                );
                None
            }
            Ok(_) => {
                tracing::debug!(frame_id, page = %context.id, isolated = %isolated, "agent injected");
                Some(isolated)
            }
            Err(e) => {
                log_channel_error(&e, "inject agent");
                None
            }
        }
    }

    /// Forget a torn-down context, whether it was a sandbox or a page world.
    pub fn on_context_destroyed(&self, context_id: ContextId) {
        let _ = self.isolated_to_page.remove(&context_id);
        self.isolated_to_page.retain(|_, page| *page != context_id);
    }

    /// Forget every context (the page navigated).
    pub fn on_contexts_cleared(&self) {
        self.isolated_to_page.clear();
    }

    /// Page-world context for an agent sandbox.
    pub fn page_context_for(&self, isolated: ContextId) -> Option<ContextId> {
        self.isolated_to_page.get(&isolated).map(|entry| *entry.value())
    }

    /// Number of live mappings.
    pub fn len(&self) -> usize {
        self.isolated_to_page.len()
    }

    /// Whether no agent world is mapped.
    pub fn is_empty(&self) -> bool {
        self.isolated_to_page.is_empty()
    }
}
