//! Typed control-channel events.

use serde::Deserialize;
use serde_json::Value;

use crate::channel::ContextId;

/// Frame metadata attached to an execution context.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuxData {
    /// Owning frame.
    pub frame_id: Option<String>,
    /// Whether this is the frame's default (page) world.
    pub is_default: bool,
    /// `default`, `isolated` or `worker`.
    #[serde(rename = "type")]
    pub kind: Option<String>,
}

/// A newly created execution context.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionContextDescription {
    /// Context id.
    pub id: ContextId,
    /// Security origin (empty or `://` for synthetic contexts).
    #[serde(default)]
    pub origin: String,
    /// Human-readable name (the world name for isolated worlds).
    #[serde(default)]
    pub name: String,
    /// Frame metadata.
    #[serde(default)]
    pub aux_data: AuxData,
}

/// Event delivered by a [`ControlChannel`](crate::ControlChannel).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChannelEvent {
    /// `Runtime.executionContextCreated`
    ContextCreated(ExecutionContextDescription),
    /// `Runtime.executionContextDestroyed`
    ContextDestroyed {
        /// Destroyed context.
        context_id: ContextId,
    },
    /// `Runtime.executionContextsCleared`
    ContextsCleared,
    /// `Runtime.bindingCalled`
    BindingCalled {
        /// Binding name.
        name: String,
        /// String argument passed by the page.
        payload: String,
        /// Context that called the binding.
        context_id: ContextId,
    },
    /// `Page.loadEventFired`
    PageLoaded,
    /// The target detached or the connection closed.
    Detached,
}

#[derive(Deserialize)]
struct ContextCreatedParams {
    context: ExecutionContextDescription,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ContextDestroyedParams {
    execution_context_id: ContextId,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BindingCalledParams {
    name: String,
    payload: String,
    execution_context_id: ContextId,
}

impl ChannelEvent {
    /// Map a raw CDP event onto a typed event; `None` for events we do not consume.
    pub fn from_cdp(method: &str, params: &Value) -> Option<Self> {
        match method {
            "Runtime.executionContextCreated" => {
                let p: ContextCreatedParams = parse(method, params)?;
                Some(Self::ContextCreated(p.context))
            }
            "Runtime.executionContextDestroyed" => {
                let p: ContextDestroyedParams = parse(method, params)?;
                Some(Self::ContextDestroyed {
                    context_id: p.execution_context_id,
                })
            }
            "Runtime.executionContextsCleared" => Some(Self::ContextsCleared),
            "Runtime.bindingCalled" => {
                let p: BindingCalledParams = parse(method, params)?;
                Some(Self::BindingCalled {
                    name: p.name,
                    payload: p.payload,
                    context_id: p.execution_context_id,
                })
            }
            "Page.loadEventFired" => Some(Self::PageLoaded),
            "Inspector.detached" | "Target.detachedFromTarget" => Some(Self::Detached),
            _ => None,
        }
    }
}

fn parse<T: for<'de> Deserialize<'de>>(method: &str, params: &Value) -> Option<T> {
    match serde_json::from_value(params.clone()) {
        Ok(p) => Some(p),
        Err(e) => {
            tracing::debug!(method, error = %e, "dropping malformed CDP event");
            None
        }
    }
}
