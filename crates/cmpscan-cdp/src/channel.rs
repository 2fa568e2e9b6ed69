//! The control-channel interface the collector drives.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::broadcast;

use crate::error::ChannelError;
use crate::events::ChannelEvent;

/// Identifier of a JavaScript execution context (one per frame per world).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContextId(pub i64);

impl std::fmt::Display for ContextId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A `Runtime.evaluate` request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EvaluateRequest {
    /// Expression source.
    pub expression: String,
    /// Target context; the main frame's default context when `None`.
    pub context_id: Option<ContextId>,
    /// Return the result as JSON instead of a remote object handle.
    pub return_by_value: bool,
    /// Resolve a returned promise before answering.
    pub await_promise: bool,
    /// Evaluate even if the page's CSP blocks `eval`.
    pub allow_unsafe_eval: bool,
}

impl EvaluateRequest {
    /// Evaluate `expression` in the main frame's default context.
    pub fn new(expression: impl Into<String>) -> Self {
        Self {
            expression: expression.into(),
            context_id: None,
            return_by_value: false,
            await_promise: false,
            allow_unsafe_eval: false,
        }
    }

    /// Target a specific execution context.
    #[must_use]
    pub fn in_context(mut self, context_id: ContextId) -> Self {
        self.context_id = Some(context_id);
        self
    }

    /// Return the value as JSON.
    #[must_use]
    pub fn by_value(mut self) -> Self {
        self.return_by_value = true;
        self
    }

    /// Await a returned promise.
    #[must_use]
    pub fn awaiting(mut self) -> Self {
        self.await_promise = true;
        self
    }

    /// Allow evaluation on pages whose CSP blocks `eval`.
    #[must_use]
    pub fn allow_unsafe_eval(mut self) -> Self {
        self.allow_unsafe_eval = true;
        self
    }

    /// CDP `Runtime.evaluate` parameters.
    pub fn to_params(&self) -> Value {
        let mut params = json!({ "expression": self.expression });
        if let Some(id) = self.context_id {
            params["contextId"] = json!(id.0);
        }
        if self.return_by_value {
            params["returnByValue"] = json!(true);
        }
        if self.await_promise {
            params["awaitPromise"] = json!(true);
        }
        if self.allow_unsafe_eval {
            params["allowUnsafeEvalBlockedByCSP"] = json!(true);
        }
        params
    }
}

/// Outcome of an evaluation that reached the page.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Evaluation {
    /// Returned value (`Null` when not returned by value or undefined).
    pub value: Value,
    /// Exception text when the script threw.
    pub exception: Option<String>,
}

impl Evaluation {
    /// A successful evaluation returning `value`.
    pub fn value(value: Value) -> Self {
        Self {
            value,
            exception: None,
        }
    }

    /// An evaluation that threw.
    pub fn thrown(message: impl Into<String>) -> Self {
        Self {
            value: Value::Null,
            exception: Some(message.into()),
        }
    }

    /// Parse a `Runtime.evaluate` result.
    pub fn from_cdp(result: &Value) -> Self {
        if let Some(exception) = result.get("exceptionDetails") {
            let msg = exception["exception"]["description"]
                .as_str()
                .or_else(|| exception["text"].as_str())
                .unwrap_or("evaluation error");
            return Self::thrown(msg);
        }
        Self::value(result["result"]["value"].clone())
    }

    /// Whether the script threw.
    pub fn is_exception(&self) -> bool {
        self.exception.is_some()
    }

    /// JavaScript truthiness of the value; `false` when the script threw.
    pub fn truthy(&self) -> bool {
        if self.is_exception() {
            return false;
        }
        match &self.value {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
            Value::String(s) => !s.is_empty(),
            Value::Array(_) | Value::Object(_) => true,
        }
    }
}

/// Operations consumed from the browser automation layer.
///
/// Every method must tolerate the frame or session disappearing mid-flight
/// by returning an error whose [`ChannelError::is_ignorable`] is true.
#[async_trait]
pub trait ControlChannel: Send + Sync {
    /// Enable page and runtime events.
    async fn enable(&self) -> Result<(), ChannelError>;

    /// Expose a one-argument binding to every context of `world_name`.
    async fn add_binding(&self, name: &str, world_name: &str) -> Result<(), ChannelError>;

    /// Create a sandboxed world bound to `frame_id`.
    async fn create_isolated_world(
        &self,
        frame_id: &str,
        world_name: &str,
    ) -> Result<ContextId, ChannelError>;

    /// Evaluate an expression.
    async fn evaluate(&self, request: EvaluateRequest) -> Result<Evaluation, ChannelError>;

    /// Ids of every live frame of the page, main frame first.
    async fn frame_ids(&self) -> Result<Vec<String>, ChannelError>;

    /// Subscribe to context lifecycle and binding events.
    fn subscribe(&self) -> broadcast::Receiver<ChannelEvent>;
}
