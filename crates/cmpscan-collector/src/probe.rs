//! Privacy-signal probe: USP (`__uspapi`) and GPP (`__gpp`) queries.
//!
//! Every query runs in the main frame's page world, races an in-page timer
//! and resolves to `None` when the API is absent, answers unsuccessfully,
//! throws, or never calls back.

use std::time::Duration;

use cmpscan_cdp::{ControlChannel, EvaluateRequest};
use cmpscan_core::HasSection;
use serde_json::Value;

use crate::error::log_channel_error;

/// Raw results of the privacy API queries.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ProbeResult {
    /// `getUSPData` responses.
    pub usp_objects: Vec<Value>,
    /// GPP `ping` responses.
    pub gpp_objects: Vec<Value>,
    /// One entry per supported GPP API.
    pub has_sections: Vec<HasSection>,
}

/// Issues the privacy-signal queries through a control channel.
pub struct SignalProbe<'a> {
    channel: &'a dyn ControlChannel,
    timeout: Duration,
}

impl<'a> SignalProbe<'a> {
    /// Probe through `channel`, bounding each query by `timeout` in the page.
    pub fn new(channel: &'a dyn ControlChannel, timeout: Duration) -> Self {
        Self { channel, timeout }
    }

    /// Run every query once.
    pub async fn run(&self) -> ProbeResult {
        let mut result = ProbeResult::default();

        if let Some(usp) = self.usp_data().await.filter(is_truthy) {
            tracing::debug!(usp = %usp, "USP data retrieved");
            result.usp_objects.push(usp);
        }

        let Some(ping) = self.gpp_ping().await.filter(is_truthy) else {
            return result;
        };
        tracing::debug!(gpp = %ping, "GPP ping retrieved");
        for api in supported_api_ids(&ping) {
            let has_section = self.gpp_has_section(&api).await;
            result.has_sections.push(HasSection { api, has_section });
        }
        result.gpp_objects.push(ping);
        result
    }

    /// `__uspapi('getUSPData', 1, cb)`.
    pub async fn usp_data(&self) -> Option<Value> {
        self.query("__uspapi", &[Value::from("getUSPData"), Value::from(1)], &[])
            .await
    }

    /// `__gpp('ping', cb)`.
    pub async fn gpp_ping(&self) -> Option<Value> {
        self.query("__gpp", &[Value::from("ping")], &[]).await
    }

    /// `__gpp('hasSection', cb, api)`.
    pub async fn gpp_has_section(&self, api: &str) -> Option<bool> {
        self.query("__gpp", &[Value::from("hasSection")], &[Value::from(api)])
            .await
            .and_then(|v| v.as_bool())
    }

    async fn query(&self, function: &str, before: &[Value], after: &[Value]) -> Option<Value> {
        let expression = callback_query(function, before, after, self.timeout);
        let request = EvaluateRequest::new(expression).by_value().awaiting();
        match self.channel.evaluate(request).await {
            Ok(eval) if eval.is_exception() => {
                tracing::warn!(function, error = ?eval.exception, "privacy API query threw");
                None
            }
            Ok(eval) => Some(eval.value).filter(|v| !v.is_null()),
            Err(e) => {
                log_channel_error(&e, function);
                None
            }
        }
    }
}

/// Identifiers after the colon in a ping's `supportedAPIs` (`"5:tcfcav1"` → `"tcfcav1"`).
pub fn supported_api_ids(ping: &Value) -> Vec<String> {
    ping["supportedAPIs"]
        .as_array()
        .map(|apis| {
            apis.iter()
                .filter_map(Value::as_str)
                .filter_map(|entry| entry.split(':').nth(1))
                .filter(|id| !id.is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}

/// Promise calling `window[function](...before, callback, ...after)`.
///
/// Resolves to the callback's data on success and `null` otherwise.
fn callback_query(function: &str, before: &[Value], after: &[Value], timeout: Duration) -> String {
    let args = before
        .iter()
        .map(Value::to_string)
        .chain(std::iter::once("callback".to_string()))
        .chain(after.iter().map(Value::to_string))
        .collect::<Vec<_>>()
        .join(", ");
    let timeout_ms = timeout.as_millis();
    format!(
        "new Promise(resolve => {{
            if (typeof window.{function} !== 'function') {{
                resolve(null);
                return;
            }}
            const timer = setTimeout(() => resolve(null), {timeout_ms});
            const callback = (data, success) => {{
                clearTimeout(timer);
                resolve(success ? data : null);
            }};
            try {{
                window.{function}({args});
            }} catch (e) {{
                clearTimeout(timer);
                resolve(null);
            }}
        }})"
    )
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::String(s) => !s.is_empty(),
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::Array(_) | Value::Object(_) => true,
    }
}
