//! Scripted page for end-to-end visit tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use cmpscan_cdp::{
    AuxData, ChannelError, ChannelEvent, ContextId, ControlChannel, EvaluateRequest, Evaluation,
    ExecutionContextDescription,
};
use cmpscan_collector::{AgentProgram, BINDING_NAME, CmpCollector};
use cmpscan_settings::CollectorSettings;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::broadcast;

pub const AGENT_MARKER: &str = "/* test agent */";

/// A page with frames, per-frame text and optional privacy APIs.
pub struct ScriptedPage {
    events: broadcast::Sender<ChannelEvent>,
    next_context: AtomicI64,
    frames: Vec<String>,
    frame_text: HashMap<String, String>,
    broken_frames: HashMap<String, String>,
    world_frames: Mutex<HashMap<ContextId, String>>,
    usp: Option<Value>,
    gpp_ping: Option<Value>,
    has_section: HashMap<String, bool>,
    pub requests: Mutex<Vec<EvaluateRequest>>,
}

impl ScriptedPage {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            events,
            next_context: AtomicI64::new(1000),
            frames: vec!["main".into()],
            frame_text: HashMap::new(),
            broken_frames: HashMap::new(),
            world_frames: Mutex::new(HashMap::new()),
            usp: None,
            gpp_ping: None,
            has_section: HashMap::new(),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn frame(mut self, id: &str, text: &str) -> Self {
        if !self.frames.iter().any(|f| f == id) {
            self.frames.push(id.into());
        }
        let _ = self.frame_text.insert(id.into(), text.into());
        self
    }

    pub fn broken_frame(mut self, id: &str, error: &str) -> Self {
        self.frames.push(id.into());
        let _ = self.broken_frames.insert(id.into(), error.into());
        self
    }

    pub fn usp(mut self, data: Value) -> Self {
        self.usp = Some(data);
        self
    }

    pub fn gpp(mut self, ping: Value, sections: &[(&str, bool)]) -> Self {
        self.gpp_ping = Some(ping);
        for (api, present) in sections {
            let _ = self.has_section.insert((*api).into(), *present);
        }
        self
    }

    pub fn emit(&self, event: ChannelEvent) {
        let _ = self.events.send(event);
    }

    /// Announce a real page context for `frame_id`.
    pub fn context_created(&self, id: i64, frame_id: &str) {
        self.emit(ChannelEvent::ContextCreated(ExecutionContextDescription {
            id: ContextId(id),
            origin: "https://site.test".into(),
            name: String::new(),
            aux_data: AuxData {
                frame_id: Some(frame_id.into()),
                is_default: true,
                kind: Some("default".into()),
            },
        }));
    }

    /// The agent in `context` reports `payload`.
    pub fn agent_says(&self, context: ContextId, payload: &str) {
        self.emit(ChannelEvent::BindingCalled {
            name: BINDING_NAME.into(),
            payload: payload.into(),
            context_id: context,
        });
    }

    /// Isolated worlds that received the agent, by frame.
    pub fn agent_worlds(&self) -> HashMap<String, ContextId> {
        let worlds = self.world_frames.lock();
        self.requests
            .lock()
            .iter()
            .filter(|r| r.expression.contains(AGENT_MARKER))
            .filter_map(|r| r.context_id)
            .filter_map(|ctx| worlds.get(&ctx).map(|frame| (frame.clone(), ctx)))
            .collect()
    }

    pub fn requests_containing(&self, needle: &str) -> Vec<EvaluateRequest> {
        self.requests
            .lock()
            .iter()
            .filter(|r| r.expression.contains(needle))
            .cloned()
            .collect()
    }

    fn answer(&self, request: &EvaluateRequest) -> Result<Evaluation, ChannelError> {
        let expr = &request.expression;
        if expr.contains("innerText") {
            let frame = request
                .context_id
                .and_then(|ctx| self.world_frames.lock().get(&ctx).cloned())
                .unwrap_or_default();
            let text = self.frame_text.get(&frame).cloned().unwrap_or_default();
            return Ok(Evaluation::value(Value::String(text)));
        }
        if expr.contains("__uspapi(") {
            return Ok(Evaluation::value(self.usp.clone().unwrap_or(Value::Null)));
        }
        if expr.contains(r#"__gpp("ping""#) {
            return Ok(Evaluation::value(self.gpp_ping.clone().unwrap_or(Value::Null)));
        }
        if expr.contains(r#"__gpp("hasSection""#) {
            let value = self
                .has_section
                .iter()
                .find(|(api, _)| expr.contains(&format!("\"{api}\")")))
                .map_or(Value::Null, |(_, present)| Value::Bool(*present));
            return Ok(Evaluation::value(value));
        }
        Ok(Evaluation::default())
    }
}

#[async_trait]
impl ControlChannel for ScriptedPage {
    async fn enable(&self) -> Result<(), ChannelError> {
        Ok(())
    }

    async fn add_binding(&self, _name: &str, _world_name: &str) -> Result<(), ChannelError> {
        Ok(())
    }

    async fn create_isolated_world(
        &self,
        frame_id: &str,
        _world_name: &str,
    ) -> Result<ContextId, ChannelError> {
        if let Some(error) = self.broken_frames.get(frame_id) {
            return Err(ChannelError::Cdp(error.clone()));
        }
        let id = ContextId(self.next_context.fetch_add(1, Ordering::SeqCst));
        let _ = self.world_frames.lock().insert(id, frame_id.into());
        Ok(id)
    }

    async fn evaluate(&self, request: EvaluateRequest) -> Result<Evaluation, ChannelError> {
        let answer = self.answer(&request);
        self.requests.lock().push(request);
        answer
    }

    async fn frame_ids(&self) -> Result<Vec<String>, ChannelError> {
        Ok(self.frames.clone())
    }

    fn subscribe(&self) -> broadcast::Receiver<ChannelEvent> {
        self.events.subscribe()
    }
}

pub fn fast_settings() -> CollectorSettings {
    CollectorSettings {
        short_timeouts: true,
        ..CollectorSettings::default()
    }
}

pub async fn attached(page: &Arc<ScriptedPage>, settings: CollectorSettings) -> CmpCollector {
    let collector = CmpCollector::new(
        page.clone(),
        settings,
        AgentProgram::new(AGENT_MARKER),
    )
    .unwrap();
    collector.attach().await.unwrap();
    collector
}

/// Let spawned event handlers run to idle (paused clock).
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(5)).await;
}
