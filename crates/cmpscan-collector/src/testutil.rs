//! Shared test utilities: a scripted in-memory control channel.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use cmpscan_cdp::{
    AuxData, ChannelError, ChannelEvent, ContextId, ControlChannel, EvaluateRequest, Evaluation,
    ExecutionContextDescription,
};
use parking_lot::Mutex;
use tokio::sync::broadcast;

type Responder = Box<dyn Fn(&EvaluateRequest) -> Result<Evaluation, ChannelError> + Send + Sync>;

/// In-memory [`ControlChannel`] that records every call.
pub struct FakeChannel {
    events: broadcast::Sender<ChannelEvent>,
    next_context: AtomicI64,
    frames: Mutex<Vec<String>>,
    failing_frames: Mutex<HashMap<String, String>>,
    responder: Mutex<Responder>,
    /// Every evaluate request, in call order.
    pub requests: Mutex<Vec<EvaluateRequest>>,
    /// `(frame_id, world_name)` of every created world.
    pub worlds: Mutex<Vec<(String, String)>>,
    /// `(name, world_name)` of every registered binding.
    pub bindings: Mutex<Vec<(String, String)>>,
}

impl FakeChannel {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            events,
            next_context: AtomicI64::new(100),
            frames: Mutex::new(vec!["main".into()]),
            failing_frames: Mutex::new(HashMap::new()),
            responder: Mutex::new(Box::new(|_| Ok(Evaluation::default()))),
            requests: Mutex::new(Vec::new()),
            worlds: Mutex::new(Vec::new()),
            bindings: Mutex::new(Vec::new()),
        }
    }

    /// Builder: set the live frame ids.
    pub fn with_frames(self, frames: &[&str]) -> Self {
        *self.frames.lock() = frames.iter().map(|f| (*f).to_string()).collect();
        self
    }

    /// Builder: make world creation for `frame` fail with `message`.
    pub fn with_failing_frame(self, frame: &str, message: &str) -> Self {
        let _ = self
            .failing_frames
            .lock()
            .insert(frame.into(), message.into());
        self
    }

    /// Builder: answer evaluate requests with `responder`.
    pub fn with_responder(
        self,
        responder: impl Fn(&EvaluateRequest) -> Result<Evaluation, ChannelError> + Send + Sync + 'static,
    ) -> Self {
        *self.responder.lock() = Box::new(responder);
        self
    }

    /// Deliver an event to every subscriber.
    pub fn emit(&self, event: ChannelEvent) {
        let _ = self.events.send(event);
    }

    /// Expressions evaluated so far.
    pub fn expressions(&self) -> Vec<String> {
        self.requests
            .lock()
            .iter()
            .map(|r| r.expression.clone())
            .collect()
    }

    /// Requests whose expression contains `needle`.
    pub fn requests_containing(&self, needle: &str) -> Vec<EvaluateRequest> {
        self.requests
            .lock()
            .iter()
            .filter(|r| r.expression.contains(needle))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl ControlChannel for FakeChannel {
    async fn enable(&self) -> Result<(), ChannelError> {
        Ok(())
    }

    async fn add_binding(&self, name: &str, world_name: &str) -> Result<(), ChannelError> {
        self.bindings.lock().push((name.into(), world_name.into()));
        Ok(())
    }

    async fn create_isolated_world(
        &self,
        frame_id: &str,
        world_name: &str,
    ) -> Result<ContextId, ChannelError> {
        if let Some(message) = self.failing_frames.lock().get(frame_id) {
            return Err(ChannelError::Cdp(message.clone()));
        }
        self.worlds.lock().push((frame_id.into(), world_name.into()));
        Ok(ContextId(self.next_context.fetch_add(1, Ordering::SeqCst)))
    }

    async fn evaluate(&self, request: EvaluateRequest) -> Result<Evaluation, ChannelError> {
        let result = (self.responder.lock())(&request);
        self.requests.lock().push(request);
        result
    }

    async fn frame_ids(&self) -> Result<Vec<String>, ChannelError> {
        Ok(self.frames.lock().clone())
    }

    fn subscribe(&self) -> broadcast::Receiver<ChannelEvent> {
        self.events.subscribe()
    }
}

/// A real page context for `frame_id`.
pub fn page_context(id: i64, frame_id: &str) -> ExecutionContextDescription {
    ExecutionContextDescription {
        id: ContextId(id),
        origin: "https://example.com".into(),
        name: String::new(),
        aux_data: AuxData {
            frame_id: Some(frame_id.into()),
            is_default: true,
            kind: Some("default".into()),
        },
    }
}
