//! Per-visit collector facade.
//!
//! Wires the world manager and message router to the channel's event
//! stream, runs the post-load scan, and assembles the final report.

use std::sync::Arc;
use std::time::Duration;

use cmpscan_cdp::{ChannelEvent, ControlChannel};
use cmpscan_core::{CmpResult, MessageLog, ScanResult, VisitReport};
use cmpscan_settings::CollectorSettings;
use parking_lot::{Mutex, RwLock};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use crate::agent::{AgentProgram, BINDING_NAME, WORLD_NAME};
use crate::aggregator::{collect_results, merge_scan};
use crate::controller::ConsentController;
use crate::error::Result;
use crate::probe::SignalProbe;
use crate::router::MessageRouter;
use crate::scanner::{PatternTable, collect_frame_texts, scroll_to_bottom};
use crate::worlds::WorldManager;

/// Consent and privacy-signal collector for one page visit.
pub struct CmpCollector {
    channel: Arc<dyn ControlChannel>,
    settings: CollectorSettings,
    patterns: PatternTable,
    log: Arc<MessageLog>,
    worlds: Arc<WorldManager>,
    router: Arc<MessageRouter>,
    scan_done: watch::Sender<bool>,
    scan: RwLock<ScanResult>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl CmpCollector {
    /// Create a collector for a fresh visit.
    ///
    /// Fails only if a configured pattern does not compile.
    pub fn new(
        channel: Arc<dyn ControlChannel>,
        settings: CollectorSettings,
        agent: AgentProgram,
    ) -> Result<Self> {
        let patterns = PatternTable::compile(&settings.patterns)?;
        let log = Arc::new(MessageLog::new());
        let worlds = Arc::new(WorldManager::new(channel.clone(), Arc::new(agent)));
        let (scan_done, scan_rx) = watch::channel(false);
        let router = Arc::new(MessageRouter::new(
            channel.clone(),
            worlds.clone(),
            log.clone(),
            settings.agent_config(),
            settings.auto_action,
            scan_rx,
        ));
        Ok(Self {
            channel,
            settings,
            patterns,
            log,
            worlds,
            router,
            scan_done,
            scan: RwLock::new(ScanResult::default()),
            pump: Mutex::new(None),
        })
    }

    /// Subscribe to channel events, enable page events and register the
    /// agent binding.
    pub async fn attach(&self) -> Result<()> {
        let events = self.channel.subscribe();
        let pump = tokio::spawn(pump_events(
            events,
            self.worlds.clone(),
            self.router.clone(),
        ));
        if let Some(previous) = self.pump.lock().replace(pump) {
            previous.abort();
        }

        self.channel.enable().await?;
        self.channel.add_binding(BINDING_NAME, WORLD_NAME).await?;
        tracing::debug!(binding = BINDING_NAME, world = WORLD_NAME, "collector attached");
        Ok(())
    }

    /// Run the text scan and privacy probes, then release pending actions.
    pub async fn post_load(&self) -> ScanResult {
        if self.settings.scroll_to_bottom {
            scroll_to_bottom(self.channel.as_ref()).await;
        }

        let text = collect_frame_texts(self.channel.as_ref()).await;
        let matches = self.patterns.scan(&text, self.settings.snippet_max_len);

        let probe = SignalProbe::new(
            self.channel.as_ref(),
            Duration::from_millis(self.settings.probe_timeout_ms),
        )
        .run()
        .await;

        let scan = ScanResult {
            patterns: matches.patterns,
            snippets: matches.snippets,
            usp_objects: probe.usp_objects,
            gpp_objects: probe.gpp_objects,
            has_sections: probe.has_sections,
        };
        tracing::info!(
            patterns = scan.patterns.len(),
            snippets = scan.snippets.len(),
            usp = scan.usp_objects.len(),
            gpp = scan.gpp_objects.len(),
            "scan finished"
        );
        *self.scan.write() = scan.clone();
        let _ = self.scan_done.send_replace(true);
        scan
    }

    /// Wait for the handshake to settle and return the per-CMP results.
    pub async fn get_data(&self) -> Vec<CmpResult> {
        self.finish().await.cmps
    }

    /// Wait for the handshake to settle and return the full visit report.
    pub async fn finish(&self) -> VisitReport {
        let controller = ConsentController::new(
            self.log.clone(),
            self.settings.auto_action,
            self.settings.poll_budget(),
        );
        let outcome = controller.wait_for_finish().await;
        let results = collect_results(&self.log, self.settings.auto_action);
        let cmps = merge_scan(results, &self.scan.read());
        VisitReport { outcome, cmps }
    }

    /// The visit's message log.
    pub fn messages(&self) -> &MessageLog {
        &self.log
    }

    /// Number of frames with a live agent world.
    pub fn agent_worlds(&self) -> usize {
        self.worlds.len()
    }
}

impl Drop for CmpCollector {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.lock().take() {
            pump.abort();
        }
    }
}

/// Route channel events until the channel detaches.
///
/// Binding payloads are logged and their state changes applied in receipt
/// order; reactions that talk to the browser and world provisioning run as
/// separate tasks so a waiting reaction never stalls the stream.
async fn pump_events(
    mut events: broadcast::Receiver<ChannelEvent>,
    worlds: Arc<WorldManager>,
    router: Arc<MessageRouter>,
) {
    loop {
        match events.recv().await {
            Ok(ChannelEvent::ContextCreated(context)) => {
                let worlds = worlds.clone();
                let _ = tokio::spawn(async move {
                    let _ = worlds.on_context_created(&context).await;
                });
            }
            Ok(ChannelEvent::ContextDestroyed { context_id }) => {
                worlds.on_context_destroyed(context_id);
            }
            Ok(ChannelEvent::ContextsCleared) => worlds.on_contexts_cleared(),
            Ok(ChannelEvent::BindingCalled {
                name,
                payload,
                context_id,
            }) if name == BINDING_NAME => {
                let Some(msg) = router.record(&payload, context_id) else {
                    continue;
                };
                if MessageRouter::reacts_to(&msg) {
                    let router = router.clone();
                    let _ = tokio::spawn(async move { router.react(&msg, context_id).await });
                }
            }
            Ok(ChannelEvent::Detached) | Err(broadcast::error::RecvError::Closed) => {
                tracing::debug!("channel detached, event pump stopped");
                break;
            }
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                tracing::warn!(missed, "event pump lagged, events dropped");
            }
        }
    }
}
