//! Sampling-session lifecycle
//!
//! One [`SessionController`] owns one duplex channel and the trace tree
//! accumulated over that channel. Controllers are plain values: any number
//! of sessions can run side by side, each against its own endpoint.
//!
//! The controller is driven from one place: the caller awaits
//! [`SessionController::next_update`] (or feeds events through
//! [`SessionController::process`]) and re-renders from the returned updates.
//! Batch reconstruction and filtering happen inline on that single logical
//! thread, so the tree needs no locking.

use serde_json::Value;
use tokio::sync::mpsc;

use crate::channel::{ChannelEvent, ChannelTiming, Connector, DuplexChannel};
use crate::error::{Error, Result};
use crate::filter::{filter_roots, FilterResult, FilterSpec};
use crate::protocol::{ClientMessage, ServerMessage};
use crate::reconstruct::TraceStore;
use crate::types::Trace;

/// Lifecycle state of a sampling session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplingState {
    Idle,
    Starting,
    Active,
    Stopping,
}

impl SamplingState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SamplingState::Idle => "idle",
            SamplingState::Starting => "starting",
            SamplingState::Active => "active",
            SamplingState::Stopping => "stopping",
        }
    }
}

/// Result of folding one batch into the session tree.
#[derive(Debug, Clone, Copy)]
pub struct BatchOutcome {
    /// Previously rendered output must be invalidated, not appended to.
    pub structure_changed: bool,
    /// Root count after the merge.
    pub root_count: usize,
    /// Session-wide maximum duration after the merge.
    pub max_duration: u64,
}

/// State change surfaced to the view layer.
#[derive(Debug)]
pub enum SessionUpdate {
    /// The channel is open; the producer will assign a sampling id next.
    Connected,
    /// The producer assigned (or re-assigned, after a reconnect) the
    /// sampling id; the session is now active.
    Started { sampling_id: String },
    /// A trace batch was folded into the tree.
    Batch(BatchOutcome),
    /// Connectivity failure. Accumulated traces are untouched; updates
    /// resume when reconnection succeeds.
    ConnectionError(String),
    /// The session reached Idle after a stop.
    Stopped,
}

/// Owns one sampling session: its channel, its state and its trace tree.
pub struct SessionController {
    channel: DuplexChannel,
    events: mpsc::UnboundedReceiver<ChannelEvent>,
    store: TraceStore,
    state: SamplingState,
    sampling_id: Option<String>,
}

impl SessionController {
    pub fn new(connector: impl Connector, timing: ChannelTiming) -> Self {
        let (channel, events) = DuplexChannel::new(connector, timing);
        Self {
            channel,
            events,
            store: TraceStore::new(),
            state: SamplingState::Idle,
            sampling_id: None,
        }
    }

    pub fn state(&self) -> SamplingState {
        self.state
    }

    /// The producer-assigned sampling id, once one arrived.
    pub fn sampling_id(&self) -> Option<&str> {
        self.sampling_id.as_deref()
    }

    /// The committed root traces, in arrival order.
    pub fn roots(&self) -> &[Trace] {
        self.store.roots()
    }

    /// Session-wide maximum duration, floored at 500 ms.
    pub fn max_duration(&self) -> u64 {
        self.store.max_duration()
    }

    /// The filtered view of the current roots.
    pub fn filtered(&self, spec: &FilterSpec) -> FilterResult<'_> {
        filter_roots(self.store.roots(), spec)
    }

    /// Begin a sampling session: discard the previous tree and open the
    /// channel. The producer answers with a sampling id, which flips the
    /// session to Active.
    pub fn start(&mut self) -> Result<()> {
        if self.state != SamplingState::Idle {
            return Err(Error::AlreadyActive);
        }
        tracing::info!("Starting sampling");
        self.store.clear();
        self.sampling_id = None;
        self.state = SamplingState::Starting;
        self.channel.connect();
        Ok(())
    }

    /// End the session: tell the producer, then disconnect. Safe to call
    /// any number of times; silently does nothing when already idle.
    ///
    /// Batches already in flight are still applied while the disconnect
    /// completes.
    pub fn stop(&mut self) {
        match self.state {
            SamplingState::Idle | SamplingState::Stopping => return,
            SamplingState::Starting | SamplingState::Active => {}
        }
        tracing::info!(sampling_id = ?self.sampling_id, "Stopping sampling");
        self.state = SamplingState::Stopping;
        if let Some(sampling_id) = self.sampling_id.clone() {
            self.channel.send(&ClientMessage::Stop { sampling_id });
        }
        self.channel.disconnect();
    }

    /// Drop the accumulated tree. Only valid between sessions.
    pub fn clear(&mut self) -> Result<()> {
        if self.state != SamplingState::Idle {
            return Err(Error::NotIdle);
        }
        self.store.clear();
        Ok(())
    }

    /// Await the next state change. Returns `None` once the channel driver
    /// is gone, which only happens at teardown.
    pub async fn next_update(&mut self) -> Option<SessionUpdate> {
        loop {
            let event = self.events.recv().await?;
            if let Some(update) = self.process(event) {
                return Some(update);
            }
        }
    }

    /// Fold one channel event into the session. Returns the resulting
    /// update when the event was meaningful in the current state.
    pub fn process(&mut self, event: ChannelEvent) -> Option<SessionUpdate> {
        match event {
            ChannelEvent::Opened => Some(SessionUpdate::Connected),
            ChannelEvent::Message(msg) => self.route(msg),
            ChannelEvent::Error(error) => {
                tracing::warn!(error = %error, "Sampling channel error");
                Some(SessionUpdate::ConnectionError(error))
            }
            ChannelEvent::Closed => {
                if self.state == SamplingState::Stopping {
                    self.state = SamplingState::Idle;
                    Some(SessionUpdate::Stopped)
                } else {
                    None
                }
            }
        }
    }

    /// Apply one trace batch. Valid while Active or Stopping: late batches
    /// that race the stop are still folded in.
    pub fn on_batch(&mut self, records: Vec<Trace>, observed_max: u64) -> Option<BatchOutcome> {
        match self.state {
            SamplingState::Active | SamplingState::Stopping => {
                let structure_changed = self.store.apply_batch(records, observed_max);
                Some(BatchOutcome {
                    structure_changed,
                    root_count: self.store.roots().len(),
                    max_duration: self.store.max_duration(),
                })
            }
            state => {
                tracing::debug!(state = state.as_str(), "Dropping batch outside session");
                None
            }
        }
    }

    fn route(&mut self, msg: Value) -> Option<SessionUpdate> {
        match ServerMessage::classify(&msg)? {
            ServerMessage::SamplingStarted { sampling_id } => match self.state {
                SamplingState::Starting | SamplingState::Active => {
                    tracing::info!(sampling_id = %sampling_id, "Sampling session assigned");
                    self.sampling_id = Some(sampling_id.clone());
                    self.state = SamplingState::Active;
                    Some(SessionUpdate::Started { sampling_id })
                }
                _ => None,
            },
            ServerMessage::TraceBatch {
                traces,
                max_duration,
            } => self
                .on_batch(traces, max_duration)
                .map(SessionUpdate::Batch),
            ServerMessage::Stop => {
                // Producer ended the session; mirror a caller stop.
                self.stop();
                None
            }
            other => {
                tracing::debug!(?other, "Ignoring message outside the sampling feed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::testing::{settle, Script, ScriptedConnector};
    use crate::channel::Incoming;
    use crate::filter::TraceCategory;
    use serde_json::json;

    fn feed(far: &crate::channel::testing::FarEnd, msg: serde_json::Value) {
        far.feed
            .as_ref()
            .unwrap()
            .send(Incoming::Text(msg.to_string()))
            .unwrap();
    }

    /// Pump events until the driver goes quiet. Processing an event can
    /// queue more work on the driver (a stop sends commands), so keep
    /// settling until a full round yields nothing.
    async fn drain(controller: &mut SessionController) -> Vec<SessionUpdate> {
        let mut updates = Vec::new();
        loop {
            settle().await;
            let mut progressed = false;
            while let Ok(event) = controller.events.try_recv() {
                progressed = true;
                if let Some(update) = controller.process(event) {
                    updates.push(update);
                }
            }
            if !progressed {
                break;
            }
        }
        updates
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_lifecycle() {
        let (connector, _attempts, far_ends) = ScriptedConnector::new(vec![Script::Accept]);
        let mut controller = SessionController::new(connector, ChannelTiming::default());
        assert_eq!(controller.state(), SamplingState::Idle);

        controller.start().unwrap();
        assert_eq!(controller.state(), SamplingState::Starting);
        settle().await;

        let far = far_ends.lock().unwrap().pop_front().unwrap();
        feed(&far, json!({"samplingId": "s-1"}));
        let updates = drain(&mut controller).await;
        assert!(updates
            .iter()
            .any(|u| matches!(u, SessionUpdate::Started { sampling_id } if sampling_id == "s-1")));
        assert_eq!(controller.state(), SamplingState::Active);

        feed(
            &far,
            json!({
                "traces": [
                    {"id": "1", "name": "portalRequest", "duration": 120, "data": {"path": "/a"}}
                ],
                "maxDuration": 120
            }),
        );
        let updates = drain(&mut controller).await;
        assert!(matches!(
            updates.as_slice(),
            [SessionUpdate::Batch(BatchOutcome {
                structure_changed: false,
                root_count: 1,
                ..
            })]
        ));
        assert_eq!(controller.max_duration(), 500);

        controller.stop();
        assert_eq!(controller.state(), SamplingState::Stopping);
        let updates = drain(&mut controller).await;
        assert!(updates.iter().any(|u| matches!(u, SessionUpdate::Stopped)));
        assert_eq!(controller.state(), SamplingState::Idle);

        // The tree survives the stop until an explicit clear.
        assert_eq!(controller.roots().len(), 1);
        controller.clear().unwrap();
        assert!(controller.roots().is_empty());

        // Stop message went out before the close.
        let mut far = far;
        let mut sent = Vec::new();
        while let Ok(text) = far.sent.try_recv() {
            sent.push(text);
        }
        assert!(sent.contains(&r#"{"action":"stop","samplingId":"s-1"}"#.to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_twice_is_rejected() {
        let (connector, _attempts, _far_ends) = ScriptedConnector::new(vec![Script::Accept]);
        let mut controller = SessionController::new(connector, ChannelTiming::default());

        controller.start().unwrap();
        assert!(matches!(controller.start(), Err(Error::AlreadyActive)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_requires_idle() {
        let (connector, _attempts, _far_ends) = ScriptedConnector::new(vec![Script::Accept]);
        let mut controller = SessionController::new(connector, ChannelTiming::default());

        controller.start().unwrap();
        assert!(matches!(controller.clear(), Err(Error::NotIdle)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_is_idempotent() {
        let (connector, _attempts, far_ends) = ScriptedConnector::new(vec![Script::Accept]);
        let mut controller = SessionController::new(connector, ChannelTiming::default());

        controller.stop();
        assert_eq!(controller.state(), SamplingState::Idle);

        controller.start().unwrap();
        settle().await;
        let far = far_ends.lock().unwrap().pop_front().unwrap();
        feed(&far, json!({"samplingId": "s-1"}));
        drain(&mut controller).await;

        controller.stop();
        controller.stop();
        let updates = drain(&mut controller).await;
        assert_eq!(
            updates
                .iter()
                .filter(|u| matches!(u, SessionUpdate::Stopped))
                .count(),
            1
        );
        assert_eq!(controller.state(), SamplingState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_batch_while_stopping_is_applied() {
        let (connector, _attempts, far_ends) = ScriptedConnector::new(vec![Script::Accept]);
        let mut controller = SessionController::new(connector, ChannelTiming::default());

        controller.start().unwrap();
        settle().await;
        let far = far_ends.lock().unwrap().pop_front().unwrap();
        feed(&far, json!({"samplingId": "s-1"}));
        drain(&mut controller).await;

        // The batch is already queued when the stop is issued.
        feed(
            &far,
            json!({"traces": [{"id": "1", "name": "portalRequest", "data": {}}], "maxDuration": 0}),
        );
        controller.stop();

        let updates = drain(&mut controller).await;
        assert!(updates
            .iter()
            .any(|u| matches!(u, SessionUpdate::Batch(BatchOutcome { root_count: 1, .. }))));
        assert!(updates.iter().any(|u| matches!(u, SessionUpdate::Stopped)));
        assert_eq!(controller.roots().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_producer_stop_ends_session() {
        let (connector, _attempts, far_ends) = ScriptedConnector::new(vec![Script::Accept]);
        let mut controller = SessionController::new(connector, ChannelTiming::default());

        controller.start().unwrap();
        settle().await;
        let far = far_ends.lock().unwrap().pop_front().unwrap();
        feed(&far, json!({"samplingId": "s-1"}));
        drain(&mut controller).await;

        feed(&far, json!({"action": "stop"}));
        let updates = drain(&mut controller).await;
        assert!(updates.iter().any(|u| matches!(u, SessionUpdate::Stopped)));
        assert_eq!(controller.state(), SamplingState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_channel_error_keeps_accumulated_roots() {
        let (connector, attempts, far_ends) =
            ScriptedConnector::new(vec![Script::Accept, Script::Accept]);
        let mut controller = SessionController::new(connector, ChannelTiming::default());

        controller.start().unwrap();
        settle().await;
        let far = far_ends.lock().unwrap().pop_front().unwrap();
        feed(&far, json!({"samplingId": "s-1"}));
        feed(
            &far,
            json!({"traces": [{"id": "1", "name": "portalRequest", "data": {}}], "maxDuration": 0}),
        );
        drain(&mut controller).await;
        assert_eq!(controller.roots().len(), 1);

        // Unexpected close; the session stays Active and keeps its tree.
        drop(far);
        drain(&mut controller).await;
        assert_eq!(controller.state(), SamplingState::Active);
        assert_eq!(controller.roots().len(), 1);

        // After the reconnect delay, the channel comes back and the producer
        // assigns a fresh sampling id for the same session.
        tokio::time::advance(std::time::Duration::from_secs(5)).await;
        settle().await;
        assert_eq!(attempts.load(std::sync::atomic::Ordering::SeqCst), 2);
        let far = far_ends.lock().unwrap().pop_front().unwrap();
        feed(&far, json!({"samplingId": "s-2"}));
        let updates = drain(&mut controller).await;
        assert!(updates
            .iter()
            .any(|u| matches!(u, SessionUpdate::Started { sampling_id } if sampling_id == "s-2")));
        assert_eq!(controller.sampling_id(), Some("s-2"));
        assert_eq!(controller.roots().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_controllers_are_independent() {
        let (connector_a, _a, far_a) = ScriptedConnector::new(vec![Script::Accept]);
        let (connector_b, _b, _far_b) = ScriptedConnector::new(vec![Script::Accept]);
        let mut a = SessionController::new(connector_a, ChannelTiming::default());
        let mut b = SessionController::new(connector_b, ChannelTiming::default());

        a.start().unwrap();
        settle().await;
        let far = far_a.lock().unwrap().pop_front().unwrap();
        feed(&far, json!({"samplingId": "s-a"}));
        feed(
            &far,
            json!({"traces": [{"id": "1", "name": "portalRequest", "data": {}}], "maxDuration": 0}),
        );
        drain(&mut a).await;

        assert_eq!(a.roots().len(), 1);
        assert!(b.roots().is_empty());
        assert_eq!(b.state(), SamplingState::Idle);
        b.start().unwrap();
        assert_eq!(b.state(), SamplingState::Starting);
    }

    #[tokio::test(start_paused = true)]
    async fn test_filtered_view_delegates() {
        let (connector, _attempts, far_ends) = ScriptedConnector::new(vec![Script::Accept]);
        let mut controller = SessionController::new(connector, ChannelTiming::default());

        controller.start().unwrap();
        settle().await;
        let far = far_ends.lock().unwrap().pop_front().unwrap();
        feed(&far, json!({"samplingId": "s-1"}));
        feed(
            &far,
            json!({"traces": [
                {"id": "1", "name": "portalRequest", "duration": 80,
                 "data": {"path": "/_/image/x"}},
                {"id": "2", "name": "portalRequest", "duration": 30,
                 "data": {"path": "/page", "type": "text/html"}}
            ], "maxDuration": 80}),
        );
        drain(&mut controller).await;

        let spec = FilterSpec {
            category: Some(TraceCategory::Image),
            search_text: String::new(),
        };
        let result = controller.filtered(&spec);
        assert_eq!(result.traces.len(), 1);
        assert_eq!(result.traces[0].id, "1");
        assert_eq!(result.max_duration, Some(80));
    }
}
