//! Multiplexes the agent's single conversation thread into per-node chat
//! sessions and turns chart replies into canvas nodes.
//!
//! A send records the thread length at that moment. Every thread message at
//! or past that index belongs to the node chat that sent, until the next send
//! moves the anchor, so replies to a node chat never show up in the general
//! transcript even when they arrive after the send returned.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures::future::join_all;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use vizcanvas_bus::BusPublisher;
use vizcanvas_schema::{
    CanvasEvent, ChatSession, ColumnDescriptor, Message, Role, SessionId, ThreadMessage, UiNode,
};

use crate::enrichment::EnrichmentPipeline;
use crate::extractor::{self, ExtractedChart};
use crate::layout::{LayoutEngine, LayoutError};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RouterError {
    #[error("unknown chat session: {0}")]
    UnknownSession(SessionId),
    #[error("the general session cannot be removed")]
    GeneralSessionUndeletable,
    #[error("session {0} is still waiting for a reply")]
    SendInFlight(SessionId),
}

/// Handle to the conversation thread the agent writes into.
///
/// Clones share the same messages. The router only ever reads snapshots.
#[derive(Clone, Default)]
pub struct ConversationThread {
    messages: Arc<RwLock<Vec<ThreadMessage>>>,
}

impl ConversationThread {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_messages(messages: Vec<ThreadMessage>) -> Self {
        Self {
            messages: Arc::new(RwLock::new(messages)),
        }
    }

    pub async fn len(&self) -> usize {
        self.messages.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn snapshot(&self) -> Vec<ThreadMessage> {
        self.messages.read().await.clone()
    }

    pub async fn push(&self, message: ThreadMessage) {
        self.messages.write().await.push(message);
    }

    /// Replace the message with the same id in place, or append it.
    pub async fn upsert(&self, message: ThreadMessage) {
        let mut messages = self.messages.write().await;
        match messages.iter_mut().find(|m| m.id == message.id) {
            Some(existing) => *existing = message,
            None => messages.push(message),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatasetSchema {
    pub dataset_id: String,
    pub columns: Vec<ColumnDescriptor>,
}

/// Metadata sent to the agent with every user message.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SendContext {
    pub session_id: SessionId,
    /// Label of the canvas node a node chat is bound to.
    pub node_label: Option<String>,
    pub datasets: Vec<DatasetSchema>,
}

/// The agent that answers user messages by appending to the thread.
#[async_trait]
pub trait RenderingAgent: Send + Sync {
    async fn send(&self, text: &str, context: &SendContext) -> Result<()>;
}

#[async_trait]
pub trait SchemaProvider: Send + Sync {
    async fn columns(&self, dataset_id: &str) -> Result<Vec<ColumnDescriptor>>;
}

/// Fixed in-memory schemas.
#[derive(Debug, Clone, Default)]
pub struct StaticSchemaProvider {
    datasets: HashMap<String, Vec<ColumnDescriptor>>,
}

impl StaticSchemaProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dataset(mut self, dataset_id: impl Into<String>, columns: Vec<ColumnDescriptor>) -> Self {
        self.datasets.insert(dataset_id.into(), columns);
        self
    }

    /// Dataset whose columns have no detected type.
    pub fn with_column_names(self, dataset_id: impl Into<String>, names: &[String]) -> Self {
        let columns = names
            .iter()
            .map(|name| ColumnDescriptor {
                name: name.clone(),
                detected_type: String::new(),
            })
            .collect();
        self.with_dataset(dataset_id, columns)
    }
}

#[async_trait]
impl SchemaProvider for StaticSchemaProvider {
    async fn columns(&self, dataset_id: &str) -> Result<Vec<ColumnDescriptor>> {
        self.datasets
            .get(dataset_id)
            .cloned()
            .ok_or_else(|| anyhow!("unknown dataset: {dataset_id}"))
    }
}

/// Which thread messages were turned into nodes, and which node chat owns
/// which message.
#[derive(Debug, Clone, Default)]
pub struct MessageLedger {
    processed: HashSet<String>,
    owners: HashMap<String, SessionId>,
}

impl MessageLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attribute a message to `session` unless it already has an owner.
    /// Returns the owner either way.
    pub fn attribute(&mut self, message_id: &str, session: &SessionId) -> &SessionId {
        self.owners
            .entry(message_id.to_string())
            .or_insert_with(|| session.clone())
    }

    pub fn owner(&self, message_id: &str) -> Option<&SessionId> {
        self.owners.get(message_id)
    }

    pub fn is_node_owned(&self, message_id: &str) -> bool {
        self.owner(message_id).is_some_and(|owner| !owner.is_general())
    }

    /// Returns false if the message was already processed.
    pub fn mark_processed(&mut self, message_id: &str) -> bool {
        self.processed.insert(message_id.to_string())
    }

    pub fn is_processed(&self, message_id: &str) -> bool {
        self.processed.contains(message_id)
    }

    pub fn processed_count(&self) -> usize {
        self.processed.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    AwaitingReply,
}

#[derive(Debug, Clone)]
pub struct PendingSend {
    pub session_id: SessionId,
    /// Thread length when the message was sent.
    pub thread_anchor: usize,
    pub user_message: Message,
}

/// Start of the thread range owned by the last node chat that sent.
#[derive(Debug, Clone)]
struct ReplyAnchor {
    session_id: SessionId,
    thread_index: usize,
}

/// A user message ready to hand to the agent.
#[derive(Debug, Clone)]
pub struct OutgoingMessage {
    pub text: String,
    pub context: SendContext,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlacedCharts {
    pub source_message_id: String,
    pub node_ids: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObserveReport {
    pub placed: Vec<PlacedCharts>,
}

impl ObserveReport {
    pub fn node_ids(&self) -> impl Iterator<Item = &str> {
        self.placed
            .iter()
            .flat_map(|p| p.node_ids.iter().map(String::as_str))
    }
}

pub struct ThreadRouter {
    thread: ConversationThread,
    agent: Arc<dyn RenderingAgent>,
    schemas: Arc<dyn SchemaProvider>,
    enrichment: Option<EnrichmentPipeline>,
    layout: LayoutEngine,
    bus: Option<BusPublisher>,
    datasets: Vec<String>,
    sessions: Vec<ChatSession>,
    active: SessionId,
    pending: Option<PendingSend>,
    node_anchor: Option<ReplyAnchor>,
    /// Thread length and text of every send, oldest first.
    requests: Vec<(usize, String)>,
    ledger: MessageLedger,
    /// Restored general transcript from before the current thread.
    general_history: Vec<Message>,
    /// General messages the thread never echoed, and failure notices.
    general_local: Vec<Message>,
}

impl ThreadRouter {
    pub fn new(
        thread: ConversationThread,
        agent: Arc<dyn RenderingAgent>,
        schemas: Arc<dyn SchemaProvider>,
        layout: LayoutEngine,
    ) -> Self {
        Self {
            thread,
            agent,
            schemas,
            enrichment: None,
            layout,
            bus: None,
            datasets: Vec::new(),
            sessions: vec![ChatSession::general()],
            active: SessionId::general(),
            pending: None,
            node_anchor: None,
            requests: Vec::new(),
            ledger: MessageLedger::new(),
            general_history: Vec::new(),
            general_local: Vec::new(),
        }
    }

    pub fn with_enrichment(mut self, pipeline: EnrichmentPipeline) -> Self {
        self.enrichment = Some(pipeline);
        self
    }

    pub fn with_bus(mut self, publisher: BusPublisher) -> Self {
        self.bus = Some(publisher);
        self
    }

    /// Datasets described to the agent. The first one is the default for
    /// charts that do not name a dataset.
    pub fn with_datasets(mut self, dataset_ids: Vec<String>) -> Self {
        self.datasets = dataset_ids;
        self
    }

    pub fn thread(&self) -> &ConversationThread {
        &self.thread
    }

    pub fn layout(&self) -> &LayoutEngine {
        &self.layout
    }

    pub fn ledger(&self) -> &MessageLedger {
        &self.ledger
    }

    pub fn sessions(&self) -> &[ChatSession] {
        &self.sessions
    }

    pub fn session(&self, id: &SessionId) -> Option<&ChatSession> {
        self.sessions.iter().find(|s| &s.id == id)
    }

    pub fn active_session_id(&self) -> &SessionId {
        &self.active
    }

    pub fn pending_session_id(&self) -> Option<&SessionId> {
        self.pending.as_ref().map(|p| &p.session_id)
    }

    pub fn state_of(&self, id: &SessionId) -> SessionState {
        match self.pending_session_id() {
            Some(pending) if pending == id => SessionState::AwaitingReply,
            _ => SessionState::Idle,
        }
    }

    /// Open (or re-open) the chat bound to a canvas node and make it active.
    pub async fn open_node_session(&mut self, node_id: &str, title: &str) -> SessionId {
        let id = SessionId::from(node_id);
        if id.is_general() || self.session(&id).is_some() {
            self.active = id.clone();
            return id;
        }

        self.sessions.push(ChatSession::new(id.clone(), title));
        self.active = id.clone();
        info!(session = %id, %title, "opened node chat");
        self.publish(CanvasEvent::SessionOpened {
            session_id: id.clone(),
            title: title.to_string(),
        })
        .await;
        id
    }

    pub fn select_session(&mut self, id: &SessionId) -> Result<(), RouterError> {
        if self.session(id).is_none() {
            return Err(RouterError::UnknownSession(id.clone()));
        }
        self.active = id.clone();
        Ok(())
    }

    /// Drop a node chat. Messages it owns stay attributed to it.
    pub fn remove_session(&mut self, id: &SessionId) -> Result<ChatSession, RouterError> {
        if id.is_general() {
            return Err(RouterError::GeneralSessionUndeletable);
        }
        let index = self
            .sessions
            .iter()
            .position(|s| &s.id == id)
            .ok_or_else(|| RouterError::UnknownSession(id.clone()))?;
        if &self.active == id {
            self.active = SessionId::general();
        }
        Ok(self.sessions.remove(index))
    }

    /// Replace all sessions with persisted ones. The general session is
    /// created when missing and becomes active.
    pub fn restore_sessions(&mut self, sessions: Vec<ChatSession>) {
        let mut general = ChatSession::general();
        let mut nodes: Vec<ChatSession> = Vec::new();
        for session in sessions {
            if session.id.is_general() {
                general = session;
            } else if !nodes.iter().any(|s| s.id == session.id) {
                for message in &session.messages {
                    self.ledger.attribute(&message.id, &session.id);
                }
                nodes.push(session);
            }
        }

        self.general_history = general.messages.clone();
        self.general_local.clear();
        self.sessions = std::iter::once(general).chain(nodes).collect();
        self.active = SessionId::general();
        debug!(sessions = self.sessions.len(), "restored chat sessions");
    }

    /// Record a user message in the active session and mark it pending.
    ///
    /// The caller hands the returned message to the agent and reports the
    /// outcome with [`complete_send`](Self::complete_send).
    pub async fn begin_send(&mut self, text: &str) -> Result<OutgoingMessage, RouterError> {
        if let Some(pending) = &self.pending {
            return Err(RouterError::SendInFlight(pending.session_id.clone()));
        }

        let session_id = self.active.clone();
        let user_message = Message::user(text);
        let node_label = {
            let session = self
                .session_mut(&session_id)
                .ok_or_else(|| RouterError::UnknownSession(session_id.clone()))?;
            session.messages.push(user_message.clone());
            (!session_id.is_general()).then(|| session.title.clone())
        };

        // Settle the previous node chat's range before the anchor moves.
        let snapshot = self.thread.snapshot().await;
        self.attribute_node_replies(&snapshot);

        let thread_anchor = snapshot.len();
        self.node_anchor = (!session_id.is_general()).then(|| ReplyAnchor {
            session_id: session_id.clone(),
            thread_index: thread_anchor,
        });
        self.requests.push((thread_anchor, text.to_string()));
        self.pending = Some(PendingSend {
            session_id: session_id.clone(),
            thread_anchor,
            user_message,
        });
        debug!(session = %session_id, thread_anchor, "send started");

        let datasets = self.dataset_context().await;
        Ok(OutgoingMessage {
            text: text.to_string(),
            context: SendContext {
                session_id,
                node_label,
                datasets,
            },
        })
    }

    /// Finish the pending send with the agent's outcome.
    pub async fn complete_send(&mut self, outcome: Result<()>) -> ObserveReport {
        let Some(pending) = self.pending.clone() else {
            warn!("complete_send called without a send in flight");
            return ObserveReport::default();
        };

        let snapshot = self.thread.snapshot().await;
        self.attribute_node_replies(&snapshot);
        if pending.session_id.is_general() && !user_echoed(&snapshot, pending.thread_anchor) {
            self.general_local.push(pending.user_message.clone());
        }

        match outcome {
            Ok(()) => {
                self.stream_node_reply(&snapshot).await;
                self.pending = None;
                self.observe().await
            }
            Err(error) => {
                warn!(session = %pending.session_id, %error, "agent send failed");
                self.pending = None;

                let notice =
                    Message::assistant(format!("Sorry, something went wrong: {error}"));
                if pending.session_id.is_general() {
                    self.general_local.push(notice);
                    self.sync_general(&snapshot);
                } else if let Some(session) = self.session_mut(&pending.session_id) {
                    session.messages.push(notice);
                }

                self.publish(CanvasEvent::SendFailed {
                    session_id: pending.session_id,
                    error: error.to_string(),
                })
                .await;
                ObserveReport::default()
            }
        }
    }

    /// Send `text` from the active session and wait for the agent.
    pub async fn send(&mut self, text: &str) -> Result<ObserveReport, RouterError> {
        let outgoing = self.begin_send(text).await?;
        let outcome = self.agent.send(&outgoing.text, &outgoing.context).await;
        Ok(self.complete_send(outcome).await)
    }

    /// React to the current state of the thread.
    pub async fn observe(&mut self) -> ObserveReport {
        let snapshot = self.thread.snapshot().await;
        self.attribute_node_replies(&snapshot);
        if !self.node_send_pending() {
            self.sync_general(&snapshot);
        }
        self.stream_node_reply(&snapshot).await;
        self.process_charts(&snapshot).await
    }

    fn session_mut(&mut self, id: &SessionId) -> Option<&mut ChatSession> {
        self.sessions.iter_mut().find(|s| &s.id == id)
    }

    fn node_send_pending(&self) -> bool {
        self.pending
            .as_ref()
            .is_some_and(|p| !p.session_id.is_general())
    }

    fn attribute_node_replies(&mut self, snapshot: &[ThreadMessage]) {
        let Some(anchor) = &self.node_anchor else {
            return;
        };
        for message in snapshot.iter().skip(anchor.thread_index) {
            let owner = self.ledger.attribute(&message.id, &anchor.session_id);
            if owner != &anchor.session_id {
                debug!(message_id = %message.id, %owner, "message already attributed");
            }
        }
    }

    fn sync_general(&mut self, snapshot: &[ThreadMessage]) {
        let messages = {
            let thread_ids: HashSet<&str> = snapshot.iter().map(|m| m.id.as_str()).collect();
            let history_ids: HashSet<&str> =
                self.general_history.iter().map(|m| m.id.as_str()).collect();

            let mut messages = self.general_history.clone();
            messages.extend(
                snapshot
                    .iter()
                    .filter(|m| !self.ledger.is_node_owned(&m.id))
                    .filter(|m| !history_ids.contains(m.id.as_str()))
                    .map(ThreadMessage::to_message),
            );
            messages.extend(
                self.general_local
                    .iter()
                    .filter(|m| !thread_ids.contains(m.id.as_str()))
                    .cloned(),
            );
            // Keep the local copy of a general send until the thread echoes it.
            if let Some(pending) = self.pending.as_ref().filter(|p| p.session_id.is_general()) {
                if !user_echoed(snapshot, pending.thread_anchor) {
                    messages.push(pending.user_message.clone());
                }
            }
            messages
        };

        if let Some(general) = self.session_mut(&SessionId::general()) {
            general.messages = messages;
        }
    }

    /// Mirror the latest assistant message of the node chat's range into
    /// that chat, replacing a trailing assistant message.
    async fn stream_node_reply(&mut self, snapshot: &[ThreadMessage]) {
        let Some(anchor) = &self.node_anchor else {
            return;
        };
        if snapshot.len() <= anchor.thread_index {
            return;
        }
        let Some(latest) = snapshot.last().filter(|m| m.role == Role::Assistant) else {
            return;
        };

        let session_id = anchor.session_id.clone();
        let reply = latest.to_message();
        let Some(session) = self.session_mut(&session_id) else {
            debug!(session = %session_id, "node chat was removed");
            return;
        };

        let changed = match session.messages.last_mut() {
            Some(last) if last.role == Role::Assistant => {
                let changed = *last != reply;
                *last = reply.clone();
                changed
            }
            _ => {
                session.messages.push(reply.clone());
                true
            }
        };

        if changed {
            self.publish(CanvasEvent::ReplyUpdated {
                session_id,
                message_id: reply.id,
            })
            .await;
        }
    }

    async fn process_charts(&mut self, snapshot: &[ThreadMessage]) -> ObserveReport {
        let mut report = ObserveReport::default();

        for (index, message) in snapshot.iter().enumerate() {
            if message.role != Role::Assistant
                || self.ledger.is_processed(&message.id)
                || !extractor::contains_chart(&message.ui)
            {
                continue;
            }

            let user_text = self.request_text(snapshot, index);
            let charts = self.resolve_charts(&message.ui, &user_text).await;
            match self.place_charts(&message.ui, &charts) {
                Ok(node_ids) => {
                    self.ledger.mark_processed(&message.id);
                    info!(message_id = %message.id, nodes = node_ids.len(), "placed charts from reply");
                    self.publish(CanvasEvent::ChartsPlaced {
                        source_message_id: message.id.clone(),
                        node_ids: node_ids.clone(),
                    })
                    .await;
                    report.placed.push(PlacedCharts {
                        source_message_id: message.id.clone(),
                        node_ids,
                    });
                }
                Err(error) => {
                    warn!(message_id = %message.id, %error, "failed to place charts");
                }
            }
        }

        report
    }

    /// Extract, validate against each chart's dataset, then enrich what is
    /// still missing. Charts of one reply are resolved concurrently.
    async fn resolve_charts(&self, ui: &[UiNode], user_text: &str) -> Vec<ExtractedChart> {
        let default_dataset = self.datasets.first().map(String::as_str);
        let charts = extractor::extract_all(ui, default_dataset, None, None);

        let mut dataset_ids: Vec<String> = Vec::new();
        for id in charts.iter().filter_map(|c| c.directive.dataset_id()) {
            if !dataset_ids.iter().any(|known| known == id) {
                dataset_ids.push(id.to_string());
            }
        }
        let fetched = join_all(dataset_ids.iter().map(|id| self.column_names(id))).await;
        let columns: HashMap<String, Vec<String>> = dataset_ids
            .into_iter()
            .zip(fetched)
            .filter_map(|(id, names)| names.map(|names| (id, names)))
            .collect();

        join_all(charts.into_iter().map(|mut chart| {
            let available = chart
                .directive
                .dataset_id()
                .and_then(|id| columns.get(id));
            async move {
                let Some(available) = available else {
                    return chart;
                };
                extractor::normalize_chart(&mut chart.directive, user_text, available);
                if let Some(pipeline) = &self.enrichment {
                    chart.directive = pipeline
                        .enrich(chart.directive, user_text, available)
                        .await;
                }
                chart
            }
        }))
        .await
    }

    /// The request a reply at `index` answers: the closest preceding user
    /// message, whether the agent echoed it into the thread or not.
    fn request_text(&self, snapshot: &[ThreadMessage], index: usize) -> String {
        let echoed = snapshot[..index]
            .iter()
            .enumerate()
            .rev()
            .find(|(_, m)| m.role == Role::User);
        let sent = self
            .requests
            .iter()
            .rev()
            .find(|(anchor, _)| *anchor <= index);

        match (echoed, sent) {
            (Some((at, _)), Some((anchor, text))) if *anchor > at => text.clone(),
            (Some((_, message)), _) => message.content.clone(),
            (None, Some((_, text))) => text.clone(),
            (None, None) => String::new(),
        }
    }

    async fn column_names(&self, dataset_id: &str) -> Option<Vec<String>> {
        match self.schemas.columns(dataset_id).await {
            Ok(columns) => Some(columns.into_iter().map(|c| c.name).collect()),
            Err(error) => {
                warn!(%dataset_id, %error, "schema fetch failed, skipping column validation");
                None
            }
        }
    }

    async fn dataset_context(&self) -> Vec<DatasetSchema> {
        let fetched = join_all(self.datasets.iter().map(|id| self.schemas.columns(id))).await;
        self.datasets
            .iter()
            .zip(fetched)
            .filter_map(|(dataset_id, result)| match result {
                Ok(columns) => Some(DatasetSchema {
                    dataset_id: dataset_id.clone(),
                    columns,
                }),
                Err(error) => {
                    warn!(%dataset_id, %error, "schema fetch failed, leaving dataset out of context");
                    None
                }
            })
            .collect()
    }

    fn place_charts(
        &mut self,
        ui: &[UiNode],
        charts: &[ExtractedChart],
    ) -> Result<Vec<String>, LayoutError> {
        let title = extractor::find_cluster_title(ui);
        self.layout.place_charts(title.as_deref(), charts)
    }

    async fn publish(&self, event: CanvasEvent) {
        if let Some(bus) = &self.bus {
            if let Err(error) = bus.publish(event).await {
                warn!(%error, "failed to publish canvas event");
            }
        }
    }
}

/// Whether the thread holds a user message sent at or after `anchor`.
fn user_echoed(snapshot: &[ThreadMessage], anchor: usize) -> bool {
    snapshot.iter().skip(anchor).any(|m| m.role == Role::User)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct SilentAgent;

    #[async_trait]
    impl RenderingAgent for SilentAgent {
        async fn send(&self, _text: &str, _context: &SendContext) -> Result<()> {
            Ok(())
        }
    }

    fn router() -> ThreadRouter {
        ThreadRouter::new(
            ConversationThread::new(),
            Arc::new(SilentAgent),
            Arc::new(StaticSchemaProvider::new()),
            LayoutEngine::default(),
        )
    }

    #[test]
    fn ledger_attribution_is_first_come() {
        let mut ledger = MessageLedger::new();
        let a = SessionId::from("node-a");
        let b = SessionId::from("node-b");

        assert_eq!(ledger.attribute("m1", &a), &a);
        assert_eq!(ledger.attribute("m1", &b), &a);
        assert!(ledger.is_node_owned("m1"));
        assert!(!ledger.is_node_owned("m2"));

        assert!(ledger.mark_processed("m1"));
        assert!(!ledger.mark_processed("m1"));
        assert_eq!(ledger.processed_count(), 1);
    }

    #[test]
    fn general_session_always_exists() {
        let mut router = router();
        assert_eq!(router.sessions().len(), 1);
        assert!(router.active_session_id().is_general());
        assert_eq!(
            router.remove_session(&SessionId::general()),
            Err(RouterError::GeneralSessionUndeletable)
        );
    }

    #[tokio::test]
    async fn node_sessions_open_select_and_remove() {
        let mut router = router();
        let id = router.open_node_session("abc123", "Scatter Plot").await;
        assert_eq!(router.active_session_id(), &id);
        assert_eq!(router.session(&id).unwrap().title, "Scatter Plot");

        // Re-opening keeps the existing session.
        router.open_node_session("abc123", "Renamed").await;
        assert_eq!(router.sessions().len(), 2);
        assert_eq!(router.session(&id).unwrap().title, "Scatter Plot");

        router.select_session(&SessionId::general()).unwrap();
        assert!(router.active_session_id().is_general());
        assert_eq!(
            router.select_session(&SessionId::from("nope")),
            Err(RouterError::UnknownSession(SessionId::from("nope")))
        );

        router.select_session(&id).unwrap();
        let removed = router.remove_session(&id).unwrap();
        assert_eq!(removed.id, id);
        assert!(router.active_session_id().is_general());
        assert!(router.remove_session(&id).is_err());
    }

    #[tokio::test]
    async fn second_send_while_pending_is_rejected() {
        let mut router = router();
        let outgoing = router.begin_send("first").await.unwrap();
        assert!(outgoing.context.node_label.is_none());
        assert_eq!(
            router.state_of(&SessionId::general()),
            SessionState::AwaitingReply
        );

        let err = router.begin_send("second").await.unwrap_err();
        assert_eq!(err, RouterError::SendInFlight(SessionId::general()));

        router.complete_send(Ok(())).await;
        assert_eq!(router.state_of(&SessionId::general()), SessionState::Idle);
        assert!(router.begin_send("third").await.is_ok());
    }

    #[tokio::test]
    async fn node_send_carries_node_label() {
        let mut router = router();
        router.open_node_session("n1", "Bar Chart").await;
        let outgoing = router.begin_send("why is Paris so high?").await.unwrap();
        assert_eq!(outgoing.context.node_label.as_deref(), Some("Bar Chart"));
        assert_eq!(outgoing.context.session_id, SessionId::from("n1"));

        let session = router.session(&SessionId::from("n1")).unwrap();
        assert_eq!(session.messages.len(), 1);
        assert_eq!(session.messages[0].role, Role::User);
    }

    #[tokio::test]
    async fn restore_attributes_node_messages() {
        let mut router = router();
        let mut node = ChatSession::new(SessionId::from("n1"), "Histogram");
        node.messages.push(Message::user("q"));
        node.messages.push(Message::assistant("a"));
        let reply_id = node.messages[1].id.clone();
        let mut general = ChatSession::general();
        general.messages.push(Message::user("hello"));

        router.restore_sessions(vec![node, general]);
        assert_eq!(router.sessions()[0].id, SessionId::general());
        assert_eq!(router.sessions().len(), 2);
        assert_eq!(router.ledger().owner(&reply_id), Some(&SessionId::from("n1")));

        // Restored general history survives a sync against an empty thread.
        router.observe().await;
        assert_eq!(router.sessions()[0].messages.len(), 1);
    }

    #[tokio::test]
    async fn thread_upsert_replaces_by_id() {
        let thread = ConversationThread::new();
        let mut message = ThreadMessage {
            id: "m1".into(),
            role: Role::Assistant,
            content: "Loading".into(),
            ui: Vec::new(),
        };
        thread.push(message.clone()).await;
        message.content = "Done".into();
        thread.upsert(message).await;

        let snapshot = thread.snapshot().await;
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].content, "Done");
    }

    #[tokio::test]
    async fn request_text_prefers_the_latest_send() {
        let mut router = router();
        let message = |id: &str, role: Role, content: &str| ThreadMessage {
            id: id.into(),
            role,
            content: content.into(),
            ui: Vec::new(),
        };

        router.begin_send("first question").await.unwrap();
        router.thread.push(message("u0", Role::User, "first question")).await;
        router.thread.push(message("a0", Role::Assistant, "ok")).await;
        router.complete_send(Ok(())).await;

        // The agent does not echo the second send.
        router.begin_send("bar chart of city").await.unwrap();
        router.thread.push(message("a1", Role::Assistant, "chart")).await;
        router.complete_send(Ok(())).await;

        let snapshot = router.thread.snapshot().await;
        assert_eq!(router.request_text(&snapshot, 1), "first question");
        assert_eq!(router.request_text(&snapshot, 2), "bar chart of city");
        assert_eq!(ThreadRouter::request_text(&self::router(), &snapshot, 0), "");
    }
}
