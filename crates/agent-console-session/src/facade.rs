//! Session facade: owns every session entity and turns intents and
//! connection events into published projections.

use std::sync::Arc;

use agent_console_core::{
    ConversationId, ConversationStore, ExecutionError, ExecutionSession, Message, Projection,
    ProjectionPublisher,
};
use agent_console_transport::{ClientFrame, Connector, http::HttpExecutor};
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};

use crate::{
    config::SessionConfig,
    manager::{ConnectionEvent, ConnectionManager},
    router::MessageRouter,
};

/// What the user asked to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission {
    /// Natural-language instructions for the agent.
    Instructions(String),
    /// Raw code to execute.
    Code(String),
    /// Chat turn in the active conversation.
    Chat(String),
}

/// The session driver has stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Session driver has stopped")]
pub struct SessionClosed;

#[derive(Debug)]
enum Intent {
    Connect(Option<String>),
    Submit(Submission),
    SelectConversation(ConversationId),
    NewConversation,
    RefreshConversations,
    ExecuteViaHttp(String),
    Close,
}

/// Completion of an HTTP fallback request, tagged with the execution it
/// belongs to.
#[derive(Debug)]
struct HttpCompletion {
    execution: u64,
    result: Result<(), ExecutionError>,
}

/// Single owner of the connection, conversation store and execution
/// session.
///
/// Every intent and every connection event is handled to completion and
/// followed by a projection publish. Use it directly for step-by-step
/// driving, or [`SessionFacade::spawn`] it onto its own task and talk to it
/// through a [`SessionHandle`].
pub struct SessionFacade<C: Connector> {
    config: SessionConfig,
    connection: ConnectionManager<C>,
    router: MessageRouter,
    store: ConversationStore,
    execution: ExecutionSession,
    publisher: ProjectionPublisher,
    http: Option<HttpExecutor>,
    http_tx: mpsc::UnboundedSender<HttpCompletion>,
    http_rx: mpsc::UnboundedReceiver<HttpCompletion>,
    /// Bumped on every started execution.
    execution_seq: u64,
}

impl<C: Connector> SessionFacade<C> {
    /// Create a facade. It stays disconnected until [`Self::connect`].
    #[must_use]
    pub fn new(config: SessionConfig, connector: impl Into<Arc<C>>) -> Self {
        let (http_tx, http_rx) = mpsc::unbounded_channel();
        let http = config.http_base.as_deref().map(HttpExecutor::new);
        Self {
            connection: ConnectionManager::new(connector, config.reconnect_delay()),
            router: MessageRouter::new(config.placeholder_summary.clone()),
            store: ConversationStore::new(config.index_order),
            execution: ExecutionSession::new(),
            publisher: ProjectionPublisher::new(),
            http,
            http_tx,
            http_rx,
            execution_seq: 0,
            config,
        }
    }

    #[must_use]
    pub const fn config(&self) -> &SessionConfig {
        &self.config
    }

    #[must_use]
    pub const fn store(&self) -> &ConversationStore {
        &self.store
    }

    #[must_use]
    pub const fn execution(&self) -> &ExecutionSession {
        &self.execution
    }

    #[must_use]
    pub const fn connection(&self) -> &ConnectionManager<C> {
        &self.connection
    }

    /// Latest published projection.
    #[must_use]
    pub fn projection(&self) -> Projection {
        self.publisher.current()
    }

    /// Receiver for live projections.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Projection> {
        self.publisher.subscribe()
    }

    /// Connect to the configured URL.
    pub fn connect(&mut self) {
        let url = self.config.url.clone();
        self.connect_to(url);
    }

    /// Connect to `url`, replacing any current connection.
    pub fn connect_to(&mut self, url: impl Into<String>) {
        self.connection.connect(url);
        self.publish();
    }

    /// Close the connection and stop reconnecting.
    pub fn close(&mut self) {
        self.connection.close();
        self.execution.on_disconnect();
        self.publish();
    }

    /// Submit instructions, code or a chat turn over the connection.
    ///
    /// # Errors
    /// Returns [`ExecutionError::NotConnected`] or [`ExecutionError::Busy`]
    /// when the submission is refused (state untouched, rejected flag set),
    /// and [`ExecutionError::ConnectionLost`] if the frame could not be
    /// handed to the transport.
    pub fn submit(&mut self, submission: Submission) -> Result<(), ExecutionError> {
        let result = self.try_submit(submission);
        if let Err(e) = &result {
            if e.is_rejection() {
                self.execution.reject(e);
            }
        }
        self.publish();
        result
    }

    fn try_submit(&mut self, submission: Submission) -> Result<(), ExecutionError> {
        if !self.connection.is_open() {
            return Err(ExecutionError::NotConnected);
        }
        if self.execution.is_executing() {
            return Err(ExecutionError::Busy);
        }

        let frame = match submission {
            Submission::Instructions(text) => {
                ClientFrame::execute_instructions(text, self.active_id())
            }
            Submission::Code(code) => ClientFrame::execute_code(code, self.active_id()),
            Submission::Chat(text) => {
                let id = self.ensure_active_conversation();
                // The backend stores the turn but does not send it back.
                self.store.append_message(Message::human(text.clone()));
                ClientFrame::chat(text, id)
            }
        };
        self.start_execution()?;

        if self.connection.send(&frame) {
            Ok(())
        } else {
            self.execution.fail(ExecutionError::ConnectionLost);
            Err(ExecutionError::ConnectionLost)
        }
    }

    fn active_id(&self) -> Option<ConversationId> {
        self.store.active_id().map(str::to_string)
    }

    fn start_execution(&mut self) -> Result<u64, ExecutionError> {
        self.execution.start_in(self.active_id())?;
        self.execution_seq = self.execution_seq.wrapping_add(1);
        Ok(self.execution_seq)
    }

    /// The active conversation, or a new locally created one.
    fn ensure_active_conversation(&mut self) -> ConversationId {
        if let Some(id) = self.store.active_id() {
            return id.to_string();
        }
        let id = uuid::Uuid::new_v4().to_string();
        tracing::info!(conversation_id = %id, "Starting conversation");
        self.store
            .create_conversation(id.clone(), self.config.placeholder_summary.clone());
        id
    }

    /// Make a listed conversation active and request its history.
    ///
    /// Returns `false` if the connection is not open or the id is unknown.
    pub fn select_conversation(&mut self, id: &str) -> bool {
        if !self.connection.is_open() {
            tracing::debug!(conversation_id = id, "Not connected; selection ignored");
            return false;
        }
        if !self.store.select_conversation(id) {
            return false;
        }
        let sent = self.connection.send(&ClientFrame::load_conversation(id));
        self.publish();
        sent
    }

    /// Ask again for the active conversation's history, e.g. after the
    /// connection was re-established.
    fn reload_active(&mut self) {
        let Some(id) = self.active_id() else {
            return;
        };
        tracing::debug!(conversation_id = %id, "Reloading active conversation");
        if self.store.select_conversation(&id) {
            self.connection.send(&ClientFrame::load_conversation(id));
        }
    }

    /// Ask the backend for a new conversation. The reply activates it.
    pub fn new_conversation(&self) -> bool {
        self.connection.send(&ClientFrame::new_conversation())
    }

    /// Ask the backend for the conversation index.
    pub fn refresh_conversations(&self) -> bool {
        self.connection.send(&ClientFrame::get_conversations())
    }

    /// Submit code through the HTTP fallback.
    ///
    /// The request runs on its own task; completion is picked up by the
    /// driver loop.
    ///
    /// # Errors
    /// Returns [`ExecutionError::Busy`] while an execution is running and
    /// [`ExecutionError::Http`] if no HTTP endpoint is configured.
    pub fn execute_via_http(&mut self, code: impl Into<String>) -> Result<(), ExecutionError> {
        let Some(http) = self.http.clone() else {
            let err = ExecutionError::Http("HTTP fallback not configured".into());
            self.execution.reject(&err);
            self.publish();
            return Err(err);
        };
        let execution = match self.start_execution() {
            Ok(seq) => seq,
            Err(e) => {
                self.publish();
                return Err(e);
            }
        };
        self.publish();

        let code = code.into();
        let done = self.http_tx.clone();
        tokio::spawn(async move {
            let result = http.execute(&code).await;
            let _ = done.send(HttpCompletion { execution, result });
        });
        Ok(())
    }

    fn on_http_completion(&mut self, completion: HttpCompletion) {
        if completion.execution != self.execution_seq || !self.execution.is_executing() {
            tracing::debug!("HTTP completion for a finished execution ignored");
            return;
        }
        match completion.result {
            Ok(()) => self.execution.finish(),
            Err(e) => self.execution.fail(e),
        }
        self.publish();
    }

    /// Apply a connection event to the session.
    pub fn handle_connection_event(&mut self, event: &ConnectionEvent) {
        match event {
            ConnectionEvent::Open => {
                if self.config.refresh_on_open {
                    self.refresh_conversations();
                    self.reload_active();
                }
            }
            ConnectionEvent::Message(raw) => {
                if let Ok(routed) = self
                    .router
                    .route(raw, &mut self.store, &mut self.execution)
                {
                    tracing::trace!(kind = routed.kind, applied = routed.applied, "Frame routed");
                }
            }
            ConnectionEvent::Close => {
                if self.execution.on_disconnect() {
                    tracing::warn!("Connection lost during execution");
                }
            }
            ConnectionEvent::Reconnecting { .. } | ConnectionEvent::Connecting { .. } => {}
        }
        self.publish();
    }

    /// Wait for the next connection event, apply it and publish.
    ///
    /// Cancel-safe.
    pub async fn next_connection_event(&mut self) -> ConnectionEvent {
        let event = self.connection.next_event().await;
        self.handle_connection_event(&event);
        event
    }

    fn publish(&self) {
        self.publisher.publish(Projection::capture(
            self.connection.snapshot(),
            &self.store,
            &self.execution,
        ));
    }

    fn apply(&mut self, intent: Intent) {
        tracing::debug!(?intent, "Handling intent");
        match intent {
            Intent::Connect(Some(url)) => self.connect_to(url),
            Intent::Connect(None) => self.connect(),
            Intent::Submit(submission) => {
                let _ = self.submit(submission);
            }
            Intent::SelectConversation(id) => {
                self.select_conversation(&id);
            }
            Intent::NewConversation => {
                self.new_conversation();
            }
            Intent::RefreshConversations => {
                self.refresh_conversations();
            }
            Intent::ExecuteViaHttp(code) => {
                let _ = self.execute_via_http(code);
            }
            Intent::Close => self.close(),
        }
    }

    /// Drive the session on a new task.
    ///
    /// The task ends once every [`SessionHandle`] is dropped.
    #[must_use]
    pub fn spawn(config: SessionConfig, connector: impl Into<Arc<C>>) -> (SessionHandle, JoinHandle<()>) {
        let facade = Self::new(config, connector);
        let (intents, intent_rx) = mpsc::unbounded_channel();
        let handle = SessionHandle {
            intents,
            projection: facade.subscribe(),
        };
        let task = tokio::spawn(facade.run(intent_rx));
        (handle, task)
    }

    async fn run(mut self, mut intents: mpsc::UnboundedReceiver<Intent>) {
        tracing::info!("Session driver started");
        loop {
            tokio::select! {
                intent = intents.recv() => match intent {
                    Some(intent) => self.apply(intent),
                    None => break,
                },
                event = self.connection.next_event() => self.handle_connection_event(&event),
                Some(completion) = self.http_rx.recv() => self.on_http_completion(completion),
            }
        }
        self.close();
        tracing::info!("Session driver stopped");
    }
}

/// Cloneable handle to a spawned session.
#[derive(Clone)]
pub struct SessionHandle {
    intents: mpsc::UnboundedSender<Intent>,
    projection: watch::Receiver<Projection>,
}

impl SessionHandle {
    fn send(&self, intent: Intent) -> Result<(), SessionClosed> {
        self.intents.send(intent).map_err(|_| SessionClosed)
    }

    /// # Errors
    /// Returns error if the session driver has stopped.
    pub fn connect(&self) -> Result<(), SessionClosed> {
        self.send(Intent::Connect(None))
    }

    /// # Errors
    /// Returns error if the session driver has stopped.
    pub fn connect_to(&self, url: impl Into<String>) -> Result<(), SessionClosed> {
        self.send(Intent::Connect(Some(url.into())))
    }

    /// Refusals show up as `submit_rejected` in the projection.
    ///
    /// # Errors
    /// Returns error if the session driver has stopped.
    pub fn submit(&self, submission: Submission) -> Result<(), SessionClosed> {
        self.send(Intent::Submit(submission))
    }

    /// # Errors
    /// Returns error if the session driver has stopped.
    pub fn select_conversation(&self, id: impl Into<ConversationId>) -> Result<(), SessionClosed> {
        self.send(Intent::SelectConversation(id.into()))
    }

    /// # Errors
    /// Returns error if the session driver has stopped.
    pub fn new_conversation(&self) -> Result<(), SessionClosed> {
        self.send(Intent::NewConversation)
    }

    /// # Errors
    /// Returns error if the session driver has stopped.
    pub fn refresh_conversations(&self) -> Result<(), SessionClosed> {
        self.send(Intent::RefreshConversations)
    }

    /// # Errors
    /// Returns error if the session driver has stopped.
    pub fn execute_via_http(&self, code: impl Into<String>) -> Result<(), SessionClosed> {
        self.send(Intent::ExecuteViaHttp(code.into()))
    }

    /// # Errors
    /// Returns error if the session driver has stopped.
    pub fn close(&self) -> Result<(), SessionClosed> {
        self.send(Intent::Close)
    }

    /// Latest projection.
    #[must_use]
    pub fn projection(&self) -> Projection {
        self.projection.borrow().clone()
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Projection> {
        self.projection.clone()
    }

    /// Wait until a projection satisfies `predicate`.
    ///
    /// # Errors
    /// Returns error if the session driver stops first.
    pub async fn wait_for(
        &self,
        mut predicate: impl FnMut(&Projection) -> bool,
    ) -> Result<Projection, SessionClosed> {
        let mut rx = self.projection.clone();
        let projection = rx
            .wait_for(|p| predicate(p))
            .await
            .map_err(|_| SessionClosed)?;
        Ok(projection.clone())
    }
}
