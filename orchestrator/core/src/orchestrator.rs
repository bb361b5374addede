//! Orchestrator - Turn Coordination
//!
//! The orchestrator owns one conversation's turn loop. It takes user text,
//! gathers the pending attachments, posts the user and placeholder entries to
//! the message sink, and streams the provider's response into the placeholder.
//!
//! # Design Philosophy
//!
//! The orchestrator is UI-agnostic. It never touches display state directly:
//! every sink or file-display mutation is posted through a [`UiHandle`], so
//! tokens produced on provider tasks are applied on the host's UI context in
//! order.
//!
//! # Turn lifecycle
//!
//! ```text
//!   prompt(text)
//!      │ blank? ──────────────────────────────► IgnoredBlank
//!      │ gate busy? ──────────────────────────► IgnoredBusy
//!      ▼
//!   take attachments ─► user entry ─► clear file display ─► placeholder
//!      │
//!      ▼ (spawned)
//!   provider stream ──token──► append_text (UI context)
//!      │
//!      ├─ Complete / channel closed ──► finish
//!      ├─ Error / failed to start ────► FAILURE_MESSAGE
//!      ├─ deadline elapsed ───────────► TIMEOUT_MESSAGE
//!      └─ cancel() ───────────────────► keep partial text
//!      ▼
//!   gate released (drop guard)
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use crate::attachment::Attachment;
use crate::config::{ConfigError, OrchestratorSettings, DEFAULT_ASSISTANT_NAME, DEFAULT_STREAM_TIMEOUT, DEFAULT_USER_NAME};
use crate::input::InputSurface;
use crate::intake::{FileIntake, FileReceiver, IntakeLimits};
use crate::messages::{AttachmentClick, AttachmentSubmission, ChatMessage, MessageId};
use crate::plugin::OrchestratorPlugin;
use crate::provider::{ProviderError, StreamingProvider, StreamingToken};
use crate::request::{resolve_system_prompt, ConversationRequest, RequestError, Tool};
use crate::sink::MessageSink;
use crate::ui::{UiError, UiHandle};

/// Shown in place of the response when the turn deadline elapses
pub const TIMEOUT_MESSAGE: &str = "The response took too long. Please try again.";

/// Shown in place of the response when the provider fails
pub const FAILURE_MESSAGE: &str = "Sorry, something went wrong while generating a response.";

// =============================================================================
// Error Types
// =============================================================================

/// Errors returned from [`Orchestrator::prompt`]
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum OrchestratorError {
    /// A message sink is wired but no UI context is available to reach it
    #[error("a message sink is configured but no UI context is available")]
    NoUiContext,

    /// The configured precondition is not met
    #[error("chat is unavailable: {0}")]
    FeatureUnavailable(String),
}

/// Why a turn ended abnormally
#[derive(Debug, Error)]
pub enum TurnError {
    /// The whole-turn deadline elapsed
    #[error("no complete response within {0:?}")]
    Timeout(Duration),

    /// The provider could not start a stream
    #[error("provider failed to start: {0}")]
    Start(#[from] ProviderError),

    /// The provider reported an error mid-stream
    #[error("stream error: {0}")]
    Stream(String),

    /// The UI context went away
    #[error("UI context detached")]
    Detached,
}

impl From<UiError> for TurnError {
    fn from(_: UiError) -> Self {
        Self::Detached
    }
}

// =============================================================================
// Turn Types
// =============================================================================

/// Orchestrator state
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TurnState {
    /// Ready for input
    Idle,
    /// A response is streaming
    Streaming,
}

impl TurnState {
    /// Human-readable description
    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            Self::Idle => "Ready",
            Self::Streaming => "Responding...",
        }
    }
}

/// How a turn ended
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TurnOutcome {
    /// The provider finished the response
    Completed,
    /// The deadline elapsed; the placeholder shows [`TIMEOUT_MESSAGE`]
    TimedOut,
    /// The provider failed; the placeholder shows [`FAILURE_MESSAGE`]
    Failed(String),
    /// The turn was cancelled; the placeholder keeps its partial text
    Cancelled,
    /// The UI context went away mid-turn
    Detached,
}

/// Result of a call to [`Orchestrator::prompt`]
#[derive(Debug)]
pub enum PromptOutcome {
    /// The text was blank; nothing happened
    IgnoredBlank,
    /// Another turn is streaming; the text was dropped
    IgnoredBusy,
    /// A turn started
    Dispatched(TurnHandle),
}

impl PromptOutcome {
    /// Whether a turn started
    #[must_use]
    pub fn is_dispatched(&self) -> bool {
        matches!(self, Self::Dispatched(_))
    }

    /// The turn handle, if a turn started
    #[must_use]
    pub fn into_handle(self) -> Option<TurnHandle> {
        match self {
            Self::Dispatched(handle) => Some(handle),
            _ => None,
        }
    }
}

/// Handle to a running turn
#[derive(Clone, Debug)]
pub struct TurnHandle {
    message_id: MessageId,
    cancel: CancellationToken,
    outcome: watch::Receiver<Option<TurnOutcome>>,
}

impl TurnHandle {
    /// Id of the user message that started the turn
    #[must_use]
    pub fn message_id(&self) -> &MessageId {
        &self.message_id
    }

    /// Stop the turn, keeping whatever text has streamed so far
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Whether the turn has reached a terminal state
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.outcome.borrow().is_some()
    }

    /// The outcome, if the turn has finished
    #[must_use]
    pub fn outcome(&self) -> Option<TurnOutcome> {
        self.outcome.borrow().clone()
    }

    /// Wait for the turn to finish
    ///
    /// The gate is already released when this returns.
    pub async fn wait(&self) -> TurnOutcome {
        let mut rx = self.outcome.clone();
        let outcome = rx.wait_for(Option::is_some).await.map(|o| (*o).clone());
        match outcome {
            Ok(Some(outcome)) => outcome,
            _ => TurnOutcome::Failed("turn task ended without reporting an outcome".to_string()),
        }
    }
}

/// Checked once per orchestrator before the first turn
pub type Precondition = Arc<dyn Fn() -> Result<(), String> + Send + Sync>;

/// Called when a turn carrying attachments is handed to the provider
pub type SubmissionListener = Arc<dyn Fn(&AttachmentSubmission) + Send + Sync>;

/// Called when an attachment on a sent message is clicked
pub type ClickListener = Arc<dyn Fn(&AttachmentClick) + Send + Sync>;

enum StreamEnd {
    Completed,
    Cancelled,
}

/// Releases the processing gate when the turn task ends, however it ends
struct GateGuard {
    orchestrator: Arc<Orchestrator>,
}

impl Drop for GateGuard {
    fn drop(&mut self) {
        self.orchestrator.current_turn.lock().take();
        self.orchestrator.processing.store(false, Ordering::Release);
        tracing::trace!(orchestrator = %self.orchestrator.instance_id, "Gate released");
    }
}

struct Turn {
    request: ConversationRequest,
    placeholder: Option<MessageId>,
    cancel: CancellationToken,
    outcome_tx: watch::Sender<Option<TurnOutcome>>,
}

// =============================================================================
// Builder
// =============================================================================

/// Builder for [`Orchestrator`]
pub struct OrchestratorBuilder {
    provider: Arc<dyn StreamingProvider>,
    system_prompt: Option<String>,
    sink: Option<Arc<dyn MessageSink>>,
    ui: Option<UiHandle>,
    input: Option<Arc<dyn InputSurface>>,
    intake: Option<Arc<FileIntake>>,
    receiver: Option<Arc<dyn FileReceiver>>,
    intake_limits: IntakeLimits,
    tools: Vec<Tool>,
    user_name: String,
    assistant_name: String,
    stream_timeout: Duration,
    plugins: Vec<Arc<dyn OrchestratorPlugin>>,
    precondition: Option<Precondition>,
    runtime: Option<Handle>,
}

impl OrchestratorBuilder {
    fn new(provider: Arc<dyn StreamingProvider>) -> Self {
        Self {
            provider,
            system_prompt: None,
            sink: None,
            ui: None,
            input: None,
            intake: None,
            receiver: None,
            intake_limits: IntakeLimits::unlimited(),
            tools: Vec::new(),
            user_name: DEFAULT_USER_NAME.to_string(),
            assistant_name: DEFAULT_ASSISTANT_NAME.to_string(),
            stream_timeout: DEFAULT_STREAM_TIMEOUT,
            plugins: Vec::new(),
            precondition: None,
            runtime: None,
        }
    }

    /// Apply loaded settings (prompt, names, timeout, intake limits)
    #[must_use]
    pub fn settings(mut self, settings: &OrchestratorSettings) -> Self {
        self.system_prompt.clone_from(&settings.system_prompt);
        self.user_name.clone_from(&settings.user_name);
        self.assistant_name.clone_from(&settings.assistant_name);
        self.stream_timeout = settings.stream_timeout;
        self.intake_limits = settings.intake;
        self
    }

    /// Set the system prompt
    #[must_use]
    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// Wire the message sink
    #[must_use]
    pub fn message_sink(mut self, sink: Arc<dyn MessageSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Wire the UI context
    #[must_use]
    pub fn ui(mut self, ui: UiHandle) -> Self {
        self.ui = Some(ui);
        self
    }

    /// Wire an input surface
    #[must_use]
    pub fn input(mut self, input: Arc<dyn InputSurface>) -> Self {
        self.input = Some(input);
        self
    }

    /// Use an existing file intake
    #[must_use]
    pub fn file_intake(mut self, intake: Arc<FileIntake>) -> Self {
        self.intake = Some(intake);
        self
    }

    /// Wire a file receiver to the intake
    ///
    /// Creates an intake with the configured limits if none was given.
    #[must_use]
    pub fn file_receiver(mut self, receiver: Arc<dyn FileReceiver>) -> Self {
        self.receiver = Some(receiver);
        self
    }

    /// Limits for an intake created by the builder
    #[must_use]
    pub fn intake_limits(mut self, limits: IntakeLimits) -> Self {
        self.intake_limits = limits;
        self
    }

    /// Add a tool
    #[must_use]
    pub fn tool(mut self, tool: Tool) -> Self {
        self.tools.push(tool);
        self
    }

    /// Add several tools
    #[must_use]
    pub fn tools(mut self, tools: impl IntoIterator<Item = Tool>) -> Self {
        self.tools.extend(tools);
        self
    }

    /// Author label for user messages
    #[must_use]
    pub fn user_name(mut self, name: impl Into<String>) -> Self {
        self.user_name = name.into();
        self
    }

    /// Author label for assistant messages
    #[must_use]
    pub fn assistant_name(mut self, name: impl Into<String>) -> Self {
        self.assistant_name = name.into();
        self
    }

    /// Whole-turn streaming deadline
    #[must_use]
    pub fn stream_timeout(mut self, timeout: Duration) -> Self {
        self.stream_timeout = timeout;
        self
    }

    /// Register a plugin
    #[must_use]
    pub fn plugin(mut self, plugin: Arc<dyn OrchestratorPlugin>) -> Self {
        self.plugins.push(plugin);
        self
    }

    /// Gate turns on a check evaluated once, on the first prompt
    #[must_use]
    pub fn precondition<F>(mut self, check: F) -> Self
    where
        F: Fn() -> Result<(), String> + Send + Sync + 'static,
    {
        self.precondition = Some(Arc::new(check));
        self
    }

    /// Runtime to spawn streaming tasks on (default: the current runtime)
    #[must_use]
    pub fn runtime_handle(mut self, handle: Handle) -> Self {
        self.runtime = Some(handle);
        self
    }

    /// Validate and build
    ///
    /// # Errors
    ///
    /// - [`ConfigError::NoRuntime`] if no runtime handle was given and none is
    ///   running
    /// - [`ConfigError::Invalid`] for a zero timeout or a blank author label
    /// - [`ConfigError::UploadHandlerAlreadySet`] if the file receiver is
    ///   already wired to something else
    pub fn build(self) -> Result<Arc<Orchestrator>, ConfigError> {
        let runtime = match self.runtime {
            Some(handle) => handle,
            None => Handle::try_current().map_err(|_| ConfigError::NoRuntime)?,
        };

        if self.stream_timeout.is_zero() {
            return Err(ConfigError::Invalid("stream timeout must be greater than zero".to_string()));
        }
        if self.user_name.trim().is_empty() || self.assistant_name.trim().is_empty() {
            return Err(ConfigError::Invalid("author labels must not be blank".to_string()));
        }

        let intake = match (self.intake, &self.receiver) {
            (Some(intake), _) => Some(intake),
            (None, Some(_)) => Some(Arc::new(FileIntake::with_limits(self.intake_limits))),
            (None, None) => None,
        };
        if let (Some(intake), Some(receiver)) = (&intake, self.receiver) {
            intake.attach_receiver(receiver)?;
        }

        if self.sink.is_some() && self.ui.is_none() {
            tracing::warn!("Message sink wired without a UI context; prompts will fail");
        }

        let orchestrator = Arc::new(Orchestrator {
            instance_id: Uuid::new_v4(),
            provider: self.provider,
            sink: self.sink,
            ui: self.ui,
            input: self.input,
            intake,
            system_prompt: RwLock::new(self.system_prompt),
            tools: self.tools,
            user_name: self.user_name,
            assistant_name: self.assistant_name,
            stream_timeout: self.stream_timeout,
            plugins: self.plugins,
            precondition: self.precondition,
            precondition_result: OnceLock::new(),
            processing: AtomicBool::new(false),
            current_turn: Mutex::new(None),
            submitted: DashMap::new(),
            submission_listeners: RwLock::new(Vec::new()),
            click_listeners: RwLock::new(Vec::new()),
            runtime,
        });

        if let Some(input) = &orchestrator.input {
            let weak = Arc::downgrade(&orchestrator);
            input.on_submit(Arc::new(move |text: String| {
                let Some(orchestrator) = weak.upgrade() else {
                    return;
                };
                match orchestrator.prompt(&text) {
                    Ok(outcome) => tracing::debug!(dispatched = outcome.is_dispatched(), "Forwarded input"),
                    Err(e) => tracing::warn!(error = %e, "Submitted input was not processed"),
                }
            }));
        }

        tracing::info!(
            orchestrator = %orchestrator.instance_id,
            provider = orchestrator.provider.name(),
            timeout_secs = orchestrator.stream_timeout.as_secs(),
            tools = orchestrator.tools.len(),
            plugins = orchestrator.plugins.len(),
            "Orchestrator ready"
        );

        Ok(orchestrator)
    }
}

// =============================================================================
// Orchestrator
// =============================================================================

/// Coordinates turns between input, provider, and display
pub struct Orchestrator {
    instance_id: Uuid,
    provider: Arc<dyn StreamingProvider>,
    sink: Option<Arc<dyn MessageSink>>,
    ui: Option<UiHandle>,
    input: Option<Arc<dyn InputSurface>>,
    intake: Option<Arc<FileIntake>>,
    /// Configured prompt; each turn resolves its own copy
    system_prompt: RwLock<Option<String>>,
    tools: Vec<Tool>,
    user_name: String,
    assistant_name: String,
    stream_timeout: Duration,
    plugins: Vec<Arc<dyn OrchestratorPlugin>>,
    precondition: Option<Precondition>,
    precondition_result: OnceLock<Result<(), String>>,
    /// The single-in-flight gate; only ever flipped with compare_exchange
    processing: AtomicBool,
    current_turn: Mutex<Option<CancellationToken>>,
    /// Attachments of sent messages, for click correlation
    submitted: DashMap<MessageId, Vec<Attachment>>,
    submission_listeners: RwLock<Vec<SubmissionListener>>,
    click_listeners: RwLock<Vec<ClickListener>>,
    runtime: Handle,
}

impl Orchestrator {
    /// Start building an orchestrator around `provider`
    pub fn builder(provider: Arc<dyn StreamingProvider>) -> OrchestratorBuilder {
        OrchestratorBuilder::new(provider)
    }

    /// Unique id of this instance (appears in logs)
    #[must_use]
    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> TurnState {
        if self.is_processing() {
            TurnState::Streaming
        } else {
            TurnState::Idle
        }
    }

    /// Whether a turn is streaming
    #[must_use]
    pub fn is_processing(&self) -> bool {
        self.processing.load(Ordering::Acquire)
    }

    /// The configured system prompt
    #[must_use]
    pub fn system_prompt(&self) -> Option<String> {
        self.system_prompt.read().clone()
    }

    /// Change the system prompt for future turns
    ///
    /// A turn that is already streaming keeps the prompt it started with.
    pub fn set_system_prompt(&self, prompt: Option<&str>) {
        *self.system_prompt.write() = prompt.map(str::to_string);
    }

    /// Whole-turn streaming deadline
    #[must_use]
    pub fn stream_timeout(&self) -> Duration {
        self.stream_timeout
    }

    /// Author label for user messages
    #[must_use]
    pub fn user_name(&self) -> &str {
        &self.user_name
    }

    /// Author label for assistant messages
    #[must_use]
    pub fn assistant_name(&self) -> &str {
        &self.assistant_name
    }

    /// Tools passed to the provider with every request
    #[must_use]
    pub fn tools(&self) -> &[Tool] {
        &self.tools
    }

    /// The wired file intake, if any
    #[must_use]
    pub fn file_intake(&self) -> Option<&Arc<FileIntake>> {
        self.intake.as_ref()
    }

    /// Submit user text
    ///
    /// Never blocks: the response streams on a spawned task. Blank text and
    /// text submitted while another turn streams are ignored, not queued.
    ///
    /// # Errors
    ///
    /// - [`OrchestratorError::FeatureUnavailable`] if the precondition fails
    /// - [`OrchestratorError::NoUiContext`] if a message sink is wired but the
    ///   UI context is missing or detached
    pub fn prompt(self: &Arc<Self>, text: &str) -> Result<PromptOutcome, OrchestratorError> {
        if text.trim().is_empty() {
            tracing::debug!(orchestrator = %self.instance_id, "Ignoring blank prompt");
            return Ok(PromptOutcome::IgnoredBlank);
        }

        self.check_precondition()?;

        if self.sink.is_some() && !self.ui.as_ref().is_some_and(UiHandle::is_attached) {
            return Err(OrchestratorError::NoUiContext);
        }

        let Some(gate) = self.try_acquire_gate() else {
            tracing::warn!(
                orchestrator = %self.instance_id,
                "Prompt ignored: a response is already streaming"
            );
            return Ok(PromptOutcome::IgnoredBusy);
        };

        self.process_user_input(gate, text)
    }

    /// Dispatch one turn; the caller holds the gate
    ///
    /// The request is built before anything is posted, so a rejected request
    /// leaves no entries behind.
    fn process_user_input(
        self: &Arc<Self>,
        gate: GateGuard,
        text: &str,
    ) -> Result<PromptOutcome, OrchestratorError> {
        let attachments = self
            .intake
            .as_ref()
            .map(|intake| intake.take_attachments())
            .unwrap_or_default();

        let user_message = ChatMessage::user(&self.user_name, text, &attachments);
        let message_id = user_message.id.clone();

        let system_prompt = resolve_system_prompt(self.system_prompt.read().as_deref());
        let request = match ConversationRequest::new(
            message_id.clone(),
            text,
            attachments,
            system_prompt.as_deref(),
            self.tools.clone(),
        ) {
            Ok(request) => request,
            Err(e @ RequestError::BlankMessage) => {
                tracing::debug!(orchestrator = %self.instance_id, error = %e, "Request rejected");
                return Ok(PromptOutcome::IgnoredBlank);
            }
        };

        if self.update_display(move |sink| sink.add_message(user_message)).is_err() {
            tracing::error!(
                orchestrator = %self.instance_id,
                dropped_attachments = request.attachments().len(),
                "UI context detached while starting a turn"
            );
            return Err(OrchestratorError::NoUiContext);
        }

        self.clear_intake_display();

        let placeholder = self.sink.as_ref().map(|_| {
            let placeholder = ChatMessage::assistant_placeholder(&self.assistant_name);
            let id = placeholder.id.clone();
            // Detach here surfaces on the first token
            let _ = self.update_display(move |sink| sink.add_message(placeholder));
            id
        });

        if !request.attachments().is_empty() {
            self.notify_submission(&message_id, request.attachments().to_vec());
        }

        for plugin in &self.plugins {
            plugin.on_request(&request);
        }

        let cancel = CancellationToken::new();
        let (outcome_tx, outcome_rx) = watch::channel(None);
        *self.current_turn.lock() = Some(cancel.clone());

        let span = tracing::info_span!(
            "turn",
            orchestrator = %self.instance_id,
            message_id = %message_id,
        );
        tracing::info!(
            parent: &span,
            attachments = request.attachments().len(),
            has_system_prompt = request.system_prompt().is_some(),
            "Dispatching turn"
        );

        let turn = Turn {
            request,
            placeholder,
            cancel: cancel.clone(),
            outcome_tx,
        };
        self.runtime
            .spawn(Arc::clone(self).run_turn(gate, turn).instrument(span));

        Ok(PromptOutcome::Dispatched(TurnHandle {
            message_id,
            cancel,
            outcome: outcome_rx,
        }))
    }

    /// Cancel the streaming turn, if any
    ///
    /// Returns whether a turn was running.
    pub fn cancel(&self) -> bool {
        match self.current_turn.lock().as_ref() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Register a listener for attachment submissions
    pub fn on_attachments_submitted<F>(&self, listener: F)
    where
        F: Fn(&AttachmentSubmission) + Send + Sync + 'static,
    {
        self.submission_listeners.write().push(Arc::new(listener));
    }

    /// Register a listener for attachment clicks
    pub fn on_attachment_clicked<F>(&self, listener: F)
    where
        F: Fn(&AttachmentClick) + Send + Sync + 'static,
    {
        self.click_listeners.write().push(Arc::new(listener));
    }

    /// Report a click on an attachment of a sent message
    ///
    /// Returns `false` if the message or attachment is unknown.
    pub fn handle_attachment_click(&self, message_id: &MessageId, name: &str) -> bool {
        let attachment = self
            .submitted
            .get(message_id)
            .and_then(|sent| sent.iter().find(|a| a.name() == name).cloned());

        let Some(attachment) = attachment else {
            tracing::debug!(message_id = %message_id, name, "Click on unknown attachment");
            return false;
        };

        let click = AttachmentClick {
            message_id: message_id.clone(),
            attachment,
        };
        let listeners = self.click_listeners.read().clone();
        for listener in listeners {
            listener(&click);
        }
        true
    }

    /// Re-register attachments of a restored history entry
    pub fn restore_attachments(&self, message_id: MessageId, attachments: Vec<Attachment>) {
        self.submitted.insert(message_id, attachments);
    }

    /// Attachments sent with a message
    #[must_use]
    pub fn submitted_attachments(&self, message_id: &MessageId) -> Option<Vec<Attachment>> {
        self.submitted.get(message_id).map(|sent| sent.clone())
    }

    fn check_precondition(&self) -> Result<(), OrchestratorError> {
        let Some(check) = &self.precondition else {
            return Ok(());
        };
        self.precondition_result
            .get_or_init(|| {
                let result = check();
                if let Err(ref reason) = result {
                    tracing::warn!(orchestrator = %self.instance_id, reason = %reason, "Chat unavailable");
                }
                result
            })
            .clone()
            .map_err(OrchestratorError::FeatureUnavailable)
    }

    fn try_acquire_gate(self: &Arc<Self>) -> Option<GateGuard> {
        self.processing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| GateGuard {
                orchestrator: Arc::clone(self),
            })
    }

    /// Post a sink update to the UI context; no-op without a sink
    fn update_display<F>(&self, update: F) -> Result<(), UiError>
    where
        F: FnOnce(&dyn MessageSink) + Send + 'static,
    {
        let (Some(sink), Some(ui)) = (&self.sink, &self.ui) else {
            return Ok(());
        };
        let sink = Arc::clone(sink);
        ui.access(move || update(sink.as_ref()))
    }

    fn clear_intake_display(&self) {
        let Some(intake) = &self.intake else {
            return;
        };
        if intake.receiver().is_none() {
            return;
        }

        let intake = Arc::clone(intake);
        match &self.ui {
            Some(ui) => {
                if ui.access(move || intake.clear_display()).is_err() {
                    tracing::warn!("UI context detached; file display not cleared");
                }
            }
            None => intake.clear_display(),
        }
    }

    fn notify_submission(&self, message_id: &MessageId, attachments: Vec<Attachment>) {
        self.submitted.insert(message_id.clone(), attachments.clone());

        let submission = AttachmentSubmission {
            message_id: message_id.clone(),
            attachments,
        };
        let listeners = self.submission_listeners.read().clone();
        for listener in listeners {
            listener(&submission);
        }
    }

    async fn run_turn(self: Arc<Self>, gate: GateGuard, turn: Turn) {
        let started = Instant::now();
        let placeholder = turn.placeholder.as_ref();

        let result = tokio::select! {
            biased;
            () = turn.cancel.cancelled() => Ok(StreamEnd::Cancelled),
            streamed = tokio::time::timeout(
                self.stream_timeout,
                self.stream_response(&turn.request, placeholder),
            ) => streamed.unwrap_or_else(|_| Err(TurnError::Timeout(self.stream_timeout))),
        };

        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        let outcome = match result {
            Ok(StreamEnd::Completed) => {
                tracing::info!(elapsed_ms, "Turn completed");
                self.finish_placeholder(placeholder, None);
                TurnOutcome::Completed
            }
            Ok(StreamEnd::Cancelled) => {
                tracing::info!(elapsed_ms, "Turn cancelled; keeping partial response");
                self.finish_placeholder(placeholder, None);
                TurnOutcome::Cancelled
            }
            Err(TurnError::Timeout(after)) => {
                tracing::warn!(timeout_secs = after.as_secs(), "Response timed out");
                self.finish_placeholder(placeholder, Some(TIMEOUT_MESSAGE));
                TurnOutcome::TimedOut
            }
            Err(TurnError::Detached) => {
                tracing::warn!(elapsed_ms, "UI context detached; stream dropped");
                TurnOutcome::Detached
            }
            Err(e) => {
                tracing::error!(error = %e, elapsed_ms, "Turn failed");
                self.finish_placeholder(placeholder, Some(FAILURE_MESSAGE));
                TurnOutcome::Failed(e.to_string())
            }
        };

        for plugin in &self.plugins {
            plugin.on_turn_finished(turn.request.message_id(), &outcome);
        }

        drop(gate);
        turn.outcome_tx.send_replace(Some(outcome));
    }

    async fn stream_response(
        &self,
        request: &ConversationRequest,
        placeholder: Option<&MessageId>,
    ) -> Result<StreamEnd, TurnError> {
        let mut rx = self.provider.send_streaming(request).await?;
        let mut token_count: u32 = 0;

        while let Some(token) = rx.recv().await {
            match token {
                StreamingToken::Token(text) => {
                    token_count = token_count.saturating_add(1);
                    if let Some(id) = placeholder {
                        let id = id.clone();
                        self.update_display(move |sink| sink.append_text(&id, &text))?;
                    }
                }
                StreamingToken::Complete => break,
                StreamingToken::Error(error) => return Err(TurnError::Stream(error)),
            }
        }

        tracing::debug!(tokens = token_count, provider = self.provider.name(), "Stream finished");
        Ok(StreamEnd::Completed)
    }

    fn finish_placeholder(&self, placeholder: Option<&MessageId>, replacement: Option<&'static str>) {
        let Some(id) = placeholder.cloned() else {
            return;
        };
        let posted = self.update_display(move |sink| {
            if let Some(text) = replacement {
                sink.replace_text(&id, text);
            }
            sink.finish_message(&id);
        });
        if posted.is_err() {
            tracing::debug!("UI context detached before the final update");
        }
    }
}
