//! The session orchestrator.
//!
//! One gesture in, an ordered stream of [`SessionState`]s out. Every state is
//! sent while the session lock is held, so the receiver sees transitions in
//! exactly the order they happened. Each accepted trigger starts a new
//! generation; asynchronous work carries the generation it was started for
//! and only commits while that generation is still current.

use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::json;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep, timeout};
use tracing::{debug, error, info, warn};
use voxagent_audio::Capture;
use voxagent_core::{ChatMessage, Config, PermissionConfig, SessionState, ToolCall, ToolResult, TriggerMode};
use voxagent_models::{ChatModel, Transcriber};

use crate::intent::IntentResolver;
use crate::tools::ToolRegistry;

const SYSTEM_PROMPT: &str = "You are a desktop voice assistant. The user has spoken a request. \
Carry it out by calling the provided tools, in the order they should run. \
If no tool is needed, answer briefly in plain text.";

/// How often `recording` is re-emitted with the elapsed time.
const TICK_INTERVAL: Duration = Duration::from_millis(250);
/// How often the input level is sampled while recording.
const LEVEL_INTERVAL: Duration = Duration::from_millis(50);
/// Tool used to insert dictated text.
const TYPE_TEXT: &str = "type_text";

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub permissions: PermissionConfig,
    /// Command and agent captures stop on their own after this long.
    pub max_recording: Duration,
    /// Shorter clips are treated as no audio.
    pub discard_duration: Duration,
    /// A tool call still running after this long counts as failed.
    pub tool_timeout: Duration,
    /// How long `done` stays up before returning to idle.
    pub done_delay: Duration,
    /// How long `error` stays up before returning to idle.
    pub error_delay: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            permissions: PermissionConfig::default(),
            max_recording: Duration::from_secs(15),
            discard_duration: Duration::from_millis(300),
            tool_timeout: Duration::from_secs(60),
            done_delay: Duration::from_secs(2),
            error_delay: Duration::from_secs(3),
        }
    }
}

impl SessionSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            permissions: config.permissions,
            max_recording: config.max_recording(),
            discard_duration: config.discard_duration(),
            tool_timeout: config.tool_timeout(),
            ..Default::default()
        }
    }
}

/// Everything a session talks to.
pub struct Collaborators {
    pub capture: Arc<dyn Capture>,
    pub transcriber: Arc<dyn Transcriber>,
    pub chat: Arc<dyn ChatModel>,
    pub intents: IntentResolver,
    pub tools: Arc<ToolRegistry>,
}

/// Handle to the orchestrator. Cheap to clone.
///
/// Policy while a session is running: triggers are ignored until the session
/// is idle again, except that a trigger during a command or agent recording
/// stops that recording. A new session also waits until the capture device
/// is free, so a start or stop still in flight from an abandoned session
/// never overlaps the next one.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    capture: Arc<dyn Capture>,
    transcriber: Arc<dyn Transcriber>,
    chat: Arc<dyn ChatModel>,
    intents: IntentResolver,
    tools: Arc<ToolRegistry>,
    settings: SessionSettings,
    runtime: Handle,
    states: mpsc::UnboundedSender<SessionState>,
    levels: watch::Sender<f32>,
    session: Mutex<Session>,
}

#[derive(Default)]
struct Session {
    state: SessionState,
    generation: u64,
    starting: Option<PendingStart>,
    /// A capture stop is in flight.
    stopping: bool,
    recording: Option<ActiveRecording>,
    auto_idle: Option<JoinHandle<()>>,
}

impl Session {
    /// The capture start in flight for the current generation, if any.
    fn pending_start(&mut self) -> Option<&mut PendingStart> {
        let generation = self.generation;
        self.starting.as_mut().filter(|p| p.generation == generation)
    }
}

/// A `Capture::start` that has not returned yet.
struct PendingStart {
    generation: u64,
    mode: TriggerMode,
    /// Release or stop arrived first; stop as soon as capture is up.
    stop_requested: bool,
}

struct ActiveRecording {
    mode: TriggerMode,
    /// Ticker, level meter and recording limit.
    tasks: Vec<JoinHandle<()>>,
}

impl ActiveRecording {
    fn abort(self) {
        for task in self.tasks {
            task.abort();
        }
    }
}

impl Orchestrator {
    /// Creates an idle orchestrator. Background work is spawned on `runtime`.
    pub fn new(
        collaborators: Collaborators,
        settings: SessionSettings,
        runtime: Handle,
    ) -> (Self, mpsc::UnboundedReceiver<SessionState>) {
        let (states, receiver) = mpsc::unbounded_channel();
        let (levels, _) = watch::channel(0.0);
        let inner = Inner {
            capture: collaborators.capture,
            transcriber: collaborators.transcriber,
            chat: collaborators.chat,
            intents: collaborators.intents,
            tools: collaborators.tools,
            settings,
            runtime,
            states,
            levels,
            session: Mutex::new(Session::default()),
        };
        (
            Self {
                inner: Arc::new(inner),
            },
            receiver,
        )
    }

    pub fn state(&self) -> SessionState {
        self.inner.session.lock().state.clone()
    }

    /// Input level in `0.0..=1.0`, updated while recording.
    pub fn levels(&self) -> watch::Receiver<f32> {
        self.inner.levels.subscribe()
    }

    pub fn trigger(&self, mode: TriggerMode) {
        let mut session = self.inner.session.lock();

        if let Some(recording) = session.recording.as_ref().map(|r| r.mode) {
            if recording.is_self_terminating() {
                debug!(%mode, "Trigger stops the recording");
                self.inner.stop_recording(&mut session);
            } else {
                debug!(%mode, "Trigger ignored while dictating");
            }
            return;
        }
        if let Some(pending) = session.pending_start() {
            if pending.mode.is_self_terminating() {
                debug!(%mode, "Trigger stops the recording once capture is up");
                pending.stop_requested = true;
            } else {
                debug!(%mode, "Trigger ignored, capture is starting");
            }
            return;
        }
        if session.starting.is_some() || session.stopping {
            debug!(%mode, "Trigger ignored, capture device is busy");
            return;
        }
        if !session.state.accepts_trigger() {
            debug!(%mode, state = %session.state, "Trigger ignored, session busy");
            return;
        }

        if let Some(auto_idle) = session.auto_idle.take() {
            auto_idle.abort();
        }
        session.generation += 1;
        let generation = session.generation;
        session.starting = Some(PendingStart {
            generation,
            mode,
            stop_requested: false,
        });
        info!(%mode, generation, "Session started");

        let inner = self.inner.clone();
        self.inner
            .runtime
            .spawn(async move { inner.start_recording(generation, mode).await });
    }

    /// The dictation key was let go.
    pub fn release(&self) {
        let mut session = self.inner.session.lock();
        match session.recording.as_ref().map(|r| r.mode) {
            Some(TriggerMode::Dictation) => self.inner.stop_recording(&mut session),
            Some(_) => {}
            None => {
                if let Some(pending) = session
                    .pending_start()
                    .filter(|p| p.mode == TriggerMode::Dictation)
                {
                    debug!("Release arrived before capture started");
                    pending.stop_requested = true;
                }
            }
        }
    }

    /// Stops the current recording, whatever its mode.
    pub fn stop(&self) {
        let mut session = self.inner.session.lock();
        if session.recording.is_some() {
            self.inner.stop_recording(&mut session);
        } else if let Some(pending) = session.pending_start() {
            pending.stop_requested = true;
        }
    }

    /// Abandons the current session and returns to idle. Results still in
    /// flight are discarded when they arrive.
    pub fn cancel(&self) {
        let mut session = self.inner.session.lock();
        session.generation += 1;
        if let Some(auto_idle) = session.auto_idle.take() {
            auto_idle.abort();
        }
        if let Some(active) = session.recording.take() {
            active.abort();
            self.inner.discard_capture(&mut session);
        }
        self.inner.levels.send_replace(0.0);
        if session.state != SessionState::Idle {
            info!(generation = session.generation, "Session cancelled");
            self.inner.set(&mut session, SessionState::Idle);
        }
    }
}

impl Inner {
    /// Publish `state`. Only call with the session lock held.
    fn set(&self, session: &mut Session, state: SessionState) {
        info!(state = %state, generation = session.generation, "Session state");
        session.state = state.clone();
        if self.states.send(state).is_err() {
            debug!("Nobody is listening for session states");
        }
    }

    /// Publish `state`, scheduling the return to idle for terminal states.
    fn enter(self: &Arc<Self>, session: &mut Session, state: SessionState) {
        let delay = match &state {
            SessionState::Done { .. } => Some(self.settings.done_delay),
            SessionState::Error { .. } => Some(self.settings.error_delay),
            _ => None,
        };
        self.set(session, state);

        if let Some(delay) = delay {
            if let Some(previous) = session.auto_idle.take() {
                previous.abort();
            }
            let generation = session.generation;
            let inner: Weak<Inner> = Arc::downgrade(self);
            session.auto_idle = Some(self.runtime.spawn(async move {
                sleep(delay).await;
                let Some(inner) = inner.upgrade() else { return };
                let mut session = inner.session.lock();
                if session.generation == generation && session.state.is_terminal() {
                    session.auto_idle = None;
                    inner.set(&mut session, SessionState::Idle);
                }
            }));
        }
    }

    /// Enter `state` if `generation` is still current.
    fn commit(self: &Arc<Self>, generation: u64, state: SessionState) -> bool {
        let mut session = self.session.lock();
        if session.generation != generation {
            debug!(generation, current = session.generation, state = %state, "Dropping stale result");
            return false;
        }
        self.enter(&mut session, state);
        true
    }

    fn fail(self: &Arc<Self>, generation: u64, message: impl Into<String>) {
        self.commit(
            generation,
            SessionState::Error {
                message: message.into(),
            },
        );
    }

    fn is_current(&self, generation: u64) -> bool {
        self.session.lock().generation == generation
    }

    async fn start_recording(self: &Arc<Self>, generation: u64, mode: TriggerMode) {
        let started = self.capture.start().await;

        let mut session = self.session.lock();
        // New triggers wait while a start is pending, so this one is ours.
        let stop_requested = session.starting.take().is_some_and(|p| p.stop_requested);
        if session.generation != generation {
            if started.is_ok() {
                self.discard_capture(&mut session);
            }
            return;
        }

        if let Err(e) = started {
            error!(%mode, "Failed to start recording: {}", e);
            self.enter(
                &mut session,
                SessionState::Error {
                    message: e.to_string(),
                },
            );
            return;
        }

        let tasks = self.spawn_recording_tasks(generation, mode);
        session.recording = Some(ActiveRecording { mode, tasks });
        self.enter(&mut session, SessionState::Recording { mode, elapsed_ms: 0 });

        if stop_requested {
            debug!(%mode, "Stopping recording requested during capture start");
            self.stop_recording(&mut session);
        }
    }

    fn spawn_recording_tasks(self: &Arc<Self>, generation: u64, mode: TriggerMode) -> Vec<JoinHandle<()>> {
        let started = Instant::now();
        let mut tasks = Vec::with_capacity(3);

        let inner = self.clone();
        tasks.push(self.runtime.spawn(async move {
            loop {
                sleep(TICK_INTERVAL).await;
                let mut session = inner.session.lock();
                if session.generation != generation || session.recording.is_none() {
                    break;
                }
                let elapsed_ms = started.elapsed().as_millis() as u64;
                inner.set(&mut session, SessionState::Recording { mode, elapsed_ms });
            }
        }));

        let inner = self.clone();
        tasks.push(self.runtime.spawn(async move {
            loop {
                inner.levels.send_replace(inner.capture.level().clamp(0.0, 1.0));
                sleep(LEVEL_INTERVAL).await;
            }
        }));

        if mode.is_self_terminating() {
            let inner = self.clone();
            let limit = self.settings.max_recording;
            tasks.push(self.runtime.spawn(async move {
                sleep(limit).await;
                let mut session = inner.session.lock();
                if session.generation == generation {
                    info!(?limit, "Recording limit reached");
                    inner.stop_recording(&mut session);
                }
            }));
        }

        tasks
    }

    /// Stop capture and hand the clip to the rest of the pipeline.
    fn stop_recording(self: &Arc<Self>, session: &mut Session) {
        let Some(active) = session.recording.take() else {
            return;
        };
        let mode = active.mode;
        active.abort();
        self.levels.send_replace(0.0);
        session.stopping = true;

        let generation = session.generation;
        let inner = self.clone();
        self.runtime
            .spawn(async move { inner.finish_recording(generation, mode).await });
    }

    /// Stop capture and throw the audio away.
    fn discard_capture(self: &Arc<Self>, session: &mut Session) {
        session.stopping = true;
        let inner = self.clone();
        self.runtime.spawn(async move {
            if let Err(e) = inner.capture.stop().await {
                debug!("Failed to stop discarded recording: {}", e);
            }
            inner.session.lock().stopping = false;
        });
    }

    async fn finish_recording(self: &Arc<Self>, generation: u64, mode: TriggerMode) {
        let stopped = self.capture.stop().await;
        self.session.lock().stopping = false;

        let clip = match stopped {
            Ok(clip) => clip,
            Err(e) => {
                error!(%mode, "Failed to stop recording: {}", e);
                self.fail(generation, e.to_string());
                return;
            }
        };

        let clip = match clip {
            Some(clip) if !clip.is_empty() && clip.duration() >= self.settings.discard_duration => clip,
            other => {
                info!(
                    duration = ?other.as_ref().map(|c| c.duration()),
                    discard_duration = ?self.settings.discard_duration,
                    "Discarding empty recording"
                );
                self.commit(generation, SessionState::Idle);
                return;
            }
        };

        info!(
            bytes = clip.data().len(),
            length_seconds = clip.duration().as_secs_f64(),
            "Audio captured"
        );
        if !self.commit(generation, SessionState::Transcribing { mode }) {
            return;
        }

        let transcript = match self.transcriber.transcribe(clip.data(), clip.mime_type()).await {
            Ok(transcript) => transcript,
            Err(e) => {
                error!(transcriber = self.transcriber.name(), "Transcription failed: {}", e);
                self.fail(generation, e.to_string());
                return;
            }
        };
        info!(
            language = %transcript.language,
            duration_ms = transcript.duration_ms,
            "Transcription completed"
        );

        let text = transcript.text.trim();
        if text.is_empty() {
            warn!("No speech recognized");
            self.fail(generation, "no speech recognized");
            return;
        }

        if mode == TriggerMode::Dictation {
            self.insert_text(generation, text).await;
            return;
        }

        if !self.commit(
            generation,
            SessionState::Thinking {
                transcript: text.to_owned(),
            },
        ) {
            return;
        }
        // Command mode may still turn out to be dictation. Classification
        // can take a model round trip, which is shown as `thinking`.
        if self.intents.resolve(text, Some(mode)).await.is_command() {
            self.run_model(generation, text).await;
        } else {
            self.insert_text(generation, text).await;
        }
    }

    async fn insert_text(self: &Arc<Self>, generation: u64, text: &str) {
        if !self.is_current(generation) {
            return;
        }
        let call = ToolCall {
            id: format!("dictation-{}", generation),
            name: TYPE_TEXT.to_owned(),
            arguments: json!({ "text": text }),
        };
        let result = self.execute_gated(&call).await;

        if result.success {
            self.commit(
                generation,
                SessionState::Done {
                    result_summary: "text inserted".to_owned(),
                },
            );
        } else {
            let message = result
                .error
                .unwrap_or_else(|| "failed to insert text".to_owned());
            self.fail(generation, message);
        }
    }

    /// Ask the chat model and run the tools it calls for.
    async fn run_model(self: &Arc<Self>, generation: u64, text: &str) {
        if !self.is_current(generation) {
            return;
        }

        let messages = [ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(text)];
        let definitions = self.tools.definitions();
        let response = match self.chat.chat(&messages, &definitions).await {
            Ok(response) => response,
            Err(e) => {
                error!(model = self.chat.name(), "Chat request failed: {}", e);
                self.fail(generation, e.to_string());
                return;
            }
        };

        if response.tool_calls.is_empty() {
            let summary = response
                .content
                .map(|c| c.trim().to_owned())
                .filter(|c| !c.is_empty())
                .unwrap_or_else(|| "nothing to do".to_owned());
            self.commit(generation, SessionState::Done { result_summary: summary });
            return;
        }

        let total = response.tool_calls.len();
        let mut results: Vec<ToolResult> = Vec::with_capacity(total);
        for (index, call) in response.tool_calls.iter().enumerate() {
            let executing = SessionState::Executing {
                tool_name: call.name.clone(),
                step_index: index + 1,
                total_steps: total,
            };
            if !self.commit(generation, executing) {
                return;
            }
            results.push(self.execute_gated(call).await);
        }

        let succeeded = results.iter().filter(|r| r.success).count();
        info!(succeeded, total, "Tool calls finished");
        self.commit(
            generation,
            SessionState::Done {
                result_summary: format!("completed {} of {} steps", succeeded, total),
            },
        );
    }

    /// Runs a tool call if its tier is allowed, giving up after the tool
    /// timeout.
    async fn execute_gated(&self, call: &ToolCall) -> ToolResult {
        if let Some(tool) = self.tools.get(&call.name) {
            let tier = tool.permission_tier();
            if !self.settings.permissions.allows(tier) {
                warn!(tool = %call.name, %tier, "Tool call not permitted");
                return ToolResult::failed(format!(
                    "tool \"{}\" is not permitted ({} tier)",
                    call.name, tier
                ));
            }
        }

        debug!(tool = %call.name, id = %call.id, "Executing tool call");
        let limit = self.settings.tool_timeout;
        match timeout(limit, self.tools.execute(&call.name, call.arguments.clone())).await {
            Ok(result) => result,
            Err(_) => {
                warn!(tool = %call.name, ?limit, "Tool call timed out");
                ToolResult::failed(format!("tool \"{}\" timed out after {:?}", call.name, limit))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use serde_json::Value;
    use voxagent_audio::{AudioClip, CaptureError};
    use voxagent_core::{ChatResponse, PermissionTier, ToolDefinition};
    use voxagent_models::{ChatError, TranscribeError, Transcript};

    use super::*;
    use crate::tools::{Tool, ToolError};

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    struct FakeCapture {
        fail_start: bool,
        clip: Option<AudioClip>,
    }

    #[async_trait]
    impl Capture for FakeCapture {
        async fn start(&self) -> voxagent_audio::Result<()> {
            if self.fail_start {
                Err(CaptureError::NoInputDevice)
            } else {
                Ok(())
            }
        }

        async fn stop(&self) -> voxagent_audio::Result<Option<AudioClip>> {
            Ok(self.clip.clone())
        }

        fn level(&self) -> f32 {
            0.5
        }
    }

    /// Takes a while to open the device and counts starts and stops.
    struct SlowCapture {
        start_delay: Duration,
        starts: AtomicUsize,
        stops: AtomicUsize,
    }

    impl SlowCapture {
        fn new(start_delay: Duration) -> Self {
            Self {
                start_delay,
                starts: AtomicUsize::new(0),
                stops: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Capture for SlowCapture {
        async fn start(&self) -> voxagent_audio::Result<()> {
            sleep(self.start_delay).await;
            self.starts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn stop(&self) -> voxagent_audio::Result<Option<AudioClip>> {
            self.stops.fetch_add(1, Ordering::SeqCst);
            Ok(clip())
        }

        fn level(&self) -> f32 {
            0.0
        }
    }

    struct FakeTranscriber {
        text: &'static str,
        delay: Duration,
        fail: bool,
    }

    #[async_trait]
    impl Transcriber for FakeTranscriber {
        async fn transcribe(&self, _audio: &[u8], _mime_type: &str) -> Result<Transcript, TranscribeError> {
            sleep(self.delay).await;
            if self.fail {
                return Err(TranscribeError::ApiError("quota exceeded".into()));
            }
            Ok(Transcript {
                text: self.text.to_owned(),
                confidence: 1.0,
                language: "en".to_owned(),
                duration_ms: self.delay.as_millis() as u64,
            })
        }

        fn name(&self) -> &str {
            "fake"
        }
    }

    struct FakeChat {
        /// `None` fails every request.
        response: Option<ChatResponse>,
        calls: Mutex<Vec<Vec<ToolDefinition>>>,
    }

    impl FakeChat {
        fn answering(response: ChatResponse) -> Self {
            Self {
                response: Some(response),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn failing() -> Self {
            Self {
                response: None,
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ChatModel for FakeChat {
        async fn chat(
            &self,
            _messages: &[ChatMessage],
            tools: &[ToolDefinition],
        ) -> Result<ChatResponse, ChatError> {
            self.calls.lock().push(tools.to_vec());
            self.response
                .clone()
                .ok_or_else(|| ChatError::ApiError("rate limited".into()))
        }

        fn name(&self) -> &str {
            "fake"
        }
    }

    /// Never finishes.
    struct StuckTool;

    #[async_trait]
    impl Tool for StuckTool {
        fn name(&self) -> &str {
            "stuck"
        }

        fn description(&self) -> &str {
            "waits forever"
        }

        fn parameters(&self) -> Value {
            json!({"type": "object"})
        }

        fn permission_tier(&self) -> PermissionTier {
            PermissionTier::Basic
        }

        async fn execute(&self, _args: Value) -> Result<Option<Value>, ToolError> {
            std::future::pending::<Result<Option<Value>, ToolError>>().await
        }
    }

    type CallLog = Arc<Mutex<Vec<(String, Value)>>>;

    struct LoggingTool {
        name: &'static str,
        tier: PermissionTier,
        fail: bool,
        log: CallLog,
    }

    #[async_trait]
    impl Tool for LoggingTool {
        fn name(&self) -> &str {
            self.name
        }

        fn description(&self) -> &str {
            "records its calls"
        }

        fn parameters(&self) -> Value {
            json!({"type": "object"})
        }

        fn permission_tier(&self) -> PermissionTier {
            self.tier
        }

        async fn execute(&self, args: Value) -> Result<Option<Value>, ToolError> {
            self.log.lock().push((self.name.to_owned(), args));
            if self.fail {
                Err(ToolError::Process("boom".into()))
            } else {
                Ok(None)
            }
        }
    }

    struct Harness {
        orchestrator: Orchestrator,
        states: mpsc::UnboundedReceiver<SessionState>,
        chat: Arc<FakeChat>,
        tools: Arc<ToolRegistry>,
        log: CallLog,
    }

    impl Harness {
        fn drain(&mut self) -> Vec<SessionState> {
            let mut states = Vec::new();
            while let Ok(state) = self.states.try_recv() {
                states.push(state);
            }
            states
        }
    }

    fn clip() -> Option<AudioClip> {
        Some(AudioClip::wav(vec![0; 64], Duration::from_secs(1)))
    }

    fn harness(capture: FakeCapture, transcriber: FakeTranscriber, response: ChatResponse) -> Harness {
        harness_with(
            Arc::new(capture),
            transcriber,
            FakeChat::answering(response),
            SessionSettings::default(),
        )
    }

    fn harness_with(
        capture: Arc<dyn Capture>,
        transcriber: FakeTranscriber,
        chat: FakeChat,
        settings: SessionSettings,
    ) -> Harness {
        let log = CallLog::default();
        let tools = Arc::new(ToolRegistry::new());
        for (name, tier, fail) in [
            ("type_text", PermissionTier::Basic, false),
            ("flaky", PermissionTier::System, true),
            ("notes", PermissionTier::System, false),
            ("shell", PermissionTier::Dangerous, false),
        ] {
            tools.register(Arc::new(LoggingTool {
                name,
                tier,
                fail,
                log: log.clone(),
            }));
        }

        let chat = Arc::new(chat);
        let collaborators = Collaborators {
            capture,
            transcriber: Arc::new(transcriber),
            chat: chat.clone(),
            intents: IntentResolver::rules_only(),
            tools: tools.clone(),
        };
        let (orchestrator, states) = Orchestrator::new(collaborators, settings, Handle::current());
        Harness {
            orchestrator,
            states,
            chat,
            tools,
            log,
        }
    }

    fn working_capture() -> FakeCapture {
        FakeCapture {
            fail_start: false,
            clip: clip(),
        }
    }

    fn saying(text: &'static str) -> FakeTranscriber {
        FakeTranscriber {
            text,
            delay: Duration::ZERO,
            fail: false,
        }
    }

    fn call(id: &str, name: &str) -> ToolCall {
        ToolCall {
            id: id.to_owned(),
            name: name.to_owned(),
            arguments: json!({}),
        }
    }

    fn done(summary: &str) -> SessionState {
        SessionState::Done {
            result_summary: summary.to_owned(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_dictation_types_transcript() {
        let mut h = harness(working_capture(), saying(" hello world "), ChatResponse::default());

        h.orchestrator.trigger(TriggerMode::Dictation);
        sleep(ms(10)).await;
        h.orchestrator.release();
        sleep(ms(10)).await;

        assert_eq!(
            h.drain(),
            vec![
                SessionState::Recording {
                    mode: TriggerMode::Dictation,
                    elapsed_ms: 0
                },
                SessionState::Transcribing {
                    mode: TriggerMode::Dictation
                },
                done("text inserted"),
            ]
        );
        assert_eq!(
            *h.log.lock(),
            vec![("type_text".to_owned(), json!({"text": "hello world"}))]
        );
        assert!(h.chat.calls.lock().is_empty());

        sleep(ms(2000)).await;
        assert_eq!(h.drain(), vec![SessionState::Idle]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tool_calls_run_in_order_past_failures() {
        let response = ChatResponse::with_tool_calls(vec![call("1", "flaky"), call("2", "notes")]);
        let mut h = harness(working_capture(), saying("open notes"), response);

        h.orchestrator.trigger(TriggerMode::Agent);
        sleep(ms(10)).await;
        // A second gesture is the explicit stop.
        h.orchestrator.trigger(TriggerMode::Command);
        sleep(ms(10)).await;

        assert_eq!(
            h.drain(),
            vec![
                SessionState::Recording {
                    mode: TriggerMode::Agent,
                    elapsed_ms: 0
                },
                SessionState::Transcribing {
                    mode: TriggerMode::Agent
                },
                SessionState::Thinking {
                    transcript: "open notes".to_owned()
                },
                SessionState::Executing {
                    tool_name: "flaky".to_owned(),
                    step_index: 1,
                    total_steps: 2
                },
                SessionState::Executing {
                    tool_name: "notes".to_owned(),
                    step_index: 2,
                    total_steps: 2
                },
                done("completed 1 of 2 steps"),
            ]
        );
        let names: Vec<String> = h.log.lock().iter().map(|(n, _)| n.clone()).collect();
        assert_eq!(names, vec!["flaky", "notes"]);

        let calls = h.chat.calls.lock();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_transcript_is_an_error() {
        let mut h = harness(working_capture(), saying("   "), ChatResponse::text("unused"));

        h.orchestrator.trigger(TriggerMode::Agent);
        sleep(ms(10)).await;
        h.orchestrator.stop();
        sleep(ms(10)).await;

        let states = h.drain();
        assert_eq!(
            states.last(),
            Some(&SessionState::Error {
                message: "no speech recognized".to_owned()
            })
        );
        assert!(!states.iter().any(|s| matches!(s, SessionState::Thinking { .. })));
        assert!(h.chat.calls.lock().is_empty());

        sleep(ms(2400)).await;
        assert!(h.drain().is_empty());
        sleep(ms(700)).await;
        assert_eq!(h.drain(), vec![SessionState::Idle]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_or_short_audio_returns_to_idle() {
        let capture = FakeCapture {
            fail_start: false,
            clip: None,
        };
        let mut h = harness(capture, saying("hello"), ChatResponse::default());
        h.orchestrator.trigger(TriggerMode::Dictation);
        sleep(ms(10)).await;
        h.orchestrator.release();
        sleep(ms(10)).await;
        assert_eq!(
            h.drain(),
            vec![
                SessionState::Recording {
                    mode: TriggerMode::Dictation,
                    elapsed_ms: 0
                },
                SessionState::Idle,
            ]
        );

        let capture = FakeCapture {
            fail_start: false,
            clip: Some(AudioClip::wav(vec![0; 64], ms(100))),
        };
        let mut h = harness(capture, saying("hello"), ChatResponse::default());
        h.orchestrator.trigger(TriggerMode::Dictation);
        sleep(ms(10)).await;
        h.orchestrator.release();
        sleep(ms(10)).await;
        assert_eq!(h.drain().last(), Some(&SessionState::Idle));
        assert!(h.log.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_capture_failure_is_an_error() {
        let capture = FakeCapture {
            fail_start: true,
            clip: None,
        };
        let mut h = harness(capture, saying("hello"), ChatResponse::default());

        h.orchestrator.trigger(TriggerMode::Command);
        sleep(ms(10)).await;
        assert_eq!(
            h.drain(),
            vec![SessionState::Error {
                message: "no input device available".to_owned()
            }]
        );

        sleep(ms(3000)).await;
        assert_eq!(h.drain(), vec![SessionState::Idle]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_denied_tier_is_not_permitted() {
        let response = ChatResponse::with_tool_calls(vec![call("1", "shell")]);
        let mut h = harness(working_capture(), saying("run the build script"), response);

        h.orchestrator.trigger(TriggerMode::Agent);
        sleep(ms(10)).await;
        h.orchestrator.stop();
        sleep(ms(10)).await;

        assert_eq!(h.drain().last(), Some(&done("completed 0 of 1 steps")));
        assert!(h.log.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_trigger_while_busy_is_ignored() {
        let transcriber = FakeTranscriber {
            text: "hello",
            delay: ms(1000),
            fail: false,
        };
        let mut h = harness(working_capture(), transcriber, ChatResponse::default());

        h.orchestrator.trigger(TriggerMode::Dictation);
        sleep(ms(10)).await;
        // A dictation recording only ends on release.
        h.orchestrator.trigger(TriggerMode::Agent);
        h.orchestrator.release();
        sleep(ms(10)).await;
        assert_eq!(
            h.orchestrator.state(),
            SessionState::Transcribing {
                mode: TriggerMode::Dictation
            }
        );

        h.orchestrator.trigger(TriggerMode::Command);
        sleep(ms(1500)).await;

        let states = h.drain();
        let recordings = states
            .iter()
            .filter(|s| matches!(s, SessionState::Recording { .. }))
            .count();
        assert_eq!(recordings, 1);
        assert_eq!(states.last(), Some(&done("text inserted")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_trigger_cancels_auto_idle() {
        let mut h = harness(working_capture(), saying(""), ChatResponse::default());

        h.orchestrator.trigger(TriggerMode::Dictation);
        sleep(ms(10)).await;
        h.orchestrator.release();
        sleep(ms(1000)).await;
        assert!(matches!(h.orchestrator.state(), SessionState::Error { .. }));
        h.drain();

        h.orchestrator.trigger(TriggerMode::Dictation);
        sleep(ms(5000)).await;

        let states = h.drain();
        assert!(!states.contains(&SessionState::Idle));
        assert!(
            states
                .iter()
                .all(|s| matches!(s, SessionState::Recording { mode: TriggerMode::Dictation, .. }))
        );
        assert!(matches!(h.orchestrator.state(), SessionState::Recording { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_recording_limit_stops_command_capture() {
        let settings = SessionSettings {
            max_recording: ms(1000),
            ..Default::default()
        };
        let mut h = harness_with(
            Arc::new(working_capture()),
            saying("open the calendar"),
            FakeChat::answering(ChatResponse::text("Opened.")),
            settings,
        );
        let levels = h.orchestrator.levels();

        h.orchestrator.trigger(TriggerMode::Command);
        sleep(ms(600)).await;
        assert_eq!(*levels.borrow(), 0.5);

        sleep(ms(600)).await;
        let states = h.drain();
        let ticks: Vec<u64> = states
            .iter()
            .filter_map(|s| match s {
                SessionState::Recording { elapsed_ms, .. } => Some(*elapsed_ms),
                _ => None,
            })
            .collect();
        assert!(ticks.len() >= 4, "ticks: {ticks:?}");
        assert!(ticks.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(states.last(), Some(&done("Opened.")));
        assert_eq!(*levels.borrow(), 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_command_mode_routes_dictation_intent_to_typing() {
        let mut h = harness(working_capture(), saying("\"buy milk\""), ChatResponse::text("unused"));

        h.orchestrator.trigger(TriggerMode::Command);
        sleep(ms(10)).await;
        h.orchestrator.stop();
        sleep(ms(10)).await;

        let states = h.drain();
        assert_eq!(
            &states[states.len() - 2..],
            &[
                SessionState::Thinking {
                    transcript: "\"buy milk\"".to_owned()
                },
                done("text inserted"),
            ]
        );
        assert!(h.chat.calls.lock().is_empty());
        assert_eq!(h.log.lock()[0].1, json!({"text": "\"buy milk\""}));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_discards_in_flight_results() {
        let transcriber = FakeTranscriber {
            text: "open notes",
            delay: ms(1000),
            fail: false,
        };
        let mut h = harness(working_capture(), transcriber, ChatResponse::text("unused"));

        h.orchestrator.trigger(TriggerMode::Agent);
        sleep(ms(10)).await;
        h.orchestrator.stop();
        sleep(ms(10)).await;
        h.orchestrator.cancel();

        sleep(ms(5000)).await;
        assert_eq!(h.drain().last(), Some(&SessionState::Idle));
        assert_eq!(h.orchestrator.state(), SessionState::Idle);
        assert!(h.chat.calls.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_release_during_capture_start_stops_recording() {
        let capture = Arc::new(SlowCapture::new(ms(50)));
        let mut h = harness_with(
            capture.clone(),
            saying("hello"),
            FakeChat::answering(ChatResponse::default()),
            SessionSettings::default(),
        );

        // A quick hold: the release lands before the device is open.
        h.orchestrator.trigger(TriggerMode::Dictation);
        sleep(ms(10)).await;
        h.orchestrator.release();
        sleep(ms(100)).await;

        assert_eq!(
            h.drain(),
            vec![
                SessionState::Recording {
                    mode: TriggerMode::Dictation,
                    elapsed_ms: 0
                },
                SessionState::Transcribing {
                    mode: TriggerMode::Dictation
                },
                done("text inserted"),
            ]
        );
        assert_eq!(capture.stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_during_capture_start_stops_recording() {
        let capture = Arc::new(SlowCapture::new(ms(50)));
        let mut h = harness_with(
            capture.clone(),
            saying("open notes"),
            FakeChat::answering(ChatResponse::text("Done.")),
            SessionSettings::default(),
        );

        h.orchestrator.trigger(TriggerMode::Agent);
        sleep(ms(10)).await;
        h.orchestrator.stop();
        sleep(ms(100)).await;

        assert_eq!(h.drain().last(), Some(&done("Done.")));
        assert_eq!(capture.stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_session_waits_for_abandoned_capture() {
        let capture = Arc::new(SlowCapture::new(ms(50)));
        let mut h = harness_with(
            capture.clone(),
            saying("hello"),
            FakeChat::answering(ChatResponse::default()),
            SessionSettings::default(),
        );

        h.orchestrator.trigger(TriggerMode::Command);
        sleep(ms(10)).await;
        h.orchestrator.cancel();
        // The abandoned start still owns the device.
        h.orchestrator.trigger(TriggerMode::Command);
        sleep(ms(100)).await;

        assert!(h.drain().is_empty());
        assert_eq!(h.orchestrator.state(), SessionState::Idle);
        assert_eq!(capture.starts.load(Ordering::SeqCst), 1);
        assert_eq!(capture.stops.load(Ordering::SeqCst), 1);

        h.orchestrator.trigger(TriggerMode::Command);
        sleep(ms(100)).await;
        assert_eq!(
            h.drain(),
            vec![SessionState::Recording {
                mode: TriggerMode::Command,
                elapsed_ms: 0
            }]
        );
        assert_eq!(capture.starts.load(Ordering::SeqCst), 2);
        assert_eq!(capture.stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stuck_tool_times_out() {
        let settings = SessionSettings {
            tool_timeout: ms(5000),
            ..Default::default()
        };
        let response = ChatResponse::with_tool_calls(vec![call("1", "stuck"), call("2", "notes")]);
        let mut h = harness_with(
            Arc::new(working_capture()),
            saying("archive everything"),
            FakeChat::answering(response),
            settings,
        );
        h.tools.register(Arc::new(StuckTool));

        h.orchestrator.trigger(TriggerMode::Agent);
        sleep(ms(10)).await;
        h.orchestrator.stop();
        sleep(ms(10)).await;
        assert_eq!(
            h.orchestrator.state(),
            SessionState::Executing {
                tool_name: "stuck".to_owned(),
                step_index: 1,
                total_steps: 2
            }
        );

        sleep(ms(5000)).await;
        assert_eq!(h.drain().last(), Some(&done("completed 1 of 2 steps")));
        let names: Vec<String> = h.log.lock().iter().map(|(n, _)| n.clone()).collect();
        assert_eq!(names, vec!["notes"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transcription_failure_is_an_error() {
        let transcriber = FakeTranscriber {
            text: "",
            delay: Duration::ZERO,
            fail: true,
        };
        let mut h = harness(working_capture(), transcriber, ChatResponse::text("unused"));

        h.orchestrator.trigger(TriggerMode::Agent);
        sleep(ms(10)).await;
        h.orchestrator.stop();
        sleep(ms(10)).await;

        assert_eq!(
            h.drain(),
            vec![
                SessionState::Recording {
                    mode: TriggerMode::Agent,
                    elapsed_ms: 0
                },
                SessionState::Transcribing {
                    mode: TriggerMode::Agent
                },
                SessionState::Error {
                    message: "API request failed: quota exceeded".to_owned()
                },
            ]
        );
        assert!(h.chat.calls.lock().is_empty());

        sleep(ms(2900)).await;
        assert!(h.drain().is_empty());
        sleep(ms(200)).await;
        assert_eq!(h.drain(), vec![SessionState::Idle]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_chat_failure_is_an_error() {
        let mut h = harness_with(
            Arc::new(working_capture()),
            saying("open notes"),
            FakeChat::failing(),
            SessionSettings::default(),
        );

        h.orchestrator.trigger(TriggerMode::Agent);
        sleep(ms(10)).await;
        h.orchestrator.stop();
        sleep(ms(10)).await;

        let states = h.drain();
        assert_eq!(
            &states[states.len() - 2..],
            &[
                SessionState::Thinking {
                    transcript: "open notes".to_owned()
                },
                SessionState::Error {
                    message: "API request failed: rate limited".to_owned()
                },
            ]
        );
        assert!(h.log.lock().is_empty());

        sleep(ms(3000)).await;
        assert_eq!(h.drain(), vec![SessionState::Idle]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_tool_counts_as_failed_step() {
        let response = ChatResponse::with_tool_calls(vec![call("1", "launch_rocket"), call("2", "notes")]);
        let mut h = harness(working_capture(), saying("launch and take notes"), response);

        h.orchestrator.trigger(TriggerMode::Agent);
        sleep(ms(10)).await;
        h.orchestrator.stop();
        sleep(ms(10)).await;

        let states = h.drain();
        assert!(states.contains(&SessionState::Executing {
            tool_name: "launch_rocket".to_owned(),
            step_index: 1,
            total_steps: 2
        }));
        assert_eq!(states.last(), Some(&done("completed 1 of 2 steps")));
        let names: Vec<String> = h.log.lock().iter().map(|(n, _)| n.clone()).collect();
        assert_eq!(names, vec!["notes"]);
    }
}
