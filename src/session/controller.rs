//! Session controller: state machine and event loop

use std::time::Duration;

use tokio::sync::mpsc;
use url::Url;

use super::connection::{Connection, Outbound, is_normal_close};
use super::protocol::{ClientMessage, ServerMessage};
use super::{EventSender, SessionEvent, SessionState};
use crate::audio::{AudioChunk, AudioOutput, CpalOutput, SourceEndedRx, SourceId, WireBlob, pcm};
use crate::credentials::CredentialResolver;
use crate::tools::ToolBridge;
use crate::voice::{CapturePipeline, ChunkStream, PlaybackScheduler, SpeakingTransition};
use crate::{Error, Result};

/// Commands from the user
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserCommand {
    /// Start a session, replacing any active one
    Connect,
    /// End the active session
    Disconnect,
    /// End the active session and stop the event loop
    Quit,
}

/// What the event loop should do after handling an inbound message
#[derive(Debug)]
pub enum Flow {
    Continue,
    /// The peer closed normally
    Closed,
    /// The session cannot continue
    Failed(Error),
}

/// Connection settings for the controller
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub endpoint: Url,
    pub handshake_timeout: Duration,
}

/// Open-state logic: playback, tool calls, and outbound audio
///
/// Independent of the transport and devices, so inbound handling can run
/// against any [`AudioOutput`].
pub struct LiveSession<O: AudioOutput> {
    scheduler: PlaybackScheduler<O>,
    tools: ToolBridge,
    outbound: Outbound,
    events: EventSender,
}

impl<O: AudioOutput> LiveSession<O> {
    /// Create a live session over `output`
    pub const fn new(output: O, tools: ToolBridge, outbound: Outbound, events: EventSender) -> Self {
        Self {
            scheduler: PlaybackScheduler::new(output),
            tools,
            outbound,
            events,
        }
    }

    /// Encode a captured chunk and queue it for sending
    ///
    /// # Errors
    ///
    /// Returns `Encoding` for an unencodable chunk and `Remote` if the
    /// connection writer has stopped
    pub fn send_chunk(&self, chunk: &AudioChunk) -> Result<()> {
        let blob = WireBlob::from_chunk(chunk)?;
        self.outbound
            .send(ClientMessage::audio(&blob))
            .map_err(|_| Error::Remote("connection writer stopped".to_string()))
    }

    /// Handle one inbound message
    pub fn dispatch(&mut self, message: ServerMessage) -> Flow {
        match message {
            ServerMessage::Audio { data, sample_rate } => {
                if let Err(e) = self.play(&data, sample_rate) {
                    tracing::warn!(error = %e, "skipping audio fragment");
                }
                Flow::Continue
            }
            ServerMessage::Interrupted => {
                tracing::debug!("model interrupted by user");
                let transition = self.scheduler.interrupt();
                self.emit_speaking(transition);
                Flow::Continue
            }
            ServerMessage::ToolCall(calls) => {
                for call in &calls {
                    let result = self.tools.invoke(call);
                    if self.outbound.send(ClientMessage::tool_response(result)).is_err() {
                        return Flow::Failed(Error::Remote("connection writer stopped".to_string()));
                    }
                }
                Flow::Continue
            }
            ServerMessage::TurnComplete => {
                tracing::debug!("model turn complete");
                Flow::Continue
            }
            ServerMessage::SetupComplete => Flow::Continue,
            ServerMessage::GoAway => {
                tracing::warn!("server is about to close the session");
                Flow::Continue
            }
            ServerMessage::Closed { code, reason } => {
                if is_normal_close(code) {
                    tracing::info!(?code, %reason, "session closed by server");
                    Flow::Closed
                } else {
                    Flow::Failed(Error::Remote(format!(
                        "closed with code {}: {reason}",
                        code.unwrap_or_default()
                    )))
                }
            }
            ServerMessage::Error(message) => Flow::Failed(Error::Remote(message)),
        }
    }

    fn play(&mut self, data: &str, sample_rate: u32) -> Result<()> {
        let bytes = pcm::decode_base64(data)?;
        let fragment = pcm::decode(&bytes, sample_rate, self.scheduler.sample_rate())?;
        tracing::trace!(bytes = bytes.len(), duration = fragment.duration(), "audio fragment");
        let transition = self.scheduler.schedule(fragment)?;
        self.emit_speaking(transition);
        Ok(())
    }

    /// Completion event from the output clock
    pub fn on_source_ended(&mut self, id: SourceId) {
        let transition = self.scheduler.on_source_ended(id);
        self.emit_speaking(transition);
    }

    /// Flush playback for teardown
    pub fn shutdown(&mut self) {
        let transition = self.scheduler.shutdown();
        self.emit_speaking(transition);
    }

    /// The playback scheduler
    #[must_use]
    pub const fn scheduler(&self) -> &PlaybackScheduler<O> {
        &self.scheduler
    }

    /// Mutable access to the playback scheduler
    pub const fn scheduler_mut(&mut self) -> &mut PlaybackScheduler<O> {
        &mut self.scheduler
    }

    fn emit_speaking(&self, transition: Option<SpeakingTransition>) {
        let speaking = match transition {
            Some(SpeakingTransition::Started) => true,
            Some(SpeakingTransition::Ended) => false,
            None => return,
        };
        let _ = self.events.send(SessionEvent::Speaking(speaking));
    }
}

/// Resources held while a session is open
struct ActiveSession {
    capture: CapturePipeline,
    chunks: ChunkStream,
    ended: SourceEndedRx,
    connection: Connection,
    live: LiveSession<CpalOutput>,
}

/// One wake-up of the event loop
enum Input {
    Command(Option<UserCommand>),
    Chunk(Option<Result<AudioChunk>>),
    Inbound(Result<Vec<ServerMessage>>),
    SourceEnded(SourceId),
}

impl ActiveSession {
    async fn next_input(&mut self, commands: &mut mpsc::UnboundedReceiver<UserCommand>) -> Input {
        tokio::select! {
            biased;
            command = commands.recv() => Input::Command(command),
            Some(id) = self.ended.recv() => Input::SourceEnded(id),
            inbound = self.connection.recv() => Input::Inbound(inbound),
            chunk = self.chunks.recv() => Input::Chunk(chunk),
        }
    }
}

/// Drives one session at a time through its lifecycle
pub struct SessionController {
    config: SessionConfig,
    credentials: CredentialResolver,
    tools: ToolBridge,
    events: EventSender,
    state: SessionState,
    active: Option<ActiveSession>,
}

impl SessionController {
    /// Create an idle controller
    #[must_use]
    pub const fn new(
        config: SessionConfig,
        credentials: CredentialResolver,
        tools: ToolBridge,
        events: EventSender,
    ) -> Self {
        Self {
            config,
            credentials,
            tools,
            events,
            state: SessionState::Idle,
            active: None,
        }
    }

    /// Current lifecycle state
    #[must_use]
    pub const fn state(&self) -> &SessionState {
        &self.state
    }

    /// The credential resolver
    #[must_use]
    pub const fn credentials(&self) -> &CredentialResolver {
        &self.credentials
    }

    /// Start a new session, tearing down any active one first
    ///
    /// # Errors
    ///
    /// Returns the failure that ended the attempt; the controller is then
    /// `Closed` with nothing held
    pub async fn connect(&mut self) -> Result<()> {
        self.begin_connect();
        let result = self.open_session().await;
        self.finish_connect(result)
    }

    /// End the active session, releasing every resource immediately
    pub fn disconnect(&mut self) {
        if self.active.is_some() || self.state.is_active() {
            tracing::info!("disconnecting");
            self.teardown(None);
        }
    }

    /// Run until `Quit` or the command channel closes
    pub async fn run(&mut self, mut commands: mpsc::UnboundedReceiver<UserCommand>) {
        let mut pending = None;

        loop {
            let input = if let Some(command) = pending.take() {
                Input::Command(Some(command))
            } else if let Some(active) = self.active.as_mut() {
                active.next_input(&mut commands).await
            } else {
                Input::Command(commands.recv().await)
            };

            match input {
                Input::Command(None | Some(UserCommand::Quit)) => {
                    self.disconnect();
                    break;
                }
                Input::Command(Some(UserCommand::Disconnect)) => self.disconnect(),
                Input::Command(Some(UserCommand::Connect)) => {
                    pending = self.connect_cancellable(&mut commands).await;
                }
                Input::Chunk(Some(Ok(chunk))) => self.forward_chunk(&chunk),
                Input::Chunk(Some(Err(e))) => self.fail(&e),
                Input::Chunk(None) => {
                    self.fail(&Error::DeviceUnavailable("capture stream ended".to_string()));
                }
                Input::Inbound(Ok(messages)) => self.dispatch_all(messages),
                Input::Inbound(Err(e)) if e.is_fragment_local() => {
                    tracing::warn!(error = %e, "skipping malformed message");
                }
                Input::Inbound(Err(e)) => self.fail(&e),
                Input::SourceEnded(id) => {
                    if let Some(active) = self.active.as_mut() {
                        active.live.on_source_ended(id);
                    }
                }
            }
        }
    }

    /// Connect, abandoning the attempt if another command arrives first
    ///
    /// Returns the interrupting command so the loop can act on it.
    async fn connect_cancellable(
        &mut self,
        commands: &mut mpsc::UnboundedReceiver<UserCommand>,
    ) -> Option<UserCommand> {
        self.begin_connect();

        let (result, interrupted) = tokio::select! {
            result = self.open_session() => (Some(result), None),
            command = commands.recv() => (None, Some(command.unwrap_or(UserCommand::Quit))),
        };

        match result {
            Some(result) => {
                let _ = self.finish_connect(result);
            }
            None => {
                tracing::info!("connect attempt cancelled");
                self.set_state(SessionState::Closed {
                    reason: Some("cancelled".to_string()),
                });
            }
        }

        interrupted
    }

    fn begin_connect(&mut self) {
        if self.active.is_some() {
            tracing::info!("replacing active session");
            self.teardown(None);
        }
        if matches!(self.state, SessionState::Closed { .. }) {
            self.set_state(SessionState::Idle);
        }
        self.set_state(SessionState::Connecting);
        self.status("Connecting...");
    }

    fn finish_connect(&mut self, result: Result<ActiveSession>) -> Result<()> {
        match result {
            Ok(active) => {
                self.active = Some(active);
                self.set_state(SessionState::Open);
                self.status("Listening. Start talking!");
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to open session");
                let message = e.status_message();
                self.status(&message);
                self.set_state(SessionState::Closed {
                    reason: Some(message),
                });
                Err(e)
            }
        }
    }

    /// Acquire everything an open session needs
    ///
    /// Anything acquired before a failure is dropped, and thereby released,
    /// on the way out.
    async fn open_session(&self) -> Result<ActiveSession> {
        let key = self.credentials.resolve().await?;
        tracing::debug!(source = ?key.source, "resolved API key");

        let (capture, chunks) = CapturePipeline::start()?;
        let (output, ended) = CpalOutput::open()?;

        let connection = Connection::open(
            &self.config.endpoint,
            &key.api_key,
            ClientMessage::setup(),
            self.config.handshake_timeout,
        )
        .await?;

        let live = LiveSession::new(
            output,
            self.tools.clone(),
            connection.outbound(),
            self.events.clone(),
        );

        Ok(ActiveSession {
            capture,
            chunks,
            ended,
            connection,
            live,
        })
    }

    fn forward_chunk(&mut self, chunk: &AudioChunk) {
        let Some(active) = self.active.as_ref() else {
            return;
        };
        match active.live.send_chunk(chunk) {
            Ok(()) => {}
            Err(e) if e.is_fragment_local() => tracing::warn!(error = %e, "dropping audio chunk"),
            Err(e) => self.fail(&e),
        }
    }

    fn dispatch_all(&mut self, messages: Vec<ServerMessage>) {
        for message in messages {
            let Some(active) = self.active.as_mut() else {
                return;
            };
            match active.live.dispatch(message) {
                Flow::Continue => {}
                Flow::Closed => {
                    self.teardown(None);
                    return;
                }
                Flow::Failed(e) => {
                    self.fail(&e);
                    return;
                }
            }
        }
    }

    fn fail(&mut self, error: &Error) {
        tracing::error!(error = %error, "session failed");
        let message = error.status_message();
        self.status(&message);
        self.teardown(Some(message));
    }

    /// Release capture, playback, and the connection, then enter `Closed`
    fn teardown(&mut self, reason: Option<String>) {
        if let Some(mut active) = self.active.take() {
            active.live.shutdown();
            active.capture.stop();
            active.connection.close();
        }
        if reason.is_none() {
            self.status("Disconnected.");
        }
        self.set_state(SessionState::Closed { reason });
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state != state {
            tracing::debug!(from = %self.state, to = %state, "session state");
            self.state = state.clone();
            let _ = self.events.send(SessionEvent::State(state));
        }
    }

    fn status(&self, message: &str) {
        let _ = self.events.send(SessionEvent::Status(message.to_string()));
    }
}
