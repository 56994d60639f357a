//! A live duplex audio session: microphone to channel, channel to speaker.
//!
//! Threads involved:
//! - the caller, which runs `start` (including the setup handshake) and `stop`
//! - the microphone's capture thread, which encodes blocks onto the outbound queue
//! - one I/O thread per session, which sends queued messages and dispatches replies
//!
//! They share only the state cell, the outbound queue and the playback lock.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::Instant;

use crossbeam_queue::SegQueue;
use parking_lot::Mutex;

use super::analysis::{rms_to_level, SpectrumAnalyzer, SpeakingDetector};
use super::devices::{CpalMicrophone, CpalSpeaker, Microphone, Speaker};
use super::messages::{decode_server_message, ClientMessage, FunctionCall, LiveSetup, ServerMessage};
use super::pcm::{decode_frame_base64, duration_secs, encode_frame, INPUT_SAMPLE_RATE, OUTPUT_SAMPLE_RATE};
use super::scheduler::PlaybackScheduler;
use super::state::{SessionEvent, SessionState};
use super::websocket::{GeminiLiveConnector, Inbound, LiveChannel, LiveConnector};
use crate::config::{LiveConfig, NexusConfig};
use crate::error::{ConfigError, LiveError};

/// Notifications for the UI.
#[derive(Debug, Clone, PartialEq)]
pub enum LiveEvent {
    Status(SessionState),
    RemoteSpeaking(bool),
    Text(String),
    InputTranscript(String),
    OutputTranscript(String),
    ToolCall(Vec<FunctionCall>),
    TurnComplete,
    Interrupted,
    Error(String),
}

/// Scheduler and speaker live under one lock so the clock read and the
/// schedule happen together.
struct Playback {
    scheduler: PlaybackScheduler,
    speaker: Box<dyn Speaker>,
    detector: SpeakingDetector,
}

struct Shared {
    state: Mutex<SessionState>,
    /// Mirrors `state == Open` for the capture callback
    capturing: AtomicBool,
    shutdown: AtomicBool,
    outbound: SegQueue<ClientMessage>,
    playback: Mutex<Playback>,
    microphone: Mutex<Box<dyn Microphone>>,
    analyzer: Mutex<SpectrumAnalyzer>,
    spectrum: Mutex<Vec<u8>>,
    events: Sender<LiveEvent>,
    config: LiveConfig,
}

impl Shared {
    fn emit(&self, event: LiveEvent) {
        // receiver gone means nobody is listening
        let _ = self.events.send(event);
    }

    fn set_state(&self, next: SessionState) {
        tracing::info!(target: "nexus::live", state = ?next, "Session state");
        self.emit(LiveEvent::Status(next));
    }

    fn advance(&self, event: SessionEvent) -> Result<SessionState, LiveError> {
        let next = {
            let mut state = self.state.lock();
            let next = state.transition(event)?;
            *state = next;
            next
        };
        self.set_state(next);
        Ok(next)
    }

    /// Apply `event` only if the session is currently in `expected`.
    fn advance_from(&self, expected: SessionState, event: SessionEvent) -> bool {
        let next = {
            let mut state = self.state.lock();
            if *state != expected {
                return false;
            }
            match state.transition(event) {
                Ok(next) => {
                    *state = next;
                    next
                }
                Err(_) => return false,
            }
        };
        self.set_state(next);
        true
    }

    /// Called from the capture thread with one fixed-size block.
    fn on_captured_block(&self, block: &[f32]) {
        if !self.capturing.load(Ordering::Acquire) {
            return;
        }
        let bytes = {
            let mut analyzer = self.analyzer.lock();
            analyzer.process(block);
            analyzer.byte_frequency_data()
        };
        *self.spectrum.lock() = bytes;
        self.outbound.push(ClientMessage::RealtimeAudio(encode_frame(block)));
    }

    fn play_chunk(&self, data: &str) {
        let samples = match decode_frame_base64(data) {
            Ok(samples) => samples,
            Err(e) => {
                tracing::warn!(target: "nexus::live", "Dropping malformed audio chunk: {}", e);
                return;
            }
        };
        if samples.is_empty() {
            return;
        }
        let duration = duration_secs(samples.len(), OUTPUT_SAMPLE_RATE);
        let mut playback = self.playback.lock();
        let now = playback.speaker.current_time();
        let start = playback.scheduler.schedule(now, duration);
        playback.speaker.schedule(start, samples);
    }

    fn interrupt_playback(&self) {
        let mut playback = self.playback.lock();
        playback.speaker.clear();
        playback.scheduler.reset();
    }

    /// Dispatch one inbound text frame. A server-side error ends the session.
    fn handle_frame(&self, text: &str) -> Result<(), LiveError> {
        let messages = match decode_server_message(text) {
            Ok(messages) => messages,
            Err(e) => {
                tracing::warn!(target: "nexus::live", "Dropping malformed frame: {}", e);
                return Ok(());
            }
        };

        for message in messages {
            match message {
                ServerMessage::AudioChunk { data, .. } => self.play_chunk(&data),
                ServerMessage::TextDelta(text) => self.emit(LiveEvent::Text(text)),
                ServerMessage::InputTranscription(text) => self.emit(LiveEvent::InputTranscript(text)),
                ServerMessage::OutputTranscription(text) => self.emit(LiveEvent::OutputTranscript(text)),
                ServerMessage::ToolCall(calls) => self.emit(LiveEvent::ToolCall(calls)),
                ServerMessage::TurnComplete => self.emit(LiveEvent::TurnComplete),
                ServerMessage::Interrupted => {
                    self.interrupt_playback();
                    self.emit(LiveEvent::Interrupted);
                }
                ServerMessage::GoAway { time_left } => {
                    tracing::warn!(target: "nexus::live", ?time_left, "Server is going away");
                }
                ServerMessage::SetupComplete => {}
                ServerMessage::Error { code, message } => {
                    return Err(LiveError::Protocol(match code {
                        Some(code) => format!("[{}] {}", code, message),
                        None => message,
                    }));
                }
            }
        }
        Ok(())
    }

    fn update_speaking(&self) {
        let flipped = {
            let mut playback = self.playback.lock();
            let level = rms_to_level(playback.speaker.output_level());
            playback.detector.observe(level)
        };
        if let Some(speaking) = flipped {
            self.emit(LiveEvent::RemoteSpeaking(speaking));
        }
    }

    /// Stop capture, silence playback and forget scheduled audio.
    fn release_resources(&self) {
        self.capturing.store(false, Ordering::Release);
        self.microphone.lock().stop();

        let was_speaking = {
            let mut playback = self.playback.lock();
            playback.speaker.clear();
            playback.speaker.close();
            playback.scheduler.reset();
            let was_speaking = playback.detector.is_speaking();
            playback.detector.reset();
            was_speaking
        };
        if was_speaking {
            self.emit(LiveEvent::RemoteSpeaking(false));
        }

        while self.outbound.pop().is_some() {}
        self.spectrum.lock().clear();
    }

    /// Tear down after a failure in state `from` and settle at Idle. Returns
    /// false when the session already left `from` (a concurrent stop owns the teardown).
    fn fail(&self, from: SessionState, error: &LiveError) -> bool {
        self.capturing.store(false, Ordering::Release);
        if !self.advance_from(from, SessionEvent::Failure) {
            return false;
        }
        self.emit(LiveEvent::Error(error.to_string()));
        self.release_resources();
        let _ = self.advance(SessionEvent::Released);
        let _ = self.advance(SessionEvent::Reset);
        true
    }
}

/// Handle to one live session. Dropping it stops the session.
pub struct LiveSession {
    shared: Arc<Shared>,
    connector: Arc<dyn LiveConnector>,
    setup: LiveSetup,
    io_thread: Mutex<Option<JoinHandle<()>>>,
}

impl LiveSession {
    pub fn new(
        config: LiveConfig,
        setup: LiveSetup,
        connector: Arc<dyn LiveConnector>,
        microphone: Box<dyn Microphone>,
        speaker: Box<dyn Speaker>,
        events: Sender<LiveEvent>,
    ) -> Self {
        let detector = SpeakingDetector::new(config.speaking_threshold, config.speaking_window);
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(SessionState::Idle),
                capturing: AtomicBool::new(false),
                shutdown: AtomicBool::new(false),
                outbound: SegQueue::new(),
                playback: Mutex::new(Playback {
                    scheduler: PlaybackScheduler::new(),
                    speaker,
                    detector,
                }),
                microphone: Mutex::new(microphone),
                analyzer: Mutex::new(SpectrumAnalyzer::new()),
                spectrum: Mutex::new(Vec::new()),
                events,
                config,
            }),
            connector,
            setup,
            io_thread: Mutex::new(None),
        }
    }

    /// Session on the default audio devices and the configured live endpoint.
    pub fn from_config(config: &NexusConfig, events: Sender<LiveEvent>) -> Result<Self, ConfigError> {
        let connector = GeminiLiveConnector::from_config(config)?;
        Ok(Self::new(
            config.live.clone(),
            LiveSetup::from_config(config),
            Arc::new(connector),
            Box::new(CpalMicrophone::new()),
            Box::new(CpalSpeaker::new()),
            events,
        ))
    }

    pub fn state(&self) -> SessionState {
        *self.shared.state.lock()
    }

    /// Latest analyser bytes of the captured signal, for visualization.
    pub fn input_spectrum(&self) -> Vec<u8> {
        self.shared.spectrum.lock().clone()
    }

    /// Next free start time on the playback timeline, in seconds.
    pub fn next_playback_start(&self) -> f64 {
        self.shared.playback.lock().scheduler.next_start()
    }

    /// Open devices, connect, wait for the setup acknowledgement and start streaming.
    pub fn start(&self) -> Result<(), LiveError> {
        {
            let mut state = self.shared.state.lock();
            if *state != SessionState::Idle {
                return Err(LiveError::AlreadyActive);
            }
            *state = state.transition(SessionEvent::Start)?;
        }
        self.shared.set_state(SessionState::Connecting);

        let stale = self.io_thread.lock().take();
        if let Some(stale) = stale {
            let _ = stale.join();
        }
        self.shared.shutdown.store(false, Ordering::SeqCst);

        let weak: Weak<Shared> = Arc::downgrade(&self.shared);
        let sink = Box::new(move |block: &[f32]| {
            if let Some(shared) = weak.upgrade() {
                shared.on_captured_block(block);
            }
        });
        let opened = self
            .shared
            .microphone
            .lock()
            .open(INPUT_SAMPLE_RATE, self.shared.config.frame_samples, sink);
        if let Err(e) = opened {
            tracing::error!(target: "nexus::live", "Microphone unavailable: {}", e);
            self.shared.fail(SessionState::Connecting, &e);
            return Err(e);
        }

        if let Err(e) = self.shared.playback.lock().speaker.open() {
            tracing::error!(target: "nexus::live", "Speaker unavailable: {}", e);
            self.shared.fail(SessionState::Connecting, &e);
            return Err(e);
        }

        let mut channel = match self.connector.connect(&self.setup) {
            Ok(channel) => channel,
            Err(e) => {
                tracing::error!(target: "nexus::live", "Connection failed: {}", e);
                self.shared.fail(SessionState::Connecting, &e);
                return Err(e);
            }
        };

        if let Err(e) = self.wait_for_setup(channel.as_mut()) {
            tracing::error!(target: "nexus::live", "Setup failed: {}", e);
            channel.close();
            self.shared.fail(SessionState::Connecting, &e);
            return Err(e);
        }

        while self.shared.outbound.pop().is_some() {}
        self.shared.advance(SessionEvent::SetupComplete)?;
        self.shared.capturing.store(true, Ordering::Release);

        let shared = self.shared.clone();
        let handle = std::thread::Builder::new()
            .name("nexus-live-io".to_string())
            .spawn(move || run_io(shared, channel))
            .map_err(|e| {
                let error = LiveError::Transport(e.to_string());
                self.shared.fail(SessionState::Open, &error);
                error
            })?;
        *self.io_thread.lock() = Some(handle);
        Ok(())
    }

    fn wait_for_setup(&self, channel: &mut dyn LiveChannel) -> Result<(), LiveError> {
        let timeout = self.shared.config.setup_timeout();
        let started = Instant::now();
        loop {
            match channel.recv()? {
                Inbound::Frame(text) => match decode_server_message(&text) {
                    Ok(messages) => {
                        for message in messages {
                            match message {
                                ServerMessage::SetupComplete => return Ok(()),
                                ServerMessage::Error { message, .. } => {
                                    return Err(LiveError::Protocol(message));
                                }
                                _ => {}
                            }
                        }
                    }
                    Err(e) => {
                        tracing::warn!(target: "nexus::live", "Ignoring malformed frame during setup: {}", e);
                    }
                },
                Inbound::Idle => {
                    if started.elapsed() > timeout {
                        return Err(LiveError::SetupTimeout(timeout.as_secs()));
                    }
                    std::thread::sleep(self.shared.config.poll_interval());
                }
                Inbound::Closed(reason) => {
                    return Err(LiveError::ChannelClosed(reason.unwrap_or_default()));
                }
            }
        }
    }

    /// Queue a text turn on an open session.
    pub fn send_text(&self, text: impl Into<String>) -> Result<(), LiveError> {
        if self.state() != SessionState::Open {
            return Err(LiveError::Protocol("session is not open".to_string()));
        }
        self.shared.outbound.push(ClientMessage::Text {
            text: text.into(),
            turn_complete: true,
        });
        Ok(())
    }

    /// End the session and release every resource. Safe to call in any state.
    pub fn stop(&self) {
        if self.shared.advance_from(SessionState::Open, SessionEvent::Stop) {
            self.shared.capturing.store(false, Ordering::Release);
            self.shared.shutdown.store(true, Ordering::SeqCst);
            let handle = self.io_thread.lock().take();
            if let Some(handle) = handle {
                let _ = handle.join();
            }
            self.shared.release_resources();
            let _ = self.shared.advance(SessionEvent::Released);
            let _ = self.shared.advance(SessionEvent::Reset);
            return;
        }

        // A failure teardown may be running on the I/O thread; wait for it.
        let handle = self.io_thread.lock().take();
        if let Some(handle) = handle {
            let _ = handle.join();
        } else {
            tracing::debug!(target: "nexus::live", state = ?self.state(), "Stop ignored");
        }
    }
}

impl Drop for LiveSession {
    fn drop(&mut self) {
        self.stop();
    }
}

enum IoExit {
    Shutdown,
    Failed(LiveError),
}

fn run_io(shared: Arc<Shared>, mut channel: Box<dyn LiveChannel>) {
    let exit = catch_unwind(AssertUnwindSafe(|| io_loop(&shared, channel.as_mut())))
        .unwrap_or_else(|_| IoExit::Failed(LiveError::Transport("I/O thread panicked".to_string())));
    channel.close();

    match exit {
        IoExit::Shutdown => {
            tracing::debug!(target: "nexus::live", "I/O thread stopped");
        }
        IoExit::Failed(error) => {
            tracing::error!(target: "nexus::live", "Session ended: {}", error);
            if !shared.fail(SessionState::Open, &error) {
                tracing::debug!(target: "nexus::live", "Teardown already in progress");
            }
        }
    }
}

fn io_loop(shared: &Shared, channel: &mut dyn LiveChannel) -> IoExit {
    let poll_interval = shared.config.poll_interval();
    loop {
        if shared.shutdown.load(Ordering::SeqCst) {
            return IoExit::Shutdown;
        }

        while let Some(message) = shared.outbound.pop() {
            if let Err(e) = channel.send(&message) {
                return IoExit::Failed(e);
            }
        }

        match channel.recv() {
            Ok(Inbound::Frame(text)) => {
                if let Err(e) = shared.handle_frame(&text) {
                    return IoExit::Failed(e);
                }
            }
            Ok(Inbound::Idle) => std::thread::sleep(poll_interval),
            Ok(Inbound::Closed(reason)) => {
                return IoExit::Failed(LiveError::ChannelClosed(
                    reason.unwrap_or_else(|| "no reason given".to_string()),
                ));
            }
            Err(e) => return IoExit::Failed(e),
        }

        shared.update_speaking();
    }
}
