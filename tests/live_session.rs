use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use nexus_live::api::realtime_audio::{
    decode_frame_base64, encode_frame, BlockSink, ClientMessage, Inbound, LiveChannel, LiveConnector,
    LiveEvent, LiveSession, LiveSetup, Microphone, SessionState, Speaker,
};
use nexus_live::config::LiveConfig;
use nexus_live::error::LiveError;

const WAIT: Duration = Duration::from_secs(5);

#[derive(Clone, Default)]
struct MicHandle {
    sink: Arc<Mutex<Option<BlockSink>>>,
    stopped: Arc<AtomicBool>,
    refusal: Arc<Mutex<Option<LiveError>>>,
}

impl MicHandle {
    /// Deliver a block through the last sink handed to `open`, even after
    /// `stop`, like a callback already in flight on the capture thread.
    fn feed(&self, block: &[f32]) {
        if let Some(sink) = self.sink.lock().as_mut() {
            sink(block);
        }
    }
}

struct FakeMicrophone(MicHandle);

impl Microphone for FakeMicrophone {
    fn open(&mut self, _sample_rate: u32, _block_size: usize, sink: BlockSink) -> Result<(), LiveError> {
        if let Some(err) = self.0.refusal.lock().clone() {
            return Err(err);
        }
        *self.0.sink.lock() = Some(sink);
        self.0.stopped.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&mut self) {
        self.0.stopped.store(true, Ordering::SeqCst);
    }

    fn is_stopped(&self) -> bool {
        self.0.stopped.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
struct SpeakerLog {
    scheduled: Vec<(f64, usize)>,
    clears: usize,
    closes: usize,
    now: f64,
}

#[derive(Clone, Default)]
struct SpeakerHandle(Arc<Mutex<SpeakerLog>>);

struct FakeSpeaker(SpeakerHandle);

impl Speaker for FakeSpeaker {
    fn open(&mut self) -> Result<(), LiveError> {
        Ok(())
    }

    fn current_time(&self) -> f64 {
        self.0 .0.lock().now
    }

    fn schedule(&mut self, start: f64, samples: Vec<f32>) {
        self.0 .0.lock().scheduled.push((start, samples.len()));
    }

    fn clear(&mut self) {
        self.0 .0.lock().clears += 1;
    }

    fn output_level(&self) -> f32 {
        0.0
    }

    fn close(&mut self) {
        self.0 .0.lock().closes += 1;
    }
}

#[derive(Clone, Default)]
struct ChannelHandle {
    inbound: Arc<Mutex<VecDeque<Inbound>>>,
    sent: Arc<Mutex<Vec<serde_json::Value>>>,
    closed: Arc<AtomicBool>,
    connects: Arc<AtomicUsize>,
    refuse: Arc<AtomicBool>,
}

impl ChannelHandle {
    fn push(&self, frame: &str) {
        self.inbound.lock().push_back(Inbound::Frame(frame.to_string()));
    }

    fn audio_frames(&self) -> Vec<Vec<f32>> {
        self.sent
            .lock()
            .iter()
            .filter_map(|m| m["realtimeInput"]["mediaChunks"][0]["data"].as_str().map(str::to_string))
            .map(|data| decode_frame_base64(&data).unwrap())
            .collect()
    }
}

struct FakeChannel(ChannelHandle);

impl LiveChannel for FakeChannel {
    fn send(&mut self, message: &ClientMessage) -> Result<(), LiveError> {
        self.0.sent.lock().push(message.to_json());
        Ok(())
    }

    fn recv(&mut self) -> Result<Inbound, LiveError> {
        Ok(self.0.inbound.lock().pop_front().unwrap_or(Inbound::Idle))
    }

    fn close(&mut self) {
        self.0.closed.store(true, Ordering::SeqCst);
    }
}

struct FakeConnector(ChannelHandle);

impl LiveConnector for FakeConnector {
    fn connect(&self, setup: &LiveSetup) -> Result<Box<dyn LiveChannel>, LiveError> {
        self.0.connects.fetch_add(1, Ordering::SeqCst);
        if self.0.refuse.load(Ordering::SeqCst) {
            return Err(LiveError::Connect("connection refused".to_string()));
        }
        let mut channel = FakeChannel(self.0.clone());
        channel.send(&ClientMessage::Setup(setup.clone()))?;
        Ok(Box::new(channel))
    }
}

struct Harness {
    session: LiveSession,
    events: Receiver<LiveEvent>,
    mic: MicHandle,
    speaker: SpeakerHandle,
    channel: ChannelHandle,
}

fn harness_with(config: LiveConfig) -> Harness {
    let (tx, rx) = mpsc::channel();
    let mic = MicHandle::default();
    let speaker = SpeakerHandle::default();
    let channel = ChannelHandle::default();
    let setup = LiveSetup {
        model: "live-test".to_string(),
        voice: "Zephyr".to_string(),
        system_instruction: String::new(),
        input_transcription: true,
        output_transcription: true,
    };
    let session = LiveSession::new(
        config,
        setup,
        Arc::new(FakeConnector(channel.clone())),
        Box::new(FakeMicrophone(mic.clone())),
        Box::new(FakeSpeaker(speaker.clone())),
        tx,
    );
    Harness {
        session,
        events: rx,
        mic,
        speaker,
        channel,
    }
}

fn harness() -> Harness {
    harness_with(LiveConfig {
        frame_samples: 4,
        setup_timeout_secs: 2,
        poll_interval_ms: 1,
        ..LiveConfig::default()
    })
}

fn started() -> Harness {
    let h = harness();
    h.channel.push(r#"{"setupComplete":{}}"#);
    h.session.start().expect("session starts");
    h
}

fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + WAIT;
    while !condition() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        std::thread::sleep(Duration::from_millis(2));
    }
}

/// Collect events until `last` is seen.
fn events_until(rx: &Receiver<LiveEvent>, last: &LiveEvent) -> Vec<LiveEvent> {
    let mut seen = Vec::new();
    let deadline = Instant::now() + WAIT;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let event = rx.recv_timeout(remaining).expect("event before timeout");
        let done = &event == last;
        seen.push(event);
        if done {
            return seen;
        }
    }
}

fn statuses(events: &[LiveEvent]) -> Vec<SessionState> {
    events
        .iter()
        .filter_map(|e| match e {
            LiveEvent::Status(s) => Some(*s),
            _ => None,
        })
        .collect()
}

#[test]
fn stop_on_idle_is_a_no_op() {
    let h = harness();
    h.session.stop();
    h.session.stop();
    assert_eq!(h.session.state(), SessionState::Idle);
    assert!(h.events.try_recv().is_err());
    assert_eq!(h.channel.connects.load(Ordering::SeqCst), 0);
}

#[test]
fn start_opens_the_session() {
    let h = started();
    assert_eq!(h.session.state(), SessionState::Open);
    let events = events_until(&h.events, &LiveEvent::Status(SessionState::Open));
    assert_eq!(statuses(&events), vec![SessionState::Connecting, SessionState::Open]);
    assert!(!h.mic.stopped.load(Ordering::SeqCst));
    assert!(h.channel.sent.lock()[0].get("setup").is_some());
}

#[test]
fn start_while_active_is_rejected() {
    let h = started();
    assert_eq!(h.session.start(), Err(LiveError::AlreadyActive));
    assert_eq!(h.channel.connects.load(Ordering::SeqCst), 1);
}

#[test]
fn stop_on_open_releases_everything_and_returns_to_idle() {
    let h = started();
    h.channel.push(&audio_frame(2400));
    wait_until(|| h.speaker.0.lock().scheduled.len() == 1);

    h.session.stop();

    assert_eq!(h.session.state(), SessionState::Idle);
    assert!(h.mic.stopped.load(Ordering::SeqCst));
    assert!(h.channel.closed.load(Ordering::SeqCst));
    assert_eq!(h.speaker.0.lock().closes, 1);
    assert_eq!(h.session.next_playback_start(), 0.0);

    let events = events_until(&h.events, &LiveEvent::Status(SessionState::Idle));
    assert_eq!(
        statuses(&events),
        vec![
            SessionState::Connecting,
            SessionState::Open,
            SessionState::Closing,
            SessionState::Closed,
            SessionState::Idle
        ]
    );

    h.session.stop();
    assert_eq!(h.session.state(), SessionState::Idle);
}

#[test]
fn session_can_restart_after_stop() {
    let h = started();
    h.session.stop();
    h.channel.push(r#"{"setupComplete":{}}"#);
    h.session.start().unwrap();
    assert_eq!(h.session.state(), SessionState::Open);
    assert_eq!(h.channel.connects.load(Ordering::SeqCst), 2);
}

#[test]
fn captured_blocks_are_streamed_in_order() {
    let h = started();
    for value in [0.25f32, -0.5, 0.75] {
        h.mic.feed(&[value; 4]);
    }
    wait_until(|| h.channel.audio_frames().len() == 3);

    let firsts: Vec<f32> = h.channel.audio_frames().iter().map(|f| f[0]).collect();
    assert_eq!(firsts, vec![0.25, -0.5, 0.75]);
    let chunk = &h.channel.sent.lock()[1]["realtimeInput"]["mediaChunks"][0];
    assert_eq!(chunk["mimeType"], "audio/pcm;rate=16000");
    assert_eq!(h.session.input_spectrum().len(), 128);
}

#[test]
fn blocks_captured_before_open_are_not_sent() {
    let h = harness();
    h.mic.feed(&[0.5; 4]);
    assert!(h.channel.audio_frames().is_empty());
    assert!(h.session.input_spectrum().is_empty());
}

fn audio_frame(samples: usize) -> String {
    let frame = encode_frame(&vec![0.0; samples]);
    serde_json::json!({
        "serverContent": { "modelTurn": { "parts": [
            { "inlineData": { "mimeType": "audio/pcm;rate=24000", "data": frame.data } }
        ] } }
    })
    .to_string()
}

#[test]
fn replies_are_scheduled_back_to_back() {
    let h = started();
    h.channel.push(&audio_frame(24_000));
    h.channel.push(&audio_frame(12_000));
    h.channel.push(&audio_frame(12_000));
    wait_until(|| h.speaker.0.lock().scheduled.len() == 3);

    let starts: Vec<f64> = h.speaker.0.lock().scheduled.iter().map(|(s, _)| *s).collect();
    assert_eq!(starts, vec![0.0, 1.0, 1.5]);
    assert_eq!(h.session.next_playback_start(), 2.0);
}

#[test]
fn reply_arriving_after_playback_drained_starts_now() {
    let h = started();
    h.channel.push(&audio_frame(12_000));
    wait_until(|| h.speaker.0.lock().scheduled.len() == 1);
    h.speaker.0.lock().now = 3.0;
    h.channel.push(&audio_frame(12_000));
    wait_until(|| h.speaker.0.lock().scheduled.len() == 2);
    assert_eq!(h.speaker.0.lock().scheduled[1].0, 3.0);
}

#[test]
fn malformed_frames_are_dropped() {
    let h = started();
    h.channel.push("definitely not json");
    h.channel.push(
        r#"{"serverContent":{"modelTurn":{"parts":[{"inlineData":{"mimeType":"audio/pcm;rate=24000","data":"AQID"}}]}}}"#,
    );
    h.channel
        .push(r#"{"serverContent":{"modelTurn":{"parts":[{"text":"still here"}]}}}"#);

    let events = events_until(&h.events, &LiveEvent::Text("still here".to_string()));
    assert!(!events.iter().any(|e| matches!(e, LiveEvent::Error(_))));
    assert!(h.speaker.0.lock().scheduled.is_empty());
    assert_eq!(h.session.state(), SessionState::Open);
}

#[test]
fn interruption_clears_playback() {
    let h = started();
    h.channel.push(&audio_frame(24_000));
    wait_until(|| h.speaker.0.lock().scheduled.len() == 1);
    h.channel.push(r#"{"serverContent":{"interrupted":true}}"#);

    events_until(&h.events, &LiveEvent::Interrupted);
    assert_eq!(h.speaker.0.lock().clears, 1);
    assert_eq!(h.session.next_playback_start(), 0.0);
}

#[test]
fn transcripts_and_turns_are_surfaced() {
    let h = started();
    h.channel.push(
        r#"{"serverContent":{"inputTranscription":{"text":"hello"},"outputTranscription":{"text":"hi"},"turnComplete":true}}"#,
    );
    let events = events_until(&h.events, &LiveEvent::TurnComplete);
    assert!(events.contains(&LiveEvent::InputTranscript("hello".to_string())));
    assert!(events.contains(&LiveEvent::OutputTranscript("hi".to_string())));
}

#[test]
fn remote_close_reports_errored_then_settles_idle() {
    let h = started();
    h.channel
        .inbound
        .lock()
        .push_back(Inbound::Closed(Some("1000 bye".to_string())));

    let events = events_until(&h.events, &LiveEvent::Status(SessionState::Idle));
    assert_eq!(
        statuses(&events),
        vec![
            SessionState::Connecting,
            SessionState::Open,
            SessionState::Errored,
            SessionState::Closed,
            SessionState::Idle
        ]
    );
    assert!(events.iter().any(|e| matches!(e, LiveEvent::Error(m) if m.contains("bye"))));
    assert!(h.mic.stopped.load(Ordering::SeqCst));
    assert!(h.channel.closed.load(Ordering::SeqCst));
    wait_until(|| h.session.state() == SessionState::Idle);

    h.session.stop();
    assert_eq!(h.session.state(), SessionState::Idle);
}

const FAILED_START: [SessionState; 4] = [
    SessionState::Connecting,
    SessionState::Errored,
    SessionState::Closed,
    SessionState::Idle,
];

#[test]
fn denied_microphone_leaves_session_idle() {
    let h = harness();
    *h.mic.refusal.lock() = Some(LiveError::PermissionDenied("denied by user".to_string()));

    let result = h.session.start();

    assert!(matches!(result, Err(LiveError::PermissionDenied(_))));
    assert_eq!(h.session.state(), SessionState::Idle);
    assert_eq!(h.channel.connects.load(Ordering::SeqCst), 0);
    let events = events_until(&h.events, &LiveEvent::Status(SessionState::Idle));
    assert_eq!(statuses(&events), FAILED_START);
    assert!(events.iter().any(|e| matches!(e, LiveEvent::Error(m) if m.contains("denied"))));
}

#[test]
fn missing_microphone_is_reported_as_permission_denied() {
    let h = harness();
    *h.mic.refusal.lock() = Some(LiveError::PermissionDenied("no default input device".to_string()));

    let result = h.session.start();

    assert!(matches!(result, Err(LiveError::PermissionDenied(ref m)) if m.contains("no default input device")));
    assert_eq!(h.session.state(), SessionState::Idle);
    let events = events_until(&h.events, &LiveEvent::Status(SessionState::Idle));
    assert_eq!(statuses(&events), FAILED_START);
}

#[test]
fn refused_connection_surfaces_errored_then_idle() {
    let h = harness();
    h.channel.refuse.store(true, Ordering::SeqCst);

    let result = h.session.start();

    assert!(matches!(result, Err(LiveError::Connect(_))));
    assert_eq!(h.session.state(), SessionState::Idle);
    let events = events_until(&h.events, &LiveEvent::Status(SessionState::Idle));
    assert_eq!(statuses(&events), FAILED_START);
    assert!(events.iter().any(|e| matches!(e, LiveEvent::Error(m) if m.contains("refused"))));
    assert!(h.mic.stopped.load(Ordering::SeqCst));
    assert_eq!(h.speaker.0.lock().closes, 1);

    h.channel.refuse.store(false, Ordering::SeqCst);
    h.channel.push(r#"{"setupComplete":{}}"#);
    h.session.start().unwrap();
    assert_eq!(h.session.state(), SessionState::Open);
}

#[test]
fn late_capture_callback_after_stop_is_ignored() {
    let h = started();
    h.mic.feed(&[0.25; 4]);
    wait_until(|| h.channel.audio_frames().len() == 1);

    h.session.stop();
    h.mic.feed(&[0.5; 4]);
    std::thread::sleep(Duration::from_millis(20));

    assert!(h.session.input_spectrum().is_empty());
    assert_eq!(h.channel.audio_frames().len(), 1);

    // Nothing captured while stopped leaks into the next session.
    h.channel.push(r#"{"setupComplete":{}}"#);
    h.session.start().unwrap();
    h.mic.feed(&[-0.75; 4]);
    wait_until(|| h.channel.audio_frames().len() == 2);
    std::thread::sleep(Duration::from_millis(20));
    let firsts: Vec<f32> = h.channel.audio_frames().iter().map(|f| f[0]).collect();
    assert_eq!(firsts, vec![0.25, -0.75]);
}

#[test]
fn missing_setup_ack_times_out() {
    let h = harness_with(LiveConfig {
        frame_samples: 4,
        setup_timeout_secs: 0,
        poll_interval_ms: 1,
        ..LiveConfig::default()
    });

    assert_eq!(h.session.start(), Err(LiveError::SetupTimeout(0)));
    assert_eq!(h.session.state(), SessionState::Idle);
    let events = events_until(&h.events, &LiveEvent::Status(SessionState::Idle));
    assert_eq!(statuses(&events), FAILED_START);
    assert!(h.channel.closed.load(Ordering::SeqCst));
    assert!(h.mic.stopped.load(Ordering::SeqCst));
}

#[test]
fn text_turns_are_sent_while_open() {
    let h = harness();
    assert!(h.session.send_text("too early").is_err());

    let h = started();
    h.session.send_text("what's the weather?").unwrap();
    wait_until(|| h.channel.sent.lock().iter().any(|m| m.get("clientContent").is_some()));
    let sent = h.channel.sent.lock();
    let turn = sent.iter().find(|m| m.get("clientContent").is_some()).unwrap();
    assert_eq!(turn["clientContent"]["turns"][0]["parts"][0]["text"], "what's the weather?");
}
