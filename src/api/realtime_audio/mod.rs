//! Duplex audio streaming with the live model.
//!
//! Microphone blocks are encoded as 16 kHz PCM16 and streamed over a
//! bidirectional channel; 24 kHz replies are decoded and scheduled back to
//! back on the speaker.

pub mod analysis;
pub mod devices;
pub mod messages;
pub mod pcm;
pub mod scheduler;
pub mod session;
pub mod state;
pub mod websocket;

pub use analysis::{SpectrumAnalyzer, SpeakingDetector};
pub use devices::{BlockSink, CpalMicrophone, CpalSpeaker, Microphone, Speaker};
pub use messages::{decode_server_message, ClientMessage, FunctionCall, LiveSetup, ServerMessage};
pub use pcm::{
    decode_frame_base64, decode_pcm16, encode_frame, encode_pcm16, AudioFrame, Resampler,
    INPUT_MIME_TYPE, INPUT_SAMPLE_RATE, OUTPUT_SAMPLE_RATE,
};
pub use scheduler::PlaybackScheduler;
pub use session::{LiveEvent, LiveSession};
pub use state::{SessionEvent, SessionState};
pub use websocket::{GeminiLiveConnector, Inbound, LiveChannel, LiveConnector};
