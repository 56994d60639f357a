//! Audio device seams plus their cpal implementations.
//!
//! cpal streams are not `Send`, so each device keeps its stream on a dedicated
//! thread and talks to it through shared state.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::JoinHandle;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use parking_lot::Mutex;

use super::pcm::{downmix, Resampler, OUTPUT_SAMPLE_RATE};
use crate::error::LiveError;

/// Receives fixed-size mono blocks from the capture thread.
pub type BlockSink = Box<dyn FnMut(&[f32]) + Send + 'static>;

pub trait Microphone: Send {
    /// Start delivering `block_size`-sample mono blocks at `sample_rate` to `sink`.
    fn open(&mut self, sample_rate: u32, block_size: usize, sink: BlockSink) -> Result<(), LiveError>;
    fn stop(&mut self);
    fn is_stopped(&self) -> bool;
}

pub trait Speaker: Send {
    fn open(&mut self) -> Result<(), LiveError>;
    /// Seconds of audio rendered since `open`.
    fn current_time(&self) -> f64;
    /// Queue 24 kHz mono `samples` to start at `start` seconds.
    fn schedule(&mut self, start: f64, samples: Vec<f32>);
    /// Drop everything queued and not yet played.
    fn clear(&mut self);
    /// RMS of the most recently rendered audio, 0..1.
    fn output_level(&self) -> f32;
    fn close(&mut self);
}

fn default_host() -> cpal::Host {
    #[cfg(target_os = "windows")]
    let host = cpal::host_from_id(cpal::HostId::Wasapi).unwrap_or(cpal::default_host());
    #[cfg(not(target_os = "windows"))]
    let host = cpal::default_host();
    host
}

/// Splits arbitrary-sized callback buffers into fixed blocks.
struct BlockAssembler {
    pending: Vec<f32>,
    block_size: usize,
    resampler: Resampler,
    channels: usize,
    sink: BlockSink,
}

impl BlockAssembler {
    fn push(&mut self, interleaved: &[f32]) {
        let mono = downmix(interleaved, self.channels);
        self.pending.extend(self.resampler.process(&mono));
        while self.pending.len() >= self.block_size {
            let block: Vec<f32> = self.pending.drain(..self.block_size).collect();
            (self.sink)(&block);
        }
    }
}

/// Default input device via cpal.
pub struct CpalMicrophone {
    stop_signal: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl CpalMicrophone {
    pub fn new() -> Self {
        Self {
            stop_signal: Arc::new(AtomicBool::new(true)),
            worker: None,
        }
    }

    fn build_stream(
        device: &cpal::Device,
        supported: &cpal::SupportedStreamConfig,
        assembler: BlockAssembler,
    ) -> Result<cpal::Stream, LiveError> {
        let config = supported.config();
        let on_error = |e: cpal::StreamError| tracing::error!(target: "nexus::audio", "Input stream error: {}", e);

        let stream = match supported.sample_format() {
            cpal::SampleFormat::F32 => {
                let mut assembler = assembler;
                device.build_input_stream(
                    &config,
                    move |data: &[f32], _: &_| assembler.push(data),
                    on_error,
                    None,
                )
            }
            cpal::SampleFormat::I16 => {
                let mut assembler = assembler;
                device.build_input_stream(
                    &config,
                    move |data: &[i16], _: &_| {
                        let floats: Vec<f32> = data.iter().map(|&s| s as f32 / 32768.0).collect();
                        assembler.push(&floats);
                    },
                    on_error,
                    None,
                )
            }
            other => {
                return Err(LiveError::Device(format!("unsupported input sample format {:?}", other)));
            }
        };
        stream.map_err(|e| LiveError::PermissionDenied(e.to_string()))
    }
}

impl Default for CpalMicrophone {
    fn default() -> Self {
        Self::new()
    }
}

impl Microphone for CpalMicrophone {
    fn open(&mut self, sample_rate: u32, block_size: usize, sink: BlockSink) -> Result<(), LiveError> {
        self.stop();
        let stop_signal = Arc::new(AtomicBool::new(false));
        self.stop_signal = stop_signal.clone();

        let (ready_tx, ready_rx) = mpsc::channel::<Result<(), LiveError>>();
        let worker = std::thread::Builder::new()
            .name("nexus-mic".to_string())
            .spawn(move || {
                let host = default_host();
                let Some(device) = host.default_input_device() else {
                    let _ = ready_tx.send(Err(LiveError::PermissionDenied("no default input device".to_string())));
                    return;
                };
                let supported = match device.default_input_config() {
                    Ok(c) => c,
                    Err(e) => {
                        let _ = ready_tx.send(Err(LiveError::PermissionDenied(e.to_string())));
                        return;
                    }
                };
                let assembler = BlockAssembler {
                    pending: Vec::with_capacity(block_size * 2),
                    block_size: block_size.max(1),
                    resampler: Resampler::new(u32::from(supported.sample_rate()), sample_rate),
                    channels: supported.channels() as usize,
                    sink,
                };
                let stream = match Self::build_stream(&device, &supported, assembler) {
                    Ok(s) => s,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(LiveError::PermissionDenied(e.to_string())));
                    return;
                }
                tracing::info!(
                    target: "nexus::audio",
                    rate = u32::from(supported.sample_rate()),
                    channels = supported.channels(),
                    "Microphone capturing"
                );
                let _ = ready_tx.send(Ok(()));

                while !stop_signal.load(Ordering::SeqCst) {
                    std::thread::park_timeout(Duration::from_millis(50));
                }
                drop(stream);
                tracing::debug!(target: "nexus::audio", "Microphone released");
            })
            .map_err(|e| LiveError::Device(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                self.worker = Some(worker);
                Ok(())
            }
            Ok(Err(e)) => {
                self.stop_signal.store(true, Ordering::SeqCst);
                let _ = worker.join();
                Err(e)
            }
            Err(_) => {
                self.stop_signal.store(true, Ordering::SeqCst);
                let _ = worker.join();
                Err(LiveError::Device("capture thread exited during setup".to_string()))
            }
        }
    }

    fn stop(&mut self) {
        self.stop_signal.store(true, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            worker.thread().unpark();
            let _ = worker.join();
        }
    }

    fn is_stopped(&self) -> bool {
        self.stop_signal.load(Ordering::SeqCst)
    }
}

impl Drop for CpalMicrophone {
    fn drop(&mut self) {
        self.stop();
    }
}

struct ScheduledBuffer {
    /// First sample index on the 24 kHz timeline
    start: u64,
    samples: Vec<f32>,
}

impl ScheduledBuffer {
    fn end(&self) -> u64 {
        self.start + self.samples.len() as u64
    }
}

/// State shared between the speaker handle and the render callback.
struct RenderState {
    queue: Mutex<VecDeque<ScheduledBuffer>>,
    /// Device frames rendered since open
    frames: AtomicU64,
    device_rate: AtomicU32,
    level_bits: AtomicU32,
}

impl RenderState {
    fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            frames: AtomicU64::new(0),
            device_rate: AtomicU32::new(OUTPUT_SAMPLE_RATE * 2),
            level_bits: AtomicU32::new(0f32.to_bits()),
        }
    }

    /// Fill `out` (interleaved, `channels` wide) from the queue, advancing the clock.
    fn render(&self, out: &mut [f32], channels: usize) {
        let channels = channels.max(1);
        let device_rate = self.device_rate.load(Ordering::Relaxed).max(1) as u64;
        let mut frame = self.frames.load(Ordering::Relaxed);
        let mut queue = self.queue.lock();
        let mut sum_sq = 0.0f32;
        let mut count = 0usize;

        for slot in out.chunks_mut(channels) {
            let position = frame * OUTPUT_SAMPLE_RATE as u64 / device_rate;
            while queue.front().is_some_and(|b| b.end() <= position) {
                queue.pop_front();
            }
            let sample = match queue.front() {
                Some(buffer) if buffer.start <= position => {
                    buffer.samples[(position - buffer.start) as usize]
                }
                _ => 0.0,
            };
            // mono source duplicated on every channel
            for channel in slot.iter_mut() {
                *channel = sample;
            }
            sum_sq += sample * sample;
            count += 1;
            frame += 1;
        }
        drop(queue);

        self.frames.store(frame, Ordering::Relaxed);
        let level = if count == 0 { 0.0 } else { (sum_sq / count as f32).sqrt() };
        self.level_bits.store(level.to_bits(), Ordering::Relaxed);
    }
}

/// Default output device via cpal. Replies are rendered at their scheduled
/// start times and silence fills the gaps.
pub struct CpalSpeaker {
    state: Arc<RenderState>,
    stop_signal: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl CpalSpeaker {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RenderState::new()),
            stop_signal: Arc::new(AtomicBool::new(true)),
            worker: None,
        }
    }

    fn build_stream(
        device: &cpal::Device,
        supported: &cpal::SupportedStreamConfig,
        state: Arc<RenderState>,
    ) -> Result<cpal::Stream, LiveError> {
        let config = supported.config();
        let channels = config.channels as usize;
        let on_error = |e: cpal::StreamError| tracing::error!(target: "nexus::audio", "Output stream error: {}", e);

        let stream = match supported.sample_format() {
            cpal::SampleFormat::F32 => device.build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| state.render(data, channels),
                on_error,
                None,
            ),
            cpal::SampleFormat::I16 => {
                let mut scratch: Vec<f32> = Vec::new();
                device.build_output_stream(
                    &config,
                    move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                        scratch.resize(data.len(), 0.0);
                        state.render(&mut scratch, channels);
                        for (dst, &src) in data.iter_mut().zip(scratch.iter()) {
                            *dst = (src.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
                        }
                    },
                    on_error,
                    None,
                )
            }
            other => {
                return Err(LiveError::Device(format!("unsupported output sample format {:?}", other)));
            }
        };
        stream.map_err(|e| LiveError::Device(e.to_string()))
    }
}

impl Default for CpalSpeaker {
    fn default() -> Self {
        Self::new()
    }
}

impl Speaker for CpalSpeaker {
    fn open(&mut self) -> Result<(), LiveError> {
        self.close();
        self.state = Arc::new(RenderState::new());
        let stop_signal = Arc::new(AtomicBool::new(false));
        self.stop_signal = stop_signal.clone();
        let state = self.state.clone();

        let (ready_tx, ready_rx) = mpsc::channel::<Result<(), LiveError>>();
        let worker = std::thread::Builder::new()
            .name("nexus-speaker".to_string())
            .spawn(move || {
                let host = default_host();
                let Some(device) = host.default_output_device() else {
                    let _ = ready_tx.send(Err(LiveError::Device("no default output device".to_string())));
                    return;
                };
                let supported = match device.default_output_config() {
                    Ok(c) => c,
                    Err(e) => {
                        let _ = ready_tx.send(Err(LiveError::Device(e.to_string())));
                        return;
                    }
                };
                state
                    .device_rate
                    .store(u32::from(supported.sample_rate()), Ordering::Relaxed);
                let stream = match Self::build_stream(&device, &supported, state) {
                    Ok(s) => s,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(LiveError::Device(e.to_string())));
                    return;
                }
                let _ = ready_tx.send(Ok(()));

                while !stop_signal.load(Ordering::SeqCst) {
                    std::thread::park_timeout(Duration::from_millis(50));
                }
                drop(stream);
            })
            .map_err(|e| LiveError::Device(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                self.worker = Some(worker);
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = worker.join();
                Err(e)
            }
            Err(_) => {
                let _ = worker.join();
                Err(LiveError::Device("playback thread exited during setup".to_string()))
            }
        }
    }

    fn current_time(&self) -> f64 {
        let rate = self.state.device_rate.load(Ordering::Relaxed).max(1);
        self.state.frames.load(Ordering::Relaxed) as f64 / rate as f64
    }

    fn schedule(&mut self, start: f64, samples: Vec<f32>) {
        if samples.is_empty() {
            return;
        }
        let start = (start.max(0.0) * OUTPUT_SAMPLE_RATE as f64).round() as u64;
        self.state
            .queue
            .lock()
            .push_back(ScheduledBuffer { start, samples });
    }

    fn clear(&mut self) {
        self.state.queue.lock().clear();
    }

    fn output_level(&self) -> f32 {
        f32::from_bits(self.state.level_bits.load(Ordering::Relaxed))
    }

    fn close(&mut self) {
        self.stop_signal.store(true, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            worker.thread().unpark();
            let _ = worker.join();
        }
        self.state.queue.lock().clear();
        self.state.level_bits.store(0f32.to_bits(), Ordering::Relaxed);
    }
}

impl Drop for CpalSpeaker {
    fn drop(&mut self) {
        self.close();
    }
}
