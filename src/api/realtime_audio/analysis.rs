//! Level and spectrum instrumentation for visualizers. Nothing here touches
//! the audio that is sent or played.

use std::collections::VecDeque;
use std::f32::consts::PI;
use std::sync::Arc;

use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};

pub const FFT_SIZE: usize = 256;
pub const SMOOTHING: f32 = 0.5;
pub const MIN_DECIBELS: f32 = -100.0;
pub const MAX_DECIBELS: f32 = -30.0;

/// Byte-scaled magnitude spectrum with exponential smoothing between blocks.
pub struct SpectrumAnalyzer {
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    smoothed: Vec<f32>,
    scratch: Vec<Complex<f32>>,
}

impl SpectrumAnalyzer {
    pub fn new() -> Self {
        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(FFT_SIZE);
        let window = (0..FFT_SIZE)
            .map(|i| {
                let x = 2.0 * PI * i as f32 / FFT_SIZE as f32;
                0.42 - 0.5 * x.cos() + 0.08 * (2.0 * x).cos()
            })
            .collect();
        Self {
            fft,
            window,
            smoothed: vec![0.0; FFT_SIZE / 2],
            scratch: vec![Complex::new(0.0, 0.0); FFT_SIZE],
        }
    }

    /// Feed one captured block. Only the newest `FFT_SIZE` samples are analysed;
    /// shorter blocks are zero-padded at the front.
    pub fn process(&mut self, block: &[f32]) {
        let tail = &block[block.len().saturating_sub(FFT_SIZE)..];
        let pad = FFT_SIZE - tail.len();

        for (i, slot) in self.scratch.iter_mut().enumerate() {
            let sample = if i < pad { 0.0 } else { tail[i - pad] };
            *slot = Complex::new(sample * self.window[i], 0.0);
        }
        self.fft.process(&mut self.scratch);

        for (bin, value) in self.smoothed.iter_mut().enumerate() {
            let magnitude = self.scratch[bin].norm() / FFT_SIZE as f32;
            *value = SMOOTHING * *value + (1.0 - SMOOTHING) * magnitude;
        }
    }

    /// Current spectrum, one byte per bin, `MIN_DECIBELS..MAX_DECIBELS` mapped to `0..=255`.
    pub fn byte_frequency_data(&self) -> Vec<u8> {
        self.smoothed.iter().map(|&m| magnitude_to_byte(m)).collect()
    }
}

impl Default for SpectrumAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

fn magnitude_to_byte(magnitude: f32) -> u8 {
    if magnitude <= 0.0 {
        return 0;
    }
    let db = 20.0 * magnitude.log10();
    let scaled = 255.0 * (db - MIN_DECIBELS) / (MAX_DECIBELS - MIN_DECIBELS);
    scaled.clamp(0.0, 255.0) as u8
}

/// RMS amplitude (0..1) on the 0..255 scale used by [`SpeakingDetector`].
pub fn rms_to_level(rms: f32) -> f32 {
    (rms * 255.0).clamp(0.0, 255.0)
}

/// Moving-average gate on the output level deciding whether the remote side is talking.
#[derive(Debug, Clone)]
pub struct SpeakingDetector {
    threshold: f32,
    window: usize,
    history: VecDeque<f32>,
    speaking: bool,
}

impl SpeakingDetector {
    pub fn new(threshold: f32, window: usize) -> Self {
        let window = window.max(1);
        Self {
            threshold,
            window,
            history: VecDeque::with_capacity(window),
            speaking: false,
        }
    }

    /// Record one level sample. Returns the new state when it flips.
    pub fn observe(&mut self, level: f32) -> Option<bool> {
        if self.history.len() == self.window {
            self.history.pop_front();
        }
        self.history.push_back(level);

        let average = self.history.iter().sum::<f32>() / self.history.len() as f32;
        let speaking = average > self.threshold;
        if speaking != self.speaking {
            self.speaking = speaking;
            Some(speaking)
        } else {
            None
        }
    }

    pub fn is_speaking(&self) -> bool {
        self.speaking
    }

    pub fn reset(&mut self) {
        self.history.clear();
        self.speaking = false;
    }
}
