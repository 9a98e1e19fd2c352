//! Block sources
//!
//! A block source owns the double-buffered stereo ring and drives the
//! [`AudioEngine`] with one completion event per 20 ms block, the way a
//! free-running DMA peripheral would: half-complete hands over block A,
//! full-complete hands over block B, and the source re-arms itself without
//! ever blocking on the downstream pipeline.
//!
//! [`ToneSource`] is the built-in generator used for bring-up and tests; the
//! live microphone source lives in [`crate::audio::capture`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::audio::frame::pack_stereo;
use crate::constants::{BLOCK_DURATION_MS, RAW_RING_WORDS, SAMPLES_PER_BLOCK};
use crate::error::AudioError;
use crate::pipeline::AudioEngine;

/// Completion events a block source reports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmaEvent {
    /// First half of the ring (block A) is ready
    RxHalfComplete,
    /// Second half of the ring (block B) is ready
    RxComplete,
    /// Anything else the hardware might report
    Unknown(i64),
}

/// A producer of raw stereo blocks.
///
/// `start` consumes the engine: the source owns it from then on and invokes
/// it from its capture context until `stop`.
pub trait BlockSource {
    fn start(&mut self, engine: AudioEngine) -> Result<(), AudioError>;
    fn stop(&mut self);
}

/// Test waveforms the built-in source can stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Waveform {
    Silence,
    /// Full-scale 400 Hz sine from the canned 40-sample table
    Tone400Hz,
}

/// A 400 Hz sine wave as signed 24-bit PCM at 16 kHz, sign extended to
/// 32 bits per sample
pub const PCM_400HZ_SIGNED_24BIT: [i32; 40] = [
    0x0000_0000,
    0x0010_04d5,
    0x001f_a4b2,
    0x002e_7d16,
    0x003c_3070,
    0x0048_6861,
    0x0052_d7e5,
    0x005b_3d33,
    0x0061_6360,
    0x0065_23a8,
    0x0066_6666,
    0x0065_23a8,
    0x0061_6360,
    0x005b_3d33,
    0x0052_d7e5,
    0x0048_6861,
    0x003c_3070,
    0x002e_7d16,
    0x001f_a4b2,
    0x0010_04d5,
    0x0000_0000,
    0xffef_fb2au32 as i32,
    0xffe0_5b4eu32 as i32,
    0xffd1_82e9u32 as i32,
    0xffc3_cf90u32 as i32,
    0xffb7_979eu32 as i32,
    0xffad_281bu32 as i32,
    0xffa4_c2ccu32 as i32,
    0xff9e_9ca0u32 as i32,
    0xff9a_dc57u32 as i32,
    0xff99_9999u32 as i32,
    0xff9a_dc57u32 as i32,
    0xff9e_9ca0u32 as i32,
    0xffa4_c2ccu32 as i32,
    0xffad_281bu32 as i32,
    0xffb7_979eu32 as i32,
    0xffc3_cf90u32 as i32,
    0xffd1_82e9u32 as i32,
    0xffe0_5b4eu32 as i32,
    0xffef_fb2au32 as i32,
];

/// Generates blocks at real-time pacing without any audio hardware
pub struct ToneSource {
    waveform: Waveform,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl ToneSource {
    pub fn new(waveform: Waveform) -> Self {
        Self {
            waveform,
            running: Arc::new(AtomicBool::new(false)),
            handle: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl BlockSource for ToneSource {
    fn start(&mut self, mut engine: AudioEngine) -> Result<(), AudioError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(AudioError::AlreadyRunning);
        }

        let running = self.running.clone();
        let waveform = self.waveform;

        let handle = thread::Builder::new()
            .name("audio-source".into())
            .spawn(move || {
                let mut ring = vec![0u32; RAW_RING_WORDS].into_boxed_slice();
                let mut tone_index = 0usize;
                let mut half_pending = true;
                let block_duration = Duration::from_millis(BLOCK_DURATION_MS as u64);
                let mut next_deadline = Instant::now() + block_duration;

                while running.load(Ordering::Relaxed) {
                    let half = if half_pending { 0 } else { RAW_RING_WORDS / 2 };
                    for frame in ring[half..half + RAW_RING_WORDS / 2].chunks_exact_mut(2) {
                        let sample = match waveform {
                            Waveform::Silence => 0,
                            Waveform::Tone400Hz => {
                                let s = PCM_400HZ_SIGNED_24BIT[tone_index];
                                tone_index = (tone_index + 1) % PCM_400HZ_SIGNED_24BIT.len();
                                s
                            }
                        };
                        frame.copy_from_slice(&pack_stereo(sample));
                    }

                    // Hold real-time pacing before announcing the block
                    let now = Instant::now();
                    if next_deadline > now {
                        thread::sleep(next_deadline - now);
                    }
                    next_deadline += block_duration;

                    let event = if half_pending {
                        DmaEvent::RxHalfComplete
                    } else {
                        DmaEvent::RxComplete
                    };
                    engine.on_dma_event(event, &ring);
                    half_pending = !half_pending;
                }
            })
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        self.handle = Some(handle);
        Ok(())
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for ToneSource {
    fn drop(&mut self) {
        self.stop();
    }
}
