//! Live microphone block source
//!
//! Captures from a real input device via cpal and adapts it to the block
//! contract: captured samples are converted to 24-bit left-channel frames in
//! the microphone wire layout, accumulated into the double-buffered ring and
//! announced to the engine one block at a time. The capture thread is named,
//! kept alive by a running flag and funnels stream errors through a bounded
//! channel, so a dead device surfaces without killing the pipeline.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::StreamConfig;
use crossbeam_channel::{bounded, Receiver};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::audio::frame::pack_stereo;
use crate::audio::source::{BlockSource, DmaEvent};
use crate::constants::{RAW_RING_WORDS, SAMPLING_FREQUENCY};
use crate::error::AudioError;
use crate::pipeline::AudioEngine;

/// Names of the available input devices, default first
pub fn list_input_devices() -> Vec<String> {
    let host = cpal::default_host();
    let default_name = host.default_input_device().and_then(|d| d.name().ok());

    let mut names = Vec::new();
    if let Some(name) = &default_name {
        names.push(name.clone());
    }
    if let Ok(devices) = host.input_devices() {
        for device in devices {
            if let Ok(name) = device.name() {
                if Some(&name) != default_name.as_ref() {
                    names.push(name);
                }
            }
        }
    }
    names
}

fn find_input_device(name: Option<&str>) -> Result<cpal::Device, AudioError> {
    let host = cpal::default_host();
    match name {
        None => host
            .default_input_device()
            .ok_or_else(|| AudioError::DeviceNotFound("no default input device".into())),
        Some(wanted) => {
            let devices = host
                .input_devices()
                .map_err(|e| AudioError::CpalError(e.to_string()))?;
            for device in devices {
                if device.name().map(|n| n == wanted).unwrap_or(false) {
                    return Ok(device);
                }
            }
            Err(AudioError::DeviceNotFound(wanted.to_string()))
        }
    }
}

/// Block source backed by a cpal input stream
pub struct MicCapture {
    device_name: Option<String>,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    error_rx: Option<Receiver<AudioError>>,
}

impl MicCapture {
    /// Capture from the named device, or the default input when `None`
    pub fn new(device_name: Option<String>) -> Self {
        Self {
            device_name,
            running: Arc::new(AtomicBool::new(false)),
            handle: None,
            error_rx: None,
        }
    }

    /// Check for asynchronous stream errors
    pub fn check_errors(&self) -> Option<AudioError> {
        self.error_rx.as_ref().and_then(|rx| rx.try_recv().ok())
    }
}

impl BlockSource for MicCapture {
    fn start(&mut self, mut engine: AudioEngine) -> Result<(), AudioError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(AudioError::AlreadyRunning);
        }

        let device = find_input_device(self.device_name.as_deref())?;
        let device_name = device.name().unwrap_or_else(|_| "unknown".into());

        let default_config = device
            .default_input_config()
            .map_err(|e| AudioError::DeviceNotFound(e.to_string()))?;
        let channels = default_config.channels();

        let config = StreamConfig {
            channels,
            sample_rate: cpal::SampleRate(SAMPLING_FREQUENCY),
            buffer_size: cpal::BufferSize::Default,
        };

        let (error_tx, error_rx) = bounded::<AudioError>(16);
        self.error_rx = Some(error_rx);

        let running = self.running.clone();
        let running_for_loop = self.running.clone();

        tracing::info!(
            "capturing from '{}' at {} Hz, using channel 0 of {}",
            device_name,
            SAMPLING_FREQUENCY,
            channels
        );

        let handle = thread::Builder::new()
            .name("mic-capture".into())
            .spawn(move || {
                let mut ring = vec![0u32; RAW_RING_WORDS].into_boxed_slice();
                let mut write_frame = 0usize;
                let frames_per_half = RAW_RING_WORDS / 4;
                let error_tx_stream = error_tx.clone();

                let stream = device.build_input_stream(
                    &config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        if !running.load(Ordering::Relaxed) {
                            return;
                        }
                        for frame in data.chunks_exact(channels as usize) {
                            let sample =
                                (frame[0].clamp(-1.0, 1.0) * 8_388_607.0) as i32;
                            let words = pack_stereo(sample);
                            ring[write_frame * 2] = words[0];
                            ring[write_frame * 2 + 1] = words[1];
                            write_frame += 1;

                            if write_frame == frames_per_half {
                                engine.on_dma_event(DmaEvent::RxHalfComplete, &ring);
                            } else if write_frame == frames_per_half * 2 {
                                engine.on_dma_event(DmaEvent::RxComplete, &ring);
                                write_frame = 0;
                            }
                        }
                    },
                    move |err| {
                        let _ = error_tx_stream.try_send(AudioError::StreamError(err.to_string()));
                    },
                    None,
                );

                match stream {
                    Ok(stream) => {
                        if let Err(e) = stream.play() {
                            tracing::error!("failed to start capture stream: {}", e);
                            let _ = error_tx.try_send(AudioError::StreamError(e.to_string()));
                            return;
                        }
                        // Keep the stream alive while running
                        while running_for_loop.load(Ordering::Relaxed) {
                            thread::sleep(Duration::from_millis(10));
                        }
                    }
                    Err(e) => {
                        tracing::error!("failed to build capture stream: {}", e);
                        let _ = error_tx.try_send(AudioError::StreamError(e.to_string()));
                    }
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

impl Drop for MicCapture {
    fn drop(&mut self) {
        self.stop();
    }
}
