//! Pipeline assembly and supervision
//!
//! [`Pipeline`] owns every component: the datagram pool, the audio engine
//! handed to the block source, the sender worker, the monitor ticker and the
//! shared flags. There is no global state — threads get typed handles.
//!
//! [`AudioEngine`] is the block-source-context half: it runs synchronously
//! inside the source's callback (the DMA bottom half), never blocks and
//! never allocates on the block path.

use crossbeam_channel::{bounded, tick, Receiver, Sender};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::audio::frame::{mono_from_stereo, DISCARDED_BYTE_IDLE};
use crate::audio::gain::GainController;
use crate::audio::source::{BlockSource, DmaEvent};
use crate::codec::Encoder;
use crate::config::Config;
use crate::constants::{SAMPLES_PER_BLOCK, STEREO_WORDS_PER_BLOCK, STOP_DRAIN_GRACE_MS};
use crate::error::{Error, Result};
use crate::events::{Event, EventLog};
use crate::metrics::Metrics;
use crate::network::sender::{FileMirror, SendWorker, SenderExit};
use crate::network::socket::TransportSocket;
use crate::pool::{DatagramPool, PoolProducer};
use crate::status::{StatusIndicator, TracingIndicator};

/// The processing half that lives in the block-source context.
///
/// One call to [`AudioEngine::on_dma_event`] per completion event turns a
/// raw stereo block into one framed datagram in the pool and pokes the
/// sender.
pub struct AudioEngine {
    gain: GainController,
    encoder: Encoder,
    producer: PoolProducer,
    samples: Box<[i32; SAMPLES_PER_BLOCK]>,
    wake_tx: Sender<()>,
    start: Instant,
    events: Arc<EventLog>,
    metrics: Arc<Metrics>,
    indicator: Arc<dyn StatusIndicator>,
}

impl AudioEngine {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        config: &Config,
        producer: PoolProducer,
        wake_tx: Sender<()>,
        events: Arc<EventLog>,
        metrics: Arc<Metrics>,
        indicator: Arc<dyn StatusIndicator>,
    ) -> Result<Self> {
        let encoder = Encoder::new(config.coding).map_err(Error::Codec)?;
        let gain = GainController::new(
            config.audio_desired_unused_bits,
            config.audio_max_shift_bits,
            config.gain_left_shift,
            events.clone(),
        );
        Ok(Self {
            gain,
            encoder,
            producer,
            samples: Box::new([0; SAMPLES_PER_BLOCK]),
            wake_tx,
            start: Instant::now(),
            events,
            metrics,
            indicator,
        })
    }

    /// Dispatch one completion event from the block source. `ring` is the
    /// full double buffer; the event picks the half that completed.
    pub fn on_dma_event(&mut self, event: DmaEvent, ring: &[u32]) {
        match event {
            DmaEvent::RxHalfComplete => {
                self.events.log(Event::DmaRxHalfFull, 0);
                self.on_block(&ring[..STEREO_WORDS_PER_BLOCK]);
            }
            DmaEvent::RxComplete => {
                self.events.log(Event::DmaRxFull, 0);
                self.on_block(&ring[STEREO_WORDS_PER_BLOCK..]);
            }
            DmaEvent::Unknown(code) => self.on_unknown_event(code),
        }
    }

    /// Process one 20 ms block of raw stereo words into a framed datagram
    pub fn on_block(&mut self, raw: &[u32]) {
        assert_eq!(raw.len(), STEREO_WORDS_PER_BLOCK);

        for (i, frame) in raw.chunks_exact(2).enumerate() {
            let (mono, discarded) = mono_from_stereo(frame);
            if discarded != DISCARDED_BYTE_IDLE {
                self.metrics
                    .possible_bad_audio
                    .fetch_add(1, Ordering::Relaxed);
                self.events
                    .log(Event::PossibleBadAudio, discarded as i64);
            }
            self.samples[i] = self.gain.process(mono);
        }

        let timestamp_us = self.start.elapsed().as_micros() as u64;
        let mut slot = self.producer.alloc();
        if slot.overflowed {
            self.indicator.event();
        } else {
            self.indicator.clear_event();
        }
        let sequence = self
            .encoder
            .encode_block(&self.samples, timestamp_us, slot.bytes_mut());
        slot.publish();

        self.metrics.datagrams_framed.fetch_add(1, Ordering::Relaxed);
        self.events
            .log(Event::DatagramReadyToSend, sequence as i64);

        // At most one pending signal; the sender drains everything per wake
        let _ = self.wake_tx.try_send(());
    }

    /// Anything the source reports that is not a completion event
    pub fn on_unknown_event(&mut self, code: i64) {
        self.events.log(Event::DmaUnknown, code);
        self.indicator.bad();
        tracing::error!("unexpected block-source event {:#x}", code);
    }

    /// Current adaptive gain shift in bits
    pub fn gain_shift(&self) -> u32 {
        self.gain.shift()
    }
}

/// Handle for requesting a stop from outside the pipeline
#[derive(Clone)]
pub struct StopHandle {
    stop: Arc<AtomicBool>,
    events: Arc<EventLog>,
}

impl StopHandle {
    pub fn stop(&self) {
        if !self.stop.swap(true, Ordering::SeqCst) {
            self.events.log(Event::StopRequested, 0);
            tracing::info!("stop requested");
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }
}

/// The owning pipeline value, constructed once at startup
pub struct Pipeline {
    config: Config,
    engine: Option<AudioEngine>,
    worker: Option<SendWorker>,
    pool: Arc<DatagramPool>,
    wake_tx: Sender<()>,
    stop: Arc<AtomicBool>,
    network_connected: Arc<AtomicBool>,
    events: Arc<EventLog>,
    metrics: Arc<Metrics>,
    indicator: Arc<dyn StatusIndicator>,
}

impl Pipeline {
    /// Validate the configuration and allocate every buffer the data path
    /// will ever need.
    pub fn new(config: Config) -> Result<Self> {
        Self::with_indicator(config, Arc::new(TracingIndicator::new()))
    }

    pub fn with_indicator(config: Config, indicator: Arc<dyn StatusIndicator>) -> Result<Self> {
        config.validate()?;

        let events = Arc::new(EventLog::new());
        let metrics = Arc::new(Metrics::new(config.max_num_datagrams));
        let (producer, consumer) = DatagramPool::new(
            config.max_num_datagrams,
            config.coding.datagram_size(),
            events.clone(),
            metrics.clone(),
        );
        let pool = producer.pool().clone();
        let (wake_tx, wake_rx): (Sender<()>, Receiver<()>) = bounded(1);

        let stop = Arc::new(AtomicBool::new(false));
        let network_connected = Arc::new(AtomicBool::new(false));

        let engine = AudioEngine::new(
            &config,
            producer,
            wake_tx.clone(),
            events.clone(),
            metrics.clone(),
            indicator.clone(),
        )?;

        let mut worker = SendWorker::new(
            &config,
            consumer,
            wake_rx,
            network_connected.clone(),
            events.clone(),
            metrics.clone(),
            indicator.clone(),
        );

        if let Some(path) = &config.local_file {
            worker.mirror = Some(FileMirror::create(
                path,
                config.coding.body_size(),
                config.max_num_datagrams,
                events.clone(),
            )?);
        }

        Ok(Self {
            config,
            engine: Some(engine),
            worker: Some(worker),
            pool,
            wake_tx,
            stop,
            network_connected,
            events,
            metrics,
            indicator,
        })
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            stop: self.stop.clone(),
            events: self.events.clone(),
        }
    }

    pub fn events(&self) -> &Arc<EventLog> {
        &self.events
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Run the pipeline to completion: start the source, keep the link up,
    /// and shut everything down cleanly on stop or when the configured
    /// stream duration elapses.
    pub fn run(&mut self, source: &mut dyn BlockSource) -> Result<()> {
        let engine = self
            .engine
            .take()
            .ok_or_else(|| Error::Config("pipeline already ran".into()))?;
        let worker = self
            .worker
            .take()
            .ok_or_else(|| Error::Config("pipeline already ran".into()))?;

        let monitor = self.spawn_monitor().map_err(Error::Io)?;

        if let Err(e) = source.start(engine) {
            self.stop.store(true, Ordering::SeqCst);
            let _ = monitor.join();
            return Err(Error::Audio(e));
        }
        self.events.log(Event::SourceStart, 0);
        self.indicator.good();
        let stream_start = Instant::now();

        // The worker commutes between this slot and the sender thread
        let mut worker_slot = Some(worker);
        let mut startup_retried = false;
        let mut ever_connected = false;
        let mut clean_stop = false;

        let result = loop {
            if self.should_stop(stream_start) {
                clean_stop = true;
                break Ok(());
            }

            // Link bring-up; reconnects land here with the socket cleared
            let needs_socket = self
                .worker_needs_socket(worker_slot.as_ref());
            if needs_socket {
                match self.connect() {
                    Ok(socket) => {
                        if let Some(w) = worker_slot.as_mut() {
                            w.socket = Some(socket);
                        }
                        ever_connected = true;
                        self.indicator.good();
                    }
                    Err(e) => {
                        if !ever_connected {
                            if startup_retried {
                                break Err(Error::Network(e));
                            }
                            startup_retried = true;
                        }
                        tracing::warn!(
                            "connect failed ({}), retrying in {:?}",
                            e,
                            self.config.retry_wait
                        );
                        self.sleep_unless_stopped(self.config.retry_wait);
                        continue;
                    }
                }
            }

            let Some(worker) = worker_slot.take() else {
                break Err(Error::Io(io::Error::other("sender worker lost")));
            };
            self.network_connected.store(true, Ordering::SeqCst);
            let _ = self.wake_tx.try_send(());
            let handle = match thread::Builder::new()
                .name("sender".into())
                .spawn(move || worker.run())
            {
                Ok(handle) => handle,
                Err(e) => break Err(Error::Io(e)),
            };

            // Wait for a stop condition or for the sender to give up
            let stopping = loop {
                if self.should_stop(stream_start) {
                    break true;
                }
                if handle.is_finished() {
                    break false;
                }
                thread::sleep(Duration::from_millis(20));
            };

            if stopping {
                // Stop the source first, give the sender its drain grace,
                // then take the flag down and wake it a final time
                source.stop();
                self.events.log(Event::SourceStop, 0);
                thread::sleep(Duration::from_millis(STOP_DRAIN_GRACE_MS));
                self.stop.store(true, Ordering::SeqCst);
                self.network_connected.store(false, Ordering::SeqCst);
                let _ = self.wake_tx.try_send(());
            }

            let (exit, returned) = match handle.join() {
                Ok(pair) => pair,
                Err(_) => break Err(Error::Io(io::Error::other("sender thread panicked"))),
            };
            worker_slot = Some(returned);

            if stopping {
                clean_stop = true;
                break Ok(());
            }

            match exit {
                SenderExit::LinkDown => {
                    if let Some(w) = worker_slot.as_mut() {
                        w.socket = None;
                    }
                    tracing::info!("link lost, reconnecting in {:?}", self.config.retry_wait);
                    self.sleep_unless_stopped(self.config.retry_wait);
                }
                SenderExit::Stopped => {
                    clean_stop = true;
                    break Ok(());
                }
            }
        };

        // Make sure everything is down regardless of how the loop ended
        self.stop.store(true, Ordering::SeqCst);
        self.network_connected.store(false, Ordering::SeqCst);
        source.stop();
        if let Some(mirror) = worker_slot.as_mut().and_then(|w| w.mirror.take()) {
            mirror.finish();
        }
        let _ = monitor.join();
        self.events.log(Event::LogStop, 0);

        if clean_stop {
            tracing::info!("pipeline stopped cleanly");
        }
        result
    }

    fn worker_needs_socket(&self, worker: Option<&SendWorker>) -> bool {
        self.config.server.is_some() && worker.map(|w| w.socket.is_none()).unwrap_or(false)
    }

    fn connect(&self) -> std::result::Result<TransportSocket, crate::error::NetworkError> {
        let server = self.config.server.as_deref().unwrap_or_default();
        match TransportSocket::connect(self.config.transport, server) {
            Ok(socket) => {
                self.events.log(Event::NetworkStart, 0);
                if self.config.transport == crate::config::Transport::Tcp {
                    self.events.log(Event::TcpConnected, 0);
                }
                tracing::info!(
                    "connected to {} over {}",
                    server,
                    self.config.transport
                );
                Ok(socket)
            }
            Err(e) => {
                self.events.log(Event::NetworkStartFailure, 0);
                Err(e)
            }
        }
    }

    fn should_stop(&self, stream_start: Instant) -> bool {
        if self.stop.load(Ordering::SeqCst) {
            return true;
        }
        match self.config.stream_duration {
            Some(limit) => stream_start.elapsed() >= limit,
            None => false,
        }
    }

    fn sleep_unless_stopped(&self, duration: Duration) {
        let deadline = Instant::now() + duration;
        while Instant::now() < deadline && !self.stop.load(Ordering::SeqCst) {
            thread::sleep(Duration::from_millis(20));
        }
    }

    /// Once-per-second counter sampling
    fn spawn_monitor(&self) -> io::Result<JoinHandle<()>> {
        let stop = self.stop.clone();
        let metrics = self.metrics.clone();
        let events = self.events.clone();
        let pool = self.pool.clone();
        let ticker = tick(Duration::from_secs(1));

        thread::Builder::new().name("monitor".into()).spawn(move || {
            while !stop.load(Ordering::SeqCst) {
                if ticker.recv().is_err() {
                    break;
                }
                let snapshot = metrics.snapshot();
                events.log(Event::NumDatagramsFree, pool.free_slots() as i64);
                tracing::debug!(
                    framed = snapshot.datagrams_framed,
                    sent = snapshot.datagrams_sent,
                    failures = snapshot.send_failures,
                    overflows = snapshot.overflows,
                    queued = pool.available_to_send(),
                    peak_send_us = snapshot.peak_send_duration_us,
                    "pipeline counters"
                );
            }
        })
    }
}
