//! Sender thread
//!
//! Drains the datagram pool in strict order. The worker wakes on the
//! datagram-ready signal or, failing that, once per
//! `send_run_anyway_time`, so shutdown latency stays bounded even if a
//! signal is lost. Each datagram is copied out of its slot, timed, and
//! sent under the transport's deadline; the slot is released on success
//! (or, for plain UDP, after the attempt regardless of outcome — there
//! is no point retrying a datagram the network may already have).
//!
//! Failures feed a bad-send window: when errors have persisted longer
//! than `max_duration_socket_errors`, or the error says the connection
//! is gone, the worker clears the network-connected flag and returns so
//! the supervisor can reconnect after its back-off.

use crossbeam_channel::{Receiver, RecvTimeoutError};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::{Config, Transport};
use crate::constants::{BLOCK_DURATION_MS, URTP_HEADER_SIZE};
use crate::error::NetworkError;
use crate::events::{Event, EventLog};
use crate::metrics::Metrics;
use crate::network::socket::TransportSocket;
use crate::pool::PoolConsumer;
use crate::status::StatusIndicator;

/// Why the worker returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenderExit {
    /// Stop was requested and the pool got its drain chance
    Stopped,
    /// The link failed; reconnect and run again
    LinkDown,
}

/// Result of one drain step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DrainOutcome {
    Sent,
    Failed,
    TearDown,
}

/// Buffered mirror of the audio payload (bodies only) to a local file.
///
/// Writing is only fast enough when it happens in large chunks, so bodies
/// accumulate in the writer's buffer and hit the disk half a pool at a
/// time.
pub struct FileMirror {
    writer: BufWriter<File>,
    events: Arc<EventLog>,
}

impl FileMirror {
    pub fn create(
        path: &Path,
        body_size: usize,
        pool_slots: usize,
        events: Arc<EventLog>,
    ) -> std::io::Result<Self> {
        match File::create(path) {
            Ok(file) => {
                events.log(Event::FileOpen, 0);
                tracing::info!("mirroring audio payload to {}", path.display());
                Ok(Self {
                    writer: BufWriter::with_capacity(body_size * (pool_slots / 2).max(1), file),
                    events,
                })
            }
            Err(e) => {
                events.log(Event::FileOpenFailure, 0);
                Err(e)
            }
        }
    }

    fn write_body(&mut self, body: &[u8]) -> std::io::Result<()> {
        self.writer.write_all(body)
    }

    /// Flush and close; call once at shutdown
    pub fn finish(mut self) {
        if let Err(e) = self.writer.flush() {
            self.events.log(Event::FileWriteFailure, 0);
            tracing::error!("flushing audio mirror failed: {}", e);
        }
        self.events.log(Event::FileClose, 0);
    }
}

/// The sender's working state; owned by the sender thread while it runs
/// and handed back to the supervisor between links.
pub struct SendWorker {
    consumer: PoolConsumer,
    pub socket: Option<TransportSocket>,
    pub mirror: Option<FileMirror>,
    wake_rx: Receiver<()>,
    network_connected: Arc<AtomicBool>,
    events: Arc<EventLog>,
    metrics: Arc<Metrics>,
    indicator: Arc<dyn StatusIndicator>,
    transport: Transport,
    tcp_send_timeout: Duration,
    max_duration_socket_errors: Duration,
    send_run_anyway_time: Duration,
    send_buf: Vec<u8>,
    last_sequence: Option<u16>,
    bad_since: Option<Instant>,
}

impl SendWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: &Config,
        consumer: PoolConsumer,
        wake_rx: Receiver<()>,
        network_connected: Arc<AtomicBool>,
        events: Arc<EventLog>,
        metrics: Arc<Metrics>,
        indicator: Arc<dyn StatusIndicator>,
    ) -> Self {
        let datagram_size = consumer.pool().datagram_size();
        Self {
            consumer,
            socket: None,
            mirror: None,
            wake_rx,
            network_connected,
            events,
            metrics,
            indicator,
            transport: config.transport,
            tcp_send_timeout: config.tcp_send_timeout,
            max_duration_socket_errors: config.max_duration_socket_errors,
            send_run_anyway_time: config.send_run_anyway_time,
            send_buf: Vec::with_capacity(datagram_size),
            last_sequence: None,
            bad_since: None,
        }
    }

    /// Whether a failed attempt still releases the slot: a plain UDP
    /// datagram is not worth retrying, but when the payload also goes to
    /// the file mirror the retry keeps the mirror gap-free.
    fn release_on_failure(&self) -> bool {
        self.transport == Transport::Udp && self.mirror.is_none()
    }

    #[cfg(test)]
    pub(crate) fn consumer_for_tests(&self) -> &PoolConsumer {
        &self.consumer
    }

    /// Run until stop or link failure. Returns itself so the supervisor
    /// can attach a fresh socket and spawn it again.
    pub fn run(mut self) -> (SenderExit, SendWorker) {
        self.bad_since = None;
        loop {
            match self.wake_rx.recv_timeout(self.send_run_anyway_time) {
                Ok(()) | Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    return (SenderExit::Stopped, self);
                }
            }

            while self.consumer.pending() {
                match self.drain_one() {
                    DrainOutcome::Sent => {}
                    // Transient failure: leave the cursor where it is and
                    // retry on the next wake
                    DrainOutcome::Failed => break,
                    DrainOutcome::TearDown => {
                        self.network_connected.store(false, Ordering::SeqCst);
                        self.events.log(Event::NetworkStop, 0);
                        return (SenderExit::LinkDown, self);
                    }
                }
                if !self.network_connected.load(Ordering::SeqCst) {
                    break;
                }
            }

            if !self.network_connected.load(Ordering::SeqCst) {
                return (SenderExit::Stopped, self);
            }
        }
    }

    /// Send the datagram at the cursor
    fn drain_one(&mut self) -> DrainOutcome {
        let mut buf = std::mem::take(&mut self.send_buf);
        if !self.consumer.copy_pending(&mut buf) {
            self.send_buf = buf;
            return DrainOutcome::Sent;
        }

        let started = Instant::now();
        let result = self.transmit(&buf);
        let duration = started.elapsed();

        let outcome = match result {
            Ok(()) => {
                self.note_success(&buf, duration);
                DrainOutcome::Sent
            }
            Err(e) => self.note_failure(e, duration),
        };
        self.send_buf = buf;
        outcome
    }

    fn transmit(&mut self, datagram: &[u8]) -> Result<(), NetworkError> {
        if let Some(socket) = &mut self.socket {
            self.events.log(Event::SendStart, 0);
            let result = socket.send_datagram(datagram, self.tcp_send_timeout);
            self.events.log(Event::SendStop, 0);
            result?;
        } else if self.mirror.is_none() {
            return Err(NetworkError::NoSocket);
        }

        // With no socket configured, reaching the disk alone is a
        // successful send.
        if let Some(mirror) = &mut self.mirror {
            if let Err(e) = mirror.write_body(&datagram[URTP_HEADER_SIZE..]) {
                self.events.log(Event::FileWriteFailure, 0);
                tracing::error!("audio mirror write failed: {}", e);
            }
        }
        Ok(())
    }

    fn note_success(&mut self, datagram: &[u8], duration: Duration) {
        self.consumer.release();
        self.bad_since = None;
        self.indicator.toggle_send();

        let sequence = u16::from_be_bytes([datagram[2], datagram[3]]);
        if let Some(last) = self.last_sequence {
            let expected = last.wrapping_add(1);
            if sequence != expected {
                self.events
                    .log(Event::SendSeqSkip, sequence.wrapping_sub(expected) as i64);
                self.metrics.seq_skips.fetch_add(1, Ordering::Relaxed);
            }
        }
        self.last_sequence = Some(sequence);

        self.metrics.datagrams_sent.fetch_add(1, Ordering::Relaxed);
        self.metrics
            .bytes_sent
            .fetch_add(datagram.len() as u64, Ordering::Relaxed);
        self.record_duration(duration);
    }

    fn note_failure(&mut self, error: NetworkError, duration: Duration) -> DrainOutcome {
        self.events.log(Event::SendFailure, 0);
        if matches!(error, NetworkError::Timeout) && self.transport == Transport::Tcp {
            self.events.log(Event::TcpSendTimeout, 0);
        }
        self.metrics.send_failures.fetch_add(1, Ordering::Relaxed);
        self.indicator.bad();
        self.record_duration(duration);
        tracing::warn!("send failed: {}", error);

        if self.release_on_failure() {
            self.consumer.release();
        }

        let bad_since = *self.bad_since.get_or_insert_with(Instant::now);
        if error.tears_connection() {
            return DrainOutcome::TearDown;
        }
        if bad_since.elapsed() > self.max_duration_socket_errors {
            self.events.log(Event::SocketErrorsForTooLong, 0);
            tracing::warn!(
                "socket errors for longer than {:?}, tearing the link down",
                self.max_duration_socket_errors
            );
            return DrainOutcome::TearDown;
        }
        DrainOutcome::Failed
    }

    fn record_duration(&mut self, duration: Duration) {
        if self.metrics.record_send_duration(duration) {
            self.events
                .log(Event::NewPeakSendDuration, duration.as_micros() as i64);
        }
        if duration.as_millis() as u64 > BLOCK_DURATION_MS as u64
            && self.transport == Transport::Udp
        {
            self.events.log(
                Event::SendDurationGreaterThanBlockDuration,
                duration.as_micros() as i64,
            );
            tracing::warn!("send took longer than an audio block: {:?}", duration);
        }
    }
}
