//! In-memory diagnostic event log
//!
//! A fixed-capacity wraparound log of `{timestamp, event, parameter}`
//! entries. Writes are lock-free (`force_push` displaces the oldest entry
//! when full) so the codec context can log without ever blocking; the log
//! is drained and pretty-printed once at shutdown.

use crossbeam::queue::ArrayQueue;
use std::io::{self, Write};
use std::time::Instant;

use crate::constants::MAX_NUM_LOG_ENTRIES;

/// Everything the pipeline knows how to record.
///
/// Events marked as anomalies are prefixed with `*` in the dump.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    LogStart,
    LogStop,
    FileOpen,
    FileOpenFailure,
    FileClose,
    NetworkStart,
    NetworkStartFailure,
    NetworkStop,
    TcpConnected,
    SourceStart,
    SourceStop,
    StopRequested,
    DmaRxHalfFull,
    DmaRxFull,
    DmaUnknown,
    DatagramAlloc,
    DatagramReadyToSend,
    DatagramFree,
    DatagramOverflowBegins,
    DatagramNumOverflows,
    PossibleBadAudio,
    MonoSampleUnusedBitsMin,
    MonoSampleAudioShift,
    SendStart,
    SendStop,
    SendFailure,
    SendSeqSkip,
    TcpSendTimeout,
    SocketErrorsForTooLong,
    FileWriteFailure,
    SendDurationGreaterThanBlockDuration,
    NewPeakSendDuration,
    NumDatagramsFree,
}

impl Event {
    pub fn label(self) -> &'static str {
        match self {
            Event::LogStart => "LOG_START",
            Event::LogStop => "LOG_STOP",
            Event::FileOpen => "FILE_OPEN",
            Event::FileOpenFailure => "FILE_OPEN_FAILURE",
            Event::FileClose => "FILE_CLOSE",
            Event::NetworkStart => "NETWORK_START",
            Event::NetworkStartFailure => "NETWORK_START_FAILURE",
            Event::NetworkStop => "NETWORK_STOP",
            Event::TcpConnected => "TCP_CONNECTED",
            Event::SourceStart => "SOURCE_START",
            Event::SourceStop => "SOURCE_STOP",
            Event::StopRequested => "STOP_REQUESTED",
            Event::DmaRxHalfFull => "DMA_RX_HALF_FULL",
            Event::DmaRxFull => "DMA_RX_FULL",
            Event::DmaUnknown => "DMA_UNKNOWN",
            Event::DatagramAlloc => "DATAGRAM_ALLOC",
            Event::DatagramReadyToSend => "DATAGRAM_READY_TO_SEND",
            Event::DatagramFree => "DATAGRAM_FREE",
            Event::DatagramOverflowBegins => "DATAGRAM_OVERFLOW_BEGINS",
            Event::DatagramNumOverflows => "DATAGRAM_NUM_OVERFLOWS",
            Event::PossibleBadAudio => "POSSIBLE_BAD_AUDIO",
            Event::MonoSampleUnusedBitsMin => "MONO_SAMPLE_UNUSED_BITS_MIN",
            Event::MonoSampleAudioShift => "MONO_SAMPLE_AUDIO_SHIFT",
            Event::SendStart => "SEND_START",
            Event::SendStop => "SEND_STOP",
            Event::SendFailure => "SEND_FAILURE",
            Event::SendSeqSkip => "SEND_SEQ_SKIP",
            Event::TcpSendTimeout => "TCP_SEND_TIMEOUT",
            Event::SocketErrorsForTooLong => "SOCKET_ERRORS_FOR_TOO_LONG",
            Event::FileWriteFailure => "FILE_WRITE_FAILURE",
            Event::SendDurationGreaterThanBlockDuration => {
                "SEND_DURATION_GREATER_THAN_BLOCK_DURATION"
            }
            Event::NewPeakSendDuration => "NEW_PEAK_SEND_DURATION",
            Event::NumDatagramsFree => "NUM_DATAGRAMS_FREE",
        }
    }

    /// True for events that indicate something went wrong
    pub fn is_anomaly(self) -> bool {
        matches!(
            self,
            Event::FileOpenFailure
                | Event::NetworkStartFailure
                | Event::DmaUnknown
                | Event::DatagramOverflowBegins
                | Event::DatagramNumOverflows
                | Event::PossibleBadAudio
                | Event::SendFailure
                | Event::SendSeqSkip
                | Event::TcpSendTimeout
                | Event::SocketErrorsForTooLong
                | Event::FileWriteFailure
                | Event::SendDurationGreaterThanBlockDuration
        )
    }
}

/// One logged observation
#[derive(Debug, Clone, Copy)]
pub struct LogEntry {
    /// Microseconds since the log was created
    pub timestamp_us: u64,
    pub event: Event,
    pub parameter: i64,
}

/// Wraparound event log shared by every pipeline component
pub struct EventLog {
    entries: ArrayQueue<LogEntry>,
    start: Instant,
}

impl EventLog {
    pub fn new() -> Self {
        Self::with_capacity(MAX_NUM_LOG_ENTRIES)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let log = Self {
            entries: ArrayQueue::new(capacity),
            start: Instant::now(),
        };
        log.log(Event::LogStart, 0);
        log
    }

    /// Record an event; never blocks, the oldest entry is displaced when full
    pub fn log(&self, event: Event, parameter: i64) {
        let entry = LogEntry {
            timestamp_us: self.start.elapsed().as_micros() as u64,
            event,
            parameter,
        };
        self.entries.force_push(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drain every entry, oldest first
    pub fn drain(&self) -> Vec<LogEntry> {
        let mut out = Vec::with_capacity(self.entries.len());
        while let Some(entry) = self.entries.pop() {
            out.push(entry);
        }
        out
    }

    /// Drain the log and write it out as a table, anomalies marked with `*`
    pub fn print<W: Write>(&self, mut w: W) -> io::Result<()> {
        writeln!(w, "------------- Log starts -------------")?;
        for entry in self.drain() {
            let mark = if entry.event.is_anomaly() { "*" } else { " " };
            writeln!(
                w,
                "{:10.3}: {} {} {} ({:#x})",
                entry.timestamp_us as f64 / 1000.0,
                mark,
                entry.event.label(),
                entry.parameter,
                entry.parameter,
            )?;
        }
        writeln!(w, "-------------- Log ends --------------")
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}
