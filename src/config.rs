//! Pipeline configuration
//!
//! Everything the pipeline can be told at startup lives here; the audio
//! geometry (16 kHz, 20 ms blocks) is fixed at compile time in
//! [`crate::constants`].

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::constants::*;
use crate::error::Error;

/// Body coding scheme carried in byte 1 of the URTP header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coding {
    /// 16-bit big-endian PCM at 16 kHz
    Pcm16,
    /// 8-bit UNICAM block compression at 16 kHz
    Unicam8,
    /// 10-bit UNICAM block compression at 16 kHz
    Unicam10,
}

impl Coding {
    /// Value placed in the coding-scheme byte of the header
    pub fn scheme_byte(self) -> u8 {
        match self {
            Coding::Pcm16 => 0,
            Coding::Unicam8 => 1,
            Coding::Unicam10 => 2,
        }
    }

    /// Audio payload size in bytes for one block
    pub fn body_size(self) -> usize {
        match self {
            Coding::Pcm16 => URTP_BODY_SIZE_PCM,
            Coding::Unicam8 => URTP_BODY_SIZE_UNICAM_8,
            Coding::Unicam10 => URTP_BODY_SIZE_UNICAM_10,
        }
    }

    /// Full datagram size (header plus body)
    pub fn datagram_size(self) -> usize {
        URTP_HEADER_SIZE + self.body_size()
    }

    /// Width of a coded UNICAM sample, if this is a UNICAM scheme
    pub fn coded_sample_bits(self) -> Option<u32> {
        match self {
            Coding::Pcm16 => None,
            Coding::Unicam8 => Some(8),
            Coding::Unicam10 => Some(10),
        }
    }
}

impl FromStr for Coding {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pcm16" | "pcm" => Ok(Coding::Pcm16),
            "unicam8" => Ok(Coding::Unicam8),
            "unicam10" => Ok(Coding::Unicam10),
            other => Err(format!(
                "unknown coding '{other}' (expected pcm16, unicam8 or unicam10)"
            )),
        }
    }
}

impl fmt::Display for Coding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Coding::Pcm16 => write!(f, "pcm16"),
            Coding::Unicam8 => write!(f, "unicam8"),
            Coding::Unicam10 => write!(f, "unicam10"),
        }
    }
}

/// Transport used to reach the server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Tcp,
    Udp,
}

impl FromStr for Transport {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tcp" => Ok(Transport::Tcp),
            "udp" => Ok(Transport::Udp),
            other => Err(format!("unknown transport '{other}' (expected tcp or udp)")),
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transport::Tcp => write!(f, "tcp"),
            Transport::Udp => write!(f, "udp"),
        }
    }
}

/// Pipeline configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Body coding scheme
    pub coding: Coding,

    /// Transport towards the server
    pub transport: Transport,

    /// Destination as `host:port`; optional when a file mirror is configured
    pub server: Option<String>,

    /// Mirror the audio payload (bodies only, no headers) to this file
    pub local_file: Option<PathBuf>,

    /// Number of slots in the datagram pool
    pub max_num_datagrams: usize,

    /// Hard per-datagram deadline for TCP sends
    pub tcp_send_timeout: Duration,

    /// Window of consecutive send errors that tears the link down
    pub max_duration_socket_errors: Duration,

    /// Wait between reconnect attempts
    pub retry_wait: Duration,

    /// The sender wakes at least this often even without a signal
    pub send_run_anyway_time: Duration,

    /// Headroom the gain controller steers towards
    pub audio_desired_unused_bits: u32,

    /// Upper bound on the adaptive gain shift
    pub audio_max_shift_bits: u32,

    /// Pin the gain shift to this value and bypass adaptation
    pub gain_left_shift: Option<u32>,

    /// Stop streaming after this long; `None` streams until stop is requested
    pub stream_duration: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            coding: Coding::Pcm16,
            transport: Transport::Udp,
            server: None,
            local_file: None,
            max_num_datagrams: MAX_NUM_DATAGRAMS,
            tcp_send_timeout: Duration::from_millis(TCP_SEND_TIMEOUT_MS),
            max_duration_socket_errors: Duration::from_millis(MAX_DURATION_SOCKET_ERRORS_MS),
            retry_wait: Duration::from_secs(RETRY_WAIT_SECONDS),
            send_run_anyway_time: Duration::from_millis(SEND_DATA_RUN_ANYWAY_TIME_MS),
            audio_desired_unused_bits: AUDIO_DESIRED_UNUSED_BITS,
            audio_max_shift_bits: AUDIO_MAX_SHIFT_BITS,
            gain_left_shift: None,
            stream_duration: None,
        }
    }
}

impl Config {
    /// Check the configuration for contradictions before the pipeline is built
    pub fn validate(&self) -> Result<(), Error> {
        if self.server.is_none() && self.local_file.is_none() {
            return Err(Error::Config(
                "nothing to do: neither a server nor a local file is configured".into(),
            ));
        }
        if self.max_num_datagrams < 2 {
            return Err(Error::Config(format!(
                "datagram pool needs at least 2 slots, got {}",
                self.max_num_datagrams
            )));
        }
        if self.audio_max_shift_bits > 31 {
            return Err(Error::Config(format!(
                "audio_max_shift_bits must stay below the word size, got {}",
                self.audio_max_shift_bits
            )));
        }
        if let Some(shift) = self.gain_left_shift {
            if shift > 31 {
                return Err(Error::Config(format!(
                    "gain_left_shift must stay below the word size, got {shift}"
                )));
            }
        }
        Ok(())
    }
}
