//! # URTP Audio Streamer
//!
//! Real-time capture of a 16 kHz stereo digital-microphone feed, reduction to
//! mono with adaptive gain, URTP datagram framing (PCM-16 or UNICAM block
//! compression) and streaming to a remote server over TCP or UDP, optionally
//! mirroring the audio payload to a local file.
//!
//! ## Architecture Overview
//!
//! ```text
//!  DMA-style block source (audio::source / audio::capture)
//!  ┌──────────────────────────────────────────────────────┐
//!  │  double-buffered stereo ring: [ block A | block B ]  │
//!  │        half-complete ▼            full-complete ▼    │
//!  └───────────────┬──────────────────────┬───────────────┘
//!                  │   one 20 ms block    │
//!                  ▼                      ▼
//!  ┌──────────────────────────────────────────────────────┐
//!  │ AudioEngine (pipeline) — runs in the source context  │
//!  │                                                      │
//!  │  mono extraction ─► adaptive gain ─► PCM / UNICAM    │
//!  │  (audio::frame)     (audio::gain)    (codec)         │
//!  │                                         │            │
//!  │                         URTP header + body           │
//!  └─────────────────────────────────────────┬────────────┘
//!                                            ▼
//!  ┌──────────────────────────────────────────────────────┐
//!  │ Datagram pool (pool) — circular, overwrite-oldest    │
//!  │   producer cursor ──►  [##|##|##|  |  |  ]  ◄── tx   │
//!  └─────────────────────────────────────────┬────────────┘
//!                        wake signal         │
//!                                            ▼
//!  ┌──────────────────────────────────────────────────────┐
//!  │ Sender thread (network::sender)                      │
//!  │   drain in order ─► TCP (deadline) / UDP sendto      │
//!  │   link supervision ─► reconnect after back-off       │
//!  │   optional file mirror of the audio payload          │
//!  └──────────────────────────────────────────────────────┘
//! ```
//!
//! The codec runs synchronously in the block-source callback (the DMA
//! bottom-half analog) and never blocks; the sender is the only component
//! that suspends, either on the datagram-ready signal or on a socket write.

pub mod audio;
pub mod codec;
pub mod config;
pub mod error;
pub mod events;
pub mod metrics;
pub mod network;
pub mod pipeline;
pub mod pool;
pub mod status;

pub use config::{Coding, Config, Transport};
pub use error::{Error, Result};
pub use pipeline::{AudioEngine, Pipeline};

/// Pipeline-wide constants
pub mod constants {
    /// Audio sampling frequency in Hz (the WS rate of the microphone interface)
    pub const SAMPLING_FREQUENCY: u32 = 16_000;

    /// Duration of one audio block in milliseconds
    pub const BLOCK_DURATION_MS: u32 = 20;

    /// Mono samples in one 20 ms block
    pub const SAMPLES_PER_BLOCK: usize =
        (SAMPLING_FREQUENCY as usize * BLOCK_DURATION_MS as usize) / 1000;

    /// 32-bit words per block of raw stereo audio (two words per frame)
    pub const STEREO_WORDS_PER_BLOCK: usize = SAMPLES_PER_BLOCK * 2;

    /// 32-bit words in the double-buffered capture ring (two blocks)
    pub const RAW_RING_WORDS: usize = STEREO_WORDS_PER_BLOCK * 2;

    /// Mono samples in one UNICAM sub-block (1 ms)
    pub const SAMPLES_PER_UNICAM_BLOCK: usize = 16;

    /// UNICAM sub-blocks per audio block
    pub const UNICAM_BLOCKS_PER_BLOCK: usize = SAMPLES_PER_BLOCK / SAMPLES_PER_UNICAM_BLOCK;

    /// First byte of every URTP datagram
    pub const URTP_SYNC_BYTE: u8 = 0x5A;

    /// Fixed URTP header size in bytes
    pub const URTP_HEADER_SIZE: usize = 14;

    /// URTP body size for 16-bit PCM
    pub const URTP_BODY_SIZE_PCM: usize = SAMPLES_PER_BLOCK * 2;

    /// URTP body size for 8-bit UNICAM (16 coded bytes per sub-block plus
    /// one shared shift byte per sub-block pair)
    pub const URTP_BODY_SIZE_UNICAM_8: usize =
        (UNICAM_BLOCKS_PER_BLOCK / 2) * (SAMPLES_PER_UNICAM_BLOCK * 2 + 1);

    /// URTP body size for 10-bit UNICAM (20 coded bytes per sub-block plus
    /// one shared shift byte per sub-block pair)
    pub const URTP_BODY_SIZE_UNICAM_10: usize =
        (UNICAM_BLOCKS_PER_BLOCK / 2) * (SAMPLES_PER_UNICAM_BLOCK * 10 / 8 * 2 + 1);

    /// Default number of slots in the datagram pool (four seconds of audio)
    pub const MAX_NUM_DATAGRAMS: usize = 200;

    /// Headroom the gain controller steers towards
    pub const AUDIO_DESIRED_UNUSED_BITS: u32 = 4;

    /// Upper bound on the adaptive gain shift
    pub const AUDIO_MAX_SHIFT_BITS: u32 = 12;

    /// Hard deadline for sending one datagram over TCP
    pub const TCP_SEND_TIMEOUT_MS: u64 = 1500;

    /// Consecutive-send-error window after which the link is torn down
    pub const MAX_DURATION_SOCKET_ERRORS_MS: u64 = 1000;

    /// Wait between reconnect attempts
    pub const RETRY_WAIT_SECONDS: u64 = 5;

    /// The sender wakes at least this often even without a signal
    pub const SEND_DATA_RUN_ANYWAY_TIME_MS: u64 = 1000;

    /// Capacity of the in-memory diagnostic event log
    pub const MAX_NUM_LOG_ENTRIES: usize = 2000;

    /// Grace period allowed for the sender to drain the pool at shutdown
    pub const STOP_DRAIN_GRACE_MS: u64 = 2000;
}
