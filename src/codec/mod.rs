//! URTP block coding
//!
//! The encoder turns one 20 ms block of gain-adjusted mono samples into one
//! URTP datagram: body first (PCM-16 copy-through or UNICAM block
//! compression), then the 14-byte header. Sequence number and timestamp are
//! assigned here, at framing time.
//!
//! Header layout, all multi-byte fields big-endian:
//!
//! | Offset | Size | Field                         |
//! |--------|------|-------------------------------|
//! | 0      | 1    | Sync byte `0x5A`              |
//! | 1      | 1    | Coding scheme                 |
//! | 2      | 2    | Sequence number               |
//! | 4      | 8    | Microsecond timestamp         |
//! | 12     | 2    | Number of audio payload bytes |

pub mod pcm;
pub mod unicam;

use bytes::BufMut;

use crate::config::Coding;
use crate::constants::{SAMPLES_PER_BLOCK, URTP_HEADER_SIZE, URTP_SYNC_BYTE};
use crate::error::CodecError;
use self::unicam::UnicamCoder;

/// Per-stream encoder state; owned by the audio engine
pub struct Encoder {
    coding: Coding,
    sequence: u16,
    unicam: Option<UnicamCoder>,
}

impl Encoder {
    /// Build an encoder for the configured coding scheme.
    ///
    /// UNICAM schemes verify at startup that the platform shifts negative
    /// values arithmetically and refuse to run otherwise.
    pub fn new(coding: Coding) -> Result<Self, CodecError> {
        let unicam = match coding.coded_sample_bits() {
            Some(bits) => Some(UnicamCoder::new(bits)?),
            None => None,
        };
        Ok(Self {
            coding,
            sequence: 0,
            unicam,
        })
    }

    pub fn coding(&self) -> Coding {
        self.coding
    }

    /// Sequence number the next datagram will carry
    pub fn next_sequence(&self) -> u16 {
        self.sequence
    }

    /// Frame one block into `datagram`, which must be exactly
    /// `coding.datagram_size()` bytes. Returns the sequence number used.
    pub fn encode_block(
        &mut self,
        samples: &[i32; SAMPLES_PER_BLOCK],
        timestamp_us: u64,
        datagram: &mut [u8],
    ) -> u16 {
        assert_eq!(datagram.len(), self.coding.datagram_size());

        let (header, body) = datagram.split_at_mut(URTP_HEADER_SIZE);

        match &mut self.unicam {
            None => pcm::encode_into(samples, body),
            Some(coder) => coder.encode_into(samples, body),
        }

        let sequence = self.sequence;
        self.sequence = self.sequence.wrapping_add(1);

        let mut header = header;
        header.put_u8(URTP_SYNC_BYTE);
        header.put_u8(self.coding.scheme_byte());
        header.put_u16(sequence);
        header.put_u64(timestamp_us);
        header.put_u16(self.coding.body_size() as u16);

        sequence
    }
}
