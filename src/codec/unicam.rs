//! UNICAM block compression
//!
//! Block-companded sub-band coding: each 1 ms sub-block of 16 samples gets
//! its own shift exponent, chosen so the sub-block's peak fits the coded
//! word width (8 or 10 bits, sign included). Samples are shifted right
//! arithmetically by `16 + shift` bits; the 4-bit shift value travels in a
//! byte shared by each pair of sub-blocks, high nibble for the even
//! sub-block, low nibble for the odd one, preceding the pair's samples:
//!
//! ```text
//! | s_even s_odd | even samples (16 or 20 bytes) | odd samples | ...
//! ```
//!
//! 10-bit samples are packed contiguously, MSB first, 160 bits into 20
//! bytes per sub-block. Body sizes come out at 330 bytes (8-bit) and 410
//! bytes (10-bit) per 20 ms block.

use crate::audio::frame::unused_bits;
use crate::constants::{SAMPLES_PER_BLOCK, SAMPLES_PER_UNICAM_BLOCK, UNICAM_BLOCKS_PER_BLOCK};
use crate::error::CodecError;

/// Shifts below this stay implicit; the wire value only carries the excess
const WIRE_SHIFT_BASE: u32 = 16;

/// Right shift must be arithmetic (sign-preserving) for the coded samples
/// to survive; a platform that shifts logically cannot run UNICAM.
pub fn arithmetic_shift_supported() -> bool {
    let probe: i32 = -1;
    (probe >> 1) < 0
}

/// Per-stream UNICAM state; scratch lives here so coding a block never
/// allocates.
pub(crate) struct UnicamCoder {
    coded_bits: u32,
    scratch: [i32; SAMPLES_PER_UNICAM_BLOCK],
}

impl UnicamCoder {
    pub(crate) fn new(coded_bits: u32) -> Result<Self, CodecError> {
        if !arithmetic_shift_supported() {
            return Err(CodecError::ArithmeticShiftUnsupported);
        }
        debug_assert!(coded_bits == 8 || coded_bits == 10);
        Ok(Self {
            coded_bits,
            scratch: [0; SAMPLES_PER_UNICAM_BLOCK],
        })
    }

    /// Bytes one coded sub-block occupies
    fn sub_block_bytes(&self) -> usize {
        SAMPLES_PER_UNICAM_BLOCK * self.coded_bits as usize / 8
    }

    /// Code a full audio block into `body`
    pub(crate) fn encode_into(&mut self, samples: &[i32; SAMPLES_PER_BLOCK], body: &mut [u8]) {
        let sub_bytes = self.sub_block_bytes();
        let pair_bytes = 1 + 2 * sub_bytes;
        assert_eq!(body.len(), (UNICAM_BLOCKS_PER_BLOCK / 2) * pair_bytes);

        for (pair, chunk) in samples
            .chunks_exact(SAMPLES_PER_UNICAM_BLOCK * 2)
            .enumerate()
        {
            let base = pair * pair_bytes;
            // The shared shift byte starts each pair clean; nibbles are
            // or-ed in as each sub-block is coded.
            body[base] = 0;

            for half in 0..2 {
                let sub = &chunk[half * SAMPLES_PER_UNICAM_BLOCK..(half + 1) * SAMPLES_PER_UNICAM_BLOCK];
                self.scratch.copy_from_slice(sub);

                let shift32 = self.sub_block_shift();
                let coded_shift = shift32.saturating_sub(WIRE_SHIFT_BASE);
                debug_assert!(coded_shift <= 0xF);

                if half == 0 {
                    body[base] |= (coded_shift as u8) << 4;
                } else {
                    body[base] |= coded_shift as u8;
                }

                let out = &mut body[base + 1 + half * sub_bytes..base + 1 + (half + 1) * sub_bytes];
                match self.coded_bits {
                    8 => self.write_sub_block_8(shift32, out),
                    _ => self.write_sub_block_10(shift32, out),
                }
            }
        }
    }

    /// Right shift that makes the sub-block's peak fit the coded width.
    ///
    /// The peak's used-bit count includes the sign bit, so a value like
    /// `0x01FF` (nine magnitude bits) counts as ten used bits and codes
    /// into a 10-bit word unshifted.
    fn sub_block_shift(&self) -> u32 {
        let min_unused = self
            .scratch
            .iter()
            .map(|&s| unused_bits(s))
            .min()
            .unwrap_or(31);
        let used_bits = 32 - min_unused;
        used_bits.saturating_sub(self.coded_bits)
    }

    fn write_sub_block_8(&self, shift32: u32, out: &mut [u8]) {
        for (sample, byte) in self.scratch.iter().zip(out.iter_mut()) {
            *byte = (sample >> shift32) as u8;
        }
    }

    fn write_sub_block_10(&self, shift32: u32, out: &mut [u8]) {
        let mut acc: u32 = 0;
        let mut bits: u32 = 0;
        let mut next = 0usize;
        for sample in &self.scratch {
            acc = (acc << 10) | (((sample >> shift32) as u32) & 0x3FF);
            bits += 10;
            while bits >= 8 {
                out[next] = (acc >> (bits - 8)) as u8;
                next += 1;
                bits -= 8;
            }
        }
        debug_assert_eq!(bits, 0);
        debug_assert_eq!(next, out.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Coding;
    use crate::constants::{URTP_BODY_SIZE_UNICAM_10, URTP_BODY_SIZE_UNICAM_8};

    /// Reverse of `encode_into`, reconstructing samples as
    /// `(coded << (16 + shift)) + round` with a half-step rounding term.
    fn decode_body(body: &[u8], coding: Coding) -> Vec<i32> {
        let coded_bits = coding.coded_sample_bits().unwrap();
        let sub_bytes = SAMPLES_PER_UNICAM_BLOCK * coded_bits as usize / 8;
        let pair_bytes = 1 + 2 * sub_bytes;
        let mut samples = Vec::with_capacity(SAMPLES_PER_BLOCK);

        for pair in body.chunks_exact(pair_bytes) {
            for half in 0..2 {
                let shift = if half == 0 {
                    (pair[0] >> 4) as u32
                } else {
                    (pair[0] & 0x0F) as u32
                };
                let total_shift = WIRE_SHIFT_BASE + shift;
                let round = 1i64 << (total_shift - 1);
                let coded = &pair[1 + half * sub_bytes..1 + (half + 1) * sub_bytes];
                for value in unpack(coded, coded_bits) {
                    samples.push((((value as i64) << total_shift) + round) as i32);
                }
            }
        }
        samples
    }

    /// Raw coded values, sign extended
    fn unpack(bytes: &[u8], coded_bits: u32) -> Vec<i32> {
        match coded_bits {
            8 => bytes.iter().map(|&b| b as i8 as i32).collect(),
            _ => {
                let mut acc: u32 = 0;
                let mut bits = 0u32;
                let mut out = Vec::new();
                for &b in bytes {
                    acc = (acc << 8) | b as u32;
                    bits += 8;
                    if bits >= 10 {
                        let v = (acc >> (bits - 10)) & 0x3FF;
                        bits -= 10;
                        let v = if v & 0x200 != 0 { v | !0x3FF } else { v };
                        out.push(v as i32);
                    }
                }
                out
            }
        }
    }

    fn coder(coding: Coding) -> UnicamCoder {
        UnicamCoder::new(coding.coded_sample_bits().unwrap()).unwrap()
    }

    fn encode(coding: Coding, samples: &[i32; SAMPLES_PER_BLOCK]) -> Vec<u8> {
        let mut body = vec![0u8; coding.body_size()];
        coder(coding).encode_into(samples, &mut body);
        body
    }

    #[test]
    fn test_arithmetic_shift_supported() {
        assert!(arithmetic_shift_supported());
    }

    #[test]
    fn test_silence_codes_to_zero() {
        for coding in [Coding::Unicam8, Coding::Unicam10] {
            let body = encode(coding, &[0; SAMPLES_PER_BLOCK]);
            assert_eq!(body.len(), coding.body_size());
            assert!(body.iter().all(|&b| b == 0));
        }
    }

    #[test]
    fn test_ten_bit_packing_of_unshifted_pattern() {
        // Every sample 0x01FF: ten used bits, so it codes unshifted
        let body = encode(Coding::Unicam10, &[0x01FF; SAMPLES_PER_BLOCK]);
        assert_eq!(body.len(), URTP_BODY_SIZE_UNICAM_10);

        // All shift nibbles zero
        for pair in body.chunks_exact(41) {
            assert_eq!(pair[0], 0);
            // The coded bit pattern is recoverable byte-exact
            for value in unpack(&pair[1..], 10) {
                assert_eq!(value, 0x01FF);
            }
        }
    }

    #[test]
    fn test_eight_bit_sub_block_layout() {
        // First sub-block loud, the rest silent: only the first shift
        // nibble is set and only the first 16 coded bytes are non-zero.
        let mut samples = [0i32; SAMPLES_PER_BLOCK];
        for s in samples.iter_mut().take(SAMPLES_PER_UNICAM_BLOCK) {
            *s = 0x4000_0000;
        }
        let body = encode(Coding::Unicam8, &samples);
        assert_eq!(body.len(), URTP_BODY_SIZE_UNICAM_8);

        // 0x40000000 uses 32 bits with sign: shift32 = 24, wire nibble 8
        assert_eq!(body[0], 0x80);
        for &b in &body[1..17] {
            assert_eq!(b, 0x40);
        }
        // Odd sub-block of the first pair is silent
        for &b in &body[17..33] {
            assert_eq!(b, 0);
        }
        // Remaining pairs untouched
        assert!(body[33..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_odd_sub_block_shift_in_low_nibble() {
        let mut samples = [0i32; SAMPLES_PER_BLOCK];
        // Even sub-block silent, odd sub-block loud
        for s in samples
            .iter_mut()
            .skip(SAMPLES_PER_UNICAM_BLOCK)
            .take(SAMPLES_PER_UNICAM_BLOCK)
        {
            *s = 0x4000_0000;
        }
        let body = encode(Coding::Unicam8, &samples);
        assert_eq!(body[0], 0x08);
    }

    #[test]
    fn test_round_trip_bound() {
        // Gain-adjusted loud content: the decode error stays within half a
        // quantisation step of the coded shift.
        let mut samples = [0i32; SAMPLES_PER_BLOCK];
        for (i, s) in samples.iter_mut().enumerate() {
            let phase = (i % 40) as i64 - 20;
            *s = (phase * 0x0500_0000 / 20) as i32;
        }
        for coding in [Coding::Unicam8, Coding::Unicam10] {
            let body = encode(coding, &samples);
            let decoded = decode_body(&body, coding);
            assert_eq!(decoded.len(), SAMPLES_PER_BLOCK);

            let sub_bytes = SAMPLES_PER_UNICAM_BLOCK * coding.coded_sample_bits().unwrap() as usize / 8;
            for (block, pair) in body.chunks_exact(1 + 2 * sub_bytes).enumerate() {
                for half in 0..2 {
                    let shift = if half == 0 { pair[0] >> 4 } else { pair[0] & 0x0F } as u32;
                    let bound = 1i64 << (WIRE_SHIFT_BASE + shift - 1);
                    let start = (block * 2 + half) * SAMPLES_PER_UNICAM_BLOCK;
                    for i in start..start + SAMPLES_PER_UNICAM_BLOCK {
                        let err = (decoded[i] as i64 - samples[i] as i64).abs();
                        assert!(
                            err <= bound,
                            "sample {i}: {} vs {} (err {err}, bound {bound})",
                            decoded[i],
                            samples[i]
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn test_negative_samples_keep_sign() {
        let samples = [-0x0123_4567i32; SAMPLES_PER_BLOCK];
        for coding in [Coding::Unicam8, Coding::Unicam10] {
            let body = encode(coding, &samples);
            let decoded = decode_body(&body, coding);
            for &d in &decoded {
                assert!(d < 0);
            }
        }
    }

    #[test]
    fn test_per_sub_block_shift_is_independent() {
        // Alternate loud and quiet pairs; each sub-block picks its own shift
        let mut samples = [0i32; SAMPLES_PER_BLOCK];
        for (i, s) in samples.iter_mut().enumerate() {
            let sub = i / SAMPLES_PER_UNICAM_BLOCK;
            *s = if sub % 2 == 0 { 0x2000_0000 } else { 0x100 };
        }
        let body = encode(Coding::Unicam8, &samples);
        for pair in body.chunks_exact(33) {
            // Even sub-block: 0x20000000 uses 31 bits incl. sign, shift32 23
            assert_eq!(pair[0] >> 4, 23 - 16);
            // Odd sub-block: 0x100 uses 10 bits incl. sign, shift32 2 so
            // the wire nibble stays zero
            assert_eq!(pair[0] & 0x0F, 0);
        }
    }
}
