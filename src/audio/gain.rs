//! Adaptive gain control
//!
//! Each mono sample is shifted left so the stream uses as much of the 32-bit
//! word as possible without clipping. The controller tracks the minimum
//! number of unused headroom bits seen since the bound was last relaxed and
//! adjusts the shift once per 20 ms block:
//!
//! - the shift is clamped to the observed minimum, so no sample the last
//!   block could have produced would clip;
//! - the shift then steps by one towards a target headroom of
//!   `audio_desired_unused_bits`;
//! - the observed minimum relaxes upward by one, letting the gain recover
//!   after quiet stretches.

use std::sync::Arc;

use crate::audio::frame::unused_bits;
use crate::constants::SAMPLES_PER_BLOCK;
use crate::events::{Event, EventLog};

/// Per-stream gain state; owned by the audio engine, not shared
pub struct GainController {
    shift: u32,
    unused_bits_min: u32,
    samples_this_block: usize,
    desired_unused_bits: u32,
    max_shift_bits: u32,
    fixed_shift: Option<u32>,
    events: Arc<EventLog>,
}

impl GainController {
    pub fn new(
        desired_unused_bits: u32,
        max_shift_bits: u32,
        fixed_shift: Option<u32>,
        events: Arc<EventLog>,
    ) -> Self {
        Self {
            shift: 0,
            unused_bits_min: 31,
            samples_this_block: 0,
            desired_unused_bits,
            max_shift_bits,
            fixed_shift,
            events,
        }
    }

    /// Current gain shift in bits
    pub fn shift(&self) -> u32 {
        self.fixed_shift.unwrap_or(self.shift)
    }

    /// Apply gain to one sample and update the headroom statistics.
    ///
    /// The headroom of the *incoming* sample is measured before the shift is
    /// applied; the per-block clamp then guarantees the shifted magnitude
    /// stays inside the word.
    #[inline]
    pub fn process(&mut self, sample: i32) -> i32 {
        let unused = unused_bits(sample);
        if unused < self.unused_bits_min {
            self.unused_bits_min = unused;
        }

        let out = sample << self.shift();

        self.samples_this_block += 1;
        if self.samples_this_block == SAMPLES_PER_BLOCK {
            self.samples_this_block = 0;
            self.end_of_block();
        }

        out
    }

    fn end_of_block(&mut self) {
        if self.fixed_shift.is_none() {
            if self.shift > self.unused_bits_min {
                self.shift = self.unused_bits_min;
                self.events
                    .log(Event::MonoSampleAudioShift, self.shift as i64);
            }

            let headroom = self.unused_bits_min - self.shift;
            if headroom > self.desired_unused_bits && self.shift < self.max_shift_bits {
                self.shift += 1;
                self.events
                    .log(Event::MonoSampleAudioShift, self.shift as i64);
            } else if headroom < self.desired_unused_bits && self.shift > 0 {
                self.shift -= 1;
                self.events
                    .log(Event::MonoSampleAudioShift, self.shift as i64);
            }
        }

        self.events
            .log(Event::MonoSampleUnusedBitsMin, self.unused_bits_min as i64);
        self.unused_bits_min = (self.unused_bits_min + 1).min(31);
    }
}
