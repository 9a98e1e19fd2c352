//! Audio subsystem module

pub mod capture;
pub mod frame;
pub mod gain;
pub mod source;

pub use capture::MicCapture;
pub use frame::{mono_from_stereo, pack_stereo, unused_bits};
pub use gain::GainController;
pub use source::{BlockSource, DmaEvent, ToneSource, Waveform};
