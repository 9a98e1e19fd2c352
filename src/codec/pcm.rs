//! PCM-16 body coding
//!
//! Copy-through path: the top 16 bits of each gain-adjusted sample, written
//! big-endian, two bytes per sample.

/// Write `samples` into `body` as 16-bit big-endian PCM
pub(crate) fn encode_into(samples: &[i32], body: &mut [u8]) {
    assert_eq!(body.len(), samples.len() * 2);

    for (sample, out) in samples.iter().zip(body.chunks_exact_mut(2)) {
        let top = (sample >> 16) as i16;
        out.copy_from_slice(&top.to_be_bytes());
    }
}
