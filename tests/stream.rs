//! End-to-end streaming scenarios
//!
//! Each test assembles the real pipeline, drives it with a scripted block
//! source and observes the datagrams on a real localhost socket.

use std::io::Read;
use std::net::{TcpListener, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use urtp_streamer::audio::frame::pack_stereo;
use urtp_streamer::audio::source::{BlockSource, DmaEvent, PCM_400HZ_SIGNED_24BIT};
use urtp_streamer::constants::{
    RAW_RING_WORDS, SAMPLES_PER_BLOCK, STEREO_WORDS_PER_BLOCK, URTP_HEADER_SIZE, URTP_SYNC_BYTE,
};
use urtp_streamer::error::AudioError;
use urtp_streamer::events::Event;
use urtp_streamer::pipeline::AudioEngine;
use urtp_streamer::{Coding, Config, Pipeline, Transport};

/// Feeds a fixed sample script through the ring at accelerated pacing,
/// then idles until stopped.
struct ScriptedSource {
    samples: Vec<i32>,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl ScriptedSource {
    fn new(samples: Vec<i32>) -> Self {
        assert_eq!(samples.len() % SAMPLES_PER_BLOCK, 0);
        Self {
            samples,
            running: Arc::new(AtomicBool::new(false)),
            handle: None,
        }
    }
}

impl BlockSource for ScriptedSource {
    fn start(&mut self, mut engine: AudioEngine) -> Result<(), AudioError> {
        self.running.store(true, Ordering::SeqCst);
        let running = self.running.clone();
        let samples = std::mem::take(&mut self.samples);

        let handle = thread::spawn(move || {
            let mut ring = vec![0u32; RAW_RING_WORDS];
            let mut half_pending = true;
            for block in samples.chunks_exact(SAMPLES_PER_BLOCK) {
                if !running.load(Ordering::Relaxed) {
                    return;
                }
                let offset = if half_pending { 0 } else { STEREO_WORDS_PER_BLOCK };
                for (i, &sample) in block.iter().enumerate() {
                    let words = pack_stereo(sample);
                    ring[offset + i * 2] = words[0];
                    ring[offset + i * 2 + 1] = words[1];
                }
                let event = if half_pending {
                    DmaEvent::RxHalfComplete
                } else {
                    DmaEvent::RxComplete
                };
                engine.on_dma_event(event, &ring);
                half_pending = !half_pending;
                thread::sleep(Duration::from_millis(2));
            }
            // Script exhausted; stay alive until stopped
            while running.load(Ordering::Relaxed) {
                thread::sleep(Duration::from_millis(5));
            }
        });
        self.handle = Some(handle);
        Ok(())
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn blocks_of(sample: i32, blocks: usize) -> Vec<i32> {
    vec![sample; blocks * SAMPLES_PER_BLOCK]
}

fn tone_blocks(blocks: usize) -> Vec<i32> {
    (0..blocks * SAMPLES_PER_BLOCK)
        .map(|i| PCM_400HZ_SIGNED_24BIT[i % PCM_400HZ_SIGNED_24BIT.len()])
        .collect()
}

/// Run the pipeline against the scripted source in a worker thread; the
/// caller observes the socket, then calls stop through the returned handle.
fn spawn_pipeline(
    config: Config,
    samples: Vec<i32>,
) -> (
    urtp_streamer::pipeline::StopHandle,
    JoinHandle<(Pipeline, urtp_streamer::Result<()>)>,
) {
    let mut pipeline = Pipeline::new(config).expect("pipeline construction");
    let stop = pipeline.stop_handle();
    let handle = thread::spawn(move || {
        let mut source = ScriptedSource::new(samples);
        let result = pipeline.run(&mut source);
        (pipeline, result)
    });
    (stop, handle)
}

fn collect_udp_datagrams(
    socket: &UdpSocket,
    expected: usize,
    datagram_size: usize,
) -> Vec<Vec<u8>> {
    socket
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    let mut datagrams = Vec::new();
    let mut buf = vec![0u8; datagram_size * 2];
    while datagrams.len() < expected {
        match socket.recv(&mut buf) {
            Ok(n) => datagrams.push(buf[..n].to_vec()),
            Err(_) => break,
        }
    }
    datagrams
}

fn check_header(datagram: &[u8], scheme: u8, body_size: usize) {
    assert_eq!(datagram[0], URTP_SYNC_BYTE);
    assert_eq!(datagram[1], scheme);
    let len = u16::from_be_bytes([datagram[12], datagram[13]]) as usize;
    assert_eq!(len, body_size);
    assert_eq!(len, datagram.len() - URTP_HEADER_SIZE);
}

fn sequence_of(datagram: &[u8]) -> u16 {
    u16::from_be_bytes([datagram[2], datagram[3]])
}

#[test]
fn test_one_second_of_silence_over_udp() {
    let receiver = UdpSocket::bind(("127.0.0.1", 0)).unwrap();
    let addr = receiver.local_addr().unwrap().to_string();

    let config = Config {
        coding: Coding::Pcm16,
        transport: Transport::Udp,
        server: Some(addr),
        ..Config::default()
    };
    let (stop, handle) = spawn_pipeline(config, blocks_of(0, 50));

    let datagrams = collect_udp_datagrams(&receiver, 50, Coding::Pcm16.datagram_size());
    stop.stop();
    let (pipeline, result) = handle.join().unwrap();
    result.unwrap();

    assert_eq!(datagrams.len(), 50);
    for (i, datagram) in datagrams.iter().enumerate() {
        check_header(datagram, 0, Coding::Pcm16.body_size());
        assert_eq!(sequence_of(datagram) as usize, i);
        assert!(
            datagram[URTP_HEADER_SIZE..].iter().all(|&b| b == 0),
            "silence must code to an all-zero payload"
        );
    }

    // Timestamps never move backwards
    let stamps: Vec<u64> = datagrams
        .iter()
        .map(|d| u64::from_be_bytes(d[4..12].try_into().unwrap()))
        .collect();
    for pair in stamps.windows(2) {
        assert!(pair[0] <= pair[1]);
    }

    // A second of silence walks the gain shift all the way up
    let shifts: Vec<i64> = pipeline
        .events()
        .drain()
        .iter()
        .filter(|e| e.event == Event::MonoSampleAudioShift)
        .map(|e| e.parameter)
        .collect();
    assert_eq!(shifts.last().copied(), Some(12));

    let snapshot = pipeline.metrics().snapshot();
    assert_eq!(snapshot.datagrams_framed, 50);
    assert_eq!(snapshot.datagrams_sent, 50);
    assert_eq!(snapshot.overflows, 0);
}

#[test]
fn test_full_scale_tone_over_udp() {
    let receiver = UdpSocket::bind(("127.0.0.1", 0)).unwrap();
    let addr = receiver.local_addr().unwrap().to_string();

    let config = Config {
        coding: Coding::Pcm16,
        transport: Transport::Udp,
        server: Some(addr),
        ..Config::default()
    };
    let (stop, handle) = spawn_pipeline(config, tone_blocks(5));

    let datagrams = collect_udp_datagrams(&receiver, 5, Coding::Pcm16.datagram_size());
    stop.stop();
    let (pipeline, result) = handle.join().unwrap();
    result.unwrap();

    assert_eq!(datagrams.len(), 5);

    // The tone peaks with 8 unused bits, so the shift walks 0,1,2,3,4 over
    // the five blocks and the peak sample scales accordingly.
    for (block, datagram) in datagrams.iter().enumerate() {
        check_header(datagram, 0, Coding::Pcm16.body_size());
        assert_eq!(sequence_of(datagram) as usize, block);

        let body = &datagram[URTP_HEADER_SIZE..];
        let shift = block.min(4) as u32;

        // First sample of every cycle is zero
        assert_eq!(&body[0..2], &[0x00, 0x00]);
        // The 11th sample is the positive peak 0x666666
        let expected = ((0x0066_6666i32 << shift) >> 16) as i16;
        assert_eq!(&body[20..22], &expected.to_be_bytes()[..]);
    }

    let shifts: Vec<i64> = pipeline
        .events()
        .drain()
        .iter()
        .filter(|e| e.event == Event::MonoSampleAudioShift)
        .map(|e| e.parameter)
        .collect();
    // Converged to the 4-bit headroom target and never past it
    assert_eq!(shifts.last().copied(), Some(4));
    assert!(shifts.iter().all(|&s| s <= 4));
}

#[test]
fn test_half_scale_step_response() {
    let receiver = UdpSocket::bind(("127.0.0.1", 0)).unwrap();
    let addr = receiver.local_addr().unwrap().to_string();

    // Silence long enough to reach full gain, then a half-scale step
    let mut samples = blocks_of(0, 15);
    samples.extend(blocks_of(0x0040_0000, 10));

    let config = Config {
        coding: Coding::Pcm16,
        transport: Transport::Udp,
        server: Some(addr),
        ..Config::default()
    };
    let (stop, handle) = spawn_pipeline(config, samples);

    let datagrams = collect_udp_datagrams(&receiver, 25, Coding::Pcm16.datagram_size());
    stop.stop();
    let (pipeline, result) = handle.join().unwrap();
    result.unwrap();
    assert_eq!(datagrams.len(), 25);

    let shifts: Vec<i64> = pipeline
        .events()
        .drain()
        .iter()
        .filter(|e| e.event == Event::MonoSampleAudioShift)
        .map(|e| e.parameter)
        .collect();

    // Exactly one multi-bit downward step, at the block where the signal
    // arrived; afterwards the shift settles on the headroom target.
    let mut big_drops = 0;
    for pair in shifts.windows(2) {
        if pair[1] < pair[0] - 1 {
            big_drops += 1;
        }
    }
    assert_eq!(big_drops, 1);
    assert_eq!(shifts.last().copied(), Some(4));

    // After the controller settles, the output holds the stepped value
    // without clipping: 0x400000 << 4 == 0x04000000, top 16 bits 0x0400.
    let last = datagrams.last().unwrap();
    let body = &last[URTP_HEADER_SIZE..];
    for sample in body.chunks_exact(2) {
        assert_eq!(sample, &[0x04, 0x00]);
    }
}

#[test]
fn test_tcp_stream_is_framed_and_ordered() {
    let listener = TcpListener::bind(("127.0.0.1", 0)).unwrap();
    let addr = listener.local_addr().unwrap().to_string();

    let reader = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        stream
            .set_read_timeout(Some(Duration::from_millis(200)))
            .unwrap();
        let mut bytes = Vec::new();
        let mut chunk = [0u8; 4096];
        let deadline = Instant::now() + Duration::from_secs(10);
        while Instant::now() < deadline {
            match stream.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => bytes.extend_from_slice(&chunk[..n]),
                Err(_) => {
                    if bytes.len() >= 5 * Coding::Unicam8.datagram_size() {
                        break;
                    }
                }
            }
        }
        bytes
    });

    let config = Config {
        coding: Coding::Unicam8,
        transport: Transport::Tcp,
        server: Some(addr),
        ..Config::default()
    };
    let (stop, handle) = spawn_pipeline(config, tone_blocks(5));

    let bytes = reader.join().unwrap();
    stop.stop();
    let (_pipeline, result) = handle.join().unwrap();
    result.unwrap();

    // The byte stream parses as back-to-back datagrams: sync byte, fixed
    // header, body length from the header itself
    let datagram_size = Coding::Unicam8.datagram_size();
    assert!(bytes.len() >= 5 * datagram_size);
    let mut expected_seq = 0u16;
    for datagram in bytes.chunks_exact(datagram_size).take(5) {
        check_header(datagram, 1, Coding::Unicam8.body_size());
        assert_eq!(sequence_of(datagram), expected_seq);
        expected_seq = expected_seq.wrapping_add(1);
    }
}

#[test]
fn test_stream_duration_bounds_the_run() {
    let receiver = UdpSocket::bind(("127.0.0.1", 0)).unwrap();
    let addr = receiver.local_addr().unwrap().to_string();

    let config = Config {
        coding: Coding::Pcm16,
        transport: Transport::Udp,
        server: Some(addr),
        stream_duration: Some(Duration::from_millis(200)),
        ..Config::default()
    };
    // More script than the duration allows
    let (_stop, handle) = spawn_pipeline(config, blocks_of(0, 500));

    // The run ends by itself without a stop request
    let started = Instant::now();
    let (_pipeline, result) = handle.join().unwrap();
    result.unwrap();
    assert!(started.elapsed() < Duration::from_secs(10));
}
