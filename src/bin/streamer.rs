//! URTP streamer
//!
//! Captures audio (microphone or built-in tone), frames it into URTP
//! datagrams and streams them to a server over TCP or UDP, optionally
//! mirroring the audio payload to a local file.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use urtp_streamer::audio::capture::{list_input_devices, MicCapture};
use urtp_streamer::audio::source::{BlockSource, ToneSource, Waveform};
use urtp_streamer::{Coding, Config, Pipeline, Transport};

#[derive(Parser)]
#[command(name = "streamer", version, about = "Stream URTP audio to a server")]
struct Args {
    /// Server to stream to, as host:port
    #[arg(long)]
    server: Option<String>,

    /// Transport towards the server
    #[arg(long, default_value = "udp")]
    transport: Transport,

    /// Body coding scheme
    #[arg(long, default_value = "pcm16")]
    coding: Coding,

    /// Mirror the audio payload (bodies only) to this file
    #[arg(long)]
    file: Option<PathBuf>,

    /// Capture from the microphone instead of the built-in tone
    #[arg(long)]
    mic: bool,

    /// Input device name (with --mic); default input device when omitted
    #[arg(long)]
    device: Option<String>,

    /// Stream silence instead of the 400 Hz tone
    #[arg(long, conflicts_with = "mic")]
    silence: bool,

    /// Stop after this many milliseconds; 0 streams until Enter is pressed
    #[arg(long, default_value_t = 0)]
    duration_ms: u64,

    /// Datagram pool size
    #[arg(long, default_value_t = urtp_streamer::constants::MAX_NUM_DATAGRAMS)]
    pool_size: usize,

    /// Pin the gain shift (bits) instead of adapting
    #[arg(long)]
    gain_shift: Option<u32>,

    /// List input devices and exit
    #[arg(long)]
    list_devices: bool,

    /// Dump the diagnostic event log on exit
    #[arg(long)]
    dump_log: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    if args.list_devices {
        println!("=== Available input devices ===");
        for name in list_input_devices() {
            println!("  {name}");
        }
        return Ok(());
    }

    let config = Config {
        coding: args.coding,
        transport: args.transport,
        server: args.server,
        local_file: args.file,
        max_num_datagrams: args.pool_size,
        gain_left_shift: args.gain_shift,
        stream_duration: match args.duration_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        },
        ..Config::default()
    };

    tracing::info!(
        "starting URTP streamer: {} over {}, {} pool slots",
        config.coding,
        config.transport,
        config.max_num_datagrams
    );

    let mut pipeline = Pipeline::new(config)?;

    // Console analog of the hardware stop button
    let stop = pipeline.stop_handle();
    if args.duration_ms == 0 {
        tracing::info!("streaming until Enter is pressed");
        let handle = stop.clone();
        std::thread::Builder::new()
            .name("stop-input".into())
            .spawn(move || {
                let mut line = String::new();
                let _ = std::io::stdin().read_line(&mut line);
                handle.stop();
            })?;
    } else {
        tracing::info!("streaming for {} ms", args.duration_ms);
    }

    let mut source: Box<dyn BlockSource> = if args.mic {
        Box::new(MicCapture::new(args.device))
    } else if args.silence {
        Box::new(ToneSource::new(Waveform::Silence))
    } else {
        Box::new(ToneSource::new(Waveform::Tone400Hz))
    };

    let result = pipeline.run(source.as_mut());

    let snapshot = pipeline.metrics().snapshot();
    println!("Stats:");
    println!("  datagrams framed:        {}", snapshot.datagrams_framed);
    println!("  datagrams sent:          {}", snapshot.datagrams_sent);
    println!("  bytes sent:              {}", snapshot.bytes_sent);
    println!("  send failures:           {}", snapshot.send_failures);
    println!("  datagrams lost (pool):   {}", snapshot.overflows);
    println!("  possible bad audio:      {}", snapshot.possible_bad_audio);
    println!(
        "  worst case send:         {} us",
        snapshot.peak_send_duration_us
    );
    println!(
        "  average send:            {} us",
        snapshot.avg_send_duration_us
    );
    println!("  minimum free slots:      {}", snapshot.min_free_slots);

    if args.dump_log {
        pipeline.events().print(std::io::stdout().lock())?;
    }

    result?;
    Ok(())
}
