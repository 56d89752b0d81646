//! Dump the voice calls a MIDI file produces as JSON

use clap::Parser;
use serde::Serialize;
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use smfsynth::midi::channel_state::ChannelSnapshot;
use smfsynth::midi::{EventDispatcher, Recorded, RecordingVoice, CHANNELS};
use smfsynth::player::DEFAULT_POLYPHONY;
use smfsynth::smf::{read_smf_file, SmfHeader, TrackScheduler};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "smfdump")]
#[command(version = "0.1.0")]
#[command(about = "Dump MIDI voice events to JSON", long_about = None)]
struct Args {
    /// Input MIDI file (.mid, optionally gzip-compressed)
    input: PathBuf,

    /// Output JSON file (writes to stdout if not specified)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Output compact JSON (default is pretty-printed)
    #[arg(short, long)]
    compact: bool,

    /// Number of simultaneous voices
    #[arg(long, default_value_t = DEFAULT_POLYPHONY)]
    polyphony: usize,

    /// Include the final state of every channel
    #[arg(long)]
    channels: bool,
}

#[derive(Serialize)]
struct TimedCall {
    time_ns: u64,
    #[serde(flatten)]
    call: Recorded,
}

#[derive(Serialize)]
struct Dump {
    header: SmfHeader,
    duration_ns: u64,
    events: Vec<TimedCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    channels: Option<Vec<ChannelSnapshot>>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let data = read_smf_file(&args.input)?;
    let mut scheduler = TrackScheduler::new(&data)?;
    let (voices, log) = RecordingVoice::pool(args.polyphony);
    let mut dispatcher = EventDispatcher::new(voices);

    // Step from event to event so every call gets its exact time
    let mut now = Duration::ZERO;
    let mut events = Vec::new();
    let mut wait = Duration::ZERO;
    loop {
        scheduler.advance(wait, &mut dispatcher)?;
        now += wait;
        events.extend(log.borrow_mut().drain(..).map(|call| TimedCall {
            time_ns: now.as_nanos() as u64,
            call,
        }));
        // Recording voices end on note off, so their slots can be reused
        dispatcher.reclaim_finished_voices();
        match scheduler.time_until_next_event() {
            Some(next) => wait = next,
            None => break,
        }
    }

    let channels = args.channels.then(|| {
        (0..CHANNELS as u8)
            .map(|ch| dispatcher.channel(ch).snapshot())
            .collect()
    });

    let dump = Dump {
        header: *scheduler.header(),
        duration_ns: now.as_nanos() as u64,
        events,
        channels,
    };

    let json_string = if args.compact {
        serde_json::to_string(&dump)?
    } else {
        serde_json::to_string_pretty(&dump)?
    };

    match args.output {
        Some(path) => {
            let mut file = File::create(path)?;
            file.write_all(json_string.as_bytes())?;
            file.write_all(b"\n")?;
        }
        None => {
            println!("{}", json_string);
        }
    }

    Ok(())
}
