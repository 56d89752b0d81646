use clap::Parser;
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::time::Duration;

use smfsynth::player::{DEFAULT_BLOCK_SIZE, DEFAULT_POLYPHONY, DEFAULT_SAMPLE_RATE};
use smfsynth::smf::read_smf_file;
use smfsynth::{load_voices, Player, PlayerOptions, WavSink};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "smfsynth")]
#[command(version = "0.1.0")]
#[command(about = "Render Standard MIDI Files with a two-operator FM synthesizer", long_about = None)]
struct Args {
    /// Instrument configuration (JSON)
    #[arg(short, long)]
    config: PathBuf,

    /// Input MIDI file (.mid, optionally gzip-compressed)
    #[arg(short, long)]
    input: PathBuf,

    /// Output WAV file
    #[arg(short, long)]
    output: PathBuf,

    /// Output sample rate in Hz
    #[arg(long, default_value_t = DEFAULT_SAMPLE_RATE)]
    sample_rate: u32,

    /// Number of simultaneous voices
    #[arg(long, default_value_t = DEFAULT_POLYPHONY)]
    polyphony: usize,

    /// Samples rendered between scheduler updates
    #[arg(long, default_value_t = DEFAULT_BLOCK_SIZE)]
    block_size: usize,

    /// Seconds to keep rendering released notes after the last event
    #[arg(long, default_value_t = 10.0)]
    tail: f64,
}

fn main() -> Result<(), smfsynth::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config: serde_json::Value = serde_json::from_reader(BufReader::new(File::open(&args.config)?))?;
    let voices = load_voices(&config, args.polyphony)?;

    let data = read_smf_file(&args.input)?;
    let options = PlayerOptions {
        sample_rate: args.sample_rate,
        block_size: args.block_size,
        max_tail: Duration::from_secs_f64(args.tail.max(0.0).min(86_400.0)),
    };
    let mut player = Player::new(&data, voices, options)?;

    let mut sink = WavSink::create(&args.output, args.sample_rate)?;
    player.render(&mut sink)?;

    Ok(())
}
