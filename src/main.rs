//! cantus CLI - render SAU scores to sound files or the audio device.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};

use cantus::analysis;
use cantus::audio::AudioOutput;
use cantus::generator::Generator;
use cantus::output::{sink_for_path, Sink};
use cantus::program::{build_program, Program, RunMode};
use cantus::score_parser::parse_score;
use cantus::timing::time_score;

#[derive(Parser)]
#[command(name = "cantus")]
#[command(about = "SAU musical score synthesizer", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render a score to a sound file (.wav, .au/.snd, anything else raw)
    Render {
        /// Score file (.sau), '-' for stdin, or inline score text
        input: String,

        /// Output sound file path
        output: PathBuf,

        /// Sample rate in Hz
        #[arg(short = 'r', long, default_value = "44100")]
        sample_rate: u32,

        /// Output channels (1 or 2)
        #[arg(short, long, default_value = "2")]
        channels: u16,

        /// Scale amplitude by 1/voice-count
        #[arg(long)]
        amp_div: bool,

        /// Print statistics about the rendered audio
        #[arg(long)]
        stats: bool,
    },

    /// Render a score and play it on the default audio device
    Play {
        /// Score file (.sau), '-' for stdin, or inline score text
        input: String,

        /// Render channels before the device fold-down (1 or 2)
        #[arg(short, long, default_value = "2")]
        channels: u16,

        /// Scale amplitude by 1/voice-count
        #[arg(long)]
        amp_div: bool,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Render {
            input,
            output,
            sample_rate,
            channels,
            amp_div,
            stats,
        } => {
            let text = read_input(&input)?;
            let prog = compile(&text, &score_name(&input), amp_div)?;
            let mut gen = Generator::new(&prog, sample_rate, channels)?;
            let mut sink = sink_for_path(&output, sample_rate, channels)?;

            println!("Rendering '{}' to {}", prog.name, output.display());
            println!("  Duration:    {:.3} s", prog.duration_ms as f64 / 1000.0);
            println!("  Sample rate: {} Hz", sample_rate);
            println!("  Channels:    {}", channels);
            println!(
                "  Voices:      {} ({} operators)",
                prog.voice_count, prog.op_count
            );

            let mut collected: Vec<i16> = Vec::new();
            run_to_sink(&mut gen, sink.as_mut(), stats.then_some(&mut collected))?;
            sink.finish()?;

            if stats {
                let mono = analysis::mono_f32(&collected, channels);
                analysis::analyze(&mono, sample_rate).print_summary();
            }
            println!("Done: {}", output.display());
        }
        Commands::Play {
            input,
            channels,
            amp_div,
        } => {
            let text = read_input(&input)?;
            let prog = compile(&text, &score_name(&input), amp_div)?;
            let audio = AudioOutput::new()?;
            let sample_rate = audio.sample_rate();
            let mut gen = Generator::new(&prog, sample_rate, channels)?;
            let mut sink = audio.sink(channels);

            println!(
                "Playing '{}' ({:.3} s at {} Hz)",
                prog.name,
                prog.duration_ms as f64 / 1000.0,
                sample_rate
            );
            run_to_sink(&mut gen, &mut sink, None)?;
            audio.drain();
        }
    }
    Ok(())
}

/// Parse, time and build in one step.
fn compile(text: &str, name: &str, amp_div: bool) -> Result<Program, String> {
    let mut score = parse_score(text, name)?;
    time_score(&mut score);
    build_program(
        &score,
        RunMode {
            amp_div_voices: amp_div,
        },
    )
}

fn run_to_sink(
    gen: &mut Generator,
    sink: &mut dyn Sink,
    mut collect: Option<&mut Vec<i16>>,
) -> Result<(), String> {
    let channels = gen.channels() as usize;
    let mut buf = vec![0i16; 1024 * channels];
    loop {
        let (frames, more) = gen.run(&mut buf);
        let samples = &buf[..frames * channels];
        if !samples.is_empty() {
            sink.write_s16(samples, frames as u32)?;
            if let Some(collected) = collect.as_mut() {
                collected.extend_from_slice(samples);
            }
        }
        if !more {
            return Ok(());
        }
    }
}

/// A score can come from a file, stdin, or be given inline.
fn read_input(input: &str) -> Result<String, String> {
    if input == "-" {
        use std::io::Read;
        let mut buffer = String::new();
        std::io::stdin()
            .read_to_string(&mut buffer)
            .map_err(|e| format!("failed to read from stdin: {e}"))?;
        return Ok(buffer);
    }
    if input.ends_with(".sau") || Path::new(input).exists() {
        return std::fs::read_to_string(input)
            .map_err(|e| format!("failed to read {input}: {e}"));
    }
    Ok(input.to_string())
}

fn score_name(input: &str) -> String {
    Path::new(input)
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|_| input.ends_with(".sau"))
        .unwrap_or("score")
        .to_string()
}
