use anyhow::Result;
use clap::Parser;
use sano_core::logging::{LogConfig, LogLevel};
use sano_system::Emulator;
use std::fs;
use std::path::PathBuf;

#[derive(Parser)]
#[command(about = "Headless SANo emulator runner")]
struct Args {
    /// Path to a ROM image
    rom: PathBuf,

    /// Number of frames to run
    #[arg(long, default_value_t = 60)]
    frames: u32,

    /// Global log level: off, error, warn, info, debug, trace
    #[arg(long, default_value = "off")]
    log_level: String,

    /// Print per-frame pixels and a debug-state dump
    #[arg(long, default_value_t = false)]
    debug: bool,

    /// Suppress all per-frame output
    #[arg(long, default_value_t = false)]
    quiet: bool,

    /// Save-RAM file: loaded before running, written back after
    #[arg(long)]
    save: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    match LogLevel::from_str(&args.log_level) {
        Some(level) => LogConfig::global().set_global_level(level),
        None => anyhow::bail!("unknown log level: {}", args.log_level),
    }

    let rom = fs::read(&args.rom)?;

    let mut emu = Emulator::new();
    emu.load_rom(&rom)?;

    if let Some(save_path) = &args.save {
        if save_path.exists() {
            emu.load_save_ram(&fs::read(save_path)?)?;
        }
    }

    emu.reset();
    emu.run();

    // Audio frames per 60 Hz video frame at 32 kHz.
    let mut audio = vec![0i16; (32_000 / 60 + 1) * 2];

    for fnum in 1..=args.frames {
        emu.run_frame();
        let sample_count = audio.len() / 2;
        emu.generate_samples(&mut audio, sample_count);

        if args.quiet {
            continue;
        }

        if args.debug {
            let frame = emu.framebuffer();
            println!("Frame {}: {}x{}", fnum, frame.width, frame.height);
            let dump_len = std::cmp::min(16, frame.pixels.len());
            let mut out = String::new();
            for pixel in &frame.pixels[..dump_len] {
                out.push_str(&format!("{:08X} ", pixel));
            }
            println!("First {} pixels: {}", dump_len, out);
            println!(
                "DEBUG STATE (frame {}):\n{}",
                fnum,
                serde_json::to_string_pretty(&emu.debug_state())?
            );
        }
    }

    if !args.quiet {
        println!(
            "Ran {} frames | speed: {:.2}x",
            emu.frame_count(),
            emu.emulation_speed()
        );
    }

    if let Some(save_path) = &args.save {
        if let Some(save_ram) = emu.save_ram() {
            fs::write(save_path, save_ram)?;
            if !args.quiet {
                println!("Save RAM written to {}", save_path.display());
            }
        }
    }

    Ok(())
}
