mod emu_thread;

use std::error::Error;
use std::fs;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use clap::Parser;
use tracing_subscriber::EnvFilter;

use emu::cartridge::{BackupKind, Cartridge};
use emu::gba::Gba;
use emu_thread::{EmuCommand, EmuEvent};

#[derive(Parser)]
#[command(name = "halcyon", version, about = "Game Boy Advance emulator")]
struct Args {
    /// Path to the ROM image.
    rom: PathBuf,

    /// Path to the 16 KiB BIOS image.
    #[arg(long)]
    bios: PathBuf,

    /// Run this many frames headless, then exit.
    #[arg(long)]
    frames: Option<u64>,

    /// Restore a snapshot before running.
    #[arg(long)]
    load_state: Option<PathBuf>,

    /// Write a snapshot when the frame run completes.
    #[arg(long, requires = "frames")]
    save_state: Option<PathBuf>,

    /// Backup memory file, read at startup and written back on exit.
    #[arg(long)]
    save_file: Option<PathBuf>,

    /// Force the backup chip type (none, sram, flash64k, flash128k,
    /// eeprom) instead of detecting it from the ROM.
    #[arg(long)]
    backup: Option<BackupKind>,

    /// Mark the cartridge's real-time clock as fitted.
    #[arg(long)]
    rtc: bool,

    /// Emulation speed multiplier; 0 runs uncapped.
    #[arg(long, default_value_t = 1.0)]
    speed: f64,

    /// Log filter directives (tracing `EnvFilter` syntax).
    #[arg(long, default_value = "info")]
    log: String,

    /// Log to a file in the temp directory instead of stderr.
    #[arg(long)]
    log_file: bool,
}

fn init_tracing(args: &Args) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_new(&args.log).unwrap_or_else(|_| EnvFilter::new("info"));
    if args.log_file {
        let appender = tracing_appender::rolling::never(std::env::temp_dir(), "halcyon.log");
        let (writer, guard) = tracing_appender::non_blocking(appender);
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(writer)
            .with_ansi(false)
            .init();
        Some(guard)
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
        None
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    let _log_guard = init_tracing(&args);

    let bios = fs::read(&args.bios)?;
    let rom = fs::read(&args.rom)?;
    let cartridge = match args.backup {
        Some(kind) => Cartridge::with_backup(rom, kind)?,
        None => Cartridge::new(rom)?,
    };
    let mut gba = Gba::new(bios, cartridge)?;
    gba.set_rtc_present(args.rtc);
    tracing::info!(title = %gba.header().title, "starting");

    if let Some(path) = &args.save_file
        && let Ok(contents) = fs::read(path)
    {
        gba.cpu.bus.cartridge.load_backup_data(&contents);
    }

    if let Some(path) = &args.load_state {
        gba.load_state(&fs::read(path)?)?;
    }

    match args.frames {
        Some(frames) => run_headless(gba, frames, &args),
        None => run_threaded(gba, args.speed),
    }
}

/// Runs a fixed number of frames as fast as possible and reports the
/// achieved emulation speed.
fn run_headless(mut gba: Gba, frames: u64, args: &Args) -> Result<(), Box<dyn Error>> {
    let started = Instant::now();
    for _ in 0..frames {
        gba.run_frame();
    }
    let elapsed = started.elapsed().as_secs_f64();
    tracing::info!(
        frames,
        cycles = gba.cycles(),
        seconds = format!("{elapsed:.2}"),
        fps = format!("{:.1}", frames as f64 / elapsed.max(f64::EPSILON)),
        "finished"
    );

    if let Some(path) = &args.save_state {
        fs::write(path, gba.save_state()?)?;
        tracing::info!(path = %path.display(), "snapshot written");
    }
    if let Some(path) = &args.save_file {
        if let Some(data) = gba.cpu.bus.cartridge.backup_data() {
            fs::write(path, data)?;
            tracing::info!(path = %path.display(), "backup memory written");
        }
    }
    Ok(())
}

/// Runs the machine on its own thread at the requested speed until the
/// process is terminated, logging the frame rate once per second.
fn run_threaded(gba: Gba, speed: f64) -> Result<(), Box<dyn Error>> {
    let mut handle = emu_thread::spawn(gba);
    handle.send(EmuCommand::SetSpeed(speed));
    handle.send(EmuCommand::Run);

    let mut frames_this_second = 0u64;
    let mut last_report = Instant::now();
    loop {
        for event in handle.poll() {
            if let EmuEvent::FramePresented { .. } = event {
                frames_this_second += 1;
            }
        }
        if last_report.elapsed() >= Duration::from_secs(1) {
            tracing::info!(fps = frames_this_second, "running");
            frames_this_second = 0;
            last_report = Instant::now();
            handle.send(EmuCommand::RequestState);
        }
        std::thread::sleep(Duration::from_millis(8));
    }
}
