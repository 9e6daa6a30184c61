use std::{path::PathBuf, time::Duration};

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};

use nrf24le1::{Flashing, ReadyPolicy, Region, Timing, Transport, format, transport::Emulator};

#[derive(clap::Parser)]
#[command(
    name = "nrf24le1",
    about = "Flashing nRF24LE1 through a USBasp SPI bridge",
    version
)]
struct Cli {
    /// Talk to an in-memory nRF24LE1 instead of the USB bridge
    #[arg(long, global = true)]
    emulate: bool,
    /// Fail when the flash stays busy, instead of carrying on
    #[arg(long, global = true)]
    strict_ready: bool,
    /// Verbose output, twice to trace SPI traffic
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show FSR register and ability to modify it
    Test,
    /// Erase all of the program memory
    Erase,
    /// Read a memory region to a file
    Read {
        target: Target,
        /// Defaults to main-dump.bin, IP-dump.bin or NVM-dump.bin
        file: Option<PathBuf>,
    },
    /// Write a memory region from a file
    Write {
        target: Target,
        /// Defaults to main.bin, IP.bin or NVM.bin
        file: Option<PathBuf>,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Target {
    #[value(alias = "info")]
    Infopage,
    #[value(alias = "fw")]
    Firmware,
    Nvm,
}

impl Target {
    fn region(self) -> Region {
        match self {
            Target::Infopage => Region::InfoPage,
            Target::Firmware => Region::MainFlash,
            Target::Nvm => Region::NvmNormal,
        }
    }

    fn default_image(self) -> &'static str {
        match self {
            Target::Infopage => "IP.bin",
            Target::Firmware => "main.bin",
            Target::Nvm => "NVM.bin",
        }
    }

    fn default_dump(self) -> &'static str {
        match self {
            Target::Infopage => "IP-dump.bin",
            Target::Firmware => "main-dump.bin",
            Target::Nvm => "NVM-dump.bin",
        }
    }
}

fn main() -> Result<()> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let code = if e.use_stderr() { 1 } else { 0 };
            let _ = e.print();
            std::process::exit(code);
        }
    };

    let level = match cli.verbose {
        0 => simplelog::LevelFilter::Info,
        1 => simplelog::LevelFilter::Debug,
        _ => simplelog::LevelFilter::Trace,
    };
    let _ = simplelog::TermLogger::init(
        level,
        simplelog::Config::default(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    );

    let timing = Timing {
        ready: if cli.strict_ready {
            ReadyPolicy::Strict
        } else {
            ReadyPolicy::Lenient
        },
        ..Default::default()
    };

    if cli.emulate {
        let timing = Timing {
            ready: timing.ready,
            ..Timing::immediate()
        };
        let mut flashing = Flashing::new(Emulator::new(), timing);
        run(&mut flashing, &cli.command);
    } else {
        let mut flashing = Flashing::new_from_usb(timing)?;
        run(&mut flashing, &cli.command);
    }
    Ok(())
}

/// Runs one command inside program mode. Failures are logged, not returned.
fn run<T: Transport>(flashing: &mut Flashing<T>, command: &Command) {
    if let Err(e) = flashing.enter_program_mode() {
        log::error!("Failed to enter program mode: {}", e);
    }

    let result: Result<()> = match command {
        Command::Test => flashing.test_connectivity(true).map_err(Into::into),
        Command::Erase => {
            with_spinner("Erasing all pages".into(), || flashing.erase_all()).map_err(Into::into)
        }
        Command::Read { target, file } => match flashing.test_connectivity(false) {
            Ok(()) => read(flashing, *target, file.clone()),
            Err(e) => Err(e.into()),
        },
        Command::Write { target, file } => match flashing.test_connectivity(false) {
            Ok(()) => write(flashing, *target, file.clone()),
            Err(e) => Err(e.into()),
        },
    };
    if let Err(e) = result {
        log::error!("{:#}", e);
    }

    if let Err(e) = flashing.exit_program_mode() {
        log::error!("Failed to leave program mode: {}", e);
    }
}

fn read<T: Transport>(
    flashing: &mut Flashing<T>,
    target: Target,
    file: Option<PathBuf>,
) -> Result<()> {
    let region = target.region();
    let path = file.unwrap_or_else(|| target.default_dump().into());

    let mut buf = vec![0u8; region.size()];
    let len = with_spinner(format!("Reading {}", region), || match target {
        Target::Infopage => flashing.read_infopage(&mut buf),
        Target::Firmware => flashing.read_firmware(&mut buf),
        Target::Nvm => flashing.read_nvm(&mut buf),
    })?;
    format::write_image(&path, &buf[..len])
}

fn write<T: Transport>(
    flashing: &mut Flashing<T>,
    target: Target,
    file: Option<PathBuf>,
) -> Result<()> {
    let region = target.region();
    let path = file.unwrap_or_else(|| target.default_image().into());

    let image = match target {
        Target::Firmware => format::read_firmware_from_file(&path)?,
        _ => format::read_image(&path, region)?,
    };
    log::info!("Image size: {}", image.len());

    let written = with_spinner(format!("Writing {}", region), || match target {
        Target::Infopage => flashing.write_infopage(&image),
        Target::Firmware => flashing.write_firmware(&image),
        Target::Nvm => flashing.write_nvm(&image),
    })?;
    log::info!("Wrote {} bytes to {}", written, region);
    Ok(())
}

fn with_spinner<R>(
    message: String,
    f: impl FnOnce() -> nrf24le1::Result<R>,
) -> nrf24le1::Result<R> {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
        pb.set_style(style);
    }
    pb.set_message(message);
    pb.enable_steady_tick(Duration::from_millis(100));

    let result = f();

    pb.finish_and_clear();
    result
}
