use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;

use anyhow::{Context, Result};
use clap::Parser;
use dumpulator_core::dump::FileMinidumpSource;
use dumpulator_core::{EmulatorSession, SessionConfig};
use log::info;

/// Calls a function inside a Windows process reconstructed from a minidump.
#[derive(Parser)]
#[command(name = "dumpulator", version, about)]
struct Cli {
    /// Path to the `.dmp` file to load.
    dump: PathBuf,

    /// Address of the function to call, e.g. `0x7ffd12340000`.
    #[arg(value_parser = parse_hex)]
    address: u64,

    /// Arguments to pass, each parsed as a hex or decimal integer.
    #[arg(value_parser = parse_hex)]
    args: Vec<u64>,

    /// Maximum instructions to execute (0 = unbounded).
    #[arg(long, default_value_t = 0)]
    count: usize,

    /// Size of the scratch arena reserved for syscall-owned allocations.
    #[arg(long, value_parser = parse_hex, default_value = "0x10000")]
    arena_size: u64,

    /// Log every retired instruction's address.
    #[arg(long)]
    trace: bool,
}

fn parse_hex(s: &str) -> std::result::Result<u64, std::num::ParseIntError> {
    match s.strip_prefix("0x") {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => s.parse(),
    }
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let source = FileMinidumpSource::open(&cli.dump)
        .with_context(|| format!("failed to open {}", cli.dump.display()))?;

    let config = SessionConfig {
        trace: cli.trace,
        arena_size: cli.arena_size,
        default_instruction_budget: cli.count,
    };
    let session = EmulatorSession::load(&source, config).context("failed to load session")?;
    info!("loaded session, bitness={:?}", session.bitness());

    let session = Rc::new(RefCell::new(session));
    let result = EmulatorSession::call(session.clone(), cli.address, &cli.args, cli.count)
        .context("call failed")?;

    if let Some(fault) = session.borrow().last_fault() {
        eprintln!("session faulted: {fault}");
    }
    println!("{result:#x}");
    Ok(())
}
