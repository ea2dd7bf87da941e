use std::path::PathBuf;

use clap::Parser;

use crate::synthetic::CYCLES_PER_FRAME;

/// Drive the IO scheduler headless against synthetic peripherals.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Config {
    /// Number of quanta to run
    #[arg(short, long, default_value_t = 60)]
    pub quanta: u32,

    /// Cycles requested per quantum (one frame by default)
    #[arg(short, long, default_value_t = CYCLES_PER_FRAME)]
    pub cycles: u32,

    /// Log to a file in this directory instead of stdout
    #[arg(long)]
    pub log_dir: Option<PathBuf>,

    /// Write the scheduler state here once the run is over
    #[arg(long)]
    pub save_state: Option<PathBuf>,
}
