// Copyright (C) 2026 Brian Johnson
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

// ZolaDOS storage server
mod bus;
mod config;
mod error;
mod gpio;
mod link;
mod listing;
mod name;
mod protocol;
mod server;
mod session;
mod store;
mod transfer;

use std::path::PathBuf;
use std::time::Duration;
use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};
use bus::GpioBus;
use config::{Config, DEFAULT_STORAGE_DIR, PinMap, Timing};
use error::{ServerError, StartupError};
use gpio::SysfsGpio;
use link::{Link, SystemClock};
use server::{Offline, ServerFsm, ServerState};
use store::DirStore;

#[derive(Parser)]
#[command(name = "zolados")]
#[command(about = "Mass-storage server for the Zolatron 64 parallel interface", long_about = None)]
#[command(version)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Directory holding the stored files
    #[arg(short, long, default_value = DEFAULT_STORAGE_DIR, value_name = "PATH")]
    dir: PathBuf,

    /// Longest wait for any client signal
    #[arg(long, default_value = "100", value_name = "MS")]
    timeout_ms: u64,

    /// Width of the server-ready strobe
    #[arg(long, default_value = "200", value_name = "US")]
    strobe_us: u64,

    /// Offset of the header pins on the GPIO chip (e.g. 512 on newer kernels)
    #[arg(long, default_value = "0", value_name = "N")]
    gpio_base: u32,
}

impl Cli {
    fn config(&self) -> Config {
        Config {
            storage_dir: self.dir.clone(),
            timing: Timing {
                timeout: Duration::from_millis(self.timeout_ms),
                strobe: Duration::from_micros(self.strobe_us),
                ..Timing::default()
            },
            pins: PinMap::default(),
            gpio_base: self.gpio_base,
        }
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = cli.config();
    tracing::info!("ZolaDOS - version {}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Storage directory: {}", config.storage_dir.display());
    tracing::debug!("Timing: {:?}", config.timing);

    let state = match start(&config) {
        Ok(state) => state,
        Err(e) => {
            tracing::error!("{}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = serve(state) {
        tracing::error!("Server failed: {}", e);
        std::process::exit(1);
    }
}

fn start(config: &Config) -> Result<Box<dyn ServerState>, StartupError> {
    if !config.storage_dir.is_dir() {
        return Err(StartupError::StorageMissing(config.storage_dir.display().to_string()));
    }

    let gpio = SysfsGpio::new(config.gpio_base);
    let bus = GpioBus::open(gpio, config.pins.clone()).map_err(StartupError::Gpio)?;
    let link = Link::new(Box::new(bus), Box::new(SystemClock), config.timing);

    Ok(ServerFsm::<Offline>::new(link, Box::new(DirStore::new(&config.storage_dir))))
}

fn serve(mut state: Box<dyn ServerState>) -> Result<(), ServerError> {
    tracing::info!("Waiting for initial request...");
    loop {
        tracing::trace!("State: {}", state.name());
        state = state.step()?;
    }
}
