use std::{
    error::Error,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use clap::Parser;
use log::warn;
use tether::cli::{Cli, Mode, generate_load, serve};

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let cli = Cli::parse();

    match cli.mode {
        Mode::Server => {
            let running = Arc::new(AtomicBool::new(true));
            let flag = Arc::clone(&running);
            if let Err(e) = ctrlc::set_handler(move || flag.store(false, Ordering::Release)) {
                warn!("failed to install interrupt handler: {e}");
            }

            serve(&cli.address, cli.workers, running)?;
        }
        Mode::Client => {
            let timeout = Duration::from_millis(cli.timeout_ms);
            let report = generate_load(&cli.address, cli.threads, cli.requests, timeout)?;
            println!(
                "{} ok, {} mismatched, {} failed",
                report.succeeded, report.mismatched, report.failed
            );
        }
    }

    Ok(())
}
