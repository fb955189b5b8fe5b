//! Load-generating driver for the request/reply roles.
//!
//! `server` runs a [`Responder`] that echoes every request until interrupted.
//! `client` runs a [`Requester`] from many threads at once, checks that every
//! reply matches its own request, and reports the tally.
use std::{
    ops::AddAssign,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
        mpsc,
    },
    time::Duration,
};

use clap::{Parser, ValueEnum};
use log::{debug, error, info, warn};
use rand::Rng;

use crate::{Endpoint, Error, Requester, Responder, thread::ThreadPool};

pub const DEFAULT_ADDRESS: &str = "ipc:///tmp/tether.ipc";

/// How often idle server workers check for shutdown.
const POLL_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Role to run
    #[arg(value_enum)]
    pub mode: Mode,
    /// Address to listen on (server) or dial (client)
    #[arg(short, long, default_value = DEFAULT_ADDRESS)]
    pub address: String,
    /// Concurrent client threads
    #[arg(long, default_value_t = 50)]
    pub threads: usize,
    /// Requests issued by each client thread
    #[arg(long, default_value_t = 1000)]
    pub requests: usize,
    /// Server worker threads, each answering one request at a time
    #[arg(long, default_value_t = 16)]
    pub workers: usize,
    /// Client receive timeout in milliseconds; 0 waits indefinitely
    #[arg(long, default_value_t = 0)]
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Mode {
    Server,
    Client,
}

/// Outcome of a client run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LoadReport {
    pub succeeded: usize,
    pub mismatched: usize,
    pub failed: usize,
}

impl LoadReport {
    pub fn total(&self) -> usize {
        self.succeeded + self.mismatched + self.failed
    }
}

impl AddAssign for LoadReport {
    fn add_assign(&mut self, rhs: Self) {
        self.succeeded += rhs.succeeded;
        self.mismatched += rhs.mismatched;
        self.failed += rhs.failed;
    }
}

/// Echoes requests on `address` until `running` is cleared.
pub fn serve(address: &str, workers: usize, running: Arc<AtomicBool>) -> Result<(), Error> {
    let responder = Responder::new().into_result()?;
    responder.listen(address).into_result()?;
    responder.set_receive_timeout(POLL_INTERVAL).into_result()?;

    let responder = Arc::new(responder);
    let pool = ThreadPool::new(workers.max(1));
    for _ in 0..workers.max(1) {
        let responder = Arc::clone(&responder);
        let running = Arc::clone(&running);
        pool.execute(move || {
            while running.load(Ordering::Acquire) {
                match responder.receive_concurrent().into_result() {
                    Ok(mut request) => {
                        let payload = request.payload().to_vec();
                        if let Err(e) = request.reply(&payload).into_result() {
                            warn!("failed to reply: {e}");
                        }
                    }
                    Err(e) if e.is_timeout() => continue,
                    Err(e) if e.is_closed() => break,
                    Err(e) => warn!("failed to receive request: {e}"),
                }
            }
        });
    }

    drop(pool);
    info!("server on {address} stopped");
    Ok(())
}

/// Issues `threads * requests` concurrent exchanges against `address`, each
/// with a distinct payload, and checks every reply against its request.
pub fn generate_load(
    address: &str,
    threads: usize,
    requests: usize,
    timeout: Duration,
) -> Result<LoadReport, Error> {
    let requester = Requester::new().into_result()?;
    requester.set_receive_timeout(timeout).into_result()?;
    requester.set_send_timeout(timeout).into_result()?;
    requester.dial(address).into_result()?;

    let requester = Arc::new(requester);
    let (sender, receiver) = mpsc::channel();
    let pool = ThreadPool::new(threads.max(1));

    for t in 0..threads {
        let requester = Arc::clone(&requester);
        let sender = sender.clone();
        pool.execute(move || {
            let mut rng = rand::rng();
            let mut report = LoadReport::default();

            for i in 0..requests {
                let message = format!("{t}:{i}:{}", rng.random::<u64>());
                match requester.exchange_concurrent(message.as_bytes()).into_result() {
                    Ok(response) if response == message.as_bytes() => {
                        debug!("ok");
                        report.succeeded += 1;
                    }
                    Ok(response) => {
                        error!(
                            "got bad response; expected: {message} actual: {}",
                            String::from_utf8_lossy(&response)
                        );
                        report.mismatched += 1;
                    }
                    Err(e) => {
                        warn!("request {message} failed: {e}");
                        report.failed += 1;
                    }
                }
            }

            let _ = sender.send(report);
        });
    }

    drop(sender);
    drop(pool);

    let mut total = LoadReport::default();
    for report in receiver {
        total += report;
    }
    info!("client finished: {total:?}");
    Ok(total)
}

#[cfg(test)]
mod tests {
    use std::{thread, time::Instant};

    use super::*;

    #[test]
    fn parses_modes() {
        let cli = Cli::try_parse_from(["tether", "server"]).unwrap();
        assert_eq!(cli.mode, Mode::Server);
        assert_eq!(cli.address, DEFAULT_ADDRESS);

        let cli = Cli::try_parse_from(["tether", "client", "--threads", "4"]).unwrap();
        assert_eq!(cli.mode, Mode::Client);
        assert_eq!(cli.threads, 4);
        assert_eq!(cli.requests, 1000);
    }

    #[test]
    fn rejects_bad_invocations() {
        assert!(Cli::try_parse_from(["tether"]).is_err());
        assert!(Cli::try_parse_from(["tether", "both"]).is_err());
        assert!(Cli::try_parse_from(["tether", "server", "client"]).is_err());
    }

    #[test]
    fn client_load_against_server() {
        let address = "inproc://cli-load";
        let running = Arc::new(AtomicBool::new(true));

        let server = {
            let running = Arc::clone(&running);
            thread::spawn(move || serve(address, 4, running))
        };

        // Wait for the server to bind.
        let mut report = None;
        for _ in 0..100 {
            match generate_load(address, 6, 50, Duration::from_secs(10)) {
                Ok(r) => {
                    report = Some(r);
                    break;
                }
                Err(_) => thread::sleep(Duration::from_millis(10)),
            }
        }

        running.store(false, Ordering::Release);
        server.join().unwrap().unwrap();

        let report = report.unwrap();
        assert_eq!(report.succeeded, 300);
        assert_eq!(report.total(), 300);
    }

    #[test]
    fn client_timeout_bounds_unanswered_requests() {
        // Listens but never answers.
        let responder = Responder::new().into_result().unwrap();
        responder.listen("inproc://cli-silent").into_result().unwrap();

        let started = Instant::now();
        let timeout = Duration::from_millis(100);
        let report = generate_load("inproc://cli-silent", 2, 3, timeout).unwrap();

        assert_eq!(report.failed, 6);
        assert_eq!(report.succeeded, 0);
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
