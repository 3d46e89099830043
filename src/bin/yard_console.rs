//! Desktop dispatcher console.
//!
//! Reads keys from stdin, dispatches the commands they form and logs every
//! frame instead of writing it to a bus. Useful for trying out a topology
//! file before connecting hardware.
//!
//! # Usage
//!
//! ```bash
//! yard_console [-v] <topology.json> [config.json]
//! ```
//!
//! Type entries such as `27+`, `64.72#` or `72/` followed by enter. `+-`
//! reloads the topology file. End input (Ctrl-D) to quit.

use std::convert::Infallible;
use std::future::Future;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::Context;
use flexi_logger::{LogSpecBuilder, Logger, LoggerHandle};
use log::{info, warn, LevelFilter};
use tokio::sync::broadcast::error::TryRecvError as NotifyRecvError;

use yard_dispatch::protocol::Frame;
use yard_dispatch::traits::{AccessoryTransport, CancelToken, KeyCode, KeyEvent, KeySource};
use yard_dispatch::{Config, ConsoleInputHandler, Dispatcher, Notification, Topology};

/// Key poll interval
const POLL_INTERVAL: Duration = Duration::from_millis(20);

// ============================================================================
// Stdin key source
// ============================================================================

/// Key source fed by a thread reading stdin byte by byte.
struct StdinKeySource {
    rx: Receiver<KeyEvent>,
    closed: bool,
}

impl StdinKeySource {
    fn spawn() -> Self {
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            for byte in std::io::stdin().lock().bytes() {
                let Ok(byte) = byte else { break };
                let event = match byte {
                    b'\n' | b'\r' => KeyEvent::key(KeyCode::Enter),
                    0x08 | 0x7F => KeyEvent::key(KeyCode::Backspace),
                    0x1B => KeyEvent::key(KeyCode::Escape),
                    other => KeyEvent::char(char::from(other)),
                };
                if tx.send(event).is_err() {
                    break;
                }
            }
        });
        Self { rx, closed: false }
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

impl KeySource for StdinKeySource {
    fn next_key(&mut self) -> Option<KeyEvent> {
        match self.rx.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                self.closed = true;
                None
            }
        }
    }
}

// ============================================================================
// Logging transport
// ============================================================================

/// Transport that only logs frames.
struct LoggingTransport;

impl AccessoryTransport for LoggingTransport {
    type Error = Infallible;

    fn send(
        &self,
        frame: &[u8],
        _cancel: &CancelToken,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send {
        match Frame::decode(frame) {
            Some(decoded) => info!("bus <- {decoded:?}"),
            None => warn!("bus <- undecodable {frame:02X?}"),
        }
        std::future::ready(Ok(()))
    }
}

// ============================================================================
// Setup
// ============================================================================

fn start_logger(verbose: bool) -> anyhow::Result<LoggerHandle> {
    let level = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    let mut builder = LogSpecBuilder::new();
    let _ = builder
        .default(LevelFilter::Warn)
        .module("yard_dispatch", level)
        .module("yard_console", level);
    let handle = Logger::with(builder.finalize())
        .log_to_stderr()
        .start()
        .context("starting the logger")?;
    Ok(handle)
}

fn load_topology(path: &Path) -> anyhow::Result<Topology> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("reading topology {}", path.display()))?;
    Topology::from_json(&json).with_context(|| format!("parsing topology {}", path.display()))
}

fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    let Some(path) = path else {
        return Ok(Config::default());
    };
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    Config::from_json(&json).with_context(|| format!("parsing config {}", path.display()))
}

struct Args {
    verbose: bool,
    topology: PathBuf,
    config: Option<PathBuf>,
}

fn parse_args() -> anyhow::Result<Args> {
    let mut verbose = false;
    let mut paths = Vec::new();
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "-v" | "--verbose" => verbose = true,
            _ => paths.push(PathBuf::from(arg)),
        }
    }
    let mut paths = paths.into_iter();
    let topology = paths
        .next()
        .context("usage: yard_console [-v] <topology.json> [config.json]")?;
    Ok(Args {
        verbose,
        topology,
        config: paths.next(),
    })
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let args = parse_args()?;
    let _logger = start_logger(args.verbose)?;

    let config = load_config(args.config.as_deref())?;
    let topology = load_topology(&args.topology)?;
    info!(
        "station {}: {} point(s), {} signal(s), {} route(s), {} turntable track(s)",
        config.station.name,
        topology.points.len(),
        topology.signals.len(),
        topology.routes.len(),
        topology.turntable_tracks.len()
    );

    let dispatcher = Arc::new(
        Dispatcher::new(LoggingTransport, topology).with_config(config.dispatch.clone()),
    );
    let mut notifications = dispatcher.subscribe();
    let mut console = ConsoleInputHandler::new(Arc::clone(&dispatcher), StdinKeySource::spawn())
        .with_config(&config.console);
    let never = CancelToken::never();

    loop {
        console.poll(&never).await;

        loop {
            match notifications.try_recv() {
                Ok(Notification::ReloadRequested) => match load_topology(&args.topology) {
                    Ok(topology) => dispatcher.replace_topology(topology),
                    Err(err) => warn!("reload failed: {err:#}"),
                },
                Ok(notification) => println!("{notification}"),
                Err(NotifyRecvError::Lagged(missed)) => warn!("{missed} notification(s) dropped"),
                Err(_) => break,
            }
        }

        if console.keys().is_closed() {
            info!("input closed");
            return Ok(());
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}
