// CLI entry point for a standalone Chorus relay.
//
// Starts a relay server and keeps it running until SIGINT/SIGTERM (Unix) or
// until stdin is closed (elsewhere), then shuts it down cleanly so connected
// clients observe end of stream.
//
// Usage:
//   relay [OPTIONS]
//     --config <FILE>             TOML config (host, port, poll_interval_ms,
//                                 max_pending_bytes)
//     --bind <HOST:PORT>          Listen address, instead of --host/--port
//     --host <HOST>               Listen host (default: 127.0.0.1)
//     --port <PORT>               Listen port (default: 7878, 0 = any free port)
//     --poll-interval-ms <MS>     Poll loop interval (default: 100)
//     --max-pending-bytes <N>     Per-client output backlog before disconnect
//
// Command-line flags override values from the config file. Log verbosity is
// controlled with RUST_LOG (default: info).

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use chorus_relay::{Address, RelayServer, ServerConfig};
use clap::Parser;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "relay", about = "Broadcast relay: re-sends every message to every client")]
struct Args {
    /// TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Listen address as HOST:PORT.
    #[arg(long, conflicts_with_all = ["host", "port"])]
    bind: Option<Address>,

    /// Listen host.
    #[arg(long)]
    host: Option<String>,

    /// Listen port; 0 picks any free port.
    #[arg(long)]
    port: Option<u16>,

    /// Milliseconds between poll loop iterations.
    #[arg(long)]
    poll_interval_ms: Option<u64>,

    /// Bytes of output a client may fall behind before it is disconnected.
    #[arg(long)]
    max_pending_bytes: Option<usize>,
}

impl Args {
    fn into_config(self) -> Result<ServerConfig, chorus_relay::ConfigError> {
        let mut config = match &self.config {
            Some(path) => ServerConfig::load_toml_file(path)?,
            None => ServerConfig::default(),
        };
        if let Some(bind) = self.bind {
            config.bind = bind;
        }
        if let Some(host) = self.host {
            config.bind.host = host;
        }
        if let Some(port) = self.port {
            config.bind.port = port;
        }
        if let Some(ms) = self.poll_interval_ms {
            config.poll_interval = Duration::from_millis(ms);
        }
        if let Some(max) = self.max_pending_bytes {
            config.max_pending_bytes = max;
        }
        Ok(config)
    }
}

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

fn main() -> ExitCode {
    init_tracing();

    let config = match Args::parse().into_config() {
        Ok(config) => config,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    // Signals must be blocked before the poll thread exists so it inherits
    // the mask and delivery is left to `sigwait` below.
    let shutdown = ShutdownSignal::install();

    let mut server = match RelayServer::start_with(config) {
        Ok(server) => server,
        Err(e) => {
            error!("failed to start relay: {e}");
            return ExitCode::FAILURE;
        }
    };

    println!("Relay listening on {}", server.address());
    shutdown.wait();

    info!("shutting down");
    server.close();
    ExitCode::SUCCESS
}

#[cfg(unix)]
struct ShutdownSignal {
    mask: libc::sigset_t,
}

#[cfg(unix)]
impl ShutdownSignal {
    fn install() -> Self {
        // SAFETY: `mask` is initialized by `sigemptyset` before use, and
        // `pthread_sigmask` only touches the calling thread's mask.
        unsafe {
            let mut mask: libc::sigset_t = std::mem::zeroed();
            libc::sigemptyset(&mut mask);
            libc::sigaddset(&mut mask, libc::SIGINT);
            libc::sigaddset(&mut mask, libc::SIGTERM);
            libc::pthread_sigmask(libc::SIG_BLOCK, &mask, std::ptr::null_mut());
            Self { mask }
        }
    }

    fn wait(&self) {
        let mut sig: libc::c_int = 0;
        // SAFETY: `self.mask` is a valid, initialized signal set.
        let rc = unsafe { libc::sigwait(&self.mask, &mut sig) };
        if rc != 0 {
            error!(error = %std::io::Error::from_raw_os_error(rc), "sigwait failed");
            return;
        }
        info!(signal = sig, "received shutdown signal");
    }
}

#[cfg(not(unix))]
struct ShutdownSignal;

#[cfg(not(unix))]
impl ShutdownSignal {
    fn install() -> Self {
        Self
    }

    fn wait(&self) {
        use std::io::Read;

        println!("Close stdin (Ctrl+Z, Enter) to stop.");
        let _ = std::io::stdin().read_to_end(&mut Vec::new());
    }
}
