//! `mcpipe`
//!
//! Connects to a remote WebSocket endpoint and relays its messages to a local
//! child program over stdio, reconnecting forever until interrupted.

use std::ffi::OsString;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::info;

use mcpipe::relay::{DiagnosticSink, StderrSink, TracingSink};
use mcpipe::session::SessionConfig;
use mcpipe::shutdown;
use mcpipe::subprocess::{ProcessCommand, ProcessManager};
use mcpipe::tunnel::{ConnectionSupervisor, Keepalive, ReconnectPolicy, WebSocketConnector};
use mcpipe_core::config::{self, Config, DiagnosticSinkKind, Overrides, StderrPolicy};
use mcpipe_core::{Endpoint, tracing_init};

#[derive(Parser, Debug)]
#[command(name = "mcpipe")]
#[command(version, about = "mcpipe - relay a WebSocket endpoint to a local program over stdio")]
struct Args {
    /// Program to run for every connection
    program: PathBuf,

    /// Extra arguments passed to the program
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    program_args: Vec<OsString>,

    /// WebSocket endpoint (ws:// or wss://)
    #[arg(long, env = "MCP_ENDPOINT", hide_env_values = true)]
    endpoint: Option<String>,

    /// Config file path (defaults to the global mcpipe/config.toml when present)
    #[arg(long, env = "MCPIPE_CONFIG")]
    config: Option<PathBuf>,

    /// Interpreter used to launch the program (e.g. "python3")
    #[arg(long, env = "MCPIPE_INTERPRETER")]
    interpreter: Option<PathBuf>,

    /// Delay before the first reconnect attempt, in milliseconds
    #[arg(long, env = "MCPIPE_INITIAL_BACKOFF_MS")]
    initial_backoff_ms: Option<u64>,

    /// Upper bound on the reconnect delay, in milliseconds
    #[arg(long, env = "MCPIPE_MAX_BACKOFF_MS")]
    max_backoff_ms: Option<u64>,

    /// Seconds to wait for graceful child shutdown before SIGKILL
    #[arg(long, env = "MCPIPE_TERMINATE_TIMEOUT")]
    terminate_timeout: Option<u64>,

    /// What child stderr EOF means ("fatal" or "ignore")
    #[arg(long, env = "MCPIPE_STDERR_POLICY")]
    stderr_policy: Option<StderrPolicy>,

    /// Where child stderr goes ("stderr" or "log")
    #[arg(long, env = "MCPIPE_DIAGNOSTIC_SINK")]
    diagnostic_sink: Option<DiagnosticSinkKind>,

    /// Seconds between keepalive pings (0 disables them)
    #[arg(long, env = "MCPIPE_KEEPALIVE_INTERVAL")]
    keepalive_interval: Option<u64>,

    /// Seconds to wait for traffic after a ping
    #[arg(long, env = "MCPIPE_KEEPALIVE_TIMEOUT")]
    keepalive_timeout: Option<u64>,

    /// Log level filter (e.g. "info", "debug", "warn").
    #[arg(long, env = "MCPIPE_LOG_LEVEL")]
    log_level: Option<String>,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long, env = "MCPIPE_LOG_JSON")]
    log_json: bool,
}

impl Args {
    fn overrides(&self) -> Overrides {
        Overrides {
            initial_backoff_ms: self.initial_backoff_ms,
            max_backoff_ms: self.max_backoff_ms,
            interpreter: self.interpreter.clone(),
            terminate_timeout_secs: self.terminate_timeout,
            stderr_policy: self.stderr_policy,
            diagnostic_sink: self.diagnostic_sink,
            keepalive_interval_secs: self.keepalive_interval,
            keepalive_timeout_secs: self.keepalive_timeout,
            log_level: self.log_level.clone(),
            log_json: self.log_json.then_some(true),
        }
    }

    fn command(&self, config: &Config) -> ProcessCommand {
        let command = ProcessCommand::new(&self.program).with_args(self.program_args.iter());
        match &config.process.interpreter {
            Some(interpreter) => command.with_interpreter(interpreter),
            None => command,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Loaded before parsing so `.env` can supply MCP_ENDPOINT and the other
    // env fallbacks. Variables already set in the environment win.
    let env_file = dotenv::dotenv().ok();

    // Usage errors exit 1 like every other startup failure; help and
    // version still exit 0.
    let args = Args::try_parse().unwrap_or_else(|e| {
        if e.use_stderr() {
            let _ = e.print();
            std::process::exit(1);
        }
        e.exit()
    });

    let mut config = config::load_config(args.config.as_deref())?;
    config.apply(args.overrides());
    config.validate()?;

    let endpoint = args
        .endpoint
        .as_deref()
        .ok_or_else(|| anyhow::anyhow!("Endpoint missing: set MCP_ENDPOINT or pass --endpoint"))?;
    let endpoint = Endpoint::parse(endpoint)?;

    let _ = rustls::crypto::ring::default_provider().install_default();

    let log_filter = tracing_init::default_filter(&["mcpipe", "mcpipe_core"], &config.logging.level);
    tracing_init::init_tracing(&log_filter, config.logging.json);

    let config_file = args
        .config
        .clone()
        .or_else(|| config::global_config_path().filter(|path| path.exists()));
    let command = args.command(&config);
    info!(
        version = env!("CARGO_PKG_VERSION"),
        config_file = ?config_file,
        env_file = ?env_file,
        endpoint = %endpoint,
        command = %command,
        "Starting mcpipe"
    );

    let diagnostics: Arc<dyn DiagnosticSink> = match config.process.diagnostic_sink {
        DiagnosticSinkKind::Stderr => Arc::new(StderrSink),
        DiagnosticSinkKind::Log => Arc::new(TracingSink),
    };
    let keepalive = config
        .keepalive
        .durations()
        .map(|(interval, timeout)| Keepalive { interval, timeout });

    let supervisor = ConnectionSupervisor::new(
        WebSocketConnector::new(keepalive),
        endpoint,
        ReconnectPolicy::from(&config.reconnect),
        ProcessManager::new(Duration::from_secs(config.process.terminate_timeout_secs)),
        SessionConfig {
            command,
            stderr_policy: config.process.stderr_policy,
            diagnostics,
        },
    );

    // The `true` parameter unsets $NOTIFY_SOCKET so the relayed child
    // doesn't accidentally notify systemd. Must happen before the first spawn.
    #[cfg(unix)]
    sd_notify::notify(true, &[sd_notify::NotifyState::Ready])?;

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let supervisor_handle = tokio::spawn(async move {
        supervisor.run(shutdown_rx).await;
    });

    let signal = shutdown::signal().await?;
    info!(signal, "Received shutdown signal");

    let _ = shutdown_tx.send(true);
    let _ = supervisor_handle.await;

    info!("mcpipe stopped");
    Ok(())
}
