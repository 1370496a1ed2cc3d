// packages/engine/src/main.rs
//! Tunnelhook launcher
//!
//! Runs a program with the tunnelhook library preloaded, so its outbound TCP
//! connections and name lookups go through a local CONNECT/RESOLVE proxy.
//!
//! ```text
//! tunnelhook --proxy http://localhost:8080 -- curl http://internal.example
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};
use tunnelhook_engine::launcher::preload::INJECT_VAR;
use tunnelhook_engine::launcher::{LaunchSpec, PreloadConfig, PreloadInjector, ProcessLauncher};
use tunnelhook_engine::observability::init_tracing;
use tunnelhook_engine::utils::config::{LOG_VAR, PROXY_VAR};

#[derive(Debug, Parser)]
#[command(name = "tunnelhook", version, about = "Run a program with connect/getaddrinfo tunneled through a local proxy")]
struct Cli {
    /// Proxy URL (http://localhost:<port> or http://127.0.0.1:<port>)
    #[arg(long, env = PROXY_VAR)]
    proxy: String,

    /// Print launcher and shim diagnostics to stderr
    #[arg(long)]
    debug: bool,

    /// Give up on a proxy response after this many milliseconds
    #[arg(long, value_name = "MS")]
    timeout_ms: Option<u64>,

    /// Path to the preload library
    #[arg(long, value_name = "PATH")]
    library: Option<PathBuf>,

    /// Program and arguments to run
    #[arg(last = true, required = true, value_name = "COMMAND")]
    command: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_filter = std::env::var(LOG_VAR).ok();
    init_tracing(cli.debug, log_filter.as_deref());
    debug!("Starting tunnelhook v{}", env!("CARGO_PKG_VERSION"));

    let injector = PreloadInjector::new(PreloadConfig {
        proxy: cli.proxy.clone(),
        debug: cli.debug,
        read_timeout: cli.timeout_ms.filter(|ms| *ms > 0).map(Duration::from_millis),
        library_path: cli.library.clone(),
    });

    if !injector.is_active() {
        warn!("Proxy URL {:?} is not a local http://localhost:<port> URL; the shim will stay inactive", cli.proxy);
        if !cli.debug {
            eprintln!(
                "tunnelhook: warning: proxy URL {:?} is not usable, connections will not be tunneled",
                cli.proxy
            );
        }
    }

    let library = injector.locate_library().context("Cannot locate the preload library")?;
    let existing = std::env::var(INJECT_VAR).ok();
    let env_vars = injector.get_env_vars(&library, existing.as_deref());

    let spec = LaunchSpec::from_command(&cli.command, env_vars)?;
    info!("Running {} with {:?} preloaded", spec.program, library);

    let code = ProcessLauncher::new()
        .run(&spec)
        .await
        .with_context(|| format!("Failed to run {}", spec.program))?;

    debug!("{} exited with code {}", spec.program, code);
    std::process::exit(code);
}
