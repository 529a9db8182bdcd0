use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio_util::sync::CancellationToken;
use tracing::info;

use gitoteko::logger::{self, LogFormat, LogLevel};

/// Set on the first Ctrl-C; the second one force-exits.
static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

#[tokio::main]
async fn main() -> ExitCode {
    // Logging comes up before clap so configuration errors are captured too.
    let log_level = std::env::var("LOG_LEVEL")
        .ok()
        .and_then(|raw| LogLevel::parse(&raw))
        .unwrap_or(LogLevel::Info);
    let log_format = std::env::var("LOG_FORMAT")
        .ok()
        .and_then(|raw| LogFormat::parse(&raw))
        .unwrap_or_default();
    logger::init(log_level, log_format);

    // First press: graceful shutdown at the next repository boundary.
    // Second press: force exit.
    let cancel_token = CancellationToken::new();
    let cancel_clone = cancel_token.clone();
    ctrlc::set_handler(move || {
        if SHUTDOWN_REQUESTED.load(Ordering::SeqCst) {
            eprintln!("force shutdown");
            std::process::exit(130);
        }
        eprintln!("shutting down after the current repository (press Ctrl-C again to force)");
        SHUTDOWN_REQUESTED.store(true, Ordering::SeqCst);
        cancel_clone.cancel();
    })
    .expect("Failed to set CTRL-C handler");

    info!(
        "Starting gitoteko v{} (log level: {})",
        env!("CARGO_PKG_VERSION_FULL"),
        log_level.as_str()
    );

    match gitoteko::cli::run(cancel_token).await {
        Ok(code) => code,
        Err(error) => {
            eprintln!("Error: {error:#}");
            ExitCode::FAILURE
        }
    }
}
