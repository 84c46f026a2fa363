//! Tracing bootstrap for the CLI and the self-hosted server.
//!
//! Everything goes to stdout through a compact formatter. A second, ANSI-free
//! copy lands in a file when one can be opened: `ATTACHE_LOG_FILE` names an
//! explicit target, otherwise `logs/attache.log` next to the working
//! directory. File writes go through a non-blocking appender so conversion
//! work never waits on disk.
use std::sync::OnceLock;

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

const LOG_FILE_VAR: &str = "ATTACHE_LOG_FILE";
const DEFAULT_LOG_DIR: &str = "logs";
const DEFAULT_LOG_FILE: &str = "attache.log";

// Dropping the guard flushes and stops the appender thread, so it has to
// live as long as the process does.
static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Install the global tracing subscriber.
///
/// `RUST_LOG` controls filtering and defaults to `info`. Call once at
/// startup, before the first span or event.
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stdout_layer = fmt::layer().with_target(false).compact();

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer);

    match file_writer() {
        Some(writer) => {
            let file_layer = fmt::layer()
                .with_writer(writer)
                .with_target(true)
                .with_ansi(false)
                .compact();
            registry.with(file_layer).init();
        }
        None => registry.init(),
    }
}

/// Open the file sink, or `None` (with a note on stderr) when the path is
/// unusable. Logging stays stdout-only in that case rather than failing
/// startup.
fn file_writer() -> Option<NonBlocking> {
    if let Ok(path) = std::env::var(LOG_FILE_VAR) {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|err| eprintln!("cannot open log file {path}: {err}"))
            .ok()?;
        let (writer, guard) = tracing_appender::non_blocking(file);
        let _ = LOG_GUARD.set(guard);
        return Some(writer);
    }

    if let Err(err) = std::fs::create_dir_all(DEFAULT_LOG_DIR) {
        eprintln!("cannot create {DEFAULT_LOG_DIR}/ for logging: {err}");
        return None;
    }
    let appender = tracing_appender::rolling::never(DEFAULT_LOG_DIR, DEFAULT_LOG_FILE);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let _ = LOG_GUARD.set(guard);
    Some(writer)
}
