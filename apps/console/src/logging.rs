use directories::ProjectDirs;
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const LOG_FILE: &str = "console.log";

/// Installs stdout and rolling-file output. The returned guard flushes the file
/// writer on drop and must outlive the runtime.
pub fn init_logging() -> Option<WorkerGuard> {
    // RUST_LOG wins; otherwise this crate logs at debug in debug builds.
    let default_directives = if cfg!(debug_assertions) {
        "info,aegis_console=debug"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives));

    let (file_layer, guard) = match log_dir() {
        Some(dir) => {
            let (writer, guard) =
                tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, LOG_FILE));
            let layer = fmt::layer()
                .with_ansi(false)
                .with_target(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .with(file_layer)
        .init();
    guard
}

fn log_dir() -> Option<PathBuf> {
    let dir = ProjectDirs::from("com", "aegis", "Aegis Console")?
        .data_local_dir()
        .join("logs");
    match std::fs::create_dir_all(&dir) {
        Ok(()) => Some(dir),
        Err(err) => {
            // The subscriber is not installed yet.
            eprintln!("log directory {} unavailable: {}", dir.display(), err);
            None
        }
    }
}

/// Prints `<redacted>` in place of the wrapped value.
pub struct Redact<T>(T);

impl<T> Redact<T> {
    pub fn new(value: T) -> Self {
        Self(value)
    }
}

impl<T> std::fmt::Display for Redact<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<redacted>")
    }
}

const SECRET_MARKERS: &[&str] = &[
    "password", "passphrase", "secret", "token", "key", "authid", "shared-access", "grant",
];

/// Query parameter names whose values must never reach a log line.
pub fn is_secret_option(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    SECRET_MARKERS.iter().any(|marker| lower.contains(marker))
}

/// Displays a target URL with credential-bearing parts masked.
///
/// Userinfo passwords and the values of secret-looking query parameters are
/// replaced by `***`; everything else is printed as-is so the destination stays
/// recognizable in logs.
pub struct RedactedUrl<'a>(pub &'a str);

impl std::fmt::Display for RedactedUrl<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (head, query) = match self.0.split_once('?') {
            Some((head, query)) => (head, Some(query)),
            None => (self.0, None),
        };

        match head.split_once("://") {
            Some((scheme, rest)) => {
                let authority_end = rest.find('/').unwrap_or(rest.len());
                let (authority, path) = rest.split_at(authority_end);
                match authority.rsplit_once('@') {
                    Some((userinfo, host)) => {
                        let user = userinfo.split(':').next().unwrap_or_default();
                        write!(f, "{}://{}:***@{}{}", scheme, user, host, path)?;
                    }
                    None => write!(f, "{}", head)?,
                }
            }
            None => write!(f, "{}", head)?,
        }

        if let Some(query) = query {
            f.write_str("?")?;
            for (i, pair) in query.split('&').enumerate() {
                if i > 0 {
                    f.write_str("&")?;
                }
                match pair.split_once('=') {
                    Some((name, _)) if is_secret_option(name) => write!(f, "{}=***", name)?,
                    _ => f.write_str(pair)?,
                }
            }
        }
        Ok(())
    }
}
