use crate::routines::settings::Settings;
use eyre::{Result, WrapErr};
use std::sync::Mutex;
use std::time::Instant;
use tracing_subscriber::fmt::time::FormatTime;
use tracing_subscriber::fmt::{self};
use tracing_subscriber::prelude::__tracing_subscriber_SubscriberExt;
use tracing_subscriber::registry::Registry;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Setup logging for the library
///
/// Log messages are written to stdout, filtered by `settings.log.level` (e.g. `info`,
/// `debug`, or any `EnvFilter` directive such as `snmfcore=trace`).
///
/// If `settings.log.file` is set, the same messages are also written to that file,
/// which is truncated first.
///
/// Fails if the file cannot be created or if a global subscriber is already installed.
pub fn setup_log(settings: &Settings) -> Result<()> {
    let log_level = settings.log.level.to_lowercase();
    let env_filter = EnvFilter::try_new(&log_level)
        .wrap_err_with(|| format!("Invalid log level: {}", log_level))?;

    let timestamper = CompactTimestamp {
        start: Instant::now(),
    };

    // Define a registry with that level as an environment filter
    let subscriber = Registry::default().with(env_filter);

    // Define layer for file
    let file_layer = match &settings.log.file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(path)
                .wrap_err_with(|| format!("Failed to open log file {}", path))?;
            let layer = fmt::layer()
                .with_writer(Mutex::new(file))
                .with_ansi(false)
                .with_timer(timestamper.clone());
            Some(layer)
        }
        None => None,
    };

    // Define layer for stdout
    let stdout_layer = fmt::layer()
        .with_writer(std::io::stdout)
        .with_ansi(true)
        .with_target(false)
        .with_timer(timestamper);

    // Combine layers with subscriber
    subscriber
        .with(file_layer)
        .with(stdout_layer)
        .try_init()
        .wrap_err("A global logger is already installed")?;
    tracing::debug!("Logging is configured with level: {}", log_level);

    Ok(())
}

#[derive(Clone)]
struct CompactTimestamp {
    start: Instant,
}

impl FormatTime for CompactTimestamp {
    fn format_time(
        &self,
        w: &mut tracing_subscriber::fmt::format::Writer<'_>,
    ) -> Result<(), std::fmt::Error> {
        let elapsed = self.start.elapsed();
        let hours = elapsed.as_secs() / 3600;
        let minutes = (elapsed.as_secs() % 3600) / 60;
        let seconds = elapsed.as_secs() % 60;

        write!(w, "{:02}h {:02}m {:02}s", hours, minutes, seconds)
    }
}
