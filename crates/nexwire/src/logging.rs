use clap::ValueEnum;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::filter::Targets;
use tracing_subscriber::prelude::*;

/// Targets `--log-level` applies to. Everything else (tokio, the runtime)
/// logs at most warnings.
const NEXWIRE_TARGETS: &[&str] = &[
    "nexwire",
    "nexwire_transport",
    "nexwire_frame",
    "nexwire_pipe",
    "nexwire_session",
];

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_filter(self) -> LevelFilter {
        match self {
            LogLevel::Error => LevelFilter::ERROR,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Trace => LevelFilter::TRACE,
        }
    }
}

/// Build the target filter: `level` for the nexwire crates, then any
/// `directives` (`nexwire_pipe=trace,nexwire_session=debug`) on top.
pub fn target_filter(level: LogLevel, directives: Option<&str>) -> Result<Targets, String> {
    let level = level.as_filter();
    let mut filter = Targets::new().with_default(level.min(LevelFilter::WARN));
    for target in NEXWIRE_TARGETS {
        filter = filter.with_target(*target, level);
    }

    if let Some(directives) = directives.filter(|d| !d.trim().is_empty()) {
        let extra: Targets = directives
            .parse()
            .map_err(|err| format!("invalid log filter '{directives}': {err}"))?;
        if let Some(default) = extra.default_level() {
            filter = filter.with_default(default);
        }
        filter = filter.with_targets(extra);
    }
    Ok(filter)
}

/// Install the stderr subscriber. Library crates only emit events.
///
/// Targets are printed once the level reaches debug, where events from
/// several layers interleave.
pub fn init_logging(format: LogFormat, level: LogLevel, directives: Option<&str>) {
    let (filter, rejected) = match target_filter(level, directives) {
        Ok(filter) => (filter, None),
        Err(err) => (target_filter(level, None).unwrap_or_default(), Some(err)),
    };
    let show_targets = level.as_filter() >= LevelFilter::DEBUG || directives.is_some();

    let layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .with_target(show_targets);
    let installed = match format {
        LogFormat::Text => tracing_subscriber::registry()
            .with(layer.with_filter(filter))
            .try_init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(layer.json().with_filter(filter))
            .try_init(),
    };

    if let (Ok(()), Some(err)) = (installed, rejected) {
        tracing::warn!("{err}; using --log-level only");
    }
}
