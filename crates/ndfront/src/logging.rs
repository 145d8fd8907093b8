use clap::ValueEnum;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, reload, Registry};

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
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

    /// At least `debug`.
    pub fn verbose(self) -> Self {
        match self {
            LogLevel::Trace => LogLevel::Trace,
            _ => LogLevel::Debug,
        }
    }
}

/// Lets a running frontend switch between its base level and debug.
#[derive(Clone)]
pub struct LogHandle {
    handle: reload::Handle<LevelFilter, Registry>,
    base: LogLevel,
}

impl LogHandle {
    pub fn set_verbose(&self, verbose: bool) {
        let level = if verbose { self.base.verbose() } else { self.base };
        if let Err(err) = self.handle.reload(level.as_filter()) {
            tracing::warn!(error = %err, "cannot change log level");
        }
    }
}

pub fn init_logging(format: LogFormat, level: LogLevel) -> Option<LogHandle> {
    let (filter, handle) = reload::Layer::new(level.as_filter());
    let registry = tracing_subscriber::registry().with(filter);

    let installed = match format {
        LogFormat::Text => registry
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_ansi(false)
                    .with_target(false),
            )
            .try_init(),
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_ansi(false)
                    .with_target(false),
            )
            .try_init(),
    };

    installed.ok().map(|()| LogHandle {
        handle,
        base: level,
    })
}
