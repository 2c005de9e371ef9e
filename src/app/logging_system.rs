use super::config::{LogFormat, LogLevel};
use crate::domain::ForwarderError;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Library targets that are too chatty at the forwarder's own level.
const DEFAULT_DIRECTIVES: &[(&str, LogLevel)] = &[
    ("hyper", LogLevel::Warn),
    ("hyper_util", LogLevel::Warn),
    ("reqwest", LogLevel::Warn),
    ("h2", LogLevel::Warn),
    ("rustls", LogLevel::Warn),
];

pub struct LoggingSystem {
    directives: Vec<String>,
    format: LogFormat,
}

impl LoggingSystem {
    pub fn new(format: LogFormat) -> Self {
        Self {
            directives: Vec::new(),
            format,
        }
    }

    pub fn add_directive(&mut self, directive: &str) -> Result<(), ForwarderError> {
        directive
            .parse::<tracing_subscriber::filter::Directive>()
            .map_err(|e| ForwarderError::Logging(format!("invalid directive '{directive}': {e}")))?;
        self.directives.push(directive.to_string());
        Ok(())
    }

    pub fn add_default_directives(&mut self) {
        for (target, level) in DEFAULT_DIRECTIVES {
            self.directives.push(format!("{target}={}", level.as_str()));
        }
    }

    pub fn build_filter_string(&self, default_level: LogLevel) -> String {
        std::iter::once(default_level.as_str().to_string())
            .chain(self.directives.iter().cloned())
            .collect::<Vec<_>>()
            .join(",")
    }

    /// `RUST_LOG` wins over the configured level when set.
    pub fn initialize_tracing(&self, default_level: LogLevel) -> Result<(), ForwarderError> {
        let filter = match EnvFilter::try_from_default_env() {
            Ok(filter) => filter,
            Err(_) => {
                let filter_string = self.build_filter_string(default_level);
                EnvFilter::try_new(&filter_string).map_err(|e| {
                    ForwarderError::Logging(format!("bad filter '{filter_string}': {e}"))
                })?
            }
        };

        let registry = tracing_subscriber::registry().with(filter);
        let result = match self.format {
            LogFormat::Compact => registry
                .with(fmt::layer().with_target(true).with_writer(std::io::stderr).compact())
                .try_init(),
            LogFormat::Json => registry
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .try_init(),
        };

        result.map_err(|e| ForwarderError::Logging(format!("failed to install subscriber: {e}")))
    }
}

pub fn setup_logging(level: LogLevel, format: LogFormat) -> Result<(), ForwarderError> {
    let mut logging = LoggingSystem::new(format);
    logging.add_default_directives();
    logging.initialize_tracing(level)
}
