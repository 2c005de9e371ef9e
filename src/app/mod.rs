pub mod config;
pub mod logging_system;
pub mod pipeline;
pub mod shutdown;

pub use config::{BatchSettings, Config, ConfigError, LogFormat, LogLevel};
pub use logging_system::{LoggingSystem, setup_logging};
pub use pipeline::{MetricPipeline, PipelineStats};
pub use shutdown::spawn_signal_listener;

use crate::domain::ForwarderError;
use crate::sender::DeliveryClient;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub struct App {
    config: Config,
    client: Arc<DeliveryClient>,
}

impl App {
    pub fn from_args<I, T>(args: I) -> Result<Self, ForwarderError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let config = Config::from_args_and_env(args)?;
        Self::from_config(config)
    }

    pub fn from_config(config: Config) -> Result<Self, ForwarderError> {
        let client = DeliveryClient::new(config.to_client_config()?)?;
        Ok(Self {
            config,
            client: Arc::new(client),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn client(&self) -> &Arc<DeliveryClient> {
        &self.client
    }

    /// Forward stdin until it closes or a shutdown signal arrives.
    pub async fn run(self) -> PipelineStats {
        let cancel = CancellationToken::new();
        let signals = spawn_signal_listener(cancel.clone());

        info!(
            "rask-metrics-forwarder is running (url={}, bucket={:?}, bucket_tag={:?})",
            self.client.url(),
            self.config.bucket,
            self.config.bucket_tag
        );

        let input = tokio::io::BufReader::new(tokio::io::stdin());
        let stats = MetricPipeline::new(self.client.clone(), self.config.batch_settings())
            .run(input, cancel.clone())
            .await;

        cancel.cancel();
        signals.abort();
        self.client.close();
        if let Some(monitor) = self.client.health() {
            info!(
                health = ?monitor.health(),
                timeouts = monitor.timeouts(),
                "Connection health at shutdown"
            );
        }
        info!("rask-metrics-forwarder stopped.");
        stats
    }
}

pub fn get_version() -> String {
    crate::VERSION.to_string()
}

// Main entry point for the application
pub async fn main() -> anyhow::Result<()> {
    let config = Config::from_args_and_env(std::env::args_os())?;
    setup_logging(config.log_level, config.log_format)?;

    info!("Starting rask-metrics-forwarder v{}", get_version());
    let app = App::from_config(config)?;
    app.run().await;
    Ok(())
}
