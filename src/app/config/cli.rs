use super::groups::BatchSettings;
use super::serde_helpers::{self, parse_header, parse_millis};
use super::{ConfigError, LogFormat, LogLevel};
use crate::sender::{ClientConfig, ContentEncoding, DEFAULT_REQUEST_TIMEOUT, TlsConfig};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Parser, Debug, Clone, Serialize, Deserialize)]
#[command(author, version, about, long_about = None)]
#[serde(default)]
pub struct Config {
    /// Server URL (http://, https:// or unix://)
    #[arg(long, env = "INFLUX_URL", default_value = "http://localhost:8086")]
    pub url: String,

    /// API token sent as `Authorization: Token <token>`
    #[arg(long, env = "INFLUX_TOKEN", default_value = "", hide_env_values = true)]
    #[serde(skip_serializing)]
    pub token: String,

    /// Organization that owns the destination buckets
    #[arg(long, env = "INFLUX_ORG", default_value = "")]
    pub organization: String,

    /// Default destination bucket
    #[arg(long, env = "INFLUX_BUCKET", default_value = "")]
    pub bucket: String,

    /// Tag whose value selects the destination bucket per metric
    #[arg(long, env = "INFLUX_BUCKET_TAG")]
    pub bucket_tag: Option<String>,

    /// Strip the bucket tag from delivered points
    #[arg(long, env = "INFLUX_EXCLUDE_BUCKET_TAG")]
    pub exclude_bucket_tag: bool,

    /// Never try to create missing buckets
    #[arg(long, env = "INFLUX_SKIP_BUCKET_CREATION")]
    pub skip_bucket_creation: bool,

    /// Wait before re-attempting a failed bucket creation, in milliseconds
    #[arg(
        long = "bucket-creation-retry-interval-ms",
        env = "BUCKET_CREATION_RETRY_INTERVAL_MS",
        default_value = "0",
        value_parser = parse_millis
    )]
    #[serde(rename = "bucket_creation_retry_interval_ms", with = "serde_helpers")]
    pub bucket_creation_retry_interval: Duration,

    /// Per-request timeout in milliseconds
    #[arg(
        long = "timeout-ms",
        env = "INFLUX_TIMEOUT_MS",
        default_value = "5000",
        value_parser = parse_millis
    )]
    #[serde(rename = "timeout_ms", with = "serde_helpers")]
    pub timeout: Duration,

    /// Extra request headers as Name=Value (repeatable)
    #[arg(long = "header", env = "INFLUX_HEADERS", value_delimiter = ',')]
    pub headers: Vec<String>,

    /// Proxy URL; falls back to HTTP_PROXY/HTTPS_PROXY when unset
    #[arg(long, env = "INFLUX_HTTP_PROXY")]
    pub proxy: Option<String>,

    /// User-Agent header value
    #[arg(long, env = "INFLUX_USER_AGENT")]
    pub user_agent: Option<String>,

    /// Payload encoding (identity or gzip)
    #[arg(long, env = "CONTENT_ENCODING", default_value = "identity")]
    pub content_encoding: ContentEncoding,

    /// PEM bundle of additional trusted CAs
    #[arg(long, env = "TLS_CA")]
    pub tls_ca: Option<PathBuf>,

    /// PEM client certificate
    #[arg(long, env = "TLS_CERT")]
    pub tls_cert: Option<PathBuf>,

    /// PEM client private key
    #[arg(long, env = "TLS_KEY")]
    pub tls_key: Option<PathBuf>,

    /// Accept any server certificate
    #[arg(long, env = "INSECURE_SKIP_VERIFY")]
    pub insecure_skip_verify: bool,

    /// Log level
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: LogLevel,

    /// Log output format
    #[arg(long, env = "LOG_FORMAT", default_value = "compact")]
    pub log_format: LogFormat,

    /// Number of metrics per write
    #[arg(long, env = "BATCH_SIZE", default_value = "1000")]
    pub batch_size: usize,

    /// Flush interval in milliseconds
    #[arg(
        long = "flush-interval-ms",
        env = "FLUSH_INTERVAL_MS",
        default_value = "10000",
        value_parser = parse_millis
    )]
    #[serde(rename = "flush_interval_ms", with = "serde_helpers")]
    pub flush_interval: Duration,

    /// Maximum number of metrics held for re-delivery
    #[arg(long, env = "BUFFER_LIMIT", default_value = "10000")]
    pub buffer_limit: usize,

    /// Configuration file path (optional)
    #[arg(long, env = "CONFIG_FILE")]
    #[serde(skip)]
    pub config_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        let batch = BatchSettings::default();
        Self {
            url: "http://localhost:8086".to_string(),
            token: String::new(),
            organization: String::new(),
            bucket: String::new(),
            bucket_tag: None,
            exclude_bucket_tag: false,
            skip_bucket_creation: false,
            bucket_creation_retry_interval: Duration::ZERO,
            timeout: DEFAULT_REQUEST_TIMEOUT,
            headers: Vec::new(),
            proxy: None,
            user_agent: None,
            content_encoding: ContentEncoding::Identity,
            tls_ca: None,
            tls_cert: None,
            tls_key: None,
            insecure_skip_verify: false,
            log_level: LogLevel::Info,
            log_format: LogFormat::Compact,
            batch_size: batch.batch_size,
            flush_interval: batch.flush_interval,
            buffer_limit: batch.buffer_limit,
            config_file: None,
        }
    }
}

impl Config {
    pub fn from_args<I, T>(args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let config = Config::parse_from(args);
        config.validate()?;
        Ok(config)
    }

    /// Parse the command line (clap reads env fallbacks); a `--config-file`
    /// replaces everything else.
    pub fn from_args_and_env<I, T>(args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let config = Config::parse_from(args);
        match &config.config_file {
            Some(path) => {
                let mut from_file = Self::from_file(path)?;
                from_file.config_file = Some(path.clone());
                Ok(from_file)
            }
            None => {
                config.validate()?;
                Ok(config)
            }
        }
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn batch_settings(&self) -> BatchSettings {
        BatchSettings {
            batch_size: self.batch_size,
            flush_interval: self.flush_interval,
            buffer_limit: self.buffer_limit,
        }
    }

    pub fn parsed_headers(&self) -> Result<HashMap<String, String>, ConfigError> {
        self.headers
            .iter()
            .filter(|raw| !raw.trim().is_empty())
            .map(|raw| parse_header(raw).ok_or_else(|| ConfigError::InvalidHeader(raw.clone())))
            .collect()
    }

    fn tls_config(&self) -> Option<TlsConfig> {
        let any = self.tls_ca.is_some()
            || self.tls_cert.is_some()
            || self.tls_key.is_some()
            || self.insecure_skip_verify;
        any.then(|| TlsConfig {
            ca_file: self.tls_ca.clone(),
            cert_file: self.tls_cert.clone(),
            key_file: self.tls_key.clone(),
            insecure_skip_verify: self.insecure_skip_verify,
        })
    }

    pub fn to_client_config(&self) -> Result<ClientConfig, ConfigError> {
        Ok(ClientConfig {
            url: self.url.clone(),
            token: self.token.clone(),
            organization: self.organization.clone(),
            bucket: self.bucket.clone(),
            bucket_tag: self.bucket_tag.clone(),
            exclude_bucket_tag: self.exclude_bucket_tag,
            skip_bucket_creation: self.skip_bucket_creation,
            bucket_creation_retry_interval: self.bucket_creation_retry_interval,
            timeout: self.timeout,
            headers: self.parsed_headers()?,
            proxy: self.proxy.clone(),
            user_agent: self.user_agent.clone(),
            content_encoding: self.content_encoding,
            tls: self.tls_config(),
        })
    }
}
