use super::{Config, ConfigError};
use crate::sender::Endpoint;
use url::Url;

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        Endpoint::parse(&self.url)
            .map_err(|e| ConfigError::InvalidUrl(format!("Invalid url '{}': {}", self.url, e)))?;

        if let Some(proxy) = self.proxy.as_deref().filter(|p| !p.is_empty()) {
            Url::parse(proxy).map_err(|e| {
                ConfigError::InvalidUrl(format!("Invalid proxy URL '{proxy}': {e}"))
            })?;
        }

        let routes_by_tag = self.bucket_tag.as_deref().is_some_and(|t| !t.is_empty());
        if self.bucket.is_empty() && !routes_by_tag {
            return Err(ConfigError::InvalidConfig(
                "Either bucket or bucket_tag must be set".to_string(),
            ));
        }

        if self.batch_size == 0 {
            return Err(ConfigError::InvalidConfig(
                "Batch size must be greater than 0".to_string(),
            ));
        }

        if self.buffer_limit < self.batch_size {
            return Err(ConfigError::InvalidConfig(format!(
                "Buffer limit ({}) must be at least as large as batch size ({})",
                self.buffer_limit, self.batch_size
            )));
        }

        if self.flush_interval.is_zero() {
            return Err(ConfigError::InvalidConfig(
                "Flush interval must be greater than 0".to_string(),
            ));
        }

        if self.tls_cert.is_some() != self.tls_key.is_some() {
            return Err(ConfigError::InvalidConfig(
                "tls_cert and tls_key must be set together".to_string(),
            ));
        }

        self.parsed_headers()?;

        Ok(())
    }
}
