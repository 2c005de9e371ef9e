use super::api::{ApiClient, build_default_headers};
use super::buckets::BucketManager;
use super::error::{BucketError, BucketNotFoundError, ConfigError, TransportError, WriteError};
use super::response::{Outcome, api_error, classify, status_line};
use super::serialization::{BatchSerializer, ContentEncoding, LineProtocolSerializer, MetricSerializer};
use super::transport::{TlsConfig, TransportSettings};
use super::url::Endpoint;
use crate::domain::Metric;
use crate::reliability::{BackoffController, ConnectionHealth, HealthMonitor, RetryState};
use parking_lot::RwLock;
use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};
use url::Url;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Static configuration of one delivery destination.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub url: String,
    pub token: String,
    pub organization: String,
    /// Destination when no routing tag is configured or present.
    pub bucket: String,
    /// Tag whose value selects the destination bucket per metric.
    pub bucket_tag: Option<String>,
    /// Strip `bucket_tag` from outgoing points.
    pub exclude_bucket_tag: bool,
    pub skip_bucket_creation: bool,
    /// Minimum wait before re-attempting a failed bucket creation. Zero retries
    /// on every write.
    pub bucket_creation_retry_interval: Duration,
    /// Zero selects [`DEFAULT_REQUEST_TIMEOUT`].
    pub timeout: Duration,
    pub headers: HashMap<String, String>,
    pub proxy: Option<String>,
    pub user_agent: Option<String>,
    pub content_encoding: ContentEncoding,
    pub tls: Option<TlsConfig>,
}

impl Default for ClientConfig {
    fn default() -> Self {
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
            headers: HashMap::new(),
            proxy: None,
            user_agent: None,
            content_encoding: ContentEncoding::Identity,
            tls: None,
        }
    }
}

/// Metrics headed for one bucket. Entries are borrowed from the caller unless
/// the routing tag had to be stripped.
#[derive(Debug)]
pub struct BucketBatch<'a> {
    pub bucket: String,
    pub metrics: Vec<Cow<'a, Metric>>,
}

/// Group metrics by destination bucket in first-seen order.
///
/// The caller's metrics are never modified; stripping the routing tag works on
/// copies so the original batch can be retried as-is.
pub fn partition_by_bucket<'a>(
    metrics: &'a [Metric],
    default_bucket: &str,
    bucket_tag: Option<&str>,
    exclude_bucket_tag: bool,
) -> Vec<BucketBatch<'a>> {
    let Some(tag) = bucket_tag else {
        return vec![BucketBatch {
            bucket: default_bucket.to_string(),
            metrics: metrics.iter().map(Cow::Borrowed).collect(),
        }];
    };

    let mut batches: Vec<BucketBatch<'a>> = Vec::new();
    let mut index: HashMap<&str, usize> = HashMap::new();

    for metric in metrics {
        let bucket = metric.tag(tag).unwrap_or(default_bucket);

        let slot = match index.get(bucket) {
            Some(&slot) => slot,
            None => {
                batches.push(BucketBatch {
                    bucket: bucket.to_string(),
                    metrics: Vec::new(),
                });
                index.insert(bucket, batches.len() - 1);
                batches.len() - 1
            }
        };

        let entry = if exclude_bucket_tag && metric.tags.contains_key(tag) {
            let mut copy = metric.clone();
            copy.remove_tag(tag);
            Cow::Owned(copy)
        } else {
            Cow::Borrowed(metric)
        };
        batches[slot].metrics.push(entry);
    }

    batches
}

/// Ships metric batches to the write API.
///
/// Whole `write` calls are serialized per instance; retry bookkeeping and the
/// created-bucket set live behind their own locks.
pub struct DeliveryClient {
    url: String,
    bucket: String,
    bucket_tag: Option<String>,
    exclude_bucket_tag: bool,
    api: RwLock<Option<Arc<ApiClient>>>,
    serializer: BatchSerializer,
    buckets: BucketManager,
    backoff: BackoffController,
    write_lock: tokio::sync::Mutex<()>,
    monitor: Option<Arc<HealthMonitor>>,
}

impl DeliveryClient {
    pub fn new(config: ClientConfig) -> Result<Self, ConfigError> {
        let monitor = Arc::new(HealthMonitor::default());
        let mut client =
            Self::with_collaborators(config, Arc::new(LineProtocolSerializer), monitor.clone())?;
        client.monitor = Some(monitor);
        Ok(client)
    }

    pub fn with_collaborators(
        config: ClientConfig,
        serializer: Arc<dyn MetricSerializer>,
        health: Arc<dyn ConnectionHealth>,
    ) -> Result<Self, ConfigError> {
        let endpoint = Endpoint::parse(&config.url)?;

        let timeout = if config.timeout.is_zero() {
            DEFAULT_REQUEST_TIMEOUT
        } else {
            config.timeout
        };

        let proxy = config
            .proxy
            .as_deref()
            .filter(|p| !p.is_empty())
            .map(|p| {
                Url::parse(p).map_err(|source| ConfigError::InvalidUrl {
                    url: p.to_string(),
                    source,
                })
            })
            .transpose()?;

        let user_agent = config
            .user_agent
            .clone()
            .filter(|ua| !ua.is_empty())
            .unwrap_or_else(crate::product_token);
        let headers = build_default_headers(&config.token, &user_agent, &config.headers)?;

        let settings = TransportSettings {
            timeout,
            proxy,
            tls: config.tls.clone(),
        };
        let api = ApiClient::new(endpoint, &settings, headers, health)?;

        Ok(Self {
            url: config.url.clone(),
            bucket: config.bucket.clone(),
            bucket_tag: config.bucket_tag.clone().filter(|t| !t.is_empty()),
            exclude_bucket_tag: config.exclude_bucket_tag,
            api: RwLock::new(Some(Arc::new(api))),
            serializer: BatchSerializer::new(serializer, config.content_encoding),
            buckets: BucketManager::new(config.organization, config.skip_bucket_creation)
                .with_retry_interval(config.bucket_creation_retry_interval),
            backoff: BackoffController::new(),
            write_lock: tokio::sync::Mutex::new(()),
            monitor: None,
        })
    }

    /// The origin URL this client delivers to.
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn retry_state(&self) -> RetryState {
        self.backoff.snapshot()
    }

    /// Connection health tracked by the default monitor. `None` when a custom
    /// [`ConnectionHealth`] was supplied through `with_collaborators`.
    pub fn health(&self) -> Option<&HealthMonitor> {
        self.monitor.as_deref()
    }

    pub fn is_bucket_created(&self, bucket: &str) -> bool {
        self.buckets.is_created(bucket)
    }

    pub fn is_closed(&self) -> bool {
        self.api.read().is_none()
    }

    /// Release pooled connections. Idempotent; later writes fail with
    /// [`WriteError::Closed`].
    pub fn close(&self) {
        if self.api.write().take().is_some() {
            debug!(url = %self.url, "delivery client closed");
        }
    }

    fn api(&self) -> Option<Arc<ApiClient>> {
        self.api.read().clone()
    }

    /// Look up the configured organization's id.
    pub async fn resolve_organization_id(&self) -> Result<String, BucketError> {
        let _serialized = self.write_lock.lock().await;
        let api = self.api().ok_or(TransportError::Closed)?;
        self.buckets.resolve_organization_id(&api).await
    }

    /// Create `bucket` unless this client already did, or creation is disabled.
    /// Runs exclusively with `write`, so a bucket is never created twice.
    pub async fn ensure_bucket(&self, bucket: &str) -> Result<(), BucketError> {
        let _serialized = self.write_lock.lock().await;
        let api = self.api().ok_or(TransportError::Closed)?;
        self.buckets.ensure_bucket(&api, bucket).await
    }

    /// Like [`write`](Self::write), but gives up as soon as `cancel` fires.
    /// The in-flight request is dropped and no further state is committed.
    pub async fn write_with_cancel(
        &self,
        cancel: &CancellationToken,
        metrics: &[Metric],
    ) -> Result<(), WriteError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(WriteError::Cancelled),
            result = self.write(metrics) => result,
        }
    }

    pub async fn write(&self, metrics: &[Metric]) -> Result<(), WriteError> {
        let _serialized = self.write_lock.lock().await;

        if let Err(remaining) = self.backoff.check() {
            return Err(WriteError::RetryWindowActive { remaining });
        }

        let api = self.api().ok_or(WriteError::Closed)?;

        let batches = partition_by_bucket(
            metrics,
            &self.bucket,
            self.bucket_tag.as_deref(),
            self.exclude_bucket_tag,
        );

        for batch in batches.iter().filter(|b| !b.metrics.is_empty()) {
            if self.buckets.needs_creation(&batch.bucket)
                && let Err(e) = self.buckets.ensure_bucket(&api, &batch.bucket).await
            {
                warn!(
                    url = %self.url,
                    bucket = %batch.bucket,
                    "When writing to [{}]: bucket {:?} creation failed: {}",
                    self.url, batch.bucket, e
                );
            }

            self.write_batch(&api, &batch.bucket, &batch.metrics).await?;
        }

        Ok(())
    }

    async fn write_batch(
        &self,
        api: &ApiClient,
        bucket: &str,
        metrics: &[Cow<'_, Metric>],
    ) -> Result<(), WriteError> {
        let payload = self.serializer.encode(metrics.iter().map(|m| &**m))?;
        if payload.is_empty() {
            debug!(bucket, "nothing to serialize, skipping write");
            return Ok(());
        }
        let metric_count = payload.metric_count;

        let url = api.endpoint().write_url(self.buckets.organization(), bucket);
        let request = api.write_request(url.clone(), payload);
        let response = api.execute(request).await?;
        let status = response.status;

        match classify(status, &response.headers, &response.body) {
            Outcome::Success => {
                self.backoff.on_success();
                debug!(bucket, metric_count, status = status.as_u16(), "batch delivered");
                Ok(())
            }
            Outcome::DropSilently { description } | Outcome::ClientError { description } => {
                error!(
                    url = %url,
                    bucket,
                    metric_count,
                    "Failed to write metric (will be dropped: {}): {}",
                    status_line(status),
                    description
                );
                Ok(())
            }
            Outcome::Unauthorized { description } => {
                Err(WriteError::Unauthorized(api_error(status, description)))
            }
            Outcome::Throttle { retry_after } => {
                let retry_in = self.backoff.on_throttle(retry_after);
                warn!(
                    url = %url,
                    bucket,
                    "Failed to write; will retry in {:?}. ({})",
                    retry_in,
                    status_line(status)
                );
                Err(WriteError::Throttled {
                    retry_in,
                    status: status_line(status),
                })
            }
            Outcome::BucketMissing { description } => {
                Err(WriteError::BucketNotFound(BucketNotFoundError {
                    api: api_error(status, description),
                    bucket: bucket.to_string(),
                }))
            }
            Outcome::ServerError { description } => {
                Err(WriteError::Api(api_error(status, description)))
            }
        }
    }
}

impl Drop for DeliveryClient {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn metric(name: &str, bucket: Option<&str>) -> Metric {
        let mut m = Metric::new(name, Utc::now()).with_field("v", 1i64);
        if let Some(b) = bucket {
            m = m.with_tag("bucket", b);
        }
        m.with_tag("host", "a")
    }

    #[test]
    fn test_partition_without_tag_is_single_batch() {
        let metrics = vec![metric("a", Some("x")), metric("b", None)];
        let batches = partition_by_bucket(&metrics, "default", None, true);

        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].bucket, "default");
        assert_eq!(batches[0].metrics.len(), 2);
        // No routing tag means nothing is stripped.
        assert!(batches[0].metrics.iter().all(|m| matches!(m, Cow::Borrowed(_))));
    }

    #[test]
    fn test_partition_splits_named_and_default() {
        let metrics = vec![
            metric("a", Some("x")),
            metric("b", None),
            metric("c", Some("x")),
            metric("d", None),
            metric("e", None),
        ];
        let batches = partition_by_bucket(&metrics, "default", Some("bucket"), false);

        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].bucket, "x");
        assert_eq!(batches[0].metrics.len(), 2);
        assert_eq!(batches[1].bucket, "default");
        assert_eq!(batches[1].metrics.len(), 3);
        assert_eq!(batches[0].metrics[1].name, "c");
    }

    #[test]
    fn test_partition_strips_tag_on_copies() {
        let metrics = vec![metric("a", Some("x")), metric("b", None)];
        let batches = partition_by_bucket(&metrics, "default", Some("bucket"), true);

        let routed = &batches[0].metrics[0];
        assert!(matches!(routed, Cow::Owned(_)));
        assert_eq!(routed.tag("bucket"), None);
        assert_eq!(routed.tag("host"), Some("a"));

        // The untagged metric needs no copy.
        assert!(matches!(batches[1].metrics[0], Cow::Borrowed(_)));

        // The caller's batch is untouched.
        assert_eq!(metrics[0].tag("bucket"), Some("x"));
    }

    #[test]
    fn test_construct_rejects_bad_scheme() {
        let config = ClientConfig {
            url: "ftp://localhost".to_string(),
            ..ClientConfig::default()
        };
        assert!(matches!(
            DeliveryClient::new(config),
            Err(ConfigError::UnsupportedScheme(_))
        ));
    }

    #[test]
    fn test_construct_rejects_missing_url() {
        let config = ClientConfig {
            url: String::new(),
            ..ClientConfig::default()
        };
        assert!(matches!(
            DeliveryClient::new(config),
            Err(ConfigError::MissingUrl)
        ));
    }

    #[tokio::test]
    async fn test_transport_failure_reaches_health_hook() {
        use crate::reliability::health::MockConnectionHealth;

        let mut health = MockConnectionHealth::new();
        health
            .expect_on_client_error()
            .withf(|url, error| {
                url.starts_with("http://127.0.0.1:9/api/v2/write")
                    && matches!(error, TransportError::Request { .. })
            })
            .times(1)
            .return_const(());
        health.expect_on_client_success().times(0);

        let config = ClientConfig {
            url: "http://127.0.0.1:9".to_string(),
            bucket: "b".to_string(),
            skip_bucket_creation: true,
            ..ClientConfig::default()
        };
        let client = DeliveryClient::with_collaborators(
            config,
            Arc::new(LineProtocolSerializer),
            Arc::new(health),
        )
        .unwrap();

        let err = client.write(&[metric("a", None)]).await.unwrap_err();
        assert!(matches!(err, WriteError::Transport(_)));
        assert_eq!(client.retry_state().retry_count, 0);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let client = DeliveryClient::new(ClientConfig::default()).unwrap();
        assert!(!client.is_closed());
        client.close();
        client.close();
        assert!(client.is_closed());

        let err = client.write(&[metric("a", None)]).await.unwrap_err();
        assert!(matches!(err, WriteError::Closed));
    }
}
