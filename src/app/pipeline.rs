use super::config::BatchSettings;
use super::shutdown::SHUTDOWN_GRACE;
use crate::domain::Metric;
use crate::sender::{DeliveryClient, WriteError};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Counters reported when the pipeline stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub received: u64,
    /// Metrics handed to a successful `write` (including ones the server rejected
    /// as malformed and the client dropped).
    pub written: u64,
    pub dropped: u64,
    pub rejected_lines: u64,
}

/// Reads newline-delimited JSON metrics, batches them and feeds the delivery
/// client. A batch that failed with a retryable error is re-offered on the next
/// interval tick; a full batch does not trigger another write before then.
pub struct MetricPipeline {
    client: Arc<DeliveryClient>,
    settings: BatchSettings,
    shutdown_grace: Duration,
    pending: Vec<Metric>,
    retry_pending: bool,
    stats: PipelineStats,
}

impl MetricPipeline {
    pub fn new(client: Arc<DeliveryClient>, settings: BatchSettings) -> Self {
        Self {
            client,
            settings,
            shutdown_grace: SHUTDOWN_GRACE,
            pending: Vec::with_capacity(settings.batch_size),
            retry_pending: false,
            stats: PipelineStats::default(),
        }
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub async fn run<R>(mut self, input: R, cancel: CancellationToken) -> PipelineStats
    where
        R: AsyncBufRead + Unpin,
    {
        info!(
            "Starting metric pipeline (batch_size={}, flush_interval={:?}, buffer_limit={})",
            self.settings.batch_size, self.settings.flush_interval, self.settings.buffer_limit
        );

        let mut lines = input.lines();
        let mut ticker = tokio::time::interval(self.settings.flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                biased;

                () = cancel.cancelled() => {
                    info!("Shutdown requested, stopping metric pipeline");
                    break;
                }

                line = lines.next_line() => match line {
                    Ok(Some(line)) => {
                        self.accept_line(&line);
                        if !self.retry_pending && self.pending.len() >= self.settings.batch_size {
                            self.flush(&cancel).await;
                        }
                    }
                    Ok(None) => {
                        info!("Input closed, stopping metric pipeline");
                        break;
                    }
                    Err(e) => {
                        error!("Failed to read input: {}", e);
                        break;
                    }
                },

                _ = ticker.tick() => {
                    self.retry_pending = false;
                    self.flush(&cancel).await;
                }
            }
        }

        self.final_flush().await;
        info!(
            received = self.stats.received,
            written = self.stats.written,
            dropped = self.stats.dropped,
            rejected_lines = self.stats.rejected_lines,
            "Metric pipeline stopped"
        );
        self.stats
    }

    fn accept_line(&mut self, line: &str) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }

        match serde_json::from_str::<Metric>(line) {
            Ok(metric) => {
                self.stats.received += 1;
                self.pending.push(metric);
                self.enforce_limit();
            }
            Err(e) => {
                self.stats.rejected_lines += 1;
                warn!("Skipping malformed metric line: {}", e);
            }
        }
    }

    /// Drop the oldest metrics beyond `buffer_limit`.
    fn enforce_limit(&mut self) {
        let excess = self.pending.len().saturating_sub(self.settings.buffer_limit);
        if excess > 0 {
            self.pending.drain(..excess);
            self.stats.dropped += excess as u64;
            warn!(dropped = excess, "Retry buffer full, dropping oldest metrics");
        }
    }

    async fn flush(&mut self, cancel: &CancellationToken) {
        while !self.pending.is_empty() {
            let take = self.pending.len().min(self.settings.batch_size);

            match self
                .client
                .write_with_cancel(cancel, &self.pending[..take])
                .await
            {
                Ok(()) => {
                    self.pending.drain(..take);
                    self.stats.written += take as u64;
                }
                Err(e @ WriteError::RetryWindowActive { .. }) => {
                    debug!("Holding {} metrics: {}", self.pending.len(), e);
                    self.retry_pending = true;
                    return;
                }
                Err(e) if e.is_retryable() => {
                    warn!(
                        url = %self.client.url(),
                        "Write failed, keeping {} metrics for the next flush: {}",
                        self.pending.len(),
                        e
                    );
                    self.retry_pending = true;
                    return;
                }
                Err(e) => {
                    error!(
                        url = %self.client.url(),
                        "Write failed, dropping {} metrics: {}",
                        take,
                        e
                    );
                    self.pending.drain(..take);
                    self.stats.dropped += take as u64;
                }
            }
        }
    }

    async fn final_flush(&mut self) {
        if self.pending.is_empty() {
            return;
        }

        let grace = CancellationToken::new();
        let timer = {
            let grace = grace.clone();
            let limit = self.shutdown_grace;
            tokio::spawn(async move {
                tokio::time::sleep(limit).await;
                grace.cancel();
            })
        };

        self.flush(&grace).await;
        timer.abort();

        if !self.pending.is_empty() {
            let lost = self.pending.len();
            self.pending.clear();
            self.stats.dropped += lost as u64;
            warn!(dropped = lost, "Undelivered metrics discarded at shutdown");
        }
    }
}
