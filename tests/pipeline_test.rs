use rask_metrics_forwarder::app::{BatchSettings, MetricPipeline, PipelineStats};
use rask_metrics_forwarder::sender::{ClientConfig, DeliveryClient};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{method, path},
};

fn client_for(server: &MockServer) -> Arc<DeliveryClient> {
    Arc::new(
        DeliveryClient::new(ClientConfig {
            url: server.uri(),
            token: "secret".to_string(),
            organization: "acme".to_string(),
            bucket: "telegraf".to_string(),
            skip_bucket_creation: true,
            ..ClientConfig::default()
        })
        .unwrap(),
    )
}

fn settings(batch_size: usize, buffer_limit: usize) -> BatchSettings {
    BatchSettings {
        batch_size,
        flush_interval: Duration::from_secs(60),
        buffer_limit,
    }
}

fn ndjson(count: usize) -> String {
    (0..count)
        .map(|i| {
            format!(
                r#"{{"name":"cpu","tags":{{"host":"web-{i}"}},"fields":{{"usage":{i}}},"timestamp":"2023-11-14T22:13:20Z"}}"#
            ) + "\n"
        })
        .collect()
}

#[tokio::test]
async fn test_pipeline_batches_and_flushes_on_eof() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v2/write"))
        .respond_with(ResponseTemplate::new(204))
        .expect(3)
        .mount(&server)
        .await;

    let input = ndjson(5);
    let stats = MetricPipeline::new(client_for(&server), settings(2, 10))
        .run(input.as_bytes(), CancellationToken::new())
        .await;

    assert_eq!(
        stats,
        PipelineStats {
            received: 5,
            written: 5,
            dropped: 0,
            rejected_lines: 0,
        }
    );

    let requests = server.received_requests().await.unwrap();
    let sizes: Vec<usize> = requests
        .iter()
        .map(|r| String::from_utf8_lossy(&r.body).lines().count())
        .collect();
    assert_eq!(sizes, [2, 2, 1]);
}

#[tokio::test]
async fn test_pipeline_skips_malformed_lines() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v2/write"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let metrics = ndjson(2);
    let reader = tokio_test::io::Builder::new()
        .read(b"not json\n")
        .read(b"\n")
        .read(metrics.as_bytes())
        .read(b"{\"fields\":1}\n")
        .build();
    let stats = MetricPipeline::new(client_for(&server), settings(10, 10))
        .run(tokio::io::BufReader::new(reader), CancellationToken::new())
        .await;

    assert_eq!(stats.received, 2);
    assert_eq!(stats.written, 2);
    assert_eq!(stats.rejected_lines, 2);
}

#[tokio::test]
async fn test_pipeline_drops_after_unauthorized() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v2/write"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;

    let input = ndjson(3);
    let stats = MetricPipeline::new(client_for(&server), settings(10, 10))
        .run(input.as_bytes(), CancellationToken::new())
        .await;

    assert_eq!(stats.written, 0);
    assert_eq!(stats.dropped, 3);
}

#[tokio::test]
async fn test_pipeline_keeps_retryable_batch_within_buffer_limit() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v2/write"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    // The first full batch fails and waits for the next tick; the limit drops
    // the oldest metrics in the meantime.
    let input = ndjson(6);
    let stats = MetricPipeline::new(client_for(&server), settings(2, 4))
        .with_shutdown_grace(Duration::from_millis(200))
        .run(input.as_bytes(), CancellationToken::new())
        .await;

    assert_eq!(stats.received, 6);
    assert_eq!(stats.written, 0);
    assert_eq!(stats.dropped, 6);

    // The final flush re-offers the oldest retained metrics first.
    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 2);
    let first = String::from_utf8_lossy(&requests[0].body).to_string();
    let second = String::from_utf8_lossy(&requests[1].body).to_string();
    assert!(first.contains("host=web-0"));
    assert!(second.contains("host=web-2"));
    assert!(!second.contains("host=web-0"));
}

#[tokio::test]
async fn test_pipeline_waits_for_tick_after_failed_write() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v2/write"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let input = ndjson(50);
    let stats = MetricPipeline::new(client_for(&server), settings(2, 100))
        .with_shutdown_grace(Duration::from_millis(200))
        .run(input.as_bytes(), CancellationToken::new())
        .await;

    assert_eq!(stats.received, 50);
    assert_eq!(stats.written, 0);
    assert_eq!(stats.dropped, 50);

    // One write when the first batch fills, one at shutdown.
    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 2);
}

#[tokio::test]
async fn test_pipeline_retries_on_tick_after_failed_write() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v2/write"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v2/write"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    let (mut writer, reader) = tokio::io::duplex(4096);
    tokio::io::AsyncWriteExt::write_all(&mut writer, ndjson(2).as_bytes())
        .await
        .unwrap();

    let cancel = CancellationToken::new();
    let pipeline = MetricPipeline::new(
        client_for(&server),
        BatchSettings {
            batch_size: 2,
            flush_interval: Duration::from_millis(200),
            buffer_limit: 10,
        },
    );
    let handle = tokio::spawn(pipeline.run(tokio::io::BufReader::new(reader), cancel.clone()));

    tokio::time::sleep(Duration::from_millis(500)).await;
    cancel.cancel();

    let stats = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stats.written, 2);
    assert_eq!(stats.dropped, 0);
    assert_eq!(server.received_requests().await.unwrap().len(), 2);
    drop(writer);
}

#[tokio::test]
async fn test_pipeline_stops_on_cancel() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v2/write"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    // A reader that delivers one line and then never completes.
    let (mut writer, reader) = tokio::io::duplex(4096);
    tokio::io::AsyncWriteExt::write_all(&mut writer, ndjson(1).as_bytes())
        .await
        .unwrap();

    let cancel = CancellationToken::new();
    let pipeline = MetricPipeline::new(client_for(&server), settings(10, 10));
    let handle = tokio::spawn(pipeline.run(tokio::io::BufReader::new(reader), cancel.clone()));

    tokio::time::sleep(Duration::from_millis(100)).await;
    cancel.cancel();

    let stats = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stats.received, 1);
    assert_eq!(stats.written, 1);
    drop(writer);
}
