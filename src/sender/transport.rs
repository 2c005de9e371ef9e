use super::error::{ConfigError, TransportError};
use super::url::{Endpoint, Scheme};
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper_util::rt::TokioIo;
use reqwest::header::{HOST, HeaderMap, HeaderValue};
use reqwest::{Certificate, Identity, Method, StatusCode};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::net::UnixStream;
use tokio::time::timeout;
use tracing::debug;
use url::Url;

/// Optional TLS material for `https` endpoints.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsConfig {
    /// PEM bundle of additional trusted roots.
    pub ca_file: Option<PathBuf>,
    /// PEM client certificate; requires `key_file`.
    pub cert_file: Option<PathBuf>,
    pub key_file: Option<PathBuf>,
    #[serde(default)]
    pub insecure_skip_verify: bool,
}

#[derive(Debug, Clone)]
pub struct TransportSettings {
    pub timeout: Duration,
    pub proxy: Option<Url>,
    pub tls: Option<TlsConfig>,
}

#[derive(Debug, Clone)]
pub struct OutgoingRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Bytes,
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// The wire under the delivery client: pooled TCP/TLS via reqwest, or one
/// HTTP/1.1 connection per request over a unix domain socket.
#[derive(Debug, Clone)]
pub enum Transport {
    Http(reqwest::Client),
    Unix(UnixSocketTransport),
}

impl Transport {
    pub fn build(endpoint: &Endpoint, settings: &TransportSettings) -> Result<Self, ConfigError> {
        match endpoint.scheme() {
            Scheme::Http | Scheme::Https => Ok(Transport::Http(build_http_client(settings)?)),
            Scheme::Unix => {
                let path = endpoint
                    .socket_path()
                    .ok_or_else(|| ConfigError::MissingSocketPath(endpoint.as_url().to_string()))?;
                Ok(Transport::Unix(UnixSocketTransport {
                    path,
                    timeout: settings.timeout,
                }))
            }
        }
    }

    pub async fn send(&self, request: OutgoingRequest) -> Result<HttpResponse, TransportError> {
        match self {
            Transport::Http(client) => send_reqwest(client, request).await,
            Transport::Unix(socket) => socket.send(request).await,
        }
    }
}

fn read_file(path: &Path) -> Result<Vec<u8>, ConfigError> {
    std::fs::read(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn build_http_client(settings: &TransportSettings) -> Result<reqwest::Client, ConfigError> {
    let mut builder = reqwest::Client::builder().timeout(settings.timeout);

    // Without an explicit proxy reqwest honours HTTP_PROXY/HTTPS_PROXY/NO_PROXY.
    if let Some(proxy_url) = &settings.proxy {
        let proxy =
            reqwest::Proxy::all(proxy_url.as_str()).map_err(|source| ConfigError::InvalidProxy {
                url: proxy_url.to_string(),
                source,
            })?;
        builder = builder.proxy(proxy);
    }

    if let Some(tls) = &settings.tls {
        if let Some(ca_file) = &tls.ca_file {
            let pem = read_file(ca_file)?;
            for cert in Certificate::from_pem_bundle(&pem).map_err(ConfigError::Tls)? {
                builder = builder.add_root_certificate(cert);
            }
        }

        if let (Some(cert_file), Some(key_file)) = (&tls.cert_file, &tls.key_file) {
            let mut pem = read_file(cert_file)?;
            pem.push(b'\n');
            pem.extend(read_file(key_file)?);
            builder = builder.identity(Identity::from_pem(&pem).map_err(ConfigError::Tls)?);
        }

        if tls.insecure_skip_verify {
            builder = builder.danger_accept_invalid_certs(true);
        }
    }

    builder.build().map_err(ConfigError::ClientBuild)
}

async fn send_reqwest(
    client: &reqwest::Client,
    request: OutgoingRequest,
) -> Result<HttpResponse, TransportError> {
    let url = request.url.to_string();
    let to_error = |source: reqwest::Error| TransportError::Request {
        url: url.clone(),
        source,
    };

    let response = client
        .request(request.method, request.url)
        .headers(request.headers)
        .body(request.body)
        .send()
        .await
        .map_err(to_error)?;

    let status = response.status();
    let headers = response.headers().clone();
    let body = response.bytes().await.map_err(to_error)?;

    Ok(HttpResponse {
        status,
        headers,
        body,
    })
}

#[derive(Debug, Clone)]
pub struct UnixSocketTransport {
    path: PathBuf,
    timeout: Duration,
}

impl UnixSocketTransport {
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn send(&self, request: OutgoingRequest) -> Result<HttpResponse, TransportError> {
        let url = request.url.to_string();
        timeout(self.timeout, self.exchange(request))
            .await
            .map_err(|_| TransportError::Timeout {
                url,
                timeout: self.timeout,
            })?
    }

    async fn exchange(&self, request: OutgoingRequest) -> Result<HttpResponse, TransportError> {
        let stream =
            UnixStream::connect(&self.path)
                .await
                .map_err(|source| TransportError::SocketConnect {
                    path: self.path.clone(),
                    source,
                })?;

        let (mut sender, connection) =
            hyper::client::conn::http1::handshake(TokioIo::new(stream)).await?;
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                debug!("unix socket connection closed with error: {}", e);
            }
        });

        let target = match request.url.query() {
            Some(query) => format!("{}?{}", request.url.path(), query),
            None => request.url.path().to_string(),
        };
        let uri = target
            .parse::<hyper::Uri>()
            .map_err(|e| TransportError::InvalidRequest {
                url: request.url.to_string(),
                reason: e.to_string(),
            })?;

        let mut outgoing = hyper::Request::new(Full::new(request.body));
        *outgoing.method_mut() = request.method;
        *outgoing.uri_mut() = uri;
        *outgoing.headers_mut() = request.headers;
        if let Some(host) = request.url.host_str() {
            let host = HeaderValue::from_str(host).map_err(|e| TransportError::InvalidRequest {
                url: request.url.to_string(),
                reason: e.to_string(),
            })?;
            outgoing.headers_mut().insert(HOST, host);
        }

        let response = sender.send_request(outgoing).await?;
        let (parts, body) = response.into_parts();
        let body = body.collect().await?.to_bytes();

        Ok(HttpResponse {
            status: parts.status,
            headers: parts.headers,
            body,
        })
    }
}
