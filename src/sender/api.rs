use super::error::{ConfigError, TransportError};
use super::serialization::Payload;
use super::transport::{HttpResponse, OutgoingRequest, Transport, TransportSettings};
use super::url::Endpoint;
use crate::reliability::ConnectionHealth;
use bytes::Bytes;
use reqwest::Method;
use reqwest::header::{
    ACCEPT, AUTHORIZATION, CONTENT_ENCODING, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue,
    USER_AGENT,
};
use std::collections::HashMap;
use std::sync::Arc;
use url::Url;

const WRITE_CONTENT_TYPE: &str = "text/plain; charset=utf-8";
const JSON_CONTENT_TYPE: &str = "application/json";

/// Everything needed to put one request on the wire: endpoint, transport,
/// default headers and the connection-health hook.
pub(crate) struct ApiClient {
    endpoint: Endpoint,
    transport: Transport,
    headers: HeaderMap,
    health: Arc<dyn ConnectionHealth>,
}

pub(crate) fn build_default_headers(
    token: &str,
    user_agent: &str,
    extra: &HashMap<String, String>,
) -> Result<HeaderMap, ConfigError> {
    let mut headers = HeaderMap::with_capacity(extra.len() + 2);

    let invalid = |name: &str, reason: String| ConfigError::InvalidHeader {
        name: name.to_string(),
        reason,
    };

    headers.insert(
        USER_AGENT,
        HeaderValue::from_str(user_agent).map_err(|e| invalid("User-Agent", e.to_string()))?,
    );
    let mut auth = HeaderValue::from_str(&format!("Token {token}"))
        .map_err(|e| invalid("Authorization", e.to_string()))?;
    auth.set_sensitive(true);
    headers.insert(AUTHORIZATION, auth);

    // Configured headers win over the defaults above.
    for (name, value) in extra {
        let header_name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| invalid(name, e.to_string()))?;
        let header_value =
            HeaderValue::from_str(value).map_err(|e| invalid(name, e.to_string()))?;
        headers.insert(header_name, header_value);
    }

    Ok(headers)
}

impl ApiClient {
    pub(crate) fn new(
        endpoint: Endpoint,
        settings: &TransportSettings,
        headers: HeaderMap,
        health: Arc<dyn ConnectionHealth>,
    ) -> Result<Self, ConfigError> {
        let transport = Transport::build(&endpoint, settings)?;
        Ok(Self {
            endpoint,
            transport,
            headers,
            health,
        })
    }

    pub(crate) fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Control-plane request (org lookup, bucket creation).
    pub(crate) fn api_request(&self, method: Method, url: Url, body: Option<Vec<u8>>) -> OutgoingRequest {
        let mut headers = self.headers.clone();
        headers.insert(ACCEPT, HeaderValue::from_static(JSON_CONTENT_TYPE));
        if body.is_some() {
            headers.insert(CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE));
        }

        OutgoingRequest {
            method,
            url,
            headers,
            body: body.map(Bytes::from).unwrap_or_default(),
        }
    }

    pub(crate) fn write_request(&self, url: Url, payload: Payload) -> OutgoingRequest {
        let mut headers = self.headers.clone();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(WRITE_CONTENT_TYPE));
        if let Some(encoding) = payload.encoding.header_value() {
            headers.insert(CONTENT_ENCODING, HeaderValue::from_static(encoding));
        }

        OutgoingRequest {
            method: Method::POST,
            url,
            headers,
            body: Bytes::from(payload.body),
        }
    }

    /// Send a request, reporting raw transport failures to the health hook.
    pub(crate) async fn execute(
        &self,
        request: OutgoingRequest,
    ) -> Result<HttpResponse, TransportError> {
        let url = request.url.to_string();
        match self.transport.send(request).await {
            Ok(response) => {
                self.health.on_client_success(&url);
                Ok(response)
            }
            Err(e) => {
                self.health.on_client_error(&url, &e);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_headers() {
        let headers = build_default_headers("secret", "agent/1.0", &HashMap::new()).unwrap();
        assert_eq!(headers.get(AUTHORIZATION).unwrap(), "Token secret");
        assert_eq!(headers.get(USER_AGENT).unwrap(), "agent/1.0");
        assert!(headers.get(AUTHORIZATION).unwrap().is_sensitive());
    }

    #[test]
    fn test_configured_headers_override_defaults() {
        let extra = HashMap::from([
            ("User-Agent".to_string(), "custom".to_string()),
            ("X-Team".to_string(), "infra".to_string()),
        ]);
        let headers = build_default_headers("t", "agent/1.0", &extra).unwrap();
        assert_eq!(headers.get(USER_AGENT).unwrap(), "custom");
        assert_eq!(headers.get("x-team").unwrap(), "infra");
    }

    #[test]
    fn test_invalid_header_name() {
        let extra = HashMap::from([("bad header".to_string(), "v".to_string())]);
        let err = build_default_headers("t", "a", &extra).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidHeader { ref name, .. } if name == "bad header"));
    }
}
