use super::api::ApiClient;
use super::error::{ApiError, BucketError};
use super::response::{describe_error, status_line};
use parking_lot::Mutex;
use reqwest::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Response body of the `/api/v2/orgs` endpoint.
#[derive(Debug, Deserialize)]
struct OrgLookupResponse {
    #[serde(default)]
    orgs: Vec<OrgInfo>,
}

#[derive(Debug, Deserialize)]
struct OrgInfo {
    id: String,
}

/// Payload for creating a bucket.
#[derive(Debug, Serialize)]
struct CreateBucketRequest<'a> {
    name: &'a str,
    #[serde(rename = "orgID")]
    org_id: &'a str,
}

/// Creates buckets on demand and remembers which ones this client already made.
#[derive(Debug)]
pub struct BucketManager {
    organization: String,
    skip_creation: bool,
    retry_interval: Duration,
    created: Mutex<HashSet<String>>,
    last_failure: Mutex<HashMap<String, Instant>>,
}

impl BucketManager {
    pub fn new(organization: impl Into<String>, skip_creation: bool) -> Self {
        Self {
            organization: organization.into(),
            skip_creation,
            retry_interval: Duration::ZERO,
            created: Mutex::new(HashSet::new()),
            last_failure: Mutex::new(HashMap::new()),
        }
    }

    /// Hold off re-attempting a failed creation for `interval`.
    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    pub fn organization(&self) -> &str {
        &self.organization
    }

    pub fn is_created(&self, bucket: &str) -> bool {
        self.created.lock().contains(bucket)
    }

    /// Whether `ensure_bucket` would issue any request for this bucket.
    pub fn needs_creation(&self, bucket: &str) -> bool {
        if self.skip_creation || self.is_created(bucket) {
            return false;
        }
        match self.last_failure.lock().get(bucket) {
            Some(failed_at) => failed_at.elapsed() >= self.retry_interval,
            None => true,
        }
    }

    pub(crate) async fn ensure_bucket(
        &self,
        api: &ApiClient,
        bucket: &str,
    ) -> Result<(), BucketError> {
        if !self.needs_creation(bucket) {
            return Ok(());
        }

        let result = self.create_bucket(api, bucket).await;
        let mut last_failure = self.last_failure.lock();
        match &result {
            Ok(()) => {
                last_failure.remove(bucket);
            }
            Err(_) => {
                last_failure.insert(bucket.to_string(), Instant::now());
            }
        }
        result
    }

    pub(crate) async fn resolve_organization_id(
        &self,
        api: &ApiClient,
    ) -> Result<String, BucketError> {
        let url = api.endpoint().org_lookup_url(&self.organization);
        let request = api.api_request(Method::GET, url, None);
        let response = api.execute(request).await?;

        if !response.body.is_empty()
            && serde_json::from_slice::<serde::de::IgnoredAny>(&response.body).is_err()
        {
            return Err(ApiError {
                status_code: response.status.as_u16(),
                title: status_line(response.status),
                description: Some(format!(
                    "An error response was received while attempting to get the organization's ID for: {}. Error: {}",
                    self.organization,
                    String::from_utf8_lossy(&response.body)
                )),
            }
            .into());
        }

        let decoded: OrgLookupResponse = serde_json::from_slice(&response.body)?;

        match decoded.orgs.as_slice() {
            [org] if response.status == StatusCode::OK => Ok(org.id.clone()),
            _ => Err(BucketError::OrganizationNotFound {
                org: self.organization.clone(),
            }),
        }
    }

    pub(crate) async fn create_bucket(
        &self,
        api: &ApiClient,
        bucket: &str,
    ) -> Result<(), BucketError> {
        let org_id = self.resolve_organization_id(api).await?;
        debug!(bucket, org_id = %org_id, "creating bucket");

        let body = serde_json::to_vec(&CreateBucketRequest {
            name: bucket,
            org_id: &org_id,
        })?;
        let url = api.endpoint().bucket_create_url();
        let request = api.api_request(Method::POST, url, Some(body));
        let response = api.execute(request).await?;

        if response.status == StatusCode::CREATED {
            self.created.lock().insert(bucket.to_string());
            info!(bucket, "created bucket");
            return Ok(());
        }

        Err(ApiError {
            status_code: response.status.as_u16(),
            title: status_line(response.status),
            description: Some(describe_error(response.status, &response.body)),
        }
        .into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_needs_creation() {
        let manager = BucketManager::new("org", false);
        assert!(manager.needs_creation("b"));
        manager.created.lock().insert("b".to_string());
        assert!(!manager.needs_creation("b"));
        assert!(manager.is_created("b"));

        let skipping = BucketManager::new("org", true);
        assert!(!skipping.needs_creation("b"));
    }

    #[test]
    fn test_failed_creation_waits_for_retry_interval() {
        let manager = BucketManager::new("org", false).with_retry_interval(Duration::from_secs(60));
        manager
            .last_failure
            .lock()
            .insert("b".to_string(), Instant::now());
        assert!(!manager.needs_creation("b"));
        assert!(manager.needs_creation("other"));

        // Zero interval: every write tries again.
        let eager = BucketManager::new("org", false);
        eager.last_failure.lock().insert("b".to_string(), Instant::now());
        assert!(eager.needs_creation("b"));
    }

    #[test]
    fn test_create_payload_shape() {
        let body = serde_json::to_value(CreateBucketRequest {
            name: "metrics",
            org_id: "0123",
        })
        .unwrap();
        assert_eq!(body, serde_json::json!({"name": "metrics", "orgID": "0123"}));
    }

    #[test]
    fn test_org_lookup_decoding() {
        let decoded: OrgLookupResponse =
            serde_json::from_str(r#"{"orgs":[{"id":"abc","name":"acme"}]}"#).unwrap();
        assert_eq!(decoded.orgs.len(), 1);
        assert_eq!(decoded.orgs[0].id, "abc");
    }
}
