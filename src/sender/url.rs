use super::error::ConfigError;
use std::path::{Path, PathBuf};
use url::Url;

const WRITE_PATH: &str = "/api/v2/write";
const ORGS_PATH: &str = "/api/v2/orgs";
const BUCKETS_PATH: &str = "/api/v2/buckets";
const SOCKET_ORIGIN: &str = "http://127.0.0.1";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Http,
    Https,
    Unix,
}

/// A validated base endpoint.
///
/// Construction rejects every scheme except `http`, `https` and `unix`, so the
/// URL builders below cannot fail.
#[derive(Debug, Clone)]
pub struct Endpoint {
    base: Url,
    /// Where API paths are joined: `base` itself, or the loopback origin for sockets.
    api_base: Url,
    scheme: Scheme,
}

impl Endpoint {
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        if raw.trim().is_empty() {
            return Err(ConfigError::MissingUrl);
        }
        let base = Url::parse(raw).map_err(|source| ConfigError::InvalidUrl {
            url: raw.to_string(),
            source,
        })?;
        Self::from_url(base)
    }

    pub fn from_url(base: Url) -> Result<Self, ConfigError> {
        let scheme = match base.scheme() {
            "http" => Scheme::Http,
            "https" => Scheme::Https,
            "unix" => Scheme::Unix,
            other => return Err(ConfigError::UnsupportedScheme(other.to_string())),
        };

        let api_base = match scheme {
            Scheme::Unix => {
                if base.path().is_empty() || base.path() == "/" {
                    return Err(ConfigError::MissingSocketPath(base.to_string()));
                }
                // The socket carries the traffic; the URL only has to be valid HTTP.
                Url::parse(SOCKET_ORIGIN).map_err(|source| ConfigError::InvalidUrl {
                    url: SOCKET_ORIGIN.to_string(),
                    source,
                })?
            }
            Scheme::Http | Scheme::Https => base.clone(),
        };

        Ok(Self {
            base,
            api_base,
            scheme,
        })
    }

    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    /// The URL as configured.
    pub fn as_url(&self) -> &Url {
        &self.base
    }

    /// Filesystem path of the socket for `unix://` endpoints.
    pub fn socket_path(&self) -> Option<PathBuf> {
        match self.scheme {
            Scheme::Unix => Some(Path::new(self.base.path()).to_path_buf()),
            Scheme::Http | Scheme::Https => None,
        }
    }

    pub fn write_url(&self, org: &str, bucket: &str) -> Url {
        let mut url = self.api_url(WRITE_PATH);
        url.query_pairs_mut()
            .append_pair("bucket", bucket)
            .append_pair("org", org);
        url
    }

    pub fn org_lookup_url(&self, org: &str) -> Url {
        let mut url = self.api_url(ORGS_PATH);
        url.query_pairs_mut()
            .append_pair("limit", "1")
            .append_pair("org", org);
        url
    }

    pub fn bucket_create_url(&self) -> Url {
        self.api_url(BUCKETS_PATH)
    }

    fn api_url(&self, sub_path: &str) -> Url {
        let mut url = self.api_base.clone();
        let prefix = url.path().trim_end_matches('/').to_string();
        url.set_path(&format!("{prefix}{sub_path}"));
        url.set_query(None);
        url.set_fragment(None);
        url
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn query(url: &Url) -> HashMap<String, String> {
        url.query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect()
    }

    #[test]
    fn test_write_url_keeps_path_prefix() {
        let endpoint = Endpoint::parse("https://host/prefix").unwrap();
        let url = endpoint.write_url("o", "b");

        assert_eq!(url.scheme(), "https");
        assert_eq!(url.host_str(), Some("host"));
        assert_eq!(url.path(), "/prefix/api/v2/write");
        let q = query(&url);
        assert_eq!(q.get("bucket").map(String::as_str), Some("b"));
        assert_eq!(q.get("org").map(String::as_str), Some("o"));
    }

    #[test]
    fn test_write_url_without_path() {
        let endpoint = Endpoint::parse("http://localhost:8086").unwrap();
        assert_eq!(
            endpoint.write_url("my org", "b").as_str(),
            "http://localhost:8086/api/v2/write?bucket=b&org=my+org"
        );
    }

    #[test]
    fn test_trailing_slash_does_not_double() {
        let endpoint = Endpoint::parse("http://localhost:8086/influx/").unwrap();
        assert_eq!(endpoint.bucket_create_url().path(), "/influx/api/v2/buckets");
    }

    #[test]
    fn test_query_values_are_encoded() {
        let endpoint = Endpoint::parse("http://localhost:8086").unwrap();
        let url = endpoint.write_url("a&b", "x=y/z");

        assert!(!url.query().unwrap().contains("a&b"));
        let q = query(&url);
        assert_eq!(q.get("org").map(String::as_str), Some("a&b"));
        assert_eq!(q.get("bucket").map(String::as_str), Some("x=y/z"));
    }

    #[test]
    fn test_org_lookup_url() {
        let endpoint = Endpoint::parse("https://host/prefix").unwrap();
        let url = endpoint.org_lookup_url("acme");

        assert_eq!(url.path(), "/prefix/api/v2/orgs");
        let q = query(&url);
        assert_eq!(q.get("org").map(String::as_str), Some("acme"));
        assert_eq!(q.get("limit").map(String::as_str), Some("1"));
    }

    #[test]
    fn test_bucket_create_url_has_no_query() {
        let endpoint = Endpoint::parse("https://host/prefix?x=1").unwrap();
        let url = endpoint.bucket_create_url();
        assert_eq!(url.as_str(), "https://host/prefix/api/v2/buckets");
    }

    #[test]
    fn test_unix_socket_rewrites_to_loopback() {
        let endpoint = Endpoint::parse("unix:///var/run/influxdb/influxdb.sock").unwrap();

        let url = endpoint.write_url("o", "b");
        assert_eq!(url.scheme(), "http");
        assert_eq!(url.host_str(), Some("127.0.0.1"));
        assert_eq!(url.path(), "/api/v2/write");
        assert_eq!(
            endpoint.org_lookup_url("o").path(),
            "/api/v2/orgs"
        );
        assert_eq!(
            endpoint.bucket_create_url().as_str(),
            "http://127.0.0.1/api/v2/buckets"
        );
        assert_eq!(
            endpoint.socket_path(),
            Some(PathBuf::from("/var/run/influxdb/influxdb.sock"))
        );
    }

    #[test]
    fn test_unsupported_scheme_is_rejected() {
        let err = Endpoint::parse("udp://localhost:8089").unwrap_err();
        assert!(matches!(err, ConfigError::UnsupportedScheme(ref s) if s == "udp"));
    }

    #[test]
    fn test_missing_url() {
        assert!(matches!(Endpoint::parse(""), Err(ConfigError::MissingUrl)));
        assert!(matches!(
            Endpoint::parse("not a url"),
            Err(ConfigError::InvalidUrl { .. })
        ));
    }

    #[test]
    fn test_unix_without_path() {
        assert!(matches!(
            Endpoint::parse("unix://"),
            Err(ConfigError::MissingSocketPath(_))
        ));
    }
}
