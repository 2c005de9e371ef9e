//! HTTP delivery to the v2 write API.
//!
//! [`DeliveryClient`] is the entry point; the submodules hold the URL builder,
//! response classifier, bucket manager and wire plumbing it is made of.

mod api;
pub mod buckets;
pub mod client;
pub mod error;
pub mod response;
pub mod serialization;
pub mod transport;
pub mod url;

pub use buckets::BucketManager;
pub use client::{BucketBatch, ClientConfig, DEFAULT_REQUEST_TIMEOUT, DeliveryClient, partition_by_bucket};
pub use error::{
    ApiError, BucketError, BucketNotFoundError, ConfigError, TransportError, WriteError,
};
pub use response::{ErrorBody, Outcome, classify};
pub use serialization::{
    BatchSerializer, ContentEncoding, LineProtocolSerializer, MetricSerializer, Payload,
    SerializationError,
};
pub use transport::TlsConfig;
pub use url::{Endpoint, Scheme};
