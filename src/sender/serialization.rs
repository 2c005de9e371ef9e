use crate::domain::{FieldValue, Metric};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::io::Write;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

// Rough per-point size used to pre-size the output buffer
const ESTIMATED_LINE_SIZE: usize = 128;
const MAX_PREALLOC: usize = 16 * 1024 * 1024; // 16MB

#[derive(Error, Debug)]
pub enum SerializationError {
    #[error("IO error during serialization: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Formatting error during serialization: {0}")]
    FmtError(#[from] std::fmt::Error),
}

/// Payload encoding applied after serialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentEncoding {
    #[default]
    Identity,
    Gzip,
}

impl ContentEncoding {
    pub fn header_value(self) -> Option<&'static str> {
        match self {
            ContentEncoding::Identity => None,
            ContentEncoding::Gzip => Some("gzip"),
        }
    }
}

impl FromStr for ContentEncoding {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "" | "identity" => Ok(ContentEncoding::Identity),
            "gzip" => Ok(ContentEncoding::Gzip),
            other => Err(other.to_string()),
        }
    }
}

/// Turns one metric into its wire representation.
///
/// Implementations append to `out` and return `false` when the metric has
/// nothing serializable and was skipped.
pub trait MetricSerializer: Send + Sync {
    fn serialize_metric(&self, metric: &Metric, out: &mut String)
    -> Result<bool, SerializationError>;
}

/// InfluxDB line protocol, one point per line, nanosecond timestamps.
#[derive(Debug, Clone, Copy, Default)]
pub struct LineProtocolSerializer;

impl LineProtocolSerializer {
    pub fn new() -> Self {
        Self
    }
}

fn escape_into(out: &mut String, raw: &str, escape_equals: bool) {
    for c in raw.chars() {
        match c {
            ',' | ' ' => {
                out.push('\\');
                out.push(c);
            }
            '=' if escape_equals => out.push_str("\\="),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{0c}' => out.push_str("\\f"),
            _ => out.push(c),
        }
    }
}

fn escape_string_field(out: &mut String, raw: &str) {
    out.push('"');
    for c in raw.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
}

impl MetricSerializer for LineProtocolSerializer {
    fn serialize_metric(
        &self,
        metric: &Metric,
        out: &mut String,
    ) -> Result<bool, SerializationError> {
        let Some(nanos) = metric.timestamp.timestamp_nanos_opt() else {
            tracing::debug!(metric = %metric.name, "skipping metric with out-of-range timestamp");
            return Ok(false);
        };

        let start = out.len();
        escape_into(out, &metric.name, false);

        for (key, value) in &metric.tags {
            if key.is_empty() || value.is_empty() {
                continue;
            }
            out.push(',');
            escape_into(out, key, true);
            out.push('=');
            escape_into(out, value, true);
        }

        let mut separator = ' ';
        let mut fields_written = 0usize;
        for (key, value) in &metric.fields {
            if key.is_empty() {
                continue;
            }
            if let FieldValue::Float(f) = value
                && !f.is_finite()
            {
                continue;
            }

            out.push(separator);
            separator = ',';
            escape_into(out, key, true);
            out.push('=');
            match value {
                FieldValue::Float(f) => write!(out, "{f}")?,
                FieldValue::Integer(i) => write!(out, "{i}i")?,
                FieldValue::UInteger(u) => write!(out, "{u}u")?,
                FieldValue::Boolean(b) => out.push_str(if *b { "true" } else { "false" }),
                FieldValue::String(s) => escape_string_field(out, s),
            }
            fields_written += 1;
        }

        if fields_written == 0 {
            out.truncate(start);
            return Ok(false);
        }

        write!(out, " {nanos}")?;
        out.push('\n');
        Ok(true)
    }
}

/// Serializes a batch and applies the configured content encoding.
#[derive(Clone)]
pub struct BatchSerializer {
    serializer: Arc<dyn MetricSerializer>,
    encoding: ContentEncoding,
}

/// An encoded request body.
#[derive(Debug, Clone)]
pub struct Payload {
    pub body: Vec<u8>,
    pub metric_count: usize,
    pub encoding: ContentEncoding,
}

impl Payload {
    pub fn is_empty(&self) -> bool {
        self.metric_count == 0
    }
}

impl BatchSerializer {
    pub fn new(serializer: Arc<dyn MetricSerializer>, encoding: ContentEncoding) -> Self {
        Self {
            serializer,
            encoding,
        }
    }

    pub fn line_protocol(encoding: ContentEncoding) -> Self {
        Self::new(Arc::new(LineProtocolSerializer), encoding)
    }

    pub fn encoding(&self) -> ContentEncoding {
        self.encoding
    }

    pub fn encode<'a, I>(&self, metrics: I) -> Result<Payload, SerializationError>
    where
        I: IntoIterator<Item = &'a Metric>,
        I::IntoIter: ExactSizeIterator,
    {
        let metrics = metrics.into_iter();
        let capacity = metrics
            .len()
            .saturating_mul(ESTIMATED_LINE_SIZE)
            .min(MAX_PREALLOC);
        let mut text = String::with_capacity(capacity);
        let mut metric_count = 0;

        for metric in metrics {
            if self.serializer.serialize_metric(metric, &mut text)? {
                metric_count += 1;
            }
        }

        let body = match self.encoding {
            ContentEncoding::Identity => text.into_bytes(),
            ContentEncoding::Gzip => compress_gzip(text.as_bytes())?,
        };

        Ok(Payload {
            body,
            metric_count,
            encoding: self.encoding,
        })
    }
}

pub fn compress_gzip(data: &[u8]) -> Result<Vec<u8>, SerializationError> {
    use flate2::{Compression, write::GzEncoder};

    let mut encoder = GzEncoder::new(Vec::with_capacity(data.len() / 4), Compression::fast());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}
